//! File-backed registry of federated MCP servers.

use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{Error, Result};

/// One federated server entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederatedServer {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub server_url: String,
    #[serde(default = "default_server_type")]
    pub server_type: String,
    #[serde(default = "default_auth_type")]
    pub auth_type: String,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub priority: i64,
    pub created_at: String,
    pub updated_at: String,
}

fn default_server_type() -> String {
    "mcp".to_string()
}

fn default_auth_type() -> String {
    "none".to_string()
}

/// Upsert request; unset fields inherit from an existing entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FederationUpsert {
    pub server_url: Option<String>,
    pub url: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub server_type: Option<String>,
    pub auth_type: Option<String>,
    pub capabilities: Option<Value>,
    pub tags: Option<Vec<String>>,
    pub priority: Option<i64>,
}

/// Minimal file-backed registry snapshot, keyed by `server_url`.
#[derive(Debug)]
pub struct FederationStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FederationStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Vec<FederatedServer> {
        let Ok(raw) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        match serde_json::from_str(&raw) {
            Ok(servers) => servers,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "federation store corrupted, reinitializing");
                Vec::new()
            }
        }
    }

    fn save(&self, servers: &[FederatedServer]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(servers)?)?;
        Ok(())
    }

    /// List registered servers.
    pub async fn list(&self) -> Vec<FederatedServer> {
        let _guard = self.lock.lock().await;
        self.load()
    }

    /// Insert or update a server by URL, inheriting unset fields.
    pub async fn upsert(&self, request: FederationUpsert) -> Result<FederatedServer> {
        let server_url = request
            .server_url
            .clone()
            .or_else(|| request.url.clone())
            .ok_or_else(|| Error::Validation("server_url is required".to_string()))?;

        let _guard = self.lock.lock().await;
        let mut servers = self.load();
        let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let existing_idx = servers.iter().position(|s| s.server_url == server_url);

        let record = match existing_idx {
            Some(idx) => {
                let existing = &servers[idx];
                FederatedServer {
                    id: existing.id,
                    name: request.name.unwrap_or_else(|| existing.name.clone()),
                    description: request
                        .description
                        .unwrap_or_else(|| existing.description.clone()),
                    server_url,
                    server_type: request
                        .server_type
                        .unwrap_or_else(|| existing.server_type.clone()),
                    auth_type: request
                        .auth_type
                        .unwrap_or_else(|| existing.auth_type.clone()),
                    capabilities: request
                        .capabilities
                        .unwrap_or_else(|| existing.capabilities.clone()),
                    tags: request.tags.unwrap_or_else(|| existing.tags.clone()),
                    priority: request.priority.unwrap_or(existing.priority),
                    created_at: existing.created_at.clone(),
                    updated_at: now,
                }
            }
            None => {
                let next_id = servers.iter().map(|s| s.id).max().unwrap_or(0) + 1;
                let name = request
                    .name
                    .clone()
                    .or_else(|| host_of(&server_url))
                    .unwrap_or_else(|| server_url.clone());
                FederatedServer {
                    id: next_id,
                    name,
                    description: request.description.unwrap_or_default(),
                    server_url,
                    server_type: request.server_type.unwrap_or_else(default_server_type),
                    auth_type: request.auth_type.unwrap_or_else(default_auth_type),
                    capabilities: request.capabilities.unwrap_or_else(|| Value::Object(serde_json::Map::new())),
                    tags: request.tags.unwrap_or_default(),
                    priority: request.priority.unwrap_or(0),
                    created_at: now.clone(),
                    updated_at: now,
                }
            }
        };

        match existing_idx {
            Some(idx) => servers[idx] = record.clone(),
            None => servers.push(record.clone()),
        }
        self.save(&servers)?;
        Ok(record)
    }
}

fn host_of(url: &str) -> Option<String> {
    let after_scheme = url.split("://").nth(1)?;
    let host = after_scheme.split(['/', ':']).next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}
