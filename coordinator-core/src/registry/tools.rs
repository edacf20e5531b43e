//! Tool catalog with progressive disclosure and curated dispatch.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::types::{DisclosureMode, ToolDefinition};

/// A typed handler behind a tool name. Dispatch is explicit wiring, not
/// reflection.
pub type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Tool description at the requested disclosure tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPayload {
    pub name: String,
    pub description: String,
    pub manifest: Value,
}

/// Catalog of tool manifests with a disk cache tier.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, ToolDefinition>>,
    handlers: RwLock<HashMap<String, ToolHandler>>,
    fs_cache_path: PathBuf,
    api_key: Option<String>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new(fs_cache_path: impl Into<PathBuf>, api_key: Option<String>) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            fs_cache_path: fs_cache_path.into(),
            api_key,
        }
    }

    /// Register or replace a tool definition.
    pub fn register(&self, tool: ToolDefinition) {
        self.tools.write().insert(tool.name.clone(), tool);
    }

    /// Wire an executable handler to a tool name.
    pub fn register_handler<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        self.handlers
            .write()
            .insert(name.into(), Arc::new(move |params| Box::pin(handler(params))));
    }

    /// Hydrate the in-memory catalog from the disk cache.
    ///
    /// Corrupt cache files are discarded with a warning rather than
    /// propagated.
    pub async fn warm_cache(&self) -> usize {
        let path = self.fs_cache_path.clone();
        let loaded = tokio::task::spawn_blocking(move || -> Option<Vec<ToolDefinition>> {
            let raw = std::fs::read_to_string(path).ok()?;
            serde_json::from_str(&raw).ok()
        })
        .await
        .ok()
        .flatten();

        match loaded {
            Some(cached) => {
                let count = cached.len();
                let mut tools = self.tools.write();
                for tool in cached {
                    tools.insert(tool.name.clone(), tool);
                }
                info!(count, "tool catalog hydrated from disk cache");
                count
            }
            None => {
                debug!(path = %self.fs_cache_path.display(), "no usable tool cache on disk");
                0
            }
        }
    }

    /// Dump the in-memory catalog to the disk cache.
    pub async fn persist_cache(&self) -> Result<()> {
        let tools: Vec<ToolDefinition> = self.tools.read().values().cloned().collect();
        let path = self.fs_cache_path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let payload = serde_json::to_string_pretty(&tools)?;
            std::fs::write(&path, payload)?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Internal(format!("persist task: {e}")))??;
        debug!("tool catalog persisted to disk cache");
        Ok(())
    }

    /// List tools at the requested disclosure tier.
    ///
    /// # Errors
    ///
    /// `full` disclosure requires a valid API key when one is configured.
    pub fn get_tools(&self, mode: DisclosureMode, api_key: Option<&str>) -> Result<Vec<ToolPayload>> {
        if mode == DisclosureMode::Full {
            if let Some(expected) = &self.api_key {
                if api_key != Some(expected.as_str()) {
                    return Err(Error::Unauthorized(
                        "full tool disclosure requires a valid API key".to_string(),
                    ));
                }
            }
        }

        let mut tools: Vec<ToolPayload> = self
            .tools
            .read()
            .values()
            .map(|tool| ToolPayload {
                name: tool.name.clone(),
                description: tool.description.clone(),
                manifest: match mode {
                    DisclosureMode::Minimal => json!({"name": tool.name}),
                    DisclosureMode::Full => tool.manifest.clone(),
                },
            })
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tools)
    }

    /// Estimated token cost of disclosing the full catalog.
    #[must_use]
    pub fn catalog_cost_tokens(&self) -> u64 {
        self.tools
            .read()
            .values()
            .map(|t| u64::from(t.cost_estimate_tokens))
            .sum()
    }

    /// Execute a tool by name.
    ///
    /// Only curated integrations carry handlers; unknown or non-executable
    /// names fail with a structured error.
    pub async fn execute_tool(&self, name: &str, params: Value) -> Result<Value> {
        let handler = self.handlers.read().get(name).map(Arc::clone);
        match handler {
            Some(handler) => handler(params).await,
            None => {
                if self.tools.read().contains_key(name) {
                    warn!(tool = name, "tool is listed but not executable");
                    Err(Error::Validation(format!(
                        "tool {name} is not executable through this registry"
                    )))
                } else {
                    Err(Error::NotFound(format!("tool {name}")))
                }
            }
        }
    }

    /// Number of tools in the catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tool(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: format!("{name} tool"),
            manifest: json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"],
            }),
            cost_estimate_tokens: 1_500,
        }
    }

    #[test]
    fn test_minimal_disclosure_hides_manifests() {
        let registry = ToolRegistry::new("unused.json", None);
        registry.register(sample_tool("hybrid_search"));

        let tools = registry
            .get_tools(DisclosureMode::Minimal, None)
            .expect("minimal is public");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].manifest, json!({"name": "hybrid_search"}));
    }

    #[test]
    fn test_full_disclosure_requires_key_when_configured() {
        let registry = ToolRegistry::new("unused.json", Some("secret".to_string()));
        registry.register(sample_tool("hybrid_search"));

        let err = registry
            .get_tools(DisclosureMode::Full, None)
            .unwrap_err();
        assert_eq!(err.kind(), "unauthorized");

        let err = registry
            .get_tools(DisclosureMode::Full, Some("wrong"))
            .unwrap_err();
        assert_eq!(err.kind(), "unauthorized");

        let tools = registry
            .get_tools(DisclosureMode::Full, Some("secret"))
            .expect("authorized");
        assert_eq!(tools[0].manifest["required"], json!(["query"]));
    }

    #[tokio::test]
    async fn test_execute_dispatches_to_registered_handler() {
        let registry = ToolRegistry::new("unused.json", None);
        registry.register(sample_tool("echo"));
        registry.register_handler("echo", |params| async move { Ok(json!({"echo": params})) });

        let result = registry
            .execute_tool("echo", json!({"query": "hi"}))
            .await
            .expect("dispatch");
        assert_eq!(result["echo"]["query"], "hi");
    }

    #[tokio::test]
    async fn test_execute_unknown_tool_is_structured_error() {
        let registry = ToolRegistry::new("unused.json", None);
        let err = registry.execute_tool("nope", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");

        registry.register(sample_tool("listed-only"));
        let err = registry
            .execute_tool("listed-only", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_cache_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache_path = dir.path().join("tool-cache.json");

        let registry = ToolRegistry::new(&cache_path, None);
        registry.register(sample_tool("hybrid_search"));
        registry.register(sample_tool("augment_query"));
        registry.persist_cache().await.expect("persist");

        let rehydrated = ToolRegistry::new(&cache_path, None);
        assert_eq!(rehydrated.warm_cache().await, 2);
        assert_eq!(rehydrated.len(), 2);
    }

    #[tokio::test]
    async fn test_warm_cache_tolerates_corrupt_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache_path = dir.path().join("tool-cache.json");
        std::fs::write(&cache_path, "{not json").expect("write");

        let registry = ToolRegistry::new(&cache_path, None);
        assert_eq!(registry.warm_cache().await, 0);
        assert!(registry.is_empty());
    }
}
