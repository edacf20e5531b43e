//! Tool-call audit logging.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

/// One audit entry, appended per tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: String,
    pub service: String,
    pub tool_name: String,
    /// Truncated hash of the caller identity; raw identities never land in
    /// the log.
    pub caller_hash: String,
    /// Truncated hash of the canonicalized parameters.
    pub parameters_hash: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub latency_ms: f64,
}

/// Append-only JSONL audit log for tool invocations.
///
/// Writing the audit record must never crash the caller: all failures are
/// logged and swallowed.
#[derive(Debug)]
pub struct AuditLogger {
    path: PathBuf,
    service: String,
    lock: Mutex<()>,
}

impl AuditLogger {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, service: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            service: service.into(),
            lock: Mutex::new(()),
        }
    }

    fn short_hash(input: &str) -> String {
        let digest = Sha256::digest(input.as_bytes());
        format!("{digest:x}")[..16].to_string()
    }

    /// Canonical JSON with object keys sorted at every level, so equal
    /// parameter sets hash equally regardless of insertion order.
    fn canonicalize(value: &Value) -> String {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let fields: Vec<String> = keys
                    .into_iter()
                    .map(|k| {
                        format!(
                            "{}:{}",
                            serde_json::to_string(k).unwrap_or_default(),
                            Self::canonicalize(&map[k])
                        )
                    })
                    .collect();
                format!("{{{}}}", fields.join(","))
            }
            Value::Array(items) => {
                let fields: Vec<String> = items.iter().map(Self::canonicalize).collect();
                format!("[{}]", fields.join(","))
            }
            other => other.to_string(),
        }
    }

    /// Append one audit record.
    pub fn record(
        &self,
        tool_name: &str,
        caller: &str,
        parameters: &Value,
        outcome: &str,
        error_message: Option<&str>,
        latency_ms: f64,
    ) {
        let record = AuditRecord {
            timestamp: Utc::now().to_rfc3339(),
            service: self.service.clone(),
            tool_name: tool_name.to_string(),
            caller_hash: Self::short_hash(caller),
            parameters_hash: Self::short_hash(&Self::canonicalize(parameters)),
            outcome: outcome.to_string(),
            error_message: error_message.map(str::to_string),
            latency_ms,
        };

        let _guard = self.lock.lock();
        if let Err(err) = self.append(&record) {
            warn!(tool_name, error = %err, "audit write failed");
        }
    }

    fn append(&self, record: &AuditRecord) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{line}")
    }
}
