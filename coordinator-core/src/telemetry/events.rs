//! Append-only JSONL event log.
//!
//! Telemetry events written here are consumed by the continuous-learning
//! pipeline, which tracks a byte offset per file. Writes are append-only and
//! never reordered.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::warn;

/// Append-only JSONL writer for telemetry events.
///
/// Event logging must never take down the caller: failures are logged and
/// swallowed.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl EventLog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the underlying log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event with a timestamp, merging `fields` into the record.
    pub fn record(&self, event: &str, fields: Value) {
        let mut record = json!({
            "event": event,
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let (Some(target), Some(extra)) = (record.as_object_mut(), fields.as_object()) {
            for (key, value) in extra {
                target.insert(key.clone(), value.clone());
            }
        }

        let _guard = self.lock.lock();
        if let Err(err) = self.append_line(&record) {
            warn!(path = %self.path.display(), error = %err, "telemetry event write failed");
        }
    }

    fn append_line(&self, record: &Value) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{line}")?;
        file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_append_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = EventLog::new(dir.path().join("telemetry").join("events.jsonl"));

        log.record("task_submitted", json!({"task_id": "t-1"}));
        log.record("task_completed", json!({"task_id": "t-1", "status": "completed"}));

        let contents = std::fs::read_to_string(log.path()).expect("read log");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(first["event"], "task_submitted");
        assert_eq!(first["task_id"], "t-1");
        assert!(first["timestamp"].is_string());

        let second: Value = serde_json::from_str(lines[1]).expect("json");
        assert_eq!(second["event"], "task_completed");
    }
}
