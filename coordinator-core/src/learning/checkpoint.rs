//! Crash-recovery checkpointing for the learning pipeline.
//!
//! Checkpoints are written atomically (temp file + rename), so the file on
//! disk either does not exist or parses as a complete JSON document carrying
//! a schema version. Legacy formats without a schema version are discarded.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Current checkpoint schema version.
pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

/// Persistent pipeline position.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Checkpoint {
    /// Byte offset per telemetry file path.
    #[serde(default)]
    pub last_positions: HashMap<String, u64>,
    #[serde(default)]
    pub processed_count: u64,
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Saves and restores pipeline checkpoints.
#[derive(Debug)]
pub struct Checkpointer {
    dir: PathBuf,
}

impl Checkpointer {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn final_path(&self) -> PathBuf {
        self.dir.join("checkpoint.json")
    }

    /// Save atomically: write a temp file, then rename over the target.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let temp_path = self.dir.join("checkpoint.tmp");
        let final_path = self.final_path();

        let mut stamped = checkpoint.clone();
        stamped.schema_version = CHECKPOINT_SCHEMA_VERSION;
        stamped.timestamp = Some(Utc::now());

        let payload = serde_json::to_string(&stamped)?;
        if let Err(err) = std::fs::write(&temp_path, payload) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(Error::Io(err));
        }
        std::fs::rename(&temp_path, &final_path)?;
        Ok(())
    }

    /// Load the last checkpoint, or a fresh one when absent or unusable.
    #[must_use]
    pub fn load(&self) -> Checkpoint {
        let path = self.final_path();
        let Ok(raw) = std::fs::read_to_string(&path) else {
            info!("no checkpoint found, starting fresh");
            return Checkpoint::default();
        };

        let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else {
            warn!(path = %path.display(), "checkpoint unreadable, starting fresh");
            return Checkpoint::default();
        };
        if value.get("schema_version").is_none() {
            warn!("checkpoint missing schema_version, treating as legacy and starting fresh");
            return Checkpoint::default();
        }
        match serde_json::from_value::<Checkpoint>(value) {
            Ok(checkpoint) => {
                info!(
                    processed_count = checkpoint.processed_count,
                    files = checkpoint.last_positions.len(),
                    "resuming from checkpoint"
                );
                checkpoint
            }
            Err(err) => {
                warn!(error = %err, "checkpoint schema mismatch, starting fresh");
                Checkpoint::default()
            }
        }
    }

    /// Remove the checkpoint (tests, resets).
    pub fn clear(&self) -> Result<()> {
        let path = self.final_path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let checkpointer = Checkpointer::new(dir.path().join("checkpoints"));

        let mut checkpoint = Checkpoint::default();
        checkpoint
            .last_positions
            .insert("telemetry/ralph-events.jsonl".to_string(), 4_096);
        checkpoint.processed_count = 250;
        checkpointer.save(&checkpoint).expect("save");

        let loaded = checkpointer.load();
        assert_eq!(loaded.processed_count, 250);
        assert_eq!(
            loaded.last_positions.get("telemetry/ralph-events.jsonl"),
            Some(&4_096)
        );
        assert_eq!(loaded.schema_version, CHECKPOINT_SCHEMA_VERSION);
        assert!(loaded.timestamp.is_some());

        // No stray temp file after a successful save.
        assert!(!dir.path().join("checkpoints").join("checkpoint.tmp").exists());
    }

    #[test]
    fn test_missing_checkpoint_starts_fresh() {
        let dir = tempfile::tempdir().expect("tempdir");
        let checkpointer = Checkpointer::new(dir.path());
        let loaded = checkpointer.load();
        assert_eq!(loaded.processed_count, 0);
        assert!(loaded.last_positions.is_empty());
    }

    #[test]
    fn test_legacy_checkpoint_without_schema_version_is_discarded() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("checkpoint.json"),
            r#"{"last_positions": {"old.jsonl": 99}, "processed_count": 12}"#,
        )
        .expect("write");

        let checkpointer = Checkpointer::new(dir.path());
        let loaded = checkpointer.load();
        assert_eq!(loaded.processed_count, 0);
    }

    #[test]
    fn test_corrupt_checkpoint_is_discarded() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("checkpoint.json"), "{half a json").expect("write");
        let checkpointer = Checkpointer::new(dir.path());
        assert_eq!(checkpointer.load().processed_count, 0);
    }

    #[test]
    fn test_clear_removes_checkpoint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let checkpointer = Checkpointer::new(dir.path());
        checkpointer.save(&Checkpoint::default()).expect("save");
        checkpointer.clear().expect("clear");
        assert_eq!(checkpointer.load().processed_count, 0);
    }
}
