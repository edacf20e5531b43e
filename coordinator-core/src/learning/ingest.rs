//! Telemetry ingestion: tail append-only JSONL files from saved offsets.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::error::Result;

/// Read events appended after `offset`, returning them with the new offset.
///
/// Malformed JSON lines are skipped. A trailing line without a newline is
/// consumed like any other; telemetry writers append whole lines.
pub fn read_new_events(path: &Path, offset: u64) -> Result<(Vec<Value>, u64)> {
    if !path.exists() {
        return Ok((Vec::new(), offset));
    }

    let mut file = std::fs::File::open(path)?;
    let file_len = file.metadata()?.len();
    if offset >= file_len {
        return Ok((Vec::new(), offset.min(file_len)));
    }

    file.seek(SeekFrom::Start(offset))?;
    let mut buffer = String::new();
    file.read_to_string(&mut buffer)?;

    let mut events = Vec::new();
    let mut skipped = 0usize;
    for line in buffer.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(event) => events.push(event),
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!(path = %path.display(), skipped, "skipped malformed telemetry lines");
    }

    Ok((events, file_len))
}

/// Total unprocessed bytes across telemetry files given saved offsets.
#[must_use]
pub fn unprocessed_bytes(paths: &[std::path::PathBuf], offsets: &impl OffsetLookup) -> u64 {
    paths
        .iter()
        .map(|path| {
            let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            let offset = offsets.offset_for(&path.to_string_lossy());
            size.saturating_sub(offset)
        })
        .sum()
}

/// Offset source for backpressure accounting.
pub trait OffsetLookup {
    fn offset_for(&self, path: &str) -> u64;
}

impl OffsetLookup for std::collections::HashMap<String, u64> {
    fn offset_for(&self, path: &str) -> u64 {
        self.get(path).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_reads_from_offset_and_skips_malformed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.jsonl");

        let mut file = std::fs::File::create(&path).expect("create");
        writeln!(file, "{}", json!({"event": "one"})).expect("write");
        let first_offset = file.metadata().expect("meta").len();
        writeln!(file, "{{broken json").expect("write");
        writeln!(file, "{}", json!({"event": "two"})).expect("write");
        drop(file);

        // From zero: both valid events, malformed line skipped.
        let (events, offset) = read_new_events(&path, 0).expect("read");
        assert_eq!(events.len(), 2);
        assert_eq!(offset, std::fs::metadata(&path).expect("meta").len());

        // Resuming past the first line yields only the second event.
        let (events, _) = read_new_events(&path, first_offset).expect("read");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["event"], "two");

        // Fully caught up: nothing new.
        let (events, same) = read_new_events(&path, offset).expect("read");
        assert!(events.is_empty());
        assert_eq!(same, offset);
    }

    #[test]
    fn test_missing_file_returns_no_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (events, offset) =
            read_new_events(&dir.path().join("absent.jsonl"), 42).expect("read");
        assert!(events.is_empty());
        assert_eq!(offset, 42);
    }

    #[test]
    fn test_unprocessed_bytes_accounting() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.jsonl");
        std::fs::write(&path, "x".repeat(1_000)).expect("write");

        let mut offsets = std::collections::HashMap::new();
        offsets.insert(path.to_string_lossy().to_string(), 400u64);

        let total = unprocessed_bytes(&[path], &offsets);
        assert_eq!(total, 600);
    }
}
