use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use crate::clients::{InMemoryVectorStore, VectorStore};
use crate::embeddings::MockEmbedding;
use crate::error::Result;
use crate::types::{LearningConfig, Proposal};

use super::{LearningPipeline, ProposalSink};

struct RecordingSink {
    submitted: Mutex<Vec<String>>,
}

#[async_trait]
impl ProposalSink for RecordingSink {
    async fn submit(&self, proposal: &Proposal) -> Result<()> {
        self.submitted.lock().push(proposal.proposal_id.clone());
        Ok(())
    }
}

fn write_events(path: &std::path::Path, events: &[serde_json::Value]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("mkdir");
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("open");
    for event in events {
        writeln!(file, "{event}").expect("write");
    }
}

fn efficient_completion(task_id: &str) -> serde_json::Value {
    json!({
        "event": "task_completed",
        "task_id": task_id,
        "status": "completed",
        "total_iterations": 2,
        "adaptive_limit_used": 10,
        "timestamp": "2026-07-01T10:00:00Z",
        "task": {
            "task_id": task_id,
            "prompt": format!("fix the keyring prompt appearing at login ({task_id})"),
            "output": "enabled gnome-keyring via the desktop module option",
            "iteration": 2,
            "backend": "aider",
            "context": {},
        },
    })
}

fn limit_hit(task_id: &str) -> serde_json::Value {
    json!({
        "event": "task_completed",
        "task_id": task_id,
        "status": "completed",
        "total_iterations": 25,
        "adaptive_limit_used": 25,
        "task": {
            "task_id": task_id,
            "prompt": "debug the deployment pipeline",
            "output": "made progress",
            "iteration": 25,
            "backend": "aider",
            "context": {"last_error": "timeout contacting http://qdrant:6333"},
        },
    })
}

struct Fixture {
    pipeline: LearningPipeline,
    vector: Arc<InMemoryVectorStore>,
    sink: Arc<RecordingSink>,
    config: LearningConfig,
    _dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = LearningConfig::with_data_root(dir.path());
    config.checkpoint_interval = 2;

    let vector = Arc::new(InMemoryVectorStore::new());
    vector.create_collections(&["skills-patterns"]);
    let sink = Arc::new(RecordingSink {
        submitted: Mutex::new(Vec::new()),
    });
    let pipeline = LearningPipeline::new(
        config.clone(),
        Arc::clone(&vector) as Arc<dyn VectorStore>,
        Arc::new(MockEmbedding::new(16)),
        Some(Arc::clone(&sink) as Arc<dyn ProposalSink>),
    );
    Fixture {
        pipeline,
        vector,
        sink,
        config,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_batch_extracts_indexes_and_proposes() {
    let f = fixture();
    write_events(
        &f.config.telemetry_paths[0],
        &[
            efficient_completion("t-1"),
            limit_hit("t-2"),
            json!({"event": "task_submitted", "task_id": "t-3"}),
        ],
    );

    let report = f.pipeline.process_batch().await.expect("batch");
    assert_eq!(report.patterns_extracted, 1);
    assert_eq!(report.examples_written, 1);
    // Limit hit + timeout signal.
    assert_eq!(report.proposals_generated, 2);

    // Pattern landed in the catalog.
    assert_eq!(
        f.vector.collection_size("skills-patterns").await.expect("size"),
        1
    );

    // Fine-tuning dataset appended.
    let dataset = std::fs::read_to_string(&f.config.dataset_path).expect("dataset");
    assert_eq!(dataset.lines().count(), 1);

    // Proposals were submitted as approval-gated tasks.
    assert_eq!(f.sink.submitted.lock().len(), 2);

    // Checkpoint exists, is valid JSON, and carries the schema version.
    let checkpoint_raw =
        std::fs::read_to_string(f.config.checkpoint_dir.join("checkpoint.json")).expect("file");
    let checkpoint: serde_json::Value = serde_json::from_str(&checkpoint_raw).expect("json");
    assert_eq!(checkpoint["schema_version"], 1);
    assert_eq!(checkpoint["processed_count"], 3);
}

#[tokio::test]
async fn test_second_batch_resumes_from_offset_without_duplicates() {
    let f = fixture();
    write_events(&f.config.telemetry_paths[0], &[efficient_completion("t-1")]);
    f.pipeline.process_batch().await.expect("first batch");

    // Nothing new: no patterns, no proposals.
    let report = f.pipeline.process_batch().await.expect("second batch");
    assert_eq!(report.patterns_extracted, 0);
    assert_eq!(report.proposals_generated, 0);

    // Appending the same content again is dropped by content dedup.
    write_events(&f.config.telemetry_paths[0], &[efficient_completion("t-1")]);
    let report = f.pipeline.process_batch().await.expect("third batch");
    assert_eq!(report.patterns_extracted, 0);

    let stats = f.pipeline.stats().await;
    assert_eq!(stats["deduplication"]["duplicates_found"], 1);
}

#[tokio::test]
async fn test_proposal_dedup_across_batches() {
    let f = fixture();
    write_events(&f.config.telemetry_paths[0], &[limit_hit("t-2")]);
    let first = f.pipeline.process_batch().await.expect("batch");
    assert_eq!(first.proposals_generated, 2);

    // The same cap-hit shape later yields equivalent proposals: deduped.
    write_events(&f.config.telemetry_paths[0], &[limit_hit("t-99")]);
    let second = f.pipeline.process_batch().await.expect("batch");
    assert_eq!(second.proposals_generated, 0);
}

#[tokio::test]
async fn test_backpressure_pauses_without_advancing_offsets() {
    let f = fixture();
    let mut config = f.config.clone();
    config.backpressure_threshold_mb = 0;
    let pipeline = LearningPipeline::new(
        config.clone(),
        Arc::clone(&f.vector) as Arc<dyn VectorStore>,
        Arc::new(MockEmbedding::new(16)),
        None,
    );

    write_events(&config.telemetry_paths[0], &[efficient_completion("t-1")]);
    let status = pipeline.check_backpressure().await;
    assert!(status.paused);
    assert!(status.unprocessed_mb > 0.0);

    // Consuming the backlog clears the pause condition.
    pipeline.process_batch().await.expect("batch");
    let status = pipeline.check_backpressure().await;
    assert!(!status.paused);
}

#[tokio::test]
async fn test_malformed_lines_are_skipped() {
    let f = fixture();
    write_events(&f.config.telemetry_paths[1], &[efficient_completion("t-1")]);
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&f.config.telemetry_paths[1])
        .expect("open");
    writeln!(file, "{{half a json line").expect("write");
    drop(file);

    let report = f.pipeline.process_batch().await.expect("batch");
    assert_eq!(report.patterns_extracted, 1);
}

#[tokio::test]
async fn test_export_validates_format() {
    let f = fixture();
    write_events(&f.config.telemetry_paths[0], &[efficient_completion("t-1")]);
    f.pipeline.process_batch().await.expect("batch");

    // Corrupt one line and add an invalid example.
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&f.config.dataset_path)
        .expect("open");
    writeln!(file, "not json").expect("write");
    writeln!(file, "{}", json!({"messages": []})).expect("write");
    drop(file);

    let (path, count) = f.pipeline.export_dataset(None).await.expect("export");
    assert_eq!(count, 1);
    assert!(path.exists());
}

#[tokio::test]
async fn test_stats_shape() {
    let f = fixture();
    write_events(&f.config.telemetry_paths[0], &[efficient_completion("t-1")]);
    f.pipeline.process_batch().await.expect("batch");

    let stats = f.pipeline.stats().await;
    assert_eq!(stats["total_patterns_learned"], 1);
    assert_eq!(stats["patterns_by_type"]["task_completion"], 1);
    assert_eq!(stats["finetuning_dataset_size"], 1);
    assert_eq!(stats["learning_paused"], false);
    assert!(stats["backpressure"]["unprocessed_mb"].is_number());
}
