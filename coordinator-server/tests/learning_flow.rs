//! End-to-end learning flow: telemetry → patterns + proposals → Ralph tasks.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use coordinator_core::clients::{ChatModel, VectorStore};
use coordinator_core::embeddings::EmbeddingProvider;
use coordinator_core::learning::{LearningPipeline, ProposalSink};
use coordinator_core::pipeline::QueryPipeline;
use coordinator_core::ralph::{IterationResult, RalphEngine};
use coordinator_core::telemetry::EventLog;
use coordinator_core::types::{LearningConfig, RalphConfig, RoutingConfig, TaskStatus};
use coordinator_test_utils::{
    seed_error_solution, store_with_collections, task_completed_event, test_embeddings,
    FixedChat, ScriptedBackend,
};

fn append_events(path: &std::path::Path, events: &[serde_json::Value]) {
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

#[tokio::test]
async fn test_cap_hit_telemetry_becomes_an_approval_gated_task() {
    let dir = tempfile::tempdir().expect("tempdir");
    let learning_config = LearningConfig::with_data_root(dir.path());
    let ralph_config = RalphConfig {
        telemetry_path: dir.path().join("telemetry").join("ralph-events.jsonl"),
        ..RalphConfig::default()
    };

    let engine = Arc::new(RalphEngine::new(
        ralph_config.clone(),
        Arc::new(ScriptedBackend::new(vec![IterationResult {
            exit_code: 1,
            output: String::new(),
            error: Some("first pass incomplete".to_string()),
            completed: false,
        }])),
        Arc::new(EventLog::new(ralph_config.telemetry_path)),
    ));

    let store = store_with_collections();
    let pipeline = LearningPipeline::new(
        learning_config.clone(),
        store as Arc<dyn VectorStore>,
        test_embeddings() as Arc<dyn EmbeddingProvider>,
        Some(Arc::clone(&engine) as Arc<dyn ProposalSink>),
    );

    // A task that ran straight into its adaptive cap.
    append_events(
        &learning_config.telemetry_paths[0],
        &[task_completed_event(
            "t-42",
            "debug the failing deployment",
            25,
            25,
        )],
    );

    let report = pipeline.process_batch().await.expect("batch");
    assert_eq!(report.proposals_generated, 1);

    // The proposal landed in the engine as an approval-gated task.
    let stats = engine.stats().await;
    assert_eq!(stats.total_tasks, 1);

    let tasks = engine.list_tasks().await;
    assert_eq!(tasks.len(), 1);
    let submitted = &tasks[0];
    assert!(submitted.require_approval);
    assert!(submitted.prompt.contains("Optimization Proposal"));
    assert_eq!(submitted.context["proposal_type"], "iteration_limit_increase");
    assert_eq!(submitted.max_iterations, 1);

    // Run the engine: the single-iteration proposal task executes its one
    // attempt and terminates at the budget.
    let runner = Arc::clone(&engine);
    let worker = tokio::spawn(async move { runner.run().await });

    let task_id = submitted.task_id;
    for _ in 0..200 {
        if let Some(task) = engine.get_task(task_id).await {
            if !task.status.is_active() {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let finished = engine.get_task(task_id).await.expect("task");
    assert_eq!(finished.status, TaskStatus::Completed);
    assert_eq!(finished.results.len(), 1);
    assert_eq!(finished.context["last_error"], json!("first pass incomplete"));

    engine.shutdown();
    worker.abort();
}

#[tokio::test]
async fn test_fixed_chat_generates_answer_through_the_pipeline() {
    let store = store_with_collections();
    let embeddings = test_embeddings();
    seed_error_solution(
        store.as_ref(),
        embeddings.as_ref(),
        "sol-1",
        "gnome keyring error",
        "enable the keyring service",
        true,
    )
    .await
    .expect("seed");

    let chat: Arc<dyn ChatModel> = Arc::new(FixedChat::new("Enable gnome-keyring."));
    let pipeline = QueryPipeline::new(
        store as Arc<dyn VectorStore>,
        embeddings as Arc<dyn EmbeddingProvider>,
        Some(chat),
        RoutingConfig::default(),
    );

    let outcome = pipeline
        .route("gnome keyring error", true, true, 5, 0.2, 2_000)
        .await
        .expect("route");
    assert_eq!(outcome.llm_used, "local");
    assert_eq!(outcome.answer.as_deref(), Some("Enable gnome-keyring."));
}

#[tokio::test]
async fn test_submitted_proposal_task_can_be_stopped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ralph_config = RalphConfig {
        telemetry_path: dir.path().join("ralph-events.jsonl"),
        ..RalphConfig::default()
    };
    let engine = Arc::new(RalphEngine::new(
        ralph_config.clone(),
        Arc::new(ScriptedBackend::new(Vec::new())),
        Arc::new(EventLog::new(ralph_config.telemetry_path)),
    ));

    let task_id = engine
        .submit_task("apply the proposal".to_string(), "aider".to_string(), 1, true, None)
        .await
        .expect("submit");
    assert!(engine.stop_task(task_id).await);
    let task = engine.get_task(task_id).await.expect("task");
    assert_eq!(task.status, TaskStatus::Stopped);
}
