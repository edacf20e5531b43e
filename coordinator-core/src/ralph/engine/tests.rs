use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::Result;
use crate::telemetry::EventLog;
use crate::types::{CompletionReason, RalphConfig, TaskStatus};

use super::super::types::{AgentBackend, HookKind, IterationResult, LoopHook, RalphTask};
use super::RalphEngine;

/// Backend that replays a scripted sequence of iteration results.
struct ScriptedBackend {
    script: Mutex<Vec<IterationResult>>,
    seen_prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn new(script: Vec<IterationResult>) -> Self {
        Self {
            script: Mutex::new(script),
            seen_prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AgentBackend for ScriptedBackend {
    async fn execute(
        &self,
        _backend: &str,
        prompt: &str,
        _context: &Value,
        _iteration: u32,
    ) -> Result<IterationResult> {
        self.seen_prompts.lock().push(prompt.to_string());
        let mut script = self.script.lock();
        if script.is_empty() {
            Ok(done())
        } else {
            Ok(script.remove(0))
        }
    }
}

fn done() -> IterationResult {
    IterationResult {
        exit_code: 0,
        output: "goal reached".to_string(),
        error: None,
        completed: true,
    }
}

fn blocked() -> IterationResult {
    IterationResult {
        exit_code: 2,
        output: "still going".to_string(),
        error: None,
        completed: false,
    }
}

fn failing(message: &str) -> IterationResult {
    IterationResult {
        exit_code: 1,
        output: String::new(),
        error: Some(message.to_string()),
        completed: false,
    }
}

fn fast_config() -> RalphConfig {
    RalphConfig {
        approval_timeout: Duration::from_millis(50),
        approval_poll: Duration::from_millis(5),
        ..RalphConfig::default()
    }
}

struct Fixture {
    engine: Arc<RalphEngine>,
    _dir: tempfile::TempDir,
}

fn engine_with(script: Vec<IterationResult>, config: RalphConfig) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = config;
    config.telemetry_path = dir.path().join("ralph-events.jsonl");
    let events = Arc::new(EventLog::new(config.telemetry_path.clone()));
    let engine = Arc::new(RalphEngine::new(
        config,
        Arc::new(ScriptedBackend::new(script)),
        events,
    ));
    Fixture { engine, _dir: dir }
}

async fn wait_terminal(engine: &RalphEngine, task_id: Uuid) -> RalphTask {
    for _ in 0..400 {
        if let Some(task) = engine.get_task(task_id).await {
            if !task.status.is_active() {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task {task_id} never reached a terminal state");
}

#[tokio::test]
async fn test_task_completes_when_agent_reports_done() {
    let f = engine_with(vec![done()], fast_config());
    let runner = Arc::clone(&f.engine);
    let worker = tokio::spawn(async move { runner.run().await });

    let task_id = f
        .engine
        .submit_task("fix the keyring prompt".to_string(), "aider".to_string(), 10, false, None)
        .await
        .expect("submit");

    let task = wait_terminal(&f.engine, task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.completion_reason, Some(CompletionReason::Success));
    assert_eq!(task.iteration, 1);

    f.engine.shutdown();
    worker.await.expect("worker");
}

#[tokio::test]
async fn test_blocked_exit_code_reenters_loop_and_runs_hooks() {
    struct CountingHook(Arc<Mutex<u32>>);

    #[async_trait]
    impl LoopHook for CountingHook {
        async fn execute(&self, _task: &RalphTask, _result: &IterationResult) {
            *self.0.lock() += 1;
        }
    }

    let f = engine_with(vec![blocked(), blocked(), done()], fast_config());
    let stop_count = Arc::new(Mutex::new(0));
    let recovery_count = Arc::new(Mutex::new(0));
    f.engine
        .add_hook(HookKind::Stop, Arc::new(CountingHook(Arc::clone(&stop_count))))
        .await;
    f.engine
        .add_hook(
            HookKind::Recovery,
            Arc::new(CountingHook(Arc::clone(&recovery_count))),
        )
        .await;

    let runner = Arc::clone(&f.engine);
    let worker = tokio::spawn(async move { runner.run().await });

    let task_id = f
        .engine
        .submit_task("keep pushing".to_string(), "aider".to_string(), 10, false, None)
        .await
        .expect("submit");

    let task = wait_terminal(&f.engine, task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.iteration, 3);
    assert_eq!(*stop_count.lock(), 2);
    assert_eq!(*recovery_count.lock(), 2);

    f.engine.shutdown();
    worker.await.expect("worker");
}

#[tokio::test]
async fn test_fixed_budget_never_exceeded_and_errors_are_stashed() {
    let f = engine_with(
        vec![failing("connection refused to qdrant"); 10],
        fast_config(),
    );
    let runner = Arc::clone(&f.engine);
    let worker = tokio::spawn(async move { runner.run().await });

    let task_id = f
        .engine
        .submit_task("fix the connection".to_string(), "aider".to_string(), 2, false, None)
        .await
        .expect("submit");

    let task = wait_terminal(&f.engine, task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.completion_reason, Some(CompletionReason::MaxIterations));
    // Two executed iterations, the third check trips the budget.
    assert_eq!(task.results.len(), 2);
    assert_eq!(task.context["last_error"], json!("connection refused to qdrant"));

    f.engine.shutdown();
    worker.await.expect("worker");
}

#[tokio::test]
async fn test_approval_timeout_rejects_task() {
    let f = engine_with(vec![failing("first pass incomplete"), done()], fast_config());
    let runner = Arc::clone(&f.engine);
    let worker = tokio::spawn(async move { runner.run().await });

    let task_id = f
        .engine
        .submit_task("gate this".to_string(), "aider".to_string(), 10, true, None)
        .await
        .expect("submit");

    // Nobody approves; the 50ms gate times out before iteration 2.
    let task = wait_terminal(&f.engine, task_id).await;
    assert_eq!(task.status, TaskStatus::Rejected);

    f.engine.shutdown();
    worker.await.expect("worker");
}

#[tokio::test]
async fn test_approval_grant_lets_task_continue() {
    let f = engine_with(
        vec![failing("first pass incomplete"), done()],
        RalphConfig {
            approval_timeout: Duration::from_secs(10),
            approval_poll: Duration::from_millis(5),
            ..RalphConfig::default()
        },
    );
    let runner = Arc::clone(&f.engine);
    let worker = tokio::spawn(async move { runner.run().await });

    let task_id = f
        .engine
        .submit_task("gate this".to_string(), "aider".to_string(), 10, true, None)
        .await
        .expect("submit");

    // Wait until the gate is up, then approve.
    for _ in 0..400 {
        if let Some(task) = f.engine.get_task(task_id).await {
            if task.awaiting_approval {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(f.engine.approve_task(task_id, true).await);

    let task = wait_terminal(&f.engine, task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.completion_reason, Some(CompletionReason::Success));

    f.engine.shutdown();
    worker.await.expect("worker");
}

#[tokio::test]
async fn test_stop_before_processing_keeps_task_stopped() {
    let f = engine_with(vec![done()], fast_config());

    let task_id = f
        .engine
        .submit_task("stop me".to_string(), "aider".to_string(), 10, false, None)
        .await
        .expect("submit");
    assert!(f.engine.stop_task(task_id).await);

    let runner = Arc::clone(&f.engine);
    let worker = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let task = f.engine.get_task(task_id).await.expect("task");
    assert_eq!(task.status, TaskStatus::Stopped);
    assert!(task.stopped_at.is_some());
    // Stopping again is a no-op.
    assert!(!f.engine.stop_task(task_id).await);

    f.engine.shutdown();
    worker.await.expect("worker");
}

#[tokio::test]
async fn test_history_feeds_stats_after_terminal_state() {
    let f = engine_with(vec![done(), done()], fast_config());
    let runner = Arc::clone(&f.engine);
    let worker = tokio::spawn(async move { runner.run().await });

    for _ in 0..2 {
        let task_id = f
            .engine
            .submit_task(
                "fix the keyring prompt".to_string(),
                "aider".to_string(),
                10,
                false,
                None,
            )
            .await
            .expect("submit");
        wait_terminal(&f.engine, task_id).await;
    }

    let stats = f.engine.stats().await;
    assert_eq!(stats.total_tasks, 2);
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.adaptive["history_entries"], 2);
    let task_types = stats.adaptive["task_types"].as_array().expect("types");
    assert_eq!(task_types.len(), 1);
    assert_eq!(task_types[0]["task_type"], "fix");
    assert_eq!(task_types[0]["backend"], "aider");
    assert_eq!(task_types[0]["success_rate"], 1.0);

    f.engine.shutdown();
    worker.await.expect("worker");
}
