//! Ralph task and iteration types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::Result;
use crate::types::{CompletionReason, IterationMode, TaskStatus};

/// Result of one agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationResult {
    pub exit_code: i32,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Agent explicitly reports the goal reached.
    #[serde(default)]
    pub completed: bool,
}

/// One entry in a task's iteration history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub timestamp: DateTime<Utc>,
    pub result: IterationResult,
}

/// A goal the engine iterates an agent on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RalphTask {
    pub task_id: Uuid,
    pub prompt: String,
    pub backend: String,
    /// Effective iteration budget; 0 means unbounded.
    pub max_iterations: u32,
    pub iteration_mode: IterationMode,
    /// The caller's raw request: -1 adaptive, 0 infinite, >0 fixed.
    pub original_max_iterations: i64,
    pub require_approval: bool,
    /// Carried forward between iterations; the loop stashes `last_error` and
    /// `last_exception` here for the next attempt.
    pub context: Value,
    pub status: TaskStatus,
    pub iteration: u32,
    pub started_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub results: Vec<IterationRecord>,
    pub error: Option<String>,
    pub awaiting_approval: bool,
    pub approved: Option<bool>,
    pub completion_reason: Option<CompletionReason>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl RalphTask {
    /// Create a queued task.
    #[must_use]
    pub fn new(
        prompt: String,
        backend: String,
        max_iterations: u32,
        iteration_mode: IterationMode,
        original_max_iterations: i64,
        require_approval: bool,
        context: Option<Value>,
    ) -> Self {
        let now = Utc::now();
        let context = match context {
            Some(Value::Object(map)) => Value::Object(map),
            _ => json!({}),
        };
        Self {
            task_id: Uuid::new_v4(),
            prompt,
            backend,
            max_iterations,
            iteration_mode,
            original_max_iterations,
            require_approval,
            context,
            status: TaskStatus::Queued,
            iteration: 0,
            started_at: now,
            last_update: now,
            results: Vec::new(),
            error: None,
            awaiting_approval: false,
            approved: None,
            completion_reason: None,
            stopped_at: None,
        }
    }

    /// Completion heuristic: the agent explicitly reports done, or the last
    /// three iterations all exited 0 with no TODO/FIXME/ERROR/FAILED markers
    /// in the latest output.
    #[must_use]
    pub fn is_complete(&self, result: &IterationResult) -> bool {
        if result.completed {
            return true;
        }
        let recent: Vec<&IterationRecord> = self.results.iter().rev().take(3).collect();
        let all_successful = !recent.is_empty() && recent.iter().all(|r| r.result.exit_code == 0);

        let output_upper = result.output.to_uppercase();
        let no_todos = !output_upper.contains("TODO") && !output_upper.contains("FIXME");
        let no_errors = !output_upper.contains("ERROR") && !output_upper.contains("FAILED");

        all_successful && no_todos && no_errors
    }
}

/// Terminal-state record kept for adaptive learning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub task_id: Uuid,
    pub success: bool,
    pub iterations: u32,
    pub timestamp: DateTime<Utc>,
}

/// Agent backend seam: executes one iteration of a prompt.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Invoke the named backend with the prompt, carried context, and
    /// iteration number.
    async fn execute(
        &self,
        backend: &str,
        prompt: &str,
        context: &Value,
        iteration: u32,
    ) -> Result<IterationResult>;
}

/// Hook categories run during the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Runs after a blocked exit code, before re-entry.
    Stop,
    /// Runs after a blocked exit code when context recovery is enabled.
    Recovery,
}

/// Structured callback attached to the loop.
#[async_trait]
pub trait LoopHook: Send + Sync {
    async fn execute(&self, task: &RalphTask, result: &IterationResult);
}
