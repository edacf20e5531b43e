//! The queue-driven Ralph loop engine.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::telemetry::EventLog;
use crate::types::{CompletionReason, IterationMode, RalphConfig, TaskStatus};

use super::adaptive::{calculate_adaptive_limit, extract_task_type, history_adjustment};
use super::types::{
    AgentBackend, HistoryRecord, HookKind, IterationRecord, IterationResult, LoopHook, RalphTask,
};

const HISTORY_CAP: usize = 100;

/// Engine statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub total_tasks: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub total_iterations: u64,
    pub average_iterations: f64,
    pub adaptive: serde_json::Value,
}

type TaskSlot = Arc<Mutex<RalphTask>>;

/// Re-entrant autonomous loop engine.
///
/// Single-consumer FIFO: `submit_task` is non-blocking and preserves order;
/// the worker advances one task at a time to completion.
pub struct RalphEngine {
    config: RalphConfig,
    backend: Arc<dyn AgentBackend>,
    tasks: RwLock<HashMap<Uuid, TaskSlot>>,
    queue_tx: mpsc::UnboundedSender<Uuid>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<Uuid>>>,
    history: RwLock<HashMap<String, Vec<HistoryRecord>>>,
    hooks: RwLock<HashMap<HookKind, Vec<Arc<dyn LoopHook>>>>,
    events: Arc<EventLog>,
    shutdown: Notify,
}

impl RalphEngine {
    #[must_use]
    pub fn new(config: RalphConfig, backend: Arc<dyn AgentBackend>, events: Arc<EventLog>) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            config,
            backend,
            tasks: RwLock::new(HashMap::new()),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            history: RwLock::new(HashMap::new()),
            hooks: RwLock::new(HashMap::new()),
            events,
            shutdown: Notify::new(),
        }
    }

    /// Attach a hook.
    pub async fn add_hook(&self, kind: HookKind, hook: Arc<dyn LoopHook>) {
        self.hooks.write().await.entry(kind).or_default().push(hook);
    }

    /// Submit a task; returns immediately with the task id.
    ///
    /// `max_iterations`: -1 selects the adaptive budget, 0 the infinite mode,
    /// any positive value a fixed budget.
    #[instrument(skip(self, prompt, context))]
    pub async fn submit_task(
        &self,
        prompt: String,
        backend: String,
        max_iterations: i64,
        require_approval: bool,
        context: Option<serde_json::Value>,
    ) -> Result<Uuid> {
        if prompt.trim().is_empty() {
            return Err(Error::Validation("task prompt required".to_string()));
        }

        let (effective_max, mode) = match max_iterations {
            -1 => {
                let limit = {
                    let history = self.history.read().await;
                    let key = history_key(&prompt, &backend);
                    let records = history.get(&key).map(Vec::as_slice).unwrap_or(&[]);
                    calculate_adaptive_limit(&prompt, records, &self.config)
                };
                self.events.record(
                    "adaptive_limit_calculated",
                    json!({
                        "prompt_preview": prompt.chars().take(100).collect::<String>(),
                        "final_limit": limit,
                        "task_type": extract_task_type(&prompt),
                        "backend": backend,
                    }),
                );
                (limit, IterationMode::Adaptive)
            }
            0 => (0, IterationMode::Infinite),
            n => (
                u32::try_from(n).map_err(|_| {
                    Error::Validation("max_iterations must be -1, 0, or positive".to_string())
                })?,
                IterationMode::Fixed,
            ),
        };

        let task = RalphTask::new(
            prompt,
            backend.clone(),
            effective_max,
            mode,
            max_iterations,
            require_approval,
            context,
        );
        let task_id = task.task_id;

        self.events.record(
            "task_submitted",
            json!({
                "task_id": task_id,
                "backend": backend,
                "prompt_length": task.prompt.len(),
            }),
        );
        info!(%task_id, backend = %task.backend, max_iterations = effective_max, "task submitted");

        self.tasks
            .write()
            .await
            .insert(task_id, Arc::new(Mutex::new(task)));
        self.queue_tx
            .send(task_id)
            .map_err(|_| Error::Internal("task queue closed".to_string()))?;
        Ok(task_id)
    }

    /// Run the queue worker until shutdown. Call once.
    pub async fn run(&self) {
        let Some(mut queue_rx) = self.queue_rx.lock().await.take() else {
            warn!("ralph engine run() called twice");
            return;
        };
        info!("ralph loop engine started");

        loop {
            tokio::select! {
                () = self.shutdown.notified() => break,
                task_id = queue_rx.recv() => {
                    let Some(task_id) = task_id else { break };
                    let slot = self.tasks.read().await.get(&task_id).map(Arc::clone);
                    match slot {
                        Some(slot) => self.process_task(&slot).await,
                        None => warn!(%task_id, "queued task not found"),
                    }
                }
            }
        }
        info!("ralph loop engine stopped");
    }

    /// Request shutdown; the in-flight task completes its iteration.
    ///
    /// `notify_one` stores a permit, so a shutdown requested while the worker
    /// is mid-task is observed as soon as it returns to the queue.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    async fn run_hooks(&self, kind: HookKind, task: &RalphTask, result: &IterationResult) {
        let hooks = {
            let map = self.hooks.read().await;
            map.get(&kind).cloned().unwrap_or_default()
        };
        for hook in hooks {
            hook.execute(task, result).await;
        }
    }

    #[instrument(skip(self, slot))]
    async fn process_task(&self, slot: &TaskSlot) {
        let (task_id, max_iterations, require_approval, backend_name, prompt) = {
            let mut task = slot.lock().await;
            if task.status == TaskStatus::Stopped {
                return;
            }
            task.status = TaskStatus::Running;
            (
                task.task_id,
                task.max_iterations,
                task.require_approval,
                task.backend.clone(),
                task.prompt.clone(),
            )
        };
        info!(%task_id, max_iterations, "ralph loop started");

        let mut iteration = 0u32;
        loop {
            // Cooperative stop: no further iterations once flipped.
            if slot.lock().await.status == TaskStatus::Stopped {
                break;
            }

            iteration += 1;
            {
                let mut task = slot.lock().await;
                task.iteration = iteration;
                task.last_update = Utc::now();
            }

            if max_iterations > 0 && iteration > max_iterations {
                info!(%task_id, iteration, "iteration budget exhausted");
                let mut task = slot.lock().await;
                task.status = TaskStatus::Completed;
                task.completion_reason = Some(CompletionReason::MaxIterations);
                break;
            }

            if require_approval && iteration > 1 {
                self.wait_for_approval(slot).await;
                let approved = slot.lock().await.approved.unwrap_or(false);
                if !approved {
                    info!(%task_id, "task rejected at approval gate");
                    slot.lock().await.status = TaskStatus::Rejected;
                    break;
                }
            }

            let context = slot.lock().await.context.clone();
            match self
                .backend
                .execute(&backend_name, &prompt, &context, iteration)
                .await
            {
                Ok(result) => {
                    {
                        let mut task = slot.lock().await;
                        task.results.push(IterationRecord {
                            iteration,
                            timestamp: Utc::now(),
                            result: result.clone(),
                        });
                    }
                    self.events.record(
                        "iteration_completed",
                        json!({
                            "task_id": task_id,
                            "iteration": iteration,
                            "backend": backend_name,
                            "exit_code": result.exit_code,
                        }),
                    );

                    if result.exit_code == self.config.exit_code_block {
                        // Blocked exit: re-enter the loop verbatim.
                        info!(%task_id, iteration, "exit blocked, re-entering loop");
                        let snapshot = slot.lock().await.clone();
                        self.run_hooks(HookKind::Stop, &snapshot, &result).await;
                        if self.config.context_recovery {
                            self.run_hooks(HookKind::Recovery, &snapshot, &result).await;
                        }
                        continue;
                    }

                    if result.exit_code == 0 {
                        let complete = slot.lock().await.is_complete(&result);
                        if complete {
                            info!(%task_id, iteration, "task completed");
                            let mut task = slot.lock().await;
                            task.status = TaskStatus::Completed;
                            task.completion_reason = Some(CompletionReason::Success);
                            break;
                        }
                        continue;
                    }

                    warn!(%task_id, exit_code = result.exit_code, "iteration error, continuing");
                    let mut task = slot.lock().await;
                    task.context["last_error"] = json!(result
                        .error
                        .clone()
                        .unwrap_or_else(|| format!("Exit code {}", result.exit_code)));
                }
                Err(err) => {
                    // Even exceptions do not stop the loop; stash and retry.
                    warn!(%task_id, error = %err, "iteration exception, continuing");
                    let mut task = slot.lock().await;
                    task.error = Some(err.to_string());
                    task.context["last_exception"] = json!(err.to_string());
                }
            }
        }

        self.finish_task(slot, iteration).await;
    }

    async fn wait_for_approval(&self, slot: &TaskSlot) {
        {
            let mut task = slot.lock().await;
            task.awaiting_approval = true;
            task.approved = None;
            self.events
                .record("approval_requested", json!({"task_id": task.task_id}));
        }

        let started = tokio::time::Instant::now();
        loop {
            if !slot.lock().await.awaiting_approval {
                return;
            }
            if started.elapsed() >= self.config.approval_timeout {
                let mut task = slot.lock().await;
                warn!(task_id = %task.task_id, "approval timed out, rejecting");
                task.approved = Some(false);
                task.awaiting_approval = false;
                return;
            }
            tokio::time::sleep(self.config.approval_poll).await;
        }
    }

    async fn finish_task(&self, slot: &TaskSlot, total_iterations: u32) {
        let task = slot.lock().await.clone();

        // Record terminal state for adaptive learning.
        let key = history_key(&task.prompt, &task.backend);
        {
            let mut history = self.history.write().await;
            let records = history.entry(key).or_default();
            records.push(HistoryRecord {
                task_id: task.task_id,
                success: task.status == TaskStatus::Completed
                    && task.completion_reason == Some(CompletionReason::Success),
                iterations: task.iteration,
                timestamp: Utc::now(),
            });
            if records.len() > HISTORY_CAP {
                let overflow = records.len() - HISTORY_CAP;
                records.drain(..overflow);
            }
        }

        let last_output = task
            .results
            .last()
            .map(|r| r.result.output.clone())
            .unwrap_or_default();
        self.events.record(
            "task_completed",
            json!({
                "task_id": task.task_id,
                "status": task.status,
                "total_iterations": total_iterations,
                "iteration_mode": task.iteration_mode,
                "adaptive_limit_used": task.max_iterations,
                "task": {
                    "task_id": task.task_id,
                    "prompt": task.prompt,
                    "output": last_output,
                    "iteration": task.iteration,
                    "backend": task.backend,
                    "context": task.context,
                },
            }),
        );
    }

    /// Snapshot every known task, newest submissions last.
    pub async fn list_tasks(&self) -> Vec<RalphTask> {
        let slots: Vec<TaskSlot> = self.tasks.read().await.values().map(Arc::clone).collect();
        let mut tasks = Vec::with_capacity(slots.len());
        for slot in slots {
            tasks.push(slot.lock().await.clone());
        }
        tasks.sort_by_key(|t| t.started_at);
        tasks
    }

    /// Snapshot a task by id.
    pub async fn get_task(&self, task_id: Uuid) -> Option<RalphTask> {
        let slot = self.tasks.read().await.get(&task_id).map(Arc::clone)?;
        let task = slot.lock().await.clone();
        Some(task)
    }

    /// Cooperatively stop a queued or running task.
    pub async fn stop_task(&self, task_id: Uuid) -> bool {
        let Some(slot) = self.tasks.read().await.get(&task_id).map(Arc::clone) else {
            return false;
        };
        let mut task = slot.lock().await;
        if !task.status.is_active() {
            return false;
        }
        task.status = TaskStatus::Stopped;
        task.stopped_at = Some(Utc::now());
        info!(%task_id, "task stopped");
        true
    }

    /// Resolve an approval gate.
    pub async fn approve_task(&self, task_id: Uuid, approved: bool) -> bool {
        let Some(slot) = self.tasks.read().await.get(&task_id).map(Arc::clone) else {
            return false;
        };
        let mut task = slot.lock().await;
        if !task.awaiting_approval {
            return false;
        }
        task.approved = Some(approved);
        task.awaiting_approval = false;
        info!(%task_id, approved, "task approval resolved");
        true
    }

    /// Aggregate statistics including adaptive insight per task type.
    pub async fn stats(&self) -> EngineStats {
        let tasks = self.tasks.read().await;
        let mut total_iterations = 0u64;
        let mut running = 0usize;
        let mut completed = 0usize;
        let mut failed = 0usize;
        for slot in tasks.values() {
            let task = slot.lock().await;
            total_iterations += u64::from(task.iteration);
            match task.status {
                TaskStatus::Running => running += 1,
                TaskStatus::Completed => completed += 1,
                TaskStatus::Failed => failed += 1,
                _ => {}
            }
        }
        let total_tasks = tasks.len();
        drop(tasks);

        let history = self.history.read().await;
        let mut task_types = Vec::new();
        for (key, records) in history.iter() {
            let (task_type, backend) = key.split_once(':').unwrap_or((key.as_str(), "unknown"));
            let successful: Vec<&HistoryRecord> = records.iter().filter(|r| r.success).collect();
            let avg_iterations = if successful.is_empty() {
                0.0
            } else {
                successful.iter().map(|r| f64::from(r.iterations)).sum::<f64>()
                    / successful.len() as f64
            };
            task_types.push(json!({
                "task_type": task_type,
                "backend": backend,
                "total_tasks": records.len(),
                "successful": successful.len(),
                "success_rate": if records.is_empty() { 0.0 } else { successful.len() as f64 / records.len() as f64 },
                "avg_iterations": avg_iterations,
                "current_adjustment": history_adjustment(records),
            }));
        }
        let history_entries: usize = history.values().map(Vec::len).sum();
        drop(history);

        EngineStats {
            total_tasks,
            running,
            completed,
            failed,
            total_iterations,
            average_iterations: if total_tasks == 0 {
                0.0
            } else {
                total_iterations as f64 / total_tasks as f64
            },
            adaptive: json!({
                "enabled": self.config.adaptive_enabled,
                "history_entries": history_entries,
                "task_types": task_types,
            }),
        }
    }

    /// Count of tasks currently running.
    pub async fn active_task_count(&self) -> usize {
        let tasks = self.tasks.read().await;
        let mut count = 0;
        for slot in tasks.values() {
            if slot.lock().await.status == TaskStatus::Running {
                count += 1;
            }
        }
        count
    }
}

fn history_key(prompt: &str, backend: &str) -> String {
    format!("{}:{backend}", extract_task_type(prompt))
}

#[cfg(test)]
mod tests;
