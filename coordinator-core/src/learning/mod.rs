//! # Continuous-Learning Pipeline
//!
//! Background loop that tails telemetry streams, extracts and deduplicates
//! interaction patterns, indexes them for retrieval, appends fine-tuning
//! examples, and generates optimization proposals. Checkpointed for crash
//! recovery; paused under telemetry backpressure; survives any single
//! failure by logging and backing off.

mod checkpoint;
mod ingest;
mod issues;
mod patterns;
mod proposals;

pub use checkpoint::{Checkpoint, Checkpointer, CHECKPOINT_SCHEMA_VERSION};
pub use ingest::read_new_events;
pub use issues::IssueLog;
pub use patterns::{
    extract_pattern_from_event, finetuning_example, quality_filter, DedupStats, Deduper,
    InteractionPattern,
};
pub use proposals::{extract_dependency_name, BatchInsights, LimitHit, ProposalLog};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{Mutex, Notify};
use tracing::{error, info, instrument, warn};

use crate::clients::{PointRecord, VectorStore};
use crate::embeddings::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::ralph::RalphEngine;
use crate::types::{Collection, LearningConfig, Proposal};

/// Where approved proposals are re-submitted for execution.
#[async_trait]
pub trait ProposalSink: Send + Sync {
    /// Submit one proposal as an approval-gated task.
    async fn submit(&self, proposal: &Proposal) -> Result<()>;
}

/// Backend used when proposals are submitted as Ralph tasks.
const PROPOSAL_BACKEND: &str = "aider";

#[async_trait]
impl ProposalSink for RalphEngine {
    async fn submit(&self, proposal: &Proposal) -> Result<()> {
        let prompt = format!(
            "Optimization Proposal (requires approval)\n\
             Type: {}\n\
             Title: {}\n\
             Rationale: {}\n\
             Recommended Action: {}\n\
             If approved, apply the change and report back.",
            proposal.proposal_type.as_str(),
            proposal.title,
            proposal.rationale,
            proposal.recommended_action
        );
        self.submit_task(
            prompt,
            PROPOSAL_BACKEND.to_string(),
            1,
            true,
            Some(json!({
                "proposal_id": proposal.proposal_id,
                "proposal_type": proposal.proposal_type,
                "evidence": proposal.evidence,
            })),
        )
        .await?;
        Ok(())
    }
}

/// Backpressure reading before a processing cycle.
#[derive(Debug, Clone, Serialize)]
pub struct BackpressureStatus {
    pub unprocessed_mb: f64,
    pub paused: bool,
    pub file_sizes: HashMap<String, u64>,
}

/// Outcome of one processed batch.
#[derive(Debug, Clone, Serialize, Default)]
pub struct BatchReport {
    pub patterns_extracted: usize,
    pub examples_written: usize,
    pub proposals_generated: usize,
}

struct PipelineState {
    last_positions: HashMap<String, u64>,
    processed_count: u64,
    deduper: Deduper,
    patterns_by_type: HashMap<String, u64>,
    total_patterns: u64,
    proposals_total: u64,
    last_batch_proposals: usize,
    last_insights: Value,
    proposal_log: ProposalLog,
}

/// The learning pipeline.
pub struct LearningPipeline {
    config: LearningConfig,
    vector: Arc<dyn VectorStore>,
    embeddings: Arc<dyn EmbeddingProvider>,
    sink: Option<Arc<dyn ProposalSink>>,
    checkpointer: Checkpointer,
    state: Mutex<PipelineState>,
    issues: IssueLog,
    paused: AtomicBool,
    shutdown: Notify,
    stopping: AtomicBool,
}

impl LearningPipeline {
    /// Create a pipeline, resuming from the last checkpoint when present.
    #[must_use]
    pub fn new(
        config: LearningConfig,
        vector: Arc<dyn VectorStore>,
        embeddings: Arc<dyn EmbeddingProvider>,
        sink: Option<Arc<dyn ProposalSink>>,
    ) -> Self {
        let checkpointer = Checkpointer::new(&config.checkpoint_dir);
        let checkpoint = checkpointer.load();
        let proposal_log = ProposalLog::open(&config.proposals_path);

        Self {
            state: Mutex::new(PipelineState {
                last_positions: checkpoint.last_positions,
                processed_count: checkpoint.processed_count,
                deduper: Deduper::new(),
                patterns_by_type: HashMap::new(),
                total_patterns: 0,
                proposals_total: proposal_log.len() as u64,
                last_batch_proposals: 0,
                last_insights: json!({}),
                proposal_log,
            }),
            config,
            vector,
            embeddings,
            sink,
            checkpointer,
            issues: IssueLog::new(),
            paused: AtomicBool::new(false),
            shutdown: Notify::new(),
            stopping: AtomicBool::new(false),
        }
    }

    /// Distinct issues observed in telemetry, most frequent first.
    #[must_use]
    pub fn issues(&self) -> Vec<crate::types::Issue> {
        self.issues.list()
    }

    /// Sum unprocessed telemetry and decide whether to pause.
    pub async fn check_backpressure(&self) -> BackpressureStatus {
        let positions = self.state.lock().await.last_positions.clone();
        let mut file_sizes = HashMap::new();
        let mut total_unprocessed = 0u64;
        for path in &self.config.telemetry_paths {
            let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            file_sizes.insert(
                path.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                size,
            );
            let offset = positions
                .get(&path.to_string_lossy().to_string())
                .copied()
                .unwrap_or(0);
            total_unprocessed += size.saturating_sub(offset);
        }

        let unprocessed_mb = total_unprocessed as f64 / (1024.0 * 1024.0);
        BackpressureStatus {
            unprocessed_mb: (unprocessed_mb * 100.0).round() / 100.0,
            paused: unprocessed_mb > self.config.backpressure_threshold_mb as f64,
            file_sizes,
        }
    }

    /// Process all new telemetry: extract patterns, index, export, propose.
    #[instrument(skip(self))]
    pub async fn process_batch(&self) -> Result<BatchReport> {
        let mut state = self.state.lock().await;
        let mut insights = BatchInsights::default();
        let mut raw_patterns = Vec::new();
        let mut events_since_checkpoint = 0u64;

        for path in &self.config.telemetry_paths {
            let key = path.to_string_lossy().to_string();
            let offset = state.last_positions.get(&key).copied().unwrap_or(0);
            let path_clone = path.clone();

            let (events, new_offset) =
                tokio::task::spawn_blocking(move || read_new_events(&path_clone, offset))
                    .await
                    .map_err(|e| Error::Internal(format!("ingest task: {e}")))??;

            for event in &events {
                insights.update(event);
                if let Some(error) = event["task"]["context"]["last_error"]
                    .as_str()
                    .or_else(|| event["task"]["context"]["last_exception"].as_str())
                {
                    self.issues.record(
                        "medium",
                        "task_failure",
                        event["task"]["backend"].as_str().unwrap_or("unknown"),
                        error,
                    );
                }
                if let Some(pattern) = extract_pattern_from_event(event) {
                    raw_patterns.push(pattern);
                }
                state.processed_count += 1;
                events_since_checkpoint += 1;
                if events_since_checkpoint % self.config.checkpoint_interval == 0 {
                    self.save_checkpoint(&state)?;
                }
            }
            state.last_positions.insert(key, new_offset);
        }

        // Quality gate, then content-hash dedup.
        let quality = quality_filter(raw_patterns);
        let mut unique = Vec::new();
        for pattern in quality {
            if !state.deduper.is_duplicate(&pattern) {
                unique.push(pattern);
            }
        }

        let examples_written = if unique.is_empty() {
            0
        } else {
            self.index_patterns(&unique).await;
            self.append_finetuning_examples(&unique).await?
        };

        for pattern in &unique {
            *state
                .patterns_by_type
                .entry(pattern.interaction_type.clone())
                .or_default() += 1;
        }
        state.total_patterns += unique.len() as u64;

        let proposals = if self.config.proposals_enabled {
            let generated = insights.build_proposals();
            let recorded = state
                .proposal_log
                .dedupe_and_record(generated, self.config.proposal_batch_limit);
            state.proposals_total += recorded.len() as u64;
            state.last_batch_proposals = recorded.len();
            recorded
        } else {
            Vec::new()
        };

        state.last_insights = json!({
            "high_iteration_tasks": insights.high_iteration_tasks.len(),
            "limit_hits": insights.limit_hits.len(),
            "timeout_signals": insights.timeout_signals,
            "dependency_signals": insights.dependency_signals,
            "success_characteristics": insights.success_characteristics,
        });

        self.save_checkpoint(&state)?;
        let report = BatchReport {
            patterns_extracted: unique.len(),
            examples_written,
            proposals_generated: proposals.len(),
        };
        drop(state);

        if self.config.proposal_submission_enabled {
            if let Some(sink) = &self.sink {
                for proposal in &proposals {
                    if let Err(err) = sink.submit(proposal).await {
                        warn!(proposal_id = %proposal.proposal_id, error = %err, "proposal submission failed");
                    }
                }
            }
        }

        self.write_stats_snapshot().await;
        info!(
            patterns = report.patterns_extracted,
            proposals = report.proposals_generated,
            "batch processing complete"
        );
        Ok(report)
    }

    fn save_checkpoint(&self, state: &PipelineState) -> Result<()> {
        self.checkpointer.save(&Checkpoint {
            last_positions: state.last_positions.clone(),
            processed_count: state.processed_count,
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            timestamp: None,
        })
    }

    /// Embed and upsert patterns into the pattern catalog. Write failures
    /// are logged and never abort the batch.
    async fn index_patterns(&self, patterns: &[InteractionPattern]) {
        let texts: Vec<String> = patterns
            .iter()
            .map(|p| format!("{} {}", p.prompt, p.response))
            .collect();
        let embeddings = match self.embeddings.embed_batch(&texts).await {
            Ok(embeddings) => embeddings,
            Err(err) => {
                warn!(count = patterns.len(), error = %err, "pattern embeddings unavailable");
                return;
            }
        };

        let points: Vec<PointRecord> = patterns
            .iter()
            .zip(embeddings)
            .map(|(pattern, vector)| PointRecord {
                id: pattern.pattern_id.clone(),
                vector,
                payload: json!({
                    "pattern_id": pattern.pattern_id,
                    "interaction_type": pattern.interaction_type,
                    "prompt": pattern.prompt.chars().take(500).collect::<String>(),
                    "response": pattern.response.chars().take(500).collect::<String>(),
                    "backend": pattern.backend,
                    "iterations": pattern.iterations,
                    "timestamp": pattern.timestamp.to_rfc3339(),
                }),
            })
            .collect();

        if let Err(err) = self
            .vector
            .upsert(Collection::SkillsPatterns.name(), points)
            .await
        {
            error!(error = %err, "pattern indexing failed");
        } else {
            info!(count = patterns.len(), "patterns indexed");
        }
    }

    async fn append_finetuning_examples(
        &self,
        patterns: &[InteractionPattern],
    ) -> Result<usize> {
        let lines: Vec<String> = patterns
            .iter()
            .map(|p| serde_json::to_string(&finetuning_example(p)))
            .collect::<std::result::Result<_, _>>()?;
        let path = self.config.dataset_path.clone();
        let count = lines.len();

        tokio::task::spawn_blocking(move || -> Result<()> {
            use std::io::Write;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            for line in lines {
                writeln!(file, "{line}")?;
            }
            Ok(())
        })
        .await
        .map_err(|e| Error::Internal(format!("dataset task: {e}")))??;
        Ok(count)
    }

    /// Run as a supervised background loop until shutdown.
    ///
    /// Backpressure pauses processing; any error is logged and retried after
    /// a backoff. The loop never exits on a single failure.
    pub async fn run(&self) {
        info!("continuous learning pipeline started");
        loop {
            if self.stopping.load(Ordering::Acquire) {
                break;
            }

            let backpressure = self.check_backpressure().await;
            if backpressure.paused {
                if !self.paused.swap(true, Ordering::AcqRel) {
                    warn!(
                        unprocessed_mb = backpressure.unprocessed_mb,
                        threshold_mb = self.config.backpressure_threshold_mb,
                        "learning paused for backpressure"
                    );
                }
                if self.sleep_cancellable(self.config.error_backoff).await {
                    break;
                }
                continue;
            }
            if self.paused.swap(false, Ordering::AcqRel) {
                info!(
                    unprocessed_mb = backpressure.unprocessed_mb,
                    "learning resumed"
                );
            }

            let delay = match self.process_batch().await {
                Ok(_) => self.config.process_interval,
                Err(err) => {
                    error!(error = %err, "learning loop error");
                    self.config.error_backoff
                }
            };
            if self.sleep_cancellable(delay).await {
                break;
            }
        }
        info!("continuous learning pipeline stopped");
    }

    /// Returns true when shutdown was requested during the sleep.
    async fn sleep_cancellable(&self, delay: Duration) -> bool {
        tokio::select! {
            () = self.shutdown.notified() => true,
            () = tokio::time::sleep(delay) => self.stopping.load(Ordering::Acquire),
        }
    }

    /// Request shutdown; the current cycle finishes first.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
        self.shutdown.notify_one();
    }

    /// Whether processing is currently paused for backpressure.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Pipeline statistics snapshot.
    pub async fn stats(&self) -> Value {
        let backpressure = self.check_backpressure().await;
        let state = self.state.lock().await;
        let dedup = state.deduper.stats();

        let dataset_size = std::fs::read_to_string(&self.config.dataset_path)
            .map(|c| c.lines().count())
            .unwrap_or(0);

        json!({
            "total_patterns_learned": state.total_patterns,
            "patterns_by_type": state.patterns_by_type,
            "finetuning_dataset_size": dataset_size,
            "processed_events": state.processed_count,
            "optimization_proposals": {
                "total": state.proposals_total,
                "last_batch_count": state.last_batch_proposals,
            },
            "batch_insights": state.last_insights,
            "issues": {
                "distinct": self.issues.len(),
            },
            "backpressure": backpressure,
            "backpressure_threshold_mb": self.config.backpressure_threshold_mb,
            "learning_paused": self.is_paused(),
            "deduplication": {
                "total_patterns_seen": dedup.total_patterns,
                "duplicates_found": dedup.duplicates_found,
                "unique_patterns": dedup.unique_patterns,
                "deduplication_rate": (dedup.rate_pct() * 100.0).round() / 100.0,
            },
        })
    }

    /// Write the stats snapshot file atomically for API consumption.
    async fn write_stats_snapshot(&self) {
        let stats = self.stats().await;
        let path = self.config.stats_path.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let temp = path.with_extension("tmp");
            std::fs::write(&temp, serde_json::to_string(&stats)?)?;
            std::fs::rename(&temp, &path)?;
            Ok(())
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "stats snapshot failed"),
            Err(err) => warn!(error = %err, "stats snapshot task failed"),
        }
    }

    /// Export the dataset in validated fine-tuning format.
    pub async fn export_dataset(&self, output: Option<PathBuf>) -> Result<(PathBuf, usize)> {
        let input = self.config.dataset_path.clone();
        let output = output.unwrap_or_else(|| {
            input
                .parent()
                .map(|p| p.join("dataset_export.jsonl"))
                .unwrap_or_else(|| PathBuf::from("dataset_export.jsonl"))
        });
        let output_clone = output.clone();

        let valid_count = tokio::task::spawn_blocking(move || -> Result<usize> {
            use std::io::Write;
            if let Some(parent) = output_clone.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let contents = std::fs::read_to_string(&input).unwrap_or_default();
            let mut out = std::fs::File::create(&output_clone)?;
            let mut valid = 0usize;
            for line in contents.lines() {
                let Ok(example) = serde_json::from_str::<Value>(line) else {
                    continue;
                };
                if example["messages"]
                    .as_array()
                    .is_some_and(|m| m.len() >= 2)
                {
                    writeln!(out, "{line}")?;
                    valid += 1;
                }
            }
            Ok(valid)
        })
        .await
        .map_err(|e| Error::Internal(format!("export task: {e}")))??;

        info!(valid_examples = valid_count, output = %output.display(), "dataset exported");
        Ok((output, valid_count))
    }
}

#[cfg(test)]
mod tests;
