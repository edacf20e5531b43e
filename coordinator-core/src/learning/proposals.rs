//! Optimization-proposal generation from telemetry batch insights.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

use crate::error::Result;
use crate::types::{Proposal, ProposalStatus, ProposalType};

/// Coarse task type from prompt text, for proposal targeting.
#[must_use]
pub fn proposal_task_type(prompt: &str) -> &'static str {
    let prompt_lower = prompt.to_lowercase();
    let matches = |keywords: &[&str]| keywords.iter().any(|k| prompt_lower.contains(k));
    if matches(&["deploy", "installation", "install"]) {
        "deployment"
    } else if matches(&["test", "validation", "verify", "health check"]) {
        "testing"
    } else if matches(&["debug", "error", "failed", "fix"]) {
        "debugging"
    } else if matches(&["config", "configuration", "nixos", "yaml"]) {
        "configuration"
    } else if matches(&["doc", "documentation", "readme"]) {
        "documentation"
    } else {
        "general"
    }
}

/// Best-effort extraction of a dependency name from error text.
#[must_use]
pub fn extract_dependency_name(error_text: &str) -> Option<String> {
    #[allow(clippy::unwrap_used)] // literal patterns, covered by tests
    fn patterns() -> &'static [regex::Regex] {
        static PATTERNS: std::sync::OnceLock<Vec<regex::Regex>> = std::sync::OnceLock::new();
        PATTERNS.get_or_init(|| {
            vec![
                regex::Regex::new(r#"(?i)host ['"]?([a-z0-9\-]+)['"]?"#).unwrap(),
                regex::Regex::new(r#"(?i)service "([a-z0-9\-]+)""#).unwrap(),
                regex::Regex::new(r"(?i)http://([a-z0-9\-]+):").unwrap(),
            ]
        })
    }
    for pattern in patterns() {
        if let Some(captures) = pattern.captures(error_text) {
            if let Some(name) = captures.get(1) {
                return Some(name.as_str().to_string());
            }
        }
    }
    None
}

/// A task that hit its iteration cap.
#[derive(Debug, Clone)]
pub struct LimitHit {
    pub task_id: String,
    pub prompt_preview: String,
    pub iterations: u64,
    pub adaptive_limit: u64,
    pub backend: String,
    pub task_type: &'static str,
}

/// Counters gathered while scanning one telemetry batch.
#[derive(Debug, Default)]
pub struct BatchInsights {
    pub high_iteration_tasks: Vec<Value>,
    pub limit_hits: Vec<LimitHit>,
    pub timeout_signals: u64,
    pub dependency_signals: HashMap<String, u64>,
    pub failure_signals: HashMap<String, u64>,
    pub success_characteristics: HashMap<String, u64>,
}

impl BatchInsights {
    /// Fold one `task_completed` event into the counters.
    pub fn update(&mut self, event: &Value) {
        if event["event"].as_str() != Some("task_completed") {
            return;
        }
        let task = &event["task"];
        let prompt = task["prompt"].as_str().unwrap_or_default();
        let total_iterations = event["total_iterations"].as_u64().unwrap_or(0);
        let adaptive_limit = event["adaptive_limit_used"].as_u64().unwrap_or(0);
        let backend = task["backend"].as_str().unwrap_or("unknown");
        let status = event["status"].as_str().unwrap_or("unknown");
        let task_type = proposal_task_type(prompt);
        let prompt_preview: String = prompt.chars().take(200).collect();

        if total_iterations >= 10 {
            self.high_iteration_tasks.push(json!({
                "task_id": event["task_id"],
                "prompt_preview": prompt_preview,
                "iterations": total_iterations,
                "adaptive_limit": adaptive_limit,
                "backend": backend,
                "task_type": task_type,
            }));
        }

        if adaptive_limit > 0 && total_iterations >= adaptive_limit {
            self.limit_hits.push(LimitHit {
                task_id: event["task_id"].as_str().unwrap_or("unknown").to_string(),
                prompt_preview: prompt.chars().take(200).collect(),
                iterations: total_iterations,
                adaptive_limit,
                backend: backend.to_string(),
                task_type,
            });
        }

        if status == "completed" && total_iterations <= 3 {
            for key in [
                task_type.to_string(),
                format!("backend:{backend}"),
                format!("prompt_len:{}", (prompt.len() / 50).min(10)),
            ] {
                *self.success_characteristics.entry(key).or_default() += 1;
            }
        }

        let last_error = task["context"]["last_error"]
            .as_str()
            .or_else(|| task["context"]["last_exception"].as_str());
        if let Some(error) = last_error {
            let error_lower = error.to_lowercase();
            if error_lower.contains("timeout") {
                self.timeout_signals += 1;
            }
            if ["connection refused", "name or service not known", "failed to resolve host"]
                .iter()
                .any(|t| error_lower.contains(t))
            {
                let dependency =
                    extract_dependency_name(error).unwrap_or_else(|| "unknown".to_string());
                *self.dependency_signals.entry(dependency).or_default() += 1;
            }
            for token in ["permission denied", "not found", "invalid"] {
                if error_lower.contains(token) {
                    *self.failure_signals.entry(token.to_string()).or_default() += 1;
                }
            }
        }
    }

    /// Build proposals from the gathered signals.
    #[must_use]
    pub fn build_proposals(&self) -> Vec<Proposal> {
        let mut proposals = Vec::new();
        let now = Utc::now();

        for hit in &self.limit_hits {
            proposals.push(Proposal {
                proposal_id: format!("proposal-{}", hit.task_id),
                proposal_type: ProposalType::IterationLimitIncrease,
                title: format!("Increase iteration limit for {} tasks", hit.task_type),
                rationale: format!(
                    "Task hit iteration cap ({}) after {} iterations.",
                    hit.adaptive_limit, hit.iterations
                ),
                recommended_action: format!(
                    "Increase {} iteration limit by 25% (current cap {}).",
                    hit.task_type, hit.adaptive_limit
                ),
                evidence: json!({
                    "task_id": hit.task_id,
                    "prompt_preview": hit.prompt_preview,
                    "iterations": hit.iterations,
                    "adaptive_limit": hit.adaptive_limit,
                    "backend": hit.backend,
                    "task_type": hit.task_type,
                }),
                status: ProposalStatus::Pending,
                approval_required: true,
                created_at: now,
                submitted_as_task: false,
            });
        }

        let mut dependencies: Vec<(&String, &u64)> = self.dependency_signals.iter().collect();
        dependencies.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (dependency, count) in dependencies {
            proposals.push(Proposal {
                proposal_id: format!("proposal-dependency-{dependency}"),
                proposal_type: ProposalType::DependencyCheckAddition,
                title: format!("Add dependency pre-flight check for {dependency}"),
                rationale: format!("Detected {count} connection errors referencing {dependency}."),
                recommended_action: format!(
                    "Add startup dependency check for {dependency} in the relevant service(s) before execution."
                ),
                evidence: json!({"dependency": dependency, "count": count}),
                status: ProposalStatus::Pending,
                approval_required: true,
                created_at: now,
                submitted_as_task: false,
            });
        }

        if self.timeout_signals > 0 {
            proposals.push(Proposal {
                proposal_id: "proposal-timeout-adjustment".to_string(),
                proposal_type: ProposalType::TimeoutAdjustment,
                title: "Increase timeout budget for long-running tasks".to_string(),
                rationale: format!(
                    "Observed {} timeout-related failures.",
                    self.timeout_signals
                ),
                recommended_action: "Increase task timeout budget by 20% for long-running tasks."
                    .to_string(),
                evidence: json!({"timeout_signals": self.timeout_signals}),
                status: ProposalStatus::Pending,
                approval_required: true,
                created_at: now,
                submitted_as_task: false,
            });
        }

        proposals
    }
}

/// On-disk proposal log with hash-based deduplication across restarts.
#[derive(Debug)]
pub struct ProposalLog {
    path: PathBuf,
    hashes: HashSet<String>,
}

impl ProposalLog {
    /// Open the log, loading existing hashes.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut hashes = HashSet::new();
        if let Ok(contents) = std::fs::read_to_string(&path) {
            for line in contents.lines() {
                if let Ok(record) = serde_json::from_str::<Value>(line) {
                    if let Some(hash) = record["proposal_hash"].as_str() {
                        hashes.insert(hash.to_string());
                    }
                }
            }
        }
        Self { path, hashes }
    }

    /// Whether an equivalent proposal was already persisted.
    #[must_use]
    pub fn contains(&self, proposal: &Proposal) -> bool {
        self.hashes.contains(&proposal.dedup_hash())
    }

    /// Persist a proposal; the hash becomes visible to later batches.
    pub fn record(&mut self, proposal: &Proposal) -> Result<()> {
        use std::io::Write;
        let hash = proposal.dedup_hash();
        let mut payload = serde_json::to_value(proposal)?;
        payload["proposal_hash"] = json!(hash);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(&payload)?)?;
        self.hashes.insert(hash);
        Ok(())
    }

    /// Keep only proposals unseen so far, recording them, up to `limit`.
    pub fn dedupe_and_record(&mut self, proposals: Vec<Proposal>, limit: usize) -> Vec<Proposal> {
        let mut unique = Vec::new();
        for proposal in proposals {
            if self.contains(&proposal) {
                continue;
            }
            if let Err(err) = self.record(&proposal) {
                warn!(proposal_id = %proposal.proposal_id, error = %err, "proposal record failed");
                continue;
            }
            unique.push(proposal);
            if unique.len() >= limit {
                break;
            }
        }
        unique
    }

    /// Number of persisted proposal hashes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit_hit_event() -> Value {
        json!({
            "event": "task_completed",
            "task_id": "t-9",
            "status": "completed",
            "total_iterations": 25,
            "adaptive_limit_used": 25,
            "task": {
                "task_id": "t-9",
                "prompt": "debug the failing deployment installation",
                "backend": "aider",
                "context": {"last_error": "timeout waiting for http://qdrant:6333"},
            },
        })
    }

    #[test]
    fn test_insights_capture_all_three_signals() {
        let mut insights = BatchInsights::default();
        insights.update(&limit_hit_event());

        assert_eq!(insights.limit_hits.len(), 1);
        assert_eq!(insights.timeout_signals, 1);
        assert_eq!(insights.dependency_signals.len(), 0); // timeout, not refused

        let refused = json!({
            "event": "task_completed",
            "task_id": "t-10",
            "status": "failed",
            "total_iterations": 4,
            "adaptive_limit_used": 10,
            "task": {
                "prompt": "fix it",
                "backend": "aider",
                "context": {"last_error": "connection refused by http://qdrant:6333"},
            },
        });
        insights.update(&refused);
        assert_eq!(insights.dependency_signals.get("qdrant"), Some(&1));

        let proposals = insights.build_proposals();
        let types: Vec<ProposalType> = proposals.iter().map(|p| p.proposal_type).collect();
        assert!(types.contains(&ProposalType::IterationLimitIncrease));
        assert!(types.contains(&ProposalType::DependencyCheckAddition));
        assert!(types.contains(&ProposalType::TimeoutAdjustment));
    }

    #[test]
    fn test_dependency_name_extraction() {
        assert_eq!(
            extract_dependency_name("connect to http://qdrant:6333 failed"),
            Some("qdrant".to_string())
        );
        assert_eq!(
            extract_dependency_name("cannot reach host 'redis-cache'"),
            Some("redis-cache".to_string())
        );
        assert_eq!(extract_dependency_name("plain failure"), None);
    }

    #[test]
    fn test_proposal_log_dedupes_across_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("optimization_proposals.jsonl");

        let mut insights = BatchInsights::default();
        insights.update(&limit_hit_event());
        let proposals = insights.build_proposals();

        let mut log = ProposalLog::open(&path);
        let first = log.dedupe_and_record(proposals.clone(), 5);
        assert_eq!(first.len(), proposals.len());

        // Same batch again: everything is a duplicate.
        let second = log.dedupe_and_record(proposals.clone(), 5);
        assert!(second.is_empty());

        // A fresh instance reloads hashes from disk.
        let mut reopened = ProposalLog::open(&path);
        assert!(!reopened.is_empty());
        let third = reopened.dedupe_and_record(proposals, 5);
        assert!(third.is_empty());
    }

    #[test]
    fn test_batch_limit_caps_recorded_proposals() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut log = ProposalLog::open(dir.path().join("p.jsonl"));

        let mut insights = BatchInsights::default();
        for n in 0..10 {
            insights.update(&json!({
                "event": "task_completed",
                "task_id": format!("t-{n}"),
                "status": "failed",
                "total_iterations": 4,
                "adaptive_limit_used": 10,
                "task": {
                    "prompt": "fix it",
                    "backend": "aider",
                    "context": {"last_error": format!("connection refused by http://svc{n}:80")},
                },
            }));
        }
        let proposals = insights.build_proposals();
        assert_eq!(proposals.len(), 10);
        let recorded = log.dedupe_and_record(proposals, 5);
        assert_eq!(recorded.len(), 5);
    }
}
