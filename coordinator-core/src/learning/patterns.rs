//! Pattern materialization, quality filtering, and deduplication.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Maximum iterations for a completion to count as an efficient pattern.
const EFFICIENT_ITERATIONS: u32 = 5;

/// A learning pattern materialized from telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionPattern {
    pub pattern_id: String,
    /// Normalized type: `task_completion` or `error_resolution`.
    pub interaction_type: String,
    pub prompt: String,
    pub response: String,
    pub context: Value,
    pub success_metrics: HashMap<String, f64>,
    pub iterations: u32,
    pub timestamp: DateTime<Utc>,
    pub backend: String,
}

/// Materialize a pattern from one telemetry event, when it qualifies.
///
/// Efficient `task_completed` events (few iterations) and `error_resolution`
/// events carry learnable signal; everything else is ignored.
#[must_use]
pub fn extract_pattern_from_event(event: &Value) -> Option<InteractionPattern> {
    let timestamp = event["timestamp"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map_or_else(Utc::now, |dt| dt.with_timezone(&Utc));

    match event["event"].as_str() {
        Some("task_completed") => {
            let task = &event["task"];
            let iterations = task["iteration"].as_u64().unwrap_or(0) as u32;
            if iterations > EFFICIENT_ITERATIONS {
                return None;
            }
            let mut success_metrics = HashMap::new();
            success_metrics.insert("iterations".to_string(), f64::from(iterations));
            success_metrics.insert(
                "efficiency".to_string(),
                1.0 / f64::from(iterations.max(1)),
            );
            Some(InteractionPattern {
                pattern_id: format!(
                    "task_{}",
                    task["task_id"].as_str().unwrap_or("unknown")
                ),
                interaction_type: "task_completion".to_string(),
                prompt: task["prompt"].as_str().unwrap_or_default().to_string(),
                response: task["output"].as_str().unwrap_or_default().to_string(),
                context: task["context"].clone(),
                success_metrics,
                iterations,
                timestamp,
                backend: task["backend"].as_str().unwrap_or("unknown").to_string(),
            })
        }
        Some("error_resolution") => {
            let mut success_metrics = HashMap::new();
            success_metrics.insert(
                "resolution_time".to_string(),
                event["resolution_time"].as_f64().unwrap_or(0.0),
            );
            Some(InteractionPattern {
                pattern_id: format!(
                    "error_{}",
                    event["error_id"].as_str().unwrap_or("unknown")
                ),
                interaction_type: "error_resolution".to_string(),
                prompt: event["error_description"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                response: event["solution"].as_str().unwrap_or_default().to_string(),
                context: event["context"].clone(),
                success_metrics,
                iterations: 1,
                timestamp,
                backend: "unknown".to_string(),
            })
        }
        _ => None,
    }
}

/// Keep only patterns with meaningful prompt/response content.
#[must_use]
pub fn quality_filter(patterns: Vec<InteractionPattern>) -> Vec<InteractionPattern> {
    patterns
        .into_iter()
        .filter(|p| {
            p.prompt.len() > 20
                && p.response.len() > 10
                && p.iterations <= EFFICIENT_ITERATIONS
                && p.prompt != p.response
        })
        .collect()
}

/// Dedup counters: `(total, duplicates, unique)`.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DedupStats {
    pub total_patterns: u64,
    pub duplicates_found: u64,
    pub unique_patterns: u64,
}

impl DedupStats {
    /// Percentage of seen patterns that were duplicates.
    #[must_use]
    pub fn rate_pct(&self) -> f64 {
        if self.total_patterns == 0 {
            0.0
        } else {
            self.duplicates_found as f64 / self.total_patterns as f64 * 100.0
        }
    }
}

/// SHA-256 content-hash deduplication over normalized prompt + response.
#[derive(Debug, Default)]
pub struct Deduper {
    seen: HashSet<String>,
    stats: DedupStats,
}

impl Deduper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn content_hash(pattern: &InteractionPattern) -> String {
        let content = format!("{}\n{}", pattern.prompt.trim(), pattern.response.trim());
        let digest = Sha256::digest(content.to_lowercase().trim().as_bytes());
        format!("{digest:x}")
    }

    /// Record one pattern, returning true when it was seen before.
    pub fn is_duplicate(&mut self, pattern: &InteractionPattern) -> bool {
        self.stats.total_patterns += 1;
        let hash = Self::content_hash(pattern);
        if self.seen.contains(&hash) {
            self.stats.duplicates_found += 1;
            true
        } else {
            self.seen.insert(hash);
            self.stats.unique_patterns += 1;
            false
        }
    }

    #[must_use]
    pub fn stats(&self) -> DedupStats {
        self.stats
    }
}

/// Render one pattern in fine-tuning chat format.
#[must_use]
pub fn finetuning_example(pattern: &InteractionPattern) -> Value {
    let messages = match pattern.interaction_type.as_str() {
        "task_completion" => json!([
            {
                "role": "system",
                "content": "You are a helpful AI coding assistant. Provide clear, efficient solutions."
            },
            {"role": "user", "content": pattern.prompt},
            {"role": "assistant", "content": pattern.response},
        ]),
        "error_resolution" => json!([
            {
                "role": "system",
                "content": "You are an expert at debugging and fixing errors. Provide clear explanations and solutions."
            },
            {"role": "user", "content": format!("Error: {}\nHow do I fix this?", pattern.prompt)},
            {"role": "assistant", "content": pattern.response},
        ]),
        _ => json!([
            {"role": "user", "content": pattern.prompt},
            {"role": "assistant", "content": pattern.response},
        ]),
    };
    json!({
        "messages": messages,
        "metadata": {
            "pattern_id": pattern.pattern_id,
            "interaction_type": pattern.interaction_type,
            "backend": pattern.backend,
            "iterations": pattern.iterations,
            "timestamp": pattern.timestamp.to_rfc3339(),
            "success_metrics": pattern.success_metrics,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed_event(iterations: u64) -> Value {
        json!({
            "event": "task_completed",
            "timestamp": "2026-07-01T10:00:00Z",
            "task": {
                "task_id": "t-1",
                "prompt": "fix the keyring prompt appearing at login",
                "output": "enabled gnome-keyring via module option",
                "iteration": iterations,
                "backend": "aider",
                "context": {},
            },
        })
    }

    #[test]
    fn test_efficient_completion_becomes_pattern() {
        let pattern = extract_pattern_from_event(&completed_event(3)).expect("pattern");
        assert_eq!(pattern.interaction_type, "task_completion");
        assert_eq!(pattern.iterations, 3);
        assert_eq!(pattern.backend, "aider");
        assert!((pattern.success_metrics["efficiency"] - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_high_iteration_completion_is_ignored() {
        assert!(extract_pattern_from_event(&completed_event(9)).is_none());
    }

    #[test]
    fn test_error_resolution_becomes_pattern() {
        let event = json!({
            "event": "error_resolution",
            "error_id": "e-7",
            "error_description": "qdrant connection refused during startup sequence",
            "solution": "add a dependency pre-flight check",
            "resolution_time": 12.5,
        });
        let pattern = extract_pattern_from_event(&event).expect("pattern");
        assert_eq!(pattern.interaction_type, "error_resolution");
        assert_eq!(pattern.iterations, 1);
    }

    #[test]
    fn test_unrelated_events_are_ignored() {
        assert!(extract_pattern_from_event(&json!({"event": "task_submitted"})).is_none());
    }

    #[test]
    fn test_quality_filter_drops_thin_patterns() {
        let good = extract_pattern_from_event(&completed_event(2)).expect("pattern");
        let mut short_prompt = good.clone();
        short_prompt.prompt = "short".to_string();
        let mut echo = good.clone();
        echo.response.clone_from(&echo.prompt);

        let kept = quality_filter(vec![good, short_prompt, echo]);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_dedup_counts_and_normalizes() {
        let a = extract_pattern_from_event(&completed_event(2)).expect("pattern");
        let mut b = a.clone();
        b.pattern_id = "task_other".to_string();
        b.prompt = a.prompt.to_uppercase();

        let mut deduper = Deduper::new();
        assert!(!deduper.is_duplicate(&a));
        // Same content modulo case: duplicate.
        assert!(deduper.is_duplicate(&b));

        let stats = deduper.stats();
        assert_eq!(stats.total_patterns, 2);
        assert_eq!(stats.duplicates_found, 1);
        assert_eq!(stats.unique_patterns, 1);
        assert!((stats.rate_pct() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_finetuning_formats_by_type() {
        let task = extract_pattern_from_event(&completed_event(2)).expect("pattern");
        let example = finetuning_example(&task);
        assert_eq!(example["messages"][0]["role"], "system");
        assert_eq!(example["messages"][1]["content"], task.prompt);

        let mut error = task.clone();
        error.interaction_type = "error_resolution".to_string();
        let example = finetuning_example(&error);
        let user = example["messages"][1]["content"].as_str().expect("content");
        assert!(user.starts_with("Error: "));
    }
}
