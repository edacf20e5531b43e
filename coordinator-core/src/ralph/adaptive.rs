//! Adaptive iteration budgets from prompt complexity and task history.

use serde::Serialize;

use crate::types::RalphConfig;

use super::types::HistoryRecord;

/// Prompt complexity bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
    VeryComplex,
}

impl Complexity {
    /// Base iteration budget for the bucket.
    #[must_use]
    pub fn base_limit(self) -> u32 {
        match self {
            Complexity::Simple => 3,
            Complexity::Moderate => 10,
            Complexity::Complex => 25,
            Complexity::VeryComplex => 50,
        }
    }
}

const SIMPLE_KEYWORDS: [&str; 5] = ["fix typo", "add comment", "rename", "update version", "format"];
const MODERATE_KEYWORDS: [&str; 6] = ["add function", "implement", "create", "update", "modify", "test"];
const COMPLEX_KEYWORDS: [&str; 6] = [
    "refactor",
    "redesign",
    "migrate",
    "optimize",
    "architecture",
    "integration",
];
const VERY_COMPLEX_KEYWORDS: [&str; 5] = [
    "rewrite",
    "overhaul",
    "security audit",
    "performance tuning",
    "distributed",
];

/// Task-type labels used as the history key.
const TASK_TYPES: [&str; 11] = [
    "refactor", "implement", "fix", "test", "add", "update", "remove", "optimize", "migrate",
    "document", "review",
];

fn keyword_score(prompt_lower: &str, keywords: &[&str]) -> u32 {
    keywords.iter().filter(|kw| prompt_lower.contains(*kw)).count() as u32
}

/// Bucket a prompt by keyword scoring plus a length bias.
///
/// Keyword evidence decides the bucket; length only biases it. A prompt with
/// no recognized keywords defaults to moderate unless its sheer size says
/// otherwise. Ties break toward the more complex bucket.
#[must_use]
pub fn analyze_prompt_complexity(prompt: &str) -> Complexity {
    let prompt_lower = prompt.to_lowercase();
    let mut scores = [
        (Complexity::Simple, keyword_score(&prompt_lower, &SIMPLE_KEYWORDS)),
        (
            Complexity::Moderate,
            keyword_score(&prompt_lower, &MODERATE_KEYWORDS),
        ),
        (
            Complexity::Complex,
            keyword_score(&prompt_lower, &COMPLEX_KEYWORDS),
        ),
        (
            Complexity::VeryComplex,
            keyword_score(&prompt_lower, &VERY_COMPLEX_KEYWORDS),
        ),
    ];
    let keyword_hits: u32 = scores.iter().map(|(_, s)| *s).sum();
    let word_count = prompt.split_whitespace().count();

    if keyword_hits == 0 {
        return if word_count > 500 {
            Complexity::VeryComplex
        } else if word_count > 200 {
            Complexity::Complex
        } else {
            Complexity::Moderate
        };
    }

    if word_count > 500 {
        scores[3].1 += 2;
    } else if word_count > 200 {
        scores[2].1 += 1;
    } else if word_count < 50 {
        scores[0].1 += 1;
    }

    // Ascending order + last-max-wins breaks ties toward complexity.
    scores
        .iter()
        .max_by_key(|(_, score)| *score)
        .map_or(Complexity::Moderate, |(bucket, _)| *bucket)
}

/// Extract the normalized task type used for history tracking.
#[must_use]
pub fn extract_task_type(prompt: &str) -> &'static str {
    let prompt_lower = prompt.to_lowercase();
    TASK_TYPES
        .into_iter()
        .find(|t| prompt_lower.contains(t))
        .unwrap_or("general")
}

/// History multiplier over the last 10 records for a `(task_type, backend)`.
///
/// Fewer than three records is neutral (exactly 1.0). High success with few
/// iterations tightens the budget; low success loosens it.
#[must_use]
pub fn history_adjustment(records: &[HistoryRecord]) -> f64 {
    if records.len() < 3 {
        return 1.0;
    }
    let recent: Vec<&HistoryRecord> = records.iter().rev().take(10).rev().collect();
    let successful: Vec<&&HistoryRecord> = recent.iter().filter(|r| r.success).collect();
    if successful.is_empty() {
        return 1.5;
    }

    let avg_iterations = successful
        .iter()
        .map(|r| f64::from(r.iterations))
        .sum::<f64>()
        / successful.len() as f64;
    let success_rate = successful.len() as f64 / recent.len() as f64;

    if success_rate > 0.8 && avg_iterations < 5.0 {
        0.8
    } else if success_rate > 0.6 {
        1.0
    } else if success_rate > 0.4 {
        1.2
    } else {
        1.5
    }
}

/// Compute the adaptive iteration budget, clamped into
/// `[min_iterations, max_iterations_cap]`.
#[must_use]
pub fn calculate_adaptive_limit(
    prompt: &str,
    history: &[HistoryRecord],
    config: &RalphConfig,
) -> u32 {
    if !config.adaptive_enabled {
        return config.default_iterations;
    }
    let complexity = analyze_prompt_complexity(prompt);
    let base = complexity.base_limit();
    let adjustment = history_adjustment(history);
    let adjusted = (f64::from(base) * adjustment) as u32;
    adjusted.clamp(config.min_iterations, config.max_iterations_cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(success: bool, iterations: u32) -> HistoryRecord {
        HistoryRecord {
            task_id: Uuid::new_v4(),
            success,
            iterations,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_complexity_buckets() {
        assert_eq!(
            analyze_prompt_complexity("fix typo in the README"),
            Complexity::Simple
        );
        assert_eq!(
            analyze_prompt_complexity(
                "implement a parser for the configuration format and test the error paths \
                 against the existing fixtures so behavior stays covered end to end"
            ),
            Complexity::Moderate
        );
        assert_eq!(
            analyze_prompt_complexity("Refactor the authentication module"),
            Complexity::Complex
        );
        assert_eq!(
            analyze_prompt_complexity("rewrite the scheduler as a distributed system"),
            Complexity::VeryComplex
        );
    }

    #[test]
    fn test_short_prompt_without_keywords_stays_moderate() {
        assert_eq!(analyze_prompt_complexity("make it work"), Complexity::Moderate);
    }

    #[test]
    fn test_task_type_extraction() {
        assert_eq!(extract_task_type("Refactor the authentication module"), "refactor");
        assert_eq!(extract_task_type("please fix the keyring"), "fix");
        assert_eq!(extract_task_type("do something else"), "general");
    }

    #[test]
    fn test_history_factor_neutral_below_three_records() {
        assert!((history_adjustment(&[]) - 1.0).abs() < f64::EPSILON);
        assert!((history_adjustment(&[record(false, 9), record(false, 9)]) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_history_factor_bands() {
        // All failures: 1.5.
        let failing: Vec<HistoryRecord> = (0..5).map(|_| record(false, 10)).collect();
        assert!((history_adjustment(&failing) - 1.5).abs() < f64::EPSILON);

        // Efficient successes: 0.8.
        let efficient: Vec<HistoryRecord> = (0..5).map(|_| record(true, 4)).collect();
        assert!((history_adjustment(&efficient) - 0.8).abs() < f64::EPSILON);

        // Mixed (3/5 success): 1.0.
        let mixed = vec![
            record(true, 4),
            record(true, 4),
            record(true, 4),
            record(false, 10),
            record(false, 10),
        ];
        assert!((history_adjustment(&mixed) - 1.0).abs() < f64::EPSILON);

        // Struggling (1/2 success over 4+): 1.2.
        let struggling = vec![
            record(true, 8),
            record(false, 10),
            record(true, 7),
            record(false, 10),
        ];
        assert!((history_adjustment(&struggling) - 1.2).abs() < f64::EPSILON);
    }

    #[test]
    fn test_adaptive_limit_scenario() {
        let config = RalphConfig::default();

        // No history: complex prompt gets its base of 25.
        let limit = calculate_adaptive_limit("Refactor the authentication module", &[], &config);
        assert_eq!(limit, 25);

        // Five efficient successes: factor 0.8 gives 20.
        let history: Vec<HistoryRecord> = (0..5).map(|_| record(true, 4)).collect();
        let limit =
            calculate_adaptive_limit("Refactor the authentication module", &history, &config);
        assert_eq!(limit, 20);
    }

    #[test]
    fn test_adaptive_limit_clamps_to_bounds() {
        let config = RalphConfig {
            min_iterations: 30,
            max_iterations_cap: 40,
            ..RalphConfig::default()
        };
        assert_eq!(calculate_adaptive_limit("fix typo", &[], &config), 30);

        let config = RalphConfig {
            max_iterations_cap: 20,
            ..RalphConfig::default()
        };
        assert_eq!(
            calculate_adaptive_limit("rewrite the distributed overhaul", &[], &config),
            20
        );
    }

    proptest::proptest! {
        #[test]
        fn prop_adaptive_limit_always_in_bounds(prompt in ".{0,300}", n in 0usize..30) {
            let config = RalphConfig::default();
            let history: Vec<HistoryRecord> =
                (0..n).map(|i| record(i % 2 == 0, (i % 12) as u32)).collect();
            let limit = calculate_adaptive_limit(&prompt, &history, &config);
            proptest::prop_assert!(limit >= config.min_iterations);
            proptest::prop_assert!(limit <= config.max_iterations_cap);
        }
    }
}
