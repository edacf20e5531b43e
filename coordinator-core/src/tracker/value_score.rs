//! Five-factor interaction value scoring.
//!
//! The score combines outcome, user feedback, reusability, complexity, and a
//! novelty placeholder into a bounded [0, 1] signal. A successful,
//! thumbs-up interaction whose response carries at least three enumerated
//! steps and a code block always lands at 0.85 or above, which is what gates
//! promotion into the pattern catalog.

use crate::types::{Outcome, NOVELTY_PLACEHOLDER};

const SUCCESS_BONUS: f32 = 0.45;
const PARTIAL_BONUS: f32 = 0.25;
const FEEDBACK_POSITIVE_BONUS: f32 = 0.25;
const FEEDBACK_NEUTRAL_BONUS: f32 = 0.12;
const REUSABILITY_WEIGHT: f32 = 0.10;
const COMPLEXITY_WEIGHT: f32 = 0.15;
const NOVELTY_WEIGHT: f32 = 0.05;

/// Query wordings that tend to recur.
const REUSABLE_KEYWORDS: [&str; 5] = ["how to", "best practice", "configure", "setup", "install"];

/// Score an interaction's value in [0, 1].
///
/// Monotone in (outcome, user feedback, reusability, complexity).
#[must_use]
pub fn compute_value_score(
    outcome: Outcome,
    user_feedback: i8,
    query: &str,
    response: &str,
) -> f32 {
    let mut score = 0.0;
    score += match outcome {
        Outcome::Success => SUCCESS_BONUS,
        Outcome::Partial => PARTIAL_BONUS,
        Outcome::Failure | Outcome::Unknown => 0.0,
    };
    score += match user_feedback {
        1.. => FEEDBACK_POSITIVE_BONUS,
        0 => FEEDBACK_NEUTRAL_BONUS,
        _ => 0.0,
    };
    score += REUSABILITY_WEIGHT * estimate_reusability(query);
    score += COMPLEXITY_WEIGHT * estimate_complexity(response);
    score += NOVELTY_WEIGHT * NOVELTY_PLACEHOLDER;
    score.clamp(0.0, 1.0)
}

/// Estimate how likely this query pattern will recur.
#[must_use]
pub fn estimate_reusability(query: &str) -> f32 {
    let query_lower = query.to_lowercase();
    let keyword_count = REUSABLE_KEYWORDS
        .iter()
        .filter(|kw| query_lower.contains(*kw))
        .count();
    (keyword_count as f32 * 0.25).min(1.0)
}

/// Estimate response structural complexity.
///
/// Three or more enumerated steps together with a code block saturate the
/// heuristic at 1.0.
#[must_use]
pub fn estimate_complexity(response: &str) -> f32 {
    let steps = count_enumerated_steps(response);
    let step_score = (steps as f32).min(5.0) * 0.2;
    let code_score = if response.contains("```") { 0.4 } else { 0.0 };
    let length_score = (response.len() as f32 / 2_000.0).min(1.0) * 0.2;
    (step_score + code_score + length_score).min(1.0)
}

fn count_enumerated_steps(response: &str) -> usize {
    ["1.", "2.", "3.", "4.", "5."]
        .iter()
        .filter(|marker| response.contains(*marker))
        .count()
}
