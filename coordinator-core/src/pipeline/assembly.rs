//! Context assembly: format hits per detail level and fit a token budget.

use serde_json::Value;

use crate::types::{DetailLevel, TOKENS_PER_WORD};

use super::rerank::RankedHit;

/// Assembled context block.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub context: String,
    pub included_ids: Vec<String>,
    pub token_count: u32,
}

/// Rough token estimate: ~1.3 tokens per whitespace-separated word.
#[must_use]
pub fn estimate_tokens(text: &str) -> u32 {
    (text.split_whitespace().count() as f32 * TOKENS_PER_WORD) as u32
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn format_concise(payload: &Value, collection: &str) -> String {
    match collection {
        "error-solutions" => format!(
            "• {}: {}",
            payload["error_pattern"].as_str().unwrap_or("Unknown error"),
            truncate_chars(payload["solution"].as_str().unwrap_or("No solution"), 100)
        ),
        "best-practices" => format!(
            "• {}: {}",
            payload["practice_name"].as_str().unwrap_or("Unknown practice"),
            truncate_chars(payload["description"].as_str().unwrap_or(""), 100)
        ),
        "codebase-context" => format!(
            "• {}: {}",
            payload["file_path"].as_str().unwrap_or("Unknown file"),
            truncate_chars(payload["content"].as_str().unwrap_or(""), 100)
        ),
        _ => format!("• {}", truncate_chars(&payload.to_string(), 100)),
    }
}

fn format_full(payload: &Value, collection: &str) -> String {
    match collection {
        "error-solutions" => format!(
            "**Error:** {}\n**Context:** {}\n**Solution:** {}\n**Source:** {}\n**Confidence:** {:.2}",
            payload["error_pattern"].as_str().unwrap_or("Unknown"),
            payload["context"].as_str().unwrap_or("No context"),
            payload["solution"].as_str().unwrap_or("No solution"),
            payload["source"].as_str().unwrap_or("Unknown"),
            payload["confidence_score"].as_f64().unwrap_or(0.0)
        ),
        "best-practices" => format!(
            "**Practice:** {}\n**Category:** {}\n**Description:** {}\n**Implementation:** {}",
            payload["practice_name"].as_str().unwrap_or("Unknown"),
            payload["category"].as_str().unwrap_or("General"),
            payload["description"].as_str().unwrap_or(""),
            truncate_chars(payload["implementation"].as_str().unwrap_or("Not specified"), 200)
        ),
        "codebase-context" => format!(
            "**File:** {}\n**Type:** {}\n**Content:**\n{}",
            payload["file_path"].as_str().unwrap_or("Unknown"),
            payload["file_type"].as_str().unwrap_or("unknown"),
            truncate_chars(payload["content"].as_str().unwrap_or(""), 500)
        ),
        _ => truncate_chars(
            &serde_json::to_string_pretty(payload).unwrap_or_default(),
            500,
        ),
    }
}

fn format_verbose(payload: &Value) -> String {
    serde_json::to_string_pretty(payload).unwrap_or_default()
}

/// Render one hit at the requested detail level.
#[must_use]
pub fn format_hit(payload: &Value, collection: &str, detail: DetailLevel) -> String {
    match detail {
        DetailLevel::Concise => format_concise(payload, collection),
        DetailLevel::Full => format_full(payload, collection),
        DetailLevel::Verbose => format_verbose(payload),
    }
}

/// Assemble ranked hits into a context block within a token budget.
///
/// Hits are consumed in rank order; the first hit that would overflow the
/// budget stops assembly.
#[must_use]
pub fn assemble(hits: &[RankedHit], max_tokens: u32, detail: DetailLevel) -> AssembledContext {
    let mut parts = Vec::new();
    let mut included_ids = Vec::new();
    let mut token_count = 0u32;

    for ranked in hits {
        let formatted = format_hit(&ranked.hit.payload, &ranked.hit.collection, detail);
        let tokens = estimate_tokens(&formatted);
        if token_count + tokens > max_tokens {
            break;
        }
        parts.push(formatted);
        included_ids.push(ranked.hit.id.clone());
        token_count += tokens;
    }

    let context = if parts.is_empty() {
        "No relevant context found in local knowledge base.".to_string()
    } else {
        parts.join("\n\n")
    };

    AssembledContext {
        context,
        included_ids,
        token_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::SearchHit;
    use serde_json::json;

    fn ranked(id: &str, collection: &str, payload: Value) -> RankedHit {
        RankedHit {
            hit: SearchHit {
                id: id.to_string(),
                score: 0.9,
                payload,
                collection: collection.to_string(),
            },
            score: 0.9,
            original_score: 0.9,
            boost: 1.0,
        }
    }

    #[test]
    fn test_concise_format_per_collection() {
        let error = format_hit(
            &json!({"error_pattern": "keyring prompt", "solution": "enable the service"}),
            "error-solutions",
            DetailLevel::Concise,
        );
        assert_eq!(error, "• keyring prompt: enable the service");

        let practice = format_hit(
            &json!({"practice_name": "pin inputs", "description": "lock flake inputs"}),
            "best-practices",
            DetailLevel::Concise,
        );
        assert!(practice.starts_with("• pin inputs"));
    }

    #[test]
    fn test_full_format_includes_confidence() {
        let formatted = format_hit(
            &json!({
                "error_pattern": "keyring prompt",
                "solution": "enable the service",
                "confidence_score": 0.92,
            }),
            "error-solutions",
            DetailLevel::Full,
        );
        assert!(formatted.contains("**Confidence:** 0.92"));
    }

    #[test]
    fn test_budget_truncation_preserves_rank_order() {
        let hits = vec![
            ranked("a", "error-solutions", json!({"error_pattern": "one", "solution": "short"})),
            ranked("b", "error-solutions", json!({"error_pattern": "two", "solution": "short"})),
            ranked(
                "c",
                "error-solutions",
                json!({"error_pattern": "three", "solution": "word ".repeat(400)}),
            ),
        ];
        let assembled = assemble(&hits, 30, DetailLevel::Concise);
        assert_eq!(assembled.included_ids, vec!["a", "b"]);
        assert!(assembled.token_count <= 30);
    }

    #[test]
    fn test_empty_results_yield_placeholder() {
        let assembled = assemble(&[], 100, DetailLevel::Concise);
        assert!(assembled.context.contains("No relevant context"));
        assert!(assembled.included_ids.is_empty());
        assert_eq!(assembled.token_count, 0);
    }
}
