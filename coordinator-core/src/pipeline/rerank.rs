//! Result reranking: metadata boosts, MMR diversity, optional cross-encoder.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::clients::SearchHit;
use crate::embeddings::similarity::jaccard_text_similarity;
use crate::types::MMR_DIVERSITY_WEIGHT;

const VERIFIED_BOOST: f32 = 1.5;
const HIGH_SUCCESS_BOOST: f32 = 1.3;
const HOT_RECENT_BOOST: f32 = 1.25;
const RECENT_BOOST: f32 = 1.2;
const HAS_EXAMPLES_BOOST: f32 = 1.15;

const HOT_RECENT_DAYS: i64 = 7;
const RECENT_DAYS: i64 = 90;

/// A hit carrying its boosted score next to the raw retrieval score.
#[derive(Debug, Clone)]
pub struct RankedHit {
    pub hit: SearchHit,
    pub score: f32,
    pub original_score: f32,
    pub boost: f32,
}

/// Optional cross-encoder reorder hook with graceful fallback.
///
/// The model identity is not part of the contract; implementations plug in
/// through this trait and failures fall back to the boosted order.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// Reorder hits by cross-encoded relevance to the query.
    async fn rerank(&self, query: &str, hits: Vec<RankedHit>) -> Vec<RankedHit>;
}

/// Parse a timestamp payload value: unix seconds or RFC 3339.
fn to_unix(value: &Value) -> Option<i64> {
    if let Some(ts) = value.as_i64() {
        return Some(ts);
    }
    if let Some(ts) = value.as_f64() {
        return Some(ts as i64);
    }
    value
        .as_str()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp())
}

fn days_since(value: &Value) -> Option<i64> {
    let ts = to_unix(value)?;
    Some((Utc::now().timestamp() - ts) / 86_400)
}

fn payload_text(payload: &Value) -> &str {
    payload["content"]
        .as_str()
        .or_else(|| payload["solution"].as_str())
        .unwrap_or("")
}

/// Apply metadata quality boosts to raw retrieval scores.
#[must_use]
pub fn rerank_by_metadata(hits: Vec<SearchHit>) -> Vec<RankedHit> {
    let mut ranked: Vec<RankedHit> = hits
        .into_iter()
        .map(|hit| {
            let payload = &hit.payload;
            let mut boost = 1.0_f32;

            if payload["solution_verified"].as_bool() == Some(true)
                || payload["verified"].as_bool() == Some(true)
            {
                boost *= VERIFIED_BOOST;
            }
            if payload["success_rate"].as_f64().unwrap_or(0.0) >= 0.8 {
                boost *= HIGH_SUCCESS_BOOST;
            }
            if days_since(&payload["last_accessed"])
                .or_else(|| days_since(&payload["last_used"]))
                .is_some_and(|days| days <= HOT_RECENT_DAYS)
            {
                boost *= HOT_RECENT_BOOST;
            }
            if days_since(&payload["last_used"])
                .or_else(|| days_since(&payload["last_updated"]))
                .is_some_and(|days| days <= RECENT_DAYS)
            {
                boost *= RECENT_BOOST;
            }
            if payload_text(payload).contains("```") {
                boost *= HAS_EXAMPLES_BOOST;
            }

            let original_score = hit.score;
            RankedHit {
                score: original_score * boost,
                original_score,
                boost,
                hit,
            }
        })
        .collect();

    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    ranked
}

/// MMR diversity reranking over the boosted results.
///
/// Balances relevance against redundancy: each next pick maximizes
/// `(1 - lambda) * relevance + lambda * diversity`, with diversity measured
/// as one minus the maximum text similarity to anything already selected.
#[must_use]
pub fn rerank_for_diversity(ranked: Vec<RankedHit>, top_k: usize) -> Vec<RankedHit> {
    if ranked.len() <= top_k {
        return ranked;
    }

    let mut remaining = ranked;
    let mut selected = vec![remaining.remove(0)];

    while selected.len() < top_k && !remaining.is_empty() {
        let mut best_idx = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (i, candidate) in remaining.iter().enumerate() {
            let candidate_text = payload_text(&candidate.hit.payload);
            let max_similarity = selected
                .iter()
                .map(|s| jaccard_text_similarity(candidate_text, payload_text(&s.hit.payload)))
                .fold(0.0_f32, f32::max);
            let diversity = 1.0 - max_similarity;
            let mmr =
                (1.0 - MMR_DIVERSITY_WEIGHT) * candidate.score + MMR_DIVERSITY_WEIGHT * diversity;
            if mmr > best_score {
                best_score = mmr;
                best_idx = i;
            }
        }
        selected.push(remaining.remove(best_idx));
    }
    selected
}

/// Combined metadata + diversity rerank with the optional cross-encoder pass.
pub async fn hybrid_rerank(
    query: &str,
    hits: Vec<SearchHit>,
    top_k: usize,
    cross_encoder: Option<&dyn CrossEncoder>,
) -> Vec<RankedHit> {
    let boosted = rerank_by_metadata(hits);
    let diverse = rerank_for_diversity(boosted, top_k);
    match cross_encoder {
        Some(encoder) => {
            let mut reordered = encoder.rerank(query, diverse).await;
            reordered.truncate(top_k);
            reordered
        }
        None => diverse,
    }
}
