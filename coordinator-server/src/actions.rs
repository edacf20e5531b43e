//! Shared operations behind both the HTTP surface and the MCP dispatcher.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use coordinator_core::clients::PointRecord;
use coordinator_core::error::{Error, Result};
use coordinator_core::pipeline::{assemble, validate_query};
use coordinator_core::types::{AgentClass, Collection, DetailLevel, ExpansionStrategy, Outcome};

use crate::state::AppState;

/// Parameters accepted by the query/route operation.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct QueryParams {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub prefer_local: Option<bool>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub keyword_limit: Option<usize>,
    #[serde(default)]
    pub score_threshold: Option<f32>,
    #[serde(default)]
    pub generate_response: Option<bool>,
}

impl QueryParams {
    /// The query text, from either accepted field name.
    pub fn text(&self) -> Result<String> {
        self.prompt
            .clone()
            .or_else(|| self.query.clone())
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| Error::Validation("query required".to_string()))
    }
}

/// Full query routing: cache probe, model-loading gate, pipeline route,
/// interaction tracking, gap recording, cache fill.
pub async fn run_query(state: &Arc<AppState>, params: &QueryParams) -> Result<Value> {
    let query = params.text()?;
    validate_query(&query)?;

    let prefer_local = params.prefer_local.unwrap_or(true);
    let generate_response = params.generate_response.unwrap_or(false);
    let limit = params.limit.unwrap_or(5);
    let score_threshold = params.score_threshold.unwrap_or(0.7);

    // Cache probe. Embedding failures skip the cache rather than failing the
    // query.
    let query_embedding = match state.embeddings.embed_text(&query).await {
        Ok(embedding) => Some(embedding),
        Err(err) => {
            debug!(error = %err, "embedding unavailable, skipping cache probe");
            None
        }
    };
    if let Some(embedding) = &query_embedding {
        if let Some(hit) = state.cache.get(&query, embedding) {
            state
                .telemetry
                .counter("semantic_cache_hits_total", &[])
                .increment();
            let mut body = serde_json::to_value(&hit)?;
            body["interaction_id"] = Value::Null;
            body["answer"] = json!(hit.response);
            body["confidence"] = json!(1.0);
            return Ok(body);
        }
    }

    // Model-loading awareness: bounded wait when the caller wants the local
    // engine and it is still loading.
    if prefer_local {
        if let Some(llm) = &state.llm {
            if llm.health().await.map(|h| h.is_loading()).unwrap_or(false) {
                state.model_queue.wait_for_model(llm).await?;
            }
        }
    }

    let started = Instant::now();
    let outcome = state
        .pipeline
        .route(&query, prefer_local, generate_response, limit, score_threshold, 2_000)
        .await?;
    let latency_ms = started.elapsed().as_millis() as u64;

    let interaction_id = state
        .tracker
        .track_interaction(
            &query,
            outcome.answer.as_deref().unwrap_or_default(),
            AgentClass::Remote,
            &outcome.llm_used,
            outcome.context_ids.clone(),
            Outcome::Unknown,
            0,
            outcome.tokens_saved_estimate,
            latency_ms,
        )
        .await?;

    if outcome.confidence < state.config.routing.confidence_threshold {
        state.tracker.record_query_gap(
            &query,
            outcome.confidence,
            outcome
                .collections_searched
                .first()
                .map_or("unknown", String::as_str),
        );
    }

    if let (Some(answer), Some(embedding)) = (&outcome.answer, query_embedding) {
        if let Err(err) = state.cache.set(
            &query,
            embedding,
            answer,
            &outcome.llm_used,
            outcome.tokens_saved_estimate,
        ) {
            warn!(error = %err, "cache fill failed");
        }
    }

    let mut body = serde_json::to_value(&outcome)?;
    body["interaction_id"] = json!(interaction_id);
    Ok(body)
}

/// Augment a query with assembled local context, no generation.
pub async fn augment_query(state: &Arc<AppState>, query: &str) -> Result<Value> {
    validate_query(query)?;
    let ranked = state
        .pipeline
        .search_and_rerank(query, &Collection::ALL, 5, Some(0.7), 10)
        .await?;
    let confidence = ranked.first().map_or(0.0, |hit| hit.score.min(1.0));
    let assembled = assemble(&ranked, 2_000, DetailLevel::Concise);
    Ok(json!({
        "context": assembled.context,
        "context_ids": assembled.included_ids,
        "token_count": assembled.token_count,
        "confidence": confidence,
    }))
}

fn parse_collections(names: Option<&Vec<String>>) -> Result<Vec<Collection>> {
    match names {
        None => Ok(Collection::ALL.to_vec()),
        Some(names) => names
            .iter()
            .map(|name| {
                Collection::parse(name)
                    .ok_or_else(|| Error::Validation(format!("unknown collection {name}")))
            })
            .collect(),
    }
}

/// Multi-collection hybrid search returning raw hits.
pub async fn hybrid_search(
    state: &Arc<AppState>,
    query: &str,
    collections: Option<&Vec<String>>,
    limit: usize,
    score_threshold: Option<f32>,
) -> Result<Value> {
    let collections = parse_collections(collections)?;
    let hits = state
        .pipeline
        .hybrid_search(
            query,
            &collections,
            limit,
            score_threshold,
            ExpansionStrategy::Keyword,
        )
        .await?;
    Ok(json!({
        "count": hits.len(),
        "results": hits,
    }))
}

fn memory_collection(memory_type: &str) -> Collection {
    match memory_type {
        "episodic" => Collection::InteractionHistory,
        "procedural" => Collection::SkillsPatterns,
        _ => Collection::BestPractices,
    }
}

/// Store an agent memory record in the mapped collection.
pub async fn store_memory(
    state: &Arc<AppState>,
    memory_type: &str,
    summary: &str,
    content: Option<&str>,
    metadata: Option<Value>,
) -> Result<Value> {
    if summary.trim().is_empty() {
        return Err(Error::Validation("summary required".to_string()));
    }
    let collection = memory_collection(memory_type);
    let text = match content {
        Some(content) => format!("{summary}\n{content}"),
        None => summary.to_string(),
    };
    if text.len() > coordinator_core::types::MAX_CONTENT_SIZE {
        return Err(Error::Validation("memory content exceeds 1 MB".to_string()));
    }

    let id = Uuid::new_v4().to_string();
    let vector = state.embeddings.embed_text(&text).await?;
    state
        .vector
        .upsert(
            collection.name(),
            vec![PointRecord {
                id: id.clone(),
                vector,
                payload: json!({
                    "memory_type": memory_type,
                    "summary": summary,
                    "content": text,
                    "metadata": metadata.unwrap_or_else(|| json!({})),
                    "stored_at": chrono::Utc::now().timestamp(),
                    "access_count": 0,
                    "success_rate": 0.5,
                }),
            }],
        )
        .await?;
    Ok(json!({"status": "stored", "id": id, "collection": collection.name()}))
}

/// Recall agent memories by semantic search over the mapped collections.
pub async fn recall_memory(
    state: &Arc<AppState>,
    query: &str,
    memory_types: Option<&Vec<String>>,
    limit: usize,
) -> Result<Value> {
    validate_query(query)?;
    let collections: Vec<Collection> = match memory_types {
        Some(types) => {
            let mut collections: Vec<Collection> =
                types.iter().map(|t| memory_collection(t)).collect();
            collections.dedup();
            collections
        }
        None => vec![
            Collection::InteractionHistory,
            Collection::SkillsPatterns,
            Collection::BestPractices,
        ],
    };
    let hits = state
        .pipeline
        .hybrid_search(
            query,
            &collections,
            limit,
            Some(0.5),
            ExpansionStrategy::Keyword,
        )
        .await?;
    Ok(json!({
        "count": hits.len(),
        "memories": hits,
    }))
}

/// Evaluate retrieval + routing quality against expected keywords.
pub async fn run_harness_eval(
    state: &Arc<AppState>,
    query: &str,
    expected_keywords: &[String],
    max_latency_ms: Option<u64>,
) -> Result<Value> {
    validate_query(query)?;
    let started = Instant::now();
    let outcome = state.pipeline.route(query, true, true, 5, 0.7, 2_000).await?;
    let latency_ms = started.elapsed().as_millis() as u64;

    let haystack = format!(
        "{} {}",
        outcome.answer.clone().unwrap_or_default(),
        outcome.context
    )
    .to_lowercase();
    let found: Vec<&String> = expected_keywords
        .iter()
        .filter(|kw| haystack.contains(&kw.to_lowercase()))
        .collect();
    let keywords_ok = found.len() == expected_keywords.len();
    let latency_ok = max_latency_ms.is_none_or(|cap| latency_ms <= cap);
    let passed = keywords_ok && latency_ok;

    state.harness.record(passed, latency_ms);
    Ok(json!({
        "passed": passed,
        "latency_ms": latency_ms,
        "keywords_expected": expected_keywords.len(),
        "keywords_found": found.len(),
        "confidence": outcome.confidence,
        "llm_used": outcome.llm_used,
    }))
}
