//! # Query Pipeline
//!
//! Expansion → hybrid multi-collection search → rerank → context assembly →
//! confidence routing. The pipeline decides whether the local LLM can answer
//! or the query escalates with assembled context.

mod assembly;
mod expansion;
mod rerank;

pub use assembly::{assemble, estimate_tokens, format_hit, AssembledContext};
pub use expansion::QueryExpander;
pub use rerank::{hybrid_rerank, rerank_by_metadata, rerank_for_diversity, CrossEncoder, RankedHit};

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::clients::{ChatMessage, ChatModel, SearchHit, VectorStore};
use crate::embeddings::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::types::{
    Collection, DetailLevel, ExpansionStrategy, RoutingConfig, MAX_CONTENT_SIZE,
};

/// Outcome of routing one query through the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct RouteOutcome {
    /// Present when the local model generated an answer.
    pub answer: Option<String>,
    pub context: String,
    pub context_ids: Vec<String>,
    /// `local`, `remote`, or `context-only`.
    pub llm_used: String,
    pub confidence: f32,
    pub tokens_saved_estimate: u32,
    pub collections_searched: Vec<String>,
}

/// Patterns that must never reach the retrieval or generation path.
#[allow(clippy::unwrap_used)] // literal patterns, covered by tests
fn secret_patterns() -> &'static [regex::Regex] {
    static PATTERNS: std::sync::OnceLock<Vec<regex::Regex>> = std::sync::OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            regex::Regex::new(r"(?i)(api[_-]?key|password|secret|token)\s*[:=]\s*\S+").unwrap(),
            regex::Regex::new(r"-----BEGIN [A-Z ]*PRIVATE KEY-----").unwrap(),
            regex::Regex::new(r"\bAKIA[0-9A-Z]{16}\b").unwrap(),
            regex::Regex::new(r"\bsk-[A-Za-z0-9]{20,}\b").unwrap(),
        ]
    })
}

/// Validate a query at the pipeline boundary.
///
/// # Errors
///
/// Rejects empty queries, oversized content, binary content, and prompts
/// matching secret patterns.
pub fn validate_query(query: &str) -> Result<()> {
    if query.trim().is_empty() {
        return Err(Error::Validation("query required".to_string()));
    }
    if query.len() > MAX_CONTENT_SIZE {
        return Err(Error::Validation(format!(
            "query exceeds {MAX_CONTENT_SIZE} bytes"
        )));
    }
    if query.contains('\0') {
        return Err(Error::Validation("binary content rejected".to_string()));
    }
    if secret_patterns().iter().any(|p| p.is_match(query)) {
        return Err(Error::Validation(
            "query appears to contain secret material".to_string(),
        ));
    }
    Ok(())
}

/// The retrieval/routing pipeline.
pub struct QueryPipeline {
    vector: Arc<dyn VectorStore>,
    embeddings: Arc<dyn EmbeddingProvider>,
    chat: Option<Arc<dyn ChatModel>>,
    expander: QueryExpander,
    cross_encoder: Option<Arc<dyn CrossEncoder>>,
    routing: RoutingConfig,
}

impl QueryPipeline {
    #[must_use]
    pub fn new(
        vector: Arc<dyn VectorStore>,
        embeddings: Arc<dyn EmbeddingProvider>,
        chat: Option<Arc<dyn ChatModel>>,
        routing: RoutingConfig,
    ) -> Self {
        let expander = QueryExpander::new(chat.clone());
        Self {
            vector,
            embeddings,
            chat,
            expander,
            cross_encoder: None,
            routing,
        }
    }

    /// Plug in a cross-encoder reorder stage.
    #[must_use]
    pub fn with_cross_encoder(mut self, encoder: Arc<dyn CrossEncoder>) -> Self {
        self.cross_encoder = Some(encoder);
        self
    }

    /// Expand the query and search the selected collections, merging hits by
    /// id and keeping the maximum score per item.
    #[instrument(skip(self))]
    pub async fn hybrid_search(
        &self,
        query: &str,
        collections: &[Collection],
        limit_per_collection: usize,
        score_threshold: Option<f32>,
        strategy: ExpansionStrategy,
    ) -> Result<Vec<SearchHit>> {
        validate_query(query)?;

        let expansions = self.expander.expand(query, strategy, 3).await;
        let embeddings = self.embeddings.embed_batch(&expansions).await?;

        let mut merged: HashMap<String, SearchHit> = HashMap::new();
        for collection in collections {
            match self.vector.collection_size(collection.name()).await {
                Ok(0) => {
                    debug!(collection = collection.name(), "collection empty, skipping");
                    continue;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(collection = collection.name(), error = %err, "collection probe failed");
                    continue;
                }
            }

            for embedding in &embeddings {
                match self
                    .vector
                    .search(collection.name(), embedding, limit_per_collection, score_threshold)
                    .await
                {
                    Ok(hits) => {
                        for hit in hits {
                            merged
                                .entry(hit.id.clone())
                                .and_modify(|existing| {
                                    if hit.score > existing.score {
                                        existing.score = hit.score;
                                    }
                                })
                                .or_insert(hit);
                        }
                    }
                    Err(err) => {
                        warn!(collection = collection.name(), error = %err, "search failed");
                    }
                }
            }
        }

        let mut hits: Vec<SearchHit> = merged.into_values().collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(hits)
    }

    /// Hybrid search followed by the full rerank stack.
    pub async fn search_and_rerank(
        &self,
        query: &str,
        collections: &[Collection],
        limit_per_collection: usize,
        score_threshold: Option<f32>,
        top_k: usize,
    ) -> Result<Vec<RankedHit>> {
        let hits = self
            .hybrid_search(
                query,
                collections,
                limit_per_collection,
                score_threshold,
                ExpansionStrategy::Keyword,
            )
            .await?;
        Ok(hybrid_rerank(query, hits, top_k, self.cross_encoder.as_deref()).await)
    }

    /// Route a query: answer locally above the confidence threshold, else
    /// escalate with assembled context (or return context-only when
    /// escalation is disabled).
    #[instrument(skip(self))]
    pub async fn route(
        &self,
        query: &str,
        prefer_local: bool,
        generate_response: bool,
        limit: usize,
        score_threshold: f32,
        max_tokens: u32,
    ) -> Result<RouteOutcome> {
        let ranked = self
            .search_and_rerank(
                query,
                &Collection::ALL,
                limit,
                Some(score_threshold),
                limit.max(1),
            )
            .await?;

        let confidence = ranked.first().map_or(0.0, |hit| hit.score.min(1.0));
        let assembled = assemble(&ranked, max_tokens, DetailLevel::Full);
        let collections_searched = {
            let mut names: Vec<String> = ranked
                .iter()
                .map(|r| r.hit.collection.clone())
                .collect::<std::collections::HashSet<_>>()
                .into_iter()
                .collect();
            names.sort();
            names
        };

        let route_local = prefer_local && confidence >= self.routing.confidence_threshold;
        let (answer, llm_used) = if route_local {
            let answer = if generate_response {
                match &self.chat {
                    Some(chat) => Some(self.generate_answer(chat.as_ref(), query, &assembled.context).await?),
                    None => None,
                }
            } else {
                None
            };
            (answer, "local".to_string())
        } else if self.routing.escalation_enabled {
            (None, "remote".to_string())
        } else {
            (None, "context-only".to_string())
        };

        Ok(RouteOutcome {
            answer,
            tokens_saved_estimate: assembled.token_count,
            context: assembled.context,
            context_ids: assembled.included_ids,
            llm_used,
            confidence,
            collections_searched,
        })
    }

    async fn generate_answer(
        &self,
        chat: &dyn ChatModel,
        query: &str,
        context: &str,
    ) -> Result<String> {
        let messages = [
            ChatMessage::system(
                "Answer using the provided context. Be precise; say so when the context does not cover the question.",
            ),
            ChatMessage::user(format!("Context:\n{context}\n\nQuestion: {query}")),
        ];
        chat.chat(&messages, 0.2, 1_024).await
    }
}

#[cfg(test)]
mod tests;
