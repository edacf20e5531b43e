//! # Multi-turn Session Manager
//!
//! Stateful wrapper around the query pipeline for progressive context
//! disclosure across turns. Context already sent to a session is never sent
//! again; session state lives in the KV cache under a TTL refreshed on every
//! access.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::clients::{ChatModel, SessionStore};
use crate::error::Result;
use crate::pipeline::{assemble, validate_query, QueryPipeline};
use crate::types::{Collection, ContextLevel, DetailLevel, SessionConfig, SessionState};

/// Search breadth and render depth for one disclosure level.
#[derive(Debug, Clone)]
pub struct LevelConfig {
    pub collections: Vec<Collection>,
    pub limit_per_collection: usize,
    pub detail: DetailLevel,
}

/// Disclosure table: standard 2x3 concise, detailed 3x5 full, comprehensive
/// 5x10 verbose.
#[must_use]
pub fn level_config(level: ContextLevel) -> LevelConfig {
    match level {
        ContextLevel::Standard => LevelConfig {
            collections: vec![Collection::ErrorSolutions, Collection::BestPractices],
            limit_per_collection: 3,
            detail: DetailLevel::Concise,
        },
        ContextLevel::Detailed => LevelConfig {
            collections: vec![
                Collection::ErrorSolutions,
                Collection::BestPractices,
                Collection::CodebaseContext,
            ],
            limit_per_collection: 5,
            detail: DetailLevel::Full,
        },
        ContextLevel::Comprehensive => LevelConfig {
            collections: Collection::ALL.to_vec(),
            limit_per_collection: 10,
            detail: DetailLevel::Verbose,
        },
    }
}

/// Response for one session turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnResponse {
    pub context: String,
    pub context_ids: Vec<String>,
    pub suggestions: Vec<String>,
    pub token_count: u32,
    pub collections_searched: Vec<String>,
    pub session_id: String,
    pub turn_number: u32,
}

/// Manages multi-turn context requests.
pub struct MultiTurnSessionManager {
    pipeline: Arc<QueryPipeline>,
    store: Arc<dyn SessionStore>,
    chat: Option<Arc<dyn ChatModel>>,
    config: SessionConfig,
}

impl MultiTurnSessionManager {
    #[must_use]
    pub fn new(
        pipeline: Arc<QueryPipeline>,
        store: Arc<dyn SessionStore>,
        chat: Option<Arc<dyn ChatModel>>,
        config: SessionConfig,
    ) -> Self {
        Self {
            pipeline,
            store,
            chat,
            config,
        }
    }

    /// Serve one turn: search at the requested level, drop context already
    /// sent this session, fit the budget, and persist the updated state.
    #[instrument(skip(self, query, metadata))]
    pub async fn get_context(
        &self,
        session_id: &str,
        query: &str,
        level: ContextLevel,
        previous_context_ids: &[String],
        max_tokens: Option<u32>,
        metadata: Option<Value>,
    ) -> Result<TurnResponse> {
        validate_query(query)?;
        let max_tokens = max_tokens.unwrap_or(self.config.default_max_tokens);

        let mut session = match self.store.load(session_id).await? {
            Some(session) => session,
            None => SessionState::new(session_id.to_string(), metadata.unwrap_or(json!({}))),
        };
        session.queries.push(query.to_string());
        session.turn_count += 1;
        session.last_accessed = chrono::Utc::now();

        let level_cfg = level_config(level);
        info!(
            turn = session.turn_count,
            collections = level_cfg.collections.len(),
            "serving session turn"
        );

        let mut ranked = self
            .pipeline
            .search_and_rerank(
                query,
                &level_cfg.collections,
                level_cfg.limit_per_collection,
                Some(0.7),
                level_cfg.collections.len() * level_cfg.limit_per_collection,
            )
            .await?;

        // Cross-turn dedupe: anything this session has already seen, plus
        // anything the caller reports having, is dropped.
        ranked.retain(|candidate| {
            !session.context_item_ids_sent.contains(&candidate.hit.id)
                && !previous_context_ids.contains(&candidate.hit.id)
        });

        let assembled = assemble(&ranked, max_tokens, level_cfg.detail);

        let suggestions = if session.turn_count > 1 {
            self.generate_suggestions(query, &assembled.context, &session)
                .await
        } else {
            Vec::new()
        };

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

        session
            .context_item_ids_sent
            .extend(assembled.included_ids.iter().cloned());
        session.total_tokens_sent += assembled.token_count;
        self.store.save(&session, self.config.ttl).await?;

        Ok(TurnResponse {
            context: assembled.context,
            context_ids: assembled.included_ids,
            suggestions,
            token_count: assembled.token_count,
            collections_searched,
            session_id: session_id.to_string(),
            turn_number: session.turn_count,
        })
    }

    /// Prompt the local model for 2-3 follow-up queries.
    async fn generate_suggestions(
        &self,
        query: &str,
        context: &str,
        session: &SessionState,
    ) -> Vec<String> {
        let Some(chat) = &self.chat else {
            return Vec::new();
        };

        let context_preview: String = context.chars().take(500).collect();
        let recent_queries = session
            .queries
            .iter()
            .rev()
            .take(3)
            .rev()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        let prompt = format!(
            "Based on this conversation, suggest 2-3 specific follow-up queries that would provide helpful additional information.\n\n\
             Original Query: {query}\n\n\
             Context Provided:\n{context_preview}...\n\n\
             Previous Queries in Session:\n{recent_queries}\n\n\
             Generate 2-3 specific, actionable follow-up queries (one per line):"
        );

        match chat.complete(&prompt, 150, 0.7, &["\n\n", "Query:"]).await {
            Ok(text) => text
                .lines()
                .map(|line| {
                    line.trim()
                        .trim_start_matches(|c: char| {
                            c.is_ascii_digit() || c == '.' || c == '-' || c == '•' || c == ' '
                        })
                        .to_string()
                })
                .filter(|line| line.len() > 10)
                .take(3)
                .collect(),
            Err(err) => {
                warn!(error = %err, "suggestion generation failed");
                Vec::new()
            }
        }
    }

    /// Session details for monitoring; `None` when unknown or expired.
    pub async fn session_info(&self, session_id: &str) -> Result<Option<Value>> {
        let Some(session) = self.store.load(session_id).await? else {
            return Ok(None);
        };
        Ok(Some(json!({
            "session_id": session.session_id,
            "created_at": session.created_at,
            "last_accessed": session.last_accessed,
            "turn_count": session.turn_count,
            "total_queries": session.queries.len(),
            "total_context_items_sent": session.context_item_ids_sent.len(),
            "total_tokens_sent": session.total_tokens_sent,
            "queries": session.queries,
            "metadata": session.metadata,
        })))
    }

    /// End a session. Clearing an unknown session is a no-op.
    pub async fn clear_session(&self, session_id: &str) -> Result<()> {
        self.store.delete(session_id).await?;
        info!(session_id, "session cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests;
