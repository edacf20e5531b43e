//! # Interaction Tracker
//!
//! Records every query/response exchange, scores its value on outcome and
//! feedback updates, maintains context-item success rates, promotes
//! high-value interactions to the pattern catalog, and exports fine-tuning
//! data.

mod patterns;
mod value_score;

pub use patterns::PatternExtractor;
pub use value_score::{compute_value_score, estimate_complexity, estimate_reusability};

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::clients::{ChatModel, PointRecord, VectorStore};
use crate::embeddings::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::telemetry::EventLog;
use crate::types::{
    AgentClass, Collection, FeedbackRecord, Interaction, Outcome, QueryGap,
    HIGH_VALUE_THRESHOLD, MAX_FEEDBACK_NOTE_LEN, MAX_FEEDBACK_QUERY_LEN,
};

/// Collections whose items receive usage-metric updates on feedback.
const METRIC_COLLECTIONS: [Collection; 4] = [
    Collection::CodebaseContext,
    Collection::SkillsPatterns,
    Collection::ErrorSolutions,
    Collection::BestPractices,
];

/// Aggregate rating stats for one feedback tag (A/B variants).
#[derive(Debug, Clone, serde::Serialize)]
pub struct VariantStats {
    pub tag: String,
    pub total: u64,
    pub rated: u64,
    pub avg_rating: Option<f64>,
}

/// Tracks interactions and drives the learning feedback loop.
pub struct InteractionTracker {
    vector: Arc<dyn VectorStore>,
    embeddings: Arc<dyn EmbeddingProvider>,
    extractor: PatternExtractor,
    events: Arc<EventLog>,
    feedback_path: PathBuf,
    gaps_path: PathBuf,
    dataset_path: PathBuf,
    pattern_extraction_enabled: bool,
}

impl InteractionTracker {
    #[must_use]
    pub fn new(
        vector: Arc<dyn VectorStore>,
        embeddings: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatModel>,
        events: Arc<EventLog>,
        data_root: &std::path::Path,
    ) -> Self {
        let extractor = PatternExtractor::new(
            chat,
            Arc::clone(&embeddings),
            Arc::clone(&vector),
        );
        Self {
            vector,
            embeddings,
            extractor,
            events,
            feedback_path: data_root.join("feedback").join("learning_feedback.jsonl"),
            gaps_path: data_root.join("feedback").join("query_gaps.jsonl"),
            dataset_path: data_root.join("fine-tuning").join("dataset.jsonl"),
            pattern_extraction_enabled: true,
        }
    }

    /// Disable LLM-driven pattern extraction (tests, degraded mode).
    #[must_use]
    pub fn without_pattern_extraction(mut self) -> Self {
        self.pattern_extraction_enabled = false;
        self
    }

    /// Record a completed exchange in `interaction-history`.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, query, response))]
    pub async fn track_interaction(
        &self,
        query: &str,
        response: &str,
        agent_type: AgentClass,
        model_used: &str,
        context_ids: Vec<String>,
        outcome: Outcome,
        user_feedback: i8,
        tokens_used: u32,
        latency_ms: u64,
    ) -> Result<Uuid> {
        if query.trim().is_empty() {
            return Err(Error::Validation("query required".to_string()));
        }

        let mut interaction = Interaction::new(
            query.to_string(),
            response.to_string(),
            agent_type,
            model_used.to_string(),
            context_ids,
        );
        interaction.outcome = outcome;
        interaction.user_feedback = user_feedback;
        interaction.tokens_used = tokens_used;
        interaction.latency_ms = latency_ms;

        let embedding = self.embeddings.embed_text(query).await?;
        self.vector
            .upsert(
                Collection::InteractionHistory.name(),
                vec![PointRecord {
                    id: interaction.id.to_string(),
                    vector: embedding,
                    payload: serde_json::to_value(&interaction)?,
                }],
            )
            .await?;

        self.events.record(
            "interaction_tracked",
            json!({
                "interaction_id": interaction.id,
                "agent_type": interaction.agent_type,
                "model_used": interaction.model_used,
                "tokens_used": interaction.tokens_used,
                "latency_ms": interaction.latency_ms,
                "context_count": interaction.context_provided.len(),
            }),
        );
        info!(interaction_id = %interaction.id, "tracked interaction");
        Ok(interaction.id)
    }

    /// Set the outcome and feedback of a tracked interaction, recompute its
    /// value score, and run the downstream learning updates.
    ///
    /// Idempotent for unchanged `(outcome, feedback)`: the value score is a
    /// pure function of the stored interaction.
    #[instrument(skip(self))]
    pub async fn update_outcome(
        &self,
        interaction_id: &str,
        outcome: Outcome,
        user_feedback: i8,
    ) -> Result<f32> {
        let point = self
            .vector
            .retrieve(Collection::InteractionHistory.name(), interaction_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("interaction {interaction_id}")))?;

        let mut interaction: Interaction = serde_json::from_value(point.payload)?;
        interaction.outcome = outcome;
        interaction.user_feedback = user_feedback;
        interaction.value_score = compute_value_score(
            outcome,
            user_feedback,
            &interaction.query,
            &interaction.response,
        );

        self.vector
            .set_payload(
                Collection::InteractionHistory.name(),
                interaction_id,
                serde_json::to_value(&interaction)?,
            )
            .await?;
        info!(
            interaction_id,
            outcome = ?outcome,
            value_score = interaction.value_score,
            "updated interaction outcome"
        );

        if interaction.value_score >= HIGH_VALUE_THRESHOLD && self.pattern_extraction_enabled {
            if let Err(err) = self.extractor.extract_and_store(&interaction).await {
                warn!(interaction_id, error = %err, "pattern extraction failed");
            }
        }

        if !interaction.context_provided.is_empty() {
            self.update_context_metrics(
                &interaction.context_provided,
                outcome == Outcome::Success,
            )
            .await;
        }

        Ok(interaction.value_score)
    }

    /// EMA-update success rates and access counters of the context items
    /// that fed an interaction.
    ///
    /// Per-item failures are logged and skipped; feedback processing never
    /// aborts half-way because one collection is missing an id.
    pub async fn update_context_metrics(&self, context_ids: &[String], success: bool) {
        for collection in METRIC_COLLECTIONS {
            for context_id in context_ids {
                if let Err(err) = self
                    .update_one_context_item(collection, context_id, success)
                    .await
                {
                    // Most ids exist in exactly one collection; misses in the
                    // others are expected.
                    tracing::debug!(
                        collection = collection.name(),
                        context_id,
                        error = %err,
                        "context metric update skipped"
                    );
                }
            }
        }
    }

    async fn update_one_context_item(
        &self,
        collection: Collection,
        context_id: &str,
        success: bool,
    ) -> Result<()> {
        let Some(point) = self.vector.retrieve(collection.name(), context_id).await? else {
            return Ok(());
        };
        let mut payload = point.payload;

        let access_count = payload["access_count"].as_u64().unwrap_or(0) + 1;
        payload["access_count"] = json!(access_count);
        payload["last_accessed"] = json!(Utc::now().timestamp());

        if let Some(rate) = payload.get("success_rate").and_then(serde_json::Value::as_f64) {
            let observed = if success { 1.0 } else { 0.0 };
            payload["success_rate"] = json!(rate * 0.9 + observed * 0.1);
        }
        if success {
            payload["success_count"] = json!(payload["success_count"].as_u64().unwrap_or(0) + 1);
        } else {
            payload["failure_count"] = json!(payload["failure_count"].as_u64().unwrap_or(0) + 1);
        }

        self.vector
            .set_payload(collection.name(), context_id, payload)
            .await
    }

    /// Record a simple +1/-1 rating for an interaction.
    pub async fn record_simple_feedback(
        &self,
        interaction_id: &str,
        rating: i8,
        note: &str,
        query: &str,
    ) -> Result<Uuid> {
        if !matches!(rating, 1 | -1) {
            return Err(Error::Validation(
                "rating must be 1 (good) or -1 (bad)".to_string(),
            ));
        }
        let record = FeedbackRecord {
            feedback_id: Uuid::new_v4(),
            interaction_id: Some(interaction_id.to_string()),
            query: truncate(query, MAX_FEEDBACK_QUERY_LEN),
            rating,
            note: truncate(note, MAX_FEEDBACK_NOTE_LEN),
            correction: None,
            tags: vec!["user-rating".to_string()],
            model: None,
            variant: None,
            created_at: Utc::now(),
        };
        self.append_feedback(&record)?;
        info!(interaction_id, rating, "simple feedback recorded");
        Ok(record.feedback_id)
    }

    /// Record correction-style feedback with tags and variant attribution.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_correction_feedback(
        &self,
        query: &str,
        correction: &str,
        interaction_id: Option<String>,
        rating: Option<i8>,
        tags: Vec<String>,
        model: Option<String>,
        variant: Option<String>,
    ) -> Result<Uuid> {
        let mut tags = tags;
        if let Some(variant) = &variant {
            let tag = format!("variant:{variant}");
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        let record = FeedbackRecord {
            feedback_id: Uuid::new_v4(),
            interaction_id,
            query: truncate(query, MAX_FEEDBACK_QUERY_LEN),
            rating: rating.unwrap_or(0),
            note: String::new(),
            correction: Some(truncate(correction, MAX_FEEDBACK_NOTE_LEN)),
            tags,
            model,
            variant,
            created_at: Utc::now(),
        };
        self.append_feedback(&record)?;
        Ok(record.feedback_id)
    }

    fn append_feedback(&self, record: &FeedbackRecord) -> Result<()> {
        append_jsonl(&self.feedback_path, &serde_json::to_value(record)?)
    }

    /// Record a low-confidence query for knowledge-gap mining.
    pub fn record_query_gap(&self, query: &str, score: f32, collection: &str) {
        let gap = QueryGap {
            query_hash: {
                use sha2::{Digest, Sha256};
                let digest = Sha256::digest(query.as_bytes());
                format!("{digest:x}")
            },
            query_text: truncate(query, MAX_FEEDBACK_QUERY_LEN),
            score,
            collection: collection.to_string(),
        };
        match serde_json::to_value(&gap) {
            Ok(value) => {
                if let Err(err) = append_jsonl(&self.gaps_path, &value) {
                    warn!(error = %err, "query gap write failed");
                }
            }
            Err(err) => warn!(error = %err, "query gap serialization failed"),
        }
    }

    /// Summarize feedback ratings for a tag (e.g. `variant:model-a`).
    pub async fn variant_stats(&self, tag: &str, days: Option<i64>) -> Result<VariantStats> {
        let path = self.feedback_path.clone();
        let tag_owned = tag.to_string();
        let cutoff = days.map(|d| Utc::now() - chrono::Duration::days(d));

        let stats = tokio::task::spawn_blocking(move || {
            let mut total = 0u64;
            let mut rated = 0u64;
            let mut rating_sum = 0i64;
            if let Ok(contents) = std::fs::read_to_string(&path) {
                for line in contents.lines() {
                    let Ok(record) = serde_json::from_str::<FeedbackRecord>(line) else {
                        continue;
                    };
                    if !record.tags.iter().any(|t| t == &tag_owned) {
                        continue;
                    }
                    if let Some(cutoff) = cutoff {
                        if record.created_at < cutoff {
                            continue;
                        }
                    }
                    total += 1;
                    if record.rating != 0 {
                        rated += 1;
                        rating_sum += i64::from(record.rating);
                    }
                }
            }
            let avg_rating = if rated > 0 {
                Some(rating_sum as f64 / rated as f64)
            } else {
                None
            };
            VariantStats {
                tag: tag_owned,
                total,
                rated,
                avg_rating,
            }
        })
        .await
        .map_err(|e| Error::Internal(format!("variant stats task: {e}")))?;
        Ok(stats)
    }

    /// Export high-value successful interactions as chat-format JSONL.
    pub async fn generate_fine_tuning_dataset(&self) -> Result<(PathBuf, usize)> {
        let points = self
            .vector
            .scroll(Collection::InteractionHistory.name(), 1_000)
            .await?;

        let mut examples = Vec::new();
        for point in points {
            let Ok(interaction) = serde_json::from_value::<Interaction>(point.payload) else {
                continue;
            };
            if interaction.outcome != Outcome::Success
                || interaction.value_score < HIGH_VALUE_THRESHOLD
            {
                continue;
            }
            examples.push(json!({
                "messages": [
                    {"role": "system", "content": "You are a helpful system-configuration and coding assistant."},
                    {"role": "user", "content": interaction.query},
                    {"role": "assistant", "content": interaction.response},
                ]
            }));
        }

        let path = self.dataset_path.clone();
        let count = examples.len();
        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = String::new();
            for example in &examples {
                out.push_str(&serde_json::to_string(example)?);
                out.push('\n');
            }
            std::fs::write(&path, out)?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Internal(format!("dataset task: {e}")))??;

        info!(count, path = %self.dataset_path.display(), "fine-tuning dataset generated");
        Ok((self.dataset_path.clone(), count))
    }
}

fn truncate(value: &str, max_len: usize) -> String {
    value.chars().take(max_len).collect()
}

fn append_jsonl(path: &std::path::Path, value: &serde_json::Value) -> Result<()> {
    use std::io::Write;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{}", serde_json::to_string(value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests;
