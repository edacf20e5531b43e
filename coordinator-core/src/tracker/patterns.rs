//! Pattern extraction from high-value interactions.
//!
//! The local LLM distills a completed interaction into a reusable pattern;
//! the result is merged into an existing catalog entry when one is
//! sufficiently similar, otherwise inserted as a new point.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clients::{ChatMessage, ChatModel, PointRecord, VectorStore};
use crate::embeddings::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::types::{Collection, Interaction, Pattern, PATTERN_MERGE_THRESHOLD};

const EXTRACTION_TEMPERATURE: f32 = 0.3;
const EXTRACTION_MAX_TOKENS: u32 = 500;

/// Extracts and catalogs patterns from interactions.
pub struct PatternExtractor {
    chat: Arc<dyn ChatModel>,
    embeddings: Arc<dyn EmbeddingProvider>,
    vector: Arc<dyn VectorStore>,
}

impl PatternExtractor {
    #[must_use]
    pub fn new(
        chat: Arc<dyn ChatModel>,
        embeddings: Arc<dyn EmbeddingProvider>,
        vector: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            chat,
            embeddings,
            vector,
        }
    }

    fn build_prompt(interaction: &Interaction) -> String {
        let response_preview: String = interaction.response.chars().take(500).collect();
        format!(
            "Analyze this successful interaction and extract reusable patterns:\n\n\
             Query: {}\n\
             Response: {}...\n\n\
             Extract:\n\
             1. What problem was solved?\n\
             2. What approach was used?\n\
             3. What skills or knowledge were applied?\n\
             4. What can be generalized for future use?\n\n\
             Return a JSON object with these fields:\n\
             {{\n\
               \"problem_type\": \"brief description\",\n\
               \"solution_approach\": \"general approach used\",\n\
               \"skills_used\": [\"skill1\", \"skill2\"],\n\
               \"generalizable_pattern\": \"reusable pattern description\"\n\
             }}\n\n\
             JSON:",
            interaction.query, response_preview
        )
    }

    /// Pull the JSON object out of a model reply that may wrap it in fences
    /// or prose.
    fn extract_json(content: &str) -> Result<Value> {
        let candidate = if let Some(fenced) = content.split("```json").nth(1) {
            fenced.split("```").next().unwrap_or(fenced).trim()
        } else if let (Some(start), Some(end)) = (content.find('{'), content.rfind('}')) {
            content.get(start..=end).unwrap_or(content)
        } else {
            content
        };
        serde_json::from_str(candidate)
            .map_err(|e| Error::Validation(format!("pattern extraction returned invalid JSON: {e}")))
    }

    /// Prompt the model and build a pattern from the reply.
    pub async fn extract(&self, interaction: &Interaction) -> Result<Pattern> {
        let prompt = Self::build_prompt(interaction);
        let reply = self
            .chat
            .chat(
                &[ChatMessage::user(prompt)],
                EXTRACTION_TEMPERATURE,
                EXTRACTION_MAX_TOKENS,
            )
            .await?;
        let parsed = Self::extract_json(&reply)?;

        let example: String = interaction.response.chars().take(500).collect();
        Ok(Pattern {
            problem_type: parsed["problem_type"]
                .as_str()
                .unwrap_or("Unknown")
                .to_string(),
            solution_approach: parsed["solution_approach"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            skills_used: parsed["skills_used"]
                .as_array()
                .map(|skills| {
                    skills
                        .iter()
                        .filter_map(|s| s.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            generalizable_pattern: parsed["generalizable_pattern"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            success_examples: vec![example],
            failure_examples: Vec::new(),
            value_score: interaction.value_score,
            last_updated: Utc::now(),
            source_interaction_ids: vec![interaction.id],
        })
    }

    /// Store a pattern: merge into the most similar existing entry when the
    /// cosine clears the merge threshold, otherwise insert.
    pub async fn store(&self, pattern: Pattern) -> Result<String> {
        if pattern.success_examples.is_empty() {
            return Err(Error::Validation(
                "patterns require at least one success example".to_string(),
            ));
        }
        let embedding = self
            .embeddings
            .embed_text(&pattern.generalizable_pattern)
            .await?;

        let similar = self
            .vector
            .search(
                Collection::SkillsPatterns.name(),
                &embedding,
                1,
                Some(PATTERN_MERGE_THRESHOLD),
            )
            .await?;

        if let Some(hit) = similar.first() {
            if let Ok(mut existing) = serde_json::from_value::<Pattern>(hit.payload.clone()) {
                existing.merge_from(&pattern);
                self.vector
                    .set_payload(
                        Collection::SkillsPatterns.name(),
                        &hit.id,
                        serde_json::to_value(&existing)?,
                    )
                    .await?;
                info!(pattern_id = %hit.id, "merged into existing pattern");
                return Ok(hit.id.clone());
            }
            warn!(pattern_id = %hit.id, "similar pattern payload unreadable, inserting new");
        }

        let pattern_id = Uuid::new_v4().to_string();
        self.vector
            .upsert(
                Collection::SkillsPatterns.name(),
                vec![PointRecord {
                    id: pattern_id.clone(),
                    vector: embedding,
                    payload: serde_json::to_value(&pattern)?,
                }],
            )
            .await?;
        info!(pattern_id = %pattern_id, problem_type = %pattern.problem_type, "created new pattern");
        Ok(pattern_id)
    }

    /// Extract from an interaction and store the result.
    pub async fn extract_and_store(&self, interaction: &Interaction) -> Result<String> {
        let pattern = self.extract(interaction).await?;
        self.store(pattern).await
    }
}
