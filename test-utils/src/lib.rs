//! # Test Utilities
//!
//! Shared fixtures for the hybrid coordination plane.
//!
//! Provides:
//! - A seeded in-memory vector store with the five standard collections
//! - Scripted chat/backend doubles
//! - Telemetry event builders

use std::sync::Arc;

use async_trait::async_trait;
use coordinator_core::clients::{
    ChatMessage, ChatModel, InMemoryVectorStore, PointRecord, VectorStore,
};
use coordinator_core::embeddings::{EmbeddingProvider, MockEmbedding};
use coordinator_core::ralph::{AgentBackend, IterationResult};
use coordinator_core::types::Collection;
use coordinator_core::Result;
use serde_json::{json, Value};

/// Standard embedding dimension used across tests.
pub const TEST_DIMENSION: usize = 32;

/// Create an in-memory vector store with all five standard collections.
#[must_use]
pub fn store_with_collections() -> Arc<InMemoryVectorStore> {
    let store = Arc::new(InMemoryVectorStore::new());
    store.create_collections(&[
        Collection::CodebaseContext.name(),
        Collection::SkillsPatterns.name(),
        Collection::ErrorSolutions.name(),
        Collection::BestPractices.name(),
        Collection::InteractionHistory.name(),
    ]);
    store
}

/// Deterministic test embedding provider.
#[must_use]
pub fn test_embeddings() -> Arc<MockEmbedding> {
    Arc::new(MockEmbedding::new(TEST_DIMENSION))
}

/// Seed one error-solution item whose vector matches `topic` exactly.
pub async fn seed_error_solution(
    store: &dyn VectorStore,
    embeddings: &dyn EmbeddingProvider,
    id: &str,
    topic: &str,
    solution: &str,
    verified: bool,
) -> anyhow::Result<()> {
    let vector = embeddings.embed_text(topic).await?;
    store
        .upsert(
            Collection::ErrorSolutions.name(),
            vec![PointRecord {
                id: id.to_string(),
                vector,
                payload: json!({
                    "error_pattern": topic,
                    "solution": solution,
                    "content": solution,
                    "solution_verified": verified,
                    "success_rate": 0.5,
                    "access_count": 0,
                }),
            }],
        )
        .await?;
    Ok(())
}

/// Chat model replying with a fixed string.
pub struct FixedChat {
    pub reply: String,
}

impl FixedChat {
    #[must_use]
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl ChatModel for FixedChat {
    async fn chat(&self, _: &[ChatMessage], _: f32, _: u32) -> Result<String> {
        Ok(self.reply.clone())
    }

    async fn complete(&self, _: &str, _: u32, _: f32, _: &[&str]) -> Result<String> {
        Ok(self.reply.clone())
    }
}

/// Agent backend that replays a scripted sequence, then reports completion.
pub struct ScriptedBackend {
    script: std::sync::Mutex<Vec<IterationResult>>,
}

impl ScriptedBackend {
    #[must_use]
    pub fn new(script: Vec<IterationResult>) -> Self {
        Self {
            script: std::sync::Mutex::new(script),
        }
    }
}

#[async_trait]
impl AgentBackend for ScriptedBackend {
    async fn execute(
        &self,
        _backend: &str,
        _prompt: &str,
        _context: &Value,
        _iteration: u32,
    ) -> Result<IterationResult> {
        let mut script = self
            .script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if script.is_empty() {
            Ok(IterationResult {
                exit_code: 0,
                output: "goal reached".to_string(),
                error: None,
                completed: true,
            })
        } else {
            Ok(script.remove(0))
        }
    }
}

/// Build a `task_completed` telemetry event.
#[must_use]
pub fn task_completed_event(task_id: &str, prompt: &str, iterations: u64, limit: u64) -> Value {
    json!({
        "event": "task_completed",
        "task_id": task_id,
        "status": "completed",
        "total_iterations": iterations,
        "adaptive_limit_used": limit,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "task": {
            "task_id": task_id,
            "prompt": prompt,
            "output": "completed the requested change",
            "iteration": iterations,
            "backend": "aider",
            "context": {},
        },
    })
}
