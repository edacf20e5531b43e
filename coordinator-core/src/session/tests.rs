use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::clients::{
    ChatMessage, ChatModel, InMemorySessionStore, InMemoryVectorStore, PointRecord, SessionStore,
    VectorStore,
};
use crate::embeddings::{EmbeddingProvider, MockEmbedding};
use crate::error::Result;
use crate::pipeline::QueryPipeline;
use crate::types::{Collection, ContextLevel, RoutingConfig, SessionConfig};

use super::{level_config, MultiTurnSessionManager};

struct SuggestingChat;

#[async_trait]
impl ChatModel for SuggestingChat {
    async fn chat(&self, _: &[ChatMessage], _: f32, _: u32) -> Result<String> {
        Ok(String::new())
    }

    async fn complete(&self, _: &str, _: u32, _: f32, _: &[&str]) -> Result<String> {
        Ok("1. keyring configuration options\n2. pam integration details\nshort".to_string())
    }
}

async fn manager() -> (MultiTurnSessionManager, Arc<InMemoryVectorStore>, Arc<MockEmbedding>) {
    let vector = Arc::new(InMemoryVectorStore::new());
    vector.create_collections(&[
        "codebase-context",
        "skills-patterns",
        "error-solutions",
        "best-practices",
        "interaction-history",
    ]);
    let embeddings = Arc::new(MockEmbedding::new(32));

    // Seed several items that match the test query exactly.
    let topic = embeddings.embed_text("NixOS keyring").await.expect("embed");
    for (i, collection) in ["error-solutions", "best-practices"].iter().enumerate() {
        for n in 0..3 {
            vector
                .upsert(
                    collection,
                    vec![PointRecord {
                        id: format!("{collection}-{n}"),
                        vector: topic.clone(),
                        payload: json!({
                            "error_pattern": format!("keyring issue {i}-{n}"),
                            "solution": format!("solution text number {n} for case {i}"),
                            "practice_name": format!("practice {i}-{n}"),
                            "description": format!("description {i}-{n}"),
                        }),
                    }],
                )
                .await
                .expect("seed");
        }
    }

    let pipeline = Arc::new(QueryPipeline::new(
        Arc::clone(&vector) as Arc<dyn VectorStore>,
        Arc::clone(&embeddings) as Arc<dyn EmbeddingProvider>,
        None,
        RoutingConfig::default(),
    ));
    let store = Arc::new(InMemorySessionStore::new());
    let manager = MultiTurnSessionManager::new(
        pipeline,
        store as Arc<dyn SessionStore>,
        Some(Arc::new(SuggestingChat)),
        SessionConfig::default(),
    );
    (manager, vector, embeddings)
}

#[test]
fn test_level_table_matches_disclosure_contract() {
    let standard = level_config(ContextLevel::Standard);
    assert_eq!(standard.collections.len(), 2);
    assert_eq!(standard.limit_per_collection, 3);

    let detailed = level_config(ContextLevel::Detailed);
    assert_eq!(detailed.collections.len(), 3);
    assert_eq!(detailed.limit_per_collection, 5);

    let comprehensive = level_config(ContextLevel::Comprehensive);
    assert_eq!(comprehensive.collections.len(), 5);
    assert_eq!(comprehensive.limit_per_collection, 10);
}

#[tokio::test]
async fn test_turns_never_repeat_context_ids() {
    let (manager, _vector, _embeddings) = manager().await;

    let turn1 = manager
        .get_context("S", "NixOS keyring", ContextLevel::Standard, &[], Some(2_000), None)
        .await
        .expect("turn 1");
    assert_eq!(turn1.turn_number, 1);
    assert!(!turn1.context_ids.is_empty());
    // First turn never suggests.
    assert!(turn1.suggestions.is_empty());

    let turn2 = manager
        .get_context(
            "S",
            "NixOS keyring",
            ContextLevel::Standard,
            &turn1.context_ids,
            Some(2_000),
            None,
        )
        .await
        .expect("turn 2");
    assert_eq!(turn2.turn_number, 2);
    for id in &turn2.context_ids {
        assert!(
            !turn1.context_ids.contains(id),
            "turn 2 repeated context id {id}"
        );
    }
}

#[tokio::test]
async fn test_session_accumulates_sent_ids_and_tokens() {
    let (manager, _vector, _embeddings) = manager().await;

    let turn1 = manager
        .get_context("S", "NixOS keyring", ContextLevel::Standard, &[], Some(2_000), None)
        .await
        .expect("turn 1");
    let turn2 = manager
        .get_context("S", "NixOS keyring", ContextLevel::Standard, &[], Some(2_000), None)
        .await
        .expect("turn 2");

    let info = manager
        .session_info("S")
        .await
        .expect("info")
        .expect("present");
    assert_eq!(info["turn_count"], 2);
    assert_eq!(
        info["total_context_items_sent"].as_u64().expect("count") as usize,
        turn1.context_ids.len() + turn2.context_ids.len()
    );
    assert_eq!(
        info["total_tokens_sent"].as_u64().expect("tokens") as u32,
        turn1.token_count + turn2.token_count
    );
}

#[tokio::test]
async fn test_suggestions_parse_and_filter() {
    let (manager, _vector, _embeddings) = manager().await;
    manager
        .get_context("S", "NixOS keyring", ContextLevel::Standard, &[], Some(2_000), None)
        .await
        .expect("turn 1");
    let turn2 = manager
        .get_context("S", "keyring configuration", ContextLevel::Standard, &[], Some(2_000), None)
        .await
        .expect("turn 2");

    // Numbered lines are cleaned; the "short" line fails the length filter.
    assert_eq!(
        turn2.suggestions,
        vec![
            "keyring configuration options".to_string(),
            "pam integration details".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_clear_session_returns_to_no_info_state() {
    let (manager, _vector, _embeddings) = manager().await;
    manager
        .get_context("S", "NixOS keyring", ContextLevel::Standard, &[], Some(2_000), None)
        .await
        .expect("turn");

    manager.clear_session("S").await.expect("clear");
    assert!(manager.session_info("S").await.expect("info").is_none());

    // Clearing an unknown session is a no-op.
    manager.clear_session("missing").await.expect("noop");
}
