use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::clients::{ChatMessage, ChatModel, InMemoryVectorStore, PointRecord, VectorStore};
use crate::embeddings::MockEmbedding;
use crate::error::Result;
use crate::telemetry::EventLog;
use crate::types::{AgentClass, Collection, Outcome, Pattern};

use super::InteractionTracker;

/// Chat model that always replies with the same pattern JSON.
struct ScriptedChat {
    reply: String,
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn chat(&self, _: &[ChatMessage], _: f32, _: u32) -> Result<String> {
        Ok(self.reply.clone())
    }

    async fn complete(&self, _: &str, _: u32, _: f32, _: &[&str]) -> Result<String> {
        Ok(self.reply.clone())
    }
}

fn pattern_reply() -> String {
    json!({
        "problem_type": "keyring configuration",
        "solution_approach": "enable the keyring service via module options",
        "skills_used": ["nixos", "systemd"],
        "generalizable_pattern": "enable missing desktop services through module options",
    })
    .to_string()
}

struct Fixture {
    tracker: InteractionTracker,
    vector: Arc<InMemoryVectorStore>,
    _dir: tempfile::TempDir,
}

fn fixture(extraction: bool) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let vector = Arc::new(InMemoryVectorStore::new());
    vector.create_collections(&[
        "codebase-context",
        "skills-patterns",
        "error-solutions",
        "best-practices",
        "interaction-history",
    ]);
    let embeddings = Arc::new(MockEmbedding::new(32));
    let chat = Arc::new(ScriptedChat {
        reply: pattern_reply(),
    });
    let events = Arc::new(EventLog::new(dir.path().join("hybrid-events.jsonl")));

    let mut tracker = InteractionTracker::new(
        Arc::clone(&vector) as Arc<dyn VectorStore>,
        embeddings,
        chat,
        events,
        dir.path(),
    );
    if !extraction {
        tracker = tracker.without_pattern_extraction();
    }
    Fixture {
        tracker,
        vector,
        _dir: dir,
    }
}

const STRUCTURED_RESPONSE: &str = "Do this:\n1. Enable gnome-keyring\n2. Rebuild the system\n3. Restart the session\n```nix\nservices.gnome.gnome-keyring.enable = true;\n```";

#[tokio::test]
async fn test_track_rejects_empty_query() {
    let f = fixture(false);
    let err = f
        .tracker
        .track_interaction(
            "   ",
            "resp",
            AgentClass::Remote,
            "local",
            vec![],
            Outcome::Unknown,
            0,
            0,
            0,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[tokio::test]
async fn test_track_and_update_outcome_promotes_pattern() {
    let f = fixture(true);
    let id = f
        .tracker
        .track_interaction(
            "How to fix GNOME keyring error in NixOS?",
            STRUCTURED_RESPONSE,
            AgentClass::Remote,
            "local",
            vec![],
            Outcome::Unknown,
            0,
            850,
            420,
        )
        .await
        .expect("track");

    assert_eq!(
        f.vector
            .collection_size("interaction-history")
            .await
            .expect("size"),
        1
    );

    let score = f
        .tracker
        .update_outcome(&id.to_string(), Outcome::Success, 1)
        .await
        .expect("update");
    assert!(score >= 0.85, "high-value interaction scored {score}");

    // Promoted into the pattern catalog.
    assert_eq!(
        f.vector
            .collection_size("skills-patterns")
            .await
            .expect("size"),
        1
    );
}

#[tokio::test]
async fn test_similar_patterns_merge_instead_of_duplicating() {
    let f = fixture(true);
    for n in 0..2 {
        let id = f
            .tracker
            .track_interaction(
                &format!("How to fix GNOME keyring error in NixOS? (report {n})"),
                STRUCTURED_RESPONSE,
                AgentClass::Remote,
                "local",
                vec![],
                Outcome::Unknown,
                0,
                0,
                0,
            )
            .await
            .expect("track");
        f.tracker
            .update_outcome(&id.to_string(), Outcome::Success, 1)
            .await
            .expect("update");
    }

    // Identical generalizable_pattern text embeds identically, so the second
    // extraction merges rather than inserting.
    assert_eq!(
        f.vector
            .collection_size("skills-patterns")
            .await
            .expect("size"),
        1
    );
    let points = f
        .vector
        .scroll("skills-patterns", 10)
        .await
        .expect("scroll");
    let pattern: Pattern = serde_json::from_value(points[0].payload.clone()).expect("pattern");
    assert_eq!(pattern.success_examples.len(), 2);
    assert_eq!(pattern.source_interaction_ids.len(), 2);
}

#[tokio::test]
async fn test_update_outcome_is_idempotent_for_same_inputs() {
    let f = fixture(false);
    let id = f
        .tracker
        .track_interaction(
            "how to configure the keyring",
            STRUCTURED_RESPONSE,
            AgentClass::Remote,
            "local",
            vec![],
            Outcome::Unknown,
            0,
            0,
            0,
        )
        .await
        .expect("track");

    let first = f
        .tracker
        .update_outcome(&id.to_string(), Outcome::Success, 1)
        .await
        .expect("first update");
    let second = f
        .tracker
        .update_outcome(&id.to_string(), Outcome::Success, 1)
        .await
        .expect("second update");
    assert!((first - second).abs() < f32::EPSILON);
}

#[tokio::test]
async fn test_context_metrics_follow_ema_rule() {
    let f = fixture(false);
    f.vector
        .upsert(
            Collection::ErrorSolutions.name(),
            vec![PointRecord {
                id: "ctx-1".to_string(),
                vector: vec![1.0; 32],
                payload: json!({
                    "error_pattern": "keyring prompt",
                    "solution": "enable the service",
                    "success_rate": 0.5,
                    "access_count": 4,
                }),
            }],
        )
        .await
        .expect("seed");

    let id = f
        .tracker
        .track_interaction(
            "keyring prompt on login",
            "answer",
            AgentClass::Remote,
            "local",
            vec!["ctx-1".to_string()],
            Outcome::Unknown,
            0,
            0,
            0,
        )
        .await
        .expect("track");

    f.tracker
        .update_outcome(&id.to_string(), Outcome::Success, 0)
        .await
        .expect("update");

    let point = f
        .vector
        .retrieve("error-solutions", "ctx-1")
        .await
        .expect("retrieve")
        .expect("present");
    let rate = point.payload["success_rate"].as_f64().expect("rate");
    assert!((rate - (0.5 * 0.9 + 0.1)).abs() < 1e-9);
    assert_eq!(point.payload["access_count"], 5);
    assert_eq!(point.payload["success_count"], 1);
}

#[tokio::test]
async fn test_simple_feedback_and_variant_stats() {
    let f = fixture(false);
    let err = f
        .tracker
        .record_simple_feedback("i-1", 0, "", "")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");

    f.tracker
        .record_simple_feedback("i-1", 1, "helped", "keyring")
        .await
        .expect("feedback");

    f.tracker
        .record_correction_feedback(
            "keyring",
            "use the module option instead",
            Some("i-1".to_string()),
            Some(1),
            vec![],
            Some("local".to_string()),
            Some("model-a".to_string()),
        )
        .await
        .expect("correction");
    f.tracker
        .record_correction_feedback(
            "keyring",
            "wrong path",
            None,
            Some(-1),
            vec![],
            None,
            Some("model-a".to_string()),
        )
        .await
        .expect("correction");

    let stats = f
        .tracker
        .variant_stats("variant:model-a", None)
        .await
        .expect("stats");
    assert_eq!(stats.total, 2);
    assert_eq!(stats.rated, 2);
    assert_eq!(stats.avg_rating, Some(0.0));
}

#[tokio::test]
async fn test_fine_tuning_export_filters_high_value_successes() {
    let f = fixture(false);

    let keep = f
        .tracker
        .track_interaction(
            "how to configure keyring",
            STRUCTURED_RESPONSE,
            AgentClass::Remote,
            "local",
            vec![],
            Outcome::Unknown,
            0,
            0,
            0,
        )
        .await
        .expect("track");
    f.tracker
        .update_outcome(&keep.to_string(), Outcome::Success, 1)
        .await
        .expect("update");

    let drop = f
        .tracker
        .track_interaction(
            "what happened",
            "nothing useful",
            AgentClass::Remote,
            "local",
            vec![],
            Outcome::Unknown,
            0,
            0,
            0,
        )
        .await
        .expect("track");
    f.tracker
        .update_outcome(&drop.to_string(), Outcome::Failure, -1)
        .await
        .expect("update");

    let (path, count) = f
        .tracker
        .generate_fine_tuning_dataset()
        .await
        .expect("export");
    assert_eq!(count, 1);

    let contents = std::fs::read_to_string(path).expect("read dataset");
    let example: serde_json::Value =
        serde_json::from_str(contents.lines().next().expect("one line")).expect("json");
    assert_eq!(example["messages"][1]["content"], "how to configure keyring");
}
