use super::*;
use serde_json::json;

#[test]
fn test_collection_wire_names_round_trip() {
    for collection in Collection::ALL {
        assert_eq!(Collection::parse(collection.name()), Some(collection));
    }
    assert_eq!(Collection::parse("no-such-collection"), None);
}

#[test]
fn test_usage_counters_ema_update() {
    let mut counters = UsageCounters {
        success_rate: 0.5,
        ..UsageCounters::default()
    };
    counters.record(true);
    assert!((counters.success_rate - (0.5 * 0.9 + 0.1)).abs() < 1e-6);
    assert_eq!(counters.access_count, 1);
    assert_eq!(counters.success_count, 1);

    counters.record(false);
    assert!((counters.success_rate - (0.5 * 0.9 + 0.1) * 0.9).abs() < 1e-6);
    assert_eq!(counters.failure_count, 1);
}

#[test]
fn test_usage_counters_closed_form_sequence() {
    // After N feedbacks, r_N = 0.9^N * r0 + 0.1 * sum(0.9^(N-1-i) * s_i).
    let r0 = 0.42_f64;
    let observations = [true, false, true, true, false, false, true];

    let mut counters = UsageCounters {
        success_rate: r0 as f32,
        ..UsageCounters::default()
    };
    for &s in &observations {
        counters.record(s);
    }

    let n = observations.len();
    let mut expected = 0.9_f64.powi(n as i32) * r0;
    for (i, &s) in observations.iter().enumerate() {
        let signal = if s { 1.0 } else { 0.0 };
        expected += 0.1 * 0.9_f64.powi((n - 1 - i) as i32) * signal;
    }
    assert!((f64::from(counters.success_rate) - expected).abs() < 1e-6);
}

#[test]
fn test_pattern_merge_appends_example_and_moves_score() {
    let now = chrono::Utc::now();
    let mut existing = Pattern {
        problem_type: "keyring configuration".to_string(),
        solution_approach: "enable the service".to_string(),
        skills_used: vec!["nixos".to_string()],
        generalizable_pattern: "enable missing services via module options".to_string(),
        success_examples: vec!["example one".to_string()],
        failure_examples: Vec::new(),
        value_score: 0.5,
        last_updated: now,
        source_interaction_ids: Vec::new(),
    };
    let incoming = Pattern {
        success_examples: vec!["example two".to_string()],
        value_score: 1.0,
        last_updated: now,
        ..existing.clone()
    };

    existing.merge_from(&incoming);
    assert_eq!(existing.success_examples.len(), 2);
    assert!((existing.value_score - (0.5 * 0.8 + 1.0 * 0.2)).abs() < 1e-6);
}

#[test]
fn test_proposal_dedup_hash_is_stable() {
    let proposal = Proposal {
        proposal_id: "proposal-1".to_string(),
        proposal_type: ProposalType::TimeoutAdjustment,
        title: "Increase timeout budget".to_string(),
        rationale: "observed 4 timeout failures".to_string(),
        recommended_action: "Increase task timeout budget by 20%".to_string(),
        evidence: json!({"timeout_signals": 4}),
        status: ProposalStatus::Pending,
        approval_required: true,
        created_at: chrono::Utc::now(),
        submitted_as_task: false,
    };
    let mut other = proposal.clone();
    other.proposal_id = "proposal-2".to_string();
    other.evidence = json!({"timeout_signals": 9});

    // Identity is (type, title, recommended_action); ids and evidence differ.
    assert_eq!(proposal.dedup_hash(), other.dedup_hash());

    other.recommended_action = "Increase task timeout budget by 50%".to_string();
    assert_ne!(proposal.dedup_hash(), other.dedup_hash());
}

#[test]
fn test_issue_error_hash_scrubs_volatile_fragments() {
    let a = Issue::hash_error(
        "connection to 10.0.0.17 failed at 2026-07-01T10:22:31Z (attempt 3, id 550e8400-e29b-41d4-a716-446655440000)",
    );
    let b = Issue::hash_error(
        "connection to 10.0.0.99 failed at 2026-07-02T08:00:00Z (attempt 7, id 6ba7b810-9dad-11d1-80b4-00c04fd430c8)",
    );
    assert_eq!(a, b);

    let c = Issue::hash_error("disk full on /var");
    assert_ne!(a, c);
}

#[test]
fn test_session_state_round_trips_through_json() {
    let session = SessionState::new("session-1".to_string(), json!({"caller": "editor"}));
    let encoded = serde_json::to_string(&session).expect("serialize");
    let decoded: SessionState = serde_json::from_str(&encoded).expect("deserialize");
    assert_eq!(decoded.session_id, "session-1");
    assert_eq!(decoded.turn_count, 0);
    assert!(decoded.context_item_ids_sent.is_empty());
}
