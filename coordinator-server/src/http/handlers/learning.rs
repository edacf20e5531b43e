//! Learning-pipeline control and proposal handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use coordinator_core::types::Proposal;
use coordinator_core::Error;

use crate::http::error::ApiResult;
use crate::state::AppState;

/// `GET /learning/stats`: snapshot file when present, else live stats.
pub async fn learning_stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let snapshot_path = state.config.learning.stats_path.clone();
    if let Ok(raw) = tokio::fs::read_to_string(&snapshot_path).await {
        if let Ok(snapshot) = serde_json::from_str::<Value>(&raw) {
            return Ok(Json(snapshot));
        }
    }
    Ok(Json(state.learning.stats().await))
}

/// `GET /learning/issues`: deduplicated error taxonomy from telemetry.
pub async fn learning_issues(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let issues = state.learning.issues();
    Ok(Json(json!({"count": issues.len(), "issues": issues})))
}

/// `POST /learning/process`: run one batch on demand.
pub async fn learning_process(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let report = state.learning.process_batch().await?;
    Ok(Json(json!({
        "status": "ok",
        "patterns": report.patterns_extracted,
        "examples": report.examples_written,
        "proposals": report.proposals_generated,
    })))
}

/// `POST /learning/export`: export the validated fine-tuning dataset.
pub async fn learning_export(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let (path, examples) = state.learning.export_dataset(None).await?;
    Ok(Json(json!({
        "status": "ok",
        "dataset_path": path,
        "examples": examples,
    })))
}

#[derive(Debug, Deserialize)]
pub struct AbCompareRequest {
    #[serde(default = "default_tag_prefix")]
    tag_prefix: String,
    #[serde(default)]
    tag_a: Option<String>,
    #[serde(default)]
    tag_b: Option<String>,
    #[serde(default)]
    variant_a: Option<String>,
    #[serde(default)]
    variant_b: Option<String>,
    #[serde(default)]
    days: Option<i64>,
}

fn default_tag_prefix() -> String {
    "variant:".to_string()
}

/// `POST /learning/ab_compare`: compare feedback ratings between variants.
pub async fn learning_ab_compare(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AbCompareRequest>,
) -> ApiResult<Json<Value>> {
    let tag_a = request
        .tag_a
        .or_else(|| request.variant_a.map(|v| format!("{}{v}", request.tag_prefix)));
    let tag_b = request
        .tag_b
        .or_else(|| request.variant_b.map(|v| format!("{}{v}", request.tag_prefix)));
    let (Some(tag_a), Some(tag_b)) = (tag_a, tag_b) else {
        return Err(Error::Validation(
            "variant_a/variant_b or tag_a/tag_b required".to_string(),
        )
        .into());
    };

    let stats_a = state.tracker.variant_stats(&tag_a, request.days).await?;
    let stats_b = state.tracker.variant_stats(&tag_b, request.days).await?;
    let delta = match (stats_a.avg_rating, stats_b.avg_rating) {
        (Some(a), Some(b)) => Some(a - b),
        _ => None,
    };
    Ok(Json(json!({
        "status": "ok",
        "variant_a": stats_a,
        "variant_b": stats_b,
        "delta": {"avg_rating": delta},
    })))
}

/// `POST /proposals/apply`: apply a validated proposal; requires an API key
/// when one is configured (the global middleware enforces it).
pub async fn apply_proposal(
    State(state): State<Arc<AppState>>,
    _headers: HeaderMap,
    Json(proposal): Json<Proposal>,
) -> ApiResult<Json<Value>> {
    state.events.record(
        "proposal_applied",
        json!({
            "proposal_id": proposal.proposal_id,
            "proposal_type": proposal.proposal_type,
            "recommended_action": proposal.recommended_action,
        }),
    );
    Ok(Json(json!({
        "status": "applied",
        "proposal_id": proposal.proposal_id,
        "proposal_type": proposal.proposal_type,
    })))
}
