//! Feedback and harness-evaluation handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use coordinator_core::types::Outcome;
use coordinator_core::Error;

use crate::actions;
use crate::http::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    #[serde(default)]
    interaction_id: Option<String>,
    #[serde(default)]
    outcome: Option<Outcome>,
    #[serde(default)]
    user_feedback: Option<i8>,
    #[serde(default)]
    correction: Option<String>,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    rating: Option<i8>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    variant: Option<String>,
}

/// `POST /feedback`: correction-style feedback or an outcome update.
pub async fn feedback(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FeedbackRequest>,
) -> ApiResult<Json<Value>> {
    if let Some(correction) = &request.correction {
        let feedback_id = state
            .tracker
            .record_correction_feedback(
                request.query.as_deref().unwrap_or_default(),
                correction,
                request.interaction_id,
                request.rating,
                request.tags.unwrap_or_default(),
                request.model,
                request.variant,
            )
            .await?;
        return Ok(Json(json!({"status": "recorded", "feedback_id": feedback_id})));
    }

    if let (Some(interaction_id), Some(outcome)) = (&request.interaction_id, request.outcome) {
        let value_score = state
            .tracker
            .update_outcome(interaction_id, outcome, request.user_feedback.unwrap_or(0))
            .await?;
        return Ok(Json(json!({"status": "updated", "value_score": value_score})));
    }

    Err(Error::Validation(
        "feedback requires a correction, or interaction_id with outcome".to_string(),
    )
    .into())
}

#[derive(Debug, Deserialize)]
pub struct SimpleFeedbackRequest {
    rating: i8,
    #[serde(default)]
    note: Option<String>,
    #[serde(default)]
    query: Option<String>,
}

/// `POST /feedback/:interaction_id`: simple +1/-1 rating.
pub async fn simple_feedback(
    State(state): State<Arc<AppState>>,
    Path(interaction_id): Path<String>,
    Json(request): Json<SimpleFeedbackRequest>,
) -> ApiResult<Json<Value>> {
    let feedback_id = state
        .tracker
        .record_simple_feedback(
            &interaction_id,
            request.rating,
            request.note.as_deref().unwrap_or_default(),
            request.query.as_deref().unwrap_or_default(),
        )
        .await?;
    Ok(Json(json!({"status": "recorded", "feedback_id": feedback_id})))
}

#[derive(Debug, Deserialize)]
pub struct HarnessEvalRequest {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    expected_keywords: Vec<String>,
    #[serde(default)]
    max_latency_ms: Option<u64>,
}

/// `POST /harness/eval`
pub async fn harness_eval(
    State(state): State<Arc<AppState>>,
    Json(request): Json<HarnessEvalRequest>,
) -> ApiResult<Json<Value>> {
    let query = request.query.or(request.prompt).unwrap_or_default();
    let body = actions::run_harness_eval(
        &state,
        &query,
        &request.expected_keywords,
        request.max_latency_ms,
    )
    .await?;
    Ok(Json(body))
}

/// `GET /harness/stats`
pub async fn harness_stats(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.harness.snapshot())
}
