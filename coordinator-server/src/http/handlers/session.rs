//! Multi-turn session handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use coordinator_core::types::ContextLevel;
use coordinator_core::Error;

use crate::http::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MultiTurnRequest {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    query: String,
    #[serde(default)]
    context_level: Option<ContextLevel>,
    #[serde(default)]
    previous_context_ids: Vec<String>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    metadata: Option<Value>,
}

/// `POST /context/multi_turn`
pub async fn multi_turn(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MultiTurnRequest>,
) -> ApiResult<Json<Value>> {
    let session_id = request
        .session_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let response = state
        .sessions
        .get_context(
            &session_id,
            &request.query,
            request.context_level.unwrap_or_default(),
            &request.previous_context_ids,
            request.max_tokens,
            request.metadata,
        )
        .await?;
    Ok(Json(serde_json::to_value(&response).map_err(Error::from)?))
}

/// `GET /session/:session_id`
pub async fn session_info(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Value>> {
    match state.sessions.session_info(&session_id).await? {
        Some(info) => Ok(Json(info)),
        None => Err(Error::NotFound(format!("session {session_id}")).into()),
    }
}

/// `DELETE /session/:session_id`
pub async fn clear_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.sessions.clear_session(&session_id).await?;
    Ok(Json(json!({"status": "cleared", "session_id": session_id})))
}
