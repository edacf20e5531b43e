//! Query, augmentation, search, and agent-memory handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::actions::{self, QueryParams};
use crate::http::error::{ApiError, ApiResult};
use crate::http::middleware::client_id;
use crate::state::AppState;

/// `POST /query`
pub async fn query(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(params): Json<QueryParams>,
) -> ApiResult<Json<Value>> {
    state
        .limiter
        .check(&client_id(&headers))
        .map_err(ApiError)?;
    let body = actions::run_query(&state, &params).await?;
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct AugmentRequest {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
}

/// `POST /augment_query`
pub async fn augment_query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AugmentRequest>,
) -> ApiResult<Json<Value>> {
    let query = request
        .query
        .or(request.prompt)
        .unwrap_or_default();
    let body = actions::augment_query(&state, &query).await?;
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct TreeSearchRequest {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    collections: Option<Vec<String>>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    score_threshold: Option<f32>,
}

/// `POST /search/tree`
pub async fn tree_search(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TreeSearchRequest>,
) -> ApiResult<Json<Value>> {
    let query = request.query.or(request.prompt).unwrap_or_default();
    let body = actions::hybrid_search(
        &state,
        &query,
        request.collections.as_ref(),
        request.limit.unwrap_or(5),
        request.score_threshold.or(Some(0.7)),
    )
    .await?;
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct MemoryStoreRequest {
    #[serde(default)]
    memory_type: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
}

/// `POST /memory/store`
pub async fn memory_store(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<MemoryStoreRequest>,
) -> ApiResult<Json<Value>> {
    state
        .limiter
        .check(&client_id(&headers))
        .map_err(ApiError)?;
    let body = actions::store_memory(
        &state,
        &request.memory_type,
        &request.summary,
        request.content.as_deref(),
        request.metadata,
    )
    .await?;
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct MemoryRecallRequest {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    memory_types: Option<Vec<String>>,
    #[serde(default)]
    limit: Option<usize>,
}

/// `POST /memory/recall`
pub async fn memory_recall(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MemoryRecallRequest>,
) -> ApiResult<Json<Value>> {
    let query = request.query.or(request.prompt).unwrap_or_default();
    let body = actions::recall_memory(
        &state,
        &query,
        request.memory_types.as_ref(),
        request.limit.unwrap_or(5),
    )
    .await?;
    Ok(Json(body))
}
