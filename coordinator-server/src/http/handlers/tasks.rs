//! Ralph task handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use coordinator_core::Error;

use crate::http::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    prompt: String,
    #[serde(default = "default_backend")]
    backend: String,
    /// -1 adaptive, 0 infinite, >0 fixed.
    #[serde(default = "default_max_iterations")]
    max_iterations: i64,
    #[serde(default)]
    require_approval: bool,
    #[serde(default)]
    context: Option<Value>,
}

fn default_backend() -> String {
    "aider".to_string()
}

fn default_max_iterations() -> i64 {
    -1
}

/// `POST /tasks`
pub async fn submit_task(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitTaskRequest>,
) -> ApiResult<Json<Value>> {
    let task_id = state
        .ralph
        .submit_task(
            request.prompt,
            request.backend,
            request.max_iterations,
            request.require_approval,
            request.context,
        )
        .await?;
    Ok(Json(json!({"status": "queued", "task_id": task_id})))
}

fn parse_task_id(task_id: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(task_id)
        .map_err(|_| Error::Validation(format!("invalid task id {task_id}")).into())
}

/// `GET /tasks/:task_id`
pub async fn task_status(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let task_id = parse_task_id(&task_id)?;
    match state.ralph.get_task(task_id).await {
        Some(task) => Ok(Json(serde_json::to_value(&task).map_err(Error::from)?)),
        None => Err(Error::NotFound(format!("task {task_id}")).into()),
    }
}

#[derive(Debug, Deserialize)]
pub struct ApprovalRequest {
    approved: bool,
}

/// `POST /tasks/:task_id/approve`
pub async fn approve_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
    Json(request): Json<ApprovalRequest>,
) -> ApiResult<Json<Value>> {
    let task_id = parse_task_id(&task_id)?;
    if state.ralph.approve_task(task_id, request.approved).await {
        Ok(Json(json!({"status": "resolved", "approved": request.approved})))
    } else {
        Err(Error::NotFound(format!("task {task_id} is not awaiting approval")).into())
    }
}

/// `POST /tasks/:task_id/stop`
pub async fn stop_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let task_id = parse_task_id(&task_id)?;
    if state.ralph.stop_task(task_id).await {
        Ok(Json(json!({"status": "stopped", "task_id": task_id})))
    } else {
        Err(Error::NotFound(format!("task {task_id} is not active")).into())
    }
}

/// `GET /tasks/stats`
pub async fn task_stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let stats = state.ralph.stats().await;
    Ok(Json(serde_json::to_value(&stats).map_err(Error::from)?))
}
