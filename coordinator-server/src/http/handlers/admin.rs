//! Discovery, skills, model-reload, and legacy-endpoint handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use coordinator_core::pipeline::estimate_tokens;
use coordinator_core::registry::{FederationUpsert, SkillImportRequest};
use coordinator_core::types::{DisclosureMode, SkillStatus};
use coordinator_core::Error;

use crate::http::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct DiscoveryRequest {
    #[serde(default)]
    level: Option<DisclosureMode>,
    #[serde(default)]
    categories: Option<Vec<String>>,
    #[serde(default)]
    token_budget: Option<u32>,
}

/// `POST /discovery/capabilities` (and GET with defaults).
pub async fn discover_capabilities(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<DiscoveryRequest>>,
) -> ApiResult<Json<Value>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let level = request.level.unwrap_or_default();
    let token_budget = request.token_budget.unwrap_or(500);
    let api_key = headers.get("x-api-key").and_then(|v| v.to_str().ok());

    let tools = state.tools.get_tools(level, api_key)?;
    let mut disclosed = Vec::new();
    let mut tokens_used = 0u32;
    let mut truncated = false;
    for tool in tools {
        if let Some(categories) = &request.categories {
            if !categories.iter().any(|c| tool.name.contains(c.as_str())) {
                continue;
            }
        }
        let cost = estimate_tokens(&tool.description) + estimate_tokens(&tool.manifest.to_string());
        if tokens_used + cost > token_budget {
            truncated = true;
            break;
        }
        tokens_used += cost;
        disclosed.push(tool);
    }

    let skills: Vec<Value> = state
        .skills
        .list(Some(SkillStatus::Approved))
        .into_iter()
        .map(|s| json!({"slug": s.slug, "name": s.name, "description": s.description}))
        .collect();

    Ok(Json(json!({
        "level": level,
        "token_budget": token_budget,
        "tokens_used": tokens_used,
        "truncated": truncated,
        "tools": disclosed,
        "skills": skills,
        "catalog_cost_tokens": state.tools.catalog_cost_tokens(),
    })))
}

/// `POST /skills/import`
pub async fn import_skill(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SkillImportRequest>,
) -> ApiResult<Json<Value>> {
    let record = state.skills.import(request).await?;
    Ok(Json(json!({"status": "pending", "skill": record})))
}

/// `GET /skills`
pub async fn list_skills(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({"skills": state.skills.list(None)}))
}

/// `GET /skills/:slug`
pub async fn get_skill(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> ApiResult<Json<Value>> {
    Ok(Json(serde_json::to_value(state.skills.get(&slug)?).map_err(Error::from)?))
}

#[derive(Debug, Deserialize)]
pub struct SkillApprovalRequest {
    #[serde(default = "default_approved")]
    approved: bool,
}

fn default_approved() -> bool {
    true
}

/// `POST /skills/:slug/approve`
pub async fn approve_skill(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Json(request): Json<SkillApprovalRequest>,
) -> ApiResult<Json<Value>> {
    let status = if request.approved {
        SkillStatus::Approved
    } else {
        SkillStatus::Rejected
    };
    let record = state.skills.set_status(&slug, status)?;
    Ok(Json(json!({"status": record.status, "slug": record.slug})))
}

/// `GET /federation/servers`
pub async fn list_federation(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({"servers": state.federation.list().await}))
}

/// `POST /federation/servers`
pub async fn upsert_federation(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FederationUpsert>,
) -> ApiResult<Json<Value>> {
    let record = state.federation.upsert(request).await?;
    Ok(Json(json!({"status": "ok", "server": record})))
}

/// Whitelisted services for `/reload-model`.
const RELOAD_ALLOWLIST: [(&str, &str); 2] = [
    ("llama-cpp", "llama-cpp.service"),
    ("ai-embeddings", "ai-embeddings.service"),
];

#[derive(Debug, Deserialize, Default)]
pub struct ReloadModelRequest {
    #[serde(default)]
    service: Option<String>,
}

/// `POST /reload-model`: restart a whitelisted supervised service.
pub async fn reload_model(
    State(state): State<Arc<AppState>>,
    body: Option<Json<ReloadModelRequest>>,
) -> ApiResult<Json<Value>> {
    let service = body
        .and_then(|Json(r)| r.service)
        .unwrap_or_else(|| "llama-cpp".to_string());
    let unit = RELOAD_ALLOWLIST
        .iter()
        .find(|(name, _)| *name == service)
        .map(|(_, unit)| *unit)
        .ok_or_else(|| Error::Validation(format!("service {service} not in allowlist")))?;

    state.supervisor.restart(unit).await?;
    Ok(Json(json!({
        "status": "restarting",
        "service": unit,
        "note": "service will be unavailable briefly",
    })))
}

/// Legacy `/vllm/*` endpoints are permanently gone and must not be
/// re-implemented.
pub async fn vllm_gone() -> ApiResult<Json<Value>> {
    Err(Error::Gone("the /vllm endpoints were removed".to_string()).into())
}
