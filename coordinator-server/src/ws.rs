//! WebSocket surface.
//!
//! Mirrors a subset of the HTTP actions. Messages are JSON objects with an
//! `action` field, authenticated via an `api_key` field in the body and
//! rate-limited per `client_id`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use serde_json::{json, Value};
use tracing::{debug, warn};

use coordinator_core::registry::SkillImportRequest;
use coordinator_core::types::{DisclosureMode, SkillStatus};
use coordinator_core::Error;

use crate::actions;
use crate::state::AppState;

/// `GET /ws`
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| serve_socket(state, socket))
}

async fn serve_socket(state: Arc<AppState>, mut socket: WebSocket) {
    while let Some(message) = socket.recv().await {
        let message = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let response = handle_message(&state, &message).await;
        let payload = match serde_json::to_string(&response) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "ws response serialization failed");
                continue;
            }
        };
        if socket.send(Message::Text(payload)).await.is_err() {
            break;
        }
    }
    debug!("ws connection closed");
}

async fn handle_message(state: &Arc<AppState>, raw: &str) -> Value {
    let request: Value = match serde_json::from_str(raw) {
        Ok(request) => request,
        Err(_) => return error_payload(&Error::Validation("invalid JSON message".to_string())),
    };
    let action = request["action"].as_str().unwrap_or_default().to_string();
    let request_id = request["request_id"].clone();

    match process_action(state, &action, &request).await {
        Ok(mut body) => {
            if let Some(object) = body.as_object_mut() {
                object.insert("action".to_string(), json!(action));
                object.insert("request_id".to_string(), request_id);
            }
            body
        }
        Err(err) => {
            let mut body = error_payload(&err);
            body["action"] = json!(action);
            body["request_id"] = request_id;
            body
        }
    }
}

fn error_payload(err: &Error) -> Value {
    json!({
        "status": "error",
        "error": err.kind(),
        "detail": err.to_string(),
    })
}

async fn process_action(
    state: &Arc<AppState>,
    action: &str,
    request: &Value,
) -> coordinator_core::Result<Value> {
    // Per-client rate limiting precedes auth so abusive clients are shed
    // cheaply.
    let client_id = request["client_id"].as_str().unwrap_or("anonymous");
    state.limiter.check(client_id)?;

    if let Some(expected) = &state.config.api_key {
        let presented = request["api_key"].as_str().unwrap_or_default();
        if presented != expected {
            return Err(Error::Unauthorized("invalid or missing api_key".to_string()));
        }
    }

    match action {
        "discover_tools" => {
            let mode = match request["mode"].as_str() {
                Some("full") => DisclosureMode::Full,
                _ => DisclosureMode::Minimal,
            };
            let tools = state.tools.get_tools(mode, request["api_key"].as_str())?;
            Ok(json!({"status": "ok", "tools": tools}))
        }
        "semantic_search" => {
            let query = request["query"]
                .as_str()
                .ok_or_else(|| Error::Validation("query is required".to_string()))?;
            let collections: Option<Vec<String>> = request["collections"].as_array().map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            });
            let limit = request["limit"].as_u64().unwrap_or(5) as usize;
            let mut body =
                actions::hybrid_search(state, query, collections.as_ref(), limit, Some(0.5))
                    .await?;
            body["status"] = json!("ok");
            Ok(body)
        }
        "discover_skills" | "list_skills" => {
            let skills = state.skills.list(Some(SkillStatus::Approved));
            Ok(json!({"status": "ok", "skills": skills}))
        }
        "get_skill" => {
            let slug = request["slug"]
                .as_str()
                .ok_or_else(|| Error::Validation("slug is required".to_string()))?;
            Ok(json!({"status": "ok", "skill": state.skills.get(slug)?}))
        }
        "import_skill" => {
            let import: SkillImportRequest =
                serde_json::from_value(request.clone()).map_err(Error::from)?;
            let record = state.skills.import(import).await?;
            Ok(json!({"status": "pending", "skill": record}))
        }
        _ => Err(Error::NotFound(format!("action {action}"))),
    }
}
