//! MCP tool surface.
//!
//! A registry of tool-name → handler with JSON-schema manifests; dispatch
//! validates required arguments before invocation and writes an audit record
//! for every call. No reflection; every tool is wired explicitly.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use coordinator_core::error::{Error, Result};
use coordinator_core::types::Outcome;

use crate::actions::{self, QueryParams};
use crate::http::error::ApiResult;
use crate::state::AppState;

fn string_arg(arguments: &Value, key: &str) -> Result<String> {
    arguments[key]
        .as_str()
        .map(str::to_string)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Validation(format!("{key} is required")))
}

fn optional_string_list(arguments: &Value, key: &str) -> Option<Vec<String>> {
    arguments[key].as_array().map(|items| {
        items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    })
}

fn query_schema(extra_required: &[&str]) -> Value {
    let mut required = vec!["query"];
    required.extend_from_slice(extra_required);
    json!({
        "type": "object",
        "properties": {
            "query": {"type": "string"},
        },
        "required": required,
    })
}

/// Tool manifests exposed to MCP clients.
#[must_use]
pub fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "augment_query",
            "description": "Augment a query with relevant context from the local knowledge base",
            "inputSchema": query_schema(&[]),
        }),
        json!({
            "name": "route_search",
            "description": "Route a query: answer locally above the confidence threshold, else return context for escalation",
            "inputSchema": json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "prefer_local": {"type": "boolean", "default": true},
                    "generate_response": {"type": "boolean", "default": false},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 50},
                    "score_threshold": {"type": "number"},
                },
                "required": ["query"],
            }),
        }),
        json!({
            "name": "search_context",
            "description": "Semantic search over one collection",
            "inputSchema": json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "collection": {"type": "string"},
                    "limit": {"type": "integer"},
                },
                "required": ["query", "collection"],
            }),
        }),
        json!({
            "name": "hybrid_search",
            "description": "Expanded multi-collection search with reranking",
            "inputSchema": json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "collections": {"type": "array", "items": {"type": "string"}},
                    "limit": {"type": "integer"},
                    "score_threshold": {"type": "number"},
                },
                "required": ["query"],
            }),
        }),
        json!({
            "name": "track_interaction",
            "description": "Record a query/response exchange for learning",
            "inputSchema": json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "response": {"type": "string"},
                    "model_used": {"type": "string"},
                    "context_ids": {"type": "array", "items": {"type": "string"}},
                    "outcome": {"type": "string", "enum": ["success", "partial", "failure", "unknown"]},
                    "tokens_used": {"type": "integer"},
                    "latency_ms": {"type": "integer"},
                },
                "required": ["query", "response"],
            }),
        }),
        json!({
            "name": "update_outcome",
            "description": "Set the outcome and feedback of a tracked interaction",
            "inputSchema": json!({
                "type": "object",
                "properties": {
                    "interaction_id": {"type": "string"},
                    "outcome": {"type": "string", "enum": ["success", "partial", "failure", "unknown"]},
                    "user_feedback": {"type": "integer", "minimum": -1, "maximum": 1},
                },
                "required": ["interaction_id", "outcome"],
            }),
        }),
        json!({
            "name": "store_agent_memory",
            "description": "Store an agent memory record",
            "inputSchema": json!({
                "type": "object",
                "properties": {
                    "memory_type": {"type": "string"},
                    "summary": {"type": "string"},
                    "content": {"type": "string"},
                    "metadata": {"type": "object"},
                },
                "required": ["memory_type", "summary"],
            }),
        }),
        json!({
            "name": "recall_agent_memory",
            "description": "Recall agent memories by semantic search",
            "inputSchema": query_schema(&[]),
        }),
        json!({
            "name": "generate_training_data",
            "description": "Export high-value interactions as a fine-tuning dataset",
            "inputSchema": json!({"type": "object", "properties": {}}),
        }),
        json!({
            "name": "run_harness_eval",
            "description": "Evaluate retrieval and routing quality against expected keywords",
            "inputSchema": json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "expected_keywords": {"type": "array", "items": {"type": "string"}},
                    "max_latency_ms": {"type": "integer"},
                },
                "required": ["query"],
            }),
        }),
        json!({
            "name": "harness_stats",
            "description": "Rolling harness evaluation statistics",
            "inputSchema": json!({"type": "object", "properties": {}}),
        }),
        json!({
            "name": "learning_feedback",
            "description": "Record correction-style feedback for learning",
            "inputSchema": json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "correction": {"type": "string"},
                    "interaction_id": {"type": "string"},
                    "rating": {"type": "integer"},
                    "tags": {"type": "array", "items": {"type": "string"}},
                    "variant": {"type": "string"},
                },
                "required": ["query", "correction"],
            }),
        }),
    ]
}

/// Seed the registry catalog from the MCP tool manifests.
///
/// Used when neither the disk cache nor an operator-managed catalog has
/// populated the registry yet.
pub fn seed_tool_catalog(tools: &coordinator_core::registry::ToolRegistry) {
    for definition in tool_definitions() {
        if let (Some(name), Some(description)) = (
            definition["name"].as_str(),
            definition["description"].as_str(),
        ) {
            tools.register(coordinator_core::types::ToolDefinition {
                name: name.to_string(),
                description: description.to_string(),
                manifest: definition["inputSchema"].clone(),
                cost_estimate_tokens: 1_500,
            });
        }
    }
}

/// Dispatch one tool call.
pub async fn dispatch(state: &Arc<AppState>, name: &str, arguments: &Value) -> Result<Value> {
    match name {
        "augment_query" => actions::augment_query(state, &string_arg(arguments, "query")?).await,
        "route_search" => {
            let params = QueryParams {
                prompt: None,
                query: Some(string_arg(arguments, "query")?),
                prefer_local: arguments["prefer_local"].as_bool(),
                limit: arguments["limit"].as_u64().map(|v| v as usize),
                keyword_limit: arguments["keyword_limit"].as_u64().map(|v| v as usize),
                score_threshold: arguments["score_threshold"].as_f64().map(|v| v as f32),
                generate_response: arguments["generate_response"].as_bool(),
            };
            actions::run_query(state, &params).await
        }
        "search_context" => {
            let collection = vec![string_arg(arguments, "collection")?];
            actions::hybrid_search(
                state,
                &string_arg(arguments, "query")?,
                Some(&collection),
                arguments["limit"].as_u64().unwrap_or(5) as usize,
                Some(0.5),
            )
            .await
        }
        "hybrid_search" => {
            actions::hybrid_search(
                state,
                &string_arg(arguments, "query")?,
                optional_string_list(arguments, "collections").as_ref(),
                arguments["limit"].as_u64().unwrap_or(5) as usize,
                arguments["score_threshold"].as_f64().map(|v| v as f32),
            )
            .await
        }
        "track_interaction" => {
            let outcome: Outcome = arguments["outcome"]
                .as_str()
                .and_then(|s| serde_json::from_value(json!(s)).ok())
                .unwrap_or_default();
            let interaction_id = state
                .tracker
                .track_interaction(
                    &string_arg(arguments, "query")?,
                    arguments["response"].as_str().unwrap_or_default(),
                    coordinator_core::types::AgentClass::Remote,
                    arguments["model_used"].as_str().unwrap_or("unknown"),
                    optional_string_list(arguments, "context_ids").unwrap_or_default(),
                    outcome,
                    0,
                    arguments["tokens_used"].as_u64().unwrap_or(0) as u32,
                    arguments["latency_ms"].as_u64().unwrap_or(0),
                )
                .await?;
            Ok(json!({"interaction_id": interaction_id}))
        }
        "update_outcome" => {
            let outcome: Outcome = arguments["outcome"]
                .as_str()
                .and_then(|s| serde_json::from_value(json!(s)).ok())
                .ok_or_else(|| Error::Validation("outcome is required".to_string()))?;
            let value_score = state
                .tracker
                .update_outcome(
                    &string_arg(arguments, "interaction_id")?,
                    outcome,
                    arguments["user_feedback"].as_i64().unwrap_or(0) as i8,
                )
                .await?;
            Ok(json!({"status": "updated", "value_score": value_score}))
        }
        "store_agent_memory" => {
            actions::store_memory(
                state,
                &string_arg(arguments, "memory_type")?,
                &string_arg(arguments, "summary")?,
                arguments["content"].as_str(),
                Some(arguments["metadata"].clone()),
            )
            .await
        }
        "recall_agent_memory" => {
            actions::recall_memory(
                state,
                &string_arg(arguments, "query")?,
                optional_string_list(arguments, "memory_types").as_ref(),
                arguments["limit"].as_u64().unwrap_or(5) as usize,
            )
            .await
        }
        "generate_training_data" => {
            let (path, count) = state.tracker.generate_fine_tuning_dataset().await?;
            Ok(json!({"dataset_path": path, "examples": count}))
        }
        "run_harness_eval" => {
            actions::run_harness_eval(
                state,
                &string_arg(arguments, "query")?,
                &optional_string_list(arguments, "expected_keywords").unwrap_or_default(),
                arguments["max_latency_ms"].as_u64(),
            )
            .await
        }
        "harness_stats" => Ok(state.harness.snapshot()),
        "learning_feedback" => {
            let feedback_id = state
                .tracker
                .record_correction_feedback(
                    &string_arg(arguments, "query")?,
                    &string_arg(arguments, "correction")?,
                    arguments["interaction_id"].as_str().map(str::to_string),
                    arguments["rating"].as_i64().map(|v| v as i8),
                    optional_string_list(arguments, "tags").unwrap_or_default(),
                    arguments["model"].as_str().map(str::to_string),
                    arguments["variant"].as_str().map(str::to_string),
                )
                .await?;
            Ok(json!({"status": "recorded", "feedback_id": feedback_id}))
        }
        _ => Err(Error::NotFound(format!("tool {name}"))),
    }
}

/// Dispatch with audit accounting; the audit record is written whether the
/// call succeeds or fails.
pub async fn dispatch_with_audit(
    state: &Arc<AppState>,
    name: &str,
    caller: &str,
    arguments: &Value,
) -> Result<Value> {
    let started = Instant::now();
    let result = dispatch(state, name, arguments).await;
    let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;
    match &result {
        Ok(_) => state
            .audit
            .record(name, caller, arguments, "success", None, latency_ms),
        Err(err) => state.audit.record(
            name,
            caller,
            arguments,
            "error",
            Some(&err.to_string()),
            latency_ms,
        ),
    }
    result
}

/// `GET /mcp/tools`
pub async fn list_tools(State(_state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({"tools": tool_definitions()}))
}

#[derive(Debug, serde::Deserialize)]
pub struct McpCallRequest {
    name: String,
    #[serde(default)]
    arguments: Value,
    #[serde(default)]
    caller: Option<String>,
}

/// `POST /mcp/call`
pub async fn call(
    State(state): State<Arc<AppState>>,
    Json(request): Json<McpCallRequest>,
) -> ApiResult<Json<Value>> {
    let caller = request.caller.as_deref().unwrap_or("anonymous");
    let result = dispatch_with_audit(&state, &request.name, caller, &request.arguments).await?;
    Ok(Json(json!({"tool": request.name, "result": result})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordinator_core::registry::ToolRegistry;
    use coordinator_core::types::DisclosureMode;

    #[test]
    fn test_every_tool_carries_a_manifest() {
        for definition in tool_definitions() {
            assert!(definition["name"].is_string(), "tool without a name");
            assert!(
                definition["description"].is_string(),
                "{} lacks a description",
                definition["name"]
            );
            assert_eq!(
                definition["inputSchema"]["type"], "object",
                "{} manifest is not an object schema",
                definition["name"]
            );
        }
    }

    #[test]
    fn test_seed_catalog_registers_all_tools() {
        let registry = ToolRegistry::new("unused.json", None);
        seed_tool_catalog(&registry);
        assert_eq!(registry.len(), tool_definitions().len());

        let listed = registry
            .get_tools(DisclosureMode::Full, None)
            .expect("full disclosure without a configured key");
        assert!(listed.iter().any(|t| t.name == "hybrid_search"));
        assert!(listed.iter().any(|t| t.name == "route_search"));
    }
}
