//! Route handlers.

pub mod admin;
pub mod feedback;
pub mod learning;
pub mod query;
pub mod session;
pub mod tasks;

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use coordinator_core::types::Collection;

use crate::state::AppState;

/// `GET /health`: never auth-gated.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let breakers: std::collections::HashMap<String, String> = state
        .breakers
        .all_states()
        .into_iter()
        .map(|(name, snapshot)| {
            (
                name,
                serde_json::to_value(snapshot.state)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_else(|| "unknown".to_string()),
            )
        })
        .collect();

    Json(json!({
        "status": "healthy",
        "service": state.config.service_name,
        "collections": Collection::ALL.iter().map(|c| c.name()).collect::<Vec<_>>(),
        "circuit_breakers": breakers,
        "harness_stats": state.harness.snapshot(),
    }))
}

/// `GET /status`: model, queue, and routing state.
pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (llm_status, loading) = match &state.llm {
        Some(llm) => match llm.health().await {
            Ok(health) => (health.status.clone(), health.is_loading()),
            Err(_) => ("unreachable".to_string(), false),
        },
        None => ("unconfigured".to_string(), false),
    };

    Json(json!({
        "service": state.config.service_name,
        "local_llm": {
            "url": state.config.llama_cpp_url,
            "status": llm_status,
            "loading": loading,
            "queue_depth": state.model_queue.depth(),
            "queue_max": state.model_queue.max(),
        },
        "routing": {
            "threshold": state.config.routing.confidence_threshold,
            "escalation_enabled": state.config.routing.escalation_enabled,
        },
    }))
}

/// `GET /stats`: service-level counters.
pub async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ralph = state.ralph.stats().await;
    Json(json!({
        "status": "ok",
        "service": state.config.service_name,
        "cache": state.cache.stats(),
        "ralph": ralph,
        "harness_stats": state.harness.snapshot(),
        "circuit_breakers": state.breakers.all_states(),
        "rate_limiter_clients": state.limiter.tracked_clients(),
    }))
}

/// `GET /metrics`: Prometheus text exposition.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        state.telemetry.encode_prometheus(),
    )
}

/// Probe endpoints backed by the health subsystem.
pub mod probes {
    use super::{AppState, IntoResponse, Json, State};
    use axum::http::StatusCode;
    use coordinator_core::health::HealthStatus;
    use std::sync::Arc;

    fn to_response(result: coordinator_core::health::HealthCheckResult) -> impl IntoResponse {
        let status = if result.status == HealthStatus::Unhealthy {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::OK
        };
        (status, Json(serde_json::to_value(&result).unwrap_or_default()))
    }

    /// `GET /health/live`
    pub async fn liveness(State(state): State<Arc<AppState>>) -> impl IntoResponse {
        to_response(state.health.liveness_probe().await)
    }

    /// `GET /health/ready`
    pub async fn readiness(State(state): State<Arc<AppState>>) -> impl IntoResponse {
        to_response(state.health.readiness_probe().await)
    }

    /// `GET /health/startup`
    pub async fn startup(State(state): State<Arc<AppState>>) -> impl IntoResponse {
        to_response(state.health.startup_probe().await)
    }

    /// `GET /health/dependency`
    pub async fn dependency(State(state): State<Arc<AppState>>) -> impl IntoResponse {
        to_response(state.health.dependency_probe().await)
    }

    /// `GET /health/performance`
    pub async fn performance(State(state): State<Arc<AppState>>) -> impl IntoResponse {
        to_response(state.health.performance_probe().await)
    }
}
