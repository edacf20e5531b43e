//! HTTP surface: router assembly and middleware stack.
//!
//! All routes except `/health` and `/metrics` traverse the request-id and
//! API-key middleware; a tracing span wraps every request.

pub mod error;
pub mod handlers;
pub mod middleware;

use std::sync::Arc;

use axum::routing::{any, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/health/live", get(handlers::probes::liveness))
        .route("/health/ready", get(handlers::probes::readiness))
        .route("/health/startup", get(handlers::probes::startup))
        .route("/health/dependency", get(handlers::probes::dependency))
        .route("/health/performance", get(handlers::probes::performance))
        .route("/status", get(handlers::status))
        .route("/stats", get(handlers::stats))
        .route("/metrics", get(handlers::metrics))
        .route("/query", post(handlers::query::query))
        .route("/augment_query", post(handlers::query::augment_query))
        .route("/search/tree", post(handlers::query::tree_search))
        .route("/memory/store", post(handlers::query::memory_store))
        .route("/memory/recall", post(handlers::query::memory_recall))
        .route("/context/multi_turn", post(handlers::session::multi_turn))
        .route(
            "/session/:session_id",
            get(handlers::session::session_info).delete(handlers::session::clear_session),
        )
        .route("/feedback", post(handlers::feedback::feedback))
        .route(
            "/feedback/:interaction_id",
            post(handlers::feedback::simple_feedback),
        )
        .route("/harness/eval", post(handlers::feedback::harness_eval))
        .route("/harness/stats", get(handlers::feedback::harness_stats))
        .route(
            "/discovery/capabilities",
            get(handlers::admin::discover_capabilities)
                .post(handlers::admin::discover_capabilities),
        )
        .route("/skills", get(handlers::admin::list_skills))
        .route("/skills/import", post(handlers::admin::import_skill))
        .route("/skills/:slug", get(handlers::admin::get_skill))
        .route("/skills/:slug/approve", post(handlers::admin::approve_skill))
        .route(
            "/federation/servers",
            get(handlers::admin::list_federation).post(handlers::admin::upsert_federation),
        )
        .route("/learning/stats", get(handlers::learning::learning_stats))
        .route("/learning/issues", get(handlers::learning::learning_issues))
        .route("/learning/process", post(handlers::learning::learning_process))
        .route("/learning/export", post(handlers::learning::learning_export))
        .route(
            "/learning/ab_compare",
            post(handlers::learning::learning_ab_compare),
        )
        .route("/proposals/apply", post(handlers::learning::apply_proposal))
        .route("/reload-model", post(handlers::admin::reload_model))
        .route("/tasks", post(handlers::tasks::submit_task))
        .route("/tasks/stats", get(handlers::tasks::task_stats))
        .route("/tasks/:task_id", get(handlers::tasks::task_status))
        .route("/tasks/:task_id/approve", post(handlers::tasks::approve_task))
        .route("/tasks/:task_id/stop", post(handlers::tasks::stop_task))
        .route("/mcp/tools", get(crate::mcp::list_tools))
        .route("/mcp/call", post(crate::mcp::call))
        .route("/ws", get(crate::ws::ws_handler))
        .route("/vllm", any(handlers::admin::vllm_gone))
        .route("/vllm/*rest", any(handlers::admin::vllm_gone))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::api_key,
        ))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::request_id,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
