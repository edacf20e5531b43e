//! Request-id, API-key, and per-route metrics middleware.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use coordinator_core::Error;

use crate::http::error::ApiError;
use crate::state::AppState;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Routes that bypass API-key auth.
fn is_public(path: &str) -> bool {
    path == "/health" || path == "/metrics"
}

/// Propagate or mint `X-Request-ID`, attach it to the response, and record
/// per-route counters and latency.
pub async fn request_id(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| Uuid::new_v4().simple().to_string(), str::to_string);
    let path = request.uri().path().to_string();
    let method = request.method().to_string();
    request.extensions_mut().insert(RequestId(request_id.clone()));

    let start = Instant::now();
    let mut response = next.run(request).await;
    let elapsed = start.elapsed();

    let status = response.status().as_u16().to_string();
    state
        .telemetry
        .counter(
            "http_requests_total",
            &[
                ("route", path.as_str()),
                ("method", method.as_str()),
                ("status", status.as_str()),
            ],
        )
        .increment();
    state
        .telemetry
        .histogram("http_request_latency_seconds", &[("route", path.as_str())])
        .observe(elapsed.as_secs_f64());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Request-id extension value.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Enforce the API key on everything except `/health` and `/metrics` when a
/// key is configured. Accepts `X-API-Key` or `Authorization: Bearer`.
pub async fn api_key(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if is_public(request.uri().path()) {
        return next.run(request).await;
    }
    let Some(expected) = &state.config.api_key else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            request
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_string)
        });

    if presented.as_deref() == Some(expected.as_str()) {
        next.run(request).await
    } else {
        ApiError(Error::Unauthorized("invalid or missing API key".to_string())).into_response()
    }
}

/// Client identity for rate limiting: explicit header, else API key hash,
/// else anonymous.
pub fn client_id(request_headers: &axum::http::HeaderMap) -> String {
    if let Some(id) = request_headers
        .get("x-client-id")
        .and_then(|v| v.to_str().ok())
    {
        return id.to_string();
    }
    if let Some(key) = request_headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
    {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(key.as_bytes());
        return format!("key-{:x}", digest)[..16].to_string();
    }
    "anonymous".to_string()
}
