//! HTTP error envelope.
//!
//! Every user-visible error carries a stable machine-readable kind and a
//! correlation `error_id`; stack detail stays in the server logs.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use coordinator_core::Error;

/// Wrapper mapping core errors onto JSON responses.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_id = Uuid::new_v4();
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(%error_id, error = %self.0, "request failed");
        } else {
            tracing::debug!(%error_id, error = %self.0, "request rejected");
        }

        let mut body = json!({
            "error": self.0.kind(),
            "detail": self.0.to_string(),
            "error_id": error_id,
        });
        match &self.0 {
            Error::BreakerOpen {
                retry_after_secs, ..
            }
            | Error::RateLimitExceeded {
                retry_after_secs, ..
            } => {
                body["retry_after_secs"] = json!(retry_after_secs);
            }
            Error::ModelLoading {
                queue_depth,
                queue_max,
            } => {
                body["queue_depth"] = json!(queue_depth);
                body["queue_max"] = json!(queue_max);
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

/// Handler result alias.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping_carries_kind_and_status() {
        let response = ApiError(Error::Validation("query required".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ApiError(Error::ModelLoading {
            queue_depth: 3,
            queue_max: 32,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = ApiError(Error::Gone("/vllm/generate".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::GONE);
    }
}
