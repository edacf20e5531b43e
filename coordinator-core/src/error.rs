//! Error types for the coordination plane.
//!
//! Every error carries a stable machine-readable kind used both for the JSON
//! error envelope on the HTTP surface and for retry/breaker classification.

/// Result type alias for coordination-plane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the hybrid coordination plane
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limit exceeded for client {client}")]
    RateLimitExceeded {
        client: String,
        retry_after_secs: u64,
    },

    #[error("circuit breaker open for {service}")]
    BreakerOpen {
        service: String,
        retry_after_secs: u64,
    },

    #[error("upstream error from {service}: {message}")]
    Upstream { service: String, message: String },

    #[error("local model is loading ({queue_depth}/{queue_max} queued)")]
    ModelLoading {
        queue_depth: usize,
        queue_max: usize,
    },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("gone: {0}")]
    Gone(String),

    /// Vector store or KV cache failure.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Unauthorized(_) => "unauthorized",
            Error::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Error::BreakerOpen { .. } => "breaker_open",
            Error::Upstream { .. } => "upstream_error",
            Error::ModelLoading { .. } => "model_loading",
            Error::Timeout(_) => "timeout",
            Error::NotFound(_) => "not_found",
            Error::Gone(_) => "gone",
            Error::Storage(_) | Error::Io(_) => "storage_error",
            Error::Serialization(_) => "serialization_error",
            Error::Configuration(_) => "configuration_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Check if this error is recoverable (can retry with backoff).
    ///
    /// Validation and credential errors propagate immediately; transport and
    /// storage failures are retried per policy. An open breaker is classified
    /// as recoverable so callers can defer rather than abort a batch.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::BreakerOpen { .. }
            | Error::Upstream { .. }
            | Error::ModelLoading { .. }
            | Error::Timeout(_)
            | Error::Storage(_)
            | Error::Io(_) => true,
            Error::Validation(_)
            | Error::Unauthorized(_)
            | Error::RateLimitExceeded { .. }
            | Error::NotFound(_)
            | Error::Gone(_)
            | Error::Serialization(_)
            | Error::Configuration(_)
            | Error::Internal(_) => false,
        }
    }

    /// Whether the circuit breaker counts this error as a dependency failure.
    ///
    /// Only infrastructure-class errors trip a breaker; validation and auth
    /// errors pass through without touching breaker state.
    #[must_use]
    pub fn is_breaker_failure(&self) -> bool {
        matches!(
            self,
            Error::Upstream { .. } | Error::Timeout(_) | Error::Storage(_) | Error::Io(_)
        )
    }

    /// HTTP status code for the user-visible error envelope.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::Unauthorized(_) => 401,
            Error::NotFound(_) => 404,
            Error::Gone(_) => 410,
            Error::RateLimitExceeded { .. } => 429,
            Error::Upstream { .. } => 502,
            Error::BreakerOpen { .. } | Error::ModelLoading { .. } => 503,
            Error::Timeout(_) => 504,
            Error::Storage(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Configuration(_)
            | Error::Internal(_) => 500,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let service = err
            .url()
            .and_then(|u| u.host_str().map(ToString::to_string))
            .unwrap_or_else(|| "upstream".to_string());
        if err.is_timeout() {
            Error::Timeout(format!("{service}: {err}"))
        } else {
            Error::Upstream {
                service,
                message: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_recoverable() {
        let err = Error::Upstream {
            service: "llama-cpp".to_string(),
            message: "connection refused".to_string(),
        };
        assert!(err.is_recoverable());
        assert!(err.is_breaker_failure());
        assert_eq!(err.kind(), "upstream_error");
        assert_eq!(err.http_status(), 502);
    }

    #[test]
    fn test_validation_errors_bypass_retry() {
        let err = Error::Validation("query required".to_string());
        assert!(!err.is_recoverable());
        assert!(!err.is_breaker_failure());
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn test_breaker_open_defers_but_does_not_count_as_failure() {
        let err = Error::BreakerOpen {
            service: "qdrant".to_string(),
            retry_after_secs: 30,
        };
        assert!(err.is_recoverable());
        assert!(!err.is_breaker_failure());
        assert_eq!(err.http_status(), 503);
    }

    #[test]
    fn test_gone_maps_to_410() {
        assert_eq!(Error::Gone("/vllm/generate".to_string()).http_status(), 410);
    }
}
