//! Health check types.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;

/// Health check status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// Health check types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    /// Is the service alive (not deadlocked)?
    Liveness,
    /// Is the service ready to accept traffic?
    Readiness,
    /// Has the service finished starting up?
    Startup,
    /// Are dependencies healthy (no degraded distinction)?
    Dependency,
    /// Process resource pressure.
    Performance,
}

impl CheckType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CheckType::Liveness => "liveness",
            CheckType::Readiness => "readiness",
            CheckType::Startup => "startup",
            CheckType::Dependency => "dependency",
            CheckType::Performance => "performance",
        }
    }
}

/// Result of a health check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub check_type: CheckType,
    pub message: String,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: f64,
}

/// Async predicate probing one dependency.
pub type CheckFn = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

/// A registered dependency health check.
#[derive(Clone)]
pub struct DependencyCheck {
    pub name: String,
    pub check: CheckFn,
    /// If true, failure makes the service unhealthy instead of degraded.
    pub critical: bool,
    pub timeout: Duration,
    /// Weight in the composite health score.
    pub weight: f64,
}

impl DependencyCheck {
    /// Register a dependency check from an async closure.
    pub fn new<F, Fut>(name: impl Into<String>, critical: bool, check: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = bool> + Send + 'static,
    {
        Self {
            name: name.into(),
            check: Arc::new(move || Box::pin(check())),
            critical,
            timeout: Duration::from_secs(5),
            weight: 1.0,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

impl std::fmt::Debug for DependencyCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyCheck")
            .field("name", &self.name)
            .field("critical", &self.critical)
            .field("timeout", &self.timeout)
            .field("weight", &self.weight)
            .finish_non_exhaustive()
    }
}
