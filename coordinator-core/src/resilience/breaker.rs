//! Circuit breaker fronting each external dependency.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::error::{Error, Result};

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Successes required in half-open before the circuit closes.
    pub success_threshold: u32,
    /// How long an open circuit fails fast before probing recovery.
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl BreakerConfig {
    /// Defaults for the local inference engine: loading the model is
    /// expensive, so trip earlier and recover slower.
    #[must_use]
    pub fn inference() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(120),
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

/// Serializable snapshot for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Seconds until the open circuit probes recovery, when open.
    pub retry_after_secs: Option<u64>,
}

/// Three-state circuit breaker registered per external service.
///
/// Failures are identified by [`Error::is_breaker_failure`]. Other errors
/// are inert while the circuit is closed or open; in half-open they still
/// prove the service reachable and count toward the recovery threshold.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a breaker for a named service.
    #[must_use]
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
            }),
        }
    }

    /// Service name this breaker protects.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute an operation under breaker protection.
    ///
    /// When open and the recovery timeout has not elapsed, fails fast with a
    /// [`Error::BreakerOpen`] carrying the retry-after hint without invoking
    /// the operation.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.before_call()?;
        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) if err.is_breaker_failure() => {
                self.on_failure();
                Err(err)
            }
            Err(err) => {
                // Not a dependency failure; in half-open this still proves
                // the service reachable.
                self.on_pass_through();
                Err(err)
            }
        }
    }

    fn before_call(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::Open {
            let elapsed = inner.last_failure.map_or(Duration::MAX, |t| t.elapsed());
            if elapsed >= self.config.recovery_timeout {
                tracing::info!(breaker = %self.name, "circuit breaker transitioning to half-open");
                inner.state = BreakerState::HalfOpen;
                inner.success_count = 0;
            } else {
                let retry_after = self.config.recovery_timeout - elapsed;
                return Err(Error::BreakerOpen {
                    service: self.name.clone(),
                    retry_after_secs: retry_after.as_secs().max(1),
                });
            }
        }
        Ok(())
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count = 0;
                inner.success_count = 0;
                inner.last_failure = None;
            }
            BreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    tracing::info!(breaker = %self.name, "circuit breaker closing after recovery");
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.last_failure = None;
                }
            }
            BreakerState::Open => {
                tracing::warn!(breaker = %self.name, "success recorded while circuit open");
            }
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Instant::now());
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        "circuit breaker tripped"
                    );
                    inner.state = BreakerState::Open;
                    inner.success_count = 0;
                }
            }
            BreakerState::HalfOpen => {
                tracing::warn!(breaker = %self.name, "recovery probe failed, reopening circuit");
                inner.state = BreakerState::Open;
                inner.success_count = 0;
            }
            BreakerState::Open => {}
        }
    }

    fn on_pass_through(&self) {
        let should_count = {
            let inner = self.inner.lock();
            inner.state == BreakerState::HalfOpen
        };
        if should_count {
            self.on_success();
        }
    }

    /// Force the breaker back to closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure = None;
        tracing::info!(breaker = %self.name, "circuit breaker manually reset");
    }

    /// Current state (for tests and health checks).
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Snapshot for health reporting.
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        let retry_after_secs = match inner.state {
            BreakerState::Open => inner.last_failure.map(|t| {
                self.config
                    .recovery_timeout
                    .saturating_sub(t.elapsed())
                    .as_secs()
            }),
            _ => None,
        };
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            retry_after_secs,
        }
    }
}

/// Registry managing one breaker per external service, with per-service
/// configuration overrides.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    default_config: BreakerConfig,
    overrides: RwLock<HashMap<String, BreakerConfig>>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Create a registry with the given default configuration.
    #[must_use]
    pub fn new(default_config: BreakerConfig) -> Self {
        Self {
            default_config,
            overrides: RwLock::new(HashMap::new()),
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a service-specific configuration.
    ///
    /// Only affects breakers created after the override is set.
    pub fn set_override(&self, service: impl Into<String>, config: BreakerConfig) {
        self.overrides.write().insert(service.into(), config);
    }

    /// Get or create the breaker for a service.
    pub fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(service) {
            return Arc::clone(breaker);
        }
        let mut breakers = self.breakers.write();
        Arc::clone(breakers.entry(service.to_string()).or_insert_with(|| {
            let config = self
                .overrides
                .read()
                .get(service)
                .cloned()
                .unwrap_or_else(|| self.default_config.clone());
            Arc::new(CircuitBreaker::new(service, config))
        }))
    }

    /// State snapshots of every registered breaker.
    #[must_use]
    pub fn all_states(&self) -> HashMap<String, BreakerSnapshot> {
        self.breakers
            .read()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.snapshot()))
            .collect()
    }

    /// Whether any registered breaker is currently open.
    #[must_use]
    pub fn any_open(&self) -> bool {
        self.breakers
            .read()
            .values()
            .any(|b| b.state() == BreakerState::Open)
    }
}
