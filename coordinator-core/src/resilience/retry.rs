//! Retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::error::{Error, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Multiply each delay by a uniform random factor in [0.5, 1.5].
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    #[must_use]
    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }
}

/// Retry policy executing an operation with exponential backoff.
///
/// Non-recoverable errors bypass retry immediately; the final attempt
/// re-raises. An open circuit breaker short-circuits all remaining attempts
/// so the policy composes cleanly around breaker-protected calls.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before the retry following attempt `attempt` (0-based):
    /// `min(max_delay, base_delay * backoff_factor^attempt)`, jittered.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.config.base_delay.as_secs_f64() * self.config.backoff_factor.powi(
            i32::try_from(attempt).unwrap_or(i32::MAX),
        );
        let capped = exp.min(self.config.max_delay.as_secs_f64());
        let jittered = if self.config.jitter {
            capped * (0.5 + rand::random::<f64>())
        } else {
            capped
        };
        Duration::from_secs_f64(jittered.max(0.0))
    }

    /// Execute an operation, retrying recoverable failures.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.config.max_attempts.max(1);
        let mut last_err: Option<Error> = None;

        for attempt in 0..attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let breaker_open = matches!(err, Error::BreakerOpen { .. });
                    if !err.is_recoverable() || breaker_open || attempt + 1 >= attempts {
                        if breaker_open {
                            warn!(error = %err, "breaker open, abandoning remaining attempts");
                        }
                        return Err(err);
                    }
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, retrying"
                    );
                    last_err = Some(err);
                    sleep(delay).await;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Internal("retry loop exhausted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            RetryConfig::new()
                .with_max_attempts(max_attempts)
                .with_base_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(5))
                .without_jitter(),
        )
    }

    #[tokio::test]
    async fn test_retries_recoverable_until_success() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy(5);
        let result = policy
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Error::Timeout("slow upstream".to_string()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.ok(), Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_recoverable_bypasses_retry() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy(5);
        let err = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Error::Validation("nope".to_string())) }
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_breaker_short_circuits_remaining_attempts() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy(5);
        let err = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(Error::BreakerOpen {
                        service: "qdrant".to_string(),
                        retry_after_secs: 30,
                    })
                }
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "breaker_open");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_final_attempt_reraises() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy(3);
        let err = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Error::Timeout("always".to_string())) }
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::new(
            RetryConfig::new()
                .with_base_delay(Duration::from_secs(1))
                .with_max_delay(Duration::from_secs(4))
                .without_jitter(),
        );
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        // Capped at max_delay from here on.
        assert_eq!(policy.delay_for_attempt(6), Duration::from_secs(4));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy::new(
            RetryConfig::new()
                .with_base_delay(Duration::from_secs(2))
                .with_max_delay(Duration::from_secs(2)),
        );
        for _ in 0..100 {
            let d = policy.delay_for_attempt(0).as_secs_f64();
            assert!((1.0..=3.0).contains(&d), "jittered delay out of band: {d}");
        }
    }
}
