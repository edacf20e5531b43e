//! Per-client sliding-window rate limiting.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::types::RateLimitConfig;

const WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window limiter enforced on mutating endpoints.
///
/// For any client, at most `rpm` requests pass in any 60-second window; the
/// `(rpm + 1)`-th request is rejected with a retry hint.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request for a client, rejecting it when the window is full.
    pub fn check(&self, client_id: &str) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let window = windows.entry(client_id.to_string()).or_default();

        while let Some(front) = window.front() {
            if now.duration_since(*front) > WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.config.rpm as usize {
            let retry_after = window
                .front()
                .map_or(WINDOW, |oldest| WINDOW.saturating_sub(now.duration_since(*oldest)));
            return Err(Error::RateLimitExceeded {
                client: client_id.to_string(),
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }

        window.push_back(now);
        Ok(())
    }

    /// Drop window state for clients idle longer than the window.
    pub fn cleanup_stale(&self) {
        let now = Instant::now();
        self.windows.lock().retain(|_, window| {
            window
                .back()
                .is_some_and(|last| now.duration_since(*last) <= WINDOW)
        });
    }

    /// Number of clients currently tracked.
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.windows.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_rpm_then_rejects() {
        let limiter = SlidingWindowLimiter::new(RateLimitConfig {
            enabled: true,
            rpm: 5,
        });
        for _ in 0..5 {
            assert!(limiter.check("client-a").is_ok());
        }
        let err = limiter.check("client-a").unwrap_err();
        assert_eq!(err.kind(), "rate_limit_exceeded");
        assert_eq!(err.http_status(), 429);
    }

    #[test]
    fn test_clients_are_independent() {
        let limiter = SlidingWindowLimiter::new(RateLimitConfig {
            enabled: true,
            rpm: 1,
        });
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("b").is_ok());
        assert!(limiter.check("a").is_err());
    }

    #[test]
    fn test_disabled_limiter_passes_everything() {
        let limiter = SlidingWindowLimiter::new(RateLimitConfig {
            enabled: false,
            rpm: 1,
        });
        for _ in 0..100 {
            assert!(limiter.check("client").is_ok());
        }
    }
}
