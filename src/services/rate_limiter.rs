//! Failed-attempt limiter
//!
//! Sliding-window counter of failures per key. Guards password login
//! (keyed by username) and email code confirmation (keyed by account).

use crate::services::clock::DynClock;
use crate::services::error::ServiceError;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Failures allowed per username before login is refused
pub const LOGIN_MAX_FAILURES: usize = 5;
/// Failures allowed per account before code confirmation is refused
pub const VERIFY_MAX_FAILURES: usize = 5;
/// Window both limits are counted over
pub const FAILURE_WINDOW_MINUTES: i64 = 15;

pub struct AttemptLimiter {
    attempts: RwLock<HashMap<String, Vec<DateTime<Utc>>>>,
    max_failures: usize,
    window: Duration,
    clock: DynClock,
}

impl AttemptLimiter {
    pub fn new(max_failures: usize, window: Duration, clock: DynClock) -> Self {
        Self {
            attempts: RwLock::new(HashMap::new()),
            max_failures,
            window,
            clock,
        }
    }

    /// Fail with `RateLimited` while `key` has used up its failures
    pub async fn check(&self, key: &str) -> Result<(), ServiceError> {
        let now = self.clock.now();
        let cutoff = now - self.window;

        let mut attempts = self.attempts.write().await;
        let Some(times) = attempts.get_mut(key) else {
            return Ok(());
        };
        times.retain(|time| *time > cutoff);

        if times.len() < self.max_failures {
            return Ok(());
        }

        let oldest = times.iter().min().copied().unwrap_or(now);
        let retry_after_secs = (oldest + self.window - now).num_seconds().max(1);
        Err(ServiceError::RateLimited { retry_after_secs })
    }

    pub async fn record_failure(&self, key: &str) {
        let now = self.clock.now();
        self.attempts
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .push(now);
    }

    /// Forget failures for `key` after a success
    pub async fn clear(&self, key: &str) {
        self.attempts.write().await.remove(key);
    }

    /// Drop entries whose failures have all aged out
    pub async fn cleanup(&self) {
        let cutoff = self.clock.now() - self.window;
        self.attempts.write().await.retain(|_, times| {
            times.retain(|time| *time > cutoff);
            !times.is_empty()
        });
    }

    #[cfg(test)]
    async fn tracked_keys(&self) -> usize {
        self.attempts.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::ManualClock;
    use std::sync::Arc;

    fn limiter() -> (AttemptLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let limiter = AttemptLimiter::new(5, Duration::minutes(15), clock.clone());
        (limiter, clock)
    }

    #[tokio::test]
    async fn test_limits_after_max_failures() {
        let (limiter, _clock) = limiter();

        for _ in 0..4 {
            limiter.check("alice").await.unwrap();
            limiter.record_failure("alice").await;
        }
        limiter.check("alice").await.unwrap();
        limiter.record_failure("alice").await;

        assert!(matches!(
            limiter.check("alice").await,
            Err(ServiceError::RateLimited { retry_after_secs: 900 })
        ));
        // Other keys are unaffected
        limiter.check("bob").await.unwrap();

        limiter.clear("alice").await;
        limiter.check("alice").await.unwrap();
    }

    #[tokio::test]
    async fn test_window_slides() {
        let (limiter, clock) = limiter();
        for _ in 0..5 {
            limiter.record_failure("alice").await;
        }
        assert!(limiter.check("alice").await.is_err());

        clock.advance(Duration::minutes(10));
        assert!(matches!(
            limiter.check("alice").await,
            Err(ServiceError::RateLimited { retry_after_secs: 300 })
        ));

        clock.advance(Duration::minutes(5));
        limiter.check("alice").await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_drops_stale_keys() {
        let (limiter, clock) = limiter();
        limiter.record_failure("alice").await;
        clock.advance(Duration::minutes(5));
        limiter.record_failure("bob").await;

        clock.advance(Duration::minutes(11));
        limiter.cleanup().await;
        assert_eq!(limiter.tracked_keys().await, 1);
    }
}
