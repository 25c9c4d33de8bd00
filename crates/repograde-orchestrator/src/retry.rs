//! Rate-limit aware retry loop.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::{RateLimitKind, RateLimited, RetryError};

/// Wraps a fallible async call and retries it while it keeps failing on a
/// rate limit.
///
/// Primary limits sleep until the reported reset (plus one second). Secondary
/// limits back off exponentially from [`RetryPolicy::base_delay`], capped at
/// [`RetryPolicy::max_delay`], with jitter on top. The two kinds keep separate
/// budgets. Any other error is returned straight away.
#[derive(Debug, Clone, Default)]
pub struct RateLimitedRetryExecutor {
    policy: RetryPolicy,
}

impl RateLimitedRetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `call` until it succeeds, fails for a non rate-limit reason, or a
    /// retry budget is exhausted.
    pub async fn execute<F, Fut, T, E>(&self, mut call: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RateLimited + Display,
    {
        let mut primary_retries = 0u32;
        let mut secondary_retries = 0u32;

        loop {
            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let delay = match err.rate_limit_kind() {
                None => return Err(RetryError::Call(err)),
                Some(RateLimitKind::Primary { reset }) => {
                    if primary_retries >= self.policy.max_primary_retries {
                        warn!(retries = primary_retries, error = %err, "Primary rate limit retries exhausted");
                        return Err(RetryError::RateLimitExceeded {
                            retries: primary_retries,
                            last: err,
                        });
                    }
                    primary_retries += 1;
                    let delay = primary_wait(reset, Utc::now().timestamp());
                    warn!(
                        attempt = primary_retries,
                        wait_ms = delay.as_millis() as u64,
                        "Primary rate limit hit, waiting for reset"
                    );
                    delay
                }
                Some(RateLimitKind::Secondary { retry_after }) => {
                    if secondary_retries >= self.policy.max_secondary_retries {
                        warn!(retries = secondary_retries, error = %err, "Secondary rate limit retries exhausted");
                        return Err(RetryError::RateLimitExceeded {
                            retries: secondary_retries,
                            last: err,
                        });
                    }
                    let backoff = self.secondary_delay(secondary_retries);
                    secondary_retries += 1;
                    let delay = retry_after.map_or(backoff, |after| after.max(backoff));
                    warn!(
                        attempt = secondary_retries,
                        wait_ms = delay.as_millis() as u64,
                        "Secondary rate limit hit, backing off"
                    );
                    delay
                }
            };

            tokio::time::sleep(delay).await;
            debug!("Retrying rate-limited call");
        }
    }

    /// Backoff before secondary retry number `retry` (zero based), jitter
    /// included.
    pub fn secondary_delay(&self, retry: u32) -> Duration {
        let delay = self.base_backoff(retry);
        let jitter_ms = (delay.as_millis() as f64 * rand::random::<f64>() * self.policy.jitter) as u64;
        delay + Duration::from_millis(jitter_ms)
    }

    fn base_backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(31));
        self.policy
            .base_delay
            .saturating_mul(factor)
            .min(self.policy.max_delay)
    }
}

/// Time to wait for a primary limit resetting at `reset`, seen at `now`
/// (both in seconds since the Unix epoch). Never negative.
pub fn primary_wait(reset: i64, now: i64) -> Duration {
    let secs = reset.saturating_sub(now).saturating_add(1).max(0);
    Duration::from_secs(secs as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use repograde_core::RateLimitState;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::default().with_jitter(0.0)
    }

    #[test]
    fn test_primary_wait() {
        assert_eq!(primary_wait(110, 100), Duration::from_secs(11));
        assert_eq!(primary_wait(100, 100), Duration::from_secs(1));
        assert_eq!(primary_wait(50, 100), Duration::ZERO);
    }

    #[test]
    fn test_secondary_backoff_doubles_and_caps() {
        let executor = RateLimitedRetryExecutor::new(fast_policy());
        assert_eq!(executor.secondary_delay(0), Duration::from_secs(1));
        assert_eq!(executor.secondary_delay(1), Duration::from_secs(2));
        assert_eq!(executor.secondary_delay(3), Duration::from_secs(8));
        assert_eq!(executor.secondary_delay(6), Duration::from_secs(60));
        assert_eq!(executor.secondary_delay(40), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let executor = RateLimitedRetryExecutor::default();
        for _ in 0..50 {
            let delay = executor.secondary_delay(2);
            assert!(delay >= Duration::from_secs(4));
            assert!(delay <= Duration::from_millis(4400));
        }
    }

    #[tokio::test]
    async fn test_non_rate_limit_error_is_not_retried() {
        let executor = RateLimitedRetryExecutor::new(fast_policy());
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ApiError::new("repository is empty")) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Call(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_limit_waits_for_reset_then_succeeds() {
        let executor = RateLimitedRetryExecutor::new(fast_policy());
        let calls = Arc::new(AtomicU32::new(0));
        let reset = Utc::now().timestamp() + 2;
        let started = tokio::time::Instant::now();

        let counter = calls.clone();
        let result = executor
            .execute(move || {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(ApiError::new("API rate limit exceeded")
                            .with_rate_limit(RateLimitState::with_reset(reset)))
                    } else {
                        Ok("graded")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "graded");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_budget_exhausted() {
        let executor = RateLimitedRetryExecutor::new(fast_policy());
        let calls = AtomicU32::new(0);
        let reset = Utc::now().timestamp();

        let result: Result<(), _> = executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    Err(ApiError::new("API rate limit exceeded")
                        .with_rate_limit(RateLimitState::with_reset(reset)))
                }
            })
            .await;

        match result {
            Err(RetryError::RateLimitExceeded { retries, .. }) => assert_eq!(retries, 3),
            other => panic!("expected exhausted budget, got {:?}", other),
        }
        // Initial call plus three retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_secondary_budget_and_backoff() {
        let executor = RateLimitedRetryExecutor::new(fast_policy());
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result: Result<(), _> = executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ApiError::new("secondary rate limit").with_status(403)) }
            })
            .await;

        assert!(matches!(
            result,
            Err(RetryError::RateLimitExceeded { retries: 5, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        // 1 + 2 + 4 + 8 + 16 seconds of backoff.
        assert!(started.elapsed() >= Duration::from_secs(31));
    }
}
