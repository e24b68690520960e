//! Retry with exponential backoff for collaborator calls
//!
//! Only faults the collaborator marks as retryable are retried. Everything
//! else is returned to the controller on the first attempt.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::config::OptimizerConfig;
use crate::{Error, Result};

/// Backoff stops doubling after this many attempts
const MAX_BACKOFF_EXPONENT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn from_config(config: &OptimizerConfig) -> Self {
        Self::new(config.max_retries, Duration::from_millis(config.retry_delay_ms))
    }

    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.base_delay * 2u32.pow(exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}

/// Run `operation` until it succeeds, fails permanently, or retries run out
pub async fn call_with_retry<T, F, Fut>(
    policy: RetryPolicy,
    description: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= policy.max_retries => {
                if policy.max_retries == 0 {
                    return Err(e);
                }
                return Err(Error::RetriesExhausted {
                    operation: description.to_string(),
                    attempts: attempt + 1,
                    last_error: e.to_string(),
                });
            }
            Err(e) => {
                attempt += 1;
                let delay = policy.backoff(attempt);
                warn!(
                    "Transient failure in {description}: {e}. Retrying in {delay:?} (attempt {attempt}/{})",
                    policy.max_retries
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1))
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100));
        let delays: Vec<u128> = (1..=6).map(|r| policy.backoff(r).as_millis()).collect();
        assert_eq!(delays, [100, 200, 400, 800, 800, 800]);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = call_with_retry(quick(3), "respond", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::transient("503"))
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_fail_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = call_with_retry(quick(3), "critique", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::permanent("401 invalid key"))
        })
        .await;

        assert!(matches!(result, Err(Error::Provider { retryable: false, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_report_attempts() {
        let result: Result<()> = call_with_retry(quick(2), "refine", || async {
            Err(Error::transient("429 rate limit"))
        })
        .await;

        match result {
            Err(Error::RetriesExhausted {
                operation,
                attempts,
                last_error,
            }) => {
                assert_eq!(operation, "refine");
                assert_eq!(attempts, 3);
                assert!(last_error.contains("429"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
