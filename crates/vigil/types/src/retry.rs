//! Bounded exponential backoff for infrastructure calls.
//!
//! Retries here are invisible to refinement budgets: a call that eventually
//! succeeds costs the rule nothing, and one that never succeeds surfaces as an
//! [`InfrastructureError`] rather than a gate failure.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::InfrastructureError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first call (default: 3).
    pub max_retries: u32,
    /// Delay before the first retry (default: 200ms).
    pub initial_backoff: Duration,
    /// Upper bound on any single delay (default: 5s).
    pub max_backoff: Duration,
    /// Growth factor between delays (default: 2.0).
    pub multiplier: f64,
    /// Deadline for each individual call (default: 30s).
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Delay before retry number `retry` (0-indexed).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let initial_ms = self.initial_backoff.as_millis() as f64;
        let max_ms = self.max_backoff.as_millis() as f64;
        let exp = retry.min(31) as i32;
        let ms = (initial_ms * self.multiplier.max(1.0).powi(exp)).min(max_ms);
        Duration::from_millis(ms.max(0.0) as u64)
    }

    /// Run `call` until it succeeds, fails with a non-retryable error, or the
    /// policy runs out of retries. Each call is bounded by `call_timeout`; a
    /// timeout counts as one failed attempt.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, InfrastructureError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, InfrastructureError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.call_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(InfrastructureError::timeout(
                    operation,
                    format!("no response within {}ms", self.call_timeout.as_millis()),
                )),
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt <= self.max_retries => {
                    let delay = self.backoff_for(attempt - 1);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err.message,
                        "Infrastructure call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.with_attempts(attempt)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            multiplier: 2.0,
            call_timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(0), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(10), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn recovers_from_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = fast_policy()
            .run("ingest", || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(InfrastructureError::unavailable("ingest", "503"))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let err = fast_policy()
            .run("query", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(InfrastructureError::unavailable("query", "refused"))
                }
            })
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn protocol_errors_fail_fast() {
        let err = fast_policy()
            .run("query", || async {
                Err::<(), _>(InfrastructureError::protocol("query", "unparseable body"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_count_as_failed_attempts() {
        let policy = RetryPolicy {
            max_retries: 1,
            call_timeout: Duration::from_secs(1),
            ..fast_policy()
        };
        let err = policy
            .run("refresh", || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, InfrastructureError>(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::InfrastructureKind::Timeout);
        assert_eq!(err.attempts, 2);
    }
}
