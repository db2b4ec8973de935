//! Retry with exponential backoff, gated on error classification.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use thumbpilot_core::config::RetryConfig;
use thumbpilot_core::EngineResult;

/// Retry configuration with exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first try.
    pub max_retries: u32,
    /// Initial backoff duration in milliseconds.
    pub initial_backoff_ms: u64,
    /// Maximum backoff duration in milliseconds.
    pub max_backoff_ms: u64,
    /// Backoff multiplier per attempt.
    pub backoff_multiplier: f64,
    /// Whether to add jitter.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            initial_backoff_ms: cfg.initial_backoff_ms,
            max_backoff_ms: cfg.max_backoff_ms,
            backoff_multiplier: cfg.backoff_multiplier,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Compute the backoff duration for a given attempt (0-indexed).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped_ms = base_ms.min(self.max_backoff_ms as f64);

        let final_ms = if self.jitter {
            // Simple deterministic jitter: vary by ±25%
            let jitter_factor = 0.75 + (attempt as f64 * 0.1 % 0.5);
            capped_ms * jitter_factor
        } else {
            capped_ms
        };

        Duration::from_millis(final_ms as u64)
    }
}

/// Run `op`, retrying on errors classified retryable by
/// [`EngineError::is_retryable`]. Non-retryable errors propagate
/// immediately; exhausting the budget propagates the last error. The
/// operation is attempted at most `max_retries + 1` times.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, op_name: &str, mut op: F) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                warn!(
                    op = op_name,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    error = %err,
                    "retryable failure, backing off"
                );
                tokio::time::sleep(policy.backoff_for_attempt(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use thumbpilot_core::EngineError;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_backoff_sequence() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(policy.backoff_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_for_attempt(6), Duration::from_millis(5_000));
    }

    #[tokio::test]
    async fn test_retryable_error_attempted_max_retries_plus_one_times() {
        let calls = AtomicU32::new(0);
        let result: EngineResult<()> = retry(&fast_policy(3), "always-503", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::Transient("503".into())) }
        })
        .await;

        assert!(matches!(result, Err(EngineError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_error_never_retried() {
        let calls = AtomicU32::new(0);
        let result: EngineResult<()> = retry(&fast_policy(3), "bad-input", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::Validation("malformed video id".into())) }
        })
        .await;

        assert!(matches!(result, Err(EngineError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry(&fast_policy(3), "flaky", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(EngineError::RateLimited("quota".into()))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
