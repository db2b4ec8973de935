//! Resilience primitives guarding every call into flaky, quota-limited
//! external dependencies: retry with backoff, a FIFO rate limiter, a
//! circuit breaker, and [`DependencyGate`], which composes the three.

pub mod breaker;
pub mod rate_limit;
pub mod retry;

use std::future::Future;

use tracing::warn;

use thumbpilot_core::config::EngineConfig;
use thumbpilot_core::{EngineError, EngineResult};

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use rate_limit::RateLimiter;
pub use retry::{retry, RetryPolicy};

/// One gate per external dependency: retry around circuit-breaker around
/// rate-limiter around the raw call. A failure burst opens the breaker,
/// and because `CircuitOpen` is non-retryable, subsequent calls fail fast
/// instead of re-exhausting their retry budgets.
pub struct DependencyGate {
    name: String,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
    limiter: RateLimiter,
}

impl DependencyGate {
    pub fn new(
        name: impl Into<String>,
        retry: RetryPolicy,
        breaker: CircuitBreaker,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            name: name.into(),
            retry,
            breaker,
            limiter,
        }
    }

    /// Gate for one named dependency, taking all knobs from config.
    pub fn from_config(name: impl Into<String>, cfg: &EngineConfig) -> Self {
        Self::new(
            name,
            RetryPolicy::from(&cfg.retry),
            CircuitBreaker::new(CircuitBreakerConfig::from(&cfg.breaker)),
            RateLimiter::from_config(&cfg.rate_limit),
        )
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Run `op` through the full stack. The attempt loop is inlined here
    /// rather than delegated to [`retry`] so each attempt can consult the
    /// breaker and queue on the limiter with the same borrowed closure.
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut op: F) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if !self.breaker.allow_request() {
                return Err(EngineError::CircuitOpen(self.name.clone()));
            }

            let result = self.limiter.run(&mut op).await;
            match result {
                Ok(value) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(err) => {
                    // Only transient/rate-limit failures count against the
                    // breaker; bad input says nothing about dependency
                    // health.
                    if err.is_retryable() {
                        self.breaker.record_failure();
                    }
                    if err.is_retryable() && attempt < self.retry.max_retries {
                        warn!(
                            dependency = %self.name,
                            op = op_name,
                            attempt = attempt + 1,
                            error = %err,
                            "gated call failed, backing off"
                        );
                        tokio::time::sleep(self.retry.backoff_for_attempt(attempt)).await;
                        attempt += 1;
                    } else {
                        return Err(err);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_gate(failure_threshold: u32, max_retries: u32) -> DependencyGate {
        DependencyGate::new(
            "platform",
            RetryPolicy {
                max_retries,
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
                backoff_multiplier: 2.0,
                jitter: false,
            },
            CircuitBreaker::new(CircuitBreakerConfig {
                failure_threshold,
                reset_timeout: Duration::from_secs(60),
            }),
            RateLimiter::new(Duration::from_millis(0)),
        )
    }

    #[tokio::test]
    async fn test_burst_opens_breaker_and_fails_fast() {
        let gate = fast_gate(2, 5);
        let calls = AtomicU32::new(0);

        let result: EngineResult<()> = gate
            .run("analytics", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(EngineError::Transient("502".into())) }
            })
            .await;

        // Two failures open the breaker; the third attempt is rejected
        // without invoking the operation, well inside the retry budget.
        assert!(matches!(result, Err(EngineError::CircuitOpen(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(gate.breaker_state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_success_passes_through_and_closes() {
        let gate = fast_gate(3, 2);
        let calls = AtomicU32::new(0);

        let result = gate
            .run("video_info", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(EngineError::RateLimited("429".into()))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(gate.breaker_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let gate = fast_gate(5, 5);
        let calls = AtomicU32::new(0);

        let result: EngineResult<()> = gate
            .run("apply_creative", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(EngineError::Unauthorized("no channel grant".into())) }
            })
            .await;

        assert!(matches!(result, Err(EngineError::Unauthorized(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bad_input_does_not_open_breaker() {
        let gate = fast_gate(2, 0);

        // Far more validation failures than the threshold: the dependency
        // is healthy, so the breaker must stay closed and keep admitting.
        for _ in 0..5 {
            let result: EngineResult<()> = gate
                .run("video_info", || async {
                    Err(EngineError::Validation("malformed video id".into()))
                })
                .await;
            assert!(matches!(result, Err(EngineError::Validation(_))));
        }
        assert_eq!(gate.breaker_state(), CircuitState::Closed);
    }
}
