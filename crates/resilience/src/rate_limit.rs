//! FIFO rate limiter — serializes calls to one shared dependency and
//! enforces a minimum gap between them.
//!
//! Unlike a counter-based throttle, callers here queue and await their
//! result. The fair async mutex gives strict FIFO ordering and one
//! in-flight call at a time per limiter instance; the inter-call interval
//! is measured from the end of the previous call, so a slow call never
//! earns a head start for the next one.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use thumbpilot_core::config::RateLimitConfig;

pub struct RateLimiter {
    min_interval: Duration,
    last_call_end: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call_end: Mutex::new(None),
        }
    }

    pub fn from_config(cfg: &RateLimitConfig) -> Self {
        Self::new(Duration::from_millis(cfg.min_interval_ms))
    }

    /// Queue behind earlier callers, wait out the remaining interval, run
    /// the call, and stamp its end time. The lock is held across the call
    /// so at most one wrapped operation is ever in flight.
    pub async fn run<T, F, Fut>(&self, op: &mut F) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut last_end = self.last_call_end.lock().await;
        if let Some(prev_end) = *last_end {
            let elapsed = prev_end.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        let out = op().await;
        *last_end = Some(Instant::now());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_enforces_minimum_interval_from_call_end() {
        let limiter = RateLimiter::new(Duration::from_millis(50));

        let start = Instant::now();
        limiter.run(&mut || async { 1u32 }).await;
        limiter.run(&mut || async { 2u32 }).await;
        limiter.run(&mut || async { 3u32 }).await;

        // Two enforced gaps of >= 50ms between the three calls.
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_single_flight_and_fifo_completion() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(1)));
        let in_flight = Arc::new(AtomicU32::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4u32 {
            let limiter = limiter.clone();
            let in_flight = in_flight.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .run(&mut || {
                        let in_flight = in_flight.clone();
                        let order = order.clone();
                        async move {
                            let concurrent = in_flight.fetch_add(1, Ordering::SeqCst);
                            assert_eq!(concurrent, 0, "overlapping in-flight call");
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            order.lock().await.push(i);
                            in_flight.fetch_sub(1, Ordering::SeqCst);
                        }
                    })
                    .await;
            }));
            // Stagger arrival so queue order is deterministic.
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().await, vec![0, 1, 2, 3]);
    }
}
