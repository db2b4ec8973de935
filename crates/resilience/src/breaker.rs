//! Circuit breaker protecting a single external dependency.
//!
//! `closed` passes calls through and counts consecutive failures; after
//! `failure_threshold` of them the breaker is `open` and fails fast.
//! Once `reset_timeout` elapses, one trial call is allowed (`half-open`);
//! its outcome decides between closing and re-opening with a fresh
//! cool-down clock. State is in-memory and per-instance; a process
//! restart resets it to `closed`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use thumbpilot_core::config::BreakerConfig;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation; calls pass through.
    Closed,
    /// Too many consecutive failures; calls are rejected.
    Open,
    /// Cool-down elapsed; one trial call is allowed.
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Cool-down before a trial call is allowed.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&BreakerConfig> for CircuitBreakerConfig {
    fn from(cfg: &BreakerConfig) -> Self {
        Self {
            failure_threshold: cfg.failure_threshold,
            reset_timeout: Duration::from_millis(cfg.reset_timeout_ms),
        }
    }
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: parking_lot::Mutex<CircuitState>,
    failure_count: AtomicU32,
    opened_at: parking_lot::Mutex<Option<DateTime<Utc>>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: parking_lot::Mutex::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            opened_at: parking_lot::Mutex::new(None),
        }
    }

    /// Whether a call may proceed. Transitions `open -> half-open` when
    /// the cool-down has elapsed; the caller making that trial call must
    /// report its outcome via `record_success`/`record_failure`.
    pub fn allow_request(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let opened = self.opened_at.lock();
                if let Some(opened_at) = *opened {
                    let elapsed = (Utc::now() - opened_at)
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    if elapsed >= self.config.reset_timeout {
                        *state = CircuitState::HalfOpen;
                        info!("circuit breaker transitioning to half-open");
                        return true;
                    }
                }
                false
            }
            CircuitState::HalfOpen => true,
        }
    }

    /// A success in any state clears the failure count and closes.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        self.failure_count.store(0, Ordering::Relaxed);
        if *state != CircuitState::Closed {
            info!("circuit breaker closed after recovery");
        }
        *state = CircuitState::Closed;
        *self.opened_at.lock() = None;
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        match *state {
            CircuitState::Closed => {
                let count = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
                if count >= self.config.failure_threshold {
                    *state = CircuitState::Open;
                    *self.opened_at.lock() = Some(Utc::now());
                    warn!(failures = count, "circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                // The trial call failed; restart the cool-down clock.
                *state = CircuitState::Open;
                *self.opened_at.lock() = Some(Utc::now());
                warn!("circuit breaker re-opened from half-open");
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        *self.state.lock()
    }
}
