//! # Circuit Breaker Implementation
//!
//! Classic three-state breaker: Closed (normal operation), Open (skip the
//! endpoint) and Half-Open (let traffic through to test recovery).
//!
//! Unlike a call-wrapping breaker, this one is consulted and fed by the
//! endpoint pool: the fetcher records outcomes after each attempt, and the
//! pool asks [`CircuitBreaker::is_call_permitted`] when ordering endpoints.
//! State lives behind a `parking_lot` mutex because every operation is
//! short and never held across an await.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation
    Closed = 0,
    /// Endpoint is skipped until the open timeout elapses
    Open = 1,
    /// Testing recovery
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }
}

/// Counters exposed for health reporting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u64,
    pub half_open_successes: u64,
}

#[derive(Debug)]
struct BreakerInner {
    metrics: CircuitBreakerMetrics,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    state: AtomicU8,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        debug!(
            component = %name,
            enabled = config.enabled,
            failure_threshold = config.failure_threshold,
            open_timeout_seconds = config.open_timeout_seconds,
            "Circuit breaker initialized"
        );
        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            inner: Mutex::new(BreakerInner {
                metrics: CircuitBreakerMetrics::default(),
                opened_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Whether traffic should be sent to this endpoint now.
    ///
    /// An open breaker whose timeout has elapsed moves to half-open and
    /// permits the call.
    pub fn is_call_permitted(&self) -> bool {
        if !self.config.enabled {
            return true;
        }
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let mut inner = self.inner.lock();
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.open_timeout())
                    .unwrap_or(true);
                if elapsed {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                }
                elapsed
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;
        inner.metrics.success_count += 1;
        inner.metrics.consecutive_failures = 0;

        if self.state() == CircuitState::HalfOpen {
            inner.metrics.half_open_successes += 1;
            if inner.metrics.half_open_successes >= u64::from(self.config.success_threshold) {
                self.transition(&mut inner, CircuitState::Closed);
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;
        inner.metrics.failure_count += 1;
        inner.metrics.consecutive_failures += 1;

        if !self.config.enabled {
            return;
        }
        match self.state() {
            CircuitState::Closed => {
                if inner.metrics.consecutive_failures >= u64::from(self.config.failure_threshold) {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            // Any failure while testing recovery reopens
            CircuitState::HalfOpen => self.transition(&mut inner, CircuitState::Open),
            CircuitState::Open => {}
        }
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.inner.lock().metrics.clone()
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        self.state.store(to as u8, Ordering::Release);
        match to {
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
                inner.metrics.half_open_successes = 0;
                warn!(
                    component = %self.name,
                    consecutive_failures = inner.metrics.consecutive_failures,
                    open_timeout_seconds = self.config.open_timeout_seconds,
                    "Circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                inner.metrics.half_open_successes = 0;
                info!(component = %self.name, "Circuit breaker half-open (testing recovery)");
            }
            CircuitState::Closed => {
                inner.opened_at = None;
                inner.metrics.consecutive_failures = 0;
                inner.metrics.half_open_successes = 0;
                info!(
                    component = %self.name,
                    total_calls = inner.metrics.total_calls,
                    "Circuit breaker closed (recovered)"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(failure_threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            enabled: true,
            failure_threshold,
            open_timeout_seconds: 1,
            success_threshold: 1,
        }
    }

    #[test]
    fn test_opens_after_threshold() {
        let breaker = CircuitBreaker::new("rpc-a", config(2));
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.is_call_permitted());
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let breaker = CircuitBreaker::new("rpc-a", config(2));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().failure_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_through_half_open() {
        let breaker = CircuitBreaker::new("rpc-a", config(1));
        breaker.record_failure();
        assert!(!breaker.is_call_permitted());

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(breaker.is_call_permitted());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("rpc-a", config(1));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(breaker.is_call_permitted());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_disabled_breaker_never_opens() {
        let mut cfg = config(1);
        cfg.enabled = false;
        let breaker = CircuitBreaker::new("rpc-a", cfg);
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.is_call_permitted());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
