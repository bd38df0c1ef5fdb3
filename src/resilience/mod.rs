//! # Resilience Module
//!
//! Per-endpoint health tracking. Each upstream endpoint owns one
//! [`CircuitBreaker`]; the endpoint pool consults it when building the
//! fallback order so that a dead provider is skipped instead of retried.

pub mod circuit_breaker;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerMetrics, CircuitState};
