//! # Resilience Module
//!
//! Circuit breaker protection for the distributed backends (Redis cache and
//! job broker). Prevents repeated timeout penalties when a backend is
//! unavailable and caps reconnect log noise to state transitions.

pub mod circuit_breaker;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
