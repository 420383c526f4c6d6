//! # Circuit Breaker Implementation
//!
//! Classic three-state circuit breaker: Closed (normal operation), Open
//! (failing fast), and HalfOpen (testing recovery). Callers check
//! `should_allow()` before an operation and record the outcome afterwards;
//! the breaker never executes operations itself, which keeps it usable from
//! both the cache and the broker without generic plumbing.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - limited calls allowed to probe backend health
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            2 => CircuitState::HalfOpen,
            // Default to the safest state
            _ => CircuitState::Open,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing recovery
    pub reset_timeout: Duration,
    /// Consecutive half-open successes before the circuit closes
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// Core circuit breaker with atomic state management
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging
    name: String,
    /// Current circuit state (atomic for thread safety)
    state: AtomicU8,
    config: CircuitBreakerConfig,
    /// Consecutive failures while closed
    consecutive_failures: AtomicU32,
    /// Consecutive successes while half-open
    half_open_successes: AtomicU32,
    /// Time when circuit was opened (for timeout calculations)
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            reset_timeout_seconds = config.reset_timeout.as_secs(),
            success_threshold = config.success_threshold,
            "Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            consecutive_failures: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            opened_at: Mutex::new(None),
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Check whether a call should be allowed right now
    ///
    /// An open circuit transitions to half-open once the reset timeout has
    /// elapsed, allowing a probe call through.
    pub fn should_allow(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let opened_at = self.opened_at.lock();
                match *opened_at {
                    Some(opened) if opened.elapsed() >= self.config.reset_timeout => {
                        drop(opened_at);
                        self.transition_to_half_open();
                        true
                    }
                    Some(_) => false,
                    None => {
                        // Open without a timestamp should not happen; allow the call
                        warn!(component = %self.name, "Circuit open but no timestamp recorded");
                        true
                    }
                }
            }
        }
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.consecutive_failures.store(0, Ordering::Release);
            }
            CircuitState::HalfOpen => {
                let successes = self.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.success_threshold {
                    self.transition_to_closed();
                }
            }
            CircuitState::Open => {
                debug!(component = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        match self.state() {
            CircuitState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold {
                    self.transition_to_open();
                }
            }
            // Any failure in half-open state immediately re-opens the circuit
            CircuitState::HalfOpen => self.transition_to_open(),
            CircuitState::Open => {}
        }
    }

    fn transition_to_closed(&self) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        self.half_open_successes.store(0, Ordering::Release);
        *self.opened_at.lock() = None;

        info!(component = %self.name, "Circuit breaker closed (recovered)");
    }

    fn transition_to_open(&self) {
        self.state.store(CircuitState::Open as u8, Ordering::Release);
        self.half_open_successes.store(0, Ordering::Release);
        *self.opened_at.lock() = Some(Instant::now());

        warn!(
            component = %self.name,
            failure_threshold = self.config.failure_threshold,
            reset_timeout_seconds = self.config.reset_timeout.as_secs(),
            "Circuit breaker opened (failing fast)"
        );
    }

    fn transition_to_half_open(&self) {
        self.state
            .store(CircuitState::HalfOpen as u8, Ordering::Release);
        self.half_open_successes.store(0, Ordering::Release);

        info!(
            component = %self.name,
            success_threshold = self.config.success_threshold,
            "Circuit breaker half-open (testing recovery)"
        );
    }
}
