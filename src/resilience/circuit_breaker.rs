//! Three-state circuit breaker guarding calls to a single provider.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{AdapterError, ErrorCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in the closed state before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting probe calls.
    pub reset_timeout: Duration,
    /// Probe calls admitted while half-open.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }
}

/// Returned when the breaker refuses a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker is open")]
pub struct CircuitOpenError;

impl From<CircuitOpenError> for AdapterError {
    fn from(_: CircuitOpenError) -> Self {
        AdapterError::new(
            ErrorCode::CircuitOpen,
            "circuit breaker is open; provider calls are temporarily suspended",
        )
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_calls: u32,
    half_open_failures: u32,
    opened_at: Option<Instant>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_calls: 0,
            half_open_failures: 0,
            opened_at: None,
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new<S: Into<String>>(name: S, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState::closed()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Decide whether a call may proceed, moving OPEN to HALF_OPEN once the reset timeout has elapsed.
    pub fn allow_request(&self) -> bool {
        let mut state = self.lock();
        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = state
                    .opened_at
                    .map(|opened| opened.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    debug!(breaker = %self.name, "Circuit breaker transitioning to half-open state");
                    state.state = CircuitState::HalfOpen;
                    state.half_open_calls = 1;
                    state.half_open_failures = 0;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if state.half_open_calls < self.config.half_open_max_calls {
                    state.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        match state.state {
            CircuitState::HalfOpen => {
                debug!(breaker = %self.name, "Circuit breaker closing after successful probe");
                *state = BreakerState::closed();
            }
            CircuitState::Closed | CircuitState::Open => {
                state.consecutive_failures = 0;
            }
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.lock();
        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = state.consecutive_failures,
                        "Circuit breaker opening"
                    );
                    state.state = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                state.half_open_failures += 1;
                if state.half_open_failures >= self.config.half_open_max_calls {
                    warn!(breaker = %self.name, "Circuit breaker re-opening after failed probe");
                    state.state = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                    state.half_open_calls = 0;
                    state.half_open_failures = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Run `f` through the breaker, counting every error as a failure.
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
    {
        self.execute_with(f, |_| true).await
    }

    /// Run `f` through the breaker. Errors for which `is_failure` returns false
    /// count as a healthy answer from the remote side.
    pub async fn execute_with<F, Fut, T, E, P>(&self, f: F, is_failure: P) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
        P: Fn(&E) -> bool,
    {
        if !self.allow_request() {
            metrics::counter!("adapter_circuit_rejections_total", "breaker" => self.name.clone())
                .increment(1);
            return Err(CircuitOpenError.into());
        }

        let result = f().await;
        match &result {
            Err(error) if is_failure(error) => self.record_failure(),
            _ => self.record_success(),
        }
        result
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn reset(&self) {
        debug!(breaker = %self.name, "Manually resetting circuit breaker");
        *self.lock() = BreakerState::closed();
    }
}
