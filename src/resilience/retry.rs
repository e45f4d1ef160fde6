//! Retry with exponential backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::context::Context;
use crate::error::AdapterError;

/// Decides whether an error is worth another attempt.
pub type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("giving up after {attempts} attempt(s): {error}")]
    Exhausted { attempts: u32, error: E },
    #[error("non-retryable failure on attempt {attempts}: {error}")]
    NotRetryable { attempts: u32, error: E },
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32, last: Option<E> },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. }
            | RetryError::NotRetryable { attempts, .. }
            | RetryError::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// The last error produced by the operation, if any.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Exhausted { error, .. } | RetryError::NotRetryable { error, .. } => {
                Some(error)
            }
            RetryError::Cancelled { last, .. } => last,
        }
    }
}

impl From<RetryError<AdapterError>> for AdapterError {
    fn from(error: RetryError<AdapterError>) -> Self {
        match error {
            // a first-attempt terminal error is surfaced untouched
            RetryError::NotRetryable { attempts: 1, error } => error,
            RetryError::NotRetryable { attempts, mut error }
            | RetryError::Exhausted { attempts, mut error } => {
                error.message = format!("{} (after {} attempts)", error.message, attempts);
                error
            }
            RetryError::Cancelled { attempts, last } => {
                let mut cancelled = AdapterError::timeout(format!(
                    "operation cancelled after {} attempt(s)",
                    attempts
                ));
                if let Some(last) = last {
                    cancelled = cancelled.scoped(&last.provider_id, &last.operation_id);
                }
                cancelled
            }
        }
    }
}

pub struct RetryPolicy<E> {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_factor: f64,
    predicates: Vec<RetryPredicate<E>>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            initial_backoff: self.initial_backoff,
            max_backoff: self.max_backoff,
            backoff_factor: self.backoff_factor,
            predicates: self.predicates.clone(),
        }
    }
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("backoff_factor", &self.backoff_factor)
            .field("predicates", &self.predicates.len())
            .finish()
    }
}

impl<E> RetryPolicy<E> {
    /// A policy with no retryable predicates; every error is terminal until one is added.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            backoff_factor: 2.0,
            predicates: Vec::new(),
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.predicates.push(Arc::new(predicate));
        self
    }

    pub fn is_retryable(&self, error: &E) -> bool {
        self.predicates.iter().any(|predicate| predicate(error))
    }

    /// Sleep before retry number `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_backoff.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = base.min(self.max_backoff.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(capped * (0.5 + jitter(attempt)))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, runs out
    /// of attempts, or `ctx` is cancelled.
    pub async fn run<F, Fut, T>(&self, ctx: &Context, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut last: Option<E> = None;
        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let delay = self.backoff(attempt - 1);
                debug!(
                    attempt = attempt + 1,
                    max_attempts = self.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after backoff"
                );
                tokio::select! {
                    _ = ctx.done() => {
                        return Err(RetryError::Cancelled { attempts: attempt, last });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            if ctx.is_done() {
                return Err(RetryError::Cancelled {
                    attempts: attempt,
                    last,
                });
            }

            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempt = attempt + 1, "Operation succeeded on retry");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if !self.is_retryable(&error) {
                        return Err(RetryError::NotRetryable {
                            attempts: attempt + 1,
                            error,
                        });
                    }
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        error = %error,
                        "Retryable failure"
                    );
                    last = Some(error);
                }
            }
        }

        match last {
            Some(error) => Err(RetryError::Exhausted {
                attempts: self.max_attempts,
                error,
            }),
            None => Err(RetryError::Cancelled {
                attempts: self.max_attempts,
                last: None,
            }),
        }
    }
}

impl RetryPolicy<AdapterError> {
    /// Policy retrying network errors, timeouts and 5xx answers.
    pub fn for_adapters(max_attempts: u32) -> Self {
        Self::new(max_attempts)
            .with_predicate(AdapterError::is_network_error)
            .with_predicate(AdapterError::is_timeout)
            .with_predicate(AdapterError::is_server_error)
    }
}

/// Deterministic pseudo-random value in `[0, 1]` for a given attempt.
pub fn jitter(attempt: u32) -> f64 {
    // splitmix64 finaliser
    let mut z = u64::from(attempt).wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    (z % 1001) as f64 / 1000.0
}
