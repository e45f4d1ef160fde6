//! Resilience primitives wrapped around every outbound provider call.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

use std::future::Future;

use tracing::warn;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, CircuitState};
pub use rate_limiter::{RateLimitConfig, RateLimitError, RateLimiter};
pub use retry::{RetryError, RetryPolicy};

use crate::context::Context;
use crate::error::AdapterError;

/// Rate limiter, circuit breaker and retry policy of a single adapter, applied in that order.
#[derive(Debug)]
pub struct ResilienceGuard {
    breaker: CircuitBreaker,
    retry: RetryPolicy<AdapterError>,
    limiter: Option<RateLimiter>,
}

impl ResilienceGuard {
    pub fn new(
        breaker: CircuitBreaker,
        retry: RetryPolicy<AdapterError>,
        limiter: Option<RateLimiter>,
    ) -> Self {
        Self {
            breaker,
            retry,
            limiter,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn retry_policy(&self) -> &RetryPolicy<AdapterError> {
        &self.retry
    }

    /// Run `call` under the guard. `limiter_key` selects the token bucket.
    pub async fn run<F, Fut, T>(
        &self,
        ctx: &Context,
        limiter_key: &str,
        call: F,
    ) -> Result<T, AdapterError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        if let Some(limiter) = &self.limiter {
            if !limiter.allow(limiter_key) {
                warn!(key = %limiter_key, "Local rate limit exceeded");
                return Err(AdapterError::provider_api(format!(
                    "local rate limit exceeded for '{}'",
                    limiter_key
                ))
                .with_status(429));
            }
        }

        let retry = &self.retry;
        self.breaker
            .execute_with(
                move || async move { retry.run(ctx, call).await.map_err(AdapterError::from) },
                AdapterError::is_provider_failure,
            )
            .await
    }
}
