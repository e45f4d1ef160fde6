//! Per-key token bucket rate limiting.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use governor::{
    Quota, RateLimiter as Governor,
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
};
use thiserror::Error;
use tracing::debug;

type Bucket = Governor<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Interval after which every bucket is discarded.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    /// Bucket capacity; `None` means the same as `requests_per_second`.
    pub burst: Option<u32>,
}

impl RateLimitConfig {
    pub fn new(requests_per_second: u32) -> Self {
        Self {
            requests_per_second,
            burst: None,
        }
    }

    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = Some(burst);
        self
    }

    pub fn validate(&self) -> Result<(), RateLimitError> {
        self.quota().map(|_| ())
    }

    fn quota(&self) -> Result<Quota, RateLimitError> {
        let rps = NonZeroU32::new(self.requests_per_second).ok_or(RateLimitError::ZeroRate)?;
        let burst = match self.burst {
            Some(burst) => NonZeroU32::new(burst).ok_or(RateLimitError::ZeroBurst)?,
            None => rps,
        };
        Ok(Quota::per_second(rps).allow_burst(burst))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    #[error("rate limit requests_per_second must be positive")]
    ZeroRate,

    #[error("rate limit burst must be positive")]
    ZeroBurst,
}

pub struct RateLimiter {
    quota: Quota,
    buckets: RwLock<HashMap<String, Arc<Bucket>>>,
    last_cleanup: Mutex<Instant>,
    cleanup_interval: Duration,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("quota", &self.quota)
            .field("keys", &self.key_count())
            .finish()
    }
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Result<Self, RateLimitError> {
        Self::with_cleanup_interval(config, DEFAULT_CLEANUP_INTERVAL)
    }

    pub fn with_cleanup_interval(
        config: &RateLimitConfig,
        cleanup_interval: Duration,
    ) -> Result<Self, RateLimitError> {
        Ok(Self {
            quota: config.quota()?,
            buckets: RwLock::new(HashMap::new()),
            last_cleanup: Mutex::new(Instant::now()),
            cleanup_interval,
        })
    }

    /// Take one token from `key`'s bucket.
    pub fn allow(&self, key: &str) -> bool {
        self.allow_n(key, 1)
    }

    /// Take `n` tokens from `key`'s bucket. Requests larger than the bucket
    /// capacity are always refused.
    pub fn allow_n(&self, key: &str, n: u32) -> bool {
        let Some(n) = NonZeroU32::new(n) else {
            return true;
        };
        self.cleanup_if_due();
        let bucket = self.bucket(key);
        matches!(bucket.check_n(n), Ok(Ok(())))
    }

    /// Number of keys with a live bucket.
    pub fn key_count(&self) -> usize {
        self.buckets
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn bucket(&self, key: &str) -> Arc<Bucket> {
        if let Some(bucket) = self
            .buckets
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
        {
            return Arc::clone(bucket);
        }

        let mut buckets = self
            .buckets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            buckets
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Governor::direct(self.quota))),
        )
    }

    fn cleanup_if_due(&self) {
        let mut last = self
            .last_cleanup
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if last.elapsed() < self.cleanup_interval {
            return;
        }
        *last = Instant::now();
        drop(last);

        let mut buckets = self
            .buckets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        debug!(discarded = buckets.len(), "Discarding rate limiter buckets");
        buckets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_defaults_to_rps() {
        let limiter = RateLimiter::new(&RateLimitConfig::new(3)).unwrap();
        assert!(limiter.allow("a"));
        assert!(limiter.allow("a"));
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(&RateLimitConfig::new(1)).unwrap();
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));
        assert!(limiter.allow("b"));
        assert_eq!(limiter.key_count(), 2);
    }

    #[test]
    fn test_allow_n() {
        let limiter = RateLimiter::new(&RateLimitConfig::new(1).with_burst(5)).unwrap();
        assert!(limiter.allow_n("a", 0));
        assert!(limiter.allow_n("a", 4));
        assert!(!limiter.allow_n("a", 2));
        assert!(limiter.allow_n("a", 1));
        // more than capacity can never pass
        assert!(!limiter.allow_n("b", 6));
    }

    #[test]
    fn test_cleanup_discards_buckets() {
        let limiter =
            RateLimiter::with_cleanup_interval(&RateLimitConfig::new(1), Duration::from_millis(10))
                .unwrap();
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));

        std::thread::sleep(Duration::from_millis(20));
        // the bucket is recreated full after the sweep
        assert!(limiter.allow("a"));
        assert_eq!(limiter.key_count(), 1);
    }

    #[test]
    fn test_zero_rate_is_rejected() {
        assert_eq!(
            RateLimiter::new(&RateLimitConfig::new(0)).unwrap_err(),
            RateLimitError::ZeroRate
        );
        assert_eq!(
            RateLimiter::new(&RateLimitConfig::new(2).with_burst(0)).unwrap_err(),
            RateLimitError::ZeroBurst
        );
    }
}
