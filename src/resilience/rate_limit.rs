//! Token-bucket rate limiting shared by all callers of one client.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::errors::{ApiError, ApiResult};

/// Rate limit settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    /// Steady-state refill rate.
    pub requests_per_second: f64,
    /// Bucket capacity.
    pub burst: u32,
}

impl RateLimitConfig {
    /// Creates a config with a burst of one.
    pub fn new(requests_per_second: f64) -> Self {
        Self {
            requests_per_second,
            burst: 1,
        }
    }

    /// Sets the bucket capacity.
    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }

    /// Checks value ranges.
    pub fn validate(&self) -> ApiResult<()> {
        if !self.requests_per_second.is_finite() || self.requests_per_second <= 0.0 {
            return Err(ApiError::configuration("requests_per_second must be positive"));
        }
        if self.burst == 0 {
            return Err(ApiError::configuration("burst must be at least 1"));
        }
        Ok(())
    }
}

struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(config: RateLimitConfig) -> Self {
        let capacity = f64::from(config.burst.max(1));
        Self {
            capacity,
            tokens: capacity,
            refill_rate: config.requests_per_second,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Takes a token, or reports how long until one is available.
    fn take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            // Round up so the token is whole by the time the sleep ends.
            let nanos = ((1.0 - self.tokens) / self.refill_rate * 1e9).ceil();
            Err(Duration::from_nanos(nanos as u64).max(Duration::from_nanos(1)))
        }
    }
}

/// Token-bucket rate limiter.
///
/// `acquire` never holds the lock while sleeping, so concurrent callers can
/// refill and take tokens while others wait. There is no fairness guarantee
/// among waiters.
pub struct RateLimiter {
    bucket: Option<Mutex<TokenBucket>>,
}

impl RateLimiter {
    /// Creates a limiter enforcing `config`.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            bucket: Some(Mutex::new(TokenBucket::new(config))),
        }
    }

    /// Creates a limiter whose `acquire` never waits.
    pub fn unlimited() -> Self {
        Self { bucket: None }
    }

    /// Creates a limiter from an optional config.
    pub fn from_config(config: Option<RateLimitConfig>) -> Self {
        config.map_or_else(Self::unlimited, Self::new)
    }

    /// Returns true if no limit is enforced.
    pub fn is_unlimited(&self) -> bool {
        self.bucket.is_none()
    }

    /// Waits until a token is available and consumes it.
    ///
    /// Cancel-safe: dropping the future while it sleeps consumes nothing.
    pub async fn acquire(&self) {
        let Some(bucket) = &self.bucket else {
            return;
        };

        loop {
            let wait = {
                let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
                match bucket.take(Instant::now()) {
                    Ok(()) => return,
                    Err(wait) => wait,
                }
            };
            tracing::trace!(wait_ms = wait.as_millis() as u64, "Rate limited, waiting for token");
            tokio::time::sleep(wait).await;
        }
    }

    /// Consumes a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        match &self.bucket {
            None => true,
            Some(bucket) => bucket
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(Instant::now())
                .is_ok(),
        }
    }

    /// Current token count after refill; `None` when unlimited.
    pub fn available_tokens(&self) -> Option<f64> {
        self.bucket.as_ref().map(|bucket| {
            let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
            bucket.refill(Instant::now());
            bucket.tokens
        })
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("unlimited", &self.is_unlimited())
            .field("available_tokens", &self.available_tokens())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(RateLimitConfig::new(2.0).validate().is_ok());
        assert!(RateLimitConfig::new(0.0).validate().is_err());
        assert!(RateLimitConfig::new(f64::NAN).validate().is_err());
        assert!(RateLimitConfig::new(1.0).with_burst(0).validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_empty() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1.0).with_burst(3));

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_continuous() {
        let limiter = RateLimiter::new(RateLimitConfig::new(4.0).with_burst(2));
        limiter.acquire().await;
        limiter.acquire().await;

        tokio::time::advance(Duration::from_millis(125)).await;
        let tokens = limiter.available_tokens().unwrap();
        assert!((tokens - 0.5).abs() < 1e-6);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!((limiter.available_tokens().unwrap() - 2.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let limiter = RateLimiter::new(RateLimitConfig::new(2.0));
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(600), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn test_unlimited() {
        let limiter = RateLimiter::unlimited();
        for _ in 0..1000 {
            limiter.acquire().await;
        }
        assert!(limiter.try_acquire());
        assert_eq!(limiter.available_tokens(), None);
    }
}
