//! Retry decisions and exponential backoff with jitter.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::errors::{ApiError, ApiResult};
use crate::transport::TransportError;
use crate::types::Response;

/// Statuses retried unless configured otherwise.
pub const DEFAULT_RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total transport invocations allowed per logical request (≥ 1).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on computed backoff.
    pub max_delay: Duration,
    /// Backoff multiplier (≥ 1).
    pub backoff_multiplier: f64,
    /// Jitter fraction (0.0 to 1.0).
    pub jitter_fraction: f64,
    /// Response statuses that trigger a retry.
    pub retry_on_status: BTreeSet<u16>,
    /// Longest `Retry-After` hint waited out; a longer one ends the retries.
    pub max_retry_after: Duration,
    /// Wrap failures after more than one attempt in [`ApiError::RetryExhausted`].
    pub wrap_exhausted: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_fraction: 0.1,
            retry_on_status: DEFAULT_RETRY_STATUSES.into_iter().collect(),
            max_retry_after: Duration::from_secs(120),
            wrap_exhausted: false,
        }
    }
}

impl RetryConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// A configuration making exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Allows `retries` retries after the first attempt.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_attempts = retries.saturating_add(1);
        self
    }

    /// Sets the total number of attempts.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the backoff cap.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the jitter fraction.
    pub fn jitter_fraction(mut self, jitter: f64) -> Self {
        self.jitter_fraction = jitter;
        self
    }

    /// Replaces the retryable status set.
    pub fn retry_on_status<I: IntoIterator<Item = u16>>(mut self, statuses: I) -> Self {
        self.retry_on_status = statuses.into_iter().collect();
        self
    }

    /// Sets the `Retry-After` ceiling.
    pub fn max_retry_after(mut self, ceiling: Duration) -> Self {
        self.max_retry_after = ceiling;
        self
    }

    /// Enables or disables [`ApiError::RetryExhausted`] wrapping.
    pub fn wrap_exhausted(mut self, wrap: bool) -> Self {
        self.wrap_exhausted = wrap;
        self
    }

    /// Checks value ranges.
    pub fn validate(&self) -> ApiResult<()> {
        if self.max_attempts < 1 {
            return Err(ApiError::configuration("max_attempts must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(ApiError::configuration("jitter_fraction must be between 0 and 1"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ApiError::configuration("backoff_multiplier must be at least 1"));
        }
        if self.base_delay > self.max_delay {
            return Err(ApiError::configuration("base_delay must not exceed max_delay"));
        }
        Ok(())
    }
}

/// Source of uniform samples in `[0, 1)` for jitter.
pub trait JitterSource: Send + Sync + fmt::Debug {
    /// Returns the next sample.
    fn sample(&self) -> f64;
}

/// Jitter from the thread-local generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn sample(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Reproducible jitter from a seeded generator.
#[derive(Debug)]
pub struct SeededJitter {
    rng: Mutex<StdRng>,
}

impl SeededJitter {
    /// Creates a generator from `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl JitterSource for SeededJitter {
    fn sample(&self) -> f64 {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen::<f64>()
    }
}

/// What a single attempt produced.
#[derive(Debug, Clone, Copy)]
pub enum AttemptOutcome<'a> {
    /// The server answered.
    Response(&'a Response),
    /// No response was received.
    Transport(&'a TransportError),
}

/// Retry policy: decides whether to retry and how long to wait.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    jitter: Arc<dyn JitterSource>,
}

impl RetryPolicy {
    /// Creates a policy using thread-local jitter.
    pub fn new(config: RetryConfig) -> Self {
        Self::with_jitter(config, Arc::new(ThreadRngJitter))
    }

    /// Creates a policy with an injected jitter source.
    pub fn with_jitter(config: RetryConfig, jitter: Arc<dyn JitterSource>) -> Self {
        Self { config, jitter }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Returns true if the outcome is transient.
    pub fn is_retryable(&self, outcome: AttemptOutcome<'_>) -> bool {
        match outcome {
            AttemptOutcome::Response(response) => {
                self.config.retry_on_status.contains(&response.status())
            }
            AttemptOutcome::Transport(error) => error.is_connectivity(),
        }
    }

    /// Returns true if another attempt should follow `attempts` completed ones.
    ///
    /// A server asking for a longer wait than `max_retry_after` ends the
    /// retry loop rather than being retried early.
    pub fn should_retry(&self, outcome: AttemptOutcome<'_>, attempts: u32) -> bool {
        attempts < self.config.max_attempts
            && self.is_retryable(outcome)
            && !self.exceeds_retry_after(outcome)
    }

    /// Returns true if the response carries a `Retry-After` above the ceiling.
    pub fn exceeds_retry_after(&self, outcome: AttemptOutcome<'_>) -> bool {
        match outcome {
            AttemptOutcome::Response(response) => response
                .retry_after()
                .is_some_and(|hint| hint > self.config.max_retry_after),
            AttemptOutcome::Transport(_) => false,
        }
    }

    /// Backoff before retry number `retry` (0 for the first retry).
    ///
    /// `min(max_delay, base * multiplier^retry)` scaled by a factor drawn from
    /// `[1 - jitter, 1 + jitter]`, never above `max_delay`.
    pub fn compute_delay(&self, retry: u32) -> Duration {
        let max = self.config.max_delay.as_secs_f64();
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let backoff = (self.config.base_delay.as_secs_f64()
            * self.config.backoff_multiplier.powi(exponent))
        .min(max);

        let jitter = self.config.jitter_fraction;
        let factor = 1.0 - jitter + 2.0 * jitter * self.jitter.sample().clamp(0.0, 1.0);
        let delay = (backoff * factor).clamp(0.0, max);

        Duration::try_from_secs_f64(delay).unwrap_or(self.config.max_delay)
    }

    /// Delay before retrying after `outcome`: the backoff, or the server's
    /// `Retry-After` when that is longer.
    pub fn delay_for(&self, outcome: AttemptOutcome<'_>, retry: u32) -> Duration {
        let backoff = self.compute_delay(retry);
        match outcome {
            AttemptOutcome::Response(response) => response
                .retry_after()
                .map_or(backoff, |hint| backoff.max(hint)),
            AttemptOutcome::Transport(_) => backoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::FixedJitter;
    use crate::types::{Headers, Request};
    use bytes::Bytes;

    fn response(status: u16, headers: Headers) -> Response {
        Response::new(
            status,
            headers,
            Bytes::new(),
            Arc::new(Request::get("https://api.example.com/").build()),
            Duration::ZERO,
        )
    }

    fn policy(config: RetryConfig, sample: f64) -> RetryPolicy {
        RetryPolicy::with_jitter(config, Arc::new(FixedJitter::new(sample)))
    }

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_on_status.len(), 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_max_retries_counts_first_attempt() {
        assert_eq!(RetryConfig::new().max_retries(3).max_attempts, 4);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(RetryConfig::new().max_attempts(0).validate().is_err());
        assert!(RetryConfig::new().jitter_fraction(1.5).validate().is_err());
        assert!(RetryConfig::new().backoff_multiplier(0.5).validate().is_err());
    }

    #[test]
    fn test_backoff_without_jitter() {
        let policy = policy(
            RetryConfig::new()
                .base_delay(Duration::from_secs(1))
                .max_delay(Duration::from_secs(60))
                .jitter_fraction(0.0),
            0.5,
        );

        assert_eq!(policy.compute_delay(0), Duration::from_secs(1));
        assert_eq!(policy.compute_delay(1), Duration::from_secs(2));
        assert_eq!(policy.compute_delay(2), Duration::from_secs(4));
        assert_eq!(policy.compute_delay(10), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_bounds() {
        let config = RetryConfig::new()
            .base_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(60))
            .jitter_fraction(0.25);

        assert_eq!(policy(config.clone(), 0.0).compute_delay(1), Duration::from_millis(1500));
        assert_eq!(policy(config.clone(), 1.0).compute_delay(1), Duration::from_millis(2500));
    }

    #[test]
    fn test_jittered_delay_never_exceeds_cap() {
        let config = RetryConfig::new()
            .base_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(5))
            .jitter_fraction(0.5);
        assert_eq!(policy(config, 1.0).compute_delay(8), Duration::from_secs(5));
    }

    #[test]
    fn test_seeded_jitter_is_reproducible() {
        let config = RetryConfig::new().jitter_fraction(1.0);
        let a = RetryPolicy::with_jitter(config.clone(), Arc::new(SeededJitter::new(7)));
        let b = RetryPolicy::with_jitter(config, Arc::new(SeededJitter::new(7)));

        for retry in 0..5 {
            assert_eq!(a.compute_delay(retry), b.compute_delay(retry));
        }
    }

    #[test]
    fn test_should_retry_statuses() {
        let policy = policy(RetryConfig::default(), 0.5);
        for status in DEFAULT_RETRY_STATUSES {
            let resp = response(status, Headers::new());
            assert!(policy.should_retry(AttemptOutcome::Response(&resp), 1));
            assert!(!policy.should_retry(AttemptOutcome::Response(&resp), 3));
        }
        for status in [400, 401, 404, 501] {
            let resp = response(status, Headers::new());
            assert!(!policy.should_retry(AttemptOutcome::Response(&resp), 1));
        }
    }

    #[test]
    fn test_should_retry_transport_errors() {
        let policy = policy(RetryConfig::default(), 0.5);
        let reset = TransportError::Connection {
            message: "reset".to_string(),
        };
        let tls = TransportError::Tls {
            message: "bad certificate".to_string(),
        };

        assert!(policy.should_retry(AttemptOutcome::Transport(&reset), 1));
        assert!(!policy.should_retry(AttemptOutcome::Transport(&tls), 1));
    }

    #[test]
    fn test_retry_after_raises_delay() {
        let policy = policy(RetryConfig::new().jitter_fraction(0.0), 0.5);
        let resp = response(429, Headers::new().with("Retry-After", "5"));

        assert_eq!(policy.delay_for(AttemptOutcome::Response(&resp), 0), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_after_above_ceiling_stops_retrying() {
        let policy = policy(
            RetryConfig::new()
                .jitter_fraction(0.0)
                .max_retry_after(Duration::from_secs(30)),
            0.5,
        );
        let too_long = response(429, Headers::new().with("Retry-After", "86400"));
        let at_ceiling = response(503, Headers::new().with("Retry-After", "30"));

        assert!(policy.exceeds_retry_after(AttemptOutcome::Response(&too_long)));
        assert!(!policy.should_retry(AttemptOutcome::Response(&too_long), 1));

        assert!(policy.should_retry(AttemptOutcome::Response(&at_ceiling), 1));
        assert_eq!(
            policy.delay_for(AttemptOutcome::Response(&at_ceiling), 0),
            Duration::from_secs(30)
        );
    }
}
