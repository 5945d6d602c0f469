//! Resilience layer: token-bucket rate limiting and retry policy.
//!
//! Both pieces are transport-independent. The client consults the
//! [`RateLimiter`] before every attempt, including retries, and asks the
//! [`RetryPolicy`] after every failed attempt.

mod rate_limit;
mod retry;

pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use retry::{
    AttemptOutcome, JitterSource, RetryConfig, RetryPolicy, SeededJitter, ThreadRngJitter,
    DEFAULT_RETRY_STATUSES,
};
