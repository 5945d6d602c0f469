//! Configuration module for the client.
//!
//! [`ClientConfig`] is validated once at build time; the client never
//! re-checks it per request.

use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use url::Url;

use crate::errors::{ApiError, ApiResult};
use crate::guard::GuardPolicy;
use crate::observability::{redact_headers, redact_url, SensitiveHeaders};
use crate::resilience::{RateLimitConfig, RetryConfig};
use crate::types::Headers;

/// Default per-attempt timeout (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Smallest accepted per-attempt timeout.
pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Largest accepted per-attempt timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(300);

const ENV_PREFIX: &str = "API_CLIENT_";

/// Configuration for the client.
#[derive(Clone)]
pub struct ClientConfig {
    /// Base for relative request paths.
    pub base_url: Option<Url>,
    /// Headers sent with every request unless the request overrides them.
    pub default_headers: Headers,
    /// Bearer token sent as `Authorization` (stored securely).
    pub(crate) bearer_token: Option<SecretString>,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Ceiling on elapsed time across all attempts and backoff.
    pub total_timeout: Option<Duration>,
    /// Retry behavior.
    pub retry: RetryConfig,
    /// Token-bucket settings; `None` disables rate limiting.
    pub rate_limit: Option<RateLimitConfig>,
    /// Return 4xx/5xx as errors (`true`) or as ordinary responses (`false`).
    pub raise_on_error: bool,
    /// Host restrictions.
    pub guard: GuardPolicy,
    /// Header names masked in telemetry and errors.
    pub sensitive_headers: SensitiveHeaders,
}

impl ClientConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Creates a configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `API_CLIENT_BASE_URL`: base URL for relative paths
    /// - `API_CLIENT_TIMEOUT`: per-attempt timeout in seconds
    /// - `API_CLIENT_MAX_ATTEMPTS`: total attempts per request
    /// - `API_CLIENT_REQUESTS_PER_SECOND`: rate limit
    /// - `API_CLIENT_RAISE_ON_ERROR`: `true`/`false`
    /// - `API_CLIENT_ALLOWED_HOSTS`: comma-separated host allow-list
    /// - `API_CLIENT_BEARER_TOKEN`: bearer credential
    pub fn from_env() -> ApiResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> ApiResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            lookup(&format!("{ENV_PREFIX}{suffix}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut builder = ClientConfigBuilder::new();

        if let Some(base_url) = var("BASE_URL") {
            builder = builder.base_url(base_url);
        }

        if let Some(timeout) = var("TIMEOUT") {
            let secs = parse_env::<f64>("TIMEOUT", &timeout)?;
            let timeout = Duration::try_from_secs_f64(secs)
                .map_err(|e| ApiError::configuration(format!("{ENV_PREFIX}TIMEOUT: {e}")))?;
            builder = builder.timeout(timeout);
        }

        if let Some(attempts) = var("MAX_ATTEMPTS") {
            builder = builder.max_attempts(parse_env("MAX_ATTEMPTS", &attempts)?);
        }

        if let Some(rps) = var("REQUESTS_PER_SECOND") {
            builder = builder.requests_per_second(parse_env("REQUESTS_PER_SECOND", &rps)?);
        }

        if let Some(raise) = var("RAISE_ON_ERROR") {
            builder = builder.raise_on_error(parse_env("RAISE_ON_ERROR", &raise.to_ascii_lowercase())?);
        }

        if let Some(hosts) = var("ALLOWED_HOSTS") {
            builder = builder.allowed_hosts(
                hosts
                    .split(',')
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>(),
            );
        }

        if let Some(token) = var("BEARER_TOKEN") {
            builder = builder.bearer_token(token);
        }

        builder.build()
    }

    /// Checks value ranges.
    ///
    /// Fields are public, so a hand-assembled config goes through the same
    /// checks as one produced by [`ClientConfigBuilder::build`].
    pub fn validate(&self) -> ApiResult<()> {
        if let Some(base_url) = &self.base_url {
            check_base_url(base_url)?;
        }

        if !(MIN_TIMEOUT..=MAX_TIMEOUT).contains(&self.timeout) {
            return Err(ApiError::configuration(format!(
                "timeout must be between {}s and {}s",
                MIN_TIMEOUT.as_secs(),
                MAX_TIMEOUT.as_secs()
            )));
        }

        if self.total_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ApiError::configuration("total_timeout must be positive"));
        }

        self.retry.validate()?;
        if let Some(rate_limit) = &self.rate_limit {
            rate_limit.validate()?;
        }

        if self
            .bearer_token
            .as_ref()
            .is_some_and(|token| token.expose_secret().contains(['\r', '\n']))
        {
            return Err(ApiError::configuration("bearer token contains CR or LF"));
        }

        Ok(())
    }

    /// Returns the bearer token (exposing the secret).
    pub(crate) fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_ref().map(|t| t.expose_secret().as_str())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            default_headers: Headers::new(),
            bearer_token: None,
            timeout: DEFAULT_TIMEOUT,
            total_timeout: None,
            retry: RetryConfig::default(),
            rate_limit: None,
            raise_on_error: true,
            guard: GuardPolicy::default(),
            sensitive_headers: SensitiveHeaders::default(),
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url.as_ref().map(|u| redact_url(u.as_str())))
            .field(
                "default_headers",
                &redact_headers(&self.default_headers, &self.sensitive_headers),
            )
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .field("total_timeout", &self.total_timeout)
            .field("retry", &self.retry)
            .field("rate_limit", &self.rate_limit)
            .field("raise_on_error", &self.raise_on_error)
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}

fn parse_env<T: std::str::FromStr>(suffix: &str, value: &str) -> ApiResult<T> {
    value.parse().map_err(|_| {
        ApiError::configuration(format!("{ENV_PREFIX}{suffix} has invalid value '{value}'"))
    })
}

/// Builder for [`ClientConfig`].
#[derive(Default)]
pub struct ClientConfigBuilder {
    base_url: Option<String>,
    default_headers: Headers,
    bearer_token: Option<SecretString>,
    timeout: Option<Duration>,
    total_timeout: Option<Duration>,
    retry: Option<RetryConfig>,
    max_attempts: Option<u32>,
    max_retry_after: Option<Duration>,
    requests_per_second: Option<f64>,
    burst: Option<u32>,
    raise_on_error: Option<bool>,
    allowed_hosts: Option<Vec<String>>,
    sensitive_headers: Option<SensitiveHeaders>,
}

impl ClientConfigBuilder {
    /// Creates a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base URL for relative request paths.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Adds a default header.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    /// Merges a set of default headers.
    pub fn default_headers(mut self, headers: &Headers) -> Self {
        self.default_headers.merge(headers);
        self
    }

    /// Sets a bearer token sent as `Authorization: Bearer <token>`.
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(SecretString::new(token.into()));
        self
    }

    /// Sets the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets a ceiling on total elapsed time across attempts.
    pub fn total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout = Some(timeout);
        self
    }

    /// Sets the retry configuration.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Overrides the total number of attempts.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Allows `retries` retries after the first attempt.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_attempts = Some(retries.saturating_add(1));
        self
    }

    /// Sets the longest server `Retry-After` hint that is waited out.
    pub fn max_retry_after(mut self, ceiling: Duration) -> Self {
        self.max_retry_after = Some(ceiling);
        self
    }

    /// Enables rate limiting at this steady-state rate.
    pub fn requests_per_second(mut self, rps: f64) -> Self {
        self.requests_per_second = Some(rps);
        self
    }

    /// Sets the token-bucket capacity.
    pub fn burst(mut self, burst: u32) -> Self {
        self.burst = Some(burst);
        self
    }

    /// Chooses whether 4xx/5xx responses are returned as errors.
    pub fn raise_on_error(mut self, raise: bool) -> Self {
        self.raise_on_error = Some(raise);
        self
    }

    /// Restricts requests to exactly these hosts.
    pub fn allowed_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_hosts = Some(hosts.into_iter().map(Into::into).collect());
        self
    }

    /// Replaces the sensitive header patterns.
    pub fn sensitive_headers(mut self, sensitive: SensitiveHeaders) -> Self {
        self.sensitive_headers = Some(sensitive);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> ApiResult<ClientConfig> {
        let base_url = self.base_url.map(|raw| parse_base_url(&raw)).transpose()?;

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);

        let mut retry = self.retry.unwrap_or_default();
        if let Some(attempts) = self.max_attempts {
            retry.max_attempts = attempts;
        }
        if let Some(ceiling) = self.max_retry_after {
            retry.max_retry_after = ceiling;
        }

        let rate_limit = match (self.requests_per_second, self.burst) {
            (Some(rps), burst) => Some(RateLimitConfig::new(rps).with_burst(burst.unwrap_or(1))),
            (None, Some(_)) => {
                return Err(ApiError::configuration(
                    "burst requires requests_per_second",
                ))
            }
            (None, None) => None,
        };

        let guard = match self.allowed_hosts {
            Some(hosts) => GuardPolicy::new().with_allowed_hosts(hosts),
            None => GuardPolicy::new(),
        };

        let config = ClientConfig {
            base_url,
            default_headers: self.default_headers,
            bearer_token: self.bearer_token,
            timeout,
            total_timeout: self.total_timeout,
            retry,
            rate_limit,
            raise_on_error: self.raise_on_error.unwrap_or(true),
            guard,
            sensitive_headers: self.sensitive_headers.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_base_url(raw: &str) -> ApiResult<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ApiError::configuration(format!("Invalid base URL: {e}")))?;
    check_base_url(&url)?;
    Ok(url)
}

fn check_base_url(url: &Url) -> ApiResult<()> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ApiError::configuration("Base URL must use http or https"));
    }
    if url.host().is_none() {
        return Err(ApiError::configuration("Base URL must have a host"));
    }
    Ok(())
}
