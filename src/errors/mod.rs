//! Error types for the client.
//!
//! A closed taxonomy: every failure a caller can observe from
//! [`ApiClient::send`](crate::ApiClient::send) is one of these variants.
//! Transient per-attempt failures are absorbed by the retry loop and only
//! the terminal outcome surfaces.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::observability::{redact_headers, redact_url, SensitiveHeaders};
use crate::resilience::DEFAULT_RETRY_STATUSES;
use crate::transport::TransportError;
use crate::types::{Headers, Method, Request};

/// Result type alias for client operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Redacted description of the request an error belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSummary {
    /// HTTP method.
    pub method: Method,
    /// Target URL with credentials and secret query values removed.
    pub url: String,
    /// Headers with sensitive values replaced.
    pub headers: Headers,
    /// Correlation id, if assigned.
    pub request_id: Option<String>,
}

impl RequestSummary {
    /// Builds a summary of `request` targeting `url`.
    pub fn new(request: &Request, url: &str, sensitive: &SensitiveHeaders) -> Self {
        Self {
            method: request.method(),
            url: redact_url(url),
            headers: redact_headers(request.headers(), sensitive),
            request_id: request.request_id().map(str::to_string),
        }
    }
}

impl fmt::Display for RequestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Discriminant of [`ApiError`], used for telemetry and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Rejected before reaching the network.
    InvalidRequest,
    /// 4xx other than 429.
    Client,
    /// 429 after retries.
    RateLimited,
    /// 5xx after retries.
    Server,
    /// Connection-level failure after retries.
    Transport,
    /// Attempt or total deadline exceeded, or cancelled.
    Timeout,
    /// Wrapper carrying the attempt count.
    RetryExhausted,
    /// Invalid client configuration.
    Configuration,
    /// Body encode/decode failure.
    Serialization,
}

impl ErrorKind {
    /// Stable snake-case label.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Client => "client_error",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Server => "server_error",
            ErrorKind::Transport => "transport_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RetryExhausted => "retry_exhausted",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Serialization => "serialization",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for client operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The guard rejected the request (bad scheme, blocked host, header
    /// injection, path traversal). Never retried.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// What was rejected.
        message: String,
        /// The offending request, when one exists.
        request: Option<Box<RequestSummary>>,
    },

    /// 4xx response other than 429.
    #[error("Client error (HTTP {status}): {message}")]
    Client {
        /// Message extracted from the response body, or the reason phrase.
        message: String,
        /// HTTP status code.
        status: u16,
        /// Response body text.
        body: Option<String>,
        /// The request.
        /// Whether the status is in the retry set the client was configured with.
        retryable: bool,
        request: Box<RequestSummary>,
    },

    /// 429 response whose retries have been exhausted.
    #[error("Rate limited (HTTP 429): {message}")]
    RateLimited {
        /// Error message.
        message: String,
        /// Last wait hint from the server.
        retry_after: Option<Duration>,
        /// Response body text.
        body: Option<String>,
        /// The request.
        /// Whether the status is in the retry set the client was configured with.
        retryable: bool,
        request: Box<RequestSummary>,
    },

    /// 5xx response, terminal or after exhausted retries.
    #[error("Server error (HTTP {status}): {message}")]
    Server {
        /// Error message.
        message: String,
        /// HTTP status code.
        status: u16,
        /// Response body text.
        body: Option<String>,
        /// The request.
        /// Whether the status is in the retry set the client was configured with.
        retryable: bool,
        request: Box<RequestSummary>,
    },

    /// Connection, DNS or protocol failure.
    #[error("Transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Underlying transport failure.
        #[source]
        cause: TransportError,
        /// The request.
        request: Box<RequestSummary>,
    },

    /// An attempt timed out, the total deadline passed, or the caller
    /// cancelled.
    #[error("Request timed out: {message}")]
    Timeout {
        /// Error message.
        message: String,
        /// Time elapsed since the logical call started.
        elapsed: Duration,
        /// True when triggered by the caller's cancellation token.
        cancelled: bool,
        /// The request, when known.
        request: Option<Box<RequestSummary>>,
    },

    /// Retries ran out; wraps the last underlying error.
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        /// Number of transport invocations made.
        attempts: u32,
        /// The final failure.
        #[source]
        last: Box<ApiError>,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Configuration {
        /// What is wrong.
        message: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message.
        message: String,
    },
}

impl ApiError {
    /// Returns the variant discriminant.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            ApiError::Client { .. } => ErrorKind::Client,
            ApiError::RateLimited { .. } => ErrorKind::RateLimited,
            ApiError::Server { .. } => ErrorKind::Server,
            ApiError::Transport { .. } => ErrorKind::Transport,
            ApiError::Timeout { .. } => ErrorKind::Timeout,
            ApiError::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            ApiError::Configuration { .. } => ErrorKind::Configuration,
            ApiError::Serialization { .. } => ErrorKind::Serialization,
        }
    }

    /// Returns true if a fresh call might succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Client { retryable, .. }
            | ApiError::RateLimited { retryable, .. }
            | ApiError::Server { retryable, .. } => *retryable,
            ApiError::Transport { .. } => true,
            ApiError::Timeout { cancelled, .. } => !cancelled,
            ApiError::RetryExhausted { last, .. } => last.is_retryable(),
            _ => false,
        }
    }

    /// HTTP status attached to the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Client { status, .. } | ApiError::Server { status, .. } => Some(*status),
            ApiError::RateLimited { .. } => Some(429),
            ApiError::RetryExhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    /// Server wait hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited { retry_after, .. } => *retry_after,
            ApiError::RetryExhausted { last, .. } => last.retry_after(),
            _ => None,
        }
    }

    /// Redacted request context, if any.
    pub fn request(&self) -> Option<&RequestSummary> {
        match self {
            ApiError::Client { request, .. }
            | ApiError::RateLimited { request, .. }
            | ApiError::Server { request, .. }
            | ApiError::Transport { request, .. } => Some(request),
            ApiError::InvalidRequest { request, .. } | ApiError::Timeout { request, .. } => {
                request.as_deref()
            }
            ApiError::RetryExhausted { last, .. } => last.request(),
            _ => None,
        }
    }

    /// Number of attempts made, when the error is a retry wrapper.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            ApiError::RetryExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Creates an invalid-request error with no request context.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        ApiError::InvalidRequest {
            message: message.into(),
            request: None,
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        ApiError::Configuration {
            message: message.into(),
        }
    }

    /// Builds the error for a terminal HTTP error status.
    pub fn from_status(
        status: u16,
        body: &[u8],
        retry_after: Option<Duration>,
        request: RequestSummary,
    ) -> Self {
        let text = if body.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(body).into_owned())
        };
        let message = extract_error_message(body).unwrap_or_else(|| reason_phrase(status));
        let request = Box::new(request);
        let retryable = DEFAULT_RETRY_STATUSES.contains(&status);

        match status {
            429 => ApiError::RateLimited {
                message,
                retry_after,
                body: text,
                retryable,
                request,
            },
            500..=599 => ApiError::Server {
                message,
                status,
                body: text,
                retryable,
                request,
            },
            _ => ApiError::Client {
                message,
                status,
                body: text,
                retryable,
                request,
            },
        }
    }

    /// Overrides the retryable flag of a status error.
    ///
    /// [`ApiError::from_status`] assumes the default retry set; the client
    /// replaces that with the decision of its own retry policy.
    #[must_use]
    pub fn with_retryable(mut self, value: bool) -> Self {
        if let ApiError::Client { retryable, .. }
        | ApiError::RateLimited { retryable, .. }
        | ApiError::Server { retryable, .. } = &mut self
        {
            *retryable = value;
        }
        self
    }
}

fn reason_phrase(status: u16) -> String {
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .map_or_else(|| format!("HTTP {status}"), |reason| format!("HTTP {status} {reason}"))
}

/// Pulls a human-readable message out of common JSON error body shapes.
///
/// Recognizes `error_description`, `{"error": {"message"|"code"|"description"}}`,
/// `{"error": "..."}`, `{"message": "..."}`, `{"detail": "..."}`,
/// `{"detail": [{"msg": "..."}]}` and `{"errors": [...]}`.
pub fn extract_error_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let object = value.as_object()?;

    let as_text = |v: &serde_json::Value| v.as_str().map(str::to_string);

    if let Some(text) = object.get("error_description").and_then(as_text) {
        return Some(text);
    }

    if let Some(error) = object.get("error") {
        if let Some(text) = as_text(error) {
            return Some(text);
        }
        if let Some(inner) = error.as_object() {
            for field in ["message", "code", "description"] {
                if let Some(text) = inner.get(field).and_then(as_text) {
                    return Some(text);
                }
            }
        }
    }

    if let Some(text) = object.get("message").and_then(as_text) {
        return Some(text);
    }

    if let Some(detail) = object.get("detail") {
        if let Some(text) = as_text(detail) {
            return Some(text);
        }
        if let Some(text) = detail
            .as_array()
            .and_then(|items| items.first())
            .and_then(|first| first.get("msg"))
            .and_then(as_text)
        {
            return Some(text);
        }
    }

    let first = object.get("errors")?.as_array()?.first()?;
    if let Some(text) = as_text(first) {
        return Some(text);
    }
    ["message", "msg", "detail", "description"]
        .iter()
        .find_map(|field| first.get(*field).and_then(as_text))
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for ApiError {
    fn from(err: url::ParseError) -> Self {
        ApiError::InvalidRequest {
            message: format!("Invalid URL: {err}"),
            request: None,
        }
    }
}
