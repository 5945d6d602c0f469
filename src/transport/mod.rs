//! HTTP transport layer.
//!
//! The client hands one fully-resolved, already-guarded request to an
//! [`HttpTransport`] per attempt and gets back the raw status, headers and
//! body, or a [`TransportError`]. Retry, rate limiting and error
//! classification all live above this layer.

mod http;

pub use http::ReqwestTransport;

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use url::Url;

use crate::types::{Headers, Method};

/// A single outbound HTTP exchange, as seen by the transport.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute target URL.
    pub url: Url,
    /// Request headers.
    pub headers: Headers,
    /// Encoded request body.
    pub body: Option<Bytes>,
    /// Per-attempt timeout.
    pub timeout: Option<Duration>,
}

/// Raw result of a completed exchange.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Headers,
    /// Response body.
    pub body: Bytes,
}

impl TransportResponse {
    /// Creates a response with the given status and body and no headers.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: body.into(),
        }
    }
}

/// Transport error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection refused, reset or dropped.
    #[error("Connection error: {message}")]
    Connection {
        /// Error message.
        message: String,
    },

    /// Name resolution failed.
    #[error("DNS error: {message}")]
    Dns {
        /// Error message.
        message: String,
    },

    /// Timeout error.
    #[error("Timeout after {timeout:?}")]
    Timeout {
        /// Timeout duration.
        timeout: Duration,
    },

    /// TLS error.
    #[error("TLS error: {message}")]
    Tls {
        /// Error message.
        message: String,
    },

    /// Invalid response.
    #[error("Invalid response: {message}")]
    InvalidResponse {
        /// Error message.
        message: String,
    },

    /// A resolved address or redirect target was refused by the guard.
    #[error("Blocked: {message}")]
    Blocked {
        /// Error message.
        message: String,
    },
}

impl TransportError {
    /// Returns true for failures where a fresh attempt may succeed.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            TransportError::Connection { .. }
                | TransportError::Dns { .. }
                | TransportError::Timeout { .. }
        )
    }

    /// Short label used in telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Connection { .. } => "connection",
            TransportError::Dns { .. } => "dns",
            TransportError::Timeout { .. } => "timeout",
            TransportError::Tls { .. } => "tls",
            TransportError::InvalidResponse { .. } => "invalid_response",
            TransportError::Blocked { .. } => "blocked",
        }
    }
}

/// HTTP transport trait.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Performs one HTTP exchange.
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}
