//! Resilient HTTP Client Core
//!
//! An outbound HTTP client that rate-limits, retries and guards every
//! request it sends, and reports failures through a closed, typed error
//! taxonomy.
//!
//! # Features
//!
//! - **Rate Limiting**: token bucket shared by every caller of a client
//! - **Retries**: exponential backoff with injectable jitter, `Retry-After` honoured
//! - **SSRF Guard**: scheme, host, resolved-address and header-injection checks
//! - **Typed Errors**: one [`ApiError`] variant per failure class
//! - **Observability**: per-attempt telemetry with credential redaction, metrics
//! - **Async/Await**: built on Tokio; cancellation via `CancellationToken`
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use resilient_http_client::{ApiClient, ApiError};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ApiClient::builder()
//!         .base_url("https://api.example.com/v1")
//!         .bearer_token("sk-your-token")
//!         .requests_per_second(10.0)
//!         .max_retries(3)
//!         .total_timeout(Duration::from_secs(60))
//!         .build()?;
//!
//!     match client.post_json("/items", &serde_json::json!({"name": "widget"})).await {
//!         Ok(response) => println!("created: {}", response.text()),
//!         Err(ApiError::RateLimited { retry_after, .. }) => {
//!             println!("slow down, server asked for {retry_after:?}");
//!         }
//!         Err(e) => return Err(e.into()),
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod errors;
pub mod guard;
pub mod observability;
pub mod resilience;
pub mod transport;
pub mod types;

/// Mock implementations for testing.
pub mod mocks;

// Re-exports for convenience
pub use client::{ApiClient, ApiClientBuilder};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use errors::{ApiError, ApiResult, ErrorKind, RequestSummary};
pub use guard::{GuardError, GuardPolicy};
pub use observability::{NoopTelemetry, SensitiveHeaders, Telemetry, TelemetryEvent, TracingTelemetry};
pub use resilience::{RateLimitConfig, RateLimiter, RetryConfig, RetryPolicy};
pub use transport::{HttpTransport, ReqwestTransport, TransportError};
pub use types::{Headers, Method, Request, RequestBody, RequestBuilder, Response};

pub use tokio_util::sync::CancellationToken;
