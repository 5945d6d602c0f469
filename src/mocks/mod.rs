//! Mock implementations for testing.
//!
//! Deterministic stand-ins for the transport, telemetry sink and jitter
//! source, usable from unit tests and from downstream integration tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::observability::{Telemetry, TelemetryEvent};
use crate::resilience::JitterSource;
use crate::transport::{HttpTransport, TransportError, TransportRequest, TransportResponse};
use crate::types::Headers;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A canned response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: Headers,
    /// Response body
    pub body: Bytes,
    /// Time to wait before answering
    pub delay: Option<Duration>,
}

impl MockResponse {
    /// Create an empty response with this status
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
            delay: None,
        }
    }

    /// Create a JSON response
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status)
            .with_header("content-type", "application/json")
            .with_body(value.to_string())
    }

    /// Create an error response with a `{"message": ...}` body
    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, &serde_json::json!({ "message": message }))
    }

    /// Adds a header
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the body
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Delays the answer
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Debug, Clone)]
enum MockReply {
    Response(MockResponse),
    Error(TransportError),
    Echo,
}

/// Mock HTTP transport for testing.
///
/// Replies are consumed in order. Once the queue is empty the transport
/// answers 500, or echoes the request when built with [`MockTransport::echo`].
#[derive(Debug, Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<TransportRequest>>,
    echo_when_empty: bool,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport that echoes every request body back with status 200
    pub fn echo() -> Self {
        Self {
            echo_when_empty: true,
            ..Self::default()
        }
    }

    /// Create a transport answering with these statuses in order
    pub fn with_statuses<I: IntoIterator<Item = u16>>(statuses: I) -> Self {
        let transport = Self::new();
        for status in statuses {
            transport.push_status(status);
        }
        transport
    }

    /// Queue a response
    pub fn push_response(&self, response: MockResponse) {
        lock(&self.replies).push_back(MockReply::Response(response));
    }

    /// Queue an empty response with this status
    pub fn push_status(&self, status: u16) {
        self.push_response(MockResponse::new(status));
    }

    /// Queue a transport failure
    pub fn push_error(&self, error: TransportError) {
        lock(&self.replies).push_back(MockReply::Error(error));
    }

    /// Queue an echo of whatever request arrives next
    pub fn push_echo(&self) {
        lock(&self.replies).push_back(MockReply::Echo);
    }

    /// Get recorded requests
    pub fn requests(&self) -> Vec<TransportRequest> {
        lock(&self.requests).clone()
    }

    /// Get the last request
    pub fn last_request(&self) -> Option<TransportRequest> {
        lock(&self.requests).last().cloned()
    }

    /// Number of `send` invocations so far
    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Number of queued replies not yet consumed
    pub fn pending(&self) -> usize {
        lock(&self.replies).len()
    }
}

fn echo_response(request: &TransportRequest) -> TransportResponse {
    let mut headers = Headers::new();
    if let Some(content_type) = request.headers.get("content-type") {
        headers.insert("content-type", content_type);
    }
    TransportResponse {
        status: 200,
        headers,
        body: request.body.clone().unwrap_or_default(),
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        lock(&self.requests).push(request.clone());

        let reply = lock(&self.replies).pop_front();
        match reply {
            Some(MockReply::Response(response)) => {
                if let Some(delay) = response.delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(TransportResponse {
                    status: response.status,
                    headers: response.headers,
                    body: response.body,
                })
            }
            Some(MockReply::Error(error)) => Err(error),
            Some(MockReply::Echo) => Ok(echo_response(&request)),
            None if self.echo_when_empty => Ok(echo_response(&request)),
            None => Ok(TransportResponse::new(500, "No mock response configured")),
        }
    }
}

/// Telemetry sink keeping every event in memory.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Get recorded events
    pub fn events(&self) -> Vec<TelemetryEvent> {
        lock(&self.events).clone()
    }

    /// Number of recorded events
    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    /// Returns true if nothing was recorded
    pub fn is_empty(&self) -> bool {
        lock(&self.events).is_empty()
    }
}

impl Telemetry for RecordingTelemetry {
    fn record(&self, event: &TelemetryEvent) {
        lock(&self.events).push(event.clone());
    }
}

/// Jitter source returning the same sample every time.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(f64);

impl FixedJitter {
    /// Create a source returning `sample`, clamped to `[0, 1]`
    pub fn new(sample: f64) -> Self {
        Self(sample.clamp(0.0, 1.0))
    }

    /// A source that cancels jitter out entirely
    pub fn midpoint() -> Self {
        Self(0.5)
    }
}

impl JitterSource for FixedJitter {
    fn sample(&self) -> f64 {
        self.0
    }
}
