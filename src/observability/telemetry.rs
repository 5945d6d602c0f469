//! Per-attempt telemetry events.

use std::time::Duration;
use tracing::{info, warn};

use crate::types::{Headers, Method};

/// How a single attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// The server answered with this status.
    Status(u16),
    /// No response; the label names the failure class.
    Error(&'static str),
}

impl EventOutcome {
    /// Returns the status code, if the attempt produced a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            EventOutcome::Status(status) => Some(*status),
            EventOutcome::Error(_) => None,
        }
    }
}

/// One structured record per transport attempt.
///
/// URL and headers are already redacted when the event is built.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEvent {
    /// Correlation id of the logical request.
    pub request_id: Option<String>,
    /// HTTP method.
    pub method: Method,
    /// Redacted target URL.
    pub url: String,
    /// One-based attempt number.
    pub attempt: u32,
    /// Status code or error label.
    pub outcome: EventOutcome,
    /// Duration of this attempt.
    pub elapsed: Duration,
    /// Redacted request headers.
    pub headers: Headers,
    /// Whether the client will try again.
    pub will_retry: bool,
}

/// Sink for telemetry events.
///
/// Implementations must not block; failures are the sink's own concern.
#[cfg_attr(test, mockall::automock)]
pub trait Telemetry: Send + Sync {
    /// Records one event.
    fn record(&self, event: &TelemetryEvent);
}

/// Emits each event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn record(&self, event: &TelemetryEvent) {
        let elapsed_ms = event.elapsed.as_millis() as u64;
        let request_id = event.request_id.as_deref().unwrap_or_default();
        match &event.outcome {
            EventOutcome::Status(status) if *status < 400 => info!(
                request_id,
                method = %event.method,
                url = %event.url,
                attempt = event.attempt,
                status,
                elapsed_ms,
                "HTTP request completed"
            ),
            EventOutcome::Status(status) => warn!(
                request_id,
                method = %event.method,
                url = %event.url,
                attempt = event.attempt,
                status,
                elapsed_ms,
                will_retry = event.will_retry,
                "HTTP request returned error status"
            ),
            EventOutcome::Error(kind) => warn!(
                request_id,
                method = %event.method,
                url = %event.url,
                attempt = event.attempt,
                error = kind,
                elapsed_ms,
                will_retry = event.will_retry,
                "HTTP request failed"
            ),
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn record(&self, _event: &TelemetryEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(outcome: EventOutcome) -> TelemetryEvent {
        TelemetryEvent {
            request_id: Some("req-1".to_string()),
            method: Method::Get,
            url: "https://api.example.com/".to_string(),
            attempt: 1,
            outcome,
            elapsed: Duration::from_millis(12),
            headers: Headers::new(),
            will_retry: false,
        }
    }

    #[test]
    fn test_outcome_status() {
        assert_eq!(EventOutcome::Status(503).status(), Some(503));
        assert_eq!(EventOutcome::Error("timeout").status(), None);
    }

    #[test]
    fn test_sinks_accept_every_outcome() {
        for outcome in [
            EventOutcome::Status(200),
            EventOutcome::Status(500),
            EventOutcome::Error("connection"),
        ] {
            TracingTelemetry.record(&event(outcome.clone()));
            NoopTelemetry.record(&event(outcome));
        }
    }
}
