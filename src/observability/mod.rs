//! Observability: telemetry events, metrics, redaction and logging setup.

mod logging;
mod metrics;
mod redact;
mod telemetry;

pub use logging::{init_tracing, LogFormat, LogLevel, LoggingConfig};
pub use metrics::{ClientMetrics, DefaultMetricsCollector, MetricsCollector};
pub use redact::{redact_headers, redact_url, redact_value, SensitiveHeaders, REDACTED};
pub use telemetry::{EventOutcome, NoopTelemetry, Telemetry, TelemetryEvent, TracingTelemetry};

#[cfg(test)]
pub(crate) use telemetry::MockTelemetry;
