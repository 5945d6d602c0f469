//! Metrics collection for the client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use crate::errors::ErrorKind;

/// Metrics collector interface.
pub trait MetricsCollector: Send + Sync {
    /// Records one transport attempt; `status` is `None` when no response arrived.
    fn record_attempt(&self, status: Option<u16>, duration: Duration);

    /// Records the end of a logical request.
    fn record_request(&self, success: bool, attempts: u32, duration: Duration);

    /// Records a terminal error.
    fn record_error(&self, kind: ErrorKind);

    /// Gets current metrics.
    fn get_metrics(&self) -> ClientMetrics;

    /// Resets all metrics.
    fn reset(&self);
}

/// Client metrics snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientMetrics {
    /// Logical requests completed.
    pub total_requests: u64,
    /// Requests that returned a response.
    pub successful_requests: u64,
    /// Requests that returned an error.
    pub failed_requests: u64,
    /// Transport attempts made.
    pub total_attempts: u64,
    /// Attempts beyond the first.
    pub retries: u64,
    /// Total request latency in milliseconds.
    pub total_latency_ms: u64,
    /// Attempts by response status.
    pub status_codes: HashMap<u16, u64>,
    /// Terminal errors by kind.
    pub errors: HashMap<String, u64>,
}

impl ClientMetrics {
    /// Calculates average latency in milliseconds.
    pub fn average_latency_ms(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.total_requests as f64
        }
    }

    /// Calculates success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            100.0
        } else {
            (self.successful_requests as f64 / self.total_requests as f64) * 100.0
        }
    }
}

/// Default metrics collector implementation.
pub struct DefaultMetricsCollector {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    total_attempts: AtomicU64,
    retries: AtomicU64,
    total_latency_ms: AtomicU64,
    status_codes: RwLock<HashMap<u16, u64>>,
    errors: RwLock<HashMap<String, u64>>,
}

impl DefaultMetricsCollector {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            total_attempts: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            status_codes: RwLock::new(HashMap::new()),
            errors: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for DefaultMetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector for DefaultMetricsCollector {
    fn record_attempt(&self, status: Option<u16>, _duration: Duration) {
        self.total_attempts.fetch_add(1, Ordering::Relaxed);

        if let Some(status) = status {
            if let Ok(mut codes) = self.status_codes.write() {
                *codes.entry(status).or_insert(0) += 1;
            }
        }
    }

    fn record_request(&self, success: bool, attempts: u32, duration: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }

        self.retries
            .fetch_add(u64::from(attempts.saturating_sub(1)), Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    fn record_error(&self, kind: ErrorKind) {
        if let Ok(mut errors) = self.errors.write() {
            *errors.entry(kind.as_str().to_string()).or_insert(0) += 1;
        }
    }

    fn get_metrics(&self) -> ClientMetrics {
        ClientMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            total_attempts: self.total_attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            total_latency_ms: self.total_latency_ms.load(Ordering::Relaxed),
            status_codes: self.status_codes.read().map(|c| c.clone()).unwrap_or_default(),
            errors: self.errors.read().map(|e| e.clone()).unwrap_or_default(),
        }
    }

    fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.successful_requests.store(0, Ordering::Relaxed);
        self.failed_requests.store(0, Ordering::Relaxed);
        self.total_attempts.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
        self.total_latency_ms.store(0, Ordering::Relaxed);

        if let Ok(mut codes) = self.status_codes.write() {
            codes.clear();
        }
        if let Ok(mut errors) = self.errors.write() {
            errors.clear();
        }
    }
}

impl std::fmt::Debug for DefaultMetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultMetricsCollector")
            .field("total_requests", &self.total_requests.load(Ordering::Relaxed))
            .field("total_attempts", &self.total_attempts.load(Ordering::Relaxed))
            .field("failed_requests", &self.failed_requests.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_request() {
        let collector = DefaultMetricsCollector::new();

        collector.record_request(true, 1, Duration::from_millis(100));
        collector.record_request(true, 3, Duration::from_millis(200));
        collector.record_request(false, 4, Duration::from_millis(50));

        let metrics = collector.get_metrics();
        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.successful_requests, 2);
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.retries, 5);
        assert_eq!(metrics.total_latency_ms, 350);
    }

    #[test]
    fn test_record_attempt_counts_statuses() {
        let collector = DefaultMetricsCollector::new();

        collector.record_attempt(Some(500), Duration::from_millis(5));
        collector.record_attempt(Some(500), Duration::from_millis(5));
        collector.record_attempt(None, Duration::from_millis(5));
        collector.record_attempt(Some(200), Duration::from_millis(5));

        let metrics = collector.get_metrics();
        assert_eq!(metrics.total_attempts, 4);
        assert_eq!(metrics.status_codes.get(&500), Some(&2));
        assert_eq!(metrics.status_codes.get(&200), Some(&1));
    }

    #[test]
    fn test_average_latency_and_success_rate() {
        let collector = DefaultMetricsCollector::new();

        collector.record_request(true, 1, Duration::from_millis(100));
        collector.record_request(false, 1, Duration::from_millis(200));

        let metrics = collector.get_metrics();
        assert!((metrics.average_latency_ms() - 150.0).abs() < 0.1);
        assert!((metrics.success_rate() - 50.0).abs() < 0.1);
    }

    #[test]
    fn test_record_error_and_reset() {
        let collector = DefaultMetricsCollector::new();

        collector.record_error(ErrorKind::Server);
        collector.record_error(ErrorKind::Server);
        collector.record_error(ErrorKind::Timeout);

        let metrics = collector.get_metrics();
        assert_eq!(metrics.errors.get("server_error"), Some(&2));
        assert_eq!(metrics.errors.get("timeout"), Some(&1));

        collector.reset();
        assert_eq!(collector.get_metrics(), ClientMetrics::default());
    }
}
