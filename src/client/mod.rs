//! The HTTP client.
//!
//! [`ApiClient`] composes the guard, the rate limiter, the retry policy and
//! a transport into one `send` call. Each call runs an explicit loop:
//! validate once, then per attempt acquire a token, send, classify, and
//! either finish or back off and go round again.

use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::{ClientConfig, ClientConfigBuilder};
use crate::errors::{ApiError, ApiResult, RequestSummary};
use crate::observability::{
    redact_headers, redact_url, ClientMetrics, DefaultMetricsCollector, EventOutcome,
    MetricsCollector, SensitiveHeaders, Telemetry, TelemetryEvent, TracingTelemetry,
};
use crate::resilience::{
    AttemptOutcome, JitterSource, RateLimiter, RetryConfig, RetryPolicy, ThreadRngJitter,
};
use crate::transport::{HttpTransport, ReqwestTransport, TransportError, TransportRequest};
use crate::types::{Headers, Method, Request, RequestBody, RequestBuilder, Response, REQUEST_ID_HEADER};

/// Rate-limited, retrying, guarded HTTP client.
///
/// Cheap to share: wrap it in an `Arc` and call it from as many tasks as
/// needed. The token bucket is the only state shared between calls.
///
/// # Example
///
/// ```rust,no_run
/// use resilient_http_client::ApiClient;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = ApiClient::builder()
///         .base_url("https://api.example.com/v1")
///         .requests_per_second(5.0)
///         .max_retries(3)
///         .build()?;
///
///     let response = client.get("/users/42").await?;
///     println!("{}", response.text());
///     Ok(())
/// }
/// ```
pub struct ApiClient {
    config: ClientConfig,
    transport: Arc<dyn HttpTransport>,
    rate_limiter: RateLimiter,
    retry_policy: RetryPolicy,
    telemetry: Arc<dyn Telemetry>,
    metrics: Arc<dyn MetricsCollector>,
}

/// Per-call retry bookkeeping; discarded when the call finishes.
struct RetryState {
    attempts: u32,
    started: Instant,
    last_failure: Option<String>,
}

impl RetryState {
    fn new(started: Instant) -> Self {
        Self {
            attempts: 0,
            started,
            last_failure: None,
        }
    }
}

/// Why a call stopped before its work finished.
enum Interrupt {
    Cancelled,
    Deadline(Duration),
}

impl ApiClient {
    /// Creates a new client builder.
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::new()
    }

    /// Creates a client with the reqwest transport.
    pub fn new(config: ClientConfig) -> ApiResult<Self> {
        ApiClientBuilder::from_config(config).build()
    }

    /// Creates a client from `API_CLIENT_*` environment variables.
    pub fn from_env() -> ApiResult<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns a snapshot of the collected metrics.
    pub fn metrics(&self) -> ClientMetrics {
        self.metrics.get_metrics()
    }

    /// Starts a request to `url` that can be finished with [`ApiClient::send`].
    pub fn request(&self, method: Method, url: impl Into<String>) -> RequestBuilder {
        Request::builder(method, url)
    }

    /// Sends a GET request.
    pub async fn get(&self, url: impl Into<String>) -> ApiResult<Response> {
        self.send(Request::get(url).build()).await
    }

    /// Sends a DELETE request.
    pub async fn delete(&self, url: impl Into<String>) -> ApiResult<Response> {
        self.send(Request::delete(url).build()).await
    }

    /// Sends a POST request with `body`.
    pub async fn post(&self, url: impl Into<String>, body: impl Into<RequestBody>) -> ApiResult<Response> {
        self.send(Request::post(url).body(body).build()).await
    }

    /// Sends a PUT request with `body`.
    pub async fn put(&self, url: impl Into<String>, body: impl Into<RequestBody>) -> ApiResult<Response> {
        self.send(Request::put(url).body(body).build()).await
    }

    /// Sends a PATCH request with `body`.
    pub async fn patch(&self, url: impl Into<String>, body: impl Into<RequestBody>) -> ApiResult<Response> {
        self.send(Request::patch(url).body(body).build()).await
    }

    /// Sends a POST request with `value` serialized as JSON.
    pub async fn post_json<T: Serialize + ?Sized>(&self, url: impl Into<String>, value: &T) -> ApiResult<Response> {
        self.send(Request::post(url).json(value)?.build()).await
    }

    /// Sends a PUT request with `value` serialized as JSON.
    pub async fn put_json<T: Serialize + ?Sized>(&self, url: impl Into<String>, value: &T) -> ApiResult<Response> {
        self.send(Request::put(url).json(value)?.build()).await
    }

    /// Sends a PATCH request with `value` serialized as JSON.
    pub async fn patch_json<T: Serialize + ?Sized>(&self, url: impl Into<String>, value: &T) -> ApiResult<Response> {
        self.send(Request::patch(url).json(value)?.build()).await
    }

    /// Sends `request`, retrying transient failures.
    pub async fn send(&self, request: Request) -> ApiResult<Response> {
        self.send_with_cancel(request, CancellationToken::new()).await
    }

    /// Sends `request`, abandoning it as soon as `cancel` fires.
    ///
    /// Cancellation interrupts rate-limit waits, backoff sleeps and in-flight
    /// attempts alike, and yields [`ApiError::Timeout`] with `cancelled` set.
    pub async fn send_with_cancel(&self, request: Request, cancel: CancellationToken) -> ApiResult<Response> {
        let started = Instant::now();
        let request = request
            .with_default_headers(&self.config.default_headers)
            .with_header_if_absent(REQUEST_ID_HEADER, Uuid::new_v4().to_string());

        let url = match self.config.guard.validate(&request, self.config.base_url.as_ref()) {
            Ok(url) => url,
            Err(e) => {
                warn!(
                    request_id = request.request_id().unwrap_or_default(),
                    method = %request.method(),
                    url = %redact_url(request.url()),
                    error = %e,
                    "Request rejected by guard"
                );
                let result = Err(ApiError::InvalidRequest {
                    message: e.to_string(),
                    request: Some(Box::new(self.summary(&request, request.url()))),
                });
                self.finish(&result, 0, started);
                return result;
            }
        };

        let request = Arc::new(request);
        let mut state = RetryState::new(started);
        let deadline = self.config.total_timeout.map(|t| (started + t, t));

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Interrupt::Cancelled),
            interrupt = wait_for_deadline(deadline) => Err(interrupt),
            result = self.execute(&request, &url, &mut state) => Ok(result),
        };

        let result = match outcome {
            Ok(result) => result,
            Err(interrupt) => Err(self.interrupted(interrupt, &request, &url, &state)),
        };

        self.finish(&result, state.attempts, started);
        result
    }

    async fn execute(&self, request: &Arc<Request>, url: &Url, state: &mut RetryState) -> ApiResult<Response> {
        let body = request.body().map(RequestBody::to_bytes).transpose()?;
        let headers = self.outgoing_headers(request);
        let timeout = request.timeout().unwrap_or(self.config.timeout);

        loop {
            self.rate_limiter.acquire().await;
            state.attempts += 1;

            let attempt_started = Instant::now();
            let transport_request = TransportRequest {
                method: request.method(),
                url: url.clone(),
                headers: headers.clone(),
                body: body.clone(),
                timeout: Some(timeout),
            };
            let sent = match tokio::time::timeout(timeout, self.transport.send(transport_request)).await {
                Ok(sent) => sent,
                Err(_) => Err(TransportError::Timeout { timeout }),
            };
            let elapsed = attempt_started.elapsed();

            match sent {
                Ok(raw) => {
                    let response = Response::new(raw.status, raw.headers, raw.body, Arc::clone(request), elapsed);
                    let outcome = AttemptOutcome::Response(&response);
                    let retry = self.retry_policy.should_retry(outcome, state.attempts);
                    self.record_attempt(request, url, state.attempts, EventOutcome::Status(response.status()), elapsed, retry);

                    if retry {
                        let delay = self.retry_policy.delay_for(outcome, state.attempts - 1);
                        state.last_failure = Some(format!("HTTP {}", response.status()));
                        info!(
                            request_id = request.request_id().unwrap_or_default(),
                            status = response.status(),
                            attempt = state.attempts,
                            delay_ms = delay.as_millis() as u64,
                            "Retrying after retryable status"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    return self.classify(response, url, state);
                }
                Err(error) => {
                    let retry = self
                        .retry_policy
                        .should_retry(AttemptOutcome::Transport(&error), state.attempts);
                    self.record_attempt(request, url, state.attempts, EventOutcome::Error(error.kind()), elapsed, retry);

                    if retry {
                        let delay = self
                            .retry_policy
                            .delay_for(AttemptOutcome::Transport(&error), state.attempts - 1);
                        info!(
                            request_id = request.request_id().unwrap_or_default(),
                            error = %error,
                            attempt = state.attempts,
                            delay_ms = delay.as_millis() as u64,
                            "Retrying after transport error"
                        );
                        state.last_failure = Some(error.to_string());
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    let exhausted = error.is_connectivity();
                    let err = self.transport_failure(error, request, url, state);
                    return Err(self.wrap_exhausted(err, exhausted, state));
                }
            }
        }
    }

    /// Final disposition of a response that will not be retried.
    fn classify(&self, response: Response, url: &Url, state: &RetryState) -> ApiResult<Response> {
        let status = response.status();
        if status < 400 || !self.config.raise_on_error {
            return Ok(response);
        }

        let outcome = AttemptOutcome::Response(&response);
        let retryable = self.retry_policy.is_retryable(outcome);
        // A wait hint above the ceiling ends the loop early; that is not exhaustion.
        let exhausted = retryable && !self.retry_policy.exceeds_retry_after(outcome);
        let err = ApiError::from_status(
            status,
            response.body(),
            response.retry_after(),
            self.summary(response.request(), url.as_str()),
        )
        .with_retryable(retryable);
        Err(self.wrap_exhausted(err, exhausted, state))
    }

    fn transport_failure(&self, error: TransportError, request: &Request, url: &Url, state: &RetryState) -> ApiError {
        let summary = Box::new(self.summary(request, url.as_str()));
        match error {
            TransportError::Timeout { timeout } => ApiError::Timeout {
                message: format!("attempt {} timed out after {timeout:?}", state.attempts),
                elapsed: state.started.elapsed(),
                cancelled: false,
                request: Some(summary),
            },
            TransportError::Blocked { message } => ApiError::InvalidRequest {
                message,
                request: Some(summary),
            },
            cause => ApiError::Transport {
                message: cause.to_string(),
                cause,
                request: summary,
            },
        }
    }

    fn wrap_exhausted(&self, err: ApiError, exhausted: bool, state: &RetryState) -> ApiError {
        if exhausted && state.attempts > 1 && self.retry_policy.config().wrap_exhausted {
            ApiError::RetryExhausted {
                attempts: state.attempts,
                last: Box::new(err),
            }
        } else {
            err
        }
    }

    fn interrupted(&self, interrupt: Interrupt, request: &Request, url: &Url, state: &RetryState) -> ApiError {
        let elapsed = state.started.elapsed();
        let last = state
            .last_failure
            .as_deref()
            .map(|f| format!("; last failure: {f}"))
            .unwrap_or_default();
        let (message, cancelled) = match interrupt {
            Interrupt::Cancelled => (
                format!("cancelled after {} attempt(s){last}", state.attempts),
                true,
            ),
            Interrupt::Deadline(limit) => (
                format!("total timeout of {limit:?} exceeded after {} attempt(s){last}", state.attempts),
                false,
            ),
        };
        ApiError::Timeout {
            message,
            elapsed,
            cancelled,
            request: Some(Box::new(self.summary(request, url.as_str()))),
        }
    }

    /// Headers actually put on the wire: request headers plus the implied
    /// content type and the configured bearer token.
    fn outgoing_headers(&self, request: &Request) -> Headers {
        let mut headers = request.headers().clone();
        if let Some(content_type) = request.body().and_then(RequestBody::content_type) {
            if !headers.contains("content-type") {
                headers.insert("content-type", content_type);
            }
        }
        if let Some(token) = self.config.bearer_token() {
            if !headers.contains("authorization") {
                headers.insert("authorization", format!("Bearer {token}"));
            }
        }
        headers
    }

    fn summary(&self, request: &Request, url: &str) -> RequestSummary {
        RequestSummary::new(request, url, &self.config.sensitive_headers)
    }

    fn record_attempt(
        &self,
        request: &Request,
        url: &Url,
        attempt: u32,
        outcome: EventOutcome,
        elapsed: Duration,
        will_retry: bool,
    ) {
        self.metrics.record_attempt(outcome.status(), elapsed);

        let event = TelemetryEvent {
            request_id: request.request_id().map(str::to_string),
            method: request.method(),
            url: redact_url(url.as_str()),
            attempt,
            outcome,
            elapsed,
            headers: redact_headers(request.headers(), &self.config.sensitive_headers),
            will_retry,
        };
        if catch_unwind(AssertUnwindSafe(|| self.telemetry.record(&event))).is_err() {
            debug!("Telemetry sink panicked; event dropped");
        }
    }

    fn finish(&self, result: &ApiResult<Response>, attempts: u32, started: Instant) {
        self.metrics
            .record_request(result.is_ok(), attempts, started.elapsed());
        if let Err(err) = result {
            debug!(error = %err, attempts, "Request failed");
            self.metrics.record_error(err.kind());
        }
    }
}

async fn wait_for_deadline(deadline: Option<(Instant, Duration)>) -> Interrupt {
    match deadline {
        Some((at, limit)) => {
            tokio::time::sleep_until(at).await;
            Interrupt::Deadline(limit)
        }
        None => std::future::pending().await,
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", &self.config)
            .field("rate_limiter", &self.rate_limiter)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ApiClient`].
pub struct ApiClientBuilder {
    config_builder: ClientConfigBuilder,
    config: Option<ClientConfig>,
    transport: Option<Arc<dyn HttpTransport>>,
    telemetry: Option<Arc<dyn Telemetry>>,
    metrics: Option<Arc<dyn MetricsCollector>>,
    jitter: Option<Arc<dyn JitterSource>>,
}

impl ApiClientBuilder {
    /// Creates a new client builder.
    pub fn new() -> Self {
        Self {
            config_builder: ClientConfigBuilder::new(),
            config: None,
            transport: None,
            telemetry: None,
            metrics: None,
            jitter: None,
        }
    }

    /// Creates a builder from an existing configuration.
    ///
    /// Configuration setters on the builder are ignored afterwards.
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config: Some(config),
            ..Self::new()
        }
    }

    /// Sets the base URL for relative request paths.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.base_url(base_url);
        self
    }

    /// Adds a header sent with every request.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.default_header(name, value);
        self
    }

    /// Sets a bearer token.
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.bearer_token(token);
        self
    }

    /// Sets the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config_builder = self.config_builder.timeout(timeout);
        self
    }

    /// Sets a ceiling on total elapsed time across attempts.
    pub fn total_timeout(mut self, timeout: Duration) -> Self {
        self.config_builder = self.config_builder.total_timeout(timeout);
        self
    }

    /// Sets the retry configuration.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config_builder = self.config_builder.retry(retry);
        self
    }

    /// Allows `retries` retries after the first attempt.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config_builder = self.config_builder.max_retries(retries);
        self
    }

    /// Sets the total number of attempts.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config_builder = self.config_builder.max_attempts(attempts);
        self
    }

    /// Sets the longest server `Retry-After` hint that is waited out.
    pub fn max_retry_after(mut self, ceiling: Duration) -> Self {
        self.config_builder = self.config_builder.max_retry_after(ceiling);
        self
    }

    /// Enables rate limiting.
    pub fn requests_per_second(mut self, rps: f64) -> Self {
        self.config_builder = self.config_builder.requests_per_second(rps);
        self
    }

    /// Sets the token-bucket capacity.
    pub fn burst(mut self, burst: u32) -> Self {
        self.config_builder = self.config_builder.burst(burst);
        self
    }

    /// Chooses whether 4xx/5xx responses are returned as errors.
    pub fn raise_on_error(mut self, raise: bool) -> Self {
        self.config_builder = self.config_builder.raise_on_error(raise);
        self
    }

    /// Restricts requests to exactly these hosts.
    pub fn allowed_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config_builder = self.config_builder.allowed_hosts(hosts);
        self
    }

    /// Replaces the sensitive header patterns.
    pub fn sensitive_headers(mut self, sensitive: SensitiveHeaders) -> Self {
        self.config_builder = self.config_builder.sensitive_headers(sensitive);
        self
    }

    /// Sets a custom transport.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets a custom telemetry sink.
    pub fn telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Sets a custom metrics collector.
    pub fn metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Sets the random source used for backoff jitter.
    pub fn jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Builds the client.
    pub fn build(self) -> ApiResult<ApiClient> {
        let config = match self.config {
            Some(config) => {
                config.validate()?;
                config
            }
            None => self.config_builder.build()?,
        };

        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                ReqwestTransport::new(config.guard.clone(), config.timeout)
                    .map_err(|e| ApiError::configuration(format!("Failed to create transport: {e}")))?,
            ),
        };

        let jitter = self.jitter.unwrap_or_else(|| Arc::new(ThreadRngJitter));

        Ok(ApiClient {
            rate_limiter: RateLimiter::from_config(config.rate_limit),
            retry_policy: RetryPolicy::with_jitter(config.retry.clone(), jitter),
            telemetry: self.telemetry.unwrap_or_else(|| Arc::new(TracingTelemetry)),
            metrics: self
                .metrics
                .unwrap_or_else(|| Arc::new(DefaultMetricsCollector::new())),
            transport,
            config,
        })
    }
}

impl Default for ApiClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ApiClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClientBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{FixedJitter, MockResponse, MockTransport};
    use crate::observability::MockTelemetry;
    use pretty_assertions::assert_eq;

    fn client_with(transport: Arc<MockTransport>, telemetry: Arc<dyn Telemetry>) -> ApiClient {
        ApiClient::builder()
            .base_url("https://api.example.com/v1")
            .max_retries(3)
            .transport(transport)
            .telemetry(telemetry)
            .jitter(Arc::new(FixedJitter::midpoint()))
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_event_per_attempt() {
        let transport = Arc::new(MockTransport::with_statuses([500, 503, 200]));
        let mut telemetry = MockTelemetry::new();
        telemetry.expect_record().times(3).return_const(());
        let client = client_with(transport.clone(), Arc::new(telemetry));

        let response = client.get("/items").await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_attempt_numbers_and_retry_flags() {
        let transport = Arc::new(MockTransport::with_statuses([502, 200]));
        let mut telemetry = MockTelemetry::new();
        let mut seq = mockall::Sequence::new();
        telemetry
            .expect_record()
            .withf(|e| e.attempt == 1 && e.will_retry && e.outcome == EventOutcome::Status(502))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        telemetry
            .expect_record()
            .withf(|e| e.attempt == 2 && !e.will_retry && e.outcome == EventOutcome::Status(200))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        let client = client_with(transport, Arc::new(telemetry));

        client.get("/items").await.unwrap();
    }

    struct PanickingTelemetry;

    impl Telemetry for PanickingTelemetry {
        fn record(&self, _event: &TelemetryEvent) {
            panic!("sink exploded");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_sink_does_not_fail_request() {
        let transport = Arc::new(MockTransport::with_statuses([200]));
        let client = client_with(transport, Arc::new(PanickingTelemetry));

        assert!(client.get("/items").await.is_ok());
    }

    #[tokio::test]
    async fn test_outgoing_headers_add_content_type_and_bearer() {
        let transport = Arc::new(MockTransport::echo());
        let client = ApiClient::builder()
            .bearer_token("sk-live")
            .transport(transport.clone())
            .telemetry(Arc::new(crate::observability::NoopTelemetry))
            .build()
            .unwrap();

        client
            .post_json("https://api.example.com/items", &serde_json::json!({"a": 1}))
            .await
            .unwrap();

        let sent = transport.last_request().unwrap();
        assert_eq!(sent.headers.get("content-type"), Some("application/json"));
        assert_eq!(sent.headers.get("authorization"), Some("Bearer sk-live"));
        assert!(sent.headers.contains(REQUEST_ID_HEADER));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_mock_response_hits_attempt_timeout() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(MockResponse::new(200).with_delay(Duration::from_secs(5)));
        let client = ApiClient::builder()
            .timeout(Duration::from_secs(1))
            .max_attempts(1)
            .transport(transport)
            .telemetry(Arc::new(crate::observability::NoopTelemetry))
            .build()
            .unwrap();

        let err = client.get("https://api.example.com/slow").await.unwrap_err();
        assert!(matches!(err, ApiError::Timeout { cancelled: false, .. }));
    }
}
