//! Inbound response model.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use super::{Headers, Request, REQUEST_ID_HEADER};
use crate::errors::ApiResult;

/// A received HTTP response, correlated with the request that produced it.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    headers: Headers,
    body: Bytes,
    request: Arc<Request>,
    elapsed: Duration,
}

impl Response {
    /// Creates a response.
    pub fn new(
        status: u16,
        headers: Headers,
        body: Bytes,
        request: Arc<Request>,
        elapsed: Duration,
    ) -> Self {
        Self {
            status,
            headers,
            body,
            request,
            elapsed,
        }
    }

    /// HTTP status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Looks up a single header, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Raw body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The request that produced this response.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Time spent on the attempt that produced this response.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Correlation id echoed by the server, else the one that was sent.
    pub fn request_id(&self) -> Option<&str> {
        self.headers
            .get(REQUEST_ID_HEADER)
            .or_else(|| self.request.request_id())
    }

    /// 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 4xx.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// 5xx.
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }

    /// 429 Too Many Requests.
    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }

    /// Wait hint from the `Retry-After` header, relative to now.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_at(Utc::now())
    }

    /// Wait hint from the `Retry-After` header, relative to `now`.
    pub fn retry_after_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.headers
            .get("retry-after")
            .and_then(|value| parse_retry_after(value, now))
    }

    /// Parses the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> ApiResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Body decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Parses a `Retry-After` value.
///
/// Accepts delta-seconds (`"120"`) or an HTTP-date
/// (`"Wed, 21 Oct 2015 07:28:00 GMT"`). Dates in the past yield zero.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&Utc) - now;
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn response(status: u16, headers: Headers, body: &'static [u8]) -> Response {
        Response::new(
            status,
            headers,
            Bytes::from_static(body),
            Arc::new(Request::get("https://api.example.com/").build()),
            Duration::from_millis(12),
        )
    }

    #[test]
    fn test_status_classification() {
        let ok = response(204, Headers::new(), b"");
        assert!(ok.is_success());
        assert!(!ok.is_client_error());

        let not_found = response(404, Headers::new(), b"");
        assert!(not_found.is_client_error());
        assert!(!not_found.is_rate_limited());

        let limited = response(429, Headers::new(), b"");
        assert!(limited.is_client_error());
        assert!(limited.is_rate_limited());

        let unavailable = response(503, Headers::new(), b"");
        assert!(unavailable.is_server_error());
        assert!(!unavailable.is_success());
    }

    #[test]
    fn test_retry_after_seconds() {
        let resp = response(429, Headers::new().with("Retry-After", "5"), b"");
        assert_eq!(resp.retry_after(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_retry_after_http_date() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 27, 30).unwrap();
        let resp = response(
            503,
            Headers::new().with("retry-after", "Wed, 21 Oct 2015 07:28:00 GMT"),
            b"",
        );
        assert_eq!(resp.retry_after_at(now), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_retry_after_past_date_is_zero() {
        let now = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", now),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_retry_after_absent_or_invalid() {
        assert_eq!(response(429, Headers::new(), b"").retry_after(), None);
        assert_eq!(parse_retry_after("soon", Utc::now()), None);
        assert_eq!(parse_retry_after("-3", Utc::now()), None);
    }

    #[test]
    fn test_json_and_text() {
        let resp = response(200, Headers::new(), br#"{"id":7}"#);
        let value: serde_json::Value = resp.json().unwrap();
        assert_eq!(value, json!({"id": 7}));
        assert_eq!(resp.text(), r#"{"id":7}"#);
    }

    #[test]
    fn test_request_id_prefers_server_echo() {
        let request = Arc::new(Request::get("/").header(REQUEST_ID_HEADER, "client-id").build());
        let echoed = Response::new(
            200,
            Headers::new().with("X-Request-Id", "server-id"),
            Bytes::new(),
            Arc::clone(&request),
            Duration::ZERO,
        );
        assert_eq!(echoed.request_id(), Some("server-id"));

        let silent = Response::new(200, Headers::new(), Bytes::new(), request, Duration::ZERO);
        assert_eq!(silent.request_id(), Some("client-id"));
    }
}
