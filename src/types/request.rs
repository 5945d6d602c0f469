//! Outbound request model.

use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use super::Headers;
use crate::errors::{ApiError, ApiResult};

/// Header carrying the per-call correlation identifier.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET request.
    Get,
    /// POST request.
    Post,
    /// PUT request.
    Put,
    /// DELETE request.
    Delete,
    /// PATCH request.
    Patch,
}

impl Method {
    /// Returns the canonical upper-case method name.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
            Method::Patch => reqwest::Method::PATCH,
        }
    }
}

/// Request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Raw bytes, sent as-is.
    Bytes(Bytes),
    /// A JSON document, serialized at send time.
    Json(serde_json::Value),
}

impl RequestBody {
    /// Serializes the body to wire bytes.
    pub fn to_bytes(&self) -> ApiResult<Bytes> {
        match self {
            RequestBody::Bytes(bytes) => Ok(bytes.clone()),
            RequestBody::Json(value) => Ok(Bytes::from(serde_json::to_vec(value)?)),
        }
    }

    /// Content type implied by the body, if any.
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            RequestBody::Bytes(_) => None,
            RequestBody::Json(_) => Some("application/json"),
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        RequestBody::Bytes(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        RequestBody::Bytes(Bytes::from(bytes))
    }
}

impl From<&'static str> for RequestBody {
    fn from(text: &'static str) -> Self {
        RequestBody::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        RequestBody::Bytes(Bytes::from(text))
    }
}

impl From<serde_json::Value> for RequestBody {
    fn from(value: serde_json::Value) -> Self {
        RequestBody::Json(value)
    }
}

/// An immutable outbound request.
///
/// The target may be an absolute `http(s)` URL or a path that the client
/// resolves against its configured base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    method: Method,
    url: String,
    headers: Headers,
    body: Option<RequestBody>,
    timeout: Option<Duration>,
}

impl Request {
    /// Creates a request with no headers or body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: None,
            timeout: None,
        }
    }

    /// Starts building a request.
    pub fn builder(method: Method, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            request: Self::new(method, url),
        }
    }

    /// Creates a GET request.
    pub fn get(url: impl Into<String>) -> RequestBuilder {
        Self::builder(Method::Get, url)
    }

    /// Creates a POST request.
    pub fn post(url: impl Into<String>) -> RequestBuilder {
        Self::builder(Method::Post, url)
    }

    /// Creates a PUT request.
    pub fn put(url: impl Into<String>) -> RequestBuilder {
        Self::builder(Method::Put, url)
    }

    /// Creates a DELETE request.
    pub fn delete(url: impl Into<String>) -> RequestBuilder {
        Self::builder(Method::Delete, url)
    }

    /// Creates a PATCH request.
    pub fn patch(url: impl Into<String>) -> RequestBuilder {
        Self::builder(Method::Patch, url)
    }

    /// HTTP method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Target URL or path, exactly as supplied.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Request body.
    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    /// Per-request timeout override.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Correlation identifier, if one has been assigned.
    pub fn request_id(&self) -> Option<&str> {
        self.headers.get(REQUEST_ID_HEADER)
    }

    /// Returns a copy with `defaults` applied underneath the request's own
    /// headers.
    pub(crate) fn with_default_headers(&self, defaults: &Headers) -> Self {
        let mut headers = defaults.clone();
        headers.merge(&self.headers);
        Self {
            headers,
            ..self.clone()
        }
    }

    /// Returns a copy carrying one extra header, unless it is already set.
    pub(crate) fn with_header_if_absent(mut self, name: &str, value: impl Into<String>) -> Self {
        if !self.headers.contains(name) {
            self.headers.insert(name, value);
        }
        self
    }
}

/// Builder for [`Request`].
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    /// Sets a header. Values are not validated here.
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.request.headers.insert(name, value);
        self
    }

    /// Adds every header in `headers`.
    pub fn headers(mut self, headers: &Headers) -> Self {
        self.request.headers.merge(headers);
        self
    }

    /// Sets the body.
    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.request.body = Some(body.into());
        self
    }

    /// Serializes `value` into a JSON body and sets the content type.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> ApiResult<Self> {
        let value = serde_json::to_value(value).map_err(ApiError::from)?;
        self.request.body = Some(RequestBody::Json(value));
        Ok(self)
    }

    /// Sets the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.request.timeout = Some(timeout);
        self
    }

    /// Finishes the request.
    pub fn build(self) -> Request {
        self.request
    }
}

impl From<RequestBuilder> for Request {
    fn from(builder: RequestBuilder) -> Self {
        builder.build()
    }
}
