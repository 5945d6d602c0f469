//! HTTP transport implementation.

use async_trait::async_trait;
use hyper::client::connect::dns::Name;
use reqwest::dns::{Addrs, Resolve, Resolving};
use reqwest::redirect;
use reqwest::{Client, ClientBuilder};
use std::error::Error as StdError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

use super::{HttpTransport, TransportError, TransportRequest, TransportResponse};
use crate::guard::{GuardError, GuardPolicy};
use crate::types::Headers;

const MAX_REDIRECTS: usize = 10;

/// HTTP transport implementation using reqwest.
///
/// DNS answers and redirect targets are re-checked against the
/// [`GuardPolicy`], so a hostname that passes validation but resolves to an
/// internal address is still refused at connect time.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Creates a transport enforcing `guard` on resolution and redirects.
    pub fn new(guard: GuardPolicy, timeout: Duration) -> Result<Self, TransportError> {
        let resolver = Arc::new(GuardedResolver {
            guard: guard.clone(),
        });

        let client = ClientBuilder::new()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Duration::from_secs(60))
            .dns_resolver(resolver)
            .redirect(guarded_redirects(guard))
            .build()
            .map_err(|e| TransportError::Connection {
                message: e.to_string(),
            })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    #[instrument(skip(self, request), fields(method = %request.method, host = request.url.host_str().unwrap_or_default()))]
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let started = Instant::now();
        let mut req_builder = self
            .client
            .request(request.method.into(), request.url.clone());

        for (name, value) in &request.headers {
            req_builder = req_builder.header(name, value);
        }

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        if let Some(timeout) = request.timeout {
            req_builder = req_builder.timeout(timeout);
        }

        let response = req_builder
            .send()
            .await
            .map_err(|e| classify(e, request.timeout))?;

        let status = response.status().as_u16();
        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            headers.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| classify(e, request.timeout))?;

        debug!(status, elapsed_ms = started.elapsed().as_millis() as u64, "Transport exchange complete");

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport").finish_non_exhaustive()
    }
}

/// Raised by the resolver when the system lookup itself fails.
#[derive(Debug, thiserror::Error)]
#[error("failed to resolve '{host}': {source}")]
struct ResolveFailure {
    host: String,
    source: std::io::Error,
}

struct GuardedResolver {
    guard: GuardPolicy,
}

impl Resolve for GuardedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let guard = self.guard.clone();
        Box::pin(async move {
            let host = name.as_str().to_string();
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0))
                .await
                .map_err(|source| ResolveFailure {
                    host: host.clone(),
                    source,
                })?
                .collect();

            for addr in &addrs {
                guard.validate_resolved(&host, addr.ip())?;
            }

            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok::<_, Box<dyn StdError + Send + Sync>>(addrs)
        })
    }
}

fn guarded_redirects(guard: GuardPolicy) -> redirect::Policy {
    redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        match guard.validate_url(attempt.url()) {
            Ok(()) => attempt.follow(),
            Err(e) => attempt.error(e),
        }
    })
}

fn classify(err: reqwest::Error, timeout: Option<Duration>) -> TransportError {
    // Messages end up in errors and logs; the URL may carry secrets.
    let err = err.without_url();
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    let mut tls = false;
    while let Some(cause) = source {
        if let Some(blocked) = cause.downcast_ref::<GuardError>() {
            return TransportError::Blocked {
                message: blocked.to_string(),
            };
        }
        if let Some(failure) = cause.downcast_ref::<ResolveFailure>() {
            return TransportError::Dns {
                message: failure.to_string(),
            };
        }
        let text = cause.to_string().to_ascii_lowercase();
        tls |= text.contains("certificate") || text.contains("tls") || text.contains("handshake");
        source = cause.source();
    }

    if err.is_timeout() {
        TransportError::Timeout {
            timeout: timeout.unwrap_or_default(),
        }
    } else if tls {
        TransportError::Tls {
            message: err.to_string(),
        }
    } else if err.is_connect() || err.is_request() {
        TransportError::Connection {
            message: err.to_string(),
        }
    } else {
        TransportError::InvalidResponse {
            message: err.to_string(),
        }
    }
}
