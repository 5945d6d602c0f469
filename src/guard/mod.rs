//! Outbound request guard.
//!
//! Every request passes through [`GuardPolicy::validate`] before the rate
//! limiter or the transport sees it. The guard rejects non-HTTP schemes,
//! literal internal addresses, `localhost`, hosts outside a configured
//! allow-list, header injection and path traversal. Transports that resolve
//! DNS themselves call [`GuardPolicy::validate_resolved`] on every address
//! they are about to connect to.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use url::{Host, Url};

use crate::types::{Headers, Request};

/// Reasons the guard refuses a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    /// The target could not be parsed as a URL.
    #[error("Invalid URL: {message}")]
    InvalidUrl {
        /// Parser message.
        message: String,
    },

    /// Scheme other than http or https.
    #[error("Unsupported URL scheme '{scheme}': only http and https are allowed")]
    UnsupportedScheme {
        /// The rejected scheme.
        scheme: String,
    },

    /// URL without a host component.
    #[error("URL has no host")]
    MissingHost,

    /// Host is, or resolves to, an internal address.
    #[error("Blocked internal host '{host}': {reason}")]
    BlockedHost {
        /// The rejected host.
        host: String,
        /// Which address class matched.
        reason: &'static str,
    },

    /// Host does not appear in the configured allow-list.
    #[error("Host '{host}' is not in the allowed hosts list")]
    HostNotAllowed {
        /// The rejected host.
        host: String,
    },

    /// Header name or value contains CR or LF.
    #[error("Header '{name}' contains CR or LF characters")]
    HeaderInjection {
        /// Offending header name, with control characters escaped.
        name: String,
    },

    /// Request path climbs out of its base with `..` segments.
    #[error("Path traversal detected in '{path}'")]
    PathTraversal {
        /// The offending path.
        path: String,
    },
}

/// Host and address restrictions applied to outbound requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuardPolicy {
    allowed_hosts: Option<BTreeSet<String>>,
}

impl GuardPolicy {
    /// Creates a policy with no allow-list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts requests to exactly these hosts.
    ///
    /// Listed hosts also bypass the internal-address check, which is how
    /// callers reach an intentionally local service.
    pub fn with_allowed_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_hosts = Some(hosts.into_iter().map(|h| normalize_host(h.as_ref())).collect());
        self
    }

    /// Returns the allow-list, if one is configured.
    pub fn allowed_hosts(&self) -> Option<&BTreeSet<String>> {
        self.allowed_hosts.as_ref()
    }

    /// Returns true if `host` is explicitly listed.
    pub fn is_allowed(&self, host: &str) -> bool {
        self.allowed_hosts
            .as_ref()
            .is_some_and(|hosts| hosts.contains(&normalize_host(host)))
    }

    /// Resolves the request target against `base_url` and checks the result.
    ///
    /// Returns the absolute URL the transport should use.
    pub fn validate(&self, request: &Request, base_url: Option<&Url>) -> Result<Url, GuardError> {
        check_path_traversal(request.url())?;
        let url = resolve_url(base_url, request.url())?;
        self.validate_url(&url)?;
        self.validate_headers(request.headers())?;
        Ok(url)
    }

    /// Checks scheme, host and allow-list of an absolute URL.
    pub fn validate_url(&self, url: &Url) -> Result<(), GuardError> {
        let scheme = url.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(GuardError::UnsupportedScheme {
                scheme: scheme.to_string(),
            });
        }

        let host = url.host().ok_or(GuardError::MissingHost)?;
        let host_key = host_key(&host);

        if let Some(allowed) = &self.allowed_hosts {
            return if allowed.contains(&host_key) {
                Ok(())
            } else {
                Err(GuardError::HostNotAllowed { host: host_key })
            };
        }

        match host {
            Host::Domain(domain) => check_domain(domain),
            Host::Ipv4(addr) => check_ip(&host_key, IpAddr::V4(addr)),
            Host::Ipv6(addr) => check_ip(&host_key, IpAddr::V6(addr)),
        }
    }

    /// Rejects header names or values carrying CR or LF.
    pub fn validate_headers(&self, headers: &Headers) -> Result<(), GuardError> {
        for (name, value) in headers {
            if has_line_break(name) || has_line_break(value) {
                return Err(GuardError::HeaderInjection {
                    name: name.escape_debug().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Re-checks an address that `host` resolved to.
    pub fn validate_resolved(&self, host: &str, addr: IpAddr) -> Result<(), GuardError> {
        if self.is_allowed(host) {
            return Ok(());
        }
        check_ip(host, addr)
    }
}

/// Joins a relative target onto `base`, or parses an absolute target as is.
///
/// The base path is treated as a directory: `https://api.example.com/v1`
/// joined with `/users` yields `https://api.example.com/v1/users`.
pub fn resolve_url(base: Option<&Url>, target: &str) -> Result<Url, GuardError> {
    match Url::parse(target) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = base.ok_or_else(|| GuardError::InvalidUrl {
                message: format!("relative URL '{target}' requires a base URL"),
            })?;
            let mut base = base.clone();
            if !base.path().ends_with('/') {
                let path = format!("{}/", base.path());
                base.set_path(&path);
            }
            base.join(target.trim_start_matches('/'))
                .map_err(|e| GuardError::InvalidUrl {
                    message: e.to_string(),
                })
        }
        Err(e) => Err(GuardError::InvalidUrl {
            message: e.to_string(),
        }),
    }
}

/// Returns true for addresses that must never be reached from outside.
///
/// Covers loopback, private, link-local, unspecified, broadcast, multicast,
/// carrier-grade NAT, IPv6 unique-local, and IPv4-mapped forms of these.
pub fn is_internal_address(addr: IpAddr) -> bool {
    internal_reason(addr).is_some()
}

fn internal_reason(addr: IpAddr) -> Option<&'static str> {
    match addr {
        IpAddr::V4(v4) => ipv4_reason(v4),
        IpAddr::V6(v6) => ipv6_reason(v6),
    }
}

fn ipv4_reason(addr: Ipv4Addr) -> Option<&'static str> {
    let octets = addr.octets();
    if addr.is_loopback() {
        Some("loopback address")
    } else if addr.is_private() {
        Some("private address")
    } else if addr.is_link_local() {
        Some("link-local address")
    } else if addr.is_unspecified() {
        Some("unspecified address")
    } else if addr.is_broadcast() {
        Some("broadcast address")
    } else if addr.is_multicast() {
        Some("multicast address")
    } else if octets[0] == 100 && (octets[1] & 0xc0) == 64 {
        Some("shared address space")
    } else if octets[0] == 0 {
        Some("this-network address")
    } else {
        None
    }
}

fn ipv6_reason(addr: Ipv6Addr) -> Option<&'static str> {
    if let Some(mapped) = addr.to_ipv4_mapped() {
        return ipv4_reason(mapped);
    }
    let first = addr.segments()[0];
    if addr.is_loopback() {
        Some("loopback address")
    } else if addr.is_unspecified() {
        Some("unspecified address")
    } else if addr.is_multicast() {
        Some("multicast address")
    } else if (first & 0xffc0) == 0xfe80 {
        Some("link-local address")
    } else if (first & 0xfe00) == 0xfc00 {
        Some("unique local address")
    } else {
        None
    }
}

fn check_ip(host: &str, addr: IpAddr) -> Result<(), GuardError> {
    match internal_reason(addr) {
        Some(reason) => Err(GuardError::BlockedHost {
            host: host.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

fn check_domain(domain: &str) -> Result<(), GuardError> {
    let name = normalize_host(domain);
    if name == "localhost" || name.ends_with(".localhost") {
        return Err(GuardError::BlockedHost {
            host: name,
            reason: "localhost",
        });
    }
    if [".local", ".internal", ".intranet"]
        .iter()
        .any(|suffix| name.ends_with(suffix))
    {
        tracing::warn!(host = %name, "Potentially internal hostname");
    }
    Ok(())
}

fn check_path_traversal(target: &str) -> Result<(), GuardError> {
    let path = target
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    let traverses = path.split(['/', '\\']).any(|segment| {
        let lowered = segment.to_ascii_lowercase();
        lowered == ".." || lowered == "%2e%2e" || lowered == ".%2e" || lowered == "%2e."
    });
    if traverses {
        return Err(GuardError::PathTraversal {
            path: path.to_string(),
        });
    }
    Ok(())
}

fn has_line_break(s: &str) -> bool {
    s.contains(['\r', '\n'])
}

fn host_key(host: &Host<&str>) -> String {
    match host {
        Host::Domain(domain) => normalize_host(domain),
        Host::Ipv4(addr) => addr.to_string(),
        Host::Ipv6(addr) => addr.to_string(),
    }
}

fn normalize_host(host: &str) -> String {
    host.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test_case("https://api.example.com/v1" ; "public https")]
    #[test_case("http://93.184.216.34/" ; "public ipv4")]
    #[test_case("https://[2606:4700::1111]/" ; "public ipv6")]
    fn test_accepts_public(target: &str) {
        assert_eq!(GuardPolicy::new().validate_url(&url(target)), Ok(()));
    }

    #[test_case("ftp://example.com/file" ; "ftp scheme")]
    #[test_case("file:///etc/passwd" ; "file scheme")]
    #[test_case("http://localhost/" ; "localhost")]
    #[test_case("http://LOCALHOST./" ; "localhost trailing dot")]
    #[test_case("http://admin.localhost/" ; "localhost subdomain")]
    #[test_case("http://127.0.0.1/" ; "loopback")]
    #[test_case("http://127.1/" ; "short loopback")]
    #[test_case("http://2130706433/" ; "decimal loopback")]
    #[test_case("http://10.0.0.5/" ; "private 10")]
    #[test_case("http://172.16.0.1/" ; "private 172")]
    #[test_case("http://192.168.1.1/" ; "private 192")]
    #[test_case("http://169.254.169.254/latest/meta-data" ; "metadata")]
    #[test_case("http://0.0.0.0/" ; "unspecified v4")]
    #[test_case("http://[::1]/" ; "loopback v6")]
    #[test_case("http://[::]/" ; "unspecified v6")]
    #[test_case("http://[fe80::1]/" ; "link local v6")]
    #[test_case("http://[fd00::1]/" ; "unique local v6")]
    #[test_case("http://[::ffff:127.0.0.1]/" ; "mapped loopback")]
    #[test_case("http://[::ffff:10.0.0.1]/" ; "mapped private")]
    fn test_rejects(target: &str) {
        assert!(GuardPolicy::new().validate_url(&url(target)).is_err(), "{target} should be rejected");
    }

    #[test]
    fn test_allow_list_admits_listed_internal_host() {
        let policy = GuardPolicy::new().with_allowed_hosts(["127.0.0.1", "API.example.com"]);
        assert_eq!(policy.validate_url(&url("http://127.0.0.1:8080/")), Ok(()));
        assert_eq!(policy.validate_url(&url("https://api.example.com/")), Ok(()));
    }

    #[test]
    fn test_allow_list_rejects_unlisted_host() {
        let policy = GuardPolicy::new().with_allowed_hosts(["api.example.com"]);
        assert_eq!(
            policy.validate_url(&url("https://other.example.com/")),
            Err(GuardError::HostNotAllowed {
                host: "other.example.com".to_string()
            })
        );
        assert!(policy.validate_url(&url("https://sub.api.example.com/")).is_err());
    }

    #[test_case("X-Evil", "value\r\nInjected: yes" ; "crlf in value")]
    #[test_case("X-Evil", "value\nInjected: yes" ; "lf in value")]
    #[test_case("X-Evil\r\nInjected", "value" ; "crlf in name")]
    fn test_rejects_header_injection(name: &str, value: &str) {
        let headers = Headers::new().with(name, value);
        assert!(matches!(
            GuardPolicy::new().validate_headers(&headers),
            Err(GuardError::HeaderInjection { .. })
        ));
    }

    #[test]
    fn test_resolve_url_joins_under_base_path() {
        let base = url("https://api.example.com/v1");
        assert_eq!(
            resolve_url(Some(&base), "/users/7").unwrap().as_str(),
            "https://api.example.com/v1/users/7"
        );
        assert_eq!(
            resolve_url(Some(&base), "users?page=2").unwrap().as_str(),
            "https://api.example.com/v1/users?page=2"
        );
    }

    #[test]
    fn test_resolve_url_absolute_passes_through() {
        let base = url("https://api.example.com/v1/");
        assert_eq!(
            resolve_url(Some(&base), "https://other.example.com/x").unwrap().as_str(),
            "https://other.example.com/x"
        );
    }

    #[test]
    fn test_resolve_url_relative_without_base() {
        assert!(matches!(resolve_url(None, "/users"), Err(GuardError::InvalidUrl { .. })));
    }

    #[test_case("/files/../../etc/passwd" ; "dot dot")]
    #[test_case("/files/%2E%2E/secret" ; "encoded")]
    #[test_case("https://api.example.com/a/.." ; "trailing")]
    fn test_rejects_path_traversal(target: &str) {
        let base = url("https://api.example.com/");
        let request = Request::get(target).build();
        assert!(matches!(
            GuardPolicy::new().validate(&request, Some(&base)),
            Err(GuardError::PathTraversal { .. })
        ));
    }

    #[test]
    fn test_dots_inside_names_are_fine() {
        let base = url("https://api.example.com/");
        let request = Request::get("/releases/v1..v2?range=..").build();
        assert!(GuardPolicy::new().validate(&request, Some(&base)).is_ok());
    }

    #[test]
    fn test_validate_resolved() {
        let policy = GuardPolicy::new().with_allowed_hosts(["internal.example.com"]);
        let private: IpAddr = "10.1.2.3".parse().unwrap();
        let public: IpAddr = "93.184.216.34".parse().unwrap();

        assert!(policy.validate_resolved("internal.example.com", private).is_ok());
        assert!(GuardPolicy::new().validate_resolved("rebind.example.com", private).is_err());
        assert!(GuardPolicy::new().validate_resolved("example.com", public).is_ok());
    }

    #[test]
    fn test_is_internal_address() {
        assert!(is_internal_address("100.64.0.1".parse().unwrap()));
        assert!(is_internal_address("::ffff:169.254.169.254".parse().unwrap()));
        assert!(!is_internal_address("8.8.8.8".parse().unwrap()));
        assert!(!is_internal_address("2001:4860:4860::8888".parse().unwrap()));
    }
}
