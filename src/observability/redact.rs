//! Scrubbing of credentials from headers and URLs before they are logged,
//! recorded in telemetry or attached to errors.

use regex::Regex;
use std::sync::OnceLock;
use url::Url;

use crate::types::Headers;

/// Replacement text for sensitive values.
pub const REDACTED: &str = "[REDACTED]";

const DEFAULT_PATTERNS: &[&str] = &[
    "authorization",
    "api-key",
    "api_key",
    "apikey",
    "cookie",
    "token",
    "secret",
    "password",
    "credential",
    "session",
];

/// Case-insensitive substrings marking a header name as sensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensitiveHeaders {
    patterns: Vec<String>,
}

impl Default for SensitiveHeaders {
    fn default() -> Self {
        Self {
            patterns: DEFAULT_PATTERNS.iter().map(|p| (*p).to_string()).collect(),
        }
    }
}

impl SensitiveHeaders {
    /// Creates the default pattern set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set containing only `patterns`.
    pub fn only<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Adds a pattern.
    pub fn with_pattern(mut self, pattern: impl AsRef<str>) -> Self {
        self.patterns.push(pattern.as_ref().to_ascii_lowercase());
        self
    }

    /// Returns true if `name` contains any pattern.
    pub fn is_sensitive(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.patterns.iter().any(|p| name.contains(p.as_str()))
    }

    /// Returns the configured patterns.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

/// Masks `value` if `name` is sensitive, keeping a `Bearer`/`Basic` scheme.
pub fn redact_value(name: &str, value: &str, sensitive: &SensitiveHeaders) -> String {
    if !sensitive.is_sensitive(name) {
        return value.to_string();
    }
    match value.split_once(' ') {
        Some((scheme, _)) if is_auth_scheme(scheme) => format!("{scheme} {REDACTED}"),
        _ => REDACTED.to_string(),
    }
}

/// Returns a copy of `headers` with sensitive values masked.
pub fn redact_headers(headers: &Headers, sensitive: &SensitiveHeaders) -> Headers {
    headers
        .iter()
        .map(|(name, value)| (name, redact_value(name, value, sensitive)))
        .collect()
}

/// Removes userinfo and masks secret-looking query parameter values.
pub fn redact_url(raw: &str) -> String {
    let stripped = match Url::parse(raw) {
        Ok(mut url) => {
            if !url.username().is_empty() || url.password().is_some() {
                // Cannot fail for hierarchical URLs, which are the only ones with userinfo.
                let _ = url.set_username("");
                let _ = url.set_password(None);
            }
            url.to_string()
        }
        Err(_) => match userinfo_pattern() {
            Some(re) => re.replace(raw, "://").into_owned(),
            None => raw.to_string(),
        },
    };

    match query_secret_pattern() {
        Some(re) => re.replace_all(&stripped, format!("${{1}}{REDACTED}")).into_owned(),
        None => stripped
            .split_once('?')
            .map_or_else(|| stripped.clone(), |(base, _)| base.to_string()),
    }
}

fn is_auth_scheme(scheme: &str) -> bool {
    ["bearer", "basic", "token", "digest"]
        .iter()
        .any(|s| scheme.eq_ignore_ascii_case(s))
}

fn query_secret_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?i)([?&][^&=#]*(?:key|token|secret|passw(?:or)?d|signature|auth|credential|session)[^&=#]*=)[^&#]*",
            )
            .ok()
        })
        .as_ref()
}

fn userinfo_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"://[^/?#@]*@").ok())
        .as_ref()
}
