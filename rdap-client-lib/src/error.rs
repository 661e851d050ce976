//! Error handling for RDAP queries.
//!
//! Every failure the library can report is one variant of [`RdapError`].
//! There is no second error hierarchy: callers branch on [`RdapError::kind`]
//! or on the stable string returned by [`RdapError::code`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main error type for RDAP operations.
///
/// Errors are plain values: they are `Clone` so that every caller attached to a
/// shared in-flight fetch receives the same outcome, and serializable so that
/// negative results can be stored in the shared cache tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "code")]
pub enum RdapError {
    /// The raw identifier could not be parsed or canonicalized.
    #[error("Invalid identifier '{input}': {reason}")]
    #[serde(rename = "VALIDATION_ERROR")]
    Validation { input: String, reason: String },

    /// No bootstrap entry covers the identifier.
    #[error("No RDAP server found for '{identifier}'")]
    #[serde(rename = "NO_SERVER_FOUND")]
    NoServerFound { identifier: String },

    /// Connection, DNS, TLS or transport failure.
    #[error("Network error: {message}")]
    #[serde(rename = "NETWORK_ERROR")]
    Network { message: String },

    /// An operation exceeded its deadline.
    #[error("Timeout after {timeout_ms}ms during: {operation}")]
    #[serde(rename = "TIMEOUT_ERROR")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Local admission control or the upstream server refused the request.
    #[error("Rate limited by {registry}{}", retry_hint(.retry_after_ms))]
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimit {
        registry: String,
        retry_after_ms: Option<u64>,
    },

    /// A target violated the outbound request policy.
    #[error("Request to '{target}' blocked: {reason}")]
    #[serde(rename = "SSRF_PROTECTION_ERROR")]
    SsrfProtection { target: String, reason: String },

    /// The registry answered with a non-success HTTP status.
    #[error("RDAP server {registry} returned HTTP {status}: {message}")]
    #[serde(rename = "RDAP_SERVER_ERROR")]
    RdapServer {
        registry: String,
        status: u16,
        message: String,
    },

    /// The registry payload is not a usable RDAP document.
    #[error("Parse error: {message}")]
    #[serde(rename = "PARSE_ERROR")]
    Parse { message: String },

    /// The shared cache backend failed.
    #[error("Cache error: {message}")]
    #[serde(rename = "CACHE_ERROR")]
    Cache { message: String },

    /// Invalid client configuration. Only produced while building a client or
    /// loading configuration, never by a query.
    #[error("Configuration error: {message}")]
    #[serde(rename = "CONFIG_ERROR")]
    Config { message: String },
}

fn retry_hint(retry_after_ms: &Option<u64>) -> String {
    match retry_after_ms {
        Some(ms) => format!(" (retry after {}ms)", ms),
        None => String::new(),
    }
}

/// The tag of an [`RdapError`], for matching without inspecting payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NoServerFound,
    Network,
    Timeout,
    RateLimit,
    SsrfProtection,
    RdapServer,
    Parse,
    Cache,
    Config,
}

impl RdapError {
    /// Create a new validation error.
    pub fn validation<I: Into<String>, R: Into<String>>(input: I, reason: R) -> Self {
        Self::Validation {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create a new no-server-found error.
    pub fn no_server<I: Into<String>>(identifier: I) -> Self {
        Self::NoServerFound {
            identifier: identifier.into(),
        }
    }

    /// Create a new network error.
    pub fn network<M: Into<String>>(message: M) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout<O: Into<String>>(operation: O, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: duration.as_millis() as u64,
        }
    }

    /// Create a new rate limit error.
    pub fn rate_limited<R: Into<String>>(registry: R, retry_after: Option<Duration>) -> Self {
        Self::RateLimit {
            registry: registry.into(),
            retry_after_ms: retry_after.map(|d| d.as_millis() as u64),
        }
    }

    /// Create a new SSRF protection error.
    pub fn ssrf<T: Into<String>, R: Into<String>>(target: T, reason: R) -> Self {
        Self::SsrfProtection {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Create a new upstream server error.
    pub fn server<R: Into<String>, M: Into<String>>(registry: R, status: u16, message: M) -> Self {
        Self::RdapServer {
            registry: registry.into(),
            status,
            message: message.into(),
        }
    }

    /// Create a new parse error.
    pub fn parse<M: Into<String>>(message: M) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Create a new cache backend error.
    pub fn cache<M: Into<String>>(message: M) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Create a new configuration error.
    pub fn config<M: Into<String>>(message: M) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NoServerFound { .. } => ErrorKind::NoServerFound,
            Self::Network { .. } => ErrorKind::Network,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::RateLimit { .. } => ErrorKind::RateLimit,
            Self::SsrfProtection { .. } => ErrorKind::SsrfProtection,
            Self::RdapServer { .. } => ErrorKind::RdapServer,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Cache { .. } => ErrorKind::Cache,
            Self::Config { .. } => ErrorKind::Config,
        }
    }

    /// Stable machine-readable code, identical to the serialized tag.
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::NoServerFound => "NO_SERVER_FOUND",
            ErrorKind::Network => "NETWORK_ERROR",
            ErrorKind::Timeout => "TIMEOUT_ERROR",
            ErrorKind::RateLimit => "RATE_LIMIT_ERROR",
            ErrorKind::SsrfProtection => "SSRF_PROTECTION_ERROR",
            ErrorKind::RdapServer => "RDAP_SERVER_ERROR",
            ErrorKind::Parse => "PARSE_ERROR",
            ErrorKind::Cache => "CACHE_ERROR",
            ErrorKind::Config => "CONFIG_ERROR",
        }
    }

    /// Upstream HTTP status, if this error came from a registry response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::RdapServer { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the registry confirmed that the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RdapServer { status: 404, .. })
    }

    /// Check if this error suggests the fetch should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. }
                | Self::Timeout { .. }
                | Self::RdapServer {
                    status: 429 | 500..=599,
                    ..
                }
        )
    }

    /// Whether another service URL for the same identifier is worth trying.
    pub(crate) fn allows_failover(&self) -> bool {
        self.is_retryable() || matches!(self, Self::RateLimit { .. })
    }

    /// Registry-stable failures that may be negatively cached.
    ///
    /// Transient conditions (network, timeout, rate limiting) never are.
    pub fn is_negative_cacheable(&self) -> bool {
        matches!(self, Self::NoServerFound { .. }) || self.is_not_found()
    }
}

impl From<reqwest::Error> for RdapError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                operation: "HTTP request".to_string(),
                timeout_ms: 0,
            }
        } else if err.is_connect() {
            Self::network(format!("Connection failed: {}", err))
        } else {
            Self::network(format!("HTTP request failed: {}", err))
        }
    }
}

impl From<serde_json::Error> for RdapError {
    fn from(err: serde_json::Error) -> Self {
        Self::parse(format!("JSON parsing failed: {}", err))
    }
}

impl From<url::ParseError> for RdapError {
    fn from(err: url::ParseError) -> Self {
        Self::parse(format!("Invalid URL: {}", err))
    }
}

impl From<std::io::Error> for RdapError {
    fn from(err: std::io::Error) -> Self {
        Self::network(format!("I/O error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_matches_serialized_tag() {
        let errors = vec![
            RdapError::validation("x", "bad"),
            RdapError::no_server("example.invalid"),
            RdapError::network("reset"),
            RdapError::timeout("fetch", Duration::from_secs(1)),
            RdapError::rate_limited("arin", Some(Duration::from_secs(2))),
            RdapError::ssrf("127.0.0.1", "loopback"),
            RdapError::server("arin", 503, "unavailable"),
            RdapError::parse("missing objectClassName"),
            RdapError::cache("down"),
            RdapError::config("capacity must be positive"),
        ];

        for err in errors {
            let json = serde_json::to_value(&err).unwrap();
            assert_eq!(json["code"], err.code());
            let back: RdapError = serde_json::from_value(json).unwrap();
            assert_eq!(back, err);
        }
    }

    #[test]
    fn test_kind_ignores_payload() {
        let a = RdapError::network("connection reset");
        let b = RdapError::network("dns failure");
        assert_ne!(a, b);
        assert_eq!(a.kind(), b.kind());
    }

    #[test]
    fn test_retry_classification() {
        assert!(RdapError::network("x").is_retryable());
        assert!(RdapError::server("r", 502, "bad gateway").is_retryable());
        assert!(RdapError::server("r", 429, "slow down").is_retryable());
        assert!(!RdapError::server("r", 404, "not found").is_retryable());
        assert!(!RdapError::server("r", 400, "bad request").is_retryable());
        assert!(!RdapError::ssrf("x", "private").is_retryable());
    }

    #[test]
    fn test_negative_cacheable() {
        assert!(RdapError::no_server("x").is_negative_cacheable());
        assert!(RdapError::server("r", 404, "not found").is_negative_cacheable());
        assert!(!RdapError::network("x").is_negative_cacheable());
        assert!(!RdapError::timeout("x", Duration::from_secs(1)).is_negative_cacheable());
        assert!(!RdapError::rate_limited("r", None).is_negative_cacheable());
    }

    #[test]
    fn test_display_messages() {
        let err = RdapError::rate_limited("ripe", Some(Duration::from_millis(1500)));
        assert_eq!(err.to_string(), "Rate limited by ripe (retry after 1500ms)");

        let err = RdapError::server("arin", 503, "unavailable");
        assert_eq!(
            err.to_string(),
            "RDAP server arin returned HTTP 503: unavailable"
        );
    }
}
