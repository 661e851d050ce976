//! # RDAP Client Library
//!
//! A privacy-aware client for RDAP, the JSON successor to WHOIS, covering
//! domains, IP addresses and networks, and autonomous system numbers.
//!
//! The library discovers the responsible registry from the IANA bootstrap
//! files, fetches over HTTPS with SSRF protection, caches responses in a
//! local LRU tier plus an optional shared tier, and returns a normalized
//! response with personal data redacted by default.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rdap_client_lib::{QueryOptions, RdapClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     rdap_client_lib::init();
//!
//!     let client = RdapClient::builder().build()?;
//!     let response = client
//!         .domain("example.com", &QueryOptions::default().with_legal_basis("contract"))
//!         .await?;
//!
//!     println!("{} ({})", response.identifier, response.meta.registry);
//!     for status in &response.status {
//!         println!("  {}", status);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Bootstrap discovery**: longest-suffix, most-specific-prefix and
//!   narrowest-range matching over the IANA registries
//! - **Secure fetching**: private address rejection, DNS pinning, manual
//!   redirect validation, bounded retries, per-registry rate limits
//! - **Caching**: LRU with TTL, single-flight coalescing, optional shared tier
//! - **Normalization**: one response shape for every registry
//! - **Redaction**: email, phone and postal data removed unless disabled

// Re-export main public API types and functions
pub use cache::{CacheConfig, CacheKey, CacheStats, MemorySharedCache, QueryCache, SharedCache};
pub use client::{RdapClient, RdapClientBuilder};
pub use config::{load_env_config, ClientConfig, ConfigManager, EnvConfig, FileConfig};
pub use error::{ErrorKind, RdapError};
pub use redact::{RedactionPolicy, Redactor, REDACTED};
pub use telemetry::{
    CacheTier, FetchOutcome, NoopTelemetry, TelemetryEvent, TelemetrySink, TracingTelemetry,
};
pub use types::{
    AutnumInfo, Contact, DomainName, Entity, Event, Identifier, IdentifierKind, IpNetwork,
    LegalBasis, Link, Nameserver, NetworkInfo, NormalizedResponse, Priority, QueryOptions,
    RawResponse, Remark, ResponseMeta,
};
pub use validate::{parse_asn, parse_domain, parse_identifier, parse_ip, parse_ipv4, parse_ipv6};

/// Registry discovery, fetching and normalization building blocks
pub mod protocols;

// Internal modules - their public items are re-exported above
mod cache;
mod client;
mod concurrent;
mod config;
mod error;
mod redact;
mod telemetry;
mod types;
mod validate;

// Type alias for convenience
pub type Result<T> = std::result::Result<T, RdapError>;

// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install a `tracing` subscriber that honors `RUST_LOG`.
///
/// Optional. Does nothing if the application already installed a
/// subscriber. Defaults to `warn` when `RUST_LOG` is unset.
pub fn init() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Get library information for debugging or display purposes.
pub fn info() -> LibraryInfo {
    LibraryInfo {
        version: VERSION,
        user_agent: protocols::fetcher::FetchConfig::default().user_agent,
    }
}

/// Information about the library build
#[derive(Debug, Clone)]
pub struct LibraryInfo {
    pub version: &'static str,
    /// User-Agent sent with every request unless configured otherwise
    pub user_agent: String,
}
