//! Protocol implementations for RDAP lookups.
//!
//! This module contains the bootstrap registry, the outbound request policy,
//! the HTTPS fetcher and the RDAP document normalizer.

/// HTTPS fetching with retries, redirects and address pinning
pub mod fetcher;

/// Per-registry token buckets
pub mod rate_limit;

/// RDAP document normalization
pub mod rdap;

/// IANA bootstrap registry and resolver
pub mod registry;

/// Outbound address and host policy
pub mod ssrf;

// Re-export commonly used functions and types
pub use fetcher::{
    Fetch, FetchConfig, FetchContext, HostResolver, ReqwestTransport, SecureFetcher,
    SystemResolver, Transport, TransportResponse,
};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use rdap::{normalize_status, Normalizer};
pub use registry::{
    registry_name, BootstrapDocument, BootstrapRegistry, BootstrapSource, HttpBootstrapSource,
    RegistryResolver, ResolverState, StaticBootstrapSource,
};
pub use ssrf::{blocked_reason, is_public_ip, SsrfGuard};
