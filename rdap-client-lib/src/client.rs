//! Query orchestration.
//!
//! [`RdapClient`] is the single entry point of the library. A query moves
//! through the pipeline in a fixed order:
//!
//! 1. the legal basis is parsed and the identifier validated
//! 2. private and reserved IP targets are rejected
//! 3. the cache is consulted, keyed by identifier and redaction policy
//! 4. on a miss the registry is resolved, each service URL is fetched in
//!    order until one answers, and the document is normalized and redacted
//!
//! Steps 1 and 2 never touch the network.

use crate::cache::{CacheKey, CacheStats, MemorySharedCache, QueryCache, SharedCache};
use crate::config::{ClientConfig, ConfigManager};
use crate::error::RdapError;
use crate::protocols::fetcher::{Fetch, FetchContext, SecureFetcher};
use crate::protocols::rdap::Normalizer;
use crate::protocols::registry::{
    registry_name, BootstrapRegistry, BootstrapSource, HttpBootstrapSource, RegistryResolver,
};
use crate::protocols::ssrf::blocked_reason;
use crate::redact::RedactionPolicy;
use crate::telemetry::{TelemetryEvent, TelemetrySink, TracingTelemetry};
use crate::types::{Identifier, IdentifierKind, LegalBasis, NormalizedResponse, Priority, QueryOptions};
use crate::validate::parse_identifier;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// RDAP client.
///
/// Cloning is cheap; clones share the cache, the bootstrap table and the
/// rate limiter.
///
/// # Example
///
/// ```rust,no_run
/// use rdap_client_lib::{QueryOptions, RdapClient};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = RdapClient::builder().build()?;
///     let response = client.query("8.8.8.8", &QueryOptions::default()).await?;
///     println!("{} served by {}", response.identifier, response.meta.registry);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct RdapClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    resolver: RegistryResolver,
    fetcher: Arc<dyn Fetch>,
    cache: QueryCache,
    telemetry: Arc<dyn TelemetrySink>,
}

/// Everything the upstream half of a query needs, detached from the caller.
struct Lookup {
    identifier: Identifier,
    policy: RedactionPolicy,
    priority: Priority,
    include_raw: bool,
    deadline: Instant,
}

impl RdapClient {
    pub fn builder() -> RdapClientBuilder {
        RdapClientBuilder::default()
    }

    /// Build a client from discovered configuration files and `RDAP_*`
    /// environment variables.
    pub fn from_config_files() -> Result<Self, RdapError> {
        let config = ConfigManager::new(false).resolve_client_config()?;
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Look up `raw`, detecting whether it is a domain, an IP address or
    /// network, or an AS number.
    ///
    /// # Errors
    ///
    /// - `Validation` for malformed identifiers or an unknown legal basis
    /// - `SsrfProtection` for private or reserved IP targets
    /// - `NoServerFound` when no registry covers the identifier
    /// - `RdapServer`, `Network`, `Timeout`, `RateLimit` from the fetch
    /// - `Parse` when the registry document is unusable
    pub async fn query(
        &self,
        raw: &str,
        options: &QueryOptions,
    ) -> Result<NormalizedResponse, RdapError> {
        self.run(raw, None, options).await
    }

    pub async fn domain(
        &self,
        name: &str,
        options: &QueryOptions,
    ) -> Result<NormalizedResponse, RdapError> {
        self.run(name, Some(IdentifierKind::Domain), options).await
    }

    /// Look up an IP address or CIDR block.
    pub async fn ip(
        &self,
        target: &str,
        options: &QueryOptions,
    ) -> Result<NormalizedResponse, RdapError> {
        self.run(target, Some(IdentifierKind::Ip), options).await
    }

    /// Look up an AS number, with or without the `AS` prefix.
    pub async fn asn(
        &self,
        number: &str,
        options: &QueryOptions,
    ) -> Result<NormalizedResponse, RdapError> {
        self.run(number, Some(IdentifierKind::Asn), options).await
    }

    async fn run(
        &self,
        raw: &str,
        hint: Option<IdentifierKind>,
        options: &QueryOptions,
    ) -> Result<NormalizedResponse, RdapError> {
        let started = Instant::now();
        let lookup = self.prepare(raw, hint, options)?;
        let kind = lookup.identifier.kind();

        let timeout = options.timeout.unwrap_or(self.inner.config.query_timeout);
        let use_cache = options.cache && self.inner.config.cache_enabled;

        let result = match tokio::time::timeout(timeout, self.execute(lookup, use_cache)).await {
            Ok(result) => result,
            Err(_) => Err(RdapError::timeout("RDAP query", timeout)),
        };

        let (registry, cached) = match &result {
            Ok(response) => (Some(response.meta.registry.clone()), response.meta.cached),
            Err(_) => (None, false),
        };
        self.inner.telemetry.record(&TelemetryEvent::Query {
            kind,
            registry,
            cached,
            latency: started.elapsed(),
            error: result.as_ref().err().map(RdapError::kind),
        });

        result
    }

    /// The network-free front of the pipeline.
    fn prepare(
        &self,
        raw: &str,
        hint: Option<IdentifierKind>,
        options: &QueryOptions,
    ) -> Result<Lookup, RdapError> {
        let config = &self.inner.config;

        let legal_basis = match options.legal_basis.as_deref() {
            Some(basis) => basis.parse::<LegalBasis>()?,
            None if config.require_legal_basis => {
                return Err(RdapError::validation(
                    "legal_basis",
                    "a legal basis is required for every query",
                ))
            }
            None => config.default_legal_basis,
        };

        let identifier = parse_identifier(raw, hint)?;
        reject_private_target(&identifier)?;

        let timeout = options.timeout.unwrap_or(config.query_timeout);
        Ok(Lookup {
            identifier,
            policy: RedactionPolicy::new(
                legal_basis,
                options.redact_pii.unwrap_or(config.redact_pii),
            ),
            priority: options.priority,
            include_raw: options.include_raw,
            deadline: Instant::now() + timeout,
        })
    }

    async fn execute(
        &self,
        lookup: Lookup,
        use_cache: bool,
    ) -> Result<NormalizedResponse, RdapError> {
        if !use_cache {
            return self.inner.lookup_upstream(&lookup).await;
        }

        let mut policy_id = lookup.policy.policy_id();
        if lookup.include_raw {
            policy_id.push_str("+raw");
        }
        let key = CacheKey::new(
            lookup.identifier.kind(),
            &lookup.identifier.canonical(),
            &policy_id,
        );

        let inner = self.inner.clone();
        self.inner
            .cache
            .get_or_fetch(key, move || async move { inner.lookup_upstream(&lookup).await })
            .await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Drop every locally cached response.
    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    /// Make the next query reload the bootstrap registry in the background.
    pub fn invalidate_bootstrap(&self) {
        self.inner.resolver.invalidate();
    }

    pub fn resolver(&self) -> &RegistryResolver {
        &self.inner.resolver
    }

    /// Start the periodic bootstrap refresh and the cache sweeper.
    ///
    /// Both tasks stop on their own once the client is dropped.
    pub fn start_background_tasks(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.inner.resolver.spawn_refresh_task(),
            self.inner
                .cache
                .spawn_sweeper(self.inner.config.cache_sweep_interval),
        ]
    }
}

impl ClientInner {
    /// Resolve, fetch with failover across service URLs, then normalize.
    async fn lookup_upstream(&self, lookup: &Lookup) -> Result<NormalizedResponse, RdapError> {
        let identifier = &lookup.identifier;
        let bases = self.resolver.resolve(identifier).await?;
        let path = identifier.rdap_path();

        let mut last_error = RdapError::no_server(identifier.to_string());
        for (index, base) in bases.iter().enumerate() {
            let url = base.join(&path)?;
            let context = FetchContext::new(registry_name(base))
                .with_priority(lookup.priority)
                .with_deadline(Some(lookup.deadline));

            match self.fetcher.fetch(&url, &context).await {
                Ok(raw) => {
                    return Normalizer::new()
                        .with_raw(lookup.include_raw)
                        .normalize(&raw, identifier, &lookup.policy);
                }
                Err(e) if e.allows_failover() && index + 1 < bases.len() => {
                    tracing::warn!(
                        identifier = %identifier,
                        url = %url,
                        error = %e,
                        "RDAP service failed, trying next"
                    );
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }
}

fn reject_private_target(identifier: &Identifier) -> Result<(), RdapError> {
    let addr = match identifier {
        Identifier::Ip(ip) => *ip,
        Identifier::Network(network) => network.addr(),
        _ => return Ok(()),
    };

    match blocked_reason(&addr) {
        Some(reason) => {
            tracing::debug!(target = %identifier, reason, "refusing private query target");
            Err(RdapError::ssrf(identifier.to_string(), reason))
        }
        None => Ok(()),
    }
}

/// Builder for [`RdapClient`].
///
/// Every collaborator is optional. Unset ones get the production default:
/// a [`SecureFetcher`], the IANA bootstrap over HTTPS, no shared cache tier
/// and [`TracingTelemetry`].
#[derive(Default)]
pub struct RdapClientBuilder {
    config: ClientConfig,
    fetcher: Option<Arc<dyn Fetch>>,
    bootstrap_source: Option<Arc<dyn BootstrapSource>>,
    bootstrap_registry: Option<BootstrapRegistry>,
    shared_cache: Option<Arc<dyn SharedCache>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl RdapClientBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetch>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Where the bootstrap registry is loaded from.
    pub fn bootstrap_source(mut self, source: Arc<dyn BootstrapSource>) -> Self {
        self.bootstrap_source = Some(source);
        self
    }

    /// Serve a fixed bootstrap table. Takes precedence over
    /// [`bootstrap_source`](Self::bootstrap_source).
    pub fn bootstrap_registry(mut self, registry: BootstrapRegistry) -> Self {
        self.bootstrap_registry = Some(registry);
        self
    }

    pub fn shared_cache(mut self, cache: Arc<dyn SharedCache>) -> Self {
        self.shared_cache = Some(cache);
        self
    }

    /// Use an in-process [`MemorySharedCache`] as the shared tier.
    pub fn memory_shared_cache(self) -> Self {
        self.shared_cache(Arc::new(MemorySharedCache::new()))
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// # Errors
    ///
    /// Returns `RdapError::Config` if the configuration is invalid.
    pub fn build(self) -> Result<RdapClient, RdapError> {
        let config = self.config;
        config.validate()?;

        let telemetry = self
            .telemetry
            .unwrap_or_else(|| Arc::new(TracingTelemetry));

        let fetcher: Arc<dyn Fetch> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(SecureFetcher::new(config.fetch.clone(), telemetry.clone())?),
        };

        let resolver = match self.bootstrap_registry {
            Some(registry) => RegistryResolver::with_registry(registry, telemetry.clone()),
            None => {
                let source: Arc<dyn BootstrapSource> = match self.bootstrap_source {
                    Some(source) => source,
                    None => Arc::new(
                        HttpBootstrapSource::with_base_url(fetcher.clone(), &config.bootstrap_url)?
                            .with_timeout(
                                config.fetch.timeout.saturating_mul(config.fetch.max_attempts),
                            ),
                    ),
                };
                RegistryResolver::new(source, telemetry.clone())
            }
        }
        .with_refresh_interval(config.bootstrap_refresh_interval);

        let cache = QueryCache::new(config.cache.clone(), self.shared_cache, telemetry.clone())?;

        tracing::debug!(
            cache_enabled = config.cache_enabled,
            cache_capacity = config.cache.capacity,
            default_legal_basis = %config.default_legal_basis,
            "RDAP client ready"
        );

        Ok(RdapClient {
            inner: Arc::new(ClientInner {
                config,
                resolver,
                fetcher,
                cache,
                telemetry,
            }),
        })
    }
}
