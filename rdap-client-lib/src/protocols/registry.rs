//! IANA bootstrap registry and service discovery.
//!
//! The registry maps TLDs, IP blocks and ASN ranges to the RDAP service URLs
//! that are authoritative for them. It is owned by a [`RegistryResolver`],
//! which loads it lazily through an injected [`BootstrapSource`], keeps it
//! fresh in the background, and swaps whole tables atomically so lookups
//! never observe a half-built table.

use crate::concurrent::SingleFlight;
use crate::error::RdapError;
use crate::protocols::fetcher::{Fetch, FetchContext};
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::types::{Identifier, IpNetwork, Priority};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use url::Url;

/// Where IANA publishes the bootstrap documents.
pub const IANA_BOOTSTRAP_BASE: &str = "https://data.iana.org/rdap/";

/// Bootstrap refresh interval (RDAP service assignments rarely change).
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// Upper bound on one full bootstrap load, retries included.
pub const DEFAULT_BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(30);

/// One of the four IANA bootstrap documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapDocument {
    Dns,
    Ipv4,
    Ipv6,
    Asn,
}

impl BootstrapDocument {
    pub const ALL: [BootstrapDocument; 4] = [
        BootstrapDocument::Dns,
        BootstrapDocument::Ipv4,
        BootstrapDocument::Ipv6,
        BootstrapDocument::Asn,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            BootstrapDocument::Dns => "dns.json",
            BootstrapDocument::Ipv4 => "ipv4.json",
            BootstrapDocument::Ipv6 => "ipv6.json",
            BootstrapDocument::Asn => "asn.json",
        }
    }
}

/// IANA bootstrap file format (RFC 9224).
#[derive(Debug, Deserialize)]
struct IanaDocument {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    publication: Option<String>,
    services: Vec<(Vec<String>, Vec<String>)>,
}

/// Service tables for all identifier classes.
#[derive(Debug, Clone, Default)]
pub struct BootstrapRegistry {
    domains: HashMap<String, Vec<Url>>,
    networks: Vec<(IpNetwork, Vec<Url>)>,
    asns: Vec<(u32, u32, Vec<Url>)>,
    /// `version` of the source documents.
    pub version: Option<String>,
    /// Latest `publication` timestamp across the source documents.
    pub publication: Option<String>,
    pub fetched_at: Option<SystemTime>,
}

impl BootstrapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from the raw bytes of the four IANA documents.
    pub fn from_documents(documents: &[(BootstrapDocument, &[u8])]) -> Result<Self, RdapError> {
        let mut registry = Self::new();
        for (kind, bytes) in documents {
            registry.merge_document(*kind, bytes)?;
        }
        registry.fetched_at = Some(SystemTime::now());
        Ok(registry)
    }

    /// Merge one IANA document into the tables.
    ///
    /// Entries that cannot be parsed are skipped. Non-HTTPS service URLs are
    /// dropped, and a service left without URLs is ignored.
    pub fn merge_document(&mut self, kind: BootstrapDocument, bytes: &[u8]) -> Result<(), RdapError> {
        let document: IanaDocument = serde_json::from_slice(bytes).map_err(|e| {
            RdapError::parse(format!("invalid bootstrap {}: {}", kind.file_name(), e))
        })?;

        if self.version.is_none() {
            self.version = document.version.clone();
        }
        if document.publication > self.publication {
            self.publication = document.publication.clone();
        }

        for (entries, urls) in document.services {
            let urls = https_urls(&urls);
            if urls.is_empty() {
                continue;
            }
            for entry in entries {
                let added = match kind {
                    BootstrapDocument::Dns => {
                        self.add_domain(&entry, urls.clone());
                        true
                    }
                    BootstrapDocument::Ipv4 | BootstrapDocument::Ipv6 => entry
                        .parse::<IpNetwork>()
                        .map(|network| self.add_network(network, urls.clone()))
                        .is_ok(),
                    BootstrapDocument::Asn => parse_asn_range(&entry)
                        .map(|(start, end)| self.add_asn_range(start, end, urls.clone()))
                        .is_some(),
                };
                if !added {
                    tracing::debug!(file = kind.file_name(), entry = %entry, "skipping malformed bootstrap entry");
                }
            }
        }
        Ok(())
    }

    /// Register service URLs for a domain suffix (usually a TLD).
    pub fn add_domain(&mut self, suffix: &str, urls: Vec<Url>) {
        let suffix = suffix.trim().trim_matches('.').to_lowercase();
        if suffix.is_empty() {
            return;
        }
        self.domains.entry(suffix).or_insert(urls);
    }

    pub fn add_network(&mut self, network: IpNetwork, urls: Vec<Url>) {
        self.networks.push((network, urls));
    }

    pub fn add_asn_range(&mut self, start: u32, end: u32, urls: Vec<Url>) {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        self.asns.push((start, end, urls));
    }

    /// Service URLs for an identifier, in priority order.
    pub fn lookup(&self, identifier: &Identifier) -> Option<&[Url]> {
        match identifier {
            Identifier::Domain(name) => self.lookup_domain(name.as_str()),
            Identifier::Ip(ip) => self.lookup_network(&host_network(ip)?),
            Identifier::Network(network) => self.lookup_network(network),
            Identifier::Asn(asn) => self.lookup_asn(*asn),
        }
    }

    /// Longest matching label suffix.
    fn lookup_domain(&self, name: &str) -> Option<&[Url]> {
        let mut candidate = name;
        loop {
            if let Some(urls) = self.domains.get(candidate) {
                return Some(urls);
            }
            candidate = candidate.split_once('.')?.1;
        }
    }

    /// Most specific block containing the target.
    fn lookup_network(&self, target: &IpNetwork) -> Option<&[Url]> {
        let mut best: Option<&(IpNetwork, Vec<Url>)> = None;
        for entry in &self.networks {
            if !entry.0.contains_network(target) {
                continue;
            }
            if best.map_or(true, |b| entry.0.prefix() > b.0.prefix()) {
                best = Some(entry);
            }
        }
        best.map(|(_, urls)| urls.as_slice())
    }

    /// Narrowest range containing the ASN.
    fn lookup_asn(&self, asn: u32) -> Option<&[Url]> {
        let mut best: Option<&(u32, u32, Vec<Url>)> = None;
        for entry in &self.asns {
            if asn < entry.0 || asn > entry.1 {
                continue;
            }
            if best.map_or(true, |b| entry.1 - entry.0 < b.1 - b.0) {
                best = Some(entry);
            }
        }
        best.map(|(_, _, urls)| urls.as_slice())
    }

    /// Number of entries across all tables.
    pub fn service_count(&self) -> usize {
        self.domains.len() + self.networks.len() + self.asns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.service_count() == 0
    }
}

fn host_network(ip: &IpAddr) -> Option<IpNetwork> {
    let prefix = if ip.is_ipv4() { 32 } else { 128 };
    IpNetwork::new(*ip, prefix)
}

fn https_urls(raw: &[String]) -> Vec<Url> {
    raw.iter()
        .filter_map(|s| Url::parse(s).ok())
        .filter(|url| url.scheme() == "https" && url.host_str().is_some())
        .map(|mut url| {
            if !url.path().ends_with('/') {
                let path = format!("{}/", url.path());
                url.set_path(&path);
            }
            url
        })
        .collect()
}

fn parse_asn_range(entry: &str) -> Option<(u32, u32)> {
    match entry.split_once('-') {
        Some((start, end)) => Some((start.trim().parse().ok()?, end.trim().parse().ok()?)),
        None => {
            let asn = entry.trim().parse().ok()?;
            Some((asn, asn))
        }
    }
}

/// Short registry identity derived from a service URL.
///
/// ```rust
/// use rdap_client_lib::protocols::registry_name;
/// use url::Url;
///
/// let url = Url::parse("https://rdap.arin.net/registry/").unwrap();
/// assert_eq!(registry_name(&url), "arin");
/// ```
pub fn registry_name(url: &Url) -> String {
    const KNOWN: [(&str, &str); 8] = [
        ("arin.net", "arin"),
        ("ripe.net", "ripe"),
        ("apnic.net", "apnic"),
        ("lacnic.net", "lacnic"),
        ("afrinic.net", "afrinic"),
        ("verisign.com", "verisign"),
        ("iana.org", "iana"),
        ("publicinterestregistry.org", "pir"),
    ];

    let host = url.host_str().unwrap_or_default().to_lowercase();
    for (suffix, name) in KNOWN {
        if host == suffix || host.ends_with(&format!(".{}", suffix)) {
            return name.to_string();
        }
    }
    host
}

/// Supplies bootstrap tables to a [`RegistryResolver`].
#[async_trait]
pub trait BootstrapSource: Send + Sync {
    async fn load(&self) -> Result<BootstrapRegistry, RdapError>;
}

/// Loads the IANA documents over HTTPS through a [`Fetch`] implementation.
pub struct HttpBootstrapSource {
    base: Url,
    fetcher: Arc<dyn Fetch>,
    timeout: Duration,
}

impl HttpBootstrapSource {
    pub fn new(fetcher: Arc<dyn Fetch>) -> Result<Self, RdapError> {
        Self::with_base_url(fetcher, IANA_BOOTSTRAP_BASE)
    }

    pub fn with_base_url(fetcher: Arc<dyn Fetch>, base: &str) -> Result<Self, RdapError> {
        let mut base = Url::parse(base)
            .map_err(|e| RdapError::config(format!("invalid bootstrap URL '{}': {}", base, e)))?;
        if base.scheme() != "https" {
            return Err(RdapError::config("bootstrap URL must use HTTPS"));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            base,
            fetcher,
            timeout: DEFAULT_BOOTSTRAP_TIMEOUT,
        })
    }

    /// Deadline for loading all four documents.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl BootstrapSource for HttpBootstrapSource {
    async fn load(&self) -> Result<BootstrapRegistry, RdapError> {
        let context = FetchContext::new(registry_name(&self.base))
            .with_priority(Priority::High)
            .with_deadline(Some(Instant::now() + self.timeout));

        let fetches = BootstrapDocument::ALL.into_iter().map(|kind| {
            let context = context.clone();
            async move {
                let url = self.base.join(kind.file_name())?;
                let response = self.fetcher.fetch(&url, &context).await?;
                Ok::<_, RdapError>((kind, response.body))
            }
        });
        let bodies = futures::future::try_join_all(fetches).await?;

        let documents: Vec<(BootstrapDocument, &[u8])> = bodies
            .iter()
            .map(|(kind, body)| (*kind, body.as_slice()))
            .collect();
        BootstrapRegistry::from_documents(&documents)
    }
}

/// Serves a fixed registry. Counts loads so callers can observe laziness.
#[derive(Debug, Default)]
pub struct StaticBootstrapSource {
    registry: BootstrapRegistry,
    loads: AtomicUsize,
}

impl StaticBootstrapSource {
    pub fn new(registry: BootstrapRegistry) -> Self {
        Self {
            registry,
            loads: AtomicUsize::new(0),
        }
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BootstrapSource for StaticBootstrapSource {
    async fn load(&self) -> Result<BootstrapRegistry, RdapError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let mut registry = self.registry.clone();
        registry.fetched_at = Some(SystemTime::now());
        Ok(registry)
    }
}

/// Lifecycle of the resolver's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResolverState {
    Uninitialized = 0,
    Loading = 1,
    Ready = 2,
    Refreshing = 3,
    /// The last refresh failed; the previous table is still served.
    Stale = 4,
}

impl ResolverState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ResolverState::Loading,
            2 => ResolverState::Ready,
            3 => ResolverState::Refreshing,
            4 => ResolverState::Stale,
            _ => ResolverState::Uninitialized,
        }
    }
}

type LoadResult = Result<Arc<BootstrapRegistry>, RdapError>;

struct ResolverInner {
    source: Arc<dyn BootstrapSource>,
    table: ArcSwapOption<BootstrapRegistry>,
    state: AtomicU8,
    invalidated: AtomicBool,
    loads: SingleFlight<(), LoadResult>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl ResolverInner {
    fn set_state(&self, state: ResolverState) {
        self.state.store(state as u8, Ordering::Release);
    }

    async fn load(self: Arc<Self>) -> LoadResult {
        let this = self.clone();
        self.loads
            .run((), move || async move { this.load_now().await })
            .await
    }

    async fn load_now(&self) -> LoadResult {
        let had_table = self.table.load().is_some();
        self.set_state(if had_table {
            ResolverState::Refreshing
        } else {
            ResolverState::Loading
        });

        let started = Instant::now();
        match self.source.load().await {
            Ok(registry) => {
                let services = registry.service_count();
                let registry = Arc::new(registry);
                self.table.store(Some(registry.clone()));
                self.set_state(ResolverState::Ready);

                tracing::info!(services, version = ?registry.version, "bootstrap registry loaded");
                self.telemetry.record(&TelemetryEvent::Bootstrap {
                    success: true,
                    latency: started.elapsed(),
                    services,
                });
                Ok(registry)
            }
            Err(e) => {
                self.set_state(if had_table {
                    ResolverState::Stale
                } else {
                    ResolverState::Uninitialized
                });

                tracing::warn!(error = %e, keeping_previous = had_table, "bootstrap registry load failed");
                self.telemetry.record(&TelemetryEvent::Bootstrap {
                    success: false,
                    latency: started.elapsed(),
                    services: 0,
                });
                Err(e)
            }
        }
    }
}

/// Resolves identifiers to the RDAP service URLs responsible for them.
pub struct RegistryResolver {
    inner: Arc<ResolverInner>,
    refresh_interval: Duration,
}

impl RegistryResolver {
    pub fn new(source: Arc<dyn BootstrapSource>, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            inner: Arc::new(ResolverInner {
                source,
                table: ArcSwapOption::empty(),
                state: AtomicU8::new(ResolverState::Uninitialized as u8),
                invalidated: AtomicBool::new(false),
                loads: SingleFlight::new(),
                telemetry,
            }),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }

    /// A resolver that starts `Ready` with a fixed table.
    pub fn with_registry(registry: BootstrapRegistry, telemetry: Arc<dyn TelemetrySink>) -> Self {
        let resolver = Self::new(
            Arc::new(StaticBootstrapSource::new(registry.clone())),
            telemetry,
        );
        resolver.inner.table.store(Some(Arc::new(registry)));
        resolver.inner.set_state(ResolverState::Ready);
        resolver
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn state(&self) -> ResolverState {
        ResolverState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// The table currently being served, if any.
    pub fn snapshot(&self) -> Option<Arc<BootstrapRegistry>> {
        self.inner.table.load_full()
    }

    /// Service URLs for `identifier`, in priority order.
    pub async fn resolve(&self, identifier: &Identifier) -> Result<Vec<Url>, RdapError> {
        let table = self.current().await?;
        match table.lookup(identifier) {
            Some(urls) if !urls.is_empty() => Ok(urls.to_vec()),
            _ => {
                tracing::debug!(identifier = %identifier, "no RDAP service in bootstrap registry");
                Err(RdapError::no_server(identifier.to_string()))
            }
        }
    }

    async fn current(&self) -> LoadResult {
        if let Some(table) = self.inner.table.load_full() {
            if self.inner.invalidated.swap(false, Ordering::AcqRel) {
                let inner = self.inner.clone();
                tokio::spawn(async move {
                    let _ = inner.load().await;
                });
            }
            return Ok(table);
        }
        self.inner.invalidated.store(false, Ordering::Release);
        self.inner.clone().load().await
    }

    /// Load the table now. Concurrent callers share a single load.
    pub async fn load(&self) -> Result<(), RdapError> {
        self.inner.clone().load().await.map(|_| ())
    }

    /// Reload the table. On failure the previous table keeps being served and
    /// the state becomes `Stale`.
    pub async fn refresh(&self) -> Result<(), RdapError> {
        self.load().await
    }

    /// Make the next lookup trigger a background reload.
    pub fn invalidate(&self) {
        self.inner.invalidated.store(true, Ordering::Release);
    }

    /// Refresh the table every `refresh_interval` until the resolver is dropped.
    pub fn spawn_refresh_task(&self) -> JoinHandle<()> {
        let weak: Weak<ResolverInner> = Arc::downgrade(&self.inner);
        let interval = self.refresh_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = inner.load().await {
                    tracing::warn!(error = %e, "scheduled bootstrap refresh failed");
                }
            }
        })
    }
}
