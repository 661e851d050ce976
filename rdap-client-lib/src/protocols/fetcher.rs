//! SSRF-hardened HTTPS fetching.
//!
//! [`SecureFetcher`] is the only component that talks to registries. For each
//! hop it checks the URL, resolves the host once, rejects the request if any
//! resolved address is non-public, and then connects to the validated address
//! without resolving again. Redirects are followed manually so every hop goes
//! through the same checks.

use crate::error::RdapError;
use crate::protocols::rate_limit::{RateLimitConfig, RateLimiter};
use crate::protocols::ssrf::SsrfGuard;
use crate::telemetry::{FetchOutcome, TelemetryEvent, TelemetrySink};
use crate::types::{Priority, RawResponse};
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use rand::Rng;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Default response size cap (5 MiB).
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 5 * 1024 * 1024;

/// Slowest non-zero refill rate a rate limiter accepts.
pub const MIN_REFILL_PER_SEC: f64 = 0.001;

/// Pinned HTTP clients kept alive by [`ReqwestTransport`].
const CLIENT_POOL_SIZE: usize = 64;

const ACCEPT: &str = "application/rdap+json, application/json;q=0.9";

/// Fetcher settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    /// Deadline for a single HTTP exchange.
    pub timeout: Duration,
    /// Attempts per fetch, including the first one.
    pub max_attempts: u32,
    /// First retry delay; doubled on every further attempt.
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub max_redirects: u32,
    pub max_response_bytes: usize,
    /// If non-empty, only these hosts and their subdomains are contacted.
    pub allowed_hosts: Vec<String>,
    pub blocked_hosts: Vec<String>,
    pub rate_limit: RateLimitConfig,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_attempts: 3,
            backoff_base: Duration::from_millis(250),
            backoff_max: Duration::from_secs(4),
            max_redirects: 3,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            allowed_hosts: Vec::new(),
            blocked_hosts: Vec::new(),
            rate_limit: RateLimitConfig::default(),
            user_agent: concat!("rdap-client/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl FetchConfig {
    pub fn validate(&self) -> Result<(), RdapError> {
        if self.timeout.is_zero() {
            return Err(RdapError::config("fetch timeout must be greater than zero"));
        }
        if self.max_attempts == 0 {
            return Err(RdapError::config("max_attempts must be at least 1"));
        }
        if self.max_response_bytes == 0 {
            return Err(RdapError::config("max_response_bytes must be greater than zero"));
        }
        if self.rate_limit.capacity == 0 {
            return Err(RdapError::config("rate limit capacity must be greater than zero"));
        }
        let refill = self.rate_limit.refill_per_sec;
        if !refill.is_finite() || refill < 0.0 {
            return Err(RdapError::config("rate limit refill rate must be a non-negative number"));
        }
        if refill > 0.0 && refill < MIN_REFILL_PER_SEC {
            return Err(RdapError::config(format!(
                "rate limit refill rate must be 0 or at least {MIN_REFILL_PER_SEC} per second"
            )));
        }
        Ok(())
    }
}

/// Per-call context supplied by the orchestrator.
#[derive(Debug, Clone)]
pub struct FetchContext {
    /// Registry identity used for rate limiting and telemetry.
    pub registry: String,
    pub priority: Priority,
    /// Caller deadline; bounds every attempt and every backoff sleep.
    pub deadline: Option<Instant>,
}

impl FetchContext {
    pub fn new<S: Into<String>>(registry: S) -> Self {
        Self {
            registry: registry.into(),
            priority: Priority::Normal,
            deadline: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

/// Retrieves a registry document.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &Url, context: &FetchContext) -> Result<RawResponse, RdapError>;
}

/// Resolves host names to addresses.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<IpAddr>, RdapError>;
}

/// System DNS through `tokio::net::lookup_host`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<IpAddr>, RdapError> {
        let addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| RdapError::network(format!("DNS lookup for {} failed: {}", host, e)))?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

/// Response of a single HTTP exchange.
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    pub status: u16,
    pub location: Option<String>,
    pub retry_after: Option<String>,
    pub body: Vec<u8>,
}

/// Performs one GET against an address that has already been validated.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(
        &self,
        url: &Url,
        addr: SocketAddr,
        max_body: usize,
    ) -> Result<TransportResponse, RdapError>;
}

/// `reqwest` transport with rustls, TLS 1.2 minimum and no automatic redirects.
///
/// Each client has its host pinned to the validated address, so reqwest never
/// resolves names on its own.
pub struct ReqwestTransport {
    user_agent: String,
    clients: Mutex<LruCache<(String, SocketAddr), reqwest::Client>>,
}

impl ReqwestTransport {
    pub fn new(user_agent: impl Into<String>) -> Self {
        let size = NonZeroUsize::new(CLIENT_POOL_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self {
            user_agent: user_agent.into(),
            clients: Mutex::new(LruCache::new(size)),
        }
    }

    fn client_for(&self, host: &str, addr: SocketAddr) -> Result<reqwest::Client, RdapError> {
        let key = (host.to_string(), addr);
        if let Some(client) = self.clients.lock().get(&key) {
            return Ok(client.clone());
        }

        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .https_only(true)
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .redirect(reqwest::redirect::Policy::none())
            .resolve(host, addr)
            .user_agent(self.user_agent.clone())
            .build()
            .map_err(|e| RdapError::network(format!("Failed to create HTTP client: {}", e)))?;

        self.clients.lock().put(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(
        &self,
        url: &Url,
        addr: SocketAddr,
        max_body: usize,
    ) -> Result<TransportResponse, RdapError> {
        let host = url
            .host_str()
            .ok_or_else(|| RdapError::ssrf(url.as_str(), "URL has no host"))?;
        let client = self.client_for(host, addr)?;

        let mut response = client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, ACCEPT)
            .send()
            .await?;

        let header = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };
        let location = header(reqwest::header::LOCATION);
        let retry_after = header(reqwest::header::RETRY_AFTER);
        let status = response.status().as_u16();

        if response.content_length().is_some_and(|len| len > max_body as u64) {
            return Err(too_large(max_body));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > max_body {
                return Err(too_large(max_body));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(TransportResponse {
            status,
            location,
            retry_after,
            body,
        })
    }
}

fn too_large(max_body: usize) -> RdapError {
    RdapError::network(format!("response exceeds {} bytes", max_body))
}

fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value?.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// How one attempt ended.
enum Attempt {
    Done(RawResponse),
    /// Worth another attempt after an optional server-provided delay.
    Retry(RdapError, Option<Duration>),
    Fail(RdapError),
}

/// The production [`Fetch`] implementation.
pub struct SecureFetcher {
    config: FetchConfig,
    guard: SsrfGuard,
    limiter: RateLimiter,
    resolver: Arc<dyn HostResolver>,
    transport: Arc<dyn Transport>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl SecureFetcher {
    pub fn new(config: FetchConfig, telemetry: Arc<dyn TelemetrySink>) -> Result<Self, RdapError> {
        config.validate()?;
        Ok(Self {
            guard: SsrfGuard::new(config.allowed_hosts.clone(), config.blocked_hosts.clone()),
            limiter: RateLimiter::new(config.rate_limit),
            resolver: Arc::new(SystemResolver),
            transport: Arc::new(ReqwestTransport::new(config.user_agent.clone())),
            telemetry,
            config,
        })
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Validate a URL and pick the address to connect to.
    async fn pin(&self, url: &Url) -> Result<SocketAddr, RdapError> {
        let port = url.port_or_known_default().unwrap_or(443);
        if let Some(ip) = self.guard.check_url(url)? {
            return Ok(SocketAddr::new(ip, port));
        }

        let host = url
            .host_str()
            .ok_or_else(|| RdapError::ssrf(url.as_str(), "URL has no host"))?;
        let addrs = self.resolver.resolve(host, port).await?;
        let ip = self.guard.check_resolved(url.as_str(), &addrs)?;
        Ok(SocketAddr::new(ip, port))
    }

    /// One attempt, following redirects.
    async fn attempt(&self, url: &Url, context: &FetchContext) -> Attempt {
        let mut current = url.clone();

        for hop in 0..=self.config.max_redirects {
            let addr = match self.pin(&current).await {
                Ok(addr) => addr,
                Err(e) if e.is_retryable() => return Attempt::Retry(e, None),
                Err(e) => return Attempt::Fail(e),
            };
            if let Err(e) = self.limiter.try_acquire(&context.registry, context.priority) {
                return Attempt::Fail(e);
            }

            let timeout = match context.remaining() {
                Some(remaining) if remaining.is_zero() => {
                    return Attempt::Fail(RdapError::timeout("RDAP fetch", self.config.timeout));
                }
                Some(remaining) => remaining.min(self.config.timeout),
                None => self.config.timeout,
            };

            let started = Instant::now();
            let sent = tokio::time::timeout(
                timeout,
                self.transport
                    .get(&current, addr, self.config.max_response_bytes),
            )
            .await;
            let response = match sent {
                Err(_) => return Attempt::Retry(RdapError::timeout("RDAP fetch", timeout), None),
                Ok(Err(e)) if e.is_retryable() => return Attempt::Retry(e, None),
                Ok(Err(e)) => return Attempt::Fail(e),
                Ok(Ok(response)) => response,
            };
            let latency = started.elapsed();

            if response.body.len() > self.config.max_response_bytes {
                return Attempt::Fail(too_large(self.config.max_response_bytes));
            }

            let status = response.status;
            if is_redirect(status) {
                if hop == self.config.max_redirects {
                    return Attempt::Fail(RdapError::network(format!(
                        "too many redirects (max {})",
                        self.config.max_redirects
                    )));
                }
                let Some(location) = response.location.as_deref() else {
                    return Attempt::Fail(RdapError::network(format!(
                        "HTTP {} without Location header",
                        status
                    )));
                };
                current = match current.join(location) {
                    Ok(next) => next,
                    Err(e) => return Attempt::Fail(e.into()),
                };
                tracing::debug!(hop = hop + 1, to = %current, "following redirect");
                continue;
            }

            let error = match status {
                200..=299 => {
                    return Attempt::Done(RawResponse {
                        status,
                        body: response.body,
                        registry: context.registry.clone(),
                        url: current,
                        remote_addr: addr.ip(),
                        latency,
                    });
                }
                429 => {
                    let retry_after = parse_retry_after(response.retry_after.as_deref());
                    return Attempt::Retry(
                        RdapError::rate_limited(&context.registry, retry_after),
                        retry_after,
                    );
                }
                _ => RdapError::server(
                    &context.registry,
                    status,
                    format!("{} returned HTTP {}", current, status),
                ),
            };

            return if error.is_retryable() {
                Attempt::Retry(error, None)
            } else {
                Attempt::Fail(error)
            };
        }

        Attempt::Fail(RdapError::network("redirect loop"))
    }

    async fn fetch_with_retry(
        &self,
        url: &Url,
        context: &FetchContext,
        attempts: &mut u32,
    ) -> Result<RawResponse, RdapError> {
        loop {
            *attempts += 1;
            let (error, retry_after) = match self.attempt(url, context).await {
                Attempt::Done(response) => return Ok(response),
                Attempt::Fail(error) => return Err(error),
                Attempt::Retry(error, retry_after) => (error, retry_after),
            };

            if *attempts >= self.config.max_attempts {
                return Err(error);
            }

            let retry_after = retry_after.unwrap_or_default();
            if retry_after > self.config.backoff_max {
                tracing::debug!(
                    url = %url,
                    retry_after_secs = retry_after.as_secs(),
                    "server delay exceeds backoff cap, giving up"
                );
                return Err(error);
            }
            let delay = backoff(&self.config, *attempts).max(retry_after);
            if context.remaining().is_some_and(|remaining| remaining <= delay) {
                return Err(error);
            }

            tracing::debug!(
                url = %url,
                attempt = *attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying RDAP fetch"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Capped exponential backoff with up to 50% jitter.
fn backoff(config: &FetchConfig, attempt: u32) -> Duration {
    let exp = config
        .backoff_base
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
    let capped = exp.min(config.backoff_max);
    let jitter_ms = capped.as_millis() as u64 / 2;
    let jitter = if jitter_ms > 0 {
        rand::thread_rng().gen_range(0..=jitter_ms)
    } else {
        0
    };
    capped + Duration::from_millis(jitter)
}

#[async_trait]
impl Fetch for SecureFetcher {
    async fn fetch(&self, url: &Url, context: &FetchContext) -> Result<RawResponse, RdapError> {
        let started = Instant::now();
        let mut attempts = 0;
        let result = self.fetch_with_retry(url, context, &mut attempts).await;

        let outcome = match &result {
            Ok(response) => FetchOutcome::Status(response.status),
            Err(e) => FetchOutcome::Failed(e.kind()),
        };
        self.telemetry.record(&TelemetryEvent::Fetch {
            registry: context.registry.clone(),
            host: url.host_str().unwrap_or_default().to_string(),
            latency: started.elapsed(),
            attempts,
            outcome,
        });

        match &result {
            Ok(response) => {
                tracing::debug!(url = %response.url, status = response.status, attempts, "RDAP fetch complete")
            }
            Err(e) => tracing::debug!(url = %url, error = %e, attempts, "RDAP fetch failed"),
        }
        result
    }
}
