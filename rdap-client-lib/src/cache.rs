//! Two-tier response cache with request coalescing.
//!
//! Lookups check the bounded local LRU first, then the optional shared tier,
//! then run the caller's compute function through [`SingleFlight`] so that
//! concurrent misses for one key cause a single upstream fetch. Results are
//! written to both tiers.
//!
//! Only successful responses and registry-stable failures (no server for the
//! identifier, upstream 404) are stored. Shared tier failures are logged and
//! reported to telemetry, and the query continues with the local tier alone.

use crate::concurrent::SingleFlight;
use crate::error::RdapError;
use crate::telemetry::{CacheTier, TelemetryEvent, TelemetrySink};
use crate::types::{IdentifierKind, NormalizedResponse};
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio::time::Instant;

type QueryResult = Result<NormalizedResponse, RdapError>;

/// Deterministic cache key for a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build from identifier class, canonical value and redaction policy id.
    /// Callers pass already-canonical values, so equal queries map to equal keys.
    pub fn new(kind: IdentifierKind, canonical: &str, policy_id: &str) -> Self {
        Self(format!("{}:{}:{}", kind.as_str(), canonical, policy_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cache sizing and lifetimes.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of local entries.
    pub capacity: usize,
    /// Lifetime of successful responses.
    pub ttl: Duration,
    /// Lifetime of registry-stable failures. Zero disables negative caching.
    pub negative_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            ttl: Duration::from_secs(3600),
            negative_ttl: Duration::from_secs(60),
        }
    }
}

/// A stored query outcome.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub value: QueryResult,
    pub inserted_at: Instant,
    pub expires_at: Instant,
    pub source: CacheTier,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Optional cross-process cache tier.
///
/// Values are opaque bytes; expiry is also recorded inside the value, so a
/// backend that ignores `ttl` never causes an expired entry to be served.
#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RdapError>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), RdapError>;
    async fn delete(&self, key: &str) -> Result<(), RdapError>;
}

/// In-process implementation of [`SharedCache`], useful for sharing one tier
/// between several clients and for tests.
#[derive(Debug, Default)]
pub struct MemorySharedCache {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
}

impl MemorySharedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SharedCache for MemorySharedCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RdapError> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((_, expires_at)) if Instant::now() > *expires_at => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), RdapError> {
        self.entries
            .lock()
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RdapError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Wire format of shared tier values.
#[derive(Debug, Serialize, Deserialize)]
struct SharedRecord {
    expires_at_ms: u64,
    value: StoredValue,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
enum StoredValue {
    Response(NormalizedResponse),
    Error(RdapError),
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub shared_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

struct CacheInner {
    config: CacheConfig,
    local: Mutex<LruCache<CacheKey, CacheEntry>>,
    shared: Option<Arc<dyn SharedCache>>,
    telemetry: Arc<dyn TelemetrySink>,
    hits: AtomicU64,
    shared_hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Response cache shared by all queries of a client.
pub struct QueryCache {
    inner: Arc<CacheInner>,
    flights: SingleFlight<CacheKey, QueryResult>,
}

impl QueryCache {
    pub fn new(
        config: CacheConfig,
        shared: Option<Arc<dyn SharedCache>>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self, RdapError> {
        let capacity = NonZeroUsize::new(config.capacity)
            .ok_or_else(|| RdapError::config("cache capacity must be greater than zero"))?;
        if config.ttl.is_zero() {
            return Err(RdapError::config("cache TTL must be greater than zero"));
        }

        Ok(Self {
            inner: Arc::new(CacheInner {
                config,
                local: Mutex::new(LruCache::new(capacity)),
                shared,
                telemetry,
                hits: AtomicU64::new(0),
                shared_hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
            }),
            flights: SingleFlight::new(),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Return the cached outcome for `key`, or compute, store and return it.
    ///
    /// Concurrent calls for the same key share one execution of `compute`.
    /// Hits are returned with `meta.cached` set.
    pub async fn get_or_fetch<F, Fut>(&self, key: CacheKey, compute: F) -> QueryResult
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = QueryResult> + Send + 'static,
    {
        if let Some(value) = self.inner.lookup_local(&key) {
            return value;
        }
        self.fill(key, compute).await
    }

    /// Join or lead the flight for `key`. The leader re-checks both tiers
    /// before computing.
    async fn fill<F, Fut>(&self, key: CacheKey, compute: F) -> QueryResult
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = QueryResult> + Send + 'static,
    {
        let inner = self.inner.clone();
        let flight_key = key.clone();
        self.flights
            .run(key, move || async move {
                if let Some(value) = inner.lookup_local(&flight_key) {
                    return value;
                }
                if let Some(value) = inner.lookup_shared(&flight_key).await {
                    return value;
                }

                inner.misses.fetch_add(1, Ordering::Relaxed);
                inner.telemetry.record(&TelemetryEvent::Cache {
                    key: flight_key.to_string(),
                    hit: None,
                });

                let result = compute().await;
                inner.store(&flight_key, &result).await;
                result
            })
            .await
    }

    /// Read a key without computing anything.
    pub async fn get(&self, key: &CacheKey) -> Option<QueryResult> {
        if let Some(value) = self.inner.lookup_local(key) {
            return Some(value);
        }
        self.inner.lookup_shared(key).await
    }

    /// Store an outcome directly. Transient errors are ignored.
    pub async fn insert(&self, key: &CacheKey, value: &QueryResult) {
        self.inner.store(key, value).await;
    }

    /// Remove a key from both tiers.
    pub async fn invalidate(&self, key: &CacheKey) {
        self.inner.local.lock().pop(key);
        if let Some(shared) = &self.inner.shared {
            if let Err(e) = shared.delete(key.as_str()).await {
                self.inner.degraded("delete", &e);
            }
        }
    }

    /// Drop every local entry. The shared tier is left untouched.
    pub fn clear(&self) {
        self.inner.local.lock().clear();
    }

    /// Remove expired local entries, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    /// Periodically purge expired local entries until the cache is dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<CacheInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let purged = inner.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "swept expired cache entries");
                }
            }
        })
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            shared_hits: self.inner.shared_hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
            entries: self.inner.local.lock().len(),
        }
    }

    /// Number of keys currently being computed.
    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }
}

impl CacheInner {
    fn lookup_local(&self, key: &CacheKey) -> Option<QueryResult> {
        let now = Instant::now();
        let mut local = self.local.lock();

        let expired = match local.get(key) {
            None => return None,
            Some(entry) => entry.is_expired(now),
        };
        if expired {
            local.pop(key);
            return None;
        }

        let entry = local.peek(key)?;
        let value = mark_cached(entry.value.clone());
        drop(local);

        self.hits.fetch_add(1, Ordering::Relaxed);
        self.telemetry.record(&TelemetryEvent::Cache {
            key: key.to_string(),
            hit: Some(CacheTier::Local),
        });
        Some(value)
    }

    async fn lookup_shared(&self, key: &CacheKey) -> Option<QueryResult> {
        let shared = self.shared.as_ref()?;

        let bytes = match shared.get(key.as_str()).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                self.degraded("get", &e);
                return None;
            }
        };

        let record: SharedRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                self.degraded("decode", &RdapError::cache(e.to_string()));
                return None;
            }
        };

        let now_ms = unix_millis(SystemTime::now());
        if now_ms > record.expires_at_ms {
            return None;
        }

        let value = match record.value {
            StoredValue::Response(response) => Ok(response),
            StoredValue::Error(error) => Err(error),
        };

        // Promote into the local tier for the remaining lifetime.
        let now = Instant::now();
        let remaining = Duration::from_millis(record.expires_at_ms - now_ms);
        self.insert_local(CacheEntry {
            key: key.clone(),
            value: value.clone(),
            inserted_at: now,
            expires_at: now + remaining,
            source: CacheTier::Shared,
        });

        self.shared_hits.fetch_add(1, Ordering::Relaxed);
        self.telemetry.record(&TelemetryEvent::Cache {
            key: key.to_string(),
            hit: Some(CacheTier::Shared),
        });
        Some(mark_cached(value))
    }

    fn ttl_for(&self, value: &QueryResult) -> Option<Duration> {
        let ttl = match value {
            Ok(_) => self.config.ttl,
            Err(e) if e.is_negative_cacheable() => self.config.negative_ttl,
            Err(_) => return None,
        };
        (!ttl.is_zero()).then_some(ttl)
    }

    async fn store(&self, key: &CacheKey, value: &QueryResult) {
        let Some(ttl) = self.ttl_for(value) else {
            return;
        };

        let now = Instant::now();
        self.insert_local(CacheEntry {
            key: key.clone(),
            value: value.clone(),
            inserted_at: now,
            expires_at: now + ttl,
            source: CacheTier::Local,
        });

        let Some(shared) = &self.shared else {
            return;
        };

        let record = SharedRecord {
            expires_at_ms: unix_millis(SystemTime::now() + ttl),
            value: match value {
                Ok(response) => StoredValue::Response(response.clone()),
                Err(error) => StoredValue::Error(error.clone()),
            },
        };
        let bytes = match serde_json::to_vec(&record) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.degraded("encode", &RdapError::cache(e.to_string()));
                return;
            }
        };
        if let Err(e) = shared.set(key.as_str(), bytes, ttl).await {
            self.degraded("set", &e);
        }
    }

    fn insert_local(&self, entry: CacheEntry) {
        let key = entry.key.clone();
        if let Some((evicted, _)) = self.local.lock().push(key.clone(), entry) {
            if evicted != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut local = self.local.lock();
        let expired: Vec<CacheKey> = local
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            local.pop(key);
        }
        expired.len()
    }

    fn degraded(&self, operation: &'static str, error: &RdapError) {
        tracing::warn!(operation, error = %error, "shared cache tier unavailable, using local tier only");
        self.telemetry.record(&TelemetryEvent::CacheDegraded {
            operation,
            message: error.to_string(),
        });
    }
}

fn mark_cached(value: QueryResult) -> QueryResult {
    value.map(|mut response| {
        response.meta.cached = true;
        response
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::NoopTelemetry;
    use crate::types::{LegalBasis, ResponseMeta};
    use std::sync::atomic::AtomicUsize;

    fn response(identifier: &str) -> NormalizedResponse {
        NormalizedResponse {
            identifier: identifier.to_string(),
            object_class: "domain".to_string(),
            handle: None,
            name: Some(identifier.to_string()),
            unicode_name: None,
            status: vec!["active".to_string()],
            events: vec![],
            entities: vec![],
            nameservers: None,
            links: vec![],
            remarks: vec![],
            network: None,
            autnum: None,
            extensions: serde_json::Map::new(),
            raw: None,
            meta: ResponseMeta {
                cached: false,
                registry: "verisign".to_string(),
                redacted: true,
                legal_basis: LegalBasis::LegitimateInterest,
                source_url: "https://rdap.verisign.com/com/v1/domain/example.com".to_string(),
            },
        }
    }

    fn key(name: &str) -> CacheKey {
        CacheKey::new(IdentifierKind::Domain, name, "legitimate-interest+redact")
    }

    fn cache(config: CacheConfig, shared: Option<Arc<dyn SharedCache>>) -> QueryCache {
        QueryCache::new(config, shared, Arc::new(NoopTelemetry)).unwrap()
    }

    struct FailingShared;

    #[async_trait]
    impl SharedCache for FailingShared {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, RdapError> {
            Err(RdapError::cache("connection refused"))
        }
        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), RdapError> {
            Err(RdapError::cache("connection refused"))
        }
        async fn delete(&self, _key: &str) -> Result<(), RdapError> {
            Err(RdapError::cache("connection refused"))
        }
    }

    #[test]
    fn test_zero_capacity_is_config_error() {
        let config = CacheConfig {
            capacity: 0,
            ..CacheConfig::default()
        };
        let err = QueryCache::new(config, None, Arc::new(NoopTelemetry))
            .err()
            .unwrap();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_key_is_deterministic() {
        assert_eq!(key("example.com"), key("example.com"));
        assert_eq!(key("example.com").as_str(), "domain:example.com:legitimate-interest+redact");
        assert_ne!(
            CacheKey::new(IdentifierKind::Domain, "example.com", "consent+raw"),
            key("example.com")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_after_write_then_expiry() {
        let cache = cache(
            CacheConfig {
                capacity: 10,
                ttl: Duration::from_secs(30),
                negative_ttl: Duration::from_secs(5),
            },
            None,
        );
        let calls = Arc::new(AtomicUsize::new(0));

        let fetch = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(response("example.com"))
            }
        };

        let first = cache
            .get_or_fetch(key("example.com"), fetch(calls.clone()))
            .await
            .unwrap();
        assert!(!first.meta.cached);

        tokio::time::advance(Duration::from_secs(29)).await;
        let second = cache
            .get_or_fetch(key("example.com"), fetch(calls.clone()))
            .await
            .unwrap();
        assert!(second.meta.cached);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(&key("example.com")).await.is_none());
        let third = cache
            .get_or_fetch(key("example.com"), fetch(calls.clone()))
            .await
            .unwrap();
        assert!(!third.meta.cached);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_callers_receive_copies() {
        let cache = cache(CacheConfig::default(), None);
        let mut first = cache
            .get_or_fetch(key("example.com"), || async { Ok(response("example.com")) })
            .await
            .unwrap();
        first.status.push("tampered".to_string());

        let second = cache.get(&key("example.com")).await.unwrap().unwrap();
        assert_eq!(second.status, vec!["active".to_string()]);
    }

    #[tokio::test]
    async fn test_single_flight_across_concurrent_misses() {
        let cache = Arc::new(cache(CacheConfig::default(), None));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(key("example.com"), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(response("example.com"))
                    })
                    .await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.identifier == results[0].identifier));
    }

    #[tokio::test]
    async fn test_late_flight_reuses_stored_entry() {
        let cache = cache(CacheConfig::default(), None);
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(response("example.com"))
            }
        };

        cache
            .get_or_fetch(key("example.com"), counted(calls.clone()))
            .await
            .unwrap();
        // A caller whose local lookup missed just before the first flight stored.
        let late = cache
            .fill(key("example.com"), counted(calls.clone()))
            .await
            .unwrap();
        assert!(late.meta.cached);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_errors_not_cached() {
        let cache = cache(CacheConfig::default(), None);
        let err = cache
            .get_or_fetch(key("example.com"), || async {
                Err(RdapError::network("connection reset"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NETWORK_ERROR");
        assert!(cache.get(&key("example.com")).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_negatively_cached_briefly() {
        let cache = cache(
            CacheConfig {
                capacity: 10,
                ttl: Duration::from_secs(300),
                negative_ttl: Duration::from_secs(10),
            },
            None,
        );
        let not_found = || async { Err(RdapError::server("verisign", 404, "not found")) };

        cache
            .get_or_fetch(key("missing.com"), not_found)
            .await
            .unwrap_err();
        let cached = cache.get(&key("missing.com")).await.unwrap();
        assert!(cached.unwrap_err().is_not_found());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.get(&key("missing.com")).await.is_none());
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = cache(
            CacheConfig {
                capacity: 2,
                ..CacheConfig::default()
            },
            None,
        );
        for name in ["a.com", "b.com"] {
            cache.insert(&key(name), &Ok(response(name))).await;
        }
        // Touch a.com so b.com becomes least recently used.
        assert!(cache.get(&key("a.com")).await.is_some());
        cache.insert(&key("c.com"), &Ok(response("c.com"))).await;

        assert!(cache.get(&key("a.com")).await.is_some());
        assert!(cache.get(&key("b.com")).await.is_none());
        assert!(cache.get(&key("c.com")).await.is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = cache(
            CacheConfig {
                capacity: 10,
                ttl: Duration::from_secs(5),
                negative_ttl: Duration::from_secs(1),
            },
            None,
        );
        cache.insert(&key("a.com"), &Ok(response("a.com"))).await;
        cache
            .insert(&key("gone.com"), &Err(RdapError::no_server("gone.com")))
            .await;

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.stats().entries, 1);
    }

    #[tokio::test]
    async fn test_shared_tier_round_trip() {
        let shared = Arc::new(MemorySharedCache::new());
        let writer = cache(CacheConfig::default(), Some(shared.clone()));
        let reader = cache(CacheConfig::default(), Some(shared.clone()));

        writer
            .get_or_fetch(key("example.com"), || async { Ok(response("example.com")) })
            .await
            .unwrap();
        assert_eq!(shared.len(), 1);

        let value = reader
            .get_or_fetch(key("example.com"), || async {
                Err(RdapError::network("should not be called"))
            })
            .await
            .unwrap();
        assert!(value.meta.cached);
        assert_eq!(reader.stats().shared_hits, 1);

        // Promoted into the reader's local tier.
        assert_eq!(reader.stats().entries, 1);
    }

    #[tokio::test]
    async fn test_shared_tier_failure_degrades_to_local() {
        let cache = cache(CacheConfig::default(), Some(Arc::new(FailingShared)));
        let value = cache
            .get_or_fetch(key("example.com"), || async { Ok(response("example.com")) })
            .await
            .unwrap();
        assert!(!value.meta.cached);

        let again = cache.get(&key("example.com")).await.unwrap().unwrap();
        assert!(again.meta.cached);
    }
}
