//! Per-registry admission control.
//!
//! Each registry gets its own token bucket. Requests never queue: when the
//! bucket cannot admit a request the caller gets a `RateLimit` error right away
//! and may try another service URL or back off.

use crate::error::RdapError;
use crate::types::Priority;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Token bucket sizing shared by all registries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    /// Burst size.
    pub capacity: u32,
    /// Sustained requests per second.
    pub refill_per_sec: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_per_sec: 5.0,
        }
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn refill(&mut self, config: &RateLimitConfig, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * config.refill_per_sec).min(config.capacity as f64);
        self.last_refill = now;
    }
}

/// Fraction of the bucket a priority class may not dip into.
fn reserve_fraction(priority: Priority) -> f64 {
    match priority {
        Priority::High => 0.0,
        Priority::Normal => 0.1,
        Priority::Low => 0.5,
    }
}

/// Independent token buckets keyed by registry identity.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: RwLock<HashMap<String, Arc<Mutex<TokenBucket>>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    fn bucket(&self, registry: &str) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self.buckets.read().get(registry) {
            return bucket.clone();
        }
        self.buckets
            .write()
            .entry(registry.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(TokenBucket {
                    tokens: self.config.capacity as f64,
                    last_refill: Instant::now(),
                }))
            })
            .clone()
    }

    /// Take one token for `registry`, or fail fast with `RateLimit`.
    pub fn try_acquire(&self, registry: &str, priority: Priority) -> Result<(), RdapError> {
        let bucket = self.bucket(registry);
        let mut bucket = bucket.lock();
        bucket.refill(&self.config, Instant::now());

        let reserve = (self.config.capacity as f64 * reserve_fraction(priority)).floor();
        let needed = reserve + 1.0;

        if bucket.tokens >= needed {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        let retry_after = if self.config.refill_per_sec > 0.0 {
            Some(
                Duration::try_from_secs_f64((needed - bucket.tokens) / self.config.refill_per_sec)
                    .unwrap_or(Duration::MAX),
            )
        } else {
            None
        };
        Err(RdapError::rate_limited(registry, retry_after))
    }

    /// Tokens currently available for `registry` (after refill).
    pub fn available(&self, registry: &str) -> f64 {
        let bucket = self.bucket(registry);
        let mut bucket = bucket.lock();
        bucket.refill(&self.config, Instant::now());
        bucket.tokens
    }
}
