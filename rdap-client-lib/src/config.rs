//! Client configuration.
//!
//! [`ClientConfig`] is the runtime configuration of an [`crate::RdapClient`].
//! It can be built in code, loaded from TOML files, overridden through
//! `RDAP_*` environment variables, or all three. Precedence, lowest first:
//! built-in defaults, XDG config, home directory config, local config,
//! environment.

use crate::cache::CacheConfig;
use crate::error::RdapError;
use crate::protocols::fetcher::FetchConfig;
use crate::protocols::rate_limit::RateLimitConfig;
use crate::protocols::registry::{DEFAULT_REFRESH_INTERVAL, IANA_BOOTSTRAP_BASE};
use crate::types::LegalBasis;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime configuration of a client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub fetch: FetchConfig,
    pub cache: CacheConfig,
    /// Use the cache unless a query opts out.
    pub cache_enabled: bool,
    pub cache_sweep_interval: Duration,
    /// Base URL of the IANA bootstrap documents.
    pub bootstrap_url: String,
    pub bootstrap_refresh_interval: Duration,
    /// Deadline for a whole query when the caller sets none.
    pub query_timeout: Duration,
    /// Legal basis assumed when a query does not state one.
    pub default_legal_basis: LegalBasis,
    /// Reject queries that do not state a legal basis.
    pub require_legal_basis: bool,
    pub redact_pii: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            cache: CacheConfig::default(),
            cache_enabled: true,
            cache_sweep_interval: Duration::from_secs(300),
            bootstrap_url: IANA_BOOTSTRAP_BASE.to_string(),
            bootstrap_refresh_interval: DEFAULT_REFRESH_INTERVAL,
            query_timeout: Duration::from_secs(30),
            default_legal_basis: LegalBasis::default(),
            require_legal_basis: false,
            redact_pii: true,
        }
    }
}

impl ClientConfig {
    /// Set the per-request fetch timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.fetch.timeout = timeout;
        self
    }

    /// Set the whole-query deadline.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.fetch.max_attempts = attempts;
        self
    }

    pub fn with_rate_limit(mut self, capacity: u32, refill_per_sec: f64) -> Self {
        self.fetch.rate_limit = RateLimitConfig {
            capacity,
            refill_per_sec,
        };
        self
    }

    pub fn with_allowed_hosts(mut self, hosts: Vec<String>) -> Self {
        self.fetch.allowed_hosts = hosts;
        self
    }

    pub fn with_blocked_hosts(mut self, hosts: Vec<String>) -> Self {
        self.fetch.blocked_hosts = hosts;
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache.capacity = capacity;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache.ttl = ttl;
        self
    }

    pub fn with_negative_ttl(mut self, ttl: Duration) -> Self {
        self.cache.negative_ttl = ttl;
        self
    }

    pub fn with_bootstrap_url<S: Into<String>>(mut self, url: S) -> Self {
        self.bootstrap_url = url.into();
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.bootstrap_refresh_interval = interval;
        self
    }

    pub fn with_legal_basis(mut self, basis: LegalBasis) -> Self {
        self.default_legal_basis = basis;
        self
    }

    pub fn with_require_legal_basis(mut self, required: bool) -> Self {
        self.require_legal_basis = required;
        self
    }

    pub fn with_redaction(mut self, redact_pii: bool) -> Self {
        self.redact_pii = redact_pii;
        self
    }

    /// Check the configuration for values the client cannot work with.
    pub fn validate(&self) -> Result<(), RdapError> {
        self.fetch.validate()?;

        if self.cache.capacity == 0 {
            return Err(RdapError::config("cache capacity must be greater than zero"));
        }
        if self.cache.ttl.is_zero() {
            return Err(RdapError::config("cache TTL must be greater than zero"));
        }
        if self.query_timeout.is_zero() {
            return Err(RdapError::config("query timeout must be greater than zero"));
        }
        if self.bootstrap_refresh_interval.is_zero() || self.cache_sweep_interval.is_zero() {
            return Err(RdapError::config("background intervals must be greater than zero"));
        }

        let url = url::Url::parse(&self.bootstrap_url).map_err(|e| {
            RdapError::config(format!("invalid bootstrap URL '{}': {}", self.bootstrap_url, e))
        })?;
        if url.scheme() != "https" {
            return Err(RdapError::config("bootstrap URL must use HTTPS"));
        }

        Ok(())
    }
}

/// Configuration loaded from TOML files.
///
/// Every value is optional; unset values leave the lower-precedence value in
/// place.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch: Option<FetchSection>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitSection>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheSection>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<BootstrapSection>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy: Option<PrivacySection>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<QuerySection>,
}

/// `[fetch]` table.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FetchSection {
    /// Per-request timeout (e.g. "10s")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_redirects: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_hosts: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_hosts: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// `[rate_limit]` table.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RateLimitSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refill_per_sec: Option<f64>,
}

/// `[cache]` table.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CacheSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_ttl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep_interval: Option<String>,
}

/// `[bootstrap]` table.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BootstrapSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_interval: Option<String>,
}

/// `[privacy]` table.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PrivacySection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legal_basis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_legal_basis: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redact_pii: Option<bool>,
}

/// `[query]` table.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct QuerySection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

/// Merge two optional sections, field by field.
fn merge_section<T>(lower: Option<T>, higher: Option<T>, merge: fn(T, T) -> T) -> Option<T> {
    match (lower, higher) {
        (Some(lower), Some(higher)) => Some(merge(lower, higher)),
        (None, higher) => higher,
        (lower, None) => lower,
    }
}

fn duration_field(field: &str, value: &Option<String>) -> Result<Option<Duration>, RdapError> {
    match value {
        None => Ok(None),
        Some(raw) => parse_duration_string(raw).map(Some).ok_or_else(|| {
            RdapError::config(format!(
                "invalid duration '{}' for {}, use a format like '500ms', '10s', '5m', '24h'",
                raw, field
            ))
        }),
    }
}

impl FileConfig {
    /// Overlay the values set in this file onto `config`.
    pub fn apply_to(&self, config: &mut ClientConfig) -> Result<(), RdapError> {
        if let Some(fetch) = &self.fetch {
            if let Some(timeout) = duration_field("fetch.timeout", &fetch.timeout)? {
                config.fetch.timeout = timeout;
            }
            if let Some(attempts) = fetch.max_attempts {
                config.fetch.max_attempts = attempts;
            }
            if let Some(redirects) = fetch.max_redirects {
                config.fetch.max_redirects = redirects;
            }
            if let Some(bytes) = fetch.max_response_bytes {
                config.fetch.max_response_bytes = bytes;
            }
            if let Some(hosts) = &fetch.allowed_hosts {
                config.fetch.allowed_hosts = hosts.clone();
            }
            if let Some(hosts) = &fetch.blocked_hosts {
                config.fetch.blocked_hosts = hosts.clone();
            }
            if let Some(agent) = &fetch.user_agent {
                config.fetch.user_agent = agent.clone();
            }
        }

        if let Some(rate_limit) = &self.rate_limit {
            if let Some(capacity) = rate_limit.capacity {
                config.fetch.rate_limit.capacity = capacity;
            }
            if let Some(refill) = rate_limit.refill_per_sec {
                config.fetch.rate_limit.refill_per_sec = refill;
            }
        }

        if let Some(cache) = &self.cache {
            if let Some(enabled) = cache.enabled {
                config.cache_enabled = enabled;
            }
            if let Some(capacity) = cache.capacity {
                config.cache.capacity = capacity;
            }
            if let Some(ttl) = duration_field("cache.ttl", &cache.ttl)? {
                config.cache.ttl = ttl;
            }
            if let Some(ttl) = duration_field("cache.negative_ttl", &cache.negative_ttl)? {
                config.cache.negative_ttl = ttl;
            }
            if let Some(interval) = duration_field("cache.sweep_interval", &cache.sweep_interval)? {
                config.cache_sweep_interval = interval;
            }
        }

        if let Some(bootstrap) = &self.bootstrap {
            if let Some(url) = &bootstrap.url {
                config.bootstrap_url = url.clone();
            }
            if let Some(interval) =
                duration_field("bootstrap.refresh_interval", &bootstrap.refresh_interval)?
            {
                config.bootstrap_refresh_interval = interval;
            }
        }

        if let Some(privacy) = &self.privacy {
            if let Some(basis) = &privacy.legal_basis {
                config.default_legal_basis = basis
                    .parse::<LegalBasis>()
                    .map_err(|e| RdapError::config(format!("privacy.legal_basis: {}", e)))?;
            }
            if let Some(required) = privacy.require_legal_basis {
                config.require_legal_basis = required;
            }
            if let Some(redact) = privacy.redact_pii {
                config.redact_pii = redact;
            }
        }

        if let Some(query) = &self.query {
            if let Some(timeout) = duration_field("query.timeout", &query.timeout)? {
                config.query_timeout = timeout;
            }
        }

        Ok(())
    }
}

/// Configuration discovery and loading functionality.
pub struct ConfigManager {
    /// Log every file that contributed to the merged configuration
    pub verbose: bool,
}

impl ConfigManager {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Load and validate one configuration file.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<FileConfig, RdapError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(RdapError::config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            RdapError::config(format!(
                "failed to read configuration file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: FileConfig = toml::from_str(&content).map_err(|e| {
            RdapError::config(format!(
                "failed to parse TOML configuration {}: {}",
                path.display(),
                e
            ))
        })?;

        self.validate_config(&config)?;
        Ok(config)
    }

    /// Discover and merge configuration files in precedence order.
    ///
    /// Files that fail to load are skipped with a warning.
    pub fn discover_and_load(&self) -> Result<FileConfig, RdapError> {
        let candidates = [
            self.get_xdg_config_path(),
            self.get_global_config_path(),
            self.get_local_config_path(),
        ];

        let mut merged = FileConfig::default();
        for path in candidates.into_iter().flatten() {
            match self.load_file(&path) {
                Ok(config) => {
                    if self.verbose {
                        tracing::info!(path = %path.display(), "loaded configuration file");
                    }
                    merged = self.merge_configs(merged, config);
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping configuration file"),
            }
        }

        Ok(merged)
    }

    /// Build a full client configuration: defaults, then discovered files,
    /// then the file named by `RDAP_CONFIG`, then `RDAP_*` variables.
    pub fn resolve_client_config(&self) -> Result<ClientConfig, RdapError> {
        let env_config = load_env_config();

        let mut files = self.discover_and_load()?;
        if let Some(path) = &env_config.config {
            files = self.merge_configs(files, self.load_file(path)?);
        }

        let mut config = ClientConfig::default();
        files.apply_to(&mut config)?;
        env_config.apply_to(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Local configuration in the current directory.
    fn get_local_config_path(&self) -> Option<PathBuf> {
        ["./rdap-client.toml", "./.rdap-client.toml"]
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    /// Configuration in the user's home directory.
    fn get_global_config_path(&self) -> Option<PathBuf> {
        let home = env::var_os("HOME")?;
        [".rdap-client.toml", "rdap-client.toml"]
            .iter()
            .map(|candidate| Path::new(&home).join(candidate))
            .find(|path| path.exists())
    }

    /// XDG Base Directory location.
    fn get_xdg_config_path(&self) -> Option<PathBuf> {
        let config_dir = env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| Path::new(&home).join(".config")))?;

        let path = config_dir.join("rdap-client").join("config.toml");
        path.exists().then_some(path)
    }

    /// Values from `higher` take precedence over values from `lower`.
    fn merge_configs(&self, lower: FileConfig, higher: FileConfig) -> FileConfig {
        FileConfig {
            fetch: merge_section(lower.fetch, higher.fetch, |lower, higher| FetchSection {
                timeout: higher.timeout.or(lower.timeout),
                max_attempts: higher.max_attempts.or(lower.max_attempts),
                max_redirects: higher.max_redirects.or(lower.max_redirects),
                max_response_bytes: higher.max_response_bytes.or(lower.max_response_bytes),
                allowed_hosts: higher.allowed_hosts.or(lower.allowed_hosts),
                blocked_hosts: higher.blocked_hosts.or(lower.blocked_hosts),
                user_agent: higher.user_agent.or(lower.user_agent),
            }),
            rate_limit: merge_section(lower.rate_limit, higher.rate_limit, |lower, higher| {
                RateLimitSection {
                    capacity: higher.capacity.or(lower.capacity),
                    refill_per_sec: higher.refill_per_sec.or(lower.refill_per_sec),
                }
            }),
            cache: merge_section(lower.cache, higher.cache, |lower, higher| CacheSection {
                enabled: higher.enabled.or(lower.enabled),
                capacity: higher.capacity.or(lower.capacity),
                ttl: higher.ttl.or(lower.ttl),
                negative_ttl: higher.negative_ttl.or(lower.negative_ttl),
                sweep_interval: higher.sweep_interval.or(lower.sweep_interval),
            }),
            bootstrap: merge_section(lower.bootstrap, higher.bootstrap, |lower, higher| {
                BootstrapSection {
                    url: higher.url.or(lower.url),
                    refresh_interval: higher.refresh_interval.or(lower.refresh_interval),
                }
            }),
            privacy: merge_section(lower.privacy, higher.privacy, |lower, higher| PrivacySection {
                legal_basis: higher.legal_basis.or(lower.legal_basis),
                require_legal_basis: higher.require_legal_basis.or(lower.require_legal_basis),
                redact_pii: higher.redact_pii.or(lower.redact_pii),
            }),
            query: merge_section(lower.query, higher.query, |lower, higher| QuerySection {
                timeout: higher.timeout.or(lower.timeout),
            }),
        }
    }

    /// Validate a configuration file for common issues.
    fn validate_config(&self, config: &FileConfig) -> Result<(), RdapError> {
        let mut scratch = ClientConfig::default();
        config.apply_to(&mut scratch)?;
        scratch.fetch.validate()?;

        if let Some(fetch) = &config.fetch {
            if fetch.max_attempts == Some(0) || fetch.max_attempts.is_some_and(|n| n > 10) {
                return Err(RdapError::config("fetch.max_attempts must be between 1 and 10"));
            }
            let hosts = fetch.allowed_hosts.iter().chain(fetch.blocked_hosts.iter()).flatten();
            for host in hosts {
                if host.trim().is_empty() || host.contains('/') || host.contains(' ') {
                    return Err(RdapError::config(format!("invalid host '{}' in host list", host)));
                }
            }
        }

        if let Some(cache) = &config.cache {
            if cache.capacity == Some(0) {
                return Err(RdapError::config("cache.capacity must be greater than zero"));
            }
        }

        Ok(())
    }
}

/// Configuration values read from `RDAP_*` environment variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvConfig {
    pub timeout: Option<Duration>,
    pub query_timeout: Option<Duration>,
    pub max_attempts: Option<u32>,
    pub cache: Option<bool>,
    pub cache_capacity: Option<usize>,
    pub cache_ttl: Option<Duration>,
    pub legal_basis: Option<LegalBasis>,
    pub require_legal_basis: Option<bool>,
    pub redact_pii: Option<bool>,
    pub allowed_hosts: Option<Vec<String>>,
    pub blocked_hosts: Option<Vec<String>>,
    pub bootstrap_url: Option<String>,
    /// Extra configuration file to load.
    pub config: Option<String>,
}

impl EnvConfig {
    /// Read values through `lookup`. Invalid values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        fn parsed<T>(name: &str, raw: Option<String>, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
            let raw = raw?;
            let value = parse(raw.trim());
            if value.is_none() {
                tracing::warn!(variable = name, value = %raw, "ignoring invalid environment value");
            } else {
                tracing::debug!(variable = name, value = %raw, "using environment value");
            }
            value
        }

        let list = |s: &str| {
            let items: Vec<String> = s
                .split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect();
            (!items.is_empty()).then_some(items)
        };

        Self {
            timeout: parsed("RDAP_TIMEOUT", read("RDAP_TIMEOUT"), parse_duration_string),
            query_timeout: parsed(
                "RDAP_QUERY_TIMEOUT",
                read("RDAP_QUERY_TIMEOUT"),
                parse_duration_string,
            ),
            max_attempts: parsed("RDAP_MAX_ATTEMPTS", read("RDAP_MAX_ATTEMPTS"), |s| {
                s.parse::<u32>().ok().filter(|n| (1..=10).contains(n))
            }),
            cache: parsed("RDAP_CACHE", read("RDAP_CACHE"), parse_bool),
            cache_capacity: parsed("RDAP_CACHE_CAPACITY", read("RDAP_CACHE_CAPACITY"), |s| {
                s.parse::<usize>().ok().filter(|n| *n > 0)
            }),
            cache_ttl: parsed("RDAP_CACHE_TTL", read("RDAP_CACHE_TTL"), parse_duration_string),
            legal_basis: parsed("RDAP_LEGAL_BASIS", read("RDAP_LEGAL_BASIS"), |s| s.parse().ok()),
            require_legal_basis: parsed(
                "RDAP_REQUIRE_LEGAL_BASIS",
                read("RDAP_REQUIRE_LEGAL_BASIS"),
                parse_bool,
            ),
            redact_pii: parsed("RDAP_REDACT_PII", read("RDAP_REDACT_PII"), parse_bool),
            allowed_hosts: parsed("RDAP_ALLOWED_HOSTS", read("RDAP_ALLOWED_HOSTS"), list),
            blocked_hosts: parsed("RDAP_BLOCKED_HOSTS", read("RDAP_BLOCKED_HOSTS"), list),
            bootstrap_url: read("RDAP_BOOTSTRAP_URL"),
            config: read("RDAP_CONFIG"),
        }
    }

    /// Overlay the values that are set onto `config`.
    pub fn apply_to(&self, config: &mut ClientConfig) {
        if let Some(timeout) = self.timeout {
            config.fetch.timeout = timeout;
        }
        if let Some(timeout) = self.query_timeout {
            config.query_timeout = timeout;
        }
        if let Some(attempts) = self.max_attempts {
            config.fetch.max_attempts = attempts;
        }
        if let Some(enabled) = self.cache {
            config.cache_enabled = enabled;
        }
        if let Some(capacity) = self.cache_capacity {
            config.cache.capacity = capacity;
        }
        if let Some(ttl) = self.cache_ttl {
            config.cache.ttl = ttl;
        }
        if let Some(basis) = self.legal_basis {
            config.default_legal_basis = basis;
        }
        if let Some(required) = self.require_legal_basis {
            config.require_legal_basis = required;
        }
        if let Some(redact) = self.redact_pii {
            config.redact_pii = redact;
        }
        if let Some(hosts) = &self.allowed_hosts {
            config.fetch.allowed_hosts = hosts.clone();
        }
        if let Some(hosts) = &self.blocked_hosts {
            config.fetch.blocked_hosts = hosts.clone();
        }
        if let Some(url) = &self.bootstrap_url {
            config.bootstrap_url = url.clone();
        }
    }
}

/// Load configuration from the process environment.
pub fn load_env_config() -> EnvConfig {
    EnvConfig::from_lookup(|name| env::var(name).ok())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a duration like "500ms", "5s", "2m" or "24h". A bare number is
/// seconds.
pub fn parse_duration_string(value: &str) -> Option<Duration> {
    let value = value.trim().to_lowercase();

    let (number, unit_ms) = if let Some(n) = value.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = value.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = value.strip_suffix('m') {
        (n, 60_000)
    } else if let Some(n) = value.strip_suffix('h') {
        (n, 3_600_000)
    } else {
        (value.as_str(), 1_000)
    };

    number
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(unit_ms))
        .map(Duration::from_millis)
}
