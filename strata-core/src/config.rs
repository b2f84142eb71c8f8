//! Configuration types
//!
//! Every config has a `Default`, `with_*` builders, `from_env()` and a
//! `validate()` that rejects values the runtime cannot work with.

use crate::{ReleaseMode, StrataError, StrataResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// DEFAULTS
// ============================================================================

/// Default interval between background provisioning ticks (1 hour)
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 3600;

/// Default TTL of the provisioning lock (5 minutes)
pub const DEFAULT_LOCK_TTL_SECS: u64 = 300;

/// Default prefix of provisioning lock keys
pub const DEFAULT_LOCK_KEY_PREFIX: &str = "strata:timesharding:";

/// Default cache key namespace
pub const DEFAULT_CACHE_NAMESPACE: &str = "strata";

/// Default cache entry TTL (2 minutes)
pub const DEFAULT_CACHE_TTL_SECS: u64 = 120;

/// Default number of keys requested per SCAN call
pub const DEFAULT_SCAN_BATCH_SIZE: usize = 1000;

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

// ============================================================================
// SHARDING CONFIGURATION
// ============================================================================

/// Configuration for the time-sharding manager and its scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardingConfig {
    /// How often the background task re-provisions every table.
    pub tick_interval: Duration,
    /// TTL of the provisioning lock. Must exceed worst-case provisioning latency.
    pub lock_ttl: Duration,
    /// Prefix joined with the org name to form the lock key.
    pub lock_key_prefix: String,
    /// How held locks are released.
    pub release_mode: ReleaseMode,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(DEFAULT_TICK_INTERVAL_SECS),
            lock_ttl: Duration::from_secs(DEFAULT_LOCK_TTL_SECS),
            lock_key_prefix: DEFAULT_LOCK_KEY_PREFIX.to_string(),
            release_mode: ReleaseMode::default(),
        }
    }
}

impl ShardingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create ShardingConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `STRATA_SHARDING_TICK_INTERVAL_SECS`: tick interval (default: 3600)
    /// - `STRATA_LOCK_TTL_SECS`: provisioning lock TTL (default: 300)
    /// - `STRATA_LOCK_KEY_PREFIX`: lock key prefix (default: `strata:timesharding:`)
    /// - `STRATA_LOCK_RELEASE_MODE`: `holder_token` or `unconditional` (default: holder_token)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tick_interval: env_parse("STRATA_SHARDING_TICK_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.tick_interval),
            lock_ttl: env_parse("STRATA_LOCK_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.lock_ttl),
            lock_key_prefix: std::env::var("STRATA_LOCK_KEY_PREFIX")
                .unwrap_or(defaults.lock_key_prefix),
            release_mode: env_parse("STRATA_LOCK_RELEASE_MODE").unwrap_or(defaults.release_mode),
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn with_lock_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.lock_key_prefix = prefix.into();
        self
    }

    pub fn with_release_mode(mut self, mode: ReleaseMode) -> Self {
        self.release_mode = mode;
        self
    }

    /// Lock key for a table's org name.
    pub fn lock_key(&self, org_name: &str) -> String {
        format!("{}{}", self.lock_key_prefix, org_name)
    }

    pub fn validate(&self) -> StrataResult<()> {
        if self.tick_interval.is_zero() {
            return Err(StrataError::invalid(
                "tick_interval",
                format!("{:?}", self.tick_interval),
                "tick_interval must be positive",
            ));
        }
        if self.lock_ttl.is_zero() {
            return Err(StrataError::invalid(
                "lock_ttl",
                format!("{:?}", self.lock_ttl),
                "lock_ttl must be positive",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// CACHE CONFIGURATION
// ============================================================================

/// Configuration for the query cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// First segment of every cache key.
    pub namespace: String,
    /// TTL applied to every written entry.
    pub ttl: Duration,
    /// COUNT hint for each SCAN call during bulk invalidation.
    pub scan_batch_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_CACHE_NAMESPACE.to_string(),
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            scan_batch_size: DEFAULT_SCAN_BATCH_SIZE,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create CacheConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `STRATA_CACHE_NAMESPACE`: key namespace (default: `strata`)
    /// - `STRATA_CACHE_TTL_SECS`: entry TTL (default: 120)
    /// - `STRATA_CACHE_SCAN_BATCH`: keys per SCAN call (default: 1000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            namespace: std::env::var("STRATA_CACHE_NAMESPACE").unwrap_or(defaults.namespace),
            ttl: env_parse("STRATA_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.ttl),
            scan_batch_size: env_parse("STRATA_CACHE_SCAN_BATCH")
                .unwrap_or(defaults.scan_batch_size),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_scan_batch_size(mut self, size: usize) -> Self {
        self.scan_batch_size = size;
        self
    }

    pub fn validate(&self) -> StrataResult<()> {
        if self.namespace.trim().is_empty() {
            return Err(StrataError::missing("namespace"));
        }
        if self.namespace.contains(':') || self.namespace.contains('*') {
            return Err(StrataError::invalid(
                "namespace",
                &self.namespace,
                "namespace must not contain ':' or '*'",
            ));
        }
        if self.ttl.is_zero() {
            return Err(StrataError::invalid(
                "ttl",
                format!("{:?}", self.ttl),
                "ttl must be positive",
            ));
        }
        if self.scan_batch_size == 0 {
            return Err(StrataError::invalid(
                "scan_batch_size",
                self.scan_batch_size,
                "scan_batch_size must be positive",
            ));
        }
        Ok(())
    }
}
