//! Redis key-value backend.
//!
//! A single multiplexed tokio connection; clones share it. Only single-node
//! deployments are supported, since bulk invalidation relies on SCAN.

use crate::kv::{KeyValueStore, ScanPage};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strata_core::{StoreError, StrataError, StrataResult};

/// Compare-and-delete: remove KEYS[1] only while it holds ARGV[1].
const DELETE_IF_EQUALS_SCRIPT: &str = r#"
local v = redis.call('GET', KEYS[1])
if v == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Redis connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://127.0.0.1:6379/0`
    pub url: String,
    /// When false, callers fall back to in-process lock and cache stores.
    pub enabled: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            enabled: false,
        }
    }
}

impl RedisConfig {
    /// Create RedisConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `STRATA_REDIS_URL`: connection URL; setting it enables Redis
    /// - `STRATA_REDIS_ENABLED`: explicit on/off override
    pub fn from_env() -> Self {
        let url = std::env::var("STRATA_REDIS_URL").ok();
        let enabled = std::env::var("STRATA_REDIS_ENABLED")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(url.is_some());
        Self {
            url: url.unwrap_or_else(|| Self::default().url),
            enabled,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self.enabled = true;
        self
    }

    pub fn validate(&self) -> StrataResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.url.trim().is_empty() {
            return Err(StrataError::missing("redis.url"));
        }
        if !(self.url.starts_with("redis://") || self.url.starts_with("rediss://")) {
            return Err(StrataError::invalid(
                "redis.url",
                &self.url,
                "url must use the redis:// or rediss:// scheme",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// BACKEND
// ============================================================================

fn map_redis_err(err: redis::RedisError) -> StrataError {
    let reason = err.to_string();
    let backend = "redis".to_string();
    if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
        StoreError::Connection { backend, reason }.into()
    } else {
        StoreError::Query { backend, reason }.into()
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Redis-backed [`KeyValueStore`].
#[derive(Clone)]
pub struct RedisKeyValueStore {
    conn: MultiplexedConnection,
}

impl std::fmt::Debug for RedisKeyValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisKeyValueStore").finish_non_exhaustive()
    }
}

impl RedisKeyValueStore {
    /// Open a client and establish the multiplexed connection.
    pub async fn connect(config: &RedisConfig) -> StrataResult<Self> {
        config.validate()?;
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            StrataError::invalid("redis.url", &config.url, e.to_string())
        })?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(map_redis_err)?;
        tracing::info!(url = %config.url, "Connected to Redis");
        Ok(Self { conn })
    }

    pub fn from_connection(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }

    async fn query<T: redis::FromRedisValue>(&self, cmd: redis::Cmd) -> StrataResult<T> {
        let mut conn = self.conn.clone();
        cmd.query_async(&mut conn).await.map_err(map_redis_err)
    }
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> StrataResult<bool> {
        // SET key val NX PX ttl: OK => Some("OK"), taken => Nil
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX").arg("PX").arg(ttl_millis(ttl));
        let r: Option<String> = self.query(cmd).await?;
        Ok(r.is_some())
    }

    async fn get(&self, key: &str) -> StrataResult<Option<Vec<u8>>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.query(cmd).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StrataResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("PX").arg(ttl_millis(ttl));
        self.query(cmd).await
    }

    async fn delete(&self, keys: &[String]) -> StrataResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("DEL");
        cmd.arg(keys);
        self.query(cmd).await
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> StrataResult<bool> {
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(DELETE_IF_EQUALS_SCRIPT).arg(1).arg(key).arg(expected);
        let deleted: u64 = self.query(cmd).await?;
        Ok(deleted > 0)
    }

    async fn scan(&self, cursor: u64, pattern: &str, batch: usize) -> StrataResult<ScanPage> {
        let mut cmd = redis::cmd("SCAN");
        cmd.arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(batch.max(1));
        let (next_cursor, keys): (u64, Vec<String>) = self.query(cmd).await?;
        Ok(ScanPage { keys, next_cursor })
    }
}
