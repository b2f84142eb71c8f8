//! Query cache for beans and id lists.
//!
//! The `try_*` methods surface every failure. The plain methods are the data
//! path: failures are logged, counted, and degrade to a miss or a dropped
//! write so a cache outage never fails a query.

use super::codec::PayloadCodec;
use super::key::{CacheKey, CacheKind, QuerySignature};
use crate::kv::{scan_all, KeyValueStore};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strata_core::{CacheConfig, CacheError, StrataError, StrataResult};

// ============================================================================
// STATISTICS
// ============================================================================

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads that found an entry.
    pub hits: u64,
    /// Reads that found nothing.
    pub misses: u64,
    /// Entries written.
    pub writes: u64,
    /// Keys removed by deletes and bulk invalidation.
    pub invalidated: u64,
    /// Failures swallowed on the data path.
    pub errors: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    invalidated: AtomicU64,
    errors: AtomicU64,
}

impl CacheCounters {
    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// QUERY CACHE
// ============================================================================

/// Read/write-through cache of beans and query id lists over a
/// [`KeyValueStore`].
#[derive(Debug)]
pub struct RedisQueryCache {
    store: Arc<dyn KeyValueStore>,
    config: CacheConfig,
    codec: PayloadCodec,
    counters: CacheCounters,
}

impl RedisQueryCache {
    /// Build a cache; rejects an invalid config.
    pub fn new(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> StrataResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            codec: PayloadCodec::new(),
            counters: CacheCounters::default(),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    fn key(&self, kind: CacheKind, table: &str, identifier: &str) -> StrataResult<CacheKey> {
        CacheKey::new(&self.config.namespace, kind, table, identifier)
    }

    fn degrade(&self, operation: &'static str, table: &str, err: &StrataError) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(operation, table = %table, error = %err, "Cache operation degraded");
    }

    // ---- generic entry operations ----

    async fn try_get_entry<T: DeserializeOwned>(
        &self,
        kind: CacheKind,
        table: &str,
        identifier: &str,
    ) -> StrataResult<Option<T>> {
        let key = self.key(kind, table, identifier)?;
        let bytes = self
            .store
            .get(key.as_str())
            .await
            .map_err(|e| backend_err("get", e))?;
        match bytes {
            Some(bytes) => {
                let value = self.codec.decode(key.as_str(), &bytes)?;
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn try_put_entry<T: Serialize + ?Sized>(
        &self,
        kind: CacheKind,
        table: &str,
        identifier: &str,
        value: &T,
    ) -> StrataResult<()> {
        let key = self.key(kind, table, identifier)?;
        let payload = self.codec.encode(value)?;
        self.store
            .set(key.as_str(), &payload, self.config.ttl)
            .await
            .map_err(|e| backend_err("set", e))?;
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn try_del_entry(&self, kind: CacheKind, table: &str, identifier: &str) -> StrataResult<()> {
        let key = self.key(kind, table, identifier)?;
        let removed = self
            .store
            .delete(&[key.as_str().to_string()])
            .await
            .map_err(|e| backend_err("delete", e))?;
        self.counters.invalidated.fetch_add(removed, Ordering::Relaxed);
        Ok(())
    }

    async fn try_clear(&self, kind: CacheKind, table: &str) -> StrataResult<u64> {
        let pattern = CacheKey::pattern(&self.config.namespace, kind, table)?;
        let keys = scan_all(self.store.as_ref(), &pattern, self.config.scan_batch_size)
            .await
            .map_err(|e| backend_err("scan", e))?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = self
            .store
            .delete(&keys)
            .await
            .map_err(|e| backend_err("delete", e))?;
        self.counters.invalidated.fetch_add(removed, Ordering::Relaxed);
        tracing::debug!(table = %table, kind = %kind, matched = keys.len(), removed, "Cleared cache entries");
        Ok(removed)
    }

    // ---- beans ----

    pub async fn try_get_bean<T: DeserializeOwned>(&self, table: &str, id: &str) -> StrataResult<Option<T>> {
        self.try_get_entry(CacheKind::Bean, table, id).await
    }

    pub async fn try_put_bean<T: Serialize + ?Sized>(&self, table: &str, id: &str, bean: &T) -> StrataResult<()> {
        self.try_put_entry(CacheKind::Bean, table, id, bean).await
    }

    pub async fn try_del_bean(&self, table: &str, id: &str) -> StrataResult<()> {
        self.try_del_entry(CacheKind::Bean, table, id).await
    }

    /// Remove every bean of `table`, returning how many keys were deleted.
    pub async fn try_clear_beans(&self, table: &str) -> StrataResult<u64> {
        self.try_clear(CacheKind::Bean, table).await
    }

    /// Cached bean, or `None` on miss or any failure.
    pub async fn get_bean<T: DeserializeOwned>(&self, table: &str, id: &str) -> Option<T> {
        self.try_get_bean(table, id).await.unwrap_or_else(|e| {
            self.degrade("get_bean", table, &e);
            None
        })
    }

    pub async fn put_bean<T: Serialize + ?Sized>(&self, table: &str, id: &str, bean: &T) {
        if let Err(e) = self.try_put_bean(table, id, bean).await {
            self.degrade("put_bean", table, &e);
        }
    }

    pub async fn del_bean(&self, table: &str, id: &str) {
        if let Err(e) = self.try_del_bean(table, id).await {
            self.degrade("del_bean", table, &e);
        }
    }

    pub async fn clear_beans(&self, table: &str) {
        if let Err(e) = self.try_clear_beans(table).await {
            self.degrade("clear_beans", table, &e);
        }
    }

    // ---- id lists ----

    pub async fn try_get_id_list<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &QuerySignature,
    ) -> StrataResult<Option<Vec<T>>> {
        self.try_get_entry(CacheKind::Sql, table, query.as_str()).await
    }

    pub async fn try_put_id_list<T: Serialize>(
        &self,
        table: &str,
        query: &QuerySignature,
        ids: &[T],
    ) -> StrataResult<()> {
        self.try_put_entry(CacheKind::Sql, table, query.as_str(), ids).await
    }

    pub async fn try_del_id_list(&self, table: &str, query: &QuerySignature) -> StrataResult<()> {
        self.try_del_entry(CacheKind::Sql, table, query.as_str()).await
    }

    /// Remove every id list of `table`, returning how many keys were deleted.
    pub async fn try_clear_id_lists(&self, table: &str) -> StrataResult<u64> {
        self.try_clear(CacheKind::Sql, table).await
    }

    pub async fn get_id_list<T: DeserializeOwned>(&self, table: &str, query: &QuerySignature) -> Option<Vec<T>> {
        self.try_get_id_list(table, query).await.unwrap_or_else(|e| {
            self.degrade("get_id_list", table, &e);
            None
        })
    }

    pub async fn put_id_list<T: Serialize>(&self, table: &str, query: &QuerySignature, ids: &[T]) {
        if let Err(e) = self.try_put_id_list(table, query, ids).await {
            self.degrade("put_id_list", table, &e);
        }
    }

    pub async fn del_id_list(&self, table: &str, query: &QuerySignature) {
        if let Err(e) = self.try_del_id_list(table, query).await {
            self.degrade("del_id_list", table, &e);
        }
    }

    pub async fn clear_id_lists(&self, table: &str) {
        if let Err(e) = self.try_clear_id_lists(table).await {
            self.degrade("clear_id_lists", table, &e);
        }
    }
}

fn backend_err(operation: &str, err: StrataError) -> StrataError {
    CacheError::Backend {
        operation: operation.to_string(),
        reason: err.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::ScanPage;
    use crate::memory::InMemoryKeyValueStore;
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::time::Duration;
    use strata_core::StoreError;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        id: i64,
        name: String,
    }

    fn user(id: i64) -> User {
        User {
            id,
            name: format!("user-{id}"),
        }
    }

    fn cache_over(store: &Arc<InMemoryKeyValueStore>) -> RedisQueryCache {
        RedisQueryCache::new(store.clone(), CacheConfig::default().with_scan_batch_size(7)).unwrap()
    }

    #[tokio::test]
    async fn test_bean_round_trip() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let cache = cache_over(&store);

        assert_eq!(cache.get_bean::<User>("users", "1").await, None);
        cache.put_bean("users", "1", &user(1)).await;
        assert_eq!(cache.get_bean::<User>("users", "1").await, Some(user(1)));

        cache.del_bean("users", "1").await;
        assert_eq!(cache.get_bean::<User>("users", "1").await, None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn test_id_list_round_trip() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let cache = cache_over(&store);
        let query = QuerySignature::new("SELECT id FROM users WHERE age > ?", [30]);

        cache.put_id_list("users", &query, &[3i64, 5, 8]).await;
        assert_eq!(
            cache.get_id_list::<i64>("users", &query).await,
            Some(vec![3, 5, 8])
        );
        cache.del_id_list("users", &query).await;
        assert_eq!(cache.get_id_list::<i64>("users", &query).await, None);
    }

    #[tokio::test]
    async fn test_id_lists_with_comma_params_stay_apart() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let cache = cache_over(&store);
        let sql = "SELECT id FROM users WHERE a = ? AND b = ?";
        let first = QuerySignature::new(sql, ["x,y", "z"]);
        let second = QuerySignature::new(sql, ["x", "y,z"]);

        cache.put_id_list("users", &first, &[1i64]).await;
        assert_eq!(cache.get_id_list::<i64>("users", &second).await, None);
        cache.put_id_list("users", &second, &[2i64]).await;
        assert_eq!(cache.get_id_list::<i64>("users", &first).await, Some(vec![1]));
    }

    #[tokio::test]
    async fn test_clear_beans_is_scoped_to_table() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let cache = cache_over(&store);

        for i in 0..20 {
            cache.put_bean("t", &i.to_string(), &user(i)).await;
            cache.put_bean("u", &i.to_string(), &user(i)).await;
        }
        let query = QuerySignature::sql("SELECT id FROM t");
        cache.put_id_list("t", &query, &[1i64]).await;

        let removed = cache.try_clear_beans("t").await.unwrap();
        assert_eq!(removed, 20);

        for i in 0..20 {
            assert!(cache.get_bean::<User>("t", &i.to_string()).await.is_none());
            assert!(cache.get_bean::<User>("u", &i.to_string()).await.is_some());
        }
        assert!(cache.get_id_list::<i64>("t", &query).await.is_some());
    }

    #[tokio::test]
    async fn test_clear_with_no_matches_succeeds() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let cache = cache_over(&store);
        assert_eq!(cache.try_clear_id_lists("empty").await.unwrap(), 0);
        cache.clear_id_lists("empty").await;
        assert_eq!(cache.stats().errors, 0);
    }

    #[tokio::test]
    async fn test_corrupt_entry_reads_as_miss() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let cache = cache_over(&store);
        let key = CacheKey::new("strata", CacheKind::Bean, "users", "9").unwrap();
        store
            .set(key.as_str(), b"{not json", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(matches!(
            cache.try_get_bean::<User>("users", "9").await,
            Err(StrataError::Cache(CacheError::Deserialize { .. }))
        ));
        assert_eq!(cache.get_bean::<User>("users", "9").await, None);
        assert_eq!(cache.stats().errors, 1);
    }

    #[derive(Debug)]
    struct DownStore;

    #[async_trait]
    impl KeyValueStore for DownStore {
        fn backend_name(&self) -> &'static str {
            "down"
        }
        async fn set_if_absent(&self, _: &str, _: &[u8], _: Duration) -> StrataResult<bool> {
            Err(down())
        }
        async fn get(&self, _: &str) -> StrataResult<Option<Vec<u8>>> {
            Err(down())
        }
        async fn set(&self, _: &str, _: &[u8], _: Duration) -> StrataResult<()> {
            Err(down())
        }
        async fn delete(&self, _: &[String]) -> StrataResult<u64> {
            Err(down())
        }
        async fn delete_if_equals(&self, _: &str, _: &[u8]) -> StrataResult<bool> {
            Err(down())
        }
        async fn scan(&self, _: u64, _: &str, _: usize) -> StrataResult<ScanPage> {
            Err(down())
        }
    }

    fn down() -> StrataError {
        StoreError::Connection {
            backend: "down".to_string(),
            reason: "connection refused".to_string(),
        }
        .into()
    }

    #[tokio::test]
    async fn test_backend_outage_degrades() {
        let cache = RedisQueryCache::new(Arc::new(DownStore), CacheConfig::default()).unwrap();

        cache.put_bean("users", "1", &user(1)).await;
        assert_eq!(cache.get_bean::<User>("users", "1").await, None);
        cache.clear_beans("users").await;
        assert_eq!(cache.stats().errors, 3);

        assert!(matches!(
            cache.try_get_bean::<User>("users", "1").await,
            Err(StrataError::Cache(CacheError::Backend { .. }))
        ));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let config = CacheConfig::default().with_scan_batch_size(0);
        assert!(RedisQueryCache::new(store, config).is_err());
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
