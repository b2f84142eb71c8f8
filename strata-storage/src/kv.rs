//! Key-value store trait.
//!
//! The distributed lock and the query cache both sit on this trait. Values
//! are raw bytes; TTLs are applied by the store.

use async_trait::async_trait;
use strata_core::StrataResult;
use std::time::Duration;

/// One page of a cursor-based key scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Keys matching the pattern on this page. May be empty even when
    /// `next_cursor` is non-zero.
    pub keys: Vec<String>,
    /// Cursor for the next call. Zero means the scan is complete.
    pub next_cursor: u64,
}

impl ScanPage {
    pub fn is_last(&self) -> bool {
        self.next_cursor == 0
    }
}

/// Shared key-value store consumed by the lock and the cache.
#[async_trait]
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    /// Short backend name for logs and error messages.
    fn backend_name(&self) -> &'static str;

    /// Atomically set `key` with a TTL if it is absent.
    ///
    /// Returns `true` when this call created the key.
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> StrataResult<bool>;

    /// Get the value at `key`, `None` when absent or expired.
    async fn get(&self, key: &str) -> StrataResult<Option<Vec<u8>>>;

    /// Unconditionally set `key` with a TTL.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StrataResult<()>;

    /// Delete keys, returning how many existed.
    ///
    /// Missing keys are not an error. An empty slice is a no-op.
    async fn delete(&self, keys: &[String]) -> StrataResult<u64>;

    /// Atomically delete `key` only while it holds `expected`.
    ///
    /// Returns `true` when the key was deleted.
    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> StrataResult<bool>;

    /// One step of a glob-pattern key scan starting at `cursor` (0 starts a
    /// new scan). `batch` is a hint for how many keys to examine.
    async fn scan(&self, cursor: u64, pattern: &str, batch: usize) -> StrataResult<ScanPage>;
}

/// Drive [`KeyValueStore::scan`] to completion and collect every matching key.
pub async fn scan_all(
    store: &dyn KeyValueStore,
    pattern: &str,
    batch: usize,
) -> StrataResult<Vec<String>> {
    let mut keys = Vec::new();
    let mut cursor = 0u64;
    loop {
        let page = store.scan(cursor, pattern, batch).await?;
        keys.extend(page.keys);
        if page.next_cursor == 0 {
            break;
        }
        cursor = page.next_cursor;
    }
    keys.sort_unstable();
    keys.dedup();
    Ok(keys)
}
