//! In-memory store backends.
//!
//! Used when no external store is configured and throughout the tests.
//! Semantics follow the networked backends: TTL expiry on read, glob
//! scans with a cursor, idempotent table creation.

use crate::kv::{KeyValueStore, ScanPage};
use crate::relational::{validate_identifier, TableStore};
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};
use strata_core::{StoreError, StrataError, StrataResult, TableShape};

fn poisoned(guard: &str) -> StrataError {
    StoreError::Poisoned {
        guard: guard.to_string(),
    }
    .into()
}

/// Translate a Redis-style glob (`*`, `?`) into an anchored regex.
pub(crate) fn glob_to_regex(pattern: &str) -> StrataResult<Regex> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    let mut buf = [0u8; 4];
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| {
        StoreError::Query {
            backend: "memory".to_string(),
            reason: format!("invalid scan pattern {:?}: {}", pattern, e),
        }
        .into()
    })
}

// ============================================================================
// KEY-VALUE STORE
// ============================================================================

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Open scan cursors kept before the oldest is forgotten.
const MAX_OPEN_CURSORS: usize = 1024;

/// Key-value store held in process memory.
///
/// Scans walk keys in sorted order. A cursor names the last key a page
/// examined, so keys deleted mid-scan never shift the keys still to come.
/// Expired entries are purged on every write.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    entries: RwLock<BTreeMap<String, MemoryEntry>>,
    cursors: Mutex<BTreeMap<u64, String>>,
    cursor_seq: AtomicU64,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .map(|map| map.values().filter(|e| e.is_live(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        self.entries
            .read()
            .map(|map| {
                map.iter()
                    .filter(|(_, e)| e.is_live(now))
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn expiry(ttl: Duration) -> Option<Instant> {
        Instant::now().checked_add(ttl)
    }

    fn purge_expired(map: &mut BTreeMap<String, MemoryEntry>, now: Instant) {
        map.retain(|_, e| e.is_live(now));
    }

    /// Key the scan behind `cursor` resumes after. Zero starts a new scan.
    fn resume_key(&self, cursor: u64) -> StrataResult<Option<String>> {
        if cursor == 0 {
            return Ok(None);
        }
        let mut cursors = self.cursors.lock().map_err(|_| poisoned("scan cursors"))?;
        cursors.remove(&cursor).map(Some).ok_or_else(|| {
            StoreError::Query {
                backend: "memory".to_string(),
                reason: format!("unknown scan cursor {}", cursor),
            }
            .into()
        })
    }

    fn open_cursor(&self, last_key: String) -> StrataResult<u64> {
        let id = self.cursor_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let mut cursors = self.cursors.lock().map_err(|_| poisoned("scan cursors"))?;
        cursors.insert(id, last_key);
        while cursors.len() > MAX_OPEN_CURSORS {
            cursors.pop_first();
        }
        Ok(id)
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> StrataResult<bool> {
        let now = Instant::now();
        let mut map = self.entries.write().map_err(|_| poisoned("kv entries"))?;
        Self::purge_expired(&mut map, now);
        if map.contains_key(key) {
            return Ok(false);
        }
        map.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_vec(),
                expires_at: Self::expiry(ttl),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> StrataResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let map = self.entries.read().map_err(|_| poisoned("kv entries"))?;
        Ok(map
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StrataResult<()> {
        let mut map = self.entries.write().map_err(|_| poisoned("kv entries"))?;
        Self::purge_expired(&mut map, Instant::now());
        map.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_vec(),
                expires_at: Self::expiry(ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> StrataResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let now = Instant::now();
        let mut map = self.entries.write().map_err(|_| poisoned("kv entries"))?;
        let mut removed = 0u64;
        for key in keys {
            if let Some(entry) = map.remove(key) {
                if entry.is_live(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> StrataResult<bool> {
        let now = Instant::now();
        let mut map = self.entries.write().map_err(|_| poisoned("kv entries"))?;
        let matches = map
            .get(key)
            .is_some_and(|e| e.is_live(now) && e.value == expected);
        if matches {
            map.remove(key);
        }
        Ok(matches)
    }

    async fn scan(&self, cursor: u64, pattern: &str, batch: usize) -> StrataResult<ScanPage> {
        let re = glob_to_regex(pattern)?;
        let batch = batch.max(1);
        let resume = self.resume_key(cursor)?;
        let now = Instant::now();

        let (keys, last, more) = {
            let map = self.entries.read().map_err(|_| poisoned("kv entries"))?;
            let lower = match resume.as_deref() {
                Some(key) => Bound::Excluded(key),
                None => Bound::Unbounded,
            };

            let mut keys = Vec::new();
            let mut last = None;
            for (k, e) in map.range::<str, _>((lower, Bound::Unbounded)).take(batch) {
                if e.is_live(now) && re.is_match(k) {
                    keys.push(k.clone());
                }
                last = Some(k.clone());
            }
            let more = last.as_deref().is_some_and(|k| {
                map.range::<str, _>((Bound::Excluded(k), Bound::Unbounded))
                    .next()
                    .is_some()
            });
            (keys, last, more)
        };

        let next_cursor = match last {
            Some(last) if more => self.open_cursor(last)?,
            _ => 0,
        };
        Ok(ScanPage { keys, next_cursor })
    }
}

// ============================================================================
// TABLE STORE
// ============================================================================

/// Table store held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryTableStore {
    tables: RwLock<BTreeMap<String, TableShape>>,
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a table as if it had been created out of band.
    pub fn insert_existing(&self, name: impl Into<String>, shape: TableShape) -> StrataResult<()> {
        let mut tables = self.tables.write().map_err(|_| poisoned("tables"))?;
        tables.insert(name.into(), shape);
        Ok(())
    }

    /// Names of all tables, sorted.
    pub fn table_names(&self) -> Vec<String> {
        self.tables
            .read()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn shape_of(&self, name: &str) -> Option<TableShape> {
        self.tables.read().ok().and_then(|t| t.get(name).cloned())
    }
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn table_exists(&self, name: &str) -> StrataResult<bool> {
        let tables = self.tables.read().map_err(|_| poisoned("tables"))?;
        Ok(tables.contains_key(name))
    }

    async fn create_table(&self, name: &str, shape: &TableShape) -> StrataResult<()> {
        validate_identifier(name)?;
        let mut tables = self.tables.write().map_err(|_| poisoned("tables"))?;
        tables
            .entry(name.to_string())
            .or_insert_with(|| shape.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::scan_all;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_set_if_absent_is_exclusive() {
        let store = InMemoryKeyValueStore::new();
        assert!(store.set_if_absent("lock", b"a", TTL).await.unwrap());
        assert!(!store.set_if_absent("lock", b"b", TTL).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), Some(b"a".to_vec()));
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent() {
        let store = InMemoryKeyValueStore::new();
        store.set("k", b"v", Duration::ZERO).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.set_if_absent("k", b"w", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_if_equals() {
        let store = InMemoryKeyValueStore::new();
        store.set("k", b"mine", TTL).await.unwrap();
        assert!(!store.delete_if_equals("k", b"theirs").await.unwrap());
        assert!(store.get("k").await.unwrap().is_some());
        assert!(store.delete_if_equals("k", b"mine").await.unwrap());
        assert!(store.get("k").await.unwrap().is_none());
        assert!(!store.delete_if_equals("k", b"mine").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_counts_existing_only() {
        let store = InMemoryKeyValueStore::new();
        store.set("a", b"1", TTL).await.unwrap();
        let removed = store
            .delete(&["a".to_string(), "gone".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.delete(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_scan_pages_through_matches() {
        let store = InMemoryKeyValueStore::new();
        for i in 0..25 {
            store.set(&format!("ns:bean:t:{i}"), b"x", TTL).await.unwrap();
            store.set(&format!("ns:bean:u:{i}"), b"x", TTL).await.unwrap();
        }

        let first = store.scan(0, "ns:bean:t:*", 10).await.unwrap();
        assert!(!first.is_last());

        let keys = scan_all(&store, "ns:bean:t:*", 10).await.unwrap();
        assert_eq!(keys.len(), 25);
        assert!(keys.iter().all(|k| k.starts_with("ns:bean:t:")));
    }

    #[tokio::test]
    async fn test_scan_survives_deletes_between_pages() {
        let store = InMemoryKeyValueStore::new();
        for i in 0..10 {
            store.set(&format!("k{i:02}"), b"x", TTL).await.unwrap();
        }

        let first = store.scan(0, "k*", 3).await.unwrap();
        assert_eq!(first.keys, vec!["k00", "k01", "k02"]);
        store
            .delete(&["k00".to_string(), "k01".to_string()])
            .await
            .unwrap();

        let mut seen = first.keys.clone();
        let mut cursor = first.next_cursor;
        while cursor != 0 {
            let page = store.scan(cursor, "k*", 3).await.unwrap();
            seen.extend(page.keys);
            cursor = page.next_cursor;
        }
        let expected: Vec<String> = (0..10).map(|i| format!("k{i:02}")).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_scan_rejects_unknown_cursor() {
        let store = InMemoryKeyValueStore::new();
        assert!(store.scan(99, "*", 10).await.is_err());
    }

    #[tokio::test]
    async fn test_writes_purge_expired_entries() {
        let store = InMemoryKeyValueStore::new();
        for i in 0..5 {
            store.set(&format!("old:{i}"), b"x", Duration::ZERO).await.unwrap();
        }
        store.set("fresh", b"x", TTL).await.unwrap();
        assert_eq!(store.entries.read().unwrap().len(), 1);

        store.set("stale", b"x", Duration::ZERO).await.unwrap();
        assert!(store.set_if_absent("lock", b"x", TTL).await.unwrap());
        assert_eq!(store.keys(), vec!["fresh".to_string(), "lock".to_string()]);
        assert_eq!(store.entries.read().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_scan_escapes_regex_metacharacters() {
        let store = InMemoryKeyValueStore::new();
        store.set("a.b:1", b"x", TTL).await.unwrap();
        store.set("axb:1", b"x", TTL).await.unwrap();
        let keys = scan_all(&store, "a.b:*", 100).await.unwrap();
        assert_eq!(keys, vec!["a.b:1".to_string()]);
    }

    #[tokio::test]
    async fn test_table_store_create_is_idempotent() {
        let store = InMemoryTableStore::new();
        let shape = TableShape::new("id BIGINT PRIMARY KEY");
        assert!(!store.table_exists("events_2024").await.unwrap());
        store.create_table("events_2024", &shape).await.unwrap();
        store.create_table("events_2024", &shape).await.unwrap();
        assert!(store.table_exists("events_2024").await.unwrap());
        assert_eq!(store.table_names(), vec!["events_2024".to_string()]);
    }

    #[tokio::test]
    async fn test_table_store_rejects_bad_names() {
        let store = InMemoryTableStore::new();
        let shape = TableShape::new("id BIGINT");
        assert!(store.create_table("x; DROP", &shape).await.is_err());
        assert!(store.table_names().is_empty());
    }
}
