//! STRATA Test Utilities
//!
//! Centralized test infrastructure for the STRATA workspace:
//! - Store and lock doubles with call counters and failure injection
//! - A pinned time source
//! - Proptest generators and fixtures
//! - Custom assertions for STRATA error variants

// Re-export in-memory backends from their source crate
pub use strata_storage::{InMemoryKeyValueStore, InMemoryTableStore, NoopLock};

// Re-export core types for convenience
pub use strata_core::{
    Acquired, Lock, LockData, ShardableTable, ShardingConfig, ShardingPattern, StrataError,
    StrataResult, TableShape, TableSpec, TimeSource, Timestamp,
};

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strata_core::{LockError, StoreError};
use strata_storage::{DistributedLock, TableStore};

// ============================================================================
// TABLE STORE DOUBLE
// ============================================================================

/// Table store that counts calls and fails on demand.
///
/// Failure rules match table names by prefix, so a rule for `"a_"` covers
/// every shard of `a` regardless of the current instant.
#[derive(Debug, Default)]
pub struct CountingTableStore {
    inner: InMemoryTableStore,
    exists_calls: AtomicUsize,
    create_calls: AtomicUsize,
    fail_exists: Mutex<HashSet<String>>,
    fail_create: Mutex<HashSet<String>>,
}

impl CountingTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make `table_exists` fail for names starting with `prefix`.
    pub fn fail_exists_for(&self, prefix: impl Into<String>) {
        if let Ok(mut rules) = self.fail_exists.lock() {
            rules.insert(prefix.into());
        }
    }

    /// Make `create_table` fail for names starting with `prefix`.
    pub fn fail_create_for(&self, prefix: impl Into<String>) {
        if let Ok(mut rules) = self.fail_create.lock() {
            rules.insert(prefix.into());
        }
    }

    /// Drop every failure rule.
    pub fn heal(&self) {
        if let Ok(mut rules) = self.fail_exists.lock() {
            rules.clear();
        }
        if let Ok(mut rules) = self.fail_create.lock() {
            rules.clear();
        }
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Total calls of either kind.
    pub fn calls(&self) -> usize {
        self.exists_calls() + self.create_calls()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.inner.table_names()
    }

    pub fn inner(&self) -> &InMemoryTableStore {
        &self.inner
    }

    fn matches(rules: &Mutex<HashSet<String>>, name: &str) -> bool {
        rules
            .lock()
            .map(|r| r.iter().any(|prefix| name.starts_with(prefix.as_str())))
            .unwrap_or(false)
    }

    fn injected(name: &str, op: &str) -> StrataError {
        StoreError::Query {
            backend: "counting".to_string(),
            reason: format!("injected {} failure for {}", op, name),
        }
        .into()
    }
}

#[async_trait]
impl TableStore for CountingTableStore {
    fn backend_name(&self) -> &'static str {
        "counting"
    }

    async fn table_exists(&self, name: &str) -> StrataResult<bool> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        if Self::matches(&self.fail_exists, name) {
            return Err(Self::injected(name, "exists"));
        }
        self.inner.table_exists(name).await
    }

    async fn create_table(&self, name: &str, shape: &TableShape) -> StrataResult<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if Self::matches(&self.fail_create, name) {
            return Err(Self::injected(name, "create"));
        }
        self.inner.create_table(name, shape).await
    }
}

// ============================================================================
// LOCK DOUBLE
// ============================================================================

/// How [`ScriptedLock`] answers acquisitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockScript {
    #[default]
    Grant,
    /// Someone else holds every key.
    Deny,
    /// The backend is unreachable.
    Fail,
}

/// Lock with a fixed answer and call counters.
#[derive(Debug, Default)]
pub struct ScriptedLock {
    script: Mutex<LockScript>,
    fail_release: Mutex<bool>,
    acquires: AtomicUsize,
    releases: AtomicUsize,
}

impl ScriptedLock {
    pub fn new(script: LockScript) -> Self {
        Self {
            script: Mutex::new(script),
            ..Default::default()
        }
    }

    pub fn granting() -> Arc<Self> {
        Arc::new(Self::new(LockScript::Grant))
    }

    pub fn denying() -> Arc<Self> {
        Arc::new(Self::new(LockScript::Deny))
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self::new(LockScript::Fail))
    }

    pub fn set_script(&self, script: LockScript) {
        if let Ok(mut s) = self.script.lock() {
            *s = script;
        }
    }

    pub fn set_fail_release(&self, fail: bool) {
        if let Ok(mut f) = self.fail_release.lock() {
            *f = fail;
        }
    }

    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    fn script(&self) -> LockScript {
        self.script.lock().map(|s| *s).unwrap_or_default()
    }
}

#[async_trait]
impl DistributedLock for ScriptedLock {
    async fn acquire(
        &self,
        key: &str,
        payload: &str,
        ttl: Duration,
    ) -> StrataResult<Option<Lock<Acquired>>> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        match self.script() {
            LockScript::Grant => Ok(Some(Lock::new(LockData::new(
                key,
                payload,
                chrono::Utc::now(),
                ttl,
            )))),
            LockScript::Deny => Ok(None),
            LockScript::Fail => Err(LockError::AcquireFailed {
                key: key.to_string(),
                reason: "injected acquire failure".to_string(),
            }
            .into()),
        }
    }

    async fn release(&self, lock: Lock<Acquired>) -> StrataResult<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        let data = lock.release();
        if self.fail_release.lock().map(|f| *f).unwrap_or(false) {
            return Err(LockError::ReleaseFailed {
                key: data.key,
                reason: "injected release failure".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

// ============================================================================
// TIME SOURCE
// ============================================================================

/// Time source pinned to a settable instant.
#[derive(Debug)]
pub struct FixedTimeSource {
    now: Mutex<Timestamp>,
}

impl FixedTimeSource {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn shared(now: Timestamp) -> Arc<Self> {
        Arc::new(Self::new(now))
    }

    pub fn set(&self, now: Timestamp) {
        if let Ok(mut n) = self.now.lock() {
            *n = now;
        }
    }

    pub fn advance(&self, by: chrono::TimeDelta) {
        if let Ok(mut n) = self.now.lock() {
            *n += by;
        }
    }
}

impl TimeSource for FixedTimeSource {
    fn now(&self) -> Timestamp {
        self.now
            .lock()
            .map(|n| *n)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for STRATA types.

    use super::*;
    use proptest::prelude::*;

    /// Generate any sharding pattern, including `None`.
    pub fn arb_pattern() -> impl Strategy<Value = ShardingPattern> {
        prop_oneof![
            Just(ShardingPattern::None),
            Just(ShardingPattern::Hourly),
            Just(ShardingPattern::Daily),
            Just(ShardingPattern::Monthly),
            Just(ShardingPattern::Yearly),
        ]
    }

    /// Generate a Timestamp (DateTime<Utc>).
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        // Generate timestamps within a reasonable range (2020-2030)
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(chrono::Utc::now)
        })
    }

    /// Generate a valid base table name.
    pub fn arb_org_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,20}"
    }

    /// Generate a table descriptor with a supported pattern.
    pub fn arb_table_spec() -> impl Strategy<Value = TableSpec> {
        (arb_org_name(), arb_pattern())
            .prop_map(|(name, pattern)| TableSpec::with_pattern(name, pattern, fixtures::events_shape()))
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use chrono::TimeZone;

    pub const EVENTS_SHAPE: &str = "id BIGSERIAL PRIMARY KEY, payload JSONB NOT NULL";

    pub fn events_shape() -> TableShape {
        TableShape::new(EVENTS_SHAPE)
    }

    /// 2024-03-05T10:00:00Z, a Tuesday in a leap year.
    pub fn march_5_2024() -> Timestamp {
        chrono::Utc
            .with_ymd_and_hms(2024, 3, 5, 10, 0, 0)
            .single()
            .unwrap_or_else(chrono::Utc::now)
    }

    /// Daily-sharded `events` table.
    pub fn daily_events() -> TableSpec {
        TableSpec::with_pattern("events", ShardingPattern::Daily, events_shape())
    }

    /// Table with the given org name and pattern.
    pub fn table(org_name: &str, pattern: ShardingPattern) -> TableSpec {
        TableSpec::with_pattern(org_name, pattern, events_shape())
    }

    /// Sharding config with a short TTL and a test lock prefix.
    pub fn test_sharding_config() -> ShardingConfig {
        ShardingConfig::default()
            .with_lock_ttl(Duration::from_secs(30))
            .with_lock_key_prefix("test:timesharding:")
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for STRATA-specific validation.

    use super::*;

    /// Assert that a StrataResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &StrataResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a StrataResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &StrataResult<T>) {
        match result {
            Err(StrataError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a StrataResult is an UnsupportedShardingPattern error for `pattern`.
    #[track_caller]
    pub fn assert_unsupported_pattern<T: std::fmt::Debug>(result: &StrataResult<T>, pattern: &str) {
        match result {
            Err(StrataError::UnsupportedShardingPattern { pattern: p }) => {
                assert_eq!(p, pattern, "Wrong pattern in error");
            }
            other => panic!("Expected UnsupportedShardingPattern({:?}), got: {:?}", pattern, other),
        }
    }

    /// Assert that a StrataResult is a Migration error.
    #[track_caller]
    pub fn assert_migration_error<T: std::fmt::Debug>(result: &StrataResult<T>) {
        match result {
            Err(StrataError::Migration(_)) => {}
            other => panic!("Expected Migration error, got: {:?}", other),
        }
    }

    /// Assert that a StrataResult is a Lock error.
    #[track_caller]
    pub fn assert_lock_error<T: std::fmt::Debug>(result: &StrataResult<T>) {
        match result {
            Err(StrataError::Lock(_)) => {}
            other => panic!("Expected Lock error, got: {:?}", other),
        }
    }
}
