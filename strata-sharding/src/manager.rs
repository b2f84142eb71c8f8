//! Time-sharding manager.
//!
//! Keeps the current and next period's physical table of every registered
//! table provisioned. Provisioning of one org name is serialized across
//! instances by a distributed lock; within the process a memo of tables
//! already confirmed avoids repeat round trips.
//!
//! # State per table
//!
//! ```text
//! Unregistered ── register ok ──→ Steady ── tick (ok | lock held) ──→ Steady
//!      ▲                │
//!      └─ register err ─┘
//! ```

use crate::memo::TableRecordMemo;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use strata_core::{
    resolve_table_name, MigrationError, ShardableTable, ShardingConfig, ShardingPattern, StoreError,
    StrataError, StrataResult, SystemTimeSource, TimeSource, Timestamp,
};
use strata_storage::{DistributedLock, NoopLock, TableStore};

// ============================================================================
// OUTCOMES
// ============================================================================

/// What `migrate` did for one resolved table name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrateOutcome {
    /// Already in the memo; no store call made.
    AlreadyRecorded,
    /// Found in the store and recorded.
    Discovered,
    /// Created in the store and recorded.
    Created,
}

/// A resolved table name and what happened to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratedTable {
    pub name: String,
    pub outcome: MigrateOutcome,
}

/// Result of one `ensure_sharding` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardingOutcome {
    /// This instance held the lock and provisioned the listed tables
    /// (current period first).
    Provisioned(Vec<MigratedTable>),
    /// Another instance holds the lock; nothing was touched.
    SkippedLockHeld,
}

impl ShardingOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, ShardingOutcome::SkippedLockHeld)
    }

    /// Number of tables this call created.
    pub fn created(&self) -> usize {
        match self {
            ShardingOutcome::Provisioned(tables) => tables
                .iter()
                .filter(|t| t.outcome == MigrateOutcome::Created)
                .count(),
            ShardingOutcome::SkippedLockHeld => 0,
        }
    }
}

/// Summary of one pass over every registered table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tables visited.
    pub tables: usize,
    /// Tables provisioned under the lock.
    pub provisioned: usize,
    /// Tables skipped because another instance held the lock.
    pub skipped: usize,
    /// Physical tables created across all visited tables.
    pub created: usize,
    /// `(org_name, error)` for every table that failed.
    pub failures: Vec<(String, String)>,
}

impl TickReport {
    pub fn errors(&self) -> usize {
        self.failures.len()
    }
}

// ============================================================================
// MANAGER
// ============================================================================

fn poisoned() -> StrataError {
    StoreError::Poisoned {
        guard: "managed tables".to_string(),
    }
    .into()
}

/// Provisions time-sharded tables ahead of their rollover.
pub struct TimeShardingManager {
    store: Arc<dyn TableStore>,
    lock: Arc<dyn DistributedLock>,
    time: Arc<dyn TimeSource>,
    config: ShardingConfig,
    tables: RwLock<BTreeMap<String, Arc<dyn ShardableTable>>>,
    memo: TableRecordMemo,
}

impl fmt::Debug for TimeShardingManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeShardingManager")
            .field("store", &self.store)
            .field("lock", &self.lock)
            .field("config", &self.config)
            .field("managed_tables", &self.managed_tables())
            .field("recorded", &self.memo.len())
            .finish()
    }
}

impl TimeShardingManager {
    /// Manager over `store` with the no-op lock and the system clock.
    pub fn new(store: Arc<dyn TableStore>, config: ShardingConfig) -> StrataResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            lock: Arc::new(NoopLock),
            time: Arc::new(SystemTimeSource),
            config,
            tables: RwLock::new(BTreeMap::new()),
            memo: TableRecordMemo::new(),
        })
    }

    pub fn with_lock(mut self, lock: Arc<dyn DistributedLock>) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    pub fn config(&self) -> &ShardingConfig {
        &self.config
    }

    pub fn memo(&self) -> &TableRecordMemo {
        &self.memo
    }

    /// Register a table and provision it before returning.
    ///
    /// The table is only added when provisioning succeeds (or is skipped
    /// because another instance holds the lock). Registering an org name
    /// again replaces its descriptor.
    pub async fn register(&self, table: Arc<dyn ShardableTable>) -> StrataResult<ShardingOutcome> {
        let org_name = table.org_name().trim();
        if org_name.is_empty() {
            return Err(StrataError::missing("org_name"));
        }
        let pattern = table.pattern()?;

        let outcome = self.ensure_sharding(table.as_ref()).await?;

        let org_name = table.org_name().to_string();
        let replaced = {
            let mut tables = self.tables.write().map_err(|_| poisoned())?;
            tables.insert(org_name.clone(), table).is_some()
        };
        tracing::info!(
            table = %org_name,
            pattern = %pattern,
            replaced,
            skipped = outcome.is_skipped(),
            "Registered sharded table"
        );
        Ok(outcome)
    }

    /// Physical name of `table` at `at`.
    pub fn resolve_table_name(&self, table: &dyn ShardableTable, at: Timestamp) -> StrataResult<String> {
        Ok(resolve_table_name(table.org_name(), table.pattern()?, at))
    }

    /// Physical name a registered table should be written to right now.
    ///
    /// `None` when `org_name` is not registered.
    pub fn current_table_name(&self, org_name: &str) -> StrataResult<Option<String>> {
        let table = {
            let tables = self.tables.read().map_err(|_| poisoned())?;
            tables.get(org_name).cloned()
        };
        table
            .map(|t| self.resolve_table_name(t.as_ref(), self.time.now()))
            .transpose()
    }

    /// Registered org names, sorted.
    pub fn managed_tables(&self) -> Vec<String> {
        self.tables
            .read()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Ensure the current and next period's tables exist.
    ///
    /// A lock held by another instance is success with
    /// [`ShardingOutcome::SkippedLockHeld`] and no store calls.
    pub async fn ensure_sharding(&self, table: &dyn ShardableTable) -> StrataResult<ShardingOutcome> {
        let pattern = table.pattern()?;
        let key = self.config.lock_key(table.org_name());

        let Some(lock) = self
            .lock
            .acquire(&key, pattern.as_token(), self.config.lock_ttl)
            .await?
        else {
            tracing::debug!(table = %table.org_name(), lock_key = %key, "Provisioning lock held elsewhere; skipping");
            return Ok(ShardingOutcome::SkippedLockHeld);
        };

        let provisioned = self.provision(table, pattern).await;
        let released = self.lock.release(lock).await;

        match (provisioned, released) {
            (Ok(tables), Ok(())) => Ok(ShardingOutcome::Provisioned(tables)),
            (Ok(_), Err(release_err)) => Err(release_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(release_err)) => {
                tracing::warn!(
                    table = %table.org_name(),
                    lock_key = %key,
                    error = %release_err,
                    "Lock release failed after provisioning error"
                );
                Err(err)
            }
        }
    }

    async fn provision(
        &self,
        table: &dyn ShardableTable,
        pattern: ShardingPattern,
    ) -> StrataResult<Vec<MigratedTable>> {
        let now = self.time.now();
        let mut done = vec![self.migrate(table, now).await?];
        if let Some(next) = pattern.next_period(now) {
            done.push(self.migrate(table, next).await?);
        }
        Ok(done)
    }

    /// Make sure the physical table for `at` exists.
    ///
    /// At most one existence check and one create per resolved name for the
    /// life of the process, once it succeeds.
    pub async fn migrate(&self, table: &dyn ShardableTable, at: Timestamp) -> StrataResult<MigratedTable> {
        let name = self.resolve_table_name(table, at)?;

        if self.memo.contains(&name)? {
            return Ok(MigratedTable {
                name,
                outcome: MigrateOutcome::AlreadyRecorded,
            });
        }

        let exists = self.store.table_exists(&name).await.map_err(|e| {
            StrataError::from(MigrationError::ExistenceCheck {
                table: name.clone(),
                reason: e.to_string(),
            })
        })?;

        let outcome = if exists {
            MigrateOutcome::Discovered
        } else {
            self.store
                .create_table(&name, table.shape())
                .await
                .map_err(|e| {
                    StrataError::from(MigrationError::CreateFailed {
                        table: name.clone(),
                        reason: e.to_string(),
                    })
                })?;
            tracing::info!(table = %name, org_name = %table.org_name(), "Created sharded table");
            MigrateOutcome::Created
        };

        self.memo.record(name.clone())?;
        Ok(MigratedTable { name, outcome })
    }

    /// One provisioning pass over every registered table.
    ///
    /// Tables are processed in org-name order. A failing table is logged and
    /// reported; it never stops the pass.
    pub async fn tick(&self) -> TickReport {
        let tables: Vec<Arc<dyn ShardableTable>> = match self.tables.read() {
            Ok(tables) => tables.values().cloned().collect(),
            Err(_) => {
                tracing::error!("Managed table set poisoned; skipping tick");
                return TickReport::default();
            }
        };

        let mut report = TickReport {
            tables: tables.len(),
            ..Default::default()
        };

        for table in tables {
            match self.ensure_sharding(table.as_ref()).await {
                Ok(ShardingOutcome::SkippedLockHeld) => report.skipped += 1,
                Ok(outcome) => {
                    report.provisioned += 1;
                    report.created += outcome.created();
                }
                Err(e) => {
                    tracing::error!(
                        table = %table.org_name(),
                        pattern = %table.sharding(),
                        error = %e,
                        "Time-sharding tick failed for table"
                    );
                    report
                        .failures
                        .push((table.org_name().to_string(), e.to_string()));
                }
            }
        }

        report
    }
}
