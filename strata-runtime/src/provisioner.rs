//! Table provisioning service.
//!
//! Loads table descriptors from TOML, wires the store and lock from
//! [`RuntimeConfig`], registers every table and runs the scheduler until
//! told to stop.
//!
//! ```toml
//! [[tables]]
//! org_name = "events"
//! sharding = "daily"
//! shape = "id BIGSERIAL PRIMARY KEY, payload JSONB NOT NULL"
//! ```

use crate::config::RuntimeConfig;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use strata_core::{ShardableTable, StrataError, StrataResult, TableSpec};
use strata_sharding::{ShardingMetricsSnapshot, ShardingScheduler, TimeShardingManager};
use strata_storage::{
    DistributedLock, KvDistributedLock, NoopLock, PostgresTableStore, RedisKeyValueStore, TableStore,
};

/// Contents of a tables file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablesFile {
    #[serde(default)]
    pub tables: Vec<TableSpec>,
}

impl TablesFile {
    pub fn parse(text: &str) -> StrataResult<Self> {
        let file: TablesFile = toml::from_str(text)
            .map_err(|e| StrataError::invalid("tables", "<toml>", e.to_string()))?;
        for table in &file.tables {
            if table.org_name.trim().is_empty() {
                return Err(StrataError::missing("tables.org_name"));
            }
            table.pattern()?;
        }
        Ok(file)
    }

    pub async fn load(path: &Path) -> StrataResult<Self> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            StrataError::invalid("tables_file", path.display(), e.to_string())
        })?;
        Self::parse(&text)
    }
}

/// Lock chosen by config: Redis-backed when enabled, no-op otherwise.
pub async fn build_lock(config: &RuntimeConfig) -> StrataResult<Arc<dyn DistributedLock>> {
    if config.redis.enabled {
        let kv = Arc::new(RedisKeyValueStore::connect(&config.redis).await?);
        Ok(Arc::new(
            KvDistributedLock::new(kv).with_release_mode(config.sharding.release_mode),
        ))
    } else {
        tracing::warn!("Redis disabled; provisioning lock is process-local");
        Ok(Arc::new(NoopLock))
    }
}

/// Register `tables` on a manager over `store` and `lock`.
///
/// Stops at the first registration error.
pub async fn build_manager(
    config: &RuntimeConfig,
    store: Arc<dyn TableStore>,
    lock: Arc<dyn DistributedLock>,
    tables: Vec<TableSpec>,
) -> StrataResult<Arc<TimeShardingManager>> {
    let manager = TimeShardingManager::new(store, config.sharding.clone())?.with_lock(lock);
    for table in tables {
        let org_name = table.org_name.clone();
        manager.register(Arc::new(table)).await.inspect_err(|e| {
            tracing::error!(table = %org_name, error = %e, "Failed to register table");
        })?;
    }
    Ok(Arc::new(manager))
}

/// Run the scheduler until `shutdown` resolves, then stop it.
pub async fn run_until<F>(manager: Arc<TimeShardingManager>, shutdown: F) -> ShardingMetricsSnapshot
where
    F: Future<Output = ()>,
{
    let scheduler = ShardingScheduler::spawn(manager);
    shutdown.await;
    scheduler.stop().await
}

/// Connect to PostgreSQL (and Redis when enabled) and build the manager.
pub async fn connect(config: &RuntimeConfig, tables: Vec<TableSpec>) -> StrataResult<Arc<TimeShardingManager>> {
    config.validate()?;
    let store: Arc<dyn TableStore> = Arc::new(PostgresTableStore::from_config(&config.db)?);
    let lock = build_lock(config).await?;
    build_manager(config, store, lock, tables).await
}
