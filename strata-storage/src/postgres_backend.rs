//! PostgreSQL table store.
//!
//! Connection pooling via deadpool-postgres. Existence checks look in the
//! connection's current schema.

use crate::relational::{validate_identifier, TableStore};
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strata_core::{StoreError, StrataError, StrataResult, TableShape};
use tokio_postgres::NoTls;

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    #[serde(default, skip_serializing)]
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Wait/create timeout for pooled connections
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "strata".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("STRATA_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("STRATA_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("STRATA_DB_NAME").unwrap_or_else(|_| "strata".to_string()),
            user: std::env::var("STRATA_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("STRATA_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("STRATA_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            timeout: Duration::from_secs(
                std::env::var("STRATA_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    pub fn validate(&self) -> StrataResult<()> {
        if self.host.trim().is_empty() {
            return Err(StrataError::missing("db.host"));
        }
        if self.dbname.trim().is_empty() {
            return Err(StrataError::missing("db.dbname"));
        }
        if self.user.trim().is_empty() {
            return Err(StrataError::missing("db.user"));
        }
        if self.max_size == 0 {
            return Err(StrataError::invalid("db.max_size", self.max_size, "pool size must be positive"));
        }
        Ok(())
    }

    /// Create a connection pool from this configuration.
    ///
    /// Connections are opened lazily, so this does not touch the network.
    pub fn create_pool(&self) -> StrataResult<Pool> {
        self.validate()?;

        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        pool_cfg.timeouts.create = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls).map_err(|e| {
            StoreError::Connection {
                backend: "postgres".to_string(),
                reason: format!("Failed to create pool: {}", e),
            }
            .into()
        })
    }
}

// ============================================================================
// TABLE STORE
// ============================================================================

fn query_err(err: impl std::fmt::Display) -> StrataError {
    StoreError::Query {
        backend: "postgres".to_string(),
        reason: err.to_string(),
    }
    .into()
}

fn pool_err(err: deadpool_postgres::PoolError) -> StrataError {
    StoreError::Connection {
        backend: "postgres".to_string(),
        reason: err.to_string(),
    }
    .into()
}

/// Render the one DDL statement this crate issues.
pub fn create_table_sql(name: &str, shape: &TableShape) -> StrataResult<String> {
    validate_identifier(name)?;
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
        name,
        shape.columns()
    ))
}

/// PostgreSQL-backed [`TableStore`].
#[derive(Clone)]
pub struct PostgresTableStore {
    pool: Pool,
}

impl std::fmt::Debug for PostgresTableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.pool.status();
        f.debug_struct("PostgresTableStore")
            .field("pool_size", &status.size)
            .field("pool_available", &status.available)
            .finish()
    }
}

impl PostgresTableStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &DbConfig) -> StrataResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }
}

#[async_trait]
impl TableStore for PostgresTableStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn table_exists(&self, name: &str) -> StrataResult<bool> {
        let client = self.pool.get().await.map_err(pool_err)?;
        let row = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = $1)",
                &[&name],
            )
            .await
            .map_err(query_err)?;
        row.try_get::<_, bool>(0).map_err(query_err)
    }

    async fn create_table(&self, name: &str, shape: &TableShape) -> StrataResult<()> {
        if shape.is_empty() {
            return Err(StrataError::invalid(
                "shape",
                name,
                "table shape has no column definitions",
            ));
        }
        let sql = create_table_sql(name, shape)?;
        let client = self.pool.get().await.map_err(pool_err)?;
        client.batch_execute(&sql).await.map_err(query_err)?;
        tracing::debug!(table = %name, "Executed CREATE TABLE IF NOT EXISTS");
        Ok(())
    }
}
