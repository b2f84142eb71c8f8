//! STRATA Core - Shared Types
//!
//! Sharding patterns, table descriptors, the lock typestate, configuration
//! and the error hierarchy. Every other STRATA crate depends on this one.
//! This crate performs no I/O.

use chrono::{DateTime, Utc};

pub mod config;
pub mod error;
pub mod lock;
pub mod sharding;
pub mod time;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

pub use config::{CacheConfig, ShardingConfig};
pub use error::{
    CacheError, ConfigError, LockError, MigrationError, StoreError, StrataError, StrataResult,
};
pub use lock::{Acquired, Lock, LockData, LockState, ReleaseMode, ReleaseModeParseError};
pub use sharding::{resolve_table_name, ShardableTable, ShardingPattern, TableShape, TableSpec};
pub use time::{SystemTimeSource, TimeSource};
