//! STRATA Sharding - Time-sharded table provisioning
//!
//! [`TimeShardingManager`] resolves the physical table for "now" and keeps
//! the current and next period's tables created. [`ShardingScheduler`] runs
//! the periodic pass in the background.

pub mod jobs;
pub mod manager;
pub mod memo;

pub use jobs::{
    sharding_tick_task, ShardingMetrics, ShardingMetricsSnapshot, ShardingScheduler, MIN_TICK_INTERVAL,
};
pub use manager::{MigrateOutcome, MigratedTable, ShardingOutcome, TickReport, TimeShardingManager};
pub use memo::TableRecordMemo;
