//! Background provisioning task.
//!
//! The scheduler ticks the manager on a fixed interval until it is told to
//! stop. The first tick fires one interval after start, because `register`
//! already provisions synchronously.
//!
//! ```ignore
//! let scheduler = ShardingScheduler::spawn(manager.clone());
//! // ...
//! let snapshot = scheduler.stop().await;
//! ```

use crate::manager::TimeShardingManager;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

// ============================================================================
// METRICS
// ============================================================================

/// Counters for the provisioning task.
#[derive(Debug, Default)]
pub struct ShardingMetrics {
    /// Ticks completed since startup
    pub ticks: AtomicU64,

    /// Table visits that provisioned under the lock
    pub provisioned: AtomicU64,

    /// Table visits skipped because another instance held the lock
    pub skipped_lock_held: AtomicU64,

    /// Physical tables created
    pub tables_created: AtomicU64,

    /// Table visits that failed
    pub errors: AtomicU64,
}

impl ShardingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> ShardingMetricsSnapshot {
        ShardingMetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            provisioned: self.provisioned.load(Ordering::Relaxed),
            skipped_lock_held: self.skipped_lock_held.load(Ordering::Relaxed),
            tables_created: self.tables_created.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of provisioning metrics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardingMetricsSnapshot {
    pub ticks: u64,
    pub provisioned: u64,
    pub skipped_lock_held: u64,
    pub tables_created: u64,
    pub errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Shortest interval the task will tick at.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Tick `manager` every `period` until `shutdown_rx` flips to `true` or its
/// sender is dropped.
///
/// A tick in flight when the signal arrives runs to completion; no further
/// tick starts. Periods below [`MIN_TICK_INTERVAL`] are raised to it.
pub async fn sharding_tick_task(
    manager: Arc<TimeShardingManager>,
    period: Duration,
    metrics: Arc<ShardingMetrics>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    if period < MIN_TICK_INTERVAL {
        tracing::warn!(
            requested_ms = period.as_millis() as u64,
            "Tick interval below minimum; using {:?}",
            MIN_TICK_INTERVAL
        );
    }
    let period = period.max(MIN_TICK_INTERVAL);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        tick_interval_secs = period.as_secs(),
        tables = manager.managed_tables().len(),
        "Time-sharding task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Time-sharding task shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                run_tick(&manager, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        ticks = snapshot.ticks,
        provisioned = snapshot.provisioned,
        skipped_lock_held = snapshot.skipped_lock_held,
        tables_created = snapshot.tables_created,
        errors = snapshot.errors,
        "Time-sharding task completed"
    );
}

async fn run_tick(manager: &TimeShardingManager, metrics: &ShardingMetrics) {
    let report = manager.tick().await;

    metrics.ticks.fetch_add(1, Ordering::Relaxed);
    metrics
        .provisioned
        .fetch_add(report.provisioned as u64, Ordering::Relaxed);
    metrics
        .skipped_lock_held
        .fetch_add(report.skipped as u64, Ordering::Relaxed);
    metrics
        .tables_created
        .fetch_add(report.created as u64, Ordering::Relaxed);
    metrics
        .errors
        .fetch_add(report.errors() as u64, Ordering::Relaxed);

    if report.created > 0 || report.errors() > 0 {
        tracing::info!(
            tables = report.tables,
            created = report.created,
            skipped = report.skipped,
            errors = report.errors(),
            "Time-sharding tick completed"
        );
    } else {
        tracing::trace!(tables = report.tables, "Time-sharding tick completed with nothing to do");
    }
}

// ============================================================================
// SCHEDULER HANDLE
// ============================================================================

/// Handle to a running [`sharding_tick_task`].
#[derive(Debug)]
pub struct ShardingScheduler {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
    metrics: Arc<ShardingMetrics>,
}

impl ShardingScheduler {
    /// Spawn the task at the manager's configured interval.
    pub fn spawn(manager: Arc<TimeShardingManager>) -> Self {
        let period = manager.config().tick_interval;
        Self::spawn_with_interval(manager, period)
    }

    pub fn spawn_with_interval(manager: Arc<TimeShardingManager>, period: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let metrics = Arc::new(ShardingMetrics::new());
        let handle = tokio::spawn(sharding_tick_task(
            manager,
            period,
            Arc::clone(&metrics),
            shutdown_rx,
        ));
        Self {
            shutdown_tx,
            handle,
            metrics,
        }
    }

    pub fn metrics(&self) -> ShardingMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal shutdown, wait for the task to exit, and return final metrics.
    pub async fn stop(self) -> ShardingMetricsSnapshot {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Time-sharding task ended abnormally");
        }
        self.metrics.snapshot()
    }
}
