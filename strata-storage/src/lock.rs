//! Distributed lock over a shared key-value store.
//!
//! Acquisition is a single atomic set-if-absent with expiry. Release either
//! compares the stored value with the holder's before deleting, or (legacy
//! mode) deletes unconditionally.

use crate::kv::KeyValueStore;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_core::{
    Acquired, Lock, LockData, LockError, ReleaseMode, StrataError, StrataResult, SystemTimeSource,
    TimeSource,
};

/// Cluster-wide mutual exclusion with TTL.
#[async_trait]
pub trait DistributedLock: Send + Sync + std::fmt::Debug {
    /// Try to become the holder of `key`.
    ///
    /// Returns `None` when another holder has it. The lock lapses on its own
    /// after `ttl` if never released.
    async fn acquire(
        &self,
        key: &str,
        payload: &str,
        ttl: Duration,
    ) -> StrataResult<Option<Lock<Acquired>>>;

    /// Release a held lock. Consumes it.
    async fn release(&self, lock: Lock<Acquired>) -> StrataResult<()>;
}

// ============================================================================
// KEY-VALUE LOCK
// ============================================================================

/// [`DistributedLock`] on any [`KeyValueStore`].
#[derive(Debug, Clone)]
pub struct KvDistributedLock {
    store: Arc<dyn KeyValueStore>,
    release_mode: ReleaseMode,
    time: Arc<dyn TimeSource>,
    late_releases: Arc<AtomicU64>,
}

impl KvDistributedLock {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            release_mode: ReleaseMode::default(),
            time: Arc::new(SystemTimeSource),
            late_releases: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_release_mode(mut self, mode: ReleaseMode) -> Self {
        self.release_mode = mode;
        self
    }

    pub fn with_time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    pub fn release_mode(&self) -> ReleaseMode {
        self.release_mode
    }

    /// Releases attempted after the holder's TTL had already lapsed.
    pub fn late_releases(&self) -> u64 {
        self.late_releases.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DistributedLock for KvDistributedLock {
    async fn acquire(
        &self,
        key: &str,
        payload: &str,
        ttl: Duration,
    ) -> StrataResult<Option<Lock<Acquired>>> {
        let data = LockData::new(key, payload, self.time.now(), ttl);
        let value = data.stored_value();
        let granted = self
            .store
            .set_if_absent(key, value.as_bytes(), ttl)
            .await
            .map_err(|e| acquire_failed(key, e))?;

        if granted {
            tracing::debug!(lock_key = %key, holder = %data.holder_token, "Lock acquired");
            Ok(Some(Lock::new(data)))
        } else {
            tracing::debug!(lock_key = %key, "Lock held elsewhere");
            Ok(None)
        }
    }

    async fn release(&self, lock: Lock<Acquired>) -> StrataResult<()> {
        let now = self.time.now();
        if lock.is_expired(now) {
            self.late_releases.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                lock_key = %lock.key(),
                expired_at = %lock.expires_at(),
                release_mode = %self.release_mode,
                "Releasing lock after its TTL lapsed; provisioning outlived the lock"
            );
        } else {
            tracing::trace!(
                lock_key = %lock.key(),
                remaining_ms = lock.remaining_duration(now).map_or(0, |d| d.as_millis() as u64),
                "Releasing lock"
            );
        }

        let data = lock.release();
        match self.release_mode {
            ReleaseMode::HolderToken => {
                let deleted = self
                    .store
                    .delete_if_equals(&data.key, data.stored_value().as_bytes())
                    .await
                    .map_err(|e| release_failed(&data.key, e))?;
                if !deleted {
                    tracing::warn!(
                        lock_key = %data.key,
                        holder = %data.holder_token,
                        "Lock no longer ours at release; left current holder untouched"
                    );
                }
            }
            ReleaseMode::Unconditional => {
                self.store
                    .delete(std::slice::from_ref(&data.key))
                    .await
                    .map_err(|e| release_failed(&data.key, e))?;
            }
        }
        tracing::debug!(lock_key = %data.key, "Lock released");
        Ok(())
    }
}

fn acquire_failed(key: &str, err: StrataError) -> StrataError {
    LockError::AcquireFailed {
        key: key.to_string(),
        reason: err.to_string(),
    }
    .into()
}

fn release_failed(key: &str, err: StrataError) -> StrataError {
    LockError::ReleaseFailed {
        key: key.to_string(),
        reason: err.to_string(),
    }
    .into()
}

// ============================================================================
// NO-OP LOCK
// ============================================================================

/// Lock used when no shared store is configured. Always grants.
#[derive(Debug, Clone, Default)]
pub struct NoopLock;

#[async_trait]
impl DistributedLock for NoopLock {
    async fn acquire(
        &self,
        key: &str,
        payload: &str,
        ttl: Duration,
    ) -> StrataResult<Option<Lock<Acquired>>> {
        Ok(Some(Lock::new(LockData::new(
            key,
            payload,
            SystemTimeSource.now(),
            ttl,
        ))))
    }

    async fn release(&self, _lock: Lock<Acquired>) -> StrataResult<()> {
        Ok(())
    }
}
