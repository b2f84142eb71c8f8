//! Lock typestate for compile-time safety of lock lifecycle.
//!
//! A distributed lock can only be released while it is in the `Acquired`
//! state, and releasing consumes it.
//!
//! # State Transition Diagram
//!
//! ```text
//! (unlocked) ─── acquire() ──→ Acquired ─── release() ──→ (unlocked)
//!      ▲                          │
//!      └──────── ttl expiry ──────┘
//! ```

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// RELEASE MODE
// ============================================================================

/// How a held lock is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReleaseMode {
    /// Delete the key only while it still carries this holder's value.
    #[default]
    HolderToken,
    /// Delete the key whoever holds it. Legacy behavior; a holder whose TTL
    /// already lapsed will delete the next holder's lock.
    Unconditional,
}

impl ReleaseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseMode::HolderToken => "holder_token",
            ReleaseMode::Unconditional => "unconditional",
        }
    }
}

impl fmt::Display for ReleaseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReleaseMode {
    type Err = ReleaseModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "holder_token" | "token" => Ok(ReleaseMode::HolderToken),
            "unconditional" | "legacy" => Ok(ReleaseMode::Unconditional),
            _ => Err(ReleaseModeParseError(s.to_string())),
        }
    }
}

/// Error when parsing an invalid release mode string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseModeParseError(pub String);

impl fmt::Display for ReleaseModeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid release mode: {}", self.0)
    }
}

impl std::error::Error for ReleaseModeParseError {}

// ============================================================================
// LOCK DATA
// ============================================================================

/// State-independent data of a held lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockData {
    /// Full key in the shared store.
    pub key: String,
    /// Caller-supplied payload (the sharding pattern for table provisioning).
    pub payload: String,
    /// Unique per acquisition.
    pub holder_token: Uuid,
    pub acquired_at: Timestamp,
    pub expires_at: Timestamp,
}

impl LockData {
    /// Build lock data for a fresh acquisition attempt.
    pub fn new(key: impl Into<String>, payload: impl Into<String>, now: Timestamp, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            key: key.into(),
            payload: payload.into(),
            holder_token: Uuid::now_v7(),
            acquired_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(now),
        }
    }

    /// The exact value written under the key.
    ///
    /// Format: `{payload}@{holder_token}`.
    pub fn stored_value(&self) -> String {
        format!("{}@{}", self.payload, self.holder_token)
    }

    /// Check if the lock has expired based on current time.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Calculate remaining duration until expiry.
    pub fn remaining_duration(&self, now: Timestamp) -> Option<Duration> {
        if now >= self.expires_at {
            None
        } else {
            (self.expires_at - now).to_std().ok()
        }
    }
}

// ============================================================================
// TYPESTATE MARKERS
// ============================================================================

/// Marker trait for lock states.
pub trait LockState: private::Sealed + Send + Sync {}

/// Lock is currently held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquired;
impl LockState for Acquired {}

mod private {
    pub trait Sealed {}
    impl Sealed for super::Acquired {}
}

// ============================================================================
// LOCK TYPESTATE WRAPPER
// ============================================================================

/// A lock with compile-time state tracking.
///
/// Not `Clone`: exactly one value represents a given acquisition, so it can
/// be released at most once.
#[derive(Debug)]
pub struct Lock<S: LockState> {
    data: LockData,
    _state: PhantomData<S>,
}

impl<S: LockState> Lock<S> {
    pub fn data(&self) -> &LockData {
        &self.data
    }

    pub fn key(&self) -> &str {
        &self.data.key
    }

    pub fn payload(&self) -> &str {
        &self.data.payload
    }

    pub fn holder_token(&self) -> Uuid {
        self.data.holder_token
    }

    pub fn expires_at(&self) -> Timestamp {
        self.data.expires_at
    }
}

impl Lock<Acquired> {
    /// Wrap data for an acquisition the backend has confirmed.
    pub fn new(data: LockData) -> Self {
        Lock {
            data,
            _state: PhantomData,
        }
    }

    /// Release the lock and return the underlying data.
    ///
    /// Consumes the lock; the caller deletes the key with the returned data.
    pub fn release(self) -> LockData {
        self.data
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.data.is_expired(now)
    }

    pub fn remaining_duration(&self, now: Timestamp) -> Option<Duration> {
        self.data.remaining_duration(now)
    }
}
