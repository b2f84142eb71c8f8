//! Time source abstraction.
//!
//! Table name resolution and the provisioning tick both read "now" through
//! [`TimeSource`] so tests can pin the clock.

use crate::Timestamp;
use chrono::Utc;

/// Supplies the current UTC instant.
pub trait TimeSource: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    #[inline]
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_time_is_monotonic_enough() {
        let source = SystemTimeSource;
        let a = source.now();
        let b = source.now();
        assert!(b >= a);
    }

    #[test]
    fn test_object_safe() {
        let source: Box<dyn TimeSource> = Box::new(SystemTimeSource);
        let _ = source.now();
    }
}
