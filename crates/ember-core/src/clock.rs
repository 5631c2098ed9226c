//! Clock abstraction
//!
//! All scoring and lifecycle decisions depend on `now()`. The engine never
//! reads the system clock directly; it goes through a [`Clock`] handle so
//! tests can pin time and decay math stays deterministic.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

/// Source of wall-clock time, in whole seconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Current time as epoch seconds.
    fn now_epoch(&self) -> i64;

    /// Current time as a chrono timestamp (for front-matter formatting).
    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(self.now_epoch(), 0).unwrap_or_else(Utc::now)
    }
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

// ============================================================================
// SYSTEM CLOCK
// ============================================================================

/// Real wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch(&self) -> i64 {
        Utc::now().timestamp()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ============================================================================
// MANUAL CLOCK
// ============================================================================

/// A clock that only moves when told to. Used throughout the test suite to
/// exercise decay windows without sleeping.
#[derive(Debug, Default)]
pub struct ManualClock {
    epoch: AtomicI64,
}

impl ManualClock {
    /// Create a manual clock pinned at `epoch` seconds.
    pub fn at(epoch: i64) -> Self {
        Self {
            epoch: AtomicI64::new(epoch),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, epoch: i64) {
        self.epoch.store(epoch, Ordering::Release);
    }

    /// Advance by `seconds`.
    pub fn advance(&self, seconds: i64) {
        self.epoch.fetch_add(seconds, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_epoch(&self) -> i64 {
        self.epoch.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::at(1_000);
        assert_eq!(clock.now_epoch(), 1_000);

        clock.advance(3_600);
        assert_eq!(clock.now_epoch(), 4_600);

        clock.set(10);
        assert_eq!(clock.now_epoch(), 10);
    }

    #[test]
    fn test_manual_clock_utc_conversion() {
        let clock = ManualClock::at(1_736_275_200);
        assert_eq!(clock.now_utc().timestamp(), 1_736_275_200);
    }
}
