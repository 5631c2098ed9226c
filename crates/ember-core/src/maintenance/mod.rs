//! Maintenance
//!
//! Periodic housekeeping over the store and the vault projection:
//! - GC sweep tombstoning (or archiving) records below the forget threshold
//! - Compaction when the stats heuristic recommends it
//! - LTM refresh
//!
//! Runs on demand or on a background cadence; either way each pass goes
//! through the engine's writer gate like any other mutation.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::CompactionReport;
use crate::vault::RefreshReport;

// ============================================================================
// GC TYPES
// ============================================================================

/// GC sweep options.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GcOptions {
    /// Report what would happen without mutating anything
    pub dry_run: bool,
    /// Set `status = archived` instead of tombstoning
    pub archive_instead: bool,
}

/// Outcome of one GC sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcReport {
    /// Active records examined
    pub scanned: usize,
    /// Records tombstoned (or that would be, under dry-run)
    pub forgotten: usize,
    /// Records archived instead of tombstoned
    pub archived: usize,
    /// Records below threshold but spared by the pinned-strength floor
    pub pinned_spared: usize,
    /// Whether this was a dry run
    pub dry_run: bool,
    /// Ids affected (forgotten or archived)
    pub affected_ids: Vec<String>,
    /// Wall-clock duration
    pub duration_ms: u64,
}

/// Combined report of one full maintenance pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub gc: GcReport,
    /// Present when the heuristic recommended compaction
    pub compaction: Option<CompactionReport>,
    /// Present when a vault is configured
    pub ltm_refresh: Option<RefreshReport>,
}

// ============================================================================
// BACKGROUND SCHEDULER
// ============================================================================

/// Handle to a background maintenance thread. Dropping it stops the thread.
pub struct MaintenanceHandle {
    stop_tx: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Stop the scheduler and wait for the in-flight pass, if any.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender wakes the receiver with a disconnect.
        self.stop_tx.take();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run `task` every `interval` on a dedicated thread until the handle is
/// stopped or dropped. The first run happens one interval after spawn.
pub fn spawn_scheduler<F>(interval: Duration, mut task: F) -> MaintenanceHandle
where
    F: FnMut() + Send + 'static,
{
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let join = std::thread::Builder::new()
        .name("ember-maintenance".into())
        .spawn(move || {
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => task(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })
        .expect("spawning maintenance thread");

    MaintenanceHandle {
        stop_tx: Some(stop_tx),
        join: Some(join),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_scheduler_runs_and_stops() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let handle = spawn_scheduler(Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(40));
        handle.stop();
        let after_stop = runs.load(Ordering::SeqCst);
        assert!(after_stop >= 2, "ran {after_stop} times");

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(runs.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_drop_stops_scheduler() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        {
            let _handle = spawn_scheduler(Duration::from_millis(5), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            std::thread::sleep(Duration::from_millis(20));
        }
        let at_drop = runs.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(runs.load(Ordering::SeqCst), at_drop);
    }
}
