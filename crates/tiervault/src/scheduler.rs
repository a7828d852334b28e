//! Periodic background cleanup.
//!
//! `CleanupScheduler::start` spawns a tokio task that sweeps the engine every interval
//! and publishes running totals over a watch channel.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::engine::{CleanupReport, StorageEngine};

/// Totals published by the background sweeper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Sweeps completed.
    pub sweeps: u64,
    /// Sweeps that failed.
    pub failures: u64,
    /// Entries removed across all sweeps.
    pub total_removed: u64,
    /// Bytes freed across all sweeps.
    pub total_freed: u64,
    /// Result of the most recent successful sweep.
    pub last_report: Option<CleanupReport>,
}

/// Handle to a running sweeper.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    stats: watch::Receiver<SchedulerStats>,
    task: JoinHandle<()>,
    interval: Duration,
}

impl SchedulerHandle {
    /// Snapshot of the totals so far.
    pub fn stats(&self) -> SchedulerStats {
        self.stats.borrow().clone()
    }

    /// Time between sweeps.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Check if the sweeper task is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the sweeper and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "cleanup scheduler task ended abnormally");
        }
    }
}

/// Background sweeper.
pub struct CleanupScheduler;

impl CleanupScheduler {
    /// Spawn a sweeper running `engine.cleanup()` every `interval`. The first sweep
    /// runs one interval after start.
    pub fn start(engine: Arc<StorageEngine>, interval: Duration) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (stats_tx, stats_rx) = watch::channel(SchedulerStats::default());
        let task = tokio::spawn(run(engine, interval, shutdown_rx, stats_tx));
        SchedulerHandle {
            shutdown: shutdown_tx,
            stats: stats_rx,
            task,
            interval,
        }
    }

    /// Spawn a sweeper at the engine's `cleanup_interval_secs`. Returns `None` when the
    /// interval is 0.
    pub fn from_config(engine: Arc<StorageEngine>) -> Option<SchedulerHandle> {
        let secs = engine.config().cleanup_interval_secs;
        if secs == 0 {
            debug!("background cleanup disabled");
            return None;
        }
        Some(Self::start(engine, Duration::from_secs(secs)))
    }
}

async fn run(
    engine: Arc<StorageEngine>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    stats_tx: watch::Sender<SchedulerStats>,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stats = SchedulerStats::default();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        match engine.cleanup().await {
            Ok(report) => {
                stats.sweeps += 1;
                stats.total_removed += report.removed as u64;
                stats.total_freed += report.space_freed;
                stats.last_report = Some(report);
            }
            Err(e) => {
                stats.failures += 1;
                warn!(error = %e, "background cleanup failed");
            }
        }
        let _ = stats_tx.send(stats.clone());
    }
    debug!("cleanup scheduler stopped");
}
