use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::{CycleOutcome, RefreshCache};

/// Handle to the background refresh loop started by [`spawn`].
pub struct RefreshHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Stops scheduling new cycles and waits for the loop to exit. A cycle
    /// already in flight runs to completion first.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Refresh loop terminated abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Starts the periodic refresh loop. The first cycle runs immediately.
///
/// Ticks that come due while a cycle is still running are skipped rather
/// than queued.
pub fn spawn(cache: Arc<RefreshCache>, interval: Duration) -> RefreshHandle {
    let (shutdown, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = interval.as_secs(), "Refresh loop started");

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    // a dropped handle counts as shutdown
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let CycleOutcome::Skipped = cache.refresh_once().await {
                        info!("Tick skipped, previous cycle still running");
                    }
                }
            }
        }

        info!("Refresh loop stopped");
    });

    RefreshHandle { shutdown, task }
}
