//! Periodic SLA sweep
//!
//! Timers are tokio intervals, so tests drive the monitor with paused time
//! instead of waiting on the wall clock.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::tracker::OrderTracker;

/// Handle to a running sweep task.
pub struct SlaMonitor {
    cancel: CancellationToken,
    handle: JoinHandle<u64>,
}

impl SlaMonitor {
    /// Sweep every `period` until `cancel` fires.
    ///
    /// The first sweep runs one full period after spawning.
    pub fn spawn(tracker: Arc<OrderTracker>, period: Duration, cancel: CancellationToken) -> Self {
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer.tick().await;
            info!(period_secs = period.as_secs(), "SLA monitor started");

            let mut sweeps = 0u64;
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = timer.tick() => {}
                }

                match tracker.sweep_sla().await {
                    Ok(breaches) => {
                        debug!(breaches = breaches.len(), "SLA sweep finished");
                    }
                    Err(e) => warn!(error = %e, "SLA sweep failed"),
                }
                sweeps += 1;
            }

            info!(sweeps, "SLA monitor stopped");
            sweeps
        });

        Self { cancel, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancel the task and wait for it; returns the number of sweeps run
    pub async fn stop(self) -> u64 {
        self.cancel.cancel();
        self.handle.await.unwrap_or_default()
    }
}
