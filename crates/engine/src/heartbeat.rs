// SPDX-License-Identifier: MIT

//! Heartbeat-driven liveness of the controlling client (spec.md §4.5).

use crate::scheduler::Scheduler;
use rst_core::Clock;
use std::time::Duration;

const TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Cancels all `pending`/`processing` jobs when no `list_jobs` call has
/// refreshed the heartbeat within the configured timeout. Jobs in
/// `waiting_input` are left alone — they hold no worker.
pub struct HeartbeatMonitor<C: Clock> {
    scheduler: Scheduler<C>,
}

impl<C: Clock> HeartbeatMonitor<C> {
    pub fn new(scheduler: Scheduler<C>) -> Self {
        Self { scheduler }
    }

    /// Run the 5-second tick loop forever. Intended to be spawned as its
    /// own `tokio` task by the daemon.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    /// One evaluation of the heartbeat condition; exposed separately so
    /// tests can drive it deterministically without waiting on real time.
    pub async fn tick(&self) {
        let ids = self.scheduler.pending_or_processing_ids();
        if ids.is_empty() {
            return;
        }
        if self.scheduler.heartbeat_elapsed() < self.scheduler.heartbeat_timeout() {
            return;
        }
        let cancelled = self.scheduler.cancel_ids(&ids).await;
        if cancelled > 0 {
            tracing::warn!(cancelled, "heartbeat timed out, cancelling active jobs");
        }
    }
}
