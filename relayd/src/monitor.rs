/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Watchdog for overrunning activations.
//!
//! Every `monitor_period` the monitor snapshots the registry.  A task whose
//! elapsed time is beyond `planned × reclaim_factor` is removed from the
//! registry immediately and a `force_off` is spawned for its channel
//! without waiting for the result.  This works even when the owning
//! controller is wedged inside a driver call.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::Timing;
use crate::registry::TaskRegistry;
use crate::supervisor::ActuationSupervisor;
use crate::task::ChannelId;

/// Background reclaimer of overrun tasks.
#[derive(Clone)]
pub struct TaskMonitor {
    registry: Arc<TaskRegistry>,
    supervisor: ActuationSupervisor,
    period: Duration,
    reclaim_factor: f64,
    tracker: TaskTracker,
}

impl TaskMonitor {
    pub fn new(
        registry: Arc<TaskRegistry>,
        supervisor: ActuationSupervisor,
        timing: &Timing,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            registry,
            supervisor,
            period: timing.monitor_period,
            reclaim_factor: timing.reclaim_factor,
            tracker,
        }
    }

    /// Scan until `token` is cancelled.  Cancellation is observed between
    /// scans, never in the middle of one.
    pub async fn run(self, token: CancellationToken) {
        info!(period_ms = self.period.as_millis() as u64, "task monitor started");
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.scan();
                }
            }
        }
        info!("task monitor stopped");
    }

    /// One pass over the registry.  Returns the channels reclaimed.
    pub fn scan(&self) -> Vec<ChannelId> {
        let now = Instant::now();
        let mut reclaimed = Vec::new();

        for (channel, task) in self.registry.snapshot() {
            if !task.overran(now, self.reclaim_factor) {
                continue;
            }
            // A newer activation may have taken the channel since the snapshot.
            if !self.registry.remove_task(channel, task.id) {
                debug!(channel = %channel, id = task.id, "task already gone");
                continue;
            }
            warn!(
                channel = %channel,
                id = task.id,
                elapsed_s = task.elapsed_at(now).as_secs(),
                planned_s = task.planned.as_secs(),
                "forcing channel OFF (stuck task)"
            );
            let supervisor = self.supervisor.clone();
            self.tracker.spawn(async move {
                let _ = supervisor.force_off(channel).await;
            });
            reclaimed.push(channel);
        }

        reclaimed
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{FakePinDriver, Level};
    use crate::supervisor::RetryPolicy;
    use crate::task::{ActiveTask, Trigger};

    fn monitor() -> (TaskMonitor, Arc<TaskRegistry>, Arc<FakePinDriver>, TaskTracker) {
        let drv = Arc::new(FakePinDriver::new());
        let reg = Arc::new(TaskRegistry::new());
        let tracker = TaskTracker::new();
        let sup = ActuationSupervisor::new(drv.clone(), RetryPolicy::default());
        let mon = TaskMonitor::new(reg.clone(), sup, &Timing::default(), tracker.clone());
        (mon, reg, drv, tracker)
    }

    #[tokio::test(start_paused = true)]
    async fn scan_ignores_tasks_within_budget() {
        let (mon, reg, drv, _) = monitor();
        reg.register(ActiveTask::start(ChannelId(7), 2, Trigger::Api));

        tokio::time::advance(Duration::from_secs(180)).await; // exactly 1.5×
        assert!(mon.scan().is_empty());
        assert_eq!(reg.len(), 1);
        assert_eq!(drv.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn scan_reclaims_overrun_task() {
        let (mon, reg, drv, tracker) = monitor();
        drv.set_level(ChannelId(7), Level::High);
        reg.register(ActiveTask::start(ChannelId(7), 2, Trigger::Api));
        reg.register(ActiveTask::start(ChannelId(12), 10, Trigger::Api));

        tokio::time::advance(Duration::from_secs(181)).await;
        assert_eq!(mon.scan(), vec![ChannelId(7)]);
        // removal is immediate, turn-off is asynchronous
        assert!(reg.get(ChannelId(7)).is_none());
        assert!(reg.get(ChannelId(12)).is_some());

        tracker.close();
        tracker.wait().await;
        assert_eq!(drv.level(ChannelId(7)), Level::Low);
    }

    #[tokio::test(start_paused = true)]
    async fn reclaim_proceeds_even_when_turn_off_fails() {
        let (mon, reg, drv, tracker) = monitor();
        drv.fail_all_off_writes(true);
        reg.register(ActiveTask::start(ChannelId(7), 1, Trigger::Api));

        tokio::time::advance(Duration::from_secs(91)).await;
        assert_eq!(mon.scan(), vec![ChannelId(7)]);
        assert!(reg.is_empty(), "optimistic removal");

        tracker.close();
        tracker.wait().await;
        assert_eq!(drv.write_count(ChannelId(7), Level::Low), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_stops_on_cancel_and_reclaims_periodically() {
        let (mon, reg, drv, _) = monitor();
        reg.register(ActiveTask::start(ChannelId(7), 1, Trigger::Api));
        let token = CancellationToken::new();
        let loop_handle = tokio::spawn(mon.run(token.clone()));

        // 1.5 min budget + one 5 s period
        tokio::time::sleep(Duration::from_secs(96)).await;
        assert!(reg.is_empty());
        assert_eq!(drv.level(ChannelId(7)), Level::Low);

        token.cancel();
        loop_handle.await.unwrap();
    }
}
