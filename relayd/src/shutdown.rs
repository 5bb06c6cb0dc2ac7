/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Emergency shutdown and termination-signal coordination.
//!
//! ```text
//! SIGINT / SIGTERM / SIGQUIT ─┐
//!                             ├─► SignalCoordinator::shutdown()
//! normal exit ────────────────┘        ├─► cancel loops (token)
//!                                      ├─► close admission (registry)
//!                                      ├─► EmergencyShutdown::execute()  (all OFF, registry cleared)
//!                                      └─► wait for tracked tasks ≤ grace
//! GET /emergency_stop ──────────────► EmergencyShutdown::execute()
//! ```
//!
//! The emergency sweep is idempotent: it can run repeatedly, concurrently,
//! and from any trigger.  Activations whose record it clears will still run
//! their own `force_off` afterwards, which is harmless.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::config::ChannelSet;
use crate::registry::TaskRegistry;
use crate::supervisor::{ActuationSupervisor, CriticalFault};
use crate::task::ChannelId;

// ── EmergencyShutdown ─────────────────────────────────────────────────────────

/// Result of one emergency sweep.
#[derive(Debug, Clone, Default)]
pub struct EmergencyReport {
    /// Channels confirmed off.
    pub confirmed_off: Vec<ChannelId>,
    /// Channels whose turn-off could not be confirmed.
    pub faults: Vec<CriticalFault>,
    /// Registry records dropped by this sweep.
    pub cleared: usize,
}

/// Forces every channel off and clears the registry.
#[derive(Clone)]
pub struct EmergencyShutdown {
    channels: Arc<ChannelSet>,
    registry: Arc<TaskRegistry>,
    supervisor: ActuationSupervisor,
}

impl EmergencyShutdown {
    pub fn new(
        channels: Arc<ChannelSet>,
        registry: Arc<TaskRegistry>,
        supervisor: ActuationSupervisor,
    ) -> Self {
        Self {
            channels,
            registry,
            supervisor,
        }
    }

    /// Refuse every later activation.  Must precede the final sweep so no
    /// channel can be switched on after it.
    pub fn close_admission(&self) {
        self.registry.close();
    }

    /// Turn off every configured channel (plus any channel still present in
    /// the registry), then clear the registry unconditionally.
    ///
    /// Channels are turned off concurrently.  Never fails; faults are
    /// reported in the returned [`EmergencyReport`].
    pub async fn execute(&self) -> EmergencyReport {
        error!("EMERGENCY SHUTDOWN: switching all relays OFF");

        let mut targets: BTreeSet<ChannelId> = self.channels.iter().collect();
        targets.extend(self.registry.snapshot().into_iter().map(|(ch, _)| ch));

        let mut set = JoinSet::new();
        for channel in targets {
            let supervisor = self.supervisor.clone();
            set.spawn(async move { (channel, supervisor.force_off(channel).await) });
        }

        let mut report = EmergencyReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((channel, Ok(_))) => report.confirmed_off.push(channel),
                Ok((_, Err(fault))) => report.faults.push(fault),
                Err(e) => error!(error = %e, "emergency turn-off task failed"),
            }
        }
        report.confirmed_off.sort();

        report.cleared = self.registry.clear().len();

        info!(
            confirmed_off = report.confirmed_off.len(),
            faults = report.faults.len(),
            cleared = report.cleared,
            "emergency shutdown complete"
        );
        report
    }
}

// ── OS signals ────────────────────────────────────────────────────────────────

/// Waits for a termination signal.
///
/// Returns `Ok(())` when any signal is received, or `Err` if signal
/// registration fails.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv()  => warn!("received SIGINT"),
        _ = sigterm.recv() => warn!("received SIGTERM"),
        _ = sigquit.recv() => warn!("received SIGQUIT"),
    }
    Ok(())
}

/// Waits for a termination signal.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    warn!("received Ctrl-C");
    Ok(())
}

// ── SignalCoordinator ─────────────────────────────────────────────────────────

/// Result of a coordinated shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub emergency: EmergencyReport,
    /// `false` if tracked tasks were still running when the grace period
    /// ran out.
    pub stopped_within_grace: bool,
}

/// Maps termination signals and normal exit onto the all-off sweep.
#[derive(Clone)]
pub struct SignalCoordinator {
    running: CancellationToken,
    emergency: EmergencyShutdown,
    tracker: TaskTracker,
    grace: Duration,
}

impl SignalCoordinator {
    pub fn new(
        running: CancellationToken,
        emergency: EmergencyShutdown,
        tracker: TaskTracker,
        grace: Duration,
    ) -> Self {
        Self {
            running,
            emergency,
            tracker,
            grace,
        }
    }

    /// Stop the loops, close admission, sweep every channel off, then give
    /// tracked tasks up to the grace period to finish.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.running.cancel();
        self.emergency.close_admission();
        let emergency = self.emergency.execute().await;

        self.tracker.close();
        let stopped_within_grace = tokio::time::timeout(self.grace, self.tracker.wait())
            .await
            .is_ok();
        if stopped_within_grace {
            info!("all background tasks stopped within grace period");
        } else {
            warn!(
                grace_ms = self.grace.as_millis() as u64,
                still_running = self.tracker.len(),
                "grace period exceeded, abandoning remaining tasks"
            );
        }

        ShutdownReport {
            emergency,
            stopped_within_grace,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{FakePinDriver, Level};
    use crate::supervisor::RetryPolicy;
    use crate::task::{ActiveTask, Trigger};

    fn emergency() -> (EmergencyShutdown, Arc<TaskRegistry>, Arc<FakePinDriver>) {
        let drv = Arc::new(FakePinDriver::new());
        let reg = Arc::new(TaskRegistry::new());
        let sup = ActuationSupervisor::new(drv.clone(), RetryPolicy::default());
        let es = EmergencyShutdown::new(
            Arc::new(ChannelSet::new([ChannelId(7), ChannelId(12)])),
            reg.clone(),
            sup,
        );
        (es, reg, drv)
    }

    #[tokio::test(start_paused = true)]
    async fn sweeps_all_configured_channels_and_clears_registry() {
        let (es, reg, drv) = emergency();
        drv.set_level(ChannelId(7), Level::High);
        drv.set_level(ChannelId(12), Level::High);
        reg.register(ActiveTask::start(ChannelId(7), 5, Trigger::Api));

        let report = es.execute().await;
        assert_eq!(report.confirmed_off, vec![ChannelId(7), ChannelId(12)]);
        assert!(report.faults.is_empty());
        assert_eq!(report.cleared, 1);
        assert!(reg.is_empty());
        assert_eq!(drv.level(ChannelId(7)), Level::Low);
        assert_eq!(drv.level(ChannelId(12)), Level::Low);
    }

    #[tokio::test(start_paused = true)]
    async fn emergency_stop_alone_keeps_admission_open() {
        let (es, reg, _drv) = emergency();
        es.execute().await;
        assert!(!reg.is_closed());
        reg.try_register(ActiveTask::start(ChannelId(7), 5, Trigger::Api))
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_calls_are_idempotent() {
        let (es, reg, drv) = emergency();
        drv.set_level(ChannelId(12), Level::High);
        reg.register(ActiveTask::start(ChannelId(12), 5, Trigger::Api));

        let (a, b) = tokio::join!(es.execute(), es.execute());
        assert!(a.faults.is_empty() && b.faults.is_empty());
        assert_eq!(a.cleared + b.cleared, 1);
        assert!(reg.is_empty());
        assert_eq!(drv.level(ChannelId(12)), Level::Low);
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_channel_is_reported_and_others_still_swept() {
        let (es, reg, drv) = emergency();
        drv.fail_all_off_writes(true);
        reg.register(ActiveTask::start(ChannelId(7), 5, Trigger::Api));

        let report = es.execute().await;
        assert_eq!(report.faults.len(), 2);
        assert!(reg.is_empty(), "registry cleared even when turn-off fails");
    }

    #[tokio::test(start_paused = true)]
    async fn coordinated_shutdown_cancels_and_waits() {
        let (es, reg, _drv) = emergency();
        let token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let t = token.clone();
        tracker.spawn(async move { t.cancelled().await });

        let coord = SignalCoordinator::new(token.clone(), es, tracker, Duration::from_secs(3));
        let report = coord.shutdown().await;
        assert!(token.is_cancelled());
        assert!(reg.is_closed());
        assert!(report.stopped_within_grace);
        assert_eq!(report.emergency.confirmed_off.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_task_exceeds_grace_without_blocking_shutdown() {
        let (es, _reg, _drv) = emergency();
        let tracker = TaskTracker::new();
        tracker.spawn(tokio::time::sleep(Duration::from_secs(3600)));

        let coord = SignalCoordinator::new(
            CancellationToken::new(),
            es,
            tracker,
            Duration::from_secs(3),
        );
        let report = coord.shutdown().await;
        assert!(!report.stopped_within_grace);
    }
}
