/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Explicitly owned engine context.
//!
//! [`Engine`] replaces process-wide globals: it owns the registry, the
//! running token and the configuration, and hands clones of the pieces to
//! each background task.  Every spawned unit (monitor, scheduler,
//! activations, reclaim turn-offs) goes into one [`TaskTracker`] so shutdown
//! can wait on all of them with a single grace deadline.
//!
//! ```text
//! Engine
//! ├── RelayController ──┐
//! ├── TaskMonitor ──────┼──► ActuationSupervisor ──► PinDriver
//! ├── Scheduler ────────┤
//! ├── EmergencyShutdown ┘
//! └── TaskRegistry (shared by all of the above)
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::config::{ChannelSet, RelayConfig, ScheduleEntry, Timing};
use crate::controller::RelayController;
use crate::driver::{Level, PinDriver};
use crate::monitor::TaskMonitor;
use crate::registry::TaskRegistry;
use crate::scheduler::{Clock, Scheduler, TimeSync};
use crate::shutdown::{EmergencyReport, EmergencyShutdown, ShutdownReport, SignalCoordinator};
use crate::supervisor::{ActuationSupervisor, RetryPolicy};

/// The relay control engine.  Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Engine {
    channels: Arc<ChannelSet>,
    schedule: Arc<Vec<ScheduleEntry>>,
    timing: Timing,
    registry: Arc<TaskRegistry>,
    supervisor: ActuationSupervisor,
    controller: RelayController,
    emergency: EmergencyShutdown,
    time_sync: Arc<dyn TimeSync>,
    clock: Arc<dyn Clock>,
    running: CancellationToken,
    tracker: TaskTracker,
    /// Held only while channels are being initialised.
    init_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Engine {
    pub fn new(
        config: &RelayConfig,
        driver: Arc<dyn PinDriver>,
        time_sync: Arc<dyn TimeSync>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let channels = Arc::new(config.channels.clone());
        let registry = Arc::new(TaskRegistry::new());
        let tracker = TaskTracker::new();
        let supervisor = ActuationSupervisor::new(driver, RetryPolicy::from(&config.timing));

        let controller = RelayController::new(
            channels.clone(),
            registry.clone(),
            supervisor.clone(),
            &config.timing,
            tracker.clone(),
        );
        let emergency =
            EmergencyShutdown::new(channels.clone(), registry.clone(), supervisor.clone());

        Self {
            channels,
            schedule: Arc::new(config.schedule.clone()),
            timing: config.timing.clone(),
            registry,
            supervisor,
            controller,
            emergency,
            time_sync,
            clock,
            running: CancellationToken::new(),
            tracker,
            init_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn controller(&self) -> &RelayController {
        &self.controller
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Cancelled once shutdown has begun.
    pub fn running(&self) -> &CancellationToken {
        &self.running
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Configure every channel as an output and force it off, then sweep
    /// for channels that still read back as on.
    ///
    /// # Errors
    /// A channel that cannot be put into output mode aborts start-up.
    pub async fn initialize(&self) -> Result<()> {
        let _guard = self.init_lock.lock().await;
        let driver = self.supervisor.driver();

        for channel in self.channels.iter() {
            driver
                .set_mode(channel)
                .await
                .with_context(|| format!("cannot configure channel {} as output", channel))?;
            let _ = self.supervisor.force_off(channel).await;
            info!(channel = %channel, "channel initialised (OUTPUT, LOW)");
        }

        for channel in self.channels.iter() {
            match driver.read(channel).await {
                Ok(Level::High) => {
                    warn!(channel = %channel, "channel was ON at start-up, switching OFF");
                    let _ = self.supervisor.force_off(channel).await;
                }
                Ok(Level::Low) => {}
                Err(e) => warn!(channel = %channel, error = %e, "cannot read channel state"),
            }
        }

        Ok(())
    }

    /// Spawn the monitor and scheduler loops.  They stop when
    /// [`running`](Self::running) is cancelled.
    pub fn start(&self) {
        let monitor = TaskMonitor::new(
            self.registry.clone(),
            self.supervisor.clone(),
            &self.timing,
            self.tracker.clone(),
        );
        self.tracker.spawn(monitor.run(self.running.child_token()));

        let scheduler = Scheduler::new(
            &self.schedule,
            self.controller.clone(),
            self.time_sync.clone(),
            self.clock.clone(),
            &self.timing,
        );
        self.tracker.spawn(scheduler.run(self.running.child_token()));

        info!(
            channels = self.channels.len(),
            schedule_entries = self.schedule.len(),
            "engine started"
        );
    }

    /// Force every channel off and clear the registry.
    pub async fn emergency_stop(&self) -> EmergencyReport {
        self.emergency.execute().await
    }

    pub fn signal_coordinator(&self) -> SignalCoordinator {
        SignalCoordinator::new(
            self.running.clone(),
            self.emergency.clone(),
            self.tracker.clone(),
            self.timing.shutdown_grace,
        )
    }

    /// Normal-exit path: same sweep as the signal path.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.signal_coordinator().shutdown().await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
