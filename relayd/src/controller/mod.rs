/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! One bounded activation of one channel.
//!
//! [`RelayController::activate`] validates the request, registers an
//! [`ActiveTask`] and spawns the activation.  The activation walks
//!
//! ```text
//! Idle ─► Registering ─► Energized ─► Waiting ─► Deenergizing ─► Idle
//!                            │ turn-on failed          ▲
//!                            └─────────────────────────┘
//! ```
//!
//! The energize/wait phase runs in its own tokio task so that a panic there
//! is observed as a `JoinError` instead of unwinding past the cleanup step.
//! Cleanup (`force_off` then deregistration) runs exactly once per admitted
//! activation, whatever happened before it.

pub mod error;

pub use error::ActivationError;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::config::{ChannelSet, Timing};
use crate::driver::{Level, PinDriver};
use crate::registry::TaskRegistry;
use crate::supervisor::{ActuationSupervisor, CriticalFault};
use crate::task::{ActiveTask, ChannelId, Trigger};

// ── Outcome types ─────────────────────────────────────────────────────────────

/// How the energize/wait phase ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationEnd {
    /// Planned duration elapsed.
    Completed,
    /// Elapsed time went past `planned × overrun_warn_factor` before the
    /// planned end was observed.
    Overrun,
    /// `write(High)` failed; the channel was never confirmed on.
    TurnOnFailed,
    /// The record disappeared (monitor reclaim or emergency shutdown).
    Preempted,
    /// The phase panicked or was cancelled.
    Internal(String),
}

/// Result of one complete activation, returned through its join handle.
#[derive(Debug, Clone)]
pub struct ActivationReport {
    pub id: u64,
    pub channel: ChannelId,
    pub end: ActivationEnd,
    /// Result of the unconditional final `force_off`.
    pub off: Result<u32, CriticalFault>,
    /// `false` if the record had already been removed by someone else.
    pub deregistered: bool,
}

// ── RelayController ───────────────────────────────────────────────────────────

/// Orchestrates activations.  Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct RelayController {
    channels: Arc<ChannelSet>,
    registry: Arc<TaskRegistry>,
    supervisor: ActuationSupervisor,
    poll_interval: Duration,
    overrun_warn_factor: f64,
    tracker: TaskTracker,
}

impl RelayController {
    pub fn new(
        channels: Arc<ChannelSet>,
        registry: Arc<TaskRegistry>,
        supervisor: ActuationSupervisor,
        timing: &Timing,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            channels,
            registry,
            supervisor,
            poll_interval: timing.poll_interval,
            overrun_warn_factor: timing.overrun_warn_factor,
            tracker,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Check a request without side effects.
    pub fn validate(&self, channel: ChannelId, minutes: i64) -> Result<u32, ActivationError> {
        let minutes = u32::try_from(minutes)
            .ok()
            .filter(|m| *m > 0)
            .ok_or(ActivationError::InvalidDuration { minutes })?;
        if !self.channels.contains(channel) {
            return Err(ActivationError::UnknownChannel { channel });
        }
        Ok(minutes)
    }

    /// Admit and start an activation of `channel` for `minutes`.
    ///
    /// Returns as soon as the activation is registered; the returned handle
    /// resolves when cleanup has finished.  Dropping the handle does not
    /// cancel the activation.
    ///
    /// # Errors
    /// Validation failures, a busy channel and a closed registry are
    /// reported before any registry mutation or driver call.
    pub fn activate(
        &self,
        channel: ChannelId,
        minutes: i64,
        trigger: Trigger,
    ) -> Result<JoinHandle<ActivationReport>, ActivationError> {
        let minutes = self.validate(channel, minutes)?;

        let task = ActiveTask::start(channel, minutes, trigger);
        self.registry.try_register(task.clone())?;

        info!(
            channel = %channel,
            minutes,
            trigger = %trigger,
            id = task.id,
            "activation admitted"
        );

        Ok(self.tracker.spawn(self.clone().run(task)))
    }

    /// Energize, wait, then always de-energize and deregister.
    async fn run(self, task: ActiveTask) -> ActivationReport {
        let channel = task.channel;
        let id = task.id;

        let phase = tokio::spawn(self.clone().energize_and_wait(task));
        let end = match phase.await {
            Ok(end) => end,
            Err(e) => {
                error!(channel = %channel, id, error = %e, "relay control failed");
                ActivationEnd::Internal(e.to_string())
            }
        };

        // ── Deenergizing (unconditional) ──────────────────────────────────────
        let off = self.supervisor.force_off(channel).await;
        let deregistered = self.registry.remove_task(channel, id);

        info!(
            channel = %channel,
            id,
            end = ?end,
            off_confirmed = off.is_ok(),
            "activation finished"
        );

        ActivationReport {
            id,
            channel,
            end,
            off,
            deregistered,
        }
    }

    async fn energize_and_wait(self, task: ActiveTask) -> ActivationEnd {
        let channel = task.channel;

        // ── Energized ─────────────────────────────────────────────────────────
        if let Err(e) = self.supervisor.driver().write(channel, Level::High).await {
            error!(channel = %channel, error = %e, "failed to switch channel ON");
            return ActivationEnd::TurnOnFailed;
        }
        info!(
            channel = %channel,
            minutes = task.planned.as_secs() / 60,
            "channel ON"
        );

        // ── Waiting ───────────────────────────────────────────────────────────
        let warn_limit = task.planned.mul_f64(self.overrun_warn_factor);
        loop {
            let elapsed = task.elapsed_at(Instant::now());
            if elapsed > warn_limit {
                warn!(
                    channel = %channel,
                    elapsed_s = elapsed.as_secs(),
                    planned_s = task.planned.as_secs(),
                    "run time exceeded on channel"
                );
                return ActivationEnd::Overrun;
            }
            if elapsed >= task.planned {
                return ActivationEnd::Completed;
            }
            if !self.registry.holds(channel, task.id) {
                warn!(channel = %channel, id = task.id, "activation reclaimed while waiting");
                return ActivationEnd::Preempted;
            }
            let remaining = task.planned - elapsed;
            tokio::time::sleep(remaining.min(self.poll_interval)).await;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
