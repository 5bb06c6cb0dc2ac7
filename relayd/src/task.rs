/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Core data structures for the relay control engine.
//!
//! ```text
//! trigger (API / Scheduler) ──► RelayController ──► ActiveTask ──► TaskRegistry
//!                                                     ↑ read-only after creation
//! ```
//!
//! # Ownership model
//! An [`ActiveTask`] is created by the controller when an activation is
//! admitted and is never mutated afterwards.  The registry stores the
//! record; the controller keeps a copy of the `id` so that its own cleanup
//! can never delete a newer activation's record on the same channel.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;

// ── ChannelId ─────────────────────────────────────────────────────────────────

/// Identifier of a physical output channel (WiringOP physical pin number).
///
/// Channels form a fixed set established at startup; they are never created
/// or destroyed at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u32);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Trigger ───────────────────────────────────────────────────────────────────

/// What started an activation.  Carried for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// `GET /timer` request.
    Api,
    /// Daily schedule table entry.
    Schedule,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Api => write!(f, "api"),
            Trigger::Schedule => write!(f, "schedule"),
        }
    }
}

// ── ActiveTask ────────────────────────────────────────────────────────────────

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// One in-flight activation.
///
/// Timing uses [`tokio::time::Instant`] (monotonic), so elapsed-time checks
/// are immune to wall-clock jumps and follow tokio's virtual clock in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTask {
    /// Process-unique activation id.
    pub id: u64,
    pub channel: ChannelId,
    pub started: Instant,
    /// Planned on-time (`minutes × 60` seconds).
    pub planned: Duration,
    pub trigger: Trigger,
}

impl ActiveTask {
    /// Create a record for an activation starting now.
    pub fn start(channel: ChannelId, minutes: u32, trigger: Trigger) -> Self {
        Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            channel,
            started: Instant::now(),
            planned: minutes_to_duration(minutes),
            trigger,
        }
    }

    /// Time since the activation started, measured at `now`.
    pub fn elapsed_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    /// `true` once elapsed time is strictly beyond `planned × factor`.
    pub fn overran(&self, now: Instant, factor: f64) -> bool {
        self.elapsed_at(now) > self.planned.mul_f64(factor)
    }
}

/// Planned duration for an activation of `minutes`.
pub fn minutes_to_duration(minutes: u32) -> Duration {
    Duration::from_secs(u64::from(minutes) * 60)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
