/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Pin driver port – the boundary between the engine and the physical
//! actuation mechanism.
//!
//! ```text
//!   RelayController / ActuationSupervisor ──▶ PinDriver ──▶ hardware
//! ```
//!
//! Two backends implement [`PinDriver`]:
//!
//! * [`gpio::GpioCommandDriver`] shells out to the WiringOP `gpio` tool.
//! * [`fake::FakePinDriver`] is a deterministic in-memory backend used by the
//!   tests and by `--driver fake` dry runs.
//!
//! Every call is bounded by the backend's per-call deadline.  Failures come
//! back as a typed [`DriverError`]; nothing panics across this boundary.

pub mod fake;
pub mod gpio;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{DriverConfig, DriverKind};
use crate::task::ChannelId;

pub use fake::FakePinDriver;
pub use gpio::GpioCommandDriver;

// ── Logic level ───────────────────────────────────────────────────────────────

/// Logic level of an output channel.  `Low` is the relay's off state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    /// Value passed on the `gpio write` command line.
    pub fn as_digit(self) -> u8 {
        match self {
            Level::Low => 0,
            Level::High => 1,
        }
    }

    /// Parse the output of `gpio read`.
    pub fn from_digit(s: &str) -> Option<Self> {
        match s.trim() {
            "0" => Some(Level::Low),
            "1" => Some(Level::High),
            _ => None,
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Why a single driver call failed.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The backend reported failure (non-zero exit status).
    #[error("channel {channel}: {op} failed: {detail}")]
    Failed {
        channel: ChannelId,
        op: &'static str,
        detail: String,
    },

    /// The call did not complete within the per-call deadline.
    #[error("channel {channel}: {op} timed out after {after:?}")]
    Timeout {
        channel: ChannelId,
        op: &'static str,
        after: Duration,
    },

    /// The backend process could not be started at all.
    #[error("channel {channel}: cannot start actuation tool: {source}")]
    Spawn {
        channel: ChannelId,
        #[source]
        source: std::io::Error,
    },

    /// `read` produced something that is not a logic level.
    #[error("channel {channel}: unexpected read output '{output}'")]
    UnexpectedOutput { channel: ChannelId, output: String },
}

// ── PinDriver ─────────────────────────────────────────────────────────────────

/// Capability to configure, drive and sample output channels.
///
/// Implementations must be safe to call concurrently for different channels.
#[async_trait]
pub trait PinDriver: Send + Sync + 'static {
    /// Configure `channel` as a digital output.
    async fn set_mode(&self, channel: ChannelId) -> Result<(), DriverError>;

    /// Drive `channel` to `level`.
    async fn write(&self, channel: ChannelId, level: Level) -> Result<(), DriverError>;

    /// Sample the current level of `channel`.
    async fn read(&self, channel: ChannelId) -> Result<Level, DriverError>;

    /// Short backend name used in logs.
    fn name(&self) -> &'static str;
}

/// Construct the backend selected in configuration.
pub fn from_config(cfg: &DriverConfig) -> Arc<dyn PinDriver> {
    match cfg.kind {
        DriverKind::Gpio => Arc::new(GpioCommandDriver::new(&cfg.command, cfg.call_timeout)),
        DriverKind::Fake => Arc::new(FakePinDriver::new()),
    }
}
