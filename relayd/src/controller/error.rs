/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Why an activation request was refused.
//!
//! Every variant is raised **before** any registry mutation or driver call,
//! so a rejected request has no side effects.

use thiserror::Error;

use crate::registry::{AdmissionRefused, ChannelBusy};
use crate::task::ChannelId;

/// Caller-facing activation rejection.
///
/// | Variant | HTTP status |
/// |---|---|
/// | `InvalidDuration` | `400` |
/// | `UnknownChannel` | `400` |
/// | `ChannelBusy` | `409` |
/// | `ShuttingDown` | `500` |
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActivationError {
    /// Duration must be a positive number of minutes.
    #[error("invalid duration: {minutes} min (must be > 0)")]
    InvalidDuration { minutes: i64 },

    /// The channel is not part of the configured channel set.
    #[error("channel {channel} is not configured")]
    UnknownChannel { channel: ChannelId },

    /// The channel already has an activation in flight.
    #[error(transparent)]
    ChannelBusy(#[from] ChannelBusy),

    /// Shutdown has closed admission; the all-off sweep owns the channels.
    #[error("shutdown in progress, activation refused")]
    ShuttingDown,
}

impl From<AdmissionRefused> for ActivationError {
    fn from(err: AdmissionRefused) -> Self {
        match err {
            AdmissionRefused::Busy(busy) => ActivationError::ChannelBusy(busy),
            AdmissionRefused::Closed => ActivationError::ShuttingDown,
        }
    }
}

impl ActivationError {
    /// `true` for the request-validation variants (bad input, not state).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ActivationError::InvalidDuration { .. } | ActivationError::UnknownChannel { .. }
        )
    }
}
