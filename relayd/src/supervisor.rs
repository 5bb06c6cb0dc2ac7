/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Fail-safe deactivation.
//!
//! [`ActuationSupervisor::force_off`] is the only path by which any part of
//! the engine turns a channel off.  It retries `write(Low)` with a fixed
//! (non-exponential) delay and never propagates a driver error: on
//! exhaustion it logs a critical fault and hands back a [`CriticalFault`]
//! value the caller may inspect or drop.
//!
//! ```text
//! attempt 1 ──fail──► sleep(delay) ──► attempt 2 ── … ──► attempt N ──fail──► CriticalFault
//!     └─ok─► Ok(attempts)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::Timing;
use crate::driver::{Level, PinDriver};
use crate::task::ChannelId;

// ── Retry policy ──────────────────────────────────────────────────────────────

/// Fixed-delay retry budget for turn-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (`>= 1`).
    pub attempts: u32,
    /// Delay between consecutive attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    /// 5 attempts, 500 ms apart.
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_millis(500),
        }
    }
}

impl From<&Timing> for RetryPolicy {
    fn from(t: &Timing) -> Self {
        Self {
            attempts: t.retry_attempts.max(1),
            delay: t.retry_delay,
        }
    }
}

// ── CriticalFault ─────────────────────────────────────────────────────────────

/// `force_off` exhausted its retries.  The channel may still be energized;
/// an operator must intervene.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("CRITICAL: channel {channel} could not be switched off after {attempts} attempts: {last_error}")]
pub struct CriticalFault {
    pub channel: ChannelId,
    pub attempts: u32,
    pub last_error: String,
}

// ── ActuationSupervisor ───────────────────────────────────────────────────────

/// Guarantees "deactivate channel" with bounded retries on top of a
/// [`PinDriver`].
///
/// Cheap to clone; clones share the driver and the fault counter.
#[derive(Clone)]
pub struct ActuationSupervisor {
    driver: Arc<dyn PinDriver>,
    policy: RetryPolicy,
    critical_faults: Arc<AtomicU64>,
}

impl ActuationSupervisor {
    pub fn new(driver: Arc<dyn PinDriver>, policy: RetryPolicy) -> Self {
        Self {
            driver,
            policy,
            critical_faults: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The driver this supervisor actuates through.
    pub fn driver(&self) -> &Arc<dyn PinDriver> {
        &self.driver
    }

    /// Number of `force_off` calls that ended in a [`CriticalFault`] since
    /// start-up.
    pub fn critical_fault_count(&self) -> u64 {
        self.critical_faults.load(Ordering::Relaxed)
    }

    /// Drive `channel` low, retrying up to the policy's attempt budget.
    ///
    /// Returns the number of attempts used on success.  Never panics and
    /// never propagates a driver error; exhaustion is logged at the highest
    /// severity and returned as a [`CriticalFault`].
    pub async fn force_off(&self, channel: ChannelId) -> Result<u32, CriticalFault> {
        let attempts = self.policy.attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.driver.write(channel, Level::Low).await {
                Ok(()) => {
                    if attempt > 1 {
                        warn!(channel = %channel, attempt, "channel OFF after retries");
                    } else {
                        info!(channel = %channel, "channel OFF (confirmed)");
                    }
                    return Ok(attempt);
                }
                Err(e) => {
                    debug!(channel = %channel, attempt, error = %e, "turn-off attempt failed");
                    last_error = e.to_string();
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.policy.delay).await;
            }
        }

        self.critical_faults.fetch_add(1, Ordering::Relaxed);
        let fault = CriticalFault {
            channel,
            attempts,
            last_error,
        };
        error!(critical = true, channel = %channel, attempts, "{}", fault);
        Err(fault)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
