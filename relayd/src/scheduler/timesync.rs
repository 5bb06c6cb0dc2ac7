/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Time-synchronization health collaborator.
//!
//! Scheduled triggers only fire while the host clock is verified against a
//! reference time source.  When it is not, the scheduler asks the
//! collaborator to remediate (a privileged action on the host).

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{TimeSyncConfig, TimeSyncKind};

/// Deadline for the sync query.
const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Deadline for the remediation command.
const REMEDIATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Reports and repairs host clock synchronization.
#[async_trait]
pub trait TimeSync: Send + Sync + 'static {
    /// `true` if the host clock is synchronized.  Any failure to find out
    /// counts as "not synchronized".
    async fn is_synchronized(&self) -> bool;

    /// Try to bring the clock back in sync.  Failures are logged only.
    async fn remediate(&self);
}

/// Build the collaborator selected in configuration.
pub fn from_config(cfg: &TimeSyncConfig) -> Arc<dyn TimeSync> {
    match cfg.kind {
        TimeSyncKind::Timedatectl => Arc::new(TimedatectlSync::new(&cfg.remediation)),
        TimeSyncKind::AssumeSynced => Arc::new(AssumeSynced),
    }
}

// ── systemd backend ───────────────────────────────────────────────────────────

/// Queries `timedatectl` and restarts `systemd-timesyncd` on demand.
#[derive(Debug, Clone)]
pub struct TimedatectlSync {
    remediation: String,
}

impl TimedatectlSync {
    pub fn new(remediation: impl Into<String>) -> Self {
        Self {
            remediation: remediation.into(),
        }
    }
}

#[async_trait]
impl TimeSync for TimedatectlSync {
    async fn is_synchronized(&self) -> bool {
        let query = Command::new("timedatectl")
            .args(["show", "--property=NTPSynchronized", "--value"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(QUERY_TIMEOUT, query).await {
            Ok(Ok(out)) if out.status.success() => {
                String::from_utf8_lossy(&out.stdout).trim() == "yes"
            }
            Ok(Ok(out)) => {
                debug!(status = %out.status, "timedatectl failed");
                false
            }
            Ok(Err(e)) => {
                debug!(error = %e, "cannot run timedatectl");
                false
            }
            Err(_) => {
                debug!("timedatectl timed out");
                false
            }
        }
    }

    async fn remediate(&self) {
        info!(command = %self.remediation, "requesting time service restart");
        let run = Command::new("sh")
            .arg("-c")
            .arg(&self.remediation)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(REMEDIATION_TIMEOUT, run).await {
            Ok(Ok(status)) if status.success() => {}
            Ok(Ok(status)) => warn!(%status, "time service remediation failed"),
            Ok(Err(e)) => warn!(error = %e, "cannot run time service remediation"),
            Err(_) => warn!("time service remediation timed out"),
        }
    }
}

// ── Trusting backend ──────────────────────────────────────────────────────────

/// Treats the clock as always synchronized (hosts with an RTC or no NTP).
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeSynced;

#[async_trait]
impl TimeSync for AssumeSynced {
    async fn is_synchronized(&self) -> bool {
        true
    }

    async fn remediate(&self) {}
}
