/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! WiringOP command-line backend.
//!
//! Each driver call spawns one `gpio -1 <verb> <pin> [...]` process
//! (physical pin numbering).  Calls are independent processes, so calls for
//! different channels may run concurrently; no global lock is taken here.
//!
//! The child is killed when the per-call deadline expires
//! (`kill_on_drop`), so a hung tool never outlives its call.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{DriverError, Level, PinDriver};
use crate::task::ChannelId;

/// Drives channels through the WiringOP `gpio` executable.
#[derive(Debug, Clone)]
pub struct GpioCommandDriver {
    program: String,
    call_timeout: Duration,
}

impl GpioCommandDriver {
    pub fn new(program: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            call_timeout,
        }
    }

    /// Check that the actuation tool is installed (`gpio -v`).
    ///
    /// # Errors
    /// Fails when the tool cannot be started or exits non-zero.
    pub async fn probe(&self) -> anyhow::Result<()> {
        let status = tokio::time::timeout(
            self.call_timeout,
            Command::new(&self.program)
                .arg("-v")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status(),
        )
        .await
        .with_context(|| format!("'{} -v' timed out", self.program))?
        .with_context(|| format!("'{}' not found – install WiringOP", self.program))?;

        if !status.success() {
            bail!("'{} -v' exited with {}", self.program, status);
        }
        Ok(())
    }

    /// Run `gpio -1 <args..>` under the per-call deadline and return stdout.
    async fn run(
        &self,
        channel: ChannelId,
        op: &'static str,
        args: &[&str],
    ) -> Result<String, DriverError> {
        debug!(channel = %channel, op, ?args, "gpio call");

        let child = Command::new(&self.program)
            .arg("-1")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.call_timeout, child).await {
            Err(_) => {
                return Err(DriverError::Timeout {
                    channel,
                    op,
                    after: self.call_timeout,
                })
            }
            Ok(Err(source)) => return Err(DriverError::Spawn { channel, source }),
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            return Err(DriverError::Failed {
                channel,
                op,
                detail: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl PinDriver for GpioCommandDriver {
    async fn set_mode(&self, channel: ChannelId) -> Result<(), DriverError> {
        let pin = channel.to_string();
        self.run(channel, "mode", &["mode", &pin, "out"]).await?;
        Ok(())
    }

    async fn write(&self, channel: ChannelId, level: Level) -> Result<(), DriverError> {
        let pin = channel.to_string();
        let value = level.as_digit().to_string();
        self.run(channel, "write", &["write", &pin, &value]).await?;
        Ok(())
    }

    async fn read(&self, channel: ChannelId) -> Result<Level, DriverError> {
        let pin = channel.to_string();
        let out = self.run(channel, "read", &["read", &pin]).await?;
        Level::from_digit(&out).ok_or_else(|| DriverError::UnexpectedOutput {
            channel,
            output: out.trim().to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "gpio"
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
