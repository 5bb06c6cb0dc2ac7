/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Deterministic in-memory driver.
//!
//! Records every call so tests can assert on the full command history
//! without touching real hardware, and can be scripted to fail or stall.
//! Also backs `--driver fake` for dry runs on a development host.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::{DriverError, Level, PinDriver};
use crate::task::ChannelId;

/// One recorded driver call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCall {
    SetMode(ChannelId),
    Write(ChannelId, Level),
    Read(ChannelId),
}

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<DriverCall>,
    levels: HashMap<ChannelId, Level>,
    /// Number of upcoming `write(Low)` calls that fail.
    failing_off_writes: u32,
    /// Every `write(High)` fails while set.
    fail_on_writes: bool,
    /// Every `write(Low)` fails while set.
    fail_all_off_writes: bool,
    fail_set_mode: bool,
    /// Each write sleeps this long before completing.
    write_stall: Option<Duration>,
}

/// In-memory [`PinDriver`] with scriptable failures.
#[derive(Debug, Default)]
pub struct FakePinDriver {
    state: Mutex<FakeState>,
}

impl FakePinDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Scripting ─────────────────────────────────────────────────────────────

    /// Make the next `n` off-writes fail.
    pub fn fail_next_off_writes(&self, n: u32) {
        self.state().failing_off_writes = n;
    }

    /// Make every off-write fail (or succeed again).
    pub fn fail_all_off_writes(&self, fail: bool) {
        self.state().fail_all_off_writes = fail;
    }

    /// Make every on-write fail (or succeed again).
    pub fn fail_on_writes(&self, fail: bool) {
        self.state().fail_on_writes = fail;
    }

    pub fn fail_set_mode(&self, fail: bool) {
        self.state().fail_set_mode = fail;
    }

    /// Delay every write by `stall` (simulates a wedged transport).
    pub fn stall_writes(&self, stall: Option<Duration>) {
        self.state().write_stall = stall;
    }

    /// Force the physical level of a channel, as if set outside the daemon.
    pub fn set_level(&self, channel: ChannelId, level: Level) {
        self.state().levels.insert(channel, level);
    }

    // ── Inspection ────────────────────────────────────────────────────────────

    /// Full call history in issue order.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.state().calls.clone()
    }

    /// Last level successfully written to `channel`; channels never written
    /// are `Low`.
    pub fn level(&self, channel: ChannelId) -> Level {
        self.state()
            .levels
            .get(&channel)
            .copied()
            .unwrap_or(Level::Low)
    }

    /// Number of write calls issued for `channel` at `level`, successful or not.
    pub fn write_count(&self, channel: ChannelId, level: Level) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| **c == DriverCall::Write(channel, level))
            .count()
    }

    /// `true` if the driver has never been called for `channel`.
    pub fn untouched(&self, channel: ChannelId) -> bool {
        !self.state().calls.iter().any(|c| match c {
            DriverCall::SetMode(ch) | DriverCall::Write(ch, _) | DriverCall::Read(ch) => {
                *ch == channel
            }
        })
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }
}

#[async_trait]
impl PinDriver for FakePinDriver {
    async fn set_mode(&self, channel: ChannelId) -> Result<(), DriverError> {
        let mut st = self.state();
        st.calls.push(DriverCall::SetMode(channel));
        if st.fail_set_mode {
            return Err(DriverError::Failed {
                channel,
                op: "mode",
                detail: "scripted failure".to_string(),
            });
        }
        Ok(())
    }

    async fn write(&self, channel: ChannelId, level: Level) -> Result<(), DriverError> {
        let stall = {
            let mut st = self.state();
            st.calls.push(DriverCall::Write(channel, level));
            st.write_stall
        };
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }

        let mut st = self.state();
        let fail = match level {
            Level::High => st.fail_on_writes,
            Level::Low if st.fail_all_off_writes => true,
            Level::Low if st.failing_off_writes > 0 => {
                st.failing_off_writes -= 1;
                true
            }
            Level::Low => false,
        };
        if fail {
            return Err(DriverError::Failed {
                channel,
                op: "write",
                detail: "scripted failure".to_string(),
            });
        }

        st.levels.insert(channel, level);
        info!(channel = %channel, level = ?level, "fake driver write");
        Ok(())
    }

    async fn read(&self, channel: ChannelId) -> Result<Level, DriverError> {
        let mut st = self.state();
        st.calls.push(DriverCall::Read(channel));
        Ok(st.levels.get(&channel).copied().unwrap_or(Level::Low))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CH: ChannelId = ChannelId(7);

    #[tokio::test]
    async fn writes_are_recorded_and_applied() {
        let drv = FakePinDriver::new();
        drv.write(CH, Level::High).await.unwrap();
        assert_eq!(drv.level(CH), Level::High);
        assert_eq!(drv.read(CH).await.unwrap(), Level::High);
        assert_eq!(
            drv.calls(),
            vec![DriverCall::Write(CH, Level::High), DriverCall::Read(CH)]
        );
    }

    #[tokio::test]
    async fn scripted_off_failures_are_consumed() {
        let drv = FakePinDriver::new();
        drv.set_level(CH, Level::High);
        drv.fail_next_off_writes(2);
        assert!(drv.write(CH, Level::Low).await.is_err());
        assert!(drv.write(CH, Level::Low).await.is_err());
        assert_eq!(drv.level(CH), Level::High, "failed writes do not change level");
        assert!(drv.write(CH, Level::Low).await.is_ok());
        assert_eq!(drv.level(CH), Level::Low);
        assert_eq!(drv.write_count(CH, Level::Low), 3);
    }

    #[tokio::test]
    async fn on_failures_leave_channel_off() {
        let drv = FakePinDriver::new();
        drv.fail_on_writes(true);
        assert!(drv.write(CH, Level::High).await.is_err());
        assert_eq!(drv.level(CH), Level::Low);
    }

    #[tokio::test]
    async fn untouched_tracks_any_call() {
        let drv = FakePinDriver::new();
        assert!(drv.untouched(CH));
        drv.set_mode(CH).await.unwrap();
        assert!(!drv.untouched(CH));
        assert!(drv.untouched(ChannelId(12)));
    }
}
