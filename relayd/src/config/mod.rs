//! Relay daemon configuration loading and validation.
//!
//! The expected YAML structure is:
//! ```yaml
//! http:
//!   bind: "0.0.0.0:80"
//! driver:
//!   kind: gpio
//!   command: gpio
//!   call_timeout_ms: 2000
//! time_sync:
//!   kind: timedatectl
//!   remediation: "sudo systemctl restart systemd-timesyncd"
//! channels: [7, 12]
//! schedule:
//!   7:
//!     - at: "06:00"
//!       minutes: 15
//! timing:
//!   poll_interval_ms: 1000
//! ```
//!
//! Only `channels` is required.  Every other section falls back to the
//! values of the irrigation controller deployment.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use serde::Deserialize;
use tracing::{debug, info};

use crate::task::ChannelId;

// ── Private YAML deserialization types ────────────────────────────────────────

/// Top-level wrapper that maps directly onto the YAML file layout.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    http: HttpSection,
    #[serde(default)]
    driver: DriverSection,
    #[serde(default)]
    time_sync: TimeSyncSection,
    channels: Vec<u32>,
    #[serde(default)]
    schedule: BTreeMap<u32, Vec<ScheduleEntryFile>>,
    #[serde(default)]
    timing: TimingSection,
}

#[derive(Debug, Deserialize)]
struct HttpSection {
    #[serde(default = "default_bind")]
    bind: SocketAddr,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 80))
}

#[derive(Debug, Deserialize)]
struct DriverSection {
    #[serde(default)]
    kind: DriverKind,
    #[serde(default = "default_gpio_command")]
    command: String,
    #[serde(default = "default_call_timeout_ms")]
    call_timeout_ms: u64,
}

impl Default for DriverSection {
    fn default() -> Self {
        Self {
            kind: DriverKind::default(),
            command: default_gpio_command(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

fn default_gpio_command() -> String {
    String::from("gpio")
}

fn default_call_timeout_ms() -> u64 {
    2_000
}

#[derive(Debug, Deserialize)]
struct TimeSyncSection {
    #[serde(default)]
    kind: TimeSyncKind,
    #[serde(default = "default_remediation")]
    remediation: String,
}

impl Default for TimeSyncSection {
    fn default() -> Self {
        Self {
            kind: TimeSyncKind::default(),
            remediation: default_remediation(),
        }
    }
}

fn default_remediation() -> String {
    String::from("sudo systemctl restart systemd-timesyncd")
}

/// One schedule line as written in YAML: `{ at: "06:00", minutes: 15 }`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScheduleEntryFile {
    at: String,
    minutes: u32,
}

/// Timing overrides.  Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TimingSection {
    poll_interval_ms: Option<u64>,
    monitor_period_ms: Option<u64>,
    scheduler_period_ms: Option<u64>,
    retry_attempts: Option<u32>,
    retry_delay_ms: Option<u64>,
    overrun_warn_factor: Option<f64>,
    reclaim_factor: Option<f64>,
    shutdown_grace_ms: Option<u64>,
    misfire_grace_ms: Option<u64>,
}

// ── Public data structures ────────────────────────────────────────────────────

/// Which [`PinDriver`](crate::driver::PinDriver) backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// WiringOP `gpio` command-line tool.
    #[default]
    Gpio,
    /// In-memory fake; no hardware is touched.
    Fake,
}

/// Which time-synchronization collaborator the scheduler consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSyncKind {
    /// `timedatectl show --property=NTPSynchronized --value`.
    #[default]
    Timedatectl,
    /// Treat the host clock as always synchronized.
    AssumeSynced,
}

/// Driver backend settings.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub kind: DriverKind,
    /// Executable used by the gpio backend.
    pub command: String,
    /// Deadline applied to each individual driver call.
    pub call_timeout: Duration,
}

/// Time-sync collaborator settings.
#[derive(Debug, Clone)]
pub struct TimeSyncConfig {
    pub kind: TimeSyncKind,
    /// Shell command run when the clock is found unsynchronized.
    pub remediation: String,
}

/// The fixed set of valid channels, established once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSet(BTreeSet<ChannelId>);

impl ChannelSet {
    pub fn new(channels: impl IntoIterator<Item = ChannelId>) -> Self {
        Self(channels.into_iter().collect())
    }

    pub fn contains(&self, channel: ChannelId) -> bool {
        self.0.contains(&channel)
    }

    /// Channels in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One daily trigger: turn `channel` on at `at` for `minutes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub channel: ChannelId,
    pub at: NaiveTime,
    pub minutes: u32,
}

/// All timing knobs of the engine.  The defaults are the production values.
#[derive(Debug, Clone, PartialEq)]
pub struct Timing {
    /// Controller wait-loop poll period.
    pub poll_interval: Duration,
    /// TaskMonitor scan period.
    pub monitor_period: Duration,
    /// Scheduler evaluation period.
    pub scheduler_period: Duration,
    /// Maximum `write(off)` attempts in one `force_off`.
    pub retry_attempts: u32,
    /// Fixed delay between `force_off` attempts.
    pub retry_delay: Duration,
    /// Elapsed / planned ratio at which the controller stops waiting.
    pub overrun_warn_factor: f64,
    /// Elapsed / planned ratio at which the monitor reclaims a task.
    pub reclaim_factor: f64,
    /// How long shutdown waits for tracked tasks before giving up.
    pub shutdown_grace: Duration,
    /// How late a due schedule job may still fire.
    pub misfire_grace: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            monitor_period: Duration::from_secs(5),
            scheduler_period: Duration::from_secs(30),
            retry_attempts: 5,
            retry_delay: Duration::from_millis(500),
            overrun_warn_factor: 1.2,
            reclaim_factor: 1.5,
            shutdown_grace: Duration::from_secs(3),
            misfire_grace: Duration::from_secs(60),
        }
    }
}

/// Complete, validated daemon configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind: SocketAddr,
    pub driver: DriverConfig,
    pub time_sync: TimeSyncConfig,
    pub channels: ChannelSet,
    pub schedule: Vec<ScheduleEntry>,
    pub timing: Timing,
}

impl Default for RelayConfig {
    /// The irrigation controller deployment: channels
    /// 7 and 12, tank fill on channel 7 at 06:00 for 15 minutes.
    fn default() -> Self {
        let channels = ChannelSet::new([ChannelId(7), ChannelId(12)]);
        let schedule = vec![ScheduleEntry {
            channel: ChannelId(7),
            at: NaiveTime::from_hms_opt(6, 0, 0).unwrap_or_default(),
            minutes: 15,
        }];
        let driver = DriverSection::default();
        let time_sync = TimeSyncSection::default();
        Self {
            bind: default_bind(),
            driver: DriverConfig {
                kind: driver.kind,
                command: driver.command,
                call_timeout: Duration::from_millis(driver.call_timeout_ms),
            },
            time_sync: TimeSyncConfig {
                kind: time_sync.kind,
                remediation: time_sync.remediation,
            },
            channels,
            schedule,
            timing: Timing::default(),
        }
    }
}

impl RelayConfig {
    /// Parse and validate the YAML file at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, the YAML is structurally
    /// invalid, or any cross-field check fails.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading relay configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid configuration file: {}", path.display()))
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let file: ConfigFile =
            serde_yaml::from_str(content).context("Failed to parse YAML configuration")?;

        // ── Channels ──────────────────────────────────────────────────────────
        if file.channels.is_empty() {
            bail!("`channels` must list at least one channel");
        }
        let mut seen = BTreeSet::new();
        for ch in &file.channels {
            if !seen.insert(*ch) {
                bail!("channel {} is listed twice", ch);
            }
        }
        let channels = ChannelSet::new(file.channels.into_iter().map(ChannelId));

        // ── Schedule ──────────────────────────────────────────────────────────
        let mut schedule = Vec::new();
        for (ch, entries) in file.schedule {
            let channel = ChannelId(ch);
            if !channels.contains(channel) {
                bail!("schedule refers to channel {} which is not configured", ch);
            }
            for entry in entries {
                let at = parse_time_of_day(&entry.at)
                    .with_context(|| format!("channel {}: bad schedule time", ch))?;
                if entry.minutes == 0 {
                    bail!("channel {}: schedule at {} has zero minutes", ch, entry.at);
                }
                debug!(channel = ch, at = %at, minutes = entry.minutes, "schedule entry");
                schedule.push(ScheduleEntry {
                    channel,
                    at,
                    minutes: entry.minutes,
                });
            }
        }

        let timing = build_timing(file.timing)?;

        if file.driver.call_timeout_ms == 0 {
            bail!("driver.call_timeout_ms must be positive");
        }

        let cfg = Self {
            bind: file.http.bind,
            driver: DriverConfig {
                kind: file.driver.kind,
                command: file.driver.command,
                call_timeout: Duration::from_millis(file.driver.call_timeout_ms),
            },
            time_sync: TimeSyncConfig {
                kind: file.time_sync.kind,
                remediation: file.time_sync.remediation,
            },
            channels,
            schedule,
            timing,
        };

        info!(
            channels = cfg.channels.len(),
            schedule_entries = cfg.schedule.len(),
            driver = ?cfg.driver.kind,
            "Relay configuration loaded"
        );

        Ok(cfg)
    }
}

/// Accepts `HH:MM` and `HH:MM:SS`.
fn parse_time_of_day(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .with_context(|| format!("'{}' is not a valid HH:MM[:SS] time of day", s))
}

fn build_timing(section: TimingSection) -> Result<Timing> {
    let d = Timing::default();
    let ms = |v: Option<u64>, fallback: Duration| v.map(Duration::from_millis).unwrap_or(fallback);

    let timing = Timing {
        poll_interval: ms(section.poll_interval_ms, d.poll_interval),
        monitor_period: ms(section.monitor_period_ms, d.monitor_period),
        scheduler_period: ms(section.scheduler_period_ms, d.scheduler_period),
        retry_attempts: section.retry_attempts.unwrap_or(d.retry_attempts),
        retry_delay: ms(section.retry_delay_ms, d.retry_delay),
        overrun_warn_factor: section.overrun_warn_factor.unwrap_or(d.overrun_warn_factor),
        reclaim_factor: section.reclaim_factor.unwrap_or(d.reclaim_factor),
        shutdown_grace: ms(section.shutdown_grace_ms, d.shutdown_grace),
        misfire_grace: ms(section.misfire_grace_ms, d.misfire_grace),
    };

    if timing.retry_attempts == 0 {
        bail!("timing.retry_attempts must be at least 1");
    }
    if timing.poll_interval.is_zero()
        || timing.monitor_period.is_zero()
        || timing.scheduler_period.is_zero()
    {
        bail!("timing periods must be positive");
    }
    if !(timing.overrun_warn_factor >= 1.0 && timing.overrun_warn_factor <= timing.reclaim_factor)
    {
        bail!(
            "timing factors must satisfy 1.0 <= overrun_warn_factor ({}) <= reclaim_factor ({})",
            timing.overrun_warn_factor,
            timing.reclaim_factor
        );
    }
    if !timing.reclaim_factor.is_finite() {
        bail!("timing.reclaim_factor must be finite");
    }

    Ok(timing)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Helper: write a YAML string to a temp file and return it.
    fn yaml_tempfile(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn default_config_matches_deployed_controller() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.channels, ChannelSet::new([ChannelId(7), ChannelId(12)]));
        assert_eq!(cfg.schedule.len(), 1);
        assert_eq!(cfg.schedule[0].channel, ChannelId(7));
        assert_eq!(cfg.schedule[0].at, NaiveTime::from_hms_opt(6, 0, 0).unwrap());
        assert_eq!(cfg.schedule[0].minutes, 15);
        assert_eq!(cfg.driver.call_timeout, Duration::from_secs(2));
        assert_eq!(cfg.bind.port(), 80);
    }

    #[test]
    fn default_timing_matches_production_values() {
        let t = Timing::default();
        assert_eq!(t.poll_interval, Duration::from_secs(1));
        assert_eq!(t.monitor_period, Duration::from_secs(5));
        assert_eq!(t.scheduler_period, Duration::from_secs(30));
        assert_eq!(t.retry_attempts, 5);
        assert_eq!(t.retry_delay, Duration::from_millis(500));
        assert_eq!(t.overrun_warn_factor, 1.2);
        assert_eq!(t.reclaim_factor, 1.5);
    }

    // ── load_from_file ────────────────────────────────────────────────────────

    #[test]
    fn load_full_yaml() {
        let yaml = r#"
http:
  bind: "127.0.0.1:8080"
driver:
  kind: fake
  call_timeout_ms: 1500
time_sync:
  kind: assume_synced
channels: [7, 12]
schedule:
  7:
    - at: "06:00"
      minutes: 15
    - at: "18:30:15"
      minutes: 5
  12:
    - at: "21:00"
      minutes: 1
timing:
  retry_attempts: 3
  monitor_period_ms: 2000
"#;
        let f = yaml_tempfile(yaml);
        let cfg = RelayConfig::load_from_file(f.path()).unwrap();

        assert_eq!(cfg.bind, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(cfg.driver.kind, DriverKind::Fake);
        assert_eq!(cfg.driver.command, "gpio");
        assert_eq!(cfg.driver.call_timeout, Duration::from_millis(1500));
        assert_eq!(cfg.time_sync.kind, TimeSyncKind::AssumeSynced);
        assert_eq!(cfg.schedule.len(), 3);
        assert_eq!(
            cfg.schedule[1].at,
            NaiveTime::from_hms_opt(18, 30, 15).unwrap()
        );
        assert_eq!(cfg.timing.retry_attempts, 3);
        assert_eq!(cfg.timing.monitor_period, Duration::from_secs(2));
        // untouched values keep their defaults
        assert_eq!(cfg.timing.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn minimal_yaml_uses_defaults() {
        let cfg = RelayConfig::from_yaml_str("channels: [3]\n").unwrap();
        assert!(cfg.channels.contains(ChannelId(3)));
        assert!(cfg.schedule.is_empty());
        assert_eq!(cfg.driver.kind, DriverKind::Gpio);
        assert_eq!(cfg.time_sync.kind, TimeSyncKind::Timedatectl);
        assert_eq!(cfg.timing, Timing::default());
    }

    #[test]
    fn missing_file_returns_error() {
        let result = RelayConfig::load_from_file(Path::new("/nonexistent/path/relayd.yaml"));
        assert!(result.is_err());
    }

    #[test]
    fn malformed_yaml_returns_error() {
        let f = yaml_tempfile("this is: not: valid: yaml: content:::");
        assert!(RelayConfig::load_from_file(f.path()).is_err());
    }

    // ── Validation ────────────────────────────────────────────────────────────

    #[test]
    fn empty_channel_list_is_rejected() {
        assert!(RelayConfig::from_yaml_str("channels: []\n").is_err());
    }

    #[test]
    fn duplicate_channel_is_rejected() {
        assert!(RelayConfig::from_yaml_str("channels: [7, 7]\n").is_err());
    }

    #[test]
    fn schedule_for_unconfigured_channel_is_rejected() {
        let yaml = "channels: [7]\nschedule:\n  12:\n    - at: \"06:00\"\n      minutes: 5\n";
        let err = RelayConfig::from_yaml_str(yaml).unwrap_err();
        assert!(format!("{err:#}").contains("not configured"));
    }

    #[test]
    fn zero_minute_schedule_is_rejected() {
        let yaml = "channels: [7]\nschedule:\n  7:\n    - at: \"06:00\"\n      minutes: 0\n";
        assert!(RelayConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn bad_time_of_day_is_rejected() {
        let yaml = "channels: [7]\nschedule:\n  7:\n    - at: \"25:00\"\n      minutes: 5\n";
        assert!(RelayConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn inverted_factors_are_rejected() {
        let yaml = "channels: [7]\ntiming:\n  overrun_warn_factor: 2.0\n  reclaim_factor: 1.5\n";
        assert!(RelayConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn zero_retry_attempts_is_rejected() {
        let yaml = "channels: [7]\ntiming:\n  retry_attempts: 0\n";
        assert!(RelayConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert!(RelayConfig::from_yaml_str("channels: [7]\npins: [1]\n").is_err());
    }
}
