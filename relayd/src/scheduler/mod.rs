//! Daily trigger scheduler.
//!
//! [`Scheduler`] owns the static schedule table.  Every `scheduler_period`
//! it asks the [`TimeSync`] collaborator whether the host clock can be
//! trusted:
//!
//! * **synchronized** – every job whose next run is due is fired
//!   (fire-and-forget [`RelayController::activate`]) and rescheduled for the
//!   next day.  A job found more than `misfire_grace` late is skipped
//!   instead of fired, then rescheduled.
//! * **not synchronized** – nothing fires and nothing is rescheduled; a
//!   warning is logged and remediation is requested.
//!
//! The sync query may take a while.  A cycle that finds the token cancelled
//! once the query returns does nothing; admission is closed by then anyway.
//!
//! # Example
//! ```rust,ignore
//! let scheduler = Scheduler::new(&cfg.schedule, controller, time_sync, clock, &cfg.timing);
//! tokio::spawn(scheduler.run(token));
//! ```

pub mod clock;
pub mod timesync;

pub use clock::{Clock, ManualClock, SystemClock};
pub use timesync::{AssumeSynced, TimeSync, TimedatectlSync};

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDateTime, NaiveTime};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ScheduleEntry, Timing};
use crate::controller::RelayController;
use crate::task::{ChannelId, Trigger};

// ── Job bookkeeping ───────────────────────────────────────────────────────────

/// A schedule entry plus the wall-clock instant it next fires.
#[derive(Debug, Clone)]
struct Job {
    entry: ScheduleEntry,
    next_run: NaiveDateTime,
}

/// First occurrence of `at` strictly after `now`.
fn next_occurrence(at: NaiveTime, now: NaiveDateTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

/// What one evaluation cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cycle {
    /// Clock not trusted: nothing evaluated, remediation requested.
    Desynchronized,
    /// Shutdown began while the cycle was running: nothing evaluated.
    Stopped,
    /// Clock trusted: due jobs handled.
    Evaluated {
        /// Channels whose activation was started.
        fired: Vec<ChannelId>,
        /// Channels whose due job did not start (too late, busy or shutting
        /// down).  A job skipped for lateness loses that day's run; it is
        /// not caught up later.
        skipped: Vec<ChannelId>,
    },
}

// ── Scheduler ─────────────────────────────────────────────────────────────────

pub struct Scheduler {
    jobs: Vec<Job>,
    controller: RelayController,
    time_sync: Arc<dyn TimeSync>,
    clock: Arc<dyn Clock>,
    period: Duration,
    misfire_grace: ChronoDuration,
}

impl Scheduler {
    pub fn new(
        entries: &[ScheduleEntry],
        controller: RelayController,
        time_sync: Arc<dyn TimeSync>,
        clock: Arc<dyn Clock>,
        timing: &Timing,
    ) -> Self {
        let now = clock.now();
        let jobs = entries
            .iter()
            .map(|entry| Job {
                entry: entry.clone(),
                next_run: next_occurrence(entry.at, now),
            })
            .collect();

        Self {
            jobs,
            controller,
            time_sync,
            clock,
            period: timing.scheduler_period,
            misfire_grace: ChronoDuration::from_std(timing.misfire_grace)
                .unwrap_or_else(|_| ChronoDuration::seconds(60)),
        }
    }

    /// Next fire time of each job, in table order.
    pub fn next_runs(&self) -> Vec<(ChannelId, NaiveDateTime)> {
        self.jobs
            .iter()
            .map(|j| (j.entry.channel, j.next_run))
            .collect()
    }

    /// Evaluate until `token` is cancelled.
    pub async fn run(mut self, token: CancellationToken) {
        info!("scheduler starting");
        for job in &self.jobs {
            info!(
                channel = %job.entry.channel,
                at = %job.entry.at.format("%H:%M:%S"),
                minutes = job.entry.minutes,
                next_run = %job.next_run,
                "scheduled"
            );
        }

        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick(&token).await;
                }
            }
        }
        info!("scheduler stopped");
    }

    /// One evaluation cycle.  `token` is re-checked after the sync query.
    pub async fn tick(&mut self, token: &CancellationToken) -> Cycle {
        let synchronized = self.time_sync.is_synchronized().await;
        if token.is_cancelled() {
            info!("shutdown began during scheduler cycle, nothing fired");
            return Cycle::Stopped;
        }
        if !synchronized {
            warn!("clock not synchronized, skipping scheduled triggers");
            self.time_sync.remediate().await;
            return Cycle::Desynchronized;
        }

        let now = self.clock.now();
        let mut fired = Vec::new();
        let mut skipped = Vec::new();

        for job in &mut self.jobs {
            if job.next_run > now {
                continue;
            }
            let channel = job.entry.channel;
            let late = now - job.next_run;

            if late > self.misfire_grace {
                warn!(
                    channel = %channel,
                    due = %job.next_run,
                    late_s = late.num_seconds(),
                    "schedule missed its window, skipping"
                );
                skipped.push(channel);
            } else {
                match self.controller.activate(
                    channel,
                    i64::from(job.entry.minutes),
                    Trigger::Schedule,
                ) {
                    // fire-and-forget: the handle is dropped, the activation keeps running
                    Ok(_handle) => fired.push(channel),
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "scheduled activation refused");
                        skipped.push(channel);
                    }
                }
            }

            job.next_run = next_occurrence(job.entry.at, now);
        }

        Cycle::Evaluated { fired, skipped }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
