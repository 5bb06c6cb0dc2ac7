/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Shared registry of in-flight activations: `ChannelId → ActiveTask`.
//!
//! ## Rules
//! - At most one record per channel.
//! - Every operation holds the mutex only for a map operation; no I/O and
//!   no `.await` inside the critical section.
//! - A poisoned mutex is recovered, never propagated: the safety paths
//!   (monitor, emergency shutdown) must always be able to reach the map.
//! - Once [`close`](TaskRegistry::close)d, admission is refused for good.
//!   The flag lives under the same mutex as the map, so no activation can
//!   be admitted after the shutdown sweep has started.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::task::{ActiveTask, ChannelId};

/// Admission was refused because the channel already has an activation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("channel {channel} already has an active task (id {existing_id})")]
pub struct ChannelBusy {
    pub channel: ChannelId,
    pub existing_id: u64,
}

/// Why [`TaskRegistry::try_register`] refused a task.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdmissionRefused {
    #[error(transparent)]
    Busy(#[from] ChannelBusy),

    #[error("registry closed, shutdown in progress")]
    Closed,
}

#[derive(Debug, Default)]
struct Slots {
    tasks: HashMap<ChannelId, ActiveTask>,
    closed: bool,
}

/// Mutex-guarded map of active tasks.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    slots: Mutex<Slots>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `task`, overwriting any record already held for its channel.
    /// Does not consult the closed flag.
    ///
    /// Returns the record that was replaced, if any.
    pub fn register(&self, task: ActiveTask) -> Option<ActiveTask> {
        self.lock().tasks.insert(task.channel, task)
    }

    /// Insert `task` only if the registry is open and its channel is idle.
    pub fn try_register(&self, task: ActiveTask) -> Result<(), AdmissionRefused> {
        let mut slots = self.lock();
        if slots.closed {
            return Err(AdmissionRefused::Closed);
        }
        if let Some(existing) = slots.tasks.get(&task.channel) {
            return Err(ChannelBusy {
                channel: task.channel,
                existing_id: existing.id,
            }
            .into());
        }
        slots.tasks.insert(task.channel, task);
        Ok(())
    }

    /// Refuse every later [`try_register`](Self::try_register).  Idempotent.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Remove whatever record `channel` holds.
    pub fn remove(&self, channel: ChannelId) -> Option<ActiveTask> {
        self.lock().tasks.remove(&channel)
    }

    /// Remove the record for `channel` only if it is activation `id`.
    ///
    /// Returns `true` if a record was removed.
    pub fn remove_task(&self, channel: ChannelId, id: u64) -> bool {
        let mut slots = self.lock();
        match slots.tasks.get(&channel) {
            Some(t) if t.id == id => {
                slots.tasks.remove(&channel);
                true
            }
            _ => false,
        }
    }

    /// `true` if activation `id` still owns `channel`.
    pub fn holds(&self, channel: ChannelId, id: u64) -> bool {
        self.lock().tasks.get(&channel).is_some_and(|t| t.id == id)
    }

    pub fn get(&self, channel: ChannelId) -> Option<ActiveTask> {
        self.lock().tasks.get(&channel).cloned()
    }

    /// Copy of every record, sorted by channel.
    pub fn snapshot(&self) -> Vec<(ChannelId, ActiveTask)> {
        let mut v: Vec<_> = self
            .lock()
            .tasks
            .iter()
            .map(|(ch, t)| (*ch, t.clone()))
            .collect();
        v.sort_by_key(|(ch, _)| *ch);
        v
    }

    /// Drop every record, returning what was removed.
    pub fn clear(&self) -> Vec<ActiveTask> {
        self.lock().tasks.drain().map(|(_, t)| t).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().tasks.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Trigger;

    fn task(ch: u32) -> ActiveTask {
        ActiveTask::start(ChannelId(ch), 1, Trigger::Api)
    }

    #[test]
    fn register_overwrites_previous_record() {
        let reg = TaskRegistry::new();
        let first = task(7);
        let second = task(7);
        assert!(reg.register(first.clone()).is_none());
        assert_eq!(reg.register(second.clone()), Some(first));
        assert_eq!(reg.get(ChannelId(7)), Some(second));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn try_register_rejects_busy_channel() {
        let reg = TaskRegistry::new();
        let first = task(7);
        reg.try_register(first.clone()).unwrap();
        let err = reg.try_register(task(7)).unwrap_err();
        assert_eq!(
            err,
            AdmissionRefused::Busy(ChannelBusy {
                channel: ChannelId(7),
                existing_id: first.id,
            })
        );
        // a different channel is unaffected
        reg.try_register(task(12)).unwrap();
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn closed_registry_refuses_admission_but_keeps_cleanup_working() {
        let reg = TaskRegistry::new();
        let running = task(7);
        reg.try_register(running.clone()).unwrap();

        reg.close();
        reg.close();
        assert!(reg.is_closed());
        assert_eq!(reg.try_register(task(12)), Err(AdmissionRefused::Closed));
        assert!(reg.get(ChannelId(12)).is_none());

        // records admitted before closing can still be removed
        assert!(reg.remove_task(ChannelId(7), running.id));
        assert_eq!(reg.try_register(task(7)), Err(AdmissionRefused::Closed));
        assert!(reg.is_empty());
    }

    #[test]
    fn remove_task_ignores_stale_id() {
        let reg = TaskRegistry::new();
        let old = task(7);
        let new = task(7);
        reg.register(new.clone());
        assert!(!reg.remove_task(ChannelId(7), old.id));
        assert!(reg.holds(ChannelId(7), new.id));
        assert!(reg.remove_task(ChannelId(7), new.id));
        assert!(reg.is_empty());
    }

    #[test]
    fn snapshot_is_sorted_and_detached() {
        let reg = TaskRegistry::new();
        reg.register(task(12));
        reg.register(task(7));
        let snap = reg.snapshot();
        assert_eq!(
            snap.iter().map(|(ch, _)| ch.0).collect::<Vec<_>>(),
            vec![7, 12]
        );
        reg.clear();
        assert_eq!(snap.len(), 2, "snapshot must not observe later mutation");
        assert!(reg.is_empty());
    }

    #[test]
    fn remove_and_clear_are_idempotent() {
        let reg = TaskRegistry::new();
        reg.register(task(7));
        assert!(reg.remove(ChannelId(7)).is_some());
        assert!(reg.remove(ChannelId(7)).is_none());
        assert!(reg.clear().is_empty());
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        use std::sync::Arc;
        let reg = Arc::new(TaskRegistry::new());
        reg.register(task(7));
        let r = reg.clone();
        let _ = std::thread::spawn(move || {
            let _guard = r.slots.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert_eq!(reg.len(), 1);
        assert!(reg.remove(ChannelId(7)).is_some());
    }
}
