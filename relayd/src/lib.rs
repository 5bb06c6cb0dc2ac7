/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! relayd – time-bounded, fail-safe relay actuation daemon
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── task          – ChannelId, ActiveTask, Trigger
//! ├── config/       – YAML / default configuration
//! ├── driver/       – PinDriver trait, gpio command backend, fake backend
//! ├── supervisor    – bounded-retry force_off
//! ├── registry      – active task registry
//! ├── controller/   – timed activations + ActivationError
//! ├── monitor       – overrun reclaim loop
//! ├── scheduler/    – daily triggers, clock, time-sync health
//! ├── shutdown      – emergency sweep + signal coordination
//! ├── engine        – owned context, background task set
//! └── http/         – /timer and /emergency_stop
//! ```

pub mod config;
pub mod controller;
pub mod driver;
pub mod engine;
pub mod http;
pub mod monitor;
pub mod registry;
pub mod scheduler;
pub mod shutdown;
pub mod supervisor;
pub mod task;
