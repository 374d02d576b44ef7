// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Step-based distributed timing.
//!
//! One participant hosts the [`TimingMaster`]; every participant with step
//! listeners runs a [`TimingClient`]. The master collects the step schedules,
//! broadcasts [`TriggerTick`]s and waits for the [`TriggerAck`] of every due
//! step before advancing simulation time.
//!
//! ```text
//!   master                         client
//!     | ---- GetSchedule (*) ------> |
//!     | <--- Schedule -------------- |
//!     | ---- Trigger t=0 ----------> | step callbacks
//!     | <--- Ack (per step) -------- |
//!     | ---- Trigger t=10ms -------> |
//! ```

mod client;
mod config_file;
mod data_access;
mod drift;
mod master;
mod schedule;
mod types;

pub use client::{StepCallback, TimingClient};
pub use config_file::{ParticipantTiming, TimingConfiguration};
pub use data_access::{SampleStore, StepDataAccess};
pub use drift::{ClientDrift, DriftReport, DriftStats};
pub use master::{AckState, MasterSettings, ParticipantAckState, TimingMaster};
pub use schedule::ScheduleMap;
pub use types::{
    step_id, DataSample, RuntimeViolation, ScheduleConfig, ScheduleNotification, StepConfig,
    Timestamp, TimingState, TriggerAck, TriggerMode, TriggerTick,
};
