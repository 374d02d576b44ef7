// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timing protocol entities exchanged between master and clients.
//!
//! All times are simulation microseconds unless the field name says otherwise.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Microsecond timestamp.
pub type Timestamp = i64;

/// Step trigger broadcast by the master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerTick {
    /// Master participant name.
    pub sender: String,
    /// Simulation time of this tick.
    pub current_time_us: Timestamp,
    /// Simulation time elapsed since the previous tick.
    pub sim_time_step_us: Timestamp,
}

/// Step acknowledgement sent by a client after a step finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerAck {
    /// Client participant name.
    pub sender: String,
    /// Master participant name.
    pub receiver: String,
    /// Qualified step id (see [`step_id`]).
    pub step_id: String,
    /// Wall-clock runtime of the step callback.
    pub operational_time_us: Timestamp,
    /// Simulation time the step ran for.
    pub current_sim_time_us: Timestamp,
}

/// One scheduled step as announced by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub step_id: String,
    pub participant: String,
    pub cycle_time_us: Timestamp,
}

/// Answer to `GetSchedule`: the step list of one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleNotification {
    pub sender: String,
    pub receiver: String,
    pub steps: Vec<ScheduleConfig>,
}

/// Signal sample carried on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSample {
    pub sender: String,
    pub signal: String,
    /// Simulation time the sample is valid for.
    pub time_us: Timestamp,
    pub payload: Vec<u8>,
}

/// Bus-wide id of a step: `<participant>/<step>`.
pub fn step_id(participant: &str, step: &str) -> String {
    format!("{}/{}", participant, step)
}

/// How the master paces ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerMode {
    /// Next tick as soon as every required ack arrived.
    #[default]
    Afap,
    /// Ticks follow wall-clock time scaled by the speed factor.
    SystemTime,
}

impl FromStr for TriggerMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "AFAP" => Ok(TriggerMode::Afap),
            "SYSTEM_TIME" => Ok(TriggerMode::SystemTime),
            other => Err(Error::InvalidArgument(format!(
                "unknown trigger mode '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerMode::Afap => write!(f, "AFAP"),
            TriggerMode::SystemTime => write!(f, "SYSTEM_TIME"),
        }
    }
}

/// Reaction when a step overruns its runtime or is triggered while still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeViolation {
    #[default]
    Ignore,
    Warn,
    /// Warn and suppress the step's outputs for this cycle.
    SkipOutput,
    /// Raise a critical incident, withhold the ack and move the client to `Error`.
    SetError,
}

/// Step listener configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConfig {
    /// Period of the step.
    pub cycle_time_us: Timestamp,
    /// Runtime budget of one invocation (0 = unbounded).
    #[serde(default)]
    pub max_runtime_us: Timestamp,
    #[serde(default)]
    pub runtime_violation: RuntimeViolation,
    /// Signals the step reads.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Signals the step writes.
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl StepConfig {
    pub fn new(cycle_time_us: Timestamp) -> Self {
        Self {
            cycle_time_us,
            max_runtime_us: 0,
            runtime_violation: RuntimeViolation::Ignore,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_runtime(mut self, max_runtime_us: Timestamp, strategy: RuntimeViolation) -> Self {
        self.max_runtime_us = max_runtime_us;
        self.runtime_violation = strategy;
        self
    }

    pub fn with_input(mut self, signal: &str) -> Self {
        self.inputs.push(signal.to_string());
        self
    }

    pub fn with_output(mut self, signal: &str) -> Self {
        self.outputs.push(signal.to_string());
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.cycle_time_us <= 0 {
            return Err(Error::InvalidArgument(format!(
                "cycle time must be > 0 (got {} us)",
                self.cycle_time_us
            )));
        }
        if self.max_runtime_us < 0 {
            return Err(Error::InvalidArgument("max runtime must be >= 0".into()));
        }
        Ok(())
    }
}

/// Lifecycle of the timing master and timing client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingState {
    Idle,
    Initializing,
    Ready,
    Running,
    Stopping,
    /// Fatal timing fault (client only); left via `stop`.
    Error,
}
