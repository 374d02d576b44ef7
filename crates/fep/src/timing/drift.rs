// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Drift accounting of the timing master.
//!
//! Two deviations are tracked:
//! - **Wall-clock**: master tick emission vs. its scheduled deadline, and per
//!   client the delay between a tick and the client's acknowledgement
//! - **Simulation time**: the sim time a client reports in its ack vs. the sim
//!   time of the tick it answers

use super::types::Timestamp;
use std::collections::BTreeMap;

/// Running min/avg/max over microsecond samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriftStats {
    samples: u64,
    min_us: Timestamp,
    max_us: Timestamp,
    sum_us: i128,
}

impl DriftStats {
    pub fn record(&mut self, value_us: Timestamp) {
        if self.samples == 0 {
            self.min_us = value_us;
            self.max_us = value_us;
        } else {
            self.min_us = self.min_us.min(value_us);
            self.max_us = self.max_us.max(value_us);
        }
        self.samples += 1;
        self.sum_us += i128::from(value_us);
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Smallest sample (0 without samples).
    pub fn min_us(&self) -> Timestamp {
        self.min_us
    }

    /// Largest sample (0 without samples).
    pub fn max_us(&self) -> Timestamp {
        self.max_us
    }

    /// Mean of all samples (0.0 without samples).
    pub fn avg_us(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.sum_us as f64 / self.samples as f64
        }
    }
}

/// Drift of one client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientDrift {
    /// Tick emission to ack arrival.
    pub ack_latency: DriftStats,
    /// Reported sim time minus the tick's sim time.
    pub sim_time: DriftStats,
}

/// Snapshot of all drift statistics of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriftReport {
    /// Tick emission minus wall-clock deadline (`SYSTEM_TIME` only).
    pub tick: DriftStats,
    pub clients: BTreeMap<String, ClientDrift>,
}

impl DriftReport {
    pub fn client(&self, participant: &str) -> Option<&ClientDrift> {
        self.clients.get(participant)
    }

    pub(crate) fn record_ack(
        &mut self,
        participant: &str,
        latency_us: Timestamp,
        sim_deviation_us: Timestamp,
    ) {
        let client = self.clients.entry(participant.to_string()).or_default();
        client.ack_latency.record(latency_us);
        client.sim_time.record(sim_deviation_us);
    }
}
