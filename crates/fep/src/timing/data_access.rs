// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Signal access of step callbacks.
//!
//! Inbound [`DataSample`]s are kept in a per-client [`SampleStore`] (latest
//! sample per signal). A step reads them through its [`StepDataAccess`],
//! which remembers what the step already consumed so a stale input is
//! reported as `OutOfSync` instead of being silently reused.
//!
//! Outputs written during a step are buffered and published when the step
//! finished, unless the step is in skip mode (runtime violation).

use super::types::{DataSample, StepConfig, Timestamp};
use crate::command::{Command, CommandTransmitter};
use crate::error::{Error, Result};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct StoredSample {
    seq: u64,
    sample: DataSample,
}

/// Latest sample per signal, shared by all steps of a client.
#[derive(Debug, Default)]
pub struct SampleStore {
    latest: DashMap<String, StoredSample>,
    next_seq: AtomicU64,
}

impl SampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `sample` as the newest value of its signal.
    pub fn store(&self, sample: DataSample) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.latest
            .insert(sample.signal.clone(), StoredSample { seq, sample });
    }

    /// Newest sample of `signal`.
    pub fn latest(&self, signal: &str) -> Option<DataSample> {
        self.latest.get(signal).map(|s| s.sample.clone())
    }

    fn latest_with_seq(&self, signal: &str) -> Option<(u64, DataSample)> {
        self.latest
            .get(signal)
            .map(|s| (s.seq, s.sample.clone()))
    }

    /// Release all samples.
    pub fn clear(&self) {
        self.latest.clear();
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}

/// Data handle passed to a step callback.
pub struct StepDataAccess {
    participant: String,
    step: String,
    cycle_time_us: Timestamp,
    inputs: Vec<String>,
    outputs: Vec<String>,
    sim_time_us: Timestamp,
    store: Arc<SampleStore>,
    transmitter: Arc<dyn CommandTransmitter>,
    /// Sequence numbers consumed by previous invocations.
    consumed: HashMap<String, u64>,
    /// Sequence numbers read by the running invocation.
    reading: HashMap<String, u64>,
    outbox: Vec<DataSample>,
    skip: Arc<AtomicBool>,
}

impl StepDataAccess {
    pub(crate) fn new(
        participant: &str,
        step: &str,
        config: &StepConfig,
        store: Arc<SampleStore>,
        transmitter: Arc<dyn CommandTransmitter>,
        skip: Arc<AtomicBool>,
    ) -> Self {
        Self {
            participant: participant.to_string(),
            step: step.to_string(),
            cycle_time_us: config.cycle_time_us,
            inputs: config.inputs.clone(),
            outputs: config.outputs.clone(),
            sim_time_us: 0,
            store,
            transmitter,
            consumed: HashMap::new(),
            reading: HashMap::new(),
            outbox: Vec::new(),
            skip,
        }
    }

    pub(crate) fn reconfigure(&mut self, config: &StepConfig) {
        self.cycle_time_us = config.cycle_time_us;
        self.inputs = config.inputs.clone();
        self.outputs = config.outputs.clone();
    }

    /// Forget consumption history and pending outputs.
    pub(crate) fn reset(&mut self) {
        self.sim_time_us = 0;
        self.consumed.clear();
        self.reading.clear();
        self.outbox.clear();
    }

    pub(crate) fn begin_step(&mut self, sim_time_us: Timestamp) {
        self.sim_time_us = sim_time_us;
        self.reading.clear();
        self.outbox.clear();
    }

    /// Commit consumed inputs and publish buffered outputs.
    ///
    /// Returns the number of published samples; in skip mode the outputs are
    /// dropped and the skip flag is cleared.
    pub(crate) fn finish_step(&mut self) -> Result<usize> {
        self.consumed.extend(self.reading.drain());
        let outbox = std::mem::take(&mut self.outbox);
        if self.skip.swap(false, Ordering::AcqRel) {
            if !outbox.is_empty() {
                log::debug!(
                    "step '{}/{}': {} output(s) suppressed at {} us",
                    self.participant,
                    self.step,
                    outbox.len(),
                    self.sim_time_us
                );
            }
            return Ok(0);
        }
        let published = outbox.len();
        for sample in outbox {
            self.transmitter.transmit(Command::Data(sample))?;
        }
        Ok(published)
    }

    /// Simulation time of the running invocation.
    pub fn sim_time(&self) -> Timestamp {
        self.sim_time_us
    }

    pub fn cycle_time(&self) -> Timestamp {
        self.cycle_time_us
    }

    /// Outputs of the running invocation will not be published.
    pub fn skip_outputs(&self) -> bool {
        self.skip.load(Ordering::Acquire)
    }

    /// Most recent sample of `signal`.
    ///
    /// `NotFound` if the signal never produced a sample, `OutOfSync` if no
    /// sample arrived since the previous invocation consumed it. Reading the
    /// same signal twice within one invocation returns the same sample.
    pub fn copy_recent_data(&mut self, signal: &str) -> Result<DataSample> {
        if !self.inputs.is_empty() && !self.inputs.iter().any(|s| s == signal) {
            return Err(Error::InvalidArgument(format!(
                "'{}' is not an input of step '{}'",
                signal, self.step
            )));
        }
        let (seq, sample) = self
            .store
            .latest_with_seq(signal)
            .ok_or_else(|| Error::NotFound(format!("signal '{}'", signal)))?;
        if self.consumed.get(signal) == Some(&seq) {
            return Err(Error::OutOfSync(signal.to_string()));
        }
        self.reading.insert(signal.to_string(), seq);
        Ok(sample)
    }

    /// Queue an output sample, valid at the end of this cycle.
    pub fn transmit_data(&mut self, signal: &str, payload: Vec<u8>) -> Result<()> {
        if !self.outputs.is_empty() && !self.outputs.iter().any(|s| s == signal) {
            return Err(Error::InvalidArgument(format!(
                "'{}' is not an output of step '{}'",
                signal, self.step
            )));
        }
        self.outbox.push(DataSample {
            sender: self.participant.clone(),
            signal: signal.to_string(),
            time_us: self.sim_time_us + self.cycle_time_us,
            payload,
        });
        Ok(())
    }
}

impl std::fmt::Debug for StepDataAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepDataAccess")
            .field("participant", &self.participant)
            .field("step", &self.step)
            .field("cycle_time_us", &self.cycle_time_us)
            .field("sim_time_us", &self.sim_time_us)
            .finish()
    }
}
