// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timing master: drives the distributed step clock.
//!
//! # Protocol
//!
//! 1. `configure` broadcasts `GetSchedule`; every client with step listeners
//!    answers with a `Schedule` notification
//! 2. `start` folds all schedules into a [`ScheduleMap`] and spawns the tick
//!    thread
//! 3. For each slot with due steps the tick thread broadcasts a
//!    [`TriggerTick`] and waits until every due step acknowledged
//!
//! # Stragglers
//!
//! A tick waits at most the ack timeout. Participants still missing an ack
//! after that are marked [`AckState::TimedOut`], a `StragglerTimedOut`
//! incident is raised, and their steps no longer hold back later ticks. Late
//! acks of a timed-out participant are ignored until the next `start`.
//!
//! # Pacing
//!
//! - `AFAP`: next tick as soon as the current one is complete
//! - `SYSTEM_TIME`: additionally waits for `start + sim_time / factor`
//!   (factor 0 disables the wall-clock wait)
//!
//! Every wait of the tick thread is sliced to [`TIMING_WAIT_SLICE`] so `stop`
//! is observed promptly.

use super::drift::DriftReport;
use super::schedule::ScheduleMap;
use super::types::{
    ScheduleConfig, ScheduleNotification, Timestamp, TimingState, TriggerAck, TriggerMode,
    TriggerTick,
};
use crate::command::{Command, CommandListener, CommandTransmitter, Dispatch, GetScheduleCommand};
use crate::config::{
    paths, PropertyTree, BROADCAST_RECEIVER, DEFAULT_ACK_TIMEOUT_S, DEFAULT_SPEED_FACTOR,
    DEFAULT_TRIGGER_MODE, TIMING_WAIT_SLICE,
};
use crate::error::{Error, Result};
use crate::incident::{Incident, IncidentCode, IncidentHandler, Severity};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Master settings read from the property tree on `configure`.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterSettings {
    pub trigger_mode: TriggerMode,
    /// Wall-clock scale of `SYSTEM_TIME` (0 = unthrottled).
    pub speed_factor: f64,
    pub ack_timeout: Duration,
    /// Forced tick period in `SYSTEM_TIME` (0 = none).
    pub min_trigger_time_us: Timestamp,
}

impl Default for MasterSettings {
    fn default() -> Self {
        Self {
            trigger_mode: TriggerMode::Afap,
            speed_factor: DEFAULT_SPEED_FACTOR,
            ack_timeout: Duration::from_secs(DEFAULT_ACK_TIMEOUT_S as u64),
            min_trigger_time_us: 0,
        }
    }
}

impl MasterSettings {
    /// Read and validate the timing master keys.
    pub fn from_properties(properties: &dyn PropertyTree) -> Result<Self> {
        let trigger_mode: TriggerMode = properties
            .get_string(paths::TIMING_TRIGGER_MODE)
            .unwrap_or_else(|| DEFAULT_TRIGGER_MODE.to_string())
            .parse()?;

        let speed_factor = properties
            .get_f64(paths::TIMING_SPEED_FACTOR)
            .unwrap_or(DEFAULT_SPEED_FACTOR);
        if !speed_factor.is_finite() || speed_factor < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "speed factor must be >= 0 (got {})",
                speed_factor
            )));
        }

        let ack_timeout = match properties.get_i64(paths::TIMING_ACK_TIMEOUT_MS) {
            Some(ms) if ms > 0 => Duration::from_millis(ms as u64),
            _ => {
                let secs = properties
                    .get_i64(paths::TIMING_ACK_TIMEOUT_S)
                    .unwrap_or(DEFAULT_ACK_TIMEOUT_S);
                if secs <= 0 {
                    return Err(Error::InvalidArgument(format!(
                        "acknowledgement timeout must be > 0 (got {} s)",
                        secs
                    )));
                }
                Duration::from_secs(secs as u64)
            }
        };

        let min_trigger_ms = properties
            .get_i64(paths::TIMING_MIN_TRIGGER_TIME_MS)
            .unwrap_or(0);
        if min_trigger_ms < 0 {
            return Err(Error::InvalidArgument(format!(
                "minimum trigger time must be >= 0 (got {} ms)",
                min_trigger_ms
            )));
        }

        Ok(Self {
            trigger_mode,
            speed_factor,
            ack_timeout,
            min_trigger_time_us: min_trigger_ms * 1000,
        })
    }
}

/// Acknowledgement state of one timing client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    /// Known from an earlier run, no schedule received for the current one.
    Unregistered,
    /// Schedule received; waiting for (or not yet due for) an ack.
    Registered,
    /// Acknowledged its steps of the latest tick.
    Acked,
    /// Missed the ack timeout; excluded until the next `start`.
    TimedOut,
}

/// Per-client bookkeeping of the master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantAckState {
    pub participant: String,
    /// Number of the last tick (1-based) this client acknowledged.
    pub last_acked_cycle: u64,
    pub state: AckState,
}

#[derive(Debug, Clone, Copy)]
struct TickInfo {
    number: u64,
    sent: Instant,
    sim_time_us: Timestamp,
}

struct MasterCore {
    state: TimingState,
    settings: MasterSettings,
    /// Schedules announced over the bus, by participant.
    remote: BTreeMap<String, Vec<ScheduleConfig>>,
    /// Schedules registered in-process, by participant.
    local: BTreeMap<String, Vec<ScheduleConfig>>,
    clients: BTreeMap<String, ParticipantAckState>,
    step_owner: HashMap<String, String>,
    /// Steps of timed-out participants.
    excluded: HashSet<String>,
    schedule: ScheduleMap,
    tick: Option<TickInfo>,
    drift: DriftReport,
}

impl MasterCore {
    fn register(&mut self, participant: &str) {
        self.clients
            .entry(participant.to_string())
            .and_modify(|c| c.state = AckState::Registered)
            .or_insert_with(|| ParticipantAckState {
                participant: participant.to_string(),
                last_acked_cycle: 0,
                state: AckState::Registered,
            });
    }

    fn registered_count(&self) -> usize {
        self.clients
            .values()
            .filter(|c| c.state != AckState::Unregistered)
            .count()
    }

    /// Local schedules take precedence over a bus announcement of the same participant.
    fn all_configs(&self) -> Vec<ScheduleConfig> {
        let remote = self
            .remote
            .iter()
            .filter(|(participant, _)| !self.local.contains_key(*participant))
            .map(|(_, steps)| steps);
        self.local
            .values()
            .chain(remote)
            .flatten()
            .cloned()
            .collect()
    }
}

struct MasterShared {
    name: String,
    properties: Arc<dyn PropertyTree>,
    transmitter: Arc<dyn CommandTransmitter>,
    incidents: Arc<dyn IncidentHandler>,
    core: Mutex<MasterCore>,
    /// Signalled on acks, schedules and stop.
    changed: Condvar,
    running: AtomicBool,
    current_time: AtomicI64,
}

/// Local state of the tick thread.
struct TickLoop {
    started: Instant,
    initial: bool,
    sim_time_us: Timestamp,
    since_last_tick_us: Timestamp,
    ticks: u64,
}

impl MasterShared {
    fn raise(&self, code: IncidentCode, severity: Severity, description: String) {
        self.incidents
            .invoke(&Incident::new(code, severity, &self.name, description));
    }

    fn run(self: Arc<Self>) {
        let mut tick_loop = TickLoop {
            started: Instant::now(),
            initial: true,
            sim_time_us: 0,
            since_last_tick_us: 0,
            ticks: 0,
        };
        let mut need_wait = false;

        while self.running.load(Ordering::Acquire) {
            if need_wait {
                if !self.wait_for_completion() {
                    break;
                }
            }
            if !self.wait_for_deadline(&tick_loop) {
                break;
            }
            need_wait = self.next_slot(&mut tick_loop);
        }
        log::debug!(
            "timing master '{}': tick thread exits after {} ticks",
            self.name,
            tick_loop.ticks
        );
    }

    /// Advance to the next slot and trigger it if anything is due.
    ///
    /// Returns whether the caller has to wait for acknowledgements.
    fn next_slot(&self, tick_loop: &mut TickLoop) -> bool {
        let mut core = self.core.lock();
        if tick_loop.initial {
            tick_loop.initial = false;
        } else {
            core.schedule.increment();
        }
        let cycle = core.schedule.cycle_time();

        let mut need_wait = false;
        let mut trigger = None;
        if core.schedule.has_steps_in_current() {
            need_wait = core.schedule.is_configured_step();
            tick_loop.ticks += 1;

            let due = core.schedule.pending_steps();
            let excluded: Vec<String> = due
                .iter()
                .filter(|step| core.excluded.contains(*step))
                .cloned()
                .collect();
            for step in &excluded {
                core.schedule.mark_step(step);
            }
            let owners: BTreeSet<String> = due
                .iter()
                .filter_map(|step| core.step_owner.get(step).cloned())
                .collect();
            for owner in owners {
                if let Some(client) = core.clients.get_mut(&owner) {
                    if client.state != AckState::TimedOut {
                        client.state = AckState::Registered;
                    }
                }
            }

            core.tick = Some(TickInfo {
                number: tick_loop.ticks,
                sent: Instant::now(),
                sim_time_us: tick_loop.sim_time_us,
            });
            if let Some(deadline) = self.deadline(&core.settings, tick_loop) {
                let late = Instant::now().saturating_duration_since(deadline);
                core.drift.tick.record(late.as_micros() as Timestamp);
            }
            trigger = Some(TriggerTick {
                sender: self.name.clone(),
                current_time_us: tick_loop.sim_time_us,
                sim_time_step_us: tick_loop.since_last_tick_us,
            });
        }
        drop(core);

        if let Some(tick) = trigger {
            self.current_time
                .store(tick.current_time_us, Ordering::Release);
            log::debug!(
                "timing master '{}': tick {} us (+{} us)",
                self.name,
                tick.current_time_us,
                tick.sim_time_step_us
            );
            if let Err(e) = self.transmitter.transmit(Command::Trigger(tick)) {
                self.raise(
                    IncidentCode::NotificationFailed,
                    Severity::Warning,
                    format!("trigger transmission failed: {}", e),
                );
            }
            tick_loop.since_last_tick_us = 0;
        }

        tick_loop.since_last_tick_us += cycle;
        tick_loop.sim_time_us += cycle;
        need_wait
    }

    /// Wall-clock deadline of the slot at `tick_loop.sim_time_us`, if paced.
    fn deadline(&self, settings: &MasterSettings, tick_loop: &TickLoop) -> Option<Instant> {
        if settings.trigger_mode != TriggerMode::SystemTime || settings.speed_factor <= 0.0 {
            return None;
        }
        let wall_secs = tick_loop.sim_time_us as f64 / 1_000_000.0 / settings.speed_factor;
        Some(tick_loop.started + Duration::from_secs_f64(wall_secs))
    }

    /// Sleep until the slot deadline. False if stopped meanwhile.
    fn wait_for_deadline(&self, tick_loop: &TickLoop) -> bool {
        let mut core = self.core.lock();
        let Some(deadline) = self.deadline(&core.settings, tick_loop) else {
            return self.running.load(Ordering::Acquire);
        };
        loop {
            if !self.running.load(Ordering::Acquire) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let slice = (deadline - now).min(TIMING_WAIT_SLICE);
            self.changed.wait_for(&mut core, slice);
        }
    }

    /// Block until the current slot is complete. False if stopped meanwhile.
    fn wait_for_completion(&self) -> bool {
        let mut core = self.core.lock();
        loop {
            if !self.running.load(Ordering::Acquire) {
                return false;
            }
            if core.schedule.is_complete() {
                return true;
            }
            let elapsed = core
                .tick
                .map(|t| t.sent.elapsed())
                .unwrap_or_default();
            let ack_timeout = core.settings.ack_timeout;
            if elapsed >= ack_timeout {
                self.time_out_stragglers(&mut core);
                continue;
            }
            let slice = (ack_timeout - elapsed).min(TIMING_WAIT_SLICE);
            self.changed.wait_for(&mut core, slice);
        }
    }

    fn time_out_stragglers(&self, core: &mut MutexGuard<'_, MasterCore>) {
        let pending = core.schedule.pending_steps();
        let mut stragglers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for step in pending {
            let owner = core
                .step_owner
                .get(&step)
                .cloned()
                .unwrap_or_else(|| step.clone());
            stragglers.entry(owner).or_default().push(step);
        }

        let timeout_ms = core.settings.ack_timeout.as_millis();
        let sim_time = core.tick.map(|t| t.sim_time_us).unwrap_or_default();
        for (participant, steps) in stragglers {
            let owned: Vec<String> = core
                .step_owner
                .iter()
                .filter(|(_, owner)| **owner == participant)
                .map(|(step, _)| step.clone())
                .collect();
            core.excluded.extend(owned);
            core.excluded.extend(steps.iter().cloned());
            for step in &steps {
                core.schedule.mark_step(step);
            }
            if let Some(client) = core.clients.get_mut(&participant) {
                client.state = AckState::TimedOut;
            }
            self.raise(
                IncidentCode::StragglerTimedOut,
                Severity::Warning,
                format!(
                    "participant '{}' did not acknowledge {:?} at {} us within {} ms; excluded from further ticks",
                    participant, steps, sim_time, timeout_ms
                ),
            );
        }
    }

    fn handle_ack(&self, ack: &TriggerAck) {
        let mut core = self.core.lock();
        if core.state != TimingState::Running {
            log::debug!(
                "timing master '{}': ack for '{}' while {:?}",
                self.name,
                ack.step_id,
                core.state
            );
            return;
        }
        let Some(owner) = core.step_owner.get(&ack.step_id).cloned() else {
            drop(core);
            self.raise(
                IncidentCode::UnknownStep,
                Severity::Warning,
                format!(
                    "ack from '{}' for unscheduled step '{}'",
                    ack.sender, ack.step_id
                ),
            );
            return;
        };
        if owner != ack.sender {
            log::warn!(
                "timing master '{}': '{}' acknowledged step '{}' owned by '{}'; ignored",
                self.name,
                ack.sender,
                ack.step_id,
                owner
            );
            return;
        }
        if core.excluded.contains(&ack.step_id) {
            log::debug!(
                "timing master '{}': late ack of timed-out '{}' ignored",
                self.name,
                ack.step_id
            );
            return;
        }
        if !core.schedule.mark_step(&ack.step_id) {
            log::debug!(
                "timing master '{}': ack for '{}' not due in current slot",
                self.name,
                ack.step_id
            );
            return;
        }

        if let Some(tick) = core.tick {
            let latency = tick.sent.elapsed().as_micros() as Timestamp;
            let deviation = ack.current_sim_time_us - tick.sim_time_us;
            core.drift.record_ack(&owner, latency, deviation);
            if let Some(client) = core.clients.get_mut(&owner) {
                client.state = AckState::Acked;
                client.last_acked_cycle = tick.number;
            }
        }
        drop(core);
        self.changed.notify_all();
    }

    fn handle_schedule(&self, notification: &ScheduleNotification) {
        let mut core = self.core.lock();
        if core.state == TimingState::Running {
            log::warn!(
                "timing master '{}': schedule of '{}' arrived while running; applied on next start",
                self.name,
                notification.sender
            );
        }
        core.remote
            .insert(notification.sender.clone(), notification.steps.clone());
        core.register(&notification.sender);
        log::info!(
            "timing master '{}': '{}' registered {} step(s)",
            self.name,
            notification.sender,
            notification.steps.len()
        );
        drop(core);
        self.changed.notify_all();
    }
}

/// Timing master of one participant.
pub struct TimingMaster {
    shared: Arc<MasterShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TimingMaster {
    pub fn new(
        name: &str,
        properties: Arc<dyn PropertyTree>,
        transmitter: Arc<dyn CommandTransmitter>,
        incidents: Arc<dyn IncidentHandler>,
    ) -> Self {
        Self {
            shared: Arc::new(MasterShared {
                name: name.to_string(),
                properties,
                transmitter,
                incidents,
                core: Mutex::new(MasterCore {
                    state: TimingState::Idle,
                    settings: MasterSettings::default(),
                    remote: BTreeMap::new(),
                    local: BTreeMap::new(),
                    clients: BTreeMap::new(),
                    step_owner: HashMap::new(),
                    excluded: HashSet::new(),
                    schedule: ScheduleMap::new(),
                    tick: None,
                    drift: DriftReport::default(),
                }),
                changed: Condvar::new(),
                running: AtomicBool::new(false),
                current_time: AtomicI64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> TimingState {
        self.shared.core.lock().state
    }

    /// Settings in effect since the last `configure`.
    pub fn settings(&self) -> MasterSettings {
        self.shared.core.lock().settings.clone()
    }

    /// Read the settings and ask every participant for its schedule.
    ///
    /// Schedules arrive asynchronously; use [`await_clients`](Self::await_clients)
    /// to wait for them.
    pub fn configure(&self) -> Result<()> {
        let settings = MasterSettings::from_properties(self.shared.properties.as_ref())?;
        {
            let mut core = self.shared.core.lock();
            if !matches!(core.state, TimingState::Idle | TimingState::Ready) {
                return Err(Error::InvalidState(format!(
                    "timing master '{}' is {:?}",
                    self.shared.name, core.state
                )));
            }
            core.state = TimingState::Initializing;
            core.settings = settings;
            core.remote.clear();
            for client in core.clients.values_mut() {
                client.state = AckState::Unregistered;
            }
            let local: Vec<String> = core.local.keys().cloned().collect();
            for participant in local {
                core.register(&participant);
            }
        }

        let request = Command::GetSchedule(GetScheduleCommand {
            sender: self.shared.name.clone(),
            receiver: BROADCAST_RECEIVER.to_string(),
        });
        if let Err(e) = self.shared.transmitter.transmit(request) {
            self.shared.core.lock().state = TimingState::Idle;
            return Err(e);
        }

        let mut core = self.shared.core.lock();
        core.state = TimingState::Ready;
        log::info!(
            "timing master '{}' configured ({}, factor {}, ack timeout {:?})",
            self.shared.name,
            core.settings.trigger_mode,
            core.settings.speed_factor,
            core.settings.ack_timeout
        );
        Ok(())
    }

    /// Add the schedule of an in-process client without a bus round trip.
    pub fn register_local_schedule(&self, participant: &str, steps: Vec<ScheduleConfig>) {
        let mut core = self.shared.core.lock();
        core.local.insert(participant.to_string(), steps);
        core.register(participant);
        drop(core);
        self.shared.changed.notify_all();
    }

    /// Wait until at least `count` clients announced their schedule.
    pub fn await_clients(&self, count: usize, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut core = self.shared.core.lock();
        while core.registered_count() < count {
            if self
                .shared
                .changed
                .wait_until(&mut core, deadline)
                .timed_out()
            {
                return if core.registered_count() >= count {
                    Ok(())
                } else {
                    Err(Error::Timeout)
                };
            }
        }
        Ok(())
    }

    /// Build the schedule and start the tick thread.
    pub fn start(&self) -> Result<()> {
        let mut core = self.shared.core.lock();
        if core.state != TimingState::Ready {
            return Err(Error::InvalidState(format!(
                "timing master '{}' is {:?}, expected Ready",
                self.shared.name, core.state
            )));
        }

        let mut configs = core.all_configs();
        if configs.is_empty() {
            return Err(Error::InvalidState(format!(
                "timing master '{}' has no registered steps",
                self.shared.name
            )));
        }
        if core.settings.trigger_mode == TriggerMode::SystemTime
            && core.settings.min_trigger_time_us > 0
        {
            configs.push(ScheduleConfig {
                step_id: String::new(),
                participant: String::new(),
                cycle_time_us: core.settings.min_trigger_time_us,
            });
        }
        if let Err(e) = core.schedule.configure(&configs) {
            drop(core);
            self.shared.raise(
                IncidentCode::NotificationFailed,
                Severity::CriticalGlobal,
                format!("schedule not computed: {}", e),
            );
            return Err(e);
        }

        core.step_owner = configs
            .iter()
            .filter(|c| !c.step_id.is_empty())
            .map(|c| (c.step_id.clone(), c.participant.clone()))
            .collect();
        core.excluded.clear();
        core.tick = None;
        core.drift = DriftReport::default();
        for client in core.clients.values_mut() {
            if client.state != AckState::Unregistered {
                client.state = AckState::Registered;
            }
            client.last_acked_cycle = 0;
        }
        self.shared.current_time.store(0, Ordering::Release);
        self.shared.running.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("fep-master-{}", self.shared.name))
            .spawn(move || shared.run())
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                Error::Unexpected(format!("spawn tick thread: {}", e))
            })?;
        *self.worker.lock() = Some(handle);
        core.state = TimingState::Running;
        log::info!(
            "timing master '{}' started: cycle {} us, {} slots, {} client(s)",
            self.shared.name,
            core.schedule.cycle_time(),
            core.schedule.len(),
            core.registered_count()
        );
        Ok(())
    }

    /// Stop the tick thread. Safe to call in any state.
    pub fn stop(&self) -> Result<()> {
        {
            let mut core = self.shared.core.lock();
            match core.state {
                TimingState::Running => core.state = TimingState::Stopping,
                TimingState::Stopping => {}
                _ => {
                    core.state = TimingState::Idle;
                    return Ok(());
                }
            }
        }
        self.shared.running.store(false, Ordering::Release);
        self.shared.changed.notify_all();

        if let Some(handle) = self.worker.lock().take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                log::warn!("timing master '{}': tick thread panicked", self.shared.name);
            }
        }

        let mut core = self.shared.core.lock();
        core.schedule.reset();
        core.tick = None;
        core.state = TimingState::Idle;
        log::info!(
            "timing master '{}' stopped at {} us",
            self.shared.name,
            self.shared.current_time.load(Ordering::Acquire)
        );
        Ok(())
    }

    /// Simulation time of the latest tick.
    pub fn current_time(&self) -> Timestamp {
        self.shared.current_time.load(Ordering::Acquire)
    }

    pub fn ack_state(&self, participant: &str) -> Option<ParticipantAckState> {
        self.shared.core.lock().clients.get(participant).cloned()
    }

    pub fn ack_states(&self) -> Vec<ParticipantAckState> {
        self.shared.core.lock().clients.values().cloned().collect()
    }

    /// Drift statistics of the current (or last) run.
    pub fn drift_stats(&self) -> DriftReport {
        self.shared.core.lock().drift.clone()
    }
}

impl CommandListener for TimingMaster {
    fn on_schedule(&self, cmd: &ScheduleNotification) -> Dispatch {
        if cmd.receiver != self.shared.name {
            return Dispatch::Ignored;
        }
        self.shared.handle_schedule(cmd);
        Dispatch::Handled
    }

    fn on_ack(&self, ack: &TriggerAck) -> Dispatch {
        if ack.receiver != self.shared.name {
            return Dispatch::Ignored;
        }
        self.shared.handle_ack(ack);
        Dispatch::Handled
    }
}

impl Drop for TimingMaster {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl std::fmt::Debug for TimingMaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimingMaster")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("current_time", &self.current_time())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PropertyStore, PropertyValue};
    use crate::incident::IncidentRecorder;
    use crossbeam::channel::{self, Receiver, Sender};

    /// Forwards every transmitted command to a channel.
    struct Tap(Sender<Command>);

    impl CommandTransmitter for Tap {
        fn transmit(&self, command: Command) -> Result<()> {
            let _ = self.0.send(command);
            Ok(())
        }
    }

    fn master(props: &PropertyStore) -> (TimingMaster, Receiver<Command>, Arc<IncidentRecorder>) {
        let (tx, rx) = channel::unbounded();
        let recorder = Arc::new(IncidentRecorder::new());
        let master = TimingMaster::new(
            "master",
            Arc::new(props.clone()),
            Arc::new(Tap(tx)),
            recorder.clone(),
        );
        (master, rx, recorder)
    }

    fn step(participant: &str, name: &str, cycle: Timestamp) -> ScheduleConfig {
        ScheduleConfig {
            step_id: crate::timing::step_id(participant, name),
            participant: participant.into(),
            cycle_time_us: cycle,
        }
    }

    fn next_tick(rx: &Receiver<Command>) -> TriggerTick {
        loop {
            match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
                Command::Trigger(t) => return t,
                _ => continue,
            }
        }
    }

    fn ack(participant: &str, name: &str, sim: Timestamp) -> TriggerAck {
        TriggerAck {
            sender: participant.into(),
            receiver: "master".into(),
            step_id: crate::timing::step_id(participant, name),
            operational_time_us: 1,
            current_sim_time_us: sim,
        }
    }

    #[test]
    fn test_settings_validation() {
        let props = PropertyStore::with_defaults();
        let settings = MasterSettings::from_properties(&props).unwrap();
        assert_eq!(settings.trigger_mode, TriggerMode::Afap);
        assert_eq!(settings.ack_timeout, Duration::from_secs(10));

        props.set(paths::TIMING_ACK_TIMEOUT_MS, PropertyValue::Int(250));
        assert_eq!(
            MasterSettings::from_properties(&props).unwrap().ack_timeout,
            Duration::from_millis(250)
        );

        props.set(paths::TIMING_SPEED_FACTOR, PropertyValue::Float(-1.0));
        assert!(matches!(
            MasterSettings::from_properties(&props),
            Err(Error::InvalidArgument(_))
        ));

        let props = PropertyStore::with_defaults();
        props.set(paths::TIMING_ACK_TIMEOUT_S, PropertyValue::Int(0));
        assert!(MasterSettings::from_properties(&props).is_err());

        let props = PropertyStore::with_defaults();
        props.set(paths::TIMING_TRIGGER_MODE, "EXTERNAL_CLOCK".into());
        assert!(MasterSettings::from_properties(&props).is_err());
    }

    #[test]
    fn test_configure_broadcasts_get_schedule() {
        let props = PropertyStore::with_defaults();
        let (master, rx, _) = master(&props);
        master.configure().unwrap();
        assert_eq!(master.state(), TimingState::Ready);
        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            Command::GetSchedule(cmd) => {
                assert_eq!(cmd.sender, "master");
                assert_eq!(cmd.receiver, "*");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_schedule_registration_and_await() {
        let props = PropertyStore::with_defaults();
        let (master, _rx, _) = master(&props);
        master.configure().unwrap();
        assert!(matches!(
            master.await_clients(1, Duration::from_millis(50)),
            Err(Error::Timeout)
        ));

        let notification = ScheduleNotification {
            sender: "a".into(),
            receiver: "master".into(),
            steps: vec![step("a", "s", 10)],
        };
        assert_eq!(master.on_schedule(&notification), Dispatch::Handled);
        master.await_clients(1, Duration::from_millis(50)).unwrap();
        assert_eq!(master.ack_state("a").unwrap().state, AckState::Registered);

        let foreign = ScheduleNotification {
            receiver: "other".into(),
            ..notification
        };
        assert_eq!(master.on_schedule(&foreign), Dispatch::Ignored);
    }

    #[test]
    fn test_start_requires_ready_and_steps() {
        let props = PropertyStore::with_defaults();
        let (master, _rx, _) = master(&props);
        assert!(matches!(master.start(), Err(Error::InvalidState(_))));
        master.configure().unwrap();
        assert!(matches!(master.start(), Err(Error::InvalidState(_))));
        assert!(master.stop().is_ok());
        assert_eq!(master.state(), TimingState::Idle);
    }

    #[test]
    fn test_afap_waits_for_ack_then_advances() {
        let props = PropertyStore::with_defaults();
        let (master, rx, _) = master(&props);
        master.register_local_schedule("a", vec![step("a", "s", 10_000)]);
        master.configure().unwrap();
        master.start().unwrap();

        let first = next_tick(&rx);
        assert_eq!(first.current_time_us, 0);
        assert_eq!(first.sim_time_step_us, 0);
        // no second tick before the ack
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        master.on_ack(&ack("a", "s", 0));
        let second = next_tick(&rx);
        assert_eq!(second.current_time_us, 10_000);
        assert_eq!(second.sim_time_step_us, 10_000);
        assert_eq!(master.ack_state("a").unwrap().last_acked_cycle, 1);

        master.stop().unwrap();
        assert_eq!(master.state(), TimingState::Idle);
        let drift = master.drift_stats();
        assert_eq!(drift.client("a").unwrap().sim_time.max_us(), 0);
    }

    #[test]
    fn test_unknown_step_ack_raises_incident() {
        let props = PropertyStore::with_defaults();
        let (master, rx, recorder) = master(&props);
        master.register_local_schedule("a", vec![step("a", "s", 10)]);
        master.configure().unwrap();
        master.start().unwrap();
        let _ = next_tick(&rx);

        master.on_ack(&ack("a", "ghost", 0));
        assert_eq!(recorder.count(IncidentCode::UnknownStep), 1);
        master.stop().unwrap();
    }

    #[test]
    fn test_ack_from_non_owner_is_ignored() {
        let props = PropertyStore::with_defaults();
        let (master, rx, _) = master(&props);
        master.register_local_schedule("a", vec![step("a", "s", 10_000)]);
        master.register_local_schedule("b", vec![step("b", "s", 10_000)]);
        master.configure().unwrap();
        master.start().unwrap();
        let _ = next_tick(&rx);

        master.on_ack(&ack("b", "s", 0));
        // "b" answers for the step of "a" as well
        master.on_ack(&TriggerAck {
            sender: "b".into(),
            ..ack("a", "s", 0)
        });
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_ne!(master.ack_state("a").unwrap().state, AckState::Acked);

        master.on_ack(&ack("a", "s", 0));
        assert_eq!(next_tick(&rx).current_time_us, 10_000);
        master.stop().unwrap();
    }

    #[test]
    fn test_straggler_timed_out_and_excluded() {
        let props = PropertyStore::with_defaults();
        props.set(paths::TIMING_ACK_TIMEOUT_MS, PropertyValue::Int(150));
        let (master, rx, recorder) = master(&props);
        master.register_local_schedule("fast", vec![step("fast", "s", 10)]);
        master.register_local_schedule("slow", vec![step("slow", "s", 10)]);
        master.configure().unwrap();
        master.start().unwrap();

        let t0 = next_tick(&rx);
        master.on_ack(&ack("fast", "s", t0.current_time_us));
        // "slow" never answers: the next tick comes after the ack timeout
        let t1 = next_tick(&rx);
        assert_eq!(t1.current_time_us, 10);
        assert_eq!(master.ack_state("slow").unwrap().state, AckState::TimedOut);
        assert_eq!(recorder.count(IncidentCode::StragglerTimedOut), 1);

        // later ticks only wait for "fast"
        let started = Instant::now();
        master.on_ack(&ack("fast", "s", t1.current_time_us));
        let t2 = next_tick(&rx);
        assert_eq!(t2.current_time_us, 20);
        assert!(started.elapsed() < Duration::from_millis(150));
        assert_eq!(recorder.count(IncidentCode::StragglerTimedOut), 1);
        master.stop().unwrap();
    }
}
