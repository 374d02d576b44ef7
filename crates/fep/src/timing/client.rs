// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timing client: runs step listeners on master triggers.
//!
//! # Lifecycle
//!
//! ```text
//! Idle --register--> Initializing --configure--> Ready --start--> Running
//!   ^                                                                |
//!   +--------------------------- stop -------------------------------+
//! ```
//!
//! `stop` unregisters every step listener and releases the received samples.
//! Fatal timing faults (out-of-order trigger, `SetError` runtime violation)
//! move the client to `Error`, which is left through `stop` as well.
//!
//! # Threading
//!
//! Triggers arrive on the bus delivery thread. Due steps are queued to one
//! worker thread per client, which runs them in ascending cycle time (then
//! name), publishes their outputs and acknowledges each step to the master.
//! The worker also runs the system-timeout watchdog.

use super::config_file::TimingConfiguration;
use super::data_access::{SampleStore, StepDataAccess};
use super::types::{
    step_id, DataSample, RuntimeViolation, ScheduleConfig, ScheduleNotification, StepConfig,
    Timestamp, TimingState, TriggerAck, TriggerTick,
};
use crate::clock::ClockService;
use crate::command::{Command, CommandListener, CommandTransmitter, Dispatch, GetScheduleCommand};
use crate::config::{paths, PropertyTree, DEFAULT_SYSTEM_TIMEOUT_S, TIMING_WAIT_SLICE};
use crate::error::{Error, Result};
use crate::incident::{Incident, IncidentCode, IncidentHandler, Severity};
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Step callback: `(simulation time, data access)`.
pub type StepCallback = Box<dyn FnMut(Timestamp, &mut StepDataAccess) + Send>;

struct Task {
    name: String,
    step_id: String,
    config: RwLock<StepConfig>,
    callback: Mutex<StepCallback>,
    access: Mutex<StepDataAccess>,
    skip: Arc<AtomicBool>,
    /// Queued or running.
    pending: AtomicBool,
}

impl Task {
    fn cycle_time(&self) -> Timestamp {
        self.config.read().cycle_time_us
    }
}

struct Job {
    sim_time_us: Timestamp,
    tasks: Vec<Arc<Task>>,
}

struct ClientStatus {
    state: TimingState,
    master: String,
    system_timeout: Duration,
    current_sim_us: Timestamp,
    progress_sum_us: Timestamp,
    last_trigger: Instant,
    timed_out: bool,
}

struct ClientShared {
    name: String,
    properties: Arc<dyn PropertyTree>,
    transmitter: Arc<dyn CommandTransmitter>,
    incidents: Arc<dyn IncidentHandler>,
    tasks: RwLock<BTreeMap<String, Arc<Task>>>,
    status: Mutex<ClientStatus>,
    jobs: Mutex<Option<Sender<Job>>>,
    samples: Arc<SampleStore>,
    current_time: AtomicI64,
}

impl ClientShared {
    fn raise(&self, code: IncidentCode, severity: Severity, description: String) {
        self.incidents
            .invoke(&Incident::new(code, severity, &self.name, description));
    }

    fn enter_error(&self, reason: &str) {
        let mut status = self.status.lock();
        if status.state == TimingState::Running {
            status.state = TimingState::Error;
            log::error!("timing client '{}' in error: {}", self.name, reason);
        }
    }

    fn is_running(&self) -> bool {
        self.status.lock().state == TimingState::Running
    }

    fn master_name(&self) -> String {
        let configured = self.status.lock().master.clone();
        if configured.is_empty() {
            self.properties
                .get_string(paths::TIMING_MASTER_ELEMENT)
                .unwrap_or_default()
        } else {
            configured
        }
    }

    fn schedule(&self) -> Vec<ScheduleConfig> {
        self.tasks
            .read()
            .values()
            .map(|task| ScheduleConfig {
                step_id: task.step_id.clone(),
                participant: self.name.clone(),
                cycle_time_us: task.cycle_time(),
            })
            .collect()
    }

    /// Apply `strategy` to a violation. Returns whether the step may still be acked.
    fn apply_violation(&self, task: &Task, strategy: RuntimeViolation, what: &str) -> bool {
        match strategy {
            RuntimeViolation::Ignore => true,
            RuntimeViolation::Warn => {
                self.raise(
                    IncidentCode::RuntimeViolation,
                    Severity::Warning,
                    format!("step '{}': {}", task.name, what),
                );
                true
            }
            RuntimeViolation::SkipOutput => {
                task.skip.store(true, Ordering::Release);
                self.raise(
                    IncidentCode::RuntimeViolation,
                    Severity::Warning,
                    format!("step '{}': {}; outputs of this cycle are dropped", task.name, what),
                );
                true
            }
            RuntimeViolation::SetError => {
                task.skip.store(true, Ordering::Release);
                self.raise(
                    IncidentCode::RuntimeViolation,
                    Severity::CriticalLocal,
                    format!("step '{}': {}; client stops acknowledging", task.name, what),
                );
                self.enter_error(what);
                false
            }
        }
    }

    fn handle_trigger(&self, tick: &TriggerTick) {
        let mut status = self.status.lock();
        if status.state != TimingState::Running {
            return;
        }
        status.last_trigger = Instant::now();
        status.timed_out = false;

        let tasks: Vec<Arc<Task>> = self.tasks.read().values().cloned().collect();
        if status.current_sim_us > 0
            && !tasks.is_empty()
            && status.current_sim_us + tick.sim_time_step_us != tick.current_time_us
        {
            let expected = status.current_sim_us + tick.sim_time_step_us;
            status.state = TimingState::Error;
            drop(status);
            self.raise(
                IncidentCode::TriggerSkip,
                Severity::CriticalGlobal,
                format!(
                    "trigger out of order: got {} us, expected {} us",
                    tick.current_time_us, expected
                ),
            );
            return;
        }

        status.current_sim_us = tick.current_time_us;
        status.progress_sum_us += tick.sim_time_step_us;
        let progress = status.progress_sum_us;
        drop(status);
        self.current_time
            .store(tick.current_time_us, Ordering::Release);

        let mut due: Vec<Arc<Task>> = tasks
            .into_iter()
            .filter(|task| progress % task.cycle_time() == 0)
            .collect();
        due.sort_by(|a, b| {
            a.cycle_time()
                .cmp(&b.cycle_time())
                .then_with(|| a.name.cmp(&b.name))
        });

        let mut queued = Vec::with_capacity(due.len());
        for task in due {
            if task.pending.swap(true, Ordering::AcqRel) {
                let strategy = task.config.read().runtime_violation;
                self.apply_violation(
                    &task,
                    strategy,
                    "triggered before the previous invocation finished",
                );
            } else {
                queued.push(task);
            }
        }
        if queued.is_empty() {
            return;
        }

        let job = Job {
            sim_time_us: tick.current_time_us,
            tasks: queued,
        };
        if let Some(jobs) = self.jobs.lock().as_ref() {
            if jobs.send(job).is_err() {
                log::debug!("timing client '{}': worker gone, trigger dropped", self.name);
            }
        }
    }

    fn run(self: Arc<Self>, jobs: channel::Receiver<Job>) {
        loop {
            match jobs.recv_timeout(TIMING_WAIT_SLICE) {
                Ok(job) => self.run_job(job),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.check_system_timeout();
        }
        log::debug!("timing client '{}': worker exits", self.name);
    }

    fn run_job(&self, job: Job) {
        for task in job.tasks {
            if self.is_running() {
                self.execute(&task, job.sim_time_us);
            }
            task.pending.store(false, Ordering::Release);
        }
    }

    fn execute(&self, task: &Task, sim_time_us: Timestamp) {
        let (max_runtime_us, strategy) = {
            let config = task.config.read();
            (config.max_runtime_us, config.runtime_violation)
        };

        let mut access = task.access.lock();
        access.begin_step(sim_time_us);
        let started = Instant::now();
        let outcome = {
            let mut callback = task.callback.lock();
            panic::catch_unwind(AssertUnwindSafe(|| (*callback)(sim_time_us, &mut *access)))
        };
        let used_us = started.elapsed().as_micros() as Timestamp;

        if outcome.is_err() {
            drop(access);
            self.raise(
                IncidentCode::RuntimeViolation,
                Severity::CriticalLocal,
                format!("step '{}' panicked at {} us", task.name, sim_time_us),
            );
            self.enter_error("step callback panicked");
            return;
        }

        let mut acknowledge = true;
        if max_runtime_us > 0 && used_us > max_runtime_us {
            acknowledge = self.apply_violation(
                task,
                strategy,
                &format!("runtime {} us exceeds {} us", used_us, max_runtime_us),
            );
        }
        if let Err(e) = access.finish_step() {
            log::warn!(
                "timing client '{}': outputs of '{}' not published: {}",
                self.name,
                task.name,
                e
            );
        }
        drop(access);

        if !acknowledge {
            return;
        }
        let ack = Command::Ack(TriggerAck {
            sender: self.name.clone(),
            receiver: self.master_name(),
            step_id: task.step_id.clone(),
            operational_time_us: used_us,
            current_sim_time_us: sim_time_us,
        });
        if let Err(e) = self.transmitter.transmit(ack) {
            self.raise(
                IncidentCode::AckTransmitFailed,
                Severity::Warning,
                format!("ack of step '{}' not sent: {}", task.name, e),
            );
        }
    }

    fn check_system_timeout(&self) {
        let mut status = self.status.lock();
        if status.state != TimingState::Running
            || status.timed_out
            || status.last_trigger.elapsed() <= status.system_timeout
        {
            return;
        }
        status.timed_out = true;
        let timeout = status.system_timeout;
        drop(status);
        self.raise(
            IncidentCode::SystemTimeout,
            Severity::CriticalLocal,
            format!("no trigger received for {:?}", timeout),
        );
    }

    fn handle_get_schedule(&self, cmd: &GetScheduleCommand) {
        let steps = self.schedule();
        if steps.is_empty() {
            return;
        }
        let master = self.master_name();
        if cmd.sender != master {
            self.raise(
                IncidentCode::MasterMisconfiguration,
                Severity::CriticalGlobal,
                format!(
                    "GetSchedule from '{}' but the timing master is '{}'",
                    cmd.sender, master
                ),
            );
            return;
        }
        let notification = Command::Schedule(ScheduleNotification {
            sender: self.name.clone(),
            receiver: cmd.sender.clone(),
            steps,
        });
        if let Err(e) = self.transmitter.transmit(notification) {
            self.raise(
                IncidentCode::NotificationFailed,
                Severity::CriticalGlobal,
                format!("schedule not sent to '{}': {}", cmd.sender, e),
            );
        }
    }
}

/// Timing client of one participant.
pub struct TimingClient {
    shared: Arc<ClientShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TimingClient {
    pub fn new(
        name: &str,
        properties: Arc<dyn PropertyTree>,
        transmitter: Arc<dyn CommandTransmitter>,
        incidents: Arc<dyn IncidentHandler>,
    ) -> Self {
        Self {
            shared: Arc::new(ClientShared {
                name: name.to_string(),
                properties,
                transmitter,
                incidents,
                tasks: RwLock::new(BTreeMap::new()),
                status: Mutex::new(ClientStatus {
                    state: TimingState::Idle,
                    master: String::new(),
                    system_timeout: Duration::from_secs(DEFAULT_SYSTEM_TIMEOUT_S as u64),
                    current_sim_us: 0,
                    progress_sum_us: 0,
                    last_trigger: Instant::now(),
                    timed_out: false,
                }),
                jobs: Mutex::new(None),
                samples: Arc::new(SampleStore::new()),
                current_time: AtomicI64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> TimingState {
        self.shared.status.lock().state
    }

    /// Simulation time of the latest accepted trigger.
    pub fn current_time(&self) -> Timestamp {
        self.shared.current_time.load(Ordering::Acquire)
    }

    /// Samples received from the bus.
    pub fn samples(&self) -> &Arc<SampleStore> {
        &self.shared.samples
    }

    /// Names of the registered step listeners.
    pub fn step_listeners(&self) -> Vec<String> {
        self.shared.tasks.read().keys().cloned().collect()
    }

    /// Steps as announced to the master.
    pub fn schedule(&self) -> Vec<ScheduleConfig> {
        self.shared.schedule()
    }

    pub fn register_step_listener(
        &self,
        name: &str,
        config: StepConfig,
        callback: StepCallback,
    ) -> Result<()> {
        config.validate()?;
        let mut status = self.shared.status.lock();
        if matches!(status.state, TimingState::Running | TimingState::Error) {
            return Err(Error::InvalidState(format!(
                "timing client '{}' is {:?}",
                self.shared.name, status.state
            )));
        }
        let mut tasks = self.shared.tasks.write();
        if tasks.contains_key(name) {
            return Err(Error::AlreadyExists(format!("step listener '{}'", name)));
        }

        let skip = Arc::new(AtomicBool::new(false));
        let access = StepDataAccess::new(
            &self.shared.name,
            name,
            &config,
            Arc::clone(&self.shared.samples),
            Arc::clone(&self.shared.transmitter),
            Arc::clone(&skip),
        );
        tasks.insert(
            name.to_string(),
            Arc::new(Task {
                name: name.to_string(),
                step_id: step_id(&self.shared.name, name),
                config: RwLock::new(config),
                callback: Mutex::new(callback),
                access: Mutex::new(access),
                skip,
                pending: AtomicBool::new(false),
            }),
        );
        if status.state == TimingState::Idle {
            status.state = TimingState::Initializing;
        }
        log::info!("timing client '{}': step '{}' registered", self.shared.name, name);
        Ok(())
    }

    pub fn unregister_step_listener(&self, name: &str) -> Result<()> {
        let mut status = self.shared.status.lock();
        if matches!(status.state, TimingState::Running | TimingState::Error) {
            return Err(Error::InvalidState(format!(
                "timing client '{}' is {:?}",
                self.shared.name, status.state
            )));
        }
        let mut tasks = self.shared.tasks.write();
        if tasks.remove(name).is_none() {
            return Err(Error::NotFound(format!("step listener '{}'", name)));
        }
        if tasks.is_empty() {
            status.state = TimingState::Idle;
        }
        Ok(())
    }

    /// Apply the entries of `config` for this participant.
    ///
    /// Fails with `NotFound` for a step that is not registered.
    pub fn configure_from(&self, config: &TimingConfiguration) -> Result<()> {
        let Some(entry) = config.participant(&self.shared.name) else {
            log::debug!(
                "timing client '{}': no entry in timing configuration",
                self.shared.name
            );
            return Ok(());
        };
        if self.shared.is_running() {
            return Err(Error::InvalidState(format!(
                "timing client '{}' is running",
                self.shared.name
            )));
        }

        let tasks = self.shared.tasks.read();
        for (step, step_config) in &entry.steps {
            let task = tasks.get(step).ok_or_else(|| {
                Error::NotFound(format!(
                    "configured step listener '{}' is not registered",
                    step
                ))
            })?;
            step_config.validate()?;
            task.access.lock().reconfigure(step_config);
            *task.config.write() = step_config.clone();
        }
        if let Some(timeout) = entry.system_timeout_s {
            self.shared
                .properties
                .set(paths::TIMING_SYSTEM_TIMEOUT_S, timeout.into());
        }
        Ok(())
    }

    /// Read master name and system timeout; `Ready` afterwards.
    ///
    /// Without step listeners there is nothing to do and the client stays `Idle`.
    pub fn configure(&self) -> Result<()> {
        let mut status = self.shared.status.lock();
        if matches!(status.state, TimingState::Running | TimingState::Error) {
            return Err(Error::InvalidState(format!(
                "timing client '{}' is {:?}",
                self.shared.name, status.state
            )));
        }
        if self.shared.tasks.read().is_empty() {
            return Ok(());
        }

        let master = self
            .shared
            .properties
            .get_string(paths::TIMING_MASTER_ELEMENT)
            .unwrap_or_default();
        if master.is_empty() {
            return Err(Error::InvalidState(format!(
                "timing client '{}': no timing master configured",
                self.shared.name
            )));
        }
        let timeout_s = self
            .shared
            .properties
            .get_i64(paths::TIMING_SYSTEM_TIMEOUT_S)
            .unwrap_or(DEFAULT_SYSTEM_TIMEOUT_S);
        if timeout_s <= 0 {
            return Err(Error::InvalidArgument(format!(
                "system timeout must be > 0 (got {} s)",
                timeout_s
            )));
        }

        status.master = master;
        status.system_timeout = Duration::from_secs(timeout_s as u64);
        status.state = TimingState::Ready;
        log::info!(
            "timing client '{}' configured (master '{}')",
            self.shared.name,
            status.master
        );
        Ok(())
    }

    /// Override the system timeout (mainly for short-running setups).
    pub fn set_system_timeout(&self, timeout: Duration) {
        self.shared.status.lock().system_timeout = timeout;
    }

    /// Start accepting triggers. No-op without step listeners.
    pub fn start(&self) -> Result<()> {
        let mut status = self.shared.status.lock();
        if self.shared.tasks.read().is_empty() && status.state == TimingState::Idle {
            return Ok(());
        }
        if status.state != TimingState::Ready {
            return Err(Error::InvalidState(format!(
                "timing client '{}' is {:?}, expected Ready",
                self.shared.name, status.state
            )));
        }

        for task in self.shared.tasks.read().values() {
            task.pending.store(false, Ordering::Release);
            task.skip.store(false, Ordering::Release);
            task.access.lock().reset();
        }
        let (tx, rx) = channel::unbounded();
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("fep-timing-{}", self.shared.name))
            .spawn(move || shared.run(rx))
            .map_err(|e| Error::Unexpected(format!("spawn step worker: {}", e)))?;
        *self.shared.jobs.lock() = Some(tx);
        *self.worker.lock() = Some(handle);

        status.current_sim_us = 0;
        status.progress_sum_us = 0;
        status.last_trigger = Instant::now();
        status.timed_out = false;
        status.state = TimingState::Running;
        self.shared.current_time.store(0, Ordering::Release);
        log::info!("timing client '{}' started", self.shared.name);
        Ok(())
    }

    /// Stop the worker, unregister all step listeners and release samples.
    pub fn stop(&self) -> Result<()> {
        {
            let mut status = self.shared.status.lock();
            if status.state == TimingState::Idle {
                return Ok(());
            }
            status.state = TimingState::Stopping;
        }

        // Closing the job channel ends the worker after its current step.
        self.shared.jobs.lock().take();
        if let Some(handle) = self.worker.lock().take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                log::warn!("timing client '{}': worker panicked", self.shared.name);
            }
        }

        self.shared.tasks.write().clear();
        self.shared.samples.clear();
        let mut status = self.shared.status.lock();
        status.state = TimingState::Idle;
        status.current_sim_us = 0;
        status.progress_sum_us = 0;
        self.shared.current_time.store(0, Ordering::Release);
        log::info!("timing client '{}' stopped", self.shared.name);
        Ok(())
    }
}

impl CommandListener for TimingClient {
    fn on_get_schedule(&self, cmd: &GetScheduleCommand) -> Dispatch {
        if cmd.receiver != self.shared.name && cmd.receiver != crate::config::BROADCAST_RECEIVER {
            return Dispatch::Ignored;
        }
        self.shared.handle_get_schedule(cmd);
        Dispatch::Handled
    }

    fn on_trigger(&self, tick: &TriggerTick) -> Dispatch {
        if tick.sender != self.shared.master_name() {
            return Dispatch::Ignored;
        }
        self.shared.handle_trigger(tick);
        Dispatch::Handled
    }

    fn on_data(&self, sample: &DataSample) -> Dispatch {
        self.shared.samples.store(sample.clone());
        Dispatch::Handled
    }
}

impl ClockService for TimingClient {
    fn time_us(&self) -> Timestamp {
        self.current_time()
    }
}

impl Drop for TimingClient {
    fn drop(&mut self) {
        self.shared.jobs.lock().take();
        if let Some(handle) = self.worker.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl std::fmt::Debug for TimingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimingClient")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("steps", &self.step_listeners())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PropertyStore;
    use crate::incident::IncidentRecorder;
    use crossbeam::channel::Receiver;

    struct Tap(channel::Sender<Command>);

    impl CommandTransmitter for Tap {
        fn transmit(&self, command: Command) -> Result<()> {
            let _ = self.0.send(command);
            Ok(())
        }
    }

    fn client() -> (TimingClient, Receiver<Command>, Arc<IncidentRecorder>) {
        let props = PropertyStore::with_defaults();
        props.set(paths::TIMING_MASTER_ELEMENT, "master".into());
        let (tx, rx) = channel::unbounded();
        let recorder = Arc::new(IncidentRecorder::new());
        let client = TimingClient::new("c", Arc::new(props), Arc::new(Tap(tx)), recorder.clone());
        (client, rx, recorder)
    }

    fn tick(current: Timestamp, step: Timestamp) -> TriggerTick {
        TriggerTick {
            sender: "master".into(),
            current_time_us: current,
            sim_time_step_us: step,
        }
    }

    fn next_ack(rx: &Receiver<Command>) -> TriggerAck {
        loop {
            match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
                Command::Ack(a) => return a,
                _ => continue,
            }
        }
    }

    fn noop() -> StepCallback {
        Box::new(|_, _| {})
    }

    #[test]
    fn test_registration_rules() {
        let (client, _rx, _) = client();
        assert_eq!(client.state(), TimingState::Idle);
        client
            .register_step_listener("s", StepConfig::new(10), noop())
            .unwrap();
        assert_eq!(client.state(), TimingState::Initializing);
        assert!(matches!(
            client.register_step_listener("s", StepConfig::new(10), noop()),
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(
            client.register_step_listener("bad", StepConfig::new(0), noop()),
            Err(Error::InvalidArgument(_))
        ));

        client.configure().unwrap();
        client.start().unwrap();
        assert!(matches!(
            client.register_step_listener("t", StepConfig::new(10), noop()),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            client.unregister_step_listener("s"),
            Err(Error::InvalidState(_))
        ));

        client.stop().unwrap();
        assert_eq!(client.state(), TimingState::Idle);
        assert!(client.step_listeners().is_empty());
        assert!(matches!(
            client.unregister_step_listener("s"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_configure_requires_master() {
        let props = PropertyStore::with_defaults();
        let (tx, _rx) = channel::unbounded();
        let client = TimingClient::new(
            "c",
            Arc::new(props),
            Arc::new(Tap(tx)),
            Arc::new(IncidentRecorder::new()),
        );
        // nothing registered: nothing to configure
        client.configure().unwrap();
        assert_eq!(client.state(), TimingState::Idle);

        client
            .register_step_listener("s", StepConfig::new(10), noop())
            .unwrap();
        assert!(matches!(client.configure(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_steps_run_by_cycle_and_ack() {
        let (client, rx, _) = client();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (name, cycle) in [("slow", 20), ("fast", 10)] {
            let order = Arc::clone(&order);
            client
                .register_step_listener(
                    name,
                    StepConfig::new(cycle),
                    Box::new(move |t, _| order.lock().push((name, t))),
                )
                .unwrap();
        }
        client.configure().unwrap();
        client.start().unwrap();

        client.on_trigger(&tick(0, 0));
        let a = next_ack(&rx);
        let b = next_ack(&rx);
        assert_eq!(a.step_id, "c/fast");
        assert_eq!(b.step_id, "c/slow");
        assert_eq!(a.receiver, "master");

        client.on_trigger(&tick(10, 10));
        assert_eq!(next_ack(&rx).step_id, "c/fast");
        client.on_trigger(&tick(20, 10));
        let _ = next_ack(&rx);
        let _ = next_ack(&rx);
        assert_eq!(client.current_time(), 20);
        client.stop().unwrap();

        assert_eq!(
            *order.lock(),
            vec![("fast", 0), ("slow", 0), ("fast", 10), ("fast", 20), ("slow", 20)]
        );
    }

    #[test]
    fn test_out_of_order_trigger_is_fatal() {
        let (client, rx, recorder) = client();
        client
            .register_step_listener("s", StepConfig::new(10), noop())
            .unwrap();
        client.configure().unwrap();
        client.start().unwrap();

        client.on_trigger(&tick(0, 0));
        let _ = next_ack(&rx);
        client.on_trigger(&tick(10, 10));
        let _ = next_ack(&rx);
        client.on_trigger(&tick(40, 10));
        assert_eq!(client.state(), TimingState::Error);
        assert_eq!(recorder.count(IncidentCode::TriggerSkip), 1);
        client.stop().unwrap();
    }

    #[test]
    fn test_trigger_from_other_sender_ignored() {
        let (client, _rx, _) = client();
        let stranger = TriggerTick {
            sender: "impostor".into(),
            ..tick(0, 0)
        };
        assert_eq!(client.on_trigger(&stranger), Dispatch::Ignored);
    }

    #[test]
    fn test_runtime_violation_set_error_withholds_ack() {
        let (client, rx, recorder) = client();
        client
            .register_step_listener(
                "s",
                StepConfig::new(10).with_runtime(1_000, RuntimeViolation::SetError),
                Box::new(|_, _| thread::sleep(Duration::from_millis(20))),
            )
            .unwrap();
        client.configure().unwrap();
        client.start().unwrap();
        client.on_trigger(&tick(0, 0));

        let deadline = Instant::now() + Duration::from_secs(2);
        while client.state() != TimingState::Error && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(client.state(), TimingState::Error);
        assert_eq!(recorder.count(IncidentCode::RuntimeViolation), 1);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        client.stop().unwrap();
    }

    #[test]
    fn test_runtime_violation_warn_still_acks() {
        let (client, rx, recorder) = client();
        client
            .register_step_listener(
                "s",
                StepConfig::new(10).with_runtime(1_000, RuntimeViolation::Warn),
                Box::new(|_, _| thread::sleep(Duration::from_millis(20))),
            )
            .unwrap();
        client.configure().unwrap();
        client.start().unwrap();
        client.on_trigger(&tick(0, 0));
        let ack = next_ack(&rx);
        assert!(ack.operational_time_us >= 1_000);
        assert_eq!(recorder.count(IncidentCode::RuntimeViolation), 1);
        client.stop().unwrap();
    }

    #[test]
    fn test_get_schedule_from_wrong_master() {
        let (client, rx, recorder) = client();
        client
            .register_step_listener("s", StepConfig::new(10), noop())
            .unwrap();

        client.on_get_schedule(&GetScheduleCommand {
            sender: "master".into(),
            receiver: "*".into(),
        });
        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            Command::Schedule(n) => {
                assert_eq!(n.receiver, "master");
                assert_eq!(n.steps[0].step_id, "c/s");
                assert_eq!(n.steps[0].cycle_time_us, 10);
            }
            other => panic!("unexpected {:?}", other),
        }

        client.on_get_schedule(&GetScheduleCommand {
            sender: "rogue".into(),
            receiver: "*".into(),
        });
        assert_eq!(recorder.count(IncidentCode::MasterMisconfiguration), 1);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_system_timeout_raised_once() {
        let (client, _rx, recorder) = client();
        client
            .register_step_listener("s", StepConfig::new(10), noop())
            .unwrap();
        client.configure().unwrap();
        client.set_system_timeout(Duration::from_millis(50));
        client.start().unwrap();

        thread::sleep(Duration::from_millis(400));
        assert_eq!(recorder.count(IncidentCode::SystemTimeout), 1);

        // a trigger re-arms the watchdog
        client.on_trigger(&tick(0, 0));
        thread::sleep(Duration::from_millis(400));
        assert_eq!(recorder.count(IncidentCode::SystemTimeout), 2);
        client.stop().unwrap();
    }

    #[test]
    fn test_configure_from_file_entries() {
        let (client, _rx, _) = client();
        client
            .register_step_listener("s", StepConfig::new(10), noop())
            .unwrap();
        let config = TimingConfiguration::from_toml_str(
            "[participants.c]\nsystem_timeout_s = 7\n[participants.c.steps.s]\ncycle_time_us = 40\n",
        )
        .unwrap();
        client.configure_from(&config).unwrap();
        assert_eq!(client.schedule()[0].cycle_time_us, 40);

        let unknown = TimingConfiguration::from_toml_str(
            "[participants.c.steps.ghost]\ncycle_time_us = 40\n",
        )
        .unwrap();
        assert!(matches!(
            client.configure_from(&unknown),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_data_samples_stored() {
        let (client, _rx, _) = client();
        client.on_data(&DataSample {
            sender: "x".into(),
            signal: "speed".into(),
            time_us: 5,
            payload: vec![],
        });
        assert_eq!(client.samples().latest("speed").unwrap().time_us, 5);
    }
}
