// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant assembly.
//!
//! A [`Participant`] wires one bus endpoint to the components that listen on
//! it:
//! - the [`RpcService`] (initialized, serving `rpc_info`)
//! - the [`TimingClient`], also bound as the RPC simulation clock
//! - a [`TimingMaster`] when the master-element property names this participant
//! - a [`StateCollector`] for system state queries
//! - a control listener answering `StateRequest` and driving the timing
//!   lifecycle on `Control` commands
//!
//! # Lifecycle
//!
//! ```text
//! Idle --initialize--> Ready --start--> Running --stop--> Idle
//!                                                      \-- shutdown --> Shutdown
//! ```
//!
//! The participant reports `Error` while its timing client is in error.

use crate::bus::{BusEndpoint, LocalBus};
use crate::command::{
    Command, CommandListener, CommandTransmitter, ControlCommand, ControlEvent, Dispatch,
    StateNotification, StateRequest,
};
use crate::config::{paths, PropertyStore, PropertyTree, BROADCAST_RECEIVER};
use crate::error::{Error, Result};
use crate::incident::{IncidentHandler, LogIncidents};
use crate::rpc::{ObjectClientFactory, RpcService};
use crate::system::{ParticipantState, StateCollector, SystemState};
use crate::timing::{TimingClient, TimingMaster, TimingState};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Builder for a [`Participant`].
pub struct ParticipantBuilder {
    name: String,
    properties: PropertyStore,
    incidents: Arc<dyn IncidentHandler>,
}

impl ParticipantBuilder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            properties: PropertyStore::with_defaults(),
            incidents: Arc::new(LogIncidents),
        }
    }

    /// Property tree of the participant (default: [`PropertyStore::with_defaults`]).
    pub fn properties(mut self, properties: PropertyStore) -> Self {
        self.properties = properties;
        self
    }

    /// Incident sink (default: [`LogIncidents`]).
    pub fn incidents(mut self, incidents: Arc<dyn IncidentHandler>) -> Self {
        self.incidents = incidents;
        self
    }

    /// Attach to `bus` and wire all components.
    pub fn build(self, bus: &LocalBus) -> Result<Participant> {
        if self.name.is_empty() || self.name == BROADCAST_RECEIVER {
            return Err(Error::InvalidArgument(format!(
                "invalid participant name '{}'",
                self.name
            )));
        }
        let endpoint = bus.attach(&self.name)?;
        let transmitter: Arc<dyn CommandTransmitter> = endpoint.clone();
        let properties: Arc<dyn PropertyTree> = Arc::new(self.properties.clone());

        let rpc = Arc::new(RpcService::new(&self.name, Arc::clone(&properties)));
        rpc.initialize(Arc::clone(&transmitter))?;

        let timing = Arc::new(TimingClient::new(
            &self.name,
            Arc::clone(&properties),
            Arc::clone(&transmitter),
            Arc::clone(&self.incidents),
        ));
        rpc.bind_clock(timing.clone());

        let is_master = self
            .properties
            .get_string(paths::TIMING_MASTER_ELEMENT)
            .is_some_and(|master| master == self.name);
        let master = is_master.then(|| {
            Arc::new(TimingMaster::new(
                &self.name,
                Arc::clone(&properties),
                Arc::clone(&transmitter),
                Arc::clone(&self.incidents),
            ))
        });

        let collector = Arc::new(StateCollector::new(&self.name));
        let core = Arc::new(ParticipantCore {
            name: self.name.clone(),
            properties: self.properties,
            endpoint,
            rpc,
            timing,
            master,
            collector,
            state: Mutex::new(ParticipantState::Idle),
        });

        let mut listeners: Vec<Arc<dyn CommandListener>> = vec![
            core.rpc.clone(),
            core.timing.clone(),
            core.collector.clone(),
            Arc::new(ControlListener {
                core: Arc::downgrade(&core),
            }),
        ];
        if let Some(master) = &core.master {
            listeners.push(master.clone());
        }
        for listener in &listeners {
            core.endpoint.dispatcher().register(Arc::clone(listener));
        }

        log::info!(
            "participant '{}' created{}",
            core.name,
            if core.master.is_some() { " (timing master)" } else { "" }
        );
        Ok(Participant { core, listeners })
    }
}

struct ParticipantCore {
    name: String,
    properties: PropertyStore,
    endpoint: Arc<BusEndpoint>,
    rpc: Arc<RpcService>,
    timing: Arc<TimingClient>,
    master: Option<Arc<TimingMaster>>,
    collector: Arc<StateCollector>,
    state: Mutex<ParticipantState>,
}

impl ParticipantCore {
    fn state(&self) -> ParticipantState {
        let state = *self.state.lock();
        if state == ParticipantState::Running && self.timing.state() == TimingState::Error {
            ParticipantState::Error
        } else {
            state
        }
    }

    fn expect_state(&self, expected: ParticipantState) -> Result<()> {
        let current = self.state();
        if current == expected {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "participant '{}' is {:?}, expected {:?}",
                self.name, current, expected
            )))
        }
    }

    fn initialize(&self) -> Result<()> {
        self.expect_state(ParticipantState::Idle)?;
        *self.state.lock() = ParticipantState::Initializing;

        let configured = self.configure_timing();
        *self.state.lock() = if configured.is_ok() {
            ParticipantState::Ready
        } else {
            ParticipantState::Idle
        };
        configured
    }

    fn configure_timing(&self) -> Result<()> {
        self.timing.configure()?;
        if let Some(master) = &self.master {
            let own = self.timing.schedule();
            if !own.is_empty() {
                master.register_local_schedule(&self.name, own);
            }
            master.configure()?;
        }
        Ok(())
    }

    fn start(&self) -> Result<()> {
        self.expect_state(ParticipantState::Ready)?;
        self.timing.start()?;
        if let Some(master) = &self.master {
            if let Err(e) = master.start() {
                let _ = self.timing.stop();
                return Err(e);
            }
        }
        *self.state.lock() = ParticipantState::Running;
        log::info!("participant '{}' running", self.name);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        if *self.state.lock() == ParticipantState::Shutdown {
            return Err(Error::InvalidState(format!(
                "participant '{}' is shut down",
                self.name
            )));
        }
        if let Some(master) = &self.master {
            master.stop()?;
        }
        self.timing.stop()?;
        *self.state.lock() = ParticipantState::Idle;
        Ok(())
    }

    fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if *state == ParticipantState::Shutdown {
                return;
            }
            *state = ParticipantState::Shutdown;
        }
        if let Some(master) = &self.master {
            let _ = master.stop();
        }
        let _ = self.timing.stop();
        self.rpc.unbind_clock();
        self.rpc.shutdown();
        log::info!("participant '{}' shut down", self.name);
    }

    fn addressed(&self, receiver: &str) -> bool {
        receiver == self.name || receiver == BROADCAST_RECEIVER
    }
}

/// Answers state requests and applies remote control events.
struct ControlListener {
    core: Weak<ParticipantCore>,
}

impl CommandListener for ControlListener {
    fn on_state_request(&self, cmd: &StateRequest) -> Dispatch {
        let Some(core) = self.core.upgrade() else {
            return Dispatch::Ignored;
        };
        if !core.addressed(&cmd.receiver) {
            return Dispatch::Ignored;
        }
        let answer = Command::State(StateNotification {
            sender: core.name.clone(),
            receiver: cmd.sender.clone(),
            state: core.state(),
        });
        if let Err(e) = core.endpoint.transmit(answer) {
            log::warn!("participant '{}': state answer not sent: {}", core.name, e);
        }
        Dispatch::Handled
    }

    fn on_control(&self, cmd: &ControlCommand) -> Dispatch {
        let Some(core) = self.core.upgrade() else {
            return Dispatch::Ignored;
        };
        if !core.addressed(&cmd.receiver) {
            return Dispatch::Ignored;
        }
        let outcome = match cmd.event {
            ControlEvent::Initialize => core.initialize(),
            ControlEvent::Start => core.start(),
            ControlEvent::Stop => core.stop(),
        };
        if let Err(e) = outcome {
            log::warn!(
                "participant '{}': {:?} from '{}' failed: {}",
                core.name,
                cmd.event,
                cmd.sender,
                e
            );
        }
        Dispatch::Handled
    }
}

/// One participant on a command bus.
pub struct Participant {
    core: Arc<ParticipantCore>,
    listeners: Vec<Arc<dyn CommandListener>>,
}

impl Participant {
    pub fn builder(name: &str) -> ParticipantBuilder {
        ParticipantBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Shared property tree.
    pub fn properties(&self) -> &PropertyStore {
        &self.core.properties
    }

    pub fn rpc(&self) -> &Arc<RpcService> {
        &self.core.rpc
    }

    /// Typed client factory for objects served by `peer`.
    pub fn object_clients(&self, peer: &str) -> ObjectClientFactory {
        ObjectClientFactory::new(Arc::clone(&self.core.rpc), peer)
    }

    pub fn timing(&self) -> &Arc<TimingClient> {
        &self.core.timing
    }

    /// Timing master, if this participant is the configured master element.
    pub fn master(&self) -> Option<&Arc<TimingMaster>> {
        self.core.master.as_ref()
    }

    pub fn state(&self) -> ParticipantState {
        self.core.state()
    }

    /// Configure timing: client first, then the master (which requests schedules).
    pub fn initialize(&self) -> Result<()> {
        self.core.initialize()
    }

    pub fn start(&self) -> Result<()> {
        self.core.start()
    }

    /// Stop timing. Step listeners are unregistered by the client.
    pub fn stop(&self) -> Result<()> {
        self.core.stop()
    }

    /// Send a control event to `receiver` (`"*"` for every participant).
    pub fn send_control(&self, receiver: &str, event: ControlEvent) -> Result<()> {
        self.core.endpoint.transmit(Command::Control(ControlCommand {
            sender: self.core.name.clone(),
            receiver: receiver.to_string(),
            event,
        }))
    }

    /// Ask `participants` for their state and aggregate the answers.
    pub fn query_system_state(
        &self,
        participants: &[&str],
        timeout: Duration,
    ) -> Result<SystemState> {
        self.core
            .collector
            .query(self.core.endpoint.as_ref(), participants, timeout)
    }

    /// Stop timing, shut the RPC service down and leave the bus.
    ///
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        self.core.shutdown();
        for listener in &self.listeners {
            self.core.endpoint.dispatcher().unregister(listener);
        }
        self.core.endpoint.detach();
    }
}

impl Drop for Participant {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("name", &self.core.name)
            .field("state", &self.core.state())
            .field("master", &self.core.master.is_some())
            .finish()
    }
}
