// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Commands exchanged over the participant command bus.
//!
//! [`Command`] is a closed set of message kinds. Components receive commands
//! through the [`CommandListener`] visitor: every method has a default
//! implementation returning [`Dispatch::Ignored`], so a listener only overrides
//! the kinds it cares about.
//!
//! # Usage
//!
//! ```
//! use fep::command::{Command, CommandListener, CustomCommand, Dispatch};
//!
//! struct Echo;
//!
//! impl CommandListener for Echo {
//!     fn on_custom(&self, cmd: &CustomCommand) -> Dispatch {
//!         assert_eq!(cmd.name, "ping");
//!         Dispatch::Handled
//!     }
//! }
//!
//! let cmd = Command::Custom(CustomCommand {
//!     sender: "a".into(),
//!     receiver: "b".into(),
//!     name: "ping".into(),
//!     content: String::new(),
//! });
//! assert_eq!(cmd.dispatch(&Echo), Dispatch::Handled);
//! ```
//!
//! # Thread Safety
//!
//! Listeners are called from the participant's inbound delivery thread.
//! They must be `Send + Sync`; a slow listener delays every later command.

use crate::error::Result;
use crate::rpc::RequestId;
use crate::system::ParticipantState;
use crate::timing::{DataSample, ScheduleNotification, Timestamp, TriggerAck, TriggerTick};
use parking_lot::RwLock;
use std::sync::Arc;

/// Direction of an RPC command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcKind {
    Request,
    Response,
}

/// RPC request or response on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcCommand {
    pub kind: RpcKind,
    pub sender: String,
    pub receiver: String,
    /// Name of the target object on the server side.
    pub object_name: String,
    pub request_id: RequestId,
    /// JSON-RPC payload.
    pub content: String,
    /// UTC wall clock at send time (us since epoch).
    pub timestamp_utc_us: Timestamp,
    /// Simulation time at send time (0 when no clock is bound).
    pub simulation_time_us: Timestamp,
}

/// Request for the step schedule of a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetScheduleCommand {
    pub sender: String,
    pub receiver: String,
}

/// Remote lifecycle control events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Configure timing (collect schedules / allocate steps).
    Initialize,
    Start,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCommand {
    pub sender: String,
    pub receiver: String,
    pub event: ControlEvent,
}

/// Query for the participant state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRequest {
    pub sender: String,
    pub receiver: String,
}

/// Answer to [`StateRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateNotification {
    pub sender: String,
    pub receiver: String,
    pub state: ParticipantState,
}

/// Free-form application command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomCommand {
    pub sender: String,
    pub receiver: String,
    pub name: String,
    pub content: String,
}

/// Discriminant of [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Rpc,
    GetSchedule,
    Schedule,
    Trigger,
    Ack,
    Data,
    Control,
    StateRequest,
    State,
    Custom,
}

/// Every message that travels over the command bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Rpc(RpcCommand),
    GetSchedule(GetScheduleCommand),
    Schedule(ScheduleNotification),
    Trigger(TriggerTick),
    Ack(TriggerAck),
    Data(DataSample),
    Control(ControlCommand),
    StateRequest(StateRequest),
    State(StateNotification),
    Custom(CustomCommand),
}

/// Outcome of delivering a command to a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Handled,
    Ignored,
}

impl Dispatch {
    /// `Handled` if either side handled the command.
    pub fn or(self, other: Dispatch) -> Dispatch {
        if self == Dispatch::Handled || other == Dispatch::Handled {
            Dispatch::Handled
        } else {
            Dispatch::Ignored
        }
    }
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Rpc(_) => CommandKind::Rpc,
            Command::GetSchedule(_) => CommandKind::GetSchedule,
            Command::Schedule(_) => CommandKind::Schedule,
            Command::Trigger(_) => CommandKind::Trigger,
            Command::Ack(_) => CommandKind::Ack,
            Command::Data(_) => CommandKind::Data,
            Command::Control(_) => CommandKind::Control,
            Command::StateRequest(_) => CommandKind::StateRequest,
            Command::State(_) => CommandKind::State,
            Command::Custom(_) => CommandKind::Custom,
        }
    }

    pub fn sender(&self) -> &str {
        match self {
            Command::Rpc(c) => &c.sender,
            Command::GetSchedule(c) => &c.sender,
            Command::Schedule(c) => &c.sender,
            Command::Trigger(c) => &c.sender,
            Command::Ack(c) => &c.sender,
            Command::Data(c) => &c.sender,
            Command::Control(c) => &c.sender,
            Command::StateRequest(c) => &c.sender,
            Command::State(c) => &c.sender,
            Command::Custom(c) => &c.sender,
        }
    }

    /// Addressee; `"*"` for broadcasts. Triggers and samples are always broadcast.
    pub fn receiver(&self) -> &str {
        match self {
            Command::Rpc(c) => &c.receiver,
            Command::GetSchedule(c) => &c.receiver,
            Command::Schedule(c) => &c.receiver,
            Command::Trigger(_) | Command::Data(_) => crate::config::BROADCAST_RECEIVER,
            Command::Ack(c) => &c.receiver,
            Command::Control(c) => &c.receiver,
            Command::StateRequest(c) => &c.receiver,
            Command::State(c) => &c.receiver,
            Command::Custom(c) => &c.receiver,
        }
    }

    /// Hand the command to the matching listener method.
    pub fn dispatch(&self, listener: &dyn CommandListener) -> Dispatch {
        match self {
            Command::Rpc(c) => listener.on_rpc(c),
            Command::GetSchedule(c) => listener.on_get_schedule(c),
            Command::Schedule(c) => listener.on_schedule(c),
            Command::Trigger(c) => listener.on_trigger(c),
            Command::Ack(c) => listener.on_ack(c),
            Command::Data(c) => listener.on_data(c),
            Command::Control(c) => listener.on_control(c),
            Command::StateRequest(c) => listener.on_state_request(c),
            Command::State(c) => listener.on_state(c),
            Command::Custom(c) => listener.on_custom(c),
        }
    }
}

/// Visitor over [`Command`] kinds.
#[allow(unused_variables)]
pub trait CommandListener: Send + Sync {
    fn on_rpc(&self, cmd: &RpcCommand) -> Dispatch {
        Dispatch::Ignored
    }

    fn on_get_schedule(&self, cmd: &GetScheduleCommand) -> Dispatch {
        Dispatch::Ignored
    }

    fn on_schedule(&self, cmd: &ScheduleNotification) -> Dispatch {
        Dispatch::Ignored
    }

    fn on_trigger(&self, tick: &TriggerTick) -> Dispatch {
        Dispatch::Ignored
    }

    fn on_ack(&self, ack: &TriggerAck) -> Dispatch {
        Dispatch::Ignored
    }

    fn on_data(&self, sample: &DataSample) -> Dispatch {
        Dispatch::Ignored
    }

    fn on_control(&self, cmd: &ControlCommand) -> Dispatch {
        Dispatch::Ignored
    }

    fn on_state_request(&self, cmd: &StateRequest) -> Dispatch {
        Dispatch::Ignored
    }

    fn on_state(&self, cmd: &StateNotification) -> Dispatch {
        Dispatch::Ignored
    }

    fn on_custom(&self, cmd: &CustomCommand) -> Dispatch {
        Dispatch::Ignored
    }
}

/// Outbound side of the command bus.
pub trait CommandTransmitter: Send + Sync {
    fn transmit(&self, command: Command) -> Result<()>;
}

/// Per-participant list of command listeners.
#[derive(Default)]
pub struct CommandDispatcher {
    listeners: RwLock<Vec<Arc<dyn CommandListener>>>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn CommandListener>) {
        self.listeners.write().push(listener);
    }

    /// Remove a listener by identity. Returns false if it was not registered.
    pub fn unregister(&self, listener: &Arc<dyn CommandListener>) -> bool {
        let target = Arc::as_ptr(listener) as *const ();
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| Arc::as_ptr(l) as *const () != target);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Deliver to every listener.
    ///
    /// The listener list is snapshotted first so listeners may (un)register
    /// from inside a callback.
    pub fn deliver(&self, command: &Command) -> Dispatch {
        let snapshot: Vec<Arc<dyn CommandListener>> = self.listeners.read().clone();
        let mut result = Dispatch::Ignored;
        for listener in snapshot {
            result = result.or(command.dispatch(listener.as_ref()));
        }
        if result == Dispatch::Ignored {
            log::trace!(
                "command {:?} from '{}' not handled",
                command.kind(),
                command.sender()
            );
        }
        result
    }
}
