// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # FEP - Distributed simulation middleware core
//!
//! Request/response RPC between named participants and a step-based
//! distributed clock, both carried over an asynchronous command bus.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fep::bus::LocalBus;
//! use fep::config::{paths, PropertyStore, PropertyTree};
//! use fep::participant::Participant;
//! use fep::timing::StepConfig;
//!
//! fn main() -> fep::Result<()> {
//!     let bus = LocalBus::new();
//!     let props = PropertyStore::with_defaults();
//!     props.set(paths::TIMING_MASTER_ELEMENT, "sim".into());
//!
//!     let sim = Participant::builder("sim").properties(props).build(&bus)?;
//!     sim.timing().register_step_listener(
//!         "step",
//!         StepConfig::new(10_000),
//!         Box::new(|t: i64, _| log::info!("step at {} us", t)),
//!     )?;
//!     sim.initialize()?;
//!     sim.start()?;
//!     sim.stop()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                        Participant                           |
//! |   RpcService (+ rpc_info) | TimingClient | TimingMaster?     |
//! +--------------------------------------------------------------+
//! |            CommandDispatcher (listener visitor)              |
//! +--------------------------------------------------------------+
//! |          Command bus (LocalBus: one thread per endpoint)     |
//! +--------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`rpc`] - request correlation, object registry, typed client proxies
//! - [`timing`] - timing master, timing client, step data access
//! - [`command`] - command kinds and the listener visitor
//! - [`bus`] - in-process command bus
//! - [`config`] - property tree and configuration keys
//! - [`participant`] - wiring of all of the above for one participant

/// In-process command bus.
pub mod bus;
/// Simulation clock seam.
pub mod clock;
/// Commands and the listener visitor.
pub mod command;
/// Property tree, configuration keys and defaults.
pub mod config;
/// Crate-wide error type.
pub mod error;
/// Incident reporting.
pub mod incident;
/// Participant assembly.
pub mod participant;
/// Request/response RPC.
pub mod rpc;
/// Participant and system state.
pub mod system;
/// Step-based distributed timing.
pub mod timing;

pub use error::{Error, Result};
pub use participant::{Participant, ParticipantBuilder};
