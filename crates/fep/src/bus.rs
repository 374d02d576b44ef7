// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process command bus.
//!
//! Routes [`Command`]s between participants living in the same process. Every
//! attached participant gets a [`BusEndpoint`] with its own unbounded channel
//! and its own delivery thread, which hands each inbound command to the
//! endpoint's [`CommandDispatcher`]. Commands are delivered in send order per
//! (sender, receiver) pair.
//!
//! Commands to unknown receivers are dropped, as a datagram to a host nobody
//! listens on would be. [`LocalBus::set_blocked`] drops traffic on one
//! direction of a link to simulate a lost peer.
//!
//! # Example
//!
//! ```
//! use fep::bus::LocalBus;
//!
//! let bus = LocalBus::new();
//! let a = bus.attach("A").unwrap();
//! let b = bus.attach("B").unwrap();
//! assert_eq!(bus.participants(), vec!["A".to_string(), "B".to_string()]);
//! b.detach();
//! assert_eq!(bus.participants(), vec!["A".to_string()]);
//! # drop(a);
//! ```

use crate::command::{Command, CommandDispatcher, CommandTransmitter};
use crate::config::BROADCAST_RECEIVER;
use crate::error::{Error, Result};
use crossbeam::channel::{self, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[derive(Default)]
struct BusInner {
    endpoints: RwLock<BTreeMap<String, Sender<Command>>>,
    /// Blocked (from, to) links
    blocked: RwLock<HashSet<(String, String)>>,
}

impl BusInner {
    fn route(&self, from: &str, command: Command) -> Result<()> {
        let receiver = command.receiver().to_string();
        let endpoints = self.endpoints.read();
        let blocked = self.blocked.read();
        let is_blocked = |to: &str| blocked.contains(&(from.to_string(), to.to_string()));

        if receiver == BROADCAST_RECEIVER {
            for (name, tx) in endpoints.iter() {
                if !is_blocked(name) {
                    // A closing endpoint is simply skipped
                    let _ = tx.send(command.clone());
                }
            }
            return Ok(());
        }

        match endpoints.get(&receiver) {
            Some(_) if is_blocked(&receiver) => {
                log::trace!("bus: {} -> {} blocked, dropping {:?}", from, receiver, command.kind());
                Ok(())
            }
            Some(tx) => tx
                .send(command)
                .map_err(|_| Error::Transmission(format!("endpoint '{}' closed", receiver))),
            None => {
                log::debug!(
                    "bus: no participant '{}', dropping {:?} from '{}'",
                    receiver,
                    command.kind(),
                    from
                );
                Ok(())
            }
        }
    }
}

/// In-process bus shared by several participants.
#[derive(Clone, Default)]
pub struct LocalBus {
    inner: Arc<BusInner>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a participant and start its delivery thread.
    pub fn attach(&self, name: &str) -> Result<Arc<BusEndpoint>> {
        let mut endpoints = self.inner.endpoints.write();
        if endpoints.contains_key(name) {
            return Err(Error::AlreadyExists(format!("participant '{}' on bus", name)));
        }
        let (tx, rx) = channel::unbounded::<Command>();
        let dispatcher = Arc::new(CommandDispatcher::new());

        let thread_dispatcher = Arc::clone(&dispatcher);
        let thread = thread::Builder::new()
            .name(format!("fep-rx-{}", name))
            .spawn(move || {
                for command in rx.iter() {
                    thread_dispatcher.deliver(&command);
                }
            })
            .map_err(|e| Error::Unexpected(format!("spawn delivery thread: {}", e)))?;

        endpoints.insert(name.to_string(), tx);
        log::debug!("bus: attached '{}'", name);
        Ok(Arc::new(BusEndpoint {
            name: name.to_string(),
            bus: Arc::clone(&self.inner),
            dispatcher,
            thread: Mutex::new(Some(thread)),
        }))
    }

    /// Names of attached participants.
    pub fn participants(&self) -> Vec<String> {
        self.inner.endpoints.read().keys().cloned().collect()
    }

    /// Drop (or restore) every command sent from `from` to `to`.
    pub fn set_blocked(&self, from: &str, to: &str, blocked: bool) {
        let link = (from.to_string(), to.to_string());
        let mut links = self.inner.blocked.write();
        if blocked {
            links.insert(link);
        } else {
            links.remove(&link);
        }
    }
}

/// One participant's attachment to a [`LocalBus`].
pub struct BusEndpoint {
    name: String,
    bus: Arc<BusInner>,
    dispatcher: Arc<CommandDispatcher>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl BusEndpoint {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Listener registry fed by this endpoint's delivery thread.
    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }

    /// Leave the bus and stop the delivery thread after it drained its queue.
    pub fn detach(&self) {
        self.bus.endpoints.write().remove(&self.name);
        if let Some(handle) = self.thread.lock().take() {
            if handle.thread().id() == thread::current().id() {
                // Detached from inside a listener; the thread ends on its own.
                return;
            }
            if handle.join().is_err() {
                log::warn!("bus: delivery thread of '{}' panicked", self.name);
            }
            log::debug!("bus: detached '{}'", self.name);
        }
    }
}

impl CommandTransmitter for BusEndpoint {
    fn transmit(&self, command: Command) -> Result<()> {
        self.bus.route(&self.name, command)
    }
}

impl Drop for BusEndpoint {
    fn drop(&mut self) {
        self.detach();
    }
}
