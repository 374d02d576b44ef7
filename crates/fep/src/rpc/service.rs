// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RPC service of one participant.
//!
//! Turns local `send_request` calls into [`RpcCommand`]s on the command bus and
//! blocks the caller until the matching response, a cancellation or the
//! configured timeout. On the receiving side it is a [`CommandListener`]:
//! inbound requests are dispatched to the [`ObjectRegistry`] on the delivery
//! thread and answered with the same request id; inbound responses are queued
//! for the waiting caller.
//!
//! # Lifecycle
//!
//! `Uninitialized -> Initialized -> ShuttingDown -> Destroyed`

use super::connections::PeerConnections;
use super::element_info::ElementInfo;
use super::json;
use super::queue::{PendingResponse, ResponseCode, ResponseQueue};
use super::registry::ObjectRegistry;
use super::RequestId;
use crate::clock::{utc_now_us, ClockService};
use crate::command::{Command, CommandListener, CommandTransmitter, Dispatch, RpcCommand, RpcKind};
use crate::config::{paths, PropertyTree, DEFAULT_RPC_TIMEOUT_MS};
use crate::error::{Error, Result};
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle state of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Uninitialized,
    Initialized,
    ShuttingDown,
    Destroyed,
}

/// RPC service (request side and serving side).
pub struct RpcService {
    local_name: String,

    /// Property tree the remote-call timeout is read from
    properties: Arc<dyn PropertyTree>,

    /// Outbound command bus; `None` until initialized and after shutdown
    transmitter: ArcSwapOption<Arc<dyn CommandTransmitter>>,

    /// Optional simulation clock, may be bound after construction
    clock: ArcSwapOption<Arc<dyn ClockService>>,

    connections: PeerConnections,
    registry: ObjectRegistry,

    /// Last allocated request id (wraps)
    request_counter: AtomicU32,

    state: Mutex<ServiceState>,
}

impl RpcService {
    /// Create an uninitialized service for participant `local_name`.
    pub fn new(local_name: &str, properties: Arc<dyn PropertyTree>) -> Self {
        Self {
            local_name: local_name.to_string(),
            properties,
            transmitter: ArcSwapOption::empty(),
            clock: ArcSwapOption::empty(),
            connections: PeerConnections::new(),
            registry: ObjectRegistry::new(),
            request_counter: AtomicU32::new(0),
            state: Mutex::new(ServiceState::Uninitialized),
        }
    }

    /// Bind the command bus and register the built-in `rpc_info` object.
    pub fn initialize(&self, transmitter: Arc<dyn CommandTransmitter>) -> Result<()> {
        let mut state = self.state.lock();
        if *state != ServiceState::Uninitialized {
            return Err(Error::InvalidState(format!(
                "RPC service of '{}' is {:?}",
                self.local_name, *state
            )));
        }
        self.registry.register_object_server(
            ElementInfo::DEFAULT_NAME,
            Arc::new(ElementInfo::new(self.registry.downgrade())),
        )?;
        self.transmitter.store(Some(Arc::new(transmitter)));
        *state = ServiceState::Initialized;
        log::info!("RPC service of '{}' initialized", self.local_name);
        Ok(())
    }

    /// Cancel all waiting callers, unregister `rpc_info` and unbind the bus.
    ///
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if *state != ServiceState::Initialized {
                if *state == ServiceState::Uninitialized {
                    *state = ServiceState::Destroyed;
                }
                return;
            }
            *state = ServiceState::ShuttingDown;
        }

        if let Err(e) = self
            .registry
            .unregister_object_server(ElementInfo::DEFAULT_NAME)
        {
            log::debug!("RPC service of '{}': {}", self.local_name, e);
        }
        self.connections.stop_all_connections();
        self.transmitter.store(None);

        *self.state.lock() = ServiceState::Destroyed;
        log::info!("RPC service of '{}' shut down", self.local_name);
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock()
    }

    /// Participant name used as receiver filter for inbound commands.
    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// Registry of the objects served by this participant.
    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    /// Bind the clock used to stamp outgoing commands with simulation time.
    pub fn bind_clock(&self, clock: Arc<dyn ClockService>) {
        self.clock.store(Some(Arc::new(clock)));
    }

    pub fn unbind_clock(&self) {
        self.clock.store(None);
    }

    fn clock_time(&self) -> i64 {
        self.clock.load_full().map_or(0, |clock| clock.time_us())
    }

    /// Make `peer` known; responses from it are queued from now on.
    ///
    /// Reachability is not checked; an unreachable peer surfaces as `Timeout`.
    pub fn connect(&self, peer: &str, _object_name: &str) -> Result<()> {
        if self.state() != ServiceState::Initialized {
            return Err(Error::NotInitialized);
        }
        self.connections.add_for_key(peer);
        Ok(())
    }

    /// Cancel every in-flight request (`Cancelled`) and forget all peers.
    pub fn stop_all_connections(&self) {
        self.connections.stop_all_connections();
    }

    /// Start the request id sequence after `last`.
    #[cfg(test)]
    pub(crate) fn with_request_counter(self, last: RequestId) -> Self {
        self.request_counter.store(last, Ordering::Release);
        self
    }

    /// Number of responses queued for `peer` and not yet claimed.
    #[cfg(test)]
    pub(crate) fn queued_responses(&self, peer: &str) -> usize {
        self.connections.get(peer).map_or(0, |queue| queue.len())
    }

    /// Most recently allocated request id (0 before the first request).
    pub fn last_request_id(&self) -> RequestId {
        self.request_counter.load(Ordering::Acquire)
    }

    fn next_request_id(&self) -> RequestId {
        self.request_counter
            .fetch_add(1, Ordering::AcqRel)
            .wrapping_add(1)
    }

    /// Remote-call timeout from the property tree.
    fn remote_timeout_ms(&self) -> i64 {
        self.properties
            .get_i64(paths::RPC_CLIENT_TIMEOUT_MS)
            .unwrap_or(DEFAULT_RPC_TIMEOUT_MS)
    }

    /// Send `request` to `object_name` on `peer` and wait for the response.
    ///
    /// # Errors
    /// - `NotInitialized`: no command bus bound
    /// - `NotConnected`: `connect` was never called for `peer`
    /// - `InvalidArgument`: configured timeout < 1 ms (nothing is sent)
    /// - transmission failures, unchanged
    /// - `Cancelled`: connections were stopped while waiting
    /// - `Timeout`: no response within the configured timeout
    pub fn send_request(&self, peer: &str, object_name: &str, request: &str) -> Result<String> {
        let transmitter = self.transmitter.load_full().ok_or(Error::NotInitialized)?;
        let queue = self
            .connections
            .get(peer)
            .ok_or_else(|| Error::NotConnected(peer.to_string()))?;

        let timeout_ms = self.remote_timeout_ms();
        if timeout_ms < 1 {
            return Err(Error::InvalidArgument(format!(
                "remote call timeout must be >= 1 ms (got {})",
                timeout_ms
            )));
        }
        let timeout = Duration::from_millis(timeout_ms as u64);

        let request_id = self.next_request_id();
        queue.expect(request_id);
        let _in_flight = InFlight {
            queue: &queue,
            request_id,
        };
        transmitter.transmit(Command::Rpc(RpcCommand {
            kind: RpcKind::Request,
            sender: self.local_name.clone(),
            receiver: peer.to_string(),
            object_name: object_name.to_string(),
            request_id,
            content: request.to_string(),
            timestamp_utc_us: utc_now_us(),
            simulation_time_us: self.clock_time(),
        }))?;
        log::debug!(
            "RPC '{}' -> '{}.{}' request #{}",
            self.local_name,
            peer,
            object_name,
            request_id
        );

        // Bounded slices keep the wait granular even under spurious wakeups.
        let slice = (timeout / 2).max(Duration::from_millis(1));
        let begin = Instant::now();
        loop {
            let remaining = timeout.saturating_sub(begin.elapsed());
            let seen = queue.push_count();
            if queue.wait_for_not_empty(slice.min(remaining)) {
                match queue.pop_matching(request_id) {
                    Some(item) if item.code == ResponseCode::Stop => {
                        log::debug!("RPC request #{} to '{}' cancelled", request_id, peer);
                        return Err(Error::Cancelled);
                    }
                    Some(item) => return Ok(item.payload),
                    // Only foreign responses queued: sleep until something new arrives.
                    None => {
                        let remaining = timeout.saturating_sub(begin.elapsed());
                        queue.wait_for_push(seen, slice.min(remaining));
                    }
                }
            }
            if begin.elapsed() > timeout {
                log::debug!(
                    "RPC request #{} to '{}.{}' timed out after {} ms",
                    request_id,
                    peer,
                    object_name,
                    timeout_ms
                );
                return Err(Error::Timeout);
            }
        }
    }

    fn handle_request(&self, cmd: &RpcCommand) {
        let content = match self.registry.process_request(&cmd.object_name, &cmd.content) {
            Ok(response) => response,
            Err(e) => {
                log::debug!(
                    "RPC '{}': request #{} for '{}' failed: {}",
                    self.local_name,
                    cmd.request_id,
                    cmd.object_name,
                    e
                );
                json::error_from(&e, &json::request_id(&cmd.content))
            }
        };

        let Some(transmitter) = self.transmitter.load_full() else {
            log::warn!(
                "RPC '{}': cannot answer request #{} (not initialized)",
                self.local_name,
                cmd.request_id
            );
            return;
        };
        let response = Command::Rpc(RpcCommand {
            kind: RpcKind::Response,
            sender: self.local_name.clone(),
            receiver: cmd.sender.clone(),
            object_name: cmd.object_name.clone(),
            request_id: cmd.request_id,
            content,
            timestamp_utc_us: utc_now_us(),
            simulation_time_us: self.clock_time(),
        });
        if let Err(e) = transmitter.transmit(response) {
            log::warn!(
                "RPC '{}': failed to answer request #{} from '{}': {}",
                self.local_name,
                cmd.request_id,
                cmd.sender,
                e
            );
        }
    }

    fn handle_response(&self, cmd: &RpcCommand) {
        match self.connections.get(&cmd.sender) {
            Some(queue) => {
                let response = PendingResponse::response(cmd.request_id, cmd.content.clone());
                if !queue.push_awaited(response) {
                    log::debug!(
                        "RPC '{}': dropped response #{} from '{}' (no caller waiting)",
                        self.local_name,
                        cmd.request_id,
                        cmd.sender
                    );
                }
            }
            None => log::debug!(
                "RPC '{}': dropped response #{} from unknown peer '{}'",
                self.local_name,
                cmd.request_id,
                cmd.sender
            ),
        }
    }
}

/// Request id awaited on a peer queue until the caller returns.
struct InFlight<'a> {
    queue: &'a ResponseQueue,
    request_id: RequestId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.queue.release(self.request_id);
    }
}

impl CommandListener for RpcService {
    /// Inbound dispatch; runs on the delivery thread.
    fn on_rpc(&self, cmd: &RpcCommand) -> Dispatch {
        if cmd.receiver != self.local_name {
            return Dispatch::Ignored;
        }
        match cmd.kind {
            RpcKind::Request => self.handle_request(cmd),
            RpcKind::Response => self.handle_response(cmd),
        }
        Dispatch::Handled
    }
}

impl Drop for RpcService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RpcService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcService")
            .field("local_name", &self.local_name)
            .field("state", &self.state())
            .field("peers", &self.connections.len())
            .finish()
    }
}
