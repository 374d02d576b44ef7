// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Consumer-facing client proxies.
//!
//! [`ObjectClient`] is an untyped handle to one remote object. [`RpcClient`]
//! binds such a handle to an interface type and verifies that the handle's
//! interface id matches; on mismatch the proxy is empty and every call through
//! it fails with `InvalidState` instead of reaching the remote.

use super::element_info::{ElementInfoCalls, ElementInfoInterface};
use super::json;
use super::service::RpcService;
use crate::error::{Error, Result};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Compile-time identity of an RPC interface.
pub trait RpcInterface {
    /// Interface id.
    const IID: &'static str;
    /// Name objects of this interface are usually registered under.
    const DEFAULT_NAME: &'static str;
}

/// Untyped handle to an object served by a remote participant.
pub struct ObjectClient {
    service: Arc<RpcService>,
    peer: String,
    object_name: String,
    interface_id: String,
    next_call_id: AtomicU64,
}

impl ObjectClient {
    /// Connect `service` to `peer` and build a handle reporting `interface_id`.
    pub fn new(
        service: Arc<RpcService>,
        peer: &str,
        object_name: &str,
        interface_id: &str,
    ) -> Result<Self> {
        service.connect(peer, object_name)?;
        Ok(Self {
            service,
            peer: peer.to_string(),
            object_name: object_name.to_string(),
            interface_id: interface_id.to_string(),
            next_call_id: AtomicU64::new(1),
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    /// Interface id this handle reports.
    pub fn interface_id(&self) -> &str {
        &self.interface_id
    }

    /// Send a raw payload and return the raw response.
    pub fn send_raw(&self, payload: &str) -> Result<String> {
        self.service
            .send_request(&self.peer, &self.object_name, payload)
    }

    /// JSON-RPC call of `method`; remote error objects become `Error::Remote`.
    pub fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let response = self.send_raw(&json::request(method, params, id))?;
        json::parse_response(&response)
    }
}

impl std::fmt::Debug for ObjectClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectClient")
            .field("peer", &self.peer)
            .field("object_name", &self.object_name)
            .field("interface_id", &self.interface_id)
            .finish()
    }
}

/// Typed proxy; empty when the handle's interface id does not match `I`.
pub struct RpcClient<I: RpcInterface> {
    handle: Option<ObjectClient>,
    _interface: PhantomData<fn() -> I>,
}

impl<I: RpcInterface> RpcClient<I> {
    /// Wrap `handle`, or build an empty proxy if its IID is not `I::IID`.
    pub fn new(handle: ObjectClient) -> Self {
        let mut client = Self::empty();
        client.reset(Some(handle));
        client
    }

    pub fn empty() -> Self {
        Self {
            handle: None,
            _interface: PhantomData,
        }
    }

    /// Replace the handle, re-checking the interface id.
    pub fn reset(&mut self, handle: Option<ObjectClient>) {
        self.handle = handle.filter(|h| {
            let matches = h.interface_id() == I::IID;
            if !matches {
                log::debug!(
                    "RPC client for '{}.{}': interface '{}' does not match '{}'",
                    h.peer(),
                    h.object_name(),
                    h.interface_id(),
                    I::IID
                );
            }
            matches
        });
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_some()
    }

    /// The bound handle, or `InvalidState` for an empty proxy.
    pub fn get(&self) -> Result<&ObjectClient> {
        self.handle.as_ref().ok_or_else(|| {
            Error::InvalidState(format!("empty RPC client proxy for interface '{}'", I::IID))
        })
    }
}

/// Builds typed clients for objects of one remote participant.
pub struct ObjectClientFactory {
    service: Arc<RpcService>,
    peer: String,
}

impl ObjectClientFactory {
    pub fn new(service: Arc<RpcService>, peer: &str) -> Self {
        Self {
            service,
            peer: peer.to_string(),
        }
    }

    /// Handle to the peer's `rpc_info` object.
    pub fn element_info(&self) -> Result<RpcClient<ElementInfoInterface>> {
        let handle = ObjectClient::new(
            Arc::clone(&self.service),
            &self.peer,
            <ElementInfoInterface as RpcInterface>::DEFAULT_NAME,
            <ElementInfoInterface as RpcInterface>::IID,
        )?;
        Ok(RpcClient::new(handle))
    }

    /// Typed client for `object_name`.
    ///
    /// The interface id is taken from the peer's `rpc_info`; an unknown object,
    /// a different interface or a failed query yields an empty proxy.
    pub fn client<I: RpcInterface>(&self, object_name: &str) -> RpcClient<I> {
        let reported = self
            .element_info()
            .and_then(|info| info.get()?.get_rpc_iids_for_object(object_name));
        let iid = match reported {
            Ok(iids) => iids.into_iter().next().unwrap_or_default(),
            Err(e) => {
                log::debug!(
                    "RPC client factory: IID query for '{}.{}' failed: {}",
                    self.peer,
                    object_name,
                    e
                );
                String::new()
            }
        };
        match ObjectClient::new(Arc::clone(&self.service), &self.peer, object_name, &iid) {
            Ok(handle) => RpcClient::new(handle),
            Err(_) => RpcClient::empty(),
        }
    }
}
