// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RPC object registry.
//!
//! Maps local object names to [`RpcObjectServer`] implementations, dispatches
//! inbound JSON-RPC requests to them and answers introspection queries.
//!
//! The registry stores its own wrapper around the caller's object; unregistering
//! drops the wrapper only, the object itself stays with its owner.
//!
//! # Concurrency
//! One mutex guards the name map. Dispatch clones the handler out of the map and
//! releases the lock before calling it, so handlers may re-enter the registry.

use crate::error::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

/// Content type passed to handlers.
pub const JSON_RPC_CONTENT_TYPE: &str = "application/json-rpc";

/// A remotely invocable object.
pub trait RpcObjectServer: Send + Sync {
    /// Interface id (IID) of the single interface this object implements.
    fn interface_id(&self) -> &str;

    /// JSON-RPC interface definition of that interface.
    fn interface_definition(&self) -> &str;

    /// Handle one request payload and produce the response payload.
    fn handle_request(&self, content_type: &str, request: &str) -> Result<String>;

    /// Called on registration with the name the object is reachable under.
    fn set_object_name(&self, _name: &str) {}
}

/// Helper for servers that want to remember their registered name.
#[derive(Debug, Default)]
pub struct ObjectName(RwLock<String>);

impl ObjectName {
    pub fn set(&self, name: &str) {
        *self.0.write() = name.to_string();
    }

    pub fn get(&self) -> String {
        self.0.read().clone()
    }
}

/// Registry-owned wrapper around a registered object.
struct RegisteredObject {
    interface_id: String,
    server: Arc<dyn RpcObjectServer>,
}

type ObjectMap = BTreeMap<String, RegisteredObject>;

/// Name -> object map of one participant. Cloning shares the same map.
#[derive(Clone, Default)]
pub struct ObjectRegistry {
    objects: Arc<Mutex<ObjectMap>>,
}

/// Non-owning reference to a registry (used by objects registered in it).
#[derive(Clone)]
pub struct WeakRegistry {
    objects: Weak<Mutex<ObjectMap>>,
}

impl WeakRegistry {
    pub fn upgrade(&self) -> Option<ObjectRegistry> {
        self.objects.upgrade().map(|objects| ObjectRegistry { objects })
    }
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            objects: Arc::downgrade(&self.objects),
        }
    }

    /// Register `server` under `name`.
    ///
    /// Fails with `AlreadyExists` if the name is taken; the existing
    /// registration stays untouched.
    pub fn register_object_server(
        &self,
        name: &str,
        server: Arc<dyn RpcObjectServer>,
    ) -> Result<()> {
        let mut objects = self.objects.lock();
        if objects.contains_key(name) {
            return Err(Error::AlreadyExists(format!("RPC object '{}'", name)));
        }
        server.set_object_name(name);
        objects.insert(
            name.to_string(),
            RegisteredObject {
                interface_id: server.interface_id().to_string(),
                server,
            },
        );
        log::debug!("RPC registry: registered object '{}'", name);
        Ok(())
    }

    /// Remove the registration of `name`.
    pub fn unregister_object_server(&self, name: &str) -> Result<()> {
        match self.objects.lock().remove(name) {
            Some(_) => {
                log::debug!("RPC registry: unregistered object '{}'", name);
                Ok(())
            }
            None => Err(Error::NotFound(format!("RPC object '{}'", name))),
        }
    }

    /// Dispatch `request` to the object registered as `object_name`.
    ///
    /// A panicking handler is reported as `Unexpected`; the panic never
    /// crosses this call.
    pub fn process_request(&self, object_name: &str, request: &str) -> Result<String> {
        let server = self
            .objects
            .lock()
            .get(object_name)
            .map(|entry| Arc::clone(&entry.server))
            .ok_or_else(|| Error::NotFound(format!("RPC object '{}'", object_name)))?;

        match catch_unwind(AssertUnwindSafe(|| {
            server.handle_request(JSON_RPC_CONTENT_TYPE, request)
        })) {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                log::warn!(
                    "RPC registry: handler of '{}' panicked: {}",
                    object_name,
                    reason
                );
                Err(Error::Unexpected(format!(
                    "handler of '{}' failed: {}",
                    object_name, reason
                )))
            }
        }
    }

    /// All registered names, in name order.
    pub fn get_objects(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    /// Interface ids of `name` (one element, or empty if unknown).
    pub fn get_rpc_iids_for_object(&self, name: &str) -> Vec<String> {
        self.objects
            .lock()
            .get(name)
            .map(|entry| vec![entry.interface_id.clone()])
            .unwrap_or_default()
    }

    /// Interface definition of `name`, only if its IID equals `iid` exactly.
    pub fn get_rpc_interface_definition(&self, name: &str, iid: &str) -> String {
        self.objects
            .lock()
            .get(name)
            .filter(|entry| entry.interface_id == iid)
            .map(|entry| entry.server.interface_definition().to_string())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectRegistry")
            .field("objects", &self.get_objects())
            .finish()
    }
}
