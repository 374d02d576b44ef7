// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant configuration: property paths, defaults and the property store.
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: property paths and compile-time defaults
//! - **Level 2 (Dynamic)**: [`PropertyStore`], the participant's key/value tree
//!
//! Components never hold configuration values across state changes; they read
//! the tree through the [`PropertyTree`] trait at the point of use (e.g. the RPC
//! timeout is read on every `send_request`).
//!
//! # Example
//!
//! ```
//! use fep::config::{paths, PropertyStore, PropertyTree, PropertyValue};
//!
//! let props = PropertyStore::with_defaults();
//! assert_eq!(props.get_i64(paths::RPC_CLIENT_TIMEOUT_MS), Some(5000));
//!
//! props.set(paths::TIMING_TRIGGER_MODE, PropertyValue::from("SYSTEM_TIME"));
//! assert_eq!(props.search_prefix("ComponentConfig.Timing.").len(), 6);
//! ```

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

// =======================================================================
// Property paths
// =======================================================================

/// Property tree paths consumed by the RPC and timing components.
pub mod paths {
    /// Remote-call timeout of `send_request` in milliseconds.
    pub const RPC_CLIENT_TIMEOUT_MS: &str = "ComponentConfig.RPCClient.nTimeoutMS";

    /// Name of the participant acting as timing master (empty = none).
    pub const TIMING_MASTER_ELEMENT: &str = "ComponentConfig.Timing.TimingMaster.strMasterElement";

    /// Trigger mode of the timing master (`AFAP` or `SYSTEM_TIME`).
    pub const TIMING_TRIGGER_MODE: &str = "ComponentConfig.Timing.TimingMaster.strTriggerMode";

    /// Time factor for `SYSTEM_TIME` mode.
    pub const TIMING_SPEED_FACTOR: &str = "ComponentConfig.Timing.TimingMaster.fSpeedFactor";

    /// Client acknowledgement timeout in seconds.
    pub const TIMING_ACK_TIMEOUT_S: &str = "ComponentConfig.Timing.TimingMaster.tmAckWaitTimeout_s";

    /// Client acknowledgement timeout in milliseconds; overrides the seconds key when > 0.
    pub const TIMING_ACK_TIMEOUT_MS: &str =
        "ComponentConfig.Timing.TimingMaster.tmAckWaitTimeout_ms";

    /// Minimum trigger period in milliseconds (`SYSTEM_TIME` only, 0 = none).
    pub const TIMING_MIN_TRIGGER_TIME_MS: &str =
        "ComponentConfig.Timing.TimingMaster.tmMinTriggerTime_ms";

    /// Client-side system timeout in seconds (no trigger received).
    pub const TIMING_SYSTEM_TIMEOUT_S: &str =
        "ComponentConfig.Timing.TimingClient.tmSystemTimeout_s";
}

// =======================================================================
// Defaults
// =======================================================================

/// Default remote-call timeout (ms).
pub const DEFAULT_RPC_TIMEOUT_MS: i64 = 5000;

/// Default trigger mode.
pub const DEFAULT_TRIGGER_MODE: &str = "AFAP";

/// Default time factor.
pub const DEFAULT_SPEED_FACTOR: f64 = 1.0;

/// Default client acknowledgement timeout (s).
pub const DEFAULT_ACK_TIMEOUT_S: i64 = 10;

/// Default client system timeout (s).
pub const DEFAULT_SYSTEM_TIMEOUT_S: i64 = 300;

/// Upper bound for a single bounded wait inside timing worker loops.
///
/// Every blocking wait of the master and client workers is sliced to this
/// period so shutdown and watchdogs are observed promptly.
pub const TIMING_WAIT_SLICE: Duration = Duration::from_millis(100);

/// Memory bound of a timing schedule (10 MiB).
pub const MAX_SCHEDULE_BYTES: usize = 10 * 1024 * 1024;

/// Receiver name addressing every participant on the bus.
pub const BROADCAST_RECEIVER: &str = "*";

// =======================================================================
// Property values
// =======================================================================

/// A single property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl PropertyValue {
    /// Integer view (floats are truncated, numeric strings parsed).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            PropertyValue::Float(v) => Some(*v as i64),
            PropertyValue::Str(s) => s.trim().parse().ok(),
            PropertyValue::Bool(_) => None,
        }
    }

    /// Float view.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(v) => Some(*v as f64),
            PropertyValue::Float(v) => Some(*v),
            PropertyValue::Str(s) => s.trim().parse().ok(),
            PropertyValue::Bool(_) => None,
        }
    }

    /// String view (only for string values).
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Str(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Str(v)
    }
}

// =======================================================================
// Property tree
// =======================================================================

/// Hierarchical key/value store of a participant.
///
/// Paths are dot-separated (`ComponentConfig.RPCClient.nTimeoutMS`).
pub trait PropertyTree: Send + Sync {
    /// Read a value.
    fn get(&self, path: &str) -> Option<PropertyValue>;

    /// Create or overwrite a value.
    fn set(&self, path: &str, value: PropertyValue);

    /// Integer value at `path`.
    fn get_i64(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(|v| v.as_i64())
    }

    /// Float value at `path`.
    fn get_f64(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(|v| v.as_f64())
    }

    /// String value at `path`.
    fn get_string(&self, path: &str) -> Option<String> {
        self.get(path).and_then(|v| v.as_str().map(str::to_string))
    }
}

/// In-memory property tree (thread-safe, lock-free reads).
///
/// `DashMap` sharding keeps concurrent reads from the RPC caller threads and
/// the timing workers free of a global lock. Cloning shares the same storage.
#[derive(Clone, Default)]
pub struct PropertyStore {
    entries: Arc<DashMap<Arc<str>, PropertyValue>>,
}

impl PropertyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with the default RPC and timing properties.
    #[must_use]
    pub fn with_defaults() -> Self {
        let store = Self::new();
        store.set(paths::RPC_CLIENT_TIMEOUT_MS, DEFAULT_RPC_TIMEOUT_MS.into());
        store.set(paths::TIMING_MASTER_ELEMENT, "".into());
        store.set(paths::TIMING_TRIGGER_MODE, DEFAULT_TRIGGER_MODE.into());
        store.set(paths::TIMING_SPEED_FACTOR, DEFAULT_SPEED_FACTOR.into());
        store.set(paths::TIMING_ACK_TIMEOUT_S, DEFAULT_ACK_TIMEOUT_S.into());
        store.set(paths::TIMING_MIN_TRIGGER_TIME_MS, 0i64.into());
        store.set(paths::TIMING_SYSTEM_TIMEOUT_S, DEFAULT_SYSTEM_TIMEOUT_S.into());
        store
    }

    /// Remove a value, returning it.
    pub fn remove(&self, path: &str) -> Option<PropertyValue> {
        self.entries.remove(path).map(|(_, v)| v)
    }

    /// All entries whose path starts with `prefix`.
    #[must_use]
    pub fn search_prefix(&self, prefix: &str) -> Vec<(Arc<str>, PropertyValue)> {
        self.entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| (Arc::clone(entry.key()), entry.value().clone()))
            .collect()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the store has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PropertyTree for PropertyStore {
    fn get(&self, path: &str) -> Option<PropertyValue> {
        self.entries.get(path).map(|v| v.value().clone())
    }

    fn set(&self, path: &str, value: PropertyValue) {
        self.entries.insert(Arc::from(path), value);
    }
}

impl std::fmt::Debug for PropertyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyStore")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let props = PropertyStore::with_defaults();
        assert_eq!(props.get_i64(paths::RPC_CLIENT_TIMEOUT_MS), Some(5000));
        assert_eq!(
            props.get_string(paths::TIMING_TRIGGER_MODE).as_deref(),
            Some("AFAP")
        );
        assert_eq!(props.get_f64(paths::TIMING_SPEED_FACTOR), Some(1.0));
        assert_eq!(props.get_i64(paths::TIMING_SYSTEM_TIMEOUT_S), Some(300));
        assert!(props.get(paths::TIMING_ACK_TIMEOUT_MS).is_none());
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(PropertyValue::from("800").as_i64(), Some(800));
        assert_eq!(PropertyValue::from(2.5).as_i64(), Some(2));
        assert_eq!(PropertyValue::from(3i64).as_f64(), Some(3.0));
        assert_eq!(PropertyValue::from(true).as_i64(), None);
        assert_eq!(PropertyValue::from(1i64).as_str(), None);
    }

    #[test]
    fn test_clone_shares_storage() {
        let a = PropertyStore::new();
        let b = a.clone();
        a.set("x.y", 1i64.into());
        assert_eq!(b.get_i64("x.y"), Some(1));
        assert_eq!(b.remove("x.y"), Some(PropertyValue::Int(1)));
        assert!(a.is_empty());
    }

    #[test]
    fn test_search_prefix() {
        let props = PropertyStore::with_defaults();
        let rpc = props.search_prefix("ComponentConfig.RPCClient.");
        assert_eq!(rpc.len(), 1);
        assert_eq!(&*rpc[0].0, paths::RPC_CLIENT_TIMEOUT_MS);
    }
}
