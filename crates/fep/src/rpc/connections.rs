// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Peer connection table.
//!
//! Maps a remote participant name to its [`ResponseQueue`]. Callers never own
//! a queue; they hold a short-lived [`ResponseQueueRef`] (a shared-ownership
//! handle) while waiting. Teardown cancels all waiters with a `Stop` sentinel
//! and waits until every handle is released before the table is cleared, so
//! no handle outlives the table entry it was issued for.

use super::queue::{PendingResponse, ResponseQueue};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Counted handle to a peer's response queue.
#[derive(Debug)]
pub struct ResponseQueueRef {
    queue: Arc<ResponseQueue>,
}

impl Deref for ResponseQueueRef {
    type Target = ResponseQueue;

    fn deref(&self) -> &ResponseQueue {
        &self.queue
    }
}

/// Table of known peers.
#[derive(Debug, Default)]
pub struct PeerConnections {
    entries: Mutex<HashMap<String, Arc<ResponseQueue>>>,
    stopped: AtomicBool,
}

impl PeerConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure an entry exists for `name`. Idempotent.
    pub fn add_for_key(&self, name: &str) {
        let mut entries = self.entries.lock();
        if !entries.contains_key(name) {
            log::debug!("RPC connections: added peer '{}'", name);
            entries.insert(name.to_string(), Arc::new(ResponseQueue::new()));
        }
    }

    /// Handle to the queue of `name`; `None` if unknown or while stopping.
    pub fn get(&self, name: &str) -> Option<ResponseQueueRef> {
        let entries = self.entries.lock();
        if self.stopped.load(Ordering::Acquire) {
            return None;
        }
        entries.get(name).map(|queue| ResponseQueueRef {
            queue: Arc::clone(queue),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.lock().contains_key(name)
    }

    /// Number of outstanding handles for `name` (0 if unknown).
    pub fn live_refs(&self, name: &str) -> usize {
        self.entries
            .lock()
            .get(name)
            .map_or(0, |queue| Arc::strong_count(queue) - 1)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Cancel every waiter and drop all entries.
    ///
    /// 1. stop issuing handles
    /// 2. push `Stop` into every queue
    /// 3. spin (yielding) until each entry has no live handle
    /// 4. clear the table and accept new handles again
    ///
    /// Waiters are timeout-bounded and observe the `Stop` on their next scan,
    /// so the spin is short.
    pub fn stop_all_connections(&self) {
        let mut entries = self.entries.lock();
        self.stopped.store(true, Ordering::Release);

        for queue in entries.values() {
            queue.push(PendingResponse::stop());
        }

        for (name, queue) in entries.iter() {
            let mut spins: u64 = 0;
            while Arc::strong_count(queue) > 1 {
                std::thread::yield_now();
                spins += 1;
                if spins % 1_000_000 == 0 {
                    log::debug!(
                        "RPC connections: still waiting for {} handle(s) on '{}'",
                        Arc::strong_count(queue) - 1,
                        name
                    );
                }
            }
        }

        let dropped = entries.len();
        entries.clear();
        self.stopped.store(false, Ordering::Release);
        log::debug!("RPC connections: stopped {} peer(s)", dropped);
    }
}
