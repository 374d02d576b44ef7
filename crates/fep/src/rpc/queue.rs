// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-peer response correlation queue.
//!
//! Responses arriving from a peer are appended here by the inbound delivery
//! thread; callers blocked in `send_request` scan the queue for their own
//! request id. A [`ResponseCode::Stop`] sentinel cancels every waiter: it is
//! returned to whoever finds it but stays queued, so each waiter observes it.
//!
//! # Architecture
//! - `parking_lot::Mutex` around a `VecDeque` of pending items
//! - `Condvar` for blocking waits (always bounded by a timeout)
//! - push counter so a waiter can sleep until something new arrives instead
//!   of re-scanning foreign items
//! - set of awaited request ids; responses nobody waits for (any more) are
//!   dropped on arrival instead of being rescanned by every later caller

use super::RequestId;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;

/// Kind of a queued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Response,
    /// Table-wide cancellation sentinel.
    Stop,
}

/// A response waiting to be claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingResponse {
    pub code: ResponseCode,
    pub request_id: RequestId,
    pub payload: String,
}

impl PendingResponse {
    pub fn response(request_id: RequestId, payload: impl Into<String>) -> Self {
        Self {
            code: ResponseCode::Response,
            request_id,
            payload: payload.into(),
        }
    }

    pub fn stop() -> Self {
        Self {
            code: ResponseCode::Stop,
            request_id: 0,
            payload: String::new(),
        }
    }

    pub fn is_stop(&self) -> bool {
        self.code == ResponseCode::Stop
    }
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<PendingResponse>,
    /// Incremented on every `push`.
    pushes: u64,
    awaited: HashSet<RequestId>,
}

/// FIFO of pending responses for one peer.
#[derive(Debug, Default)]
pub struct ResponseQueue {
    state: Mutex<QueueState>,
    changed: Condvar,
}

impl ResponseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item and wake waiters. Never blocks beyond the lock.
    pub fn push(&self, item: PendingResponse) {
        let mut state = self.state.lock();
        state.items.push_back(item);
        state.pushes = state.pushes.wrapping_add(1);
        drop(state);
        // Waiters for different request ids share this queue; each must rescan.
        self.changed.notify_all();
    }

    /// Mark `request_id` as awaited before its request is sent.
    pub fn expect(&self, request_id: RequestId) {
        self.state.lock().awaited.insert(request_id);
    }

    /// Stop awaiting `request_id` and discard a response already queued for it.
    pub fn release(&self, request_id: RequestId) {
        let mut state = self.state.lock();
        if state.awaited.remove(&request_id) {
            state
                .items
                .retain(|item| item.is_stop() || item.request_id != request_id);
        }
    }

    /// Queue a response only if a caller still awaits it.
    ///
    /// `Stop` sentinels are always queued. Returns whether the item was queued.
    pub fn push_awaited(&self, item: PendingResponse) -> bool {
        if !item.is_stop() && !self.state.lock().awaited.contains(&item.request_id) {
            return false;
        }
        self.push(item);
        true
    }

    /// Block up to `timeout` until the queue holds at least one item.
    ///
    /// Returns immediately if it is already non-empty.
    pub fn wait_for_not_empty(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.items.is_empty() {
            return true;
        }
        let _ = self.changed.wait_for(&mut state, timeout);
        !state.items.is_empty()
    }

    /// Current value of the push counter.
    pub fn push_count(&self) -> u64 {
        self.state.lock().pushes
    }

    /// Block up to `timeout` until a push happened after `seen` was read.
    pub fn wait_for_push(&self, seen: u64, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if state.pushes != seen {
            return true;
        }
        let _ = self.changed.wait_for(&mut state, timeout);
        state.pushes != seen
    }

    /// Remove and return the first item answering `request_id`, or the first
    /// `Stop` sentinel.
    ///
    /// Single pass from the head. Unrelated items keep their relative order.
    /// A `Stop` is returned as a copy and left in place, so concurrent and
    /// later waiters observe it as well. If items remain afterwards another
    /// waiter is woken to scan them.
    pub fn pop_matching(&self, request_id: RequestId) -> Option<PendingResponse> {
        // O(n) per call; fine for the handful of in-flight requests per peer.
        let mut state = self.state.lock();
        let position = state
            .items
            .iter()
            .position(|item| item.is_stop() || item.request_id == request_id)?;

        let found = if state.items[position].is_stop() {
            state.items[position].clone()
        } else {
            state.items.remove(position)?
        };

        let remaining = !state.items.is_empty();
        drop(state);
        if remaining {
            self.changed.notify_one();
        }
        Some(found)
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }
}
