// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Simulation and wall clocks.

use crate::timing::Timestamp;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current simulation time.
pub trait ClockService: Send + Sync {
    /// Current simulation time in microseconds.
    fn time_us(&self) -> Timestamp;
}

/// UTC wall clock in microseconds since the Unix epoch.
pub fn utc_now_us() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as Timestamp)
        .unwrap_or(0)
}
