// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tick schedule of the timing master.
//!
//! The schedule is a ring of slots spaced by the greatest common divisor of
//! all step periods. It covers one hyper-period (their least common multiple),
//! so slot `i` holds every step whose period divides `i * cycle`.
//!
//! ```text
//! periods 10ms, 20ms -> cycle 10ms, length 2
//!   slot 0 @  0ms: a, b
//!   slot 1 @ 10ms: a
//! ```
//!
//! Entries with an empty step id are placeholders: they force a tick at that
//! slot (minimum trigger time) but never wait for an acknowledgement.

use super::types::{ScheduleConfig, Timestamp};
use crate::config::MAX_SCHEDULE_BYTES;
use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// One slot: step id -> acknowledged.
#[derive(Debug, Clone, Default)]
struct ScheduleSlot {
    steps: BTreeMap<String, bool>,
    has_configured_step: bool,
}

impl ScheduleSlot {
    fn insert(&mut self, step_id: &str) {
        self.steps.insert(step_id.to_string(), false);
        self.has_configured_step |= !step_id.is_empty();
    }

    fn clear_acks(&mut self) {
        for acked in self.steps.values_mut() {
            *acked = false;
        }
    }
}

/// Upper bound of slots kept in memory.
const MAX_SLOTS: usize = MAX_SCHEDULE_BYTES / std::mem::size_of::<ScheduleSlot>();

fn gcd(mut a: Timestamp, mut b: Timestamp) -> Timestamp {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Slot ring with per-slot acknowledgement flags.
#[derive(Debug, Default)]
pub struct ScheduleMap {
    slots: Vec<ScheduleSlot>,
    cycle_time_us: Timestamp,
    current: usize,
}

impl ScheduleMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the ring from `configs`.
    ///
    /// No configs leave an empty schedule. Fails with `InvalidArgument` on a
    /// non-positive period or when the hyper-period needs more slots than the
    /// memory bound allows; the map is empty afterwards.
    pub fn configure(&mut self, configs: &[ScheduleConfig]) -> Result<()> {
        self.slots.clear();
        self.cycle_time_us = 0;
        self.current = 0;

        if configs.is_empty() {
            return Ok(());
        }
        if let Some(bad) = configs.iter().find(|c| c.cycle_time_us <= 0) {
            return Err(Error::InvalidArgument(format!(
                "step '{}' has cycle time {} us",
                bad.step_id, bad.cycle_time_us
            )));
        }

        let cycle = configs
            .iter()
            .map(|c| c.cycle_time_us)
            .fold(0, gcd);

        // Count slots as lcm / gcd without computing the lcm itself, so huge
        // co-prime periods are rejected instead of overflowing.
        let mut length: u128 = 1;
        for config in configs {
            let factor = (config.cycle_time_us / cycle) as u128;
            length = length / gcd_u128(length, factor) * factor;
            if length > MAX_SLOTS as u128 {
                return Err(Error::InvalidArgument(format!(
                    "schedule would need more than {} slots; round step periods to common multiples",
                    MAX_SLOTS
                )));
            }
        }

        let length = length as usize;
        let mut slots = vec![ScheduleSlot::default(); length];
        for (index, slot) in slots.iter_mut().enumerate() {
            let slot_time = cycle * index as Timestamp;
            for config in configs {
                if slot_time % config.cycle_time_us == 0 {
                    slot.insert(&config.step_id);
                }
            }
        }

        log::debug!(
            "schedule: {} steps, cycle {} us, {} slots",
            configs.len(),
            cycle,
            length
        );
        self.slots = slots;
        self.cycle_time_us = cycle;
        Ok(())
    }

    /// Drop the schedule.
    pub fn reset(&mut self) {
        self.slots.clear();
        self.cycle_time_us = 0;
        self.current = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots in one hyper-period.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Spacing of two slots (0 when empty).
    pub fn cycle_time(&self) -> Timestamp {
        self.cycle_time_us
    }

    /// Index of the current slot.
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Acknowledge `step_id` in the current slot.
    ///
    /// Returns false for an id not due in this slot or already acknowledged.
    pub fn mark_step(&mut self, step_id: &str) -> bool {
        match self
            .slots
            .get_mut(self.current)
            .and_then(|slot| slot.steps.get_mut(step_id))
        {
            Some(acked) if !*acked => {
                *acked = true;
                true
            }
            _ => false,
        }
    }

    /// Every configured step of the current slot is acknowledged.
    ///
    /// False on an empty schedule.
    pub fn is_complete(&self) -> bool {
        self.slots.get(self.current).is_some_and(|slot| {
            slot.steps
                .iter()
                .all(|(id, acked)| id.is_empty() || *acked)
        })
    }

    /// Current slot has any entry (placeholders included).
    pub fn has_steps_in_current(&self) -> bool {
        self.slots
            .get(self.current)
            .is_some_and(|slot| !slot.steps.is_empty())
    }

    /// Current slot has at least one real step to wait for.
    pub fn is_configured_step(&self) -> bool {
        self.slots
            .get(self.current)
            .is_some_and(|slot| slot.has_configured_step)
    }

    /// `step_id` is due in the current slot.
    pub fn is_step_in_current(&self, step_id: &str) -> bool {
        self.slots
            .get(self.current)
            .is_some_and(|slot| slot.steps.contains_key(step_id))
    }

    /// Configured steps of the current slot still waiting for their ack.
    pub fn pending_steps(&self) -> Vec<String> {
        self.slots
            .get(self.current)
            .map(|slot| {
                slot.steps
                    .iter()
                    .filter(|(id, acked)| !id.is_empty() && !**acked)
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Clear the acks of the current slot and move to the next (wrapping).
    pub fn increment(&mut self) {
        if self.slots.is_empty() {
            return;
        }
        self.slots[self.current].clear_acks();
        self.current = (self.current + 1) % self.slots.len();
    }
}

fn gcd_u128(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(step: &str, cycle: Timestamp) -> ScheduleConfig {
        ScheduleConfig {
            step_id: step.into(),
            participant: "p".into(),
            cycle_time_us: cycle,
        }
    }

    #[test]
    fn test_cycle_and_length() {
        let mut map = ScheduleMap::new();
        map.configure(&[cfg("a", 10_000), cfg("b", 20_000), cfg("c", 30_000)])
            .unwrap();
        assert_eq!(map.cycle_time(), 10_000);
        assert_eq!(map.len(), 6);

        // slot 0: all steps
        assert!(map.is_step_in_current("a"));
        assert!(map.is_step_in_current("b"));
        assert!(map.is_step_in_current("c"));

        // slot 1 @ 10ms: only a
        map.increment();
        assert!(map.is_step_in_current("a"));
        assert!(!map.is_step_in_current("b"));
        assert!(!map.is_step_in_current("c"));

        // slot 2 @ 20ms: a, b
        map.increment();
        assert!(map.is_step_in_current("b"));
        assert!(!map.is_step_in_current("c"));
    }

    #[test]
    fn test_marking_and_completion() {
        let mut map = ScheduleMap::new();
        map.configure(&[cfg("a", 10), cfg("b", 20)]).unwrap();

        assert!(!map.is_complete());
        assert!(map.mark_step("a"));
        assert!(!map.mark_step("a"), "second ack must not count");
        assert!(!map.mark_step("ghost"));
        assert_eq!(map.pending_steps(), vec!["b".to_string()]);
        assert!(map.mark_step("b"));
        assert!(map.is_complete());

        // acks are cleared when leaving the slot
        map.increment();
        map.increment();
        assert_eq!(map.current_index(), 0);
        assert!(!map.is_complete());
    }

    #[test]
    fn test_placeholder_never_waits() {
        let mut map = ScheduleMap::new();
        map.configure(&[cfg("", 5), cfg("a", 10)]).unwrap();
        assert_eq!(map.cycle_time(), 5);

        map.increment();
        assert!(map.has_steps_in_current());
        assert!(!map.is_configured_step());
        assert!(map.is_complete());
    }

    #[test]
    fn test_empty_and_invalid() {
        let mut map = ScheduleMap::new();
        map.configure(&[]).unwrap();
        assert!(map.is_empty());
        assert!(!map.is_complete());
        assert!(!map.has_steps_in_current());
        map.increment();

        assert!(matches!(
            map.configure(&[cfg("a", 0)]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(map.is_empty());
    }

    #[test]
    fn test_oversized_schedule_rejected() {
        let mut map = ScheduleMap::new();
        let result = map.configure(&[
            cfg("a", 1),
            cfg("b", 999_983),
            cfg("c", 1_000_003),
        ]);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert!(map.is_empty());
        assert_eq!(map.cycle_time(), 0);
    }
}
