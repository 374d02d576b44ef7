// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant and aggregate system state.
//!
//! A system state query asks a set of participants for their state and folds
//! the answers. Missing answers never block the query beyond its timeout; they
//! turn the aggregate into [`SystemState::Unknown`].

use crate::command::{
    Command, CommandListener, CommandTransmitter, Dispatch, StateNotification, StateRequest,
};
use crate::error::Result;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// State reported by a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticipantState {
    Startup,
    Idle,
    Initializing,
    Ready,
    Running,
    Error,
    Shutdown,
}

/// Aggregate over several participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    /// Every participant answered with the same state.
    Uniform(ParticipantState),
    /// Every participant answered, not all in the same state.
    NonUniform,
    /// At least one participant did not answer.
    Unknown,
}

/// Fold per-participant answers (`None` = no answer).
pub fn aggregate_state(states: &[Option<ParticipantState>]) -> SystemState {
    let mut first = None;
    let mut uniform = true;
    for state in states {
        match (state, first) {
            (None, _) => return SystemState::Unknown,
            (Some(s), None) => first = Some(*s),
            (Some(s), Some(f)) => uniform &= *s == f,
        }
    }
    match first {
        None => SystemState::Unknown,
        Some(s) if uniform => SystemState::Uniform(s),
        Some(_) => SystemState::NonUniform,
    }
}

/// Collects [`StateNotification`]s addressed to one participant.
pub struct StateCollector {
    local_name: String,
    answers: Mutex<HashMap<String, ParticipantState>>,
    arrived: Condvar,
}

impl StateCollector {
    pub fn new(local_name: &str) -> Self {
        Self {
            local_name: local_name.to_string(),
            answers: Mutex::new(HashMap::new()),
            arrived: Condvar::new(),
        }
    }

    /// Ask `participants` for their state and aggregate the answers.
    ///
    /// Waits at most `timeout`; participants that did not answer by then make
    /// the result `Unknown`.
    pub fn query(
        &self,
        transmitter: &dyn CommandTransmitter,
        participants: &[&str],
        timeout: Duration,
    ) -> Result<SystemState> {
        self.answers.lock().clear();
        for name in participants {
            transmitter.transmit(Command::StateRequest(StateRequest {
                sender: self.local_name.clone(),
                receiver: (*name).to_string(),
            }))?;
        }

        let deadline = Instant::now() + timeout;
        let mut answers = self.answers.lock();
        while !participants.iter().all(|p| answers.contains_key(*p)) {
            if self.arrived.wait_until(&mut answers, deadline).timed_out() {
                break;
            }
        }

        let states: Vec<Option<ParticipantState>> = participants
            .iter()
            .map(|p| answers.get(*p).copied())
            .collect();
        let aggregate = aggregate_state(&states);
        if aggregate == SystemState::Unknown {
            log::warn!(
                "system state query: no answer from {:?}",
                participants
                    .iter()
                    .filter(|p| !answers.contains_key(**p))
                    .collect::<Vec<_>>()
            );
        }
        Ok(aggregate)
    }
}

impl CommandListener for StateCollector {
    fn on_state(&self, cmd: &StateNotification) -> Dispatch {
        if cmd.receiver != self.local_name {
            return Dispatch::Ignored;
        }
        self.answers.lock().insert(cmd.sender.clone(), cmd.state);
        self.arrived.notify_all();
        Dispatch::Handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ParticipantState::*;

    #[test]
    fn test_aggregate_uniform() {
        assert_eq!(
            aggregate_state(&[Some(Running), Some(Running)]),
            SystemState::Uniform(Running)
        );
    }

    #[test]
    fn test_aggregate_non_uniform() {
        assert_eq!(
            aggregate_state(&[Some(Running), Some(Idle), Some(Running)]),
            SystemState::NonUniform
        );
    }

    #[test]
    fn test_aggregate_missing_is_unknown() {
        assert_eq!(
            aggregate_state(&[Some(Running), None]),
            SystemState::Unknown
        );
        assert_eq!(aggregate_state(&[]), SystemState::Unknown);
    }

    struct Loopback<'a>(&'a StateCollector, ParticipantState);

    impl CommandTransmitter for Loopback<'_> {
        fn transmit(&self, command: Command) -> Result<()> {
            if let Command::StateRequest(req) = command {
                if req.receiver != "silent" {
                    let answer = Command::State(StateNotification {
                        sender: req.receiver,
                        receiver: req.sender,
                        state: self.1,
                    });
                    answer.dispatch(self.0);
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_query_collects_answers() {
        let collector = StateCollector::new("monitor");
        let bus = Loopback(&collector, Ready);
        let state = collector
            .query(&bus, &["a", "b"], Duration::from_millis(50))
            .unwrap();
        assert_eq!(state, SystemState::Uniform(Ready));
    }

    #[test]
    fn test_query_does_not_hang_on_silent_peer() {
        let collector = StateCollector::new("monitor");
        let bus = Loopback(&collector, Ready);
        let start = Instant::now();
        let state = collector
            .query(&bus, &["a", "silent"], Duration::from_millis(50))
            .unwrap();
        assert_eq!(state, SystemState::Unknown);
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
