// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::doc_markdown)] // Test documentation
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure
#![allow(clippy::too_many_lines)] // Example/test code

//! System state aggregation and remote control events

use fep::bus::LocalBus;
use fep::command::ControlEvent;
use fep::system::{ParticipantState, SystemState};
use fep::Participant;
use std::thread;
use std::time::{Duration, Instant};

const QUERY_TIMEOUT: Duration = Duration::from_millis(500);

fn participants(bus: &LocalBus, names: &[&str]) -> Vec<Participant> {
    names
        .iter()
        .map(|name| Participant::builder(name).build(bus).unwrap())
        .collect()
}

#[test]
fn test_uniform_then_non_uniform() {
    let bus = LocalBus::new();
    let all = participants(&bus, &["A", "B", "C"]);

    assert_eq!(
        all[0].query_system_state(&["A", "B", "C"], QUERY_TIMEOUT).unwrap(),
        SystemState::Uniform(ParticipantState::Idle)
    );

    all[1].initialize().unwrap();
    assert_eq!(all[1].state(), ParticipantState::Ready);
    assert_eq!(
        all[0].query_system_state(&["A", "B", "C"], QUERY_TIMEOUT).unwrap(),
        SystemState::NonUniform
    );
}

#[test]
fn test_silent_peer_makes_state_unknown() {
    let bus = LocalBus::new();
    let all = participants(&bus, &["A", "B", "C"]);
    bus.set_blocked("C", "A", true);

    let started = Instant::now();
    let state = all[0]
        .query_system_state(&["A", "B", "C"], QUERY_TIMEOUT)
        .unwrap();
    assert_eq!(state, SystemState::Unknown);
    // bounded by the query timeout, never hangs
    assert!(started.elapsed() < QUERY_TIMEOUT + Duration::from_millis(500));

    assert_eq!(
        all[0].query_system_state(&["A", "B"], QUERY_TIMEOUT).unwrap(),
        SystemState::Uniform(ParticipantState::Idle)
    );
}

#[test]
fn test_missing_participant_is_unknown() {
    let bus = LocalBus::new();
    let all = participants(&bus, &["A"]);
    assert_eq!(
        all[0]
            .query_system_state(&["A", "ghost"], Duration::from_millis(200))
            .unwrap(),
        SystemState::Unknown
    );
}

#[test]
fn test_control_events_drive_lifecycle() {
    let bus = LocalBus::new();
    let all = participants(&bus, &["ctl", "B", "C"]);
    let controller = &all[0];

    controller.send_control("*", ControlEvent::Initialize).unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while all[1..].iter().any(|p| p.state() != ParticipantState::Ready) && Instant::now() < deadline
    {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(
        controller
            .query_system_state(&["B", "C"], QUERY_TIMEOUT)
            .unwrap(),
        SystemState::Uniform(ParticipantState::Ready)
    );

    controller.send_control("B", ControlEvent::Start).unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while all[1].state() != ParticipantState::Running && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(all[1].state(), ParticipantState::Running);
    assert_eq!(all[2].state(), ParticipantState::Ready);

    controller.send_control("*", ControlEvent::Stop).unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while all[1..].iter().any(|p| p.state() != ParticipantState::Idle) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(
        controller
            .query_system_state(&["ctl", "B", "C"], QUERY_TIMEOUT)
            .unwrap(),
        SystemState::Uniform(ParticipantState::Idle)
    );
}
