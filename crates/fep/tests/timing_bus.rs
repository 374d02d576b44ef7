// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::cast_precision_loss)] // Stats/metrics need this
#![allow(clippy::cast_possible_truncation)] // Test parameters
#![allow(clippy::cast_sign_loss)] // Test data conversions
#![allow(clippy::unreadable_literal)] // Large test constants
#![allow(clippy::doc_markdown)] // Test documentation
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure
#![allow(clippy::items_after_statements)] // Test helpers
#![allow(clippy::too_many_lines)] // Example/test code
#![allow(clippy::needless_pass_by_value)] // Test functions

//! Distributed timing over the in-process bus
//!
//! One participant hosts the timing master, the others run step listeners.
//! Covers AFAP liveness, SYSTEM_TIME pacing, straggler isolation, signal
//! exchange between steps and timing configuration files.

use fep::bus::LocalBus;
use fep::config::{paths, PropertyStore, PropertyTree};
use fep::incident::{IncidentCode, IncidentRecorder};
use fep::timing::{
    AckState, StepCallback, StepConfig, StepDataAccess, Timestamp, TimingConfiguration,
};
use fep::{Error, Participant};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const MASTER: &str = "sim";

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn props() -> PropertyStore {
    let props = PropertyStore::with_defaults();
    props.set(paths::TIMING_MASTER_ELEMENT, MASTER.into());
    props
}

fn client(bus: &LocalBus, name: &str) -> Participant {
    Participant::builder(name)
        .properties(props())
        .build(bus)
        .expect("client participant")
}

fn master(bus: &LocalBus, props: PropertyStore, incidents: Arc<IncidentRecorder>) -> Participant {
    Participant::builder(MASTER)
        .properties(props)
        .incidents(incidents)
        .build(bus)
        .expect("master participant")
}

/// Callback recording every simulation time it is invoked with.
fn recording(times: &Arc<Mutex<Vec<Timestamp>>>) -> StepCallback {
    let times = Arc::clone(times);
    Box::new(move |t, _| times.lock().push(t))
}

/// Initialize and start the clients, then the master once every schedule arrived.
fn run(master: &Participant, clients: &[&Participant]) {
    for client in clients {
        client.initialize().unwrap();
        client.start().unwrap();
    }
    master.initialize().unwrap();
    master
        .master()
        .expect("timing master")
        .await_clients(clients.len(), Duration::from_secs(2))
        .unwrap();
    master.start().unwrap();
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn test_afap_time_strictly_increases() {
    init_logging();
    let bus = LocalBus::new();
    let sim = master(&bus, props(), Arc::new(IncidentRecorder::new()));
    let vehicle = client(&bus, "vehicle");
    let driver = client(&bus, "driver");

    let vehicle_times = Arc::new(Mutex::new(Vec::new()));
    let driver_times = Arc::new(Mutex::new(Vec::new()));
    vehicle
        .timing()
        .register_step_listener("dynamics", StepConfig::new(10_000), recording(&vehicle_times))
        .unwrap();
    driver
        .timing()
        .register_step_listener("pedal", StepConfig::new(20_000), recording(&driver_times))
        .unwrap();

    run(&sim, &[&vehicle, &driver]);
    let sim_master = sim.master().unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || sim_master.current_time() >= 500_000),
        "sim time stuck at {} us",
        sim_master.current_time()
    );
    sim.stop().unwrap();
    vehicle.stop().unwrap();
    driver.stop().unwrap();

    let vehicle_times = vehicle_times.lock().clone();
    assert!(vehicle_times.len() >= 50);
    assert_eq!(vehicle_times[0], 0);
    assert!(vehicle_times.windows(2).all(|w| w[1] - w[0] == 10_000));

    let driver_times = driver_times.lock().clone();
    assert!(driver_times.windows(2).all(|w| w[1] - w[0] == 20_000));

    let states = sim_master.ack_states();
    assert_eq!(states.len(), 2);
    assert!(states.iter().all(|s| s.state != AckState::TimedOut));
}

#[test]
fn test_system_time_factor_two() {
    init_logging();
    let bus = LocalBus::new();
    let props = props();
    props.set(paths::TIMING_TRIGGER_MODE, "SYSTEM_TIME".into());
    props.set(paths::TIMING_SPEED_FACTOR, 2.0.into());
    let sim = master(&bus, props, Arc::new(IncidentRecorder::new()));
    let vehicle = client(&bus, "vehicle");
    vehicle
        .timing()
        .register_step_listener("dynamics", StepConfig::new(10_000), Box::new(|_, _| {}))
        .unwrap();

    run(&sim, &[&vehicle]);
    let started = Instant::now();
    thread::sleep(Duration::from_secs(1));
    let sim_time = sim.master().unwrap().current_time();
    let wall = started.elapsed();
    let drift = sim.master().unwrap().drift_stats();
    sim.stop().unwrap();
    vehicle.stop().unwrap();

    let expected = (wall.as_micros() as f64 * 2.0) as Timestamp;
    assert!(
        (sim_time - expected).abs() < 200_000,
        "sim {} us after {:?} wall",
        sim_time,
        wall
    );
    assert!(drift.tick.samples() > 50);
    assert!(drift.tick.max_us() < 100_000, "max drift {} us", drift.tick.max_us());
    assert!(drift.tick.avg_us() < 10_000.0, "avg drift {} us", drift.tick.avg_us());
}

#[test]
fn test_straggler_is_timed_out_and_excluded() {
    init_logging();
    let bus = LocalBus::new();
    let props = props();
    props.set(paths::TIMING_ACK_TIMEOUT_MS, 200i64.into());
    let incidents = Arc::new(IncidentRecorder::new());
    let sim = master(&bus, props, Arc::clone(&incidents));
    let fast = client(&bus, "fast");
    let slow = client(&bus, "slow");

    let fast_calls = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&fast_calls);
    fast.timing()
        .register_step_listener(
            "step",
            StepConfig::new(10_000),
            Box::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
    slow.timing()
        .register_step_listener("step", StepConfig::new(10_000), Box::new(|_, _| {}))
        .unwrap();

    for client in [&fast, &slow] {
        client.initialize().unwrap();
        client.start().unwrap();
    }
    sim.initialize().unwrap();
    let sim_master = sim.master().unwrap();
    sim_master.await_clients(2, Duration::from_secs(2)).unwrap();
    // acks of "slow" never reach the master
    bus.set_blocked("slow", MASTER, true);
    let started = Instant::now();
    sim.start().unwrap();

    assert!(wait_until(Duration::from_secs(3), || {
        sim_master
            .ack_state("slow")
            .is_some_and(|s| s.state == AckState::TimedOut)
    }));
    let timed_out_after = started.elapsed();
    assert!(timed_out_after >= Duration::from_millis(200));

    let calls_at_timeout = fast_calls.load(Ordering::SeqCst);
    assert!(wait_until(Duration::from_secs(2), || {
        fast_calls.load(Ordering::SeqCst) > calls_at_timeout + 20
    }));
    assert_eq!(incidents.count(IncidentCode::StragglerTimedOut), 1);
    assert_ne!(
        sim_master.ack_state("fast").map(|s| s.state),
        Some(AckState::TimedOut)
    );

    sim.stop().unwrap();
    fast.stop().unwrap();
    slow.stop().unwrap();
}

#[test]
fn test_signal_exchange_between_steps() {
    init_logging();
    let bus = LocalBus::new();
    let sim = master(&bus, props(), Arc::new(IncidentRecorder::new()));
    let vehicle = client(&bus, "vehicle");
    let driver = client(&bus, "driver");

    vehicle
        .timing()
        .register_step_listener(
            "dynamics",
            StepConfig::new(10_000).with_output("speed"),
            Box::new(|t: Timestamp, access: &mut StepDataAccess| {
                access
                    .transmit_data("speed", t.to_le_bytes().to_vec())
                    .unwrap();
            }),
        )
        .unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    driver
        .timing()
        .register_step_listener(
            "controller",
            StepConfig::new(10_000).with_input("speed"),
            Box::new(move |_, access: &mut StepDataAccess| match access.copy_recent_data("speed") {
                Ok(sample) => sink.lock().push(sample),
                Err(Error::NotFound(_) | Error::OutOfSync(_)) => {}
                Err(e) => panic!("unexpected {:?}", e),
            }),
        )
        .unwrap();

    run(&sim, &[&vehicle, &driver]);
    assert!(wait_until(Duration::from_secs(5), || received.lock().len() >= 5));
    sim.stop().unwrap();
    vehicle.stop().unwrap();
    driver.stop().unwrap();

    let received = received.lock();
    for sample in received.iter() {
        assert_eq!(sample.sender, "vehicle");
        let sent_at = Timestamp::from_le_bytes(sample.payload[..8].try_into().unwrap());
        // valid at the end of the producing cycle
        assert_eq!(sample.time_us, sent_at + 10_000);
    }
    // every read sample is new
    assert!(received.windows(2).all(|w| w[1].time_us > w[0].time_us));
}

#[test]
fn test_configuration_file_applied() {
    init_logging();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[participants.vehicle]\nsystem_timeout_s = 12\n\n\
         [participants.vehicle.steps.dynamics]\ncycle_time_us = 25000\n\
         max_runtime_us = 5000\nruntime_violation = \"warn\"\n"
    )
    .unwrap();
    let config = TimingConfiguration::from_file(file.path()).unwrap();

    let bus = LocalBus::new();
    let sim = master(&bus, props(), Arc::new(IncidentRecorder::new()));
    let vehicle = client(&bus, "vehicle");
    let times = Arc::new(Mutex::new(Vec::new()));
    vehicle
        .timing()
        .register_step_listener("dynamics", StepConfig::new(10_000), recording(&times))
        .unwrap();
    vehicle.timing().configure_from(&config).unwrap();

    assert_eq!(vehicle.timing().schedule()[0].cycle_time_us, 25_000);
    assert_eq!(
        vehicle.properties().get_i64(paths::TIMING_SYSTEM_TIMEOUT_S),
        Some(12)
    );

    run(&sim, &[&vehicle]);
    assert!(wait_until(Duration::from_secs(5), || times.lock().len() >= 4));
    sim.stop().unwrap();
    vehicle.stop().unwrap();

    let times = times.lock();
    assert!(times.windows(2).all(|w| w[1] - w[0] == 25_000));
}

#[test]
fn test_local_steps_of_master_participant() {
    init_logging();
    let bus = LocalBus::new();
    let sim = master(&bus, props(), Arc::new(IncidentRecorder::new()));
    let times = Arc::new(Mutex::new(Vec::new()));
    sim.timing()
        .register_step_listener("world", StepConfig::new(5_000), recording(&times))
        .unwrap();

    sim.initialize().unwrap();
    sim.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || times.lock().len() >= 20));
    sim.stop().unwrap();

    let times = times.lock();
    assert!(times.windows(2).all(|w| w[1] - w[0] == 5_000));
    // registered once although the schedule also arrived over the bus
    assert_eq!(sim.master().unwrap().ack_states().len(), 1);
}
