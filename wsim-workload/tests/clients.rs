// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use std::time::{Duration, Instant};

use wsim_engine::driver::Driver;
use wsim_engine::test_helpers::quiet_top;
use wsim_workload::client::run_clients;
use wsim_workload::prepare::{ClientOptions, ClientRole, prepare};
use wsim_workload::test_helpers::TestSim;

#[test]
fn master_stops_background() {
    let test = TestSim::new();
    let workload = test.assemble("0.RCS.1000.0.1").unwrap();

    let master = prepare(
        &test.sim,
        &workload,
        0,
        ClientOptions {
            repeat: 1,
            role: ClientRole::Master,
            ..ClientOptions::default()
        },
    )
    .unwrap();
    let background = prepare(
        &test.sim,
        &workload,
        1,
        ClientOptions {
            repeat: 1_000_000,
            role: ClientRole::Background,
            ..ClientOptions::default()
        },
    )
    .unwrap();

    let start = Instant::now();
    let stats = run_clients(&quiet_top(), vec![master, background]).unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));

    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].id, 0);
    assert_eq!(stats[0].iterations, 1);
    assert_eq!(stats[1].id, 1);
    assert!(stats[1].iterations < 1_000_000);
    assert!(stats[1].to_string().starts_with(" 1: "));
}

#[test]
fn clients_run_independently() {
    let test = TestSim::new();
    let workload = test.assemble("0.RCS.5000.0.0,0.BCS.5000.-1.1").unwrap();
    let clients = (0..3)
        .map(|id| {
            prepare(
                &test.sim,
                &workload,
                id,
                ClientOptions {
                    repeat: 2,
                    ..ClientOptions::default()
                },
            )
            .unwrap()
        })
        .collect();

    let start = Instant::now();
    let stats = run_clients(&quiet_top(), clients).unwrap();

    // Each client uses its own contexts so they overlap
    assert!(start.elapsed() < Duration::from_millis(60));
    let ids: Vec<usize> = stats.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![0, 1, 2]);
    assert!(stats.iter().all(|s| s.iterations == 2));
    assert_eq!(test.driver.stats().submissions, 12);
}

#[test]
fn client_failure_is_reported() {
    let test = TestSim::new();
    let workload = test.assemble("0.RCS.100.0.0").unwrap();
    let good = prepare(&test.sim, &workload, 0, ClientOptions::default()).unwrap();
    let bad = prepare(&test.sim, &workload, 1, ClientOptions::default()).unwrap();
    test.driver.destroy_context(bad.contexts[0].handle).unwrap();

    let err = run_clients(&quiet_top(), vec![good, bad]).unwrap_err();
    assert!(err.0.starts_with("Unknown context"));
}
