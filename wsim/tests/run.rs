// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;
use wsim::config::{Config, WorkloadArg};
use wsim::run::{Report, run_with_driver};
use wsim_engine::device::DriverVariant;
use wsim_engine::sim_driver::SimDriver;
use wsim_engine::test_helpers::{quiet_top, sim_driver, sim_driver_for};
use wsim_engine::types::SimError;
use wsim_workload::prepare::ClientRole;

fn arg(descriptor: &str) -> WorkloadArg {
    WorkloadArg {
        descriptor: descriptor.to_string(),
        master: false,
        priority: 0,
        sseu: false,
    }
}

fn config() -> Config {
    Config {
        seed: Some(1),
        ..Config::default()
    }
}

fn run(
    driver: &Arc<SimDriver>,
    config: &Config,
    workloads: &[WorkloadArg],
) -> Result<Report, SimError> {
    run_with_driver(&quiet_top(), driver.clone(), config, workloads)
}

#[test]
fn single_workload() {
    let driver = sim_driver();
    let config = Config {
        repeat: Some(3),
        ..config()
    };
    let report = run(&driver, &config, &[arg("0.RCS.100.0.0,0.BCS.100.-1.1")]).unwrap();

    assert_eq!(report.clients.len(), 1);
    assert_eq!(report.clients[0].iterations, 3);
    assert_eq!(report.clients[0].role, ClientRole::Normal);
    assert_eq!(report.requested, 3);
    assert_eq!(driver.stats().submissions, 6);
}

#[test]
fn workload_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "# one batch, then a delay").unwrap();
    writeln!(file, "0.RCS.100.0.0").unwrap();
    writeln!(file, "d.100").unwrap();

    let driver = sim_driver();
    let report = run(&driver, &config(), &[arg(file.path().to_str().unwrap())]).unwrap();
    assert_eq!(report.clients[0].iterations, 1);
    assert_eq!(driver.stats().submissions, 1);
}

#[test]
fn cloned_clients() {
    let driver = sim_driver();
    let config = Config {
        clients: Some(3),
        repeat: Some(2),
        ..config()
    };
    let report = run(&driver, &config, &[arg("0.RCS.100.0.0")]).unwrap();

    let ids: Vec<usize> = report.clients.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![0, 1, 2]);
    assert_eq!(report.requested, 6);
    assert_eq!(driver.stats().submissions, 6);
}

#[test]
fn per_workload_priority() {
    let driver = sim_driver();
    let workloads = [
        arg("0.RCS.100.0.0"),
        WorkloadArg {
            priority: 3,
            ..arg("0.BCS.100.0.0")
        },
    ];
    let before = driver.stats().priority_writes;
    let report = run(&driver, &config(), &workloads).unwrap();

    assert_eq!(report.clients.len(), 2);
    assert_eq!(driver.stats().priority_writes, before + 1);
}

#[test]
fn master_stops_the_others() {
    let driver = sim_driver();
    let workloads = [
        WorkloadArg {
            master: true,
            ..arg("0.RCS.5000.0.1")
        },
        arg("0.BCS.1000.0.1"),
    ];
    let config = Config {
        repeat: Some(2),
        ..config()
    };

    let start = Instant::now();
    let report = run(&driver, &config, &workloads).unwrap();

    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(report.clients[0].role, ClientRole::Master);
    assert_eq!(report.clients[0].iterations, 2);
    assert_eq!(report.clients[1].role, ClientRole::Background);
    assert!(report.clients[1].iterations >= 1);
}

#[test]
fn lone_master_is_a_normal_client() {
    let driver = sim_driver();
    let workloads = [WorkloadArg {
        master: true,
        ..arg("0.RCS.100.0.0")
    }];
    let report = run(&driver, &config(), &workloads).unwrap();
    assert_eq!(report.clients[0].role, ClientRole::Normal);
}

#[test]
fn append_to_every_workload() {
    let driver = sim_driver();
    let config = Config {
        append: Some("0.VECS.100.0.0".to_string()),
        ..config()
    };
    run(&driver, &config, &[arg("0.RCS.100.0.0"), arg("0.BCS.100.0.0")]).unwrap();
    assert_eq!(driver.stats().submissions, 4);
}

#[test]
fn parse_errors_name_the_workload() {
    let driver = sim_driver();
    let err = run(&driver, &config(), &[arg("0.RCS.100.0.0"), arg("d.0")]).unwrap_err();
    assert_eq!(err.0, "Failed to parse workload 1: Invalid delay at step 0!");

    let config = Config {
        append: Some("s.1".to_string()),
        ..config()
    };
    let err = run(&driver, &config, &[arg("0.RCS.100.0.0")]).unwrap_err();
    assert_eq!(
        err.0,
        "Failed to parse append workload: Invalid sync target at step 0!"
    );
}

#[test]
fn capability_errors() {
    let driver = sim_driver_for(12, DriverVariant::Xe, 2);
    let err = run(&driver, &config(), &[arg("P.0.1,0.RCS.100.0.0")]).unwrap_err();
    assert!(err.0.starts_with("Failed to parse workload 0: "));

    let driver = sim_driver_for(12, DriverVariant::I915, 1);
    let err = run(&driver, &config(), &[arg("0.VCS2.100.0.0")]).unwrap_err();
    assert_eq!(
        err.0,
        "Failed to prepare workload 0: Engine VCS2 at step 0 is not present!"
    );
}
