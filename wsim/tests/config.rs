// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use std::env;
use std::io::Write;

use clap::CommandFactory;
use serial_test::serial;
use tempfile::NamedTempFile;
use wsim::config::{Config, WorkloadArg};
use wsim_engine::device::DriverVariant;

fn from_args(args: &[&str]) -> (Config, Vec<WorkloadArg>) {
    let matches = Config::command()
        .try_get_matches_from(std::iter::once("wsim").chain(args.iter().copied()))
        .unwrap();
    Config::from_matches(&matches).unwrap()
}

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn defaults() {
    let (config, workloads) = from_args(&["-w", "0.RCS.100.0.0"]);
    assert_eq!(config.repeat(), 1);
    assert_eq!(config.clients(), 1);
    assert_eq!(config.generation, Some(12));
    assert_eq!(config.variant, Some(DriverVariant::I915));
    assert_eq!(config.log_level(), log::Level::Warn);
    assert_eq!(
        workloads,
        vec![WorkloadArg {
            descriptor: "0.RCS.100.0.0".to_string(),
            master: false,
            priority: 0,
            sseu: false,
        }]
    );
}

#[test]
#[serial]
fn file_then_environment_then_command_line() {
    let file = config_file("repeat = 3\nclients = 2\nvariant = \"xe\"\nduration_scale = 0.5\n");
    let path = file.path().to_str().unwrap();

    let (config, _) = from_args(&["--config", path, "-w", "x"]);
    assert_eq!(config.repeat, Some(3));
    assert_eq!(config.clients, Some(2));
    assert_eq!(config.variant, Some(DriverVariant::Xe));
    assert_eq!(config.duration_scale, Some(0.5));

    unsafe { env::set_var("WSIM_REPEAT", "7") };
    let (config, _) = from_args(&["--config", path, "-w", "x"]);
    assert_eq!(config.repeat, Some(7));
    assert_eq!(config.clients, Some(2));

    let (config, _) = from_args(&["--config", path, "-r", "9", "-c", "1", "-w", "x"]);
    unsafe { env::remove_var("WSIM_REPEAT") };
    assert_eq!(config.repeat, Some(9));
    assert_eq!(config.clients, Some(1));
    assert_eq!(config.variant, Some(DriverVariant::Xe));
}

#[test]
#[serial]
fn environment_flags() {
    unsafe {
        env::set_var("WSIM_DEP_SYNC", "true");
        env::set_var("WSIM_SEED", "42");
    }
    let (config, _) = from_args(&["-w", "x"]);
    unsafe {
        env::remove_var("WSIM_DEP_SYNC");
        env::remove_var("WSIM_SEED");
    }
    assert_eq!(config.seed(), 42);
    assert!(config.sim_config(config.seed()).dep_sync);
}

#[test]
#[serial]
fn missing_config_file() {
    let matches = Config::command()
        .try_get_matches_from(["wsim", "--config", "/does/not/exist.toml", "-w", "x"])
        .unwrap();
    let err = Config::from_matches(&matches).unwrap_err();
    assert_eq!(
        err.0,
        "Configuration file '/does/not/exist.toml' not found!"
    );
}

#[test]
#[serial]
fn invalid_config_value() {
    let file = config_file("repeat = \"many\"\n");
    let matches = Config::command()
        .try_get_matches_from(["wsim", "--config", file.path().to_str().unwrap(), "-w", "x"])
        .unwrap();
    let err = Config::from_matches(&matches).unwrap_err();
    assert!(err.0.starts_with("Invalid configuration"));
}

#[test]
#[serial]
fn verbosity_options() {
    let (config, _) = from_args(&["-q", "-w", "x"]);
    assert_eq!(config.verbosity(), 0);

    let (config, _) = from_args(&["-vv", "-w", "x"]);
    assert_eq!(config.verbosity(), 3);
    assert_eq!(config.log_level(), log::Level::Debug);
}
