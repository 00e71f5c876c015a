// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Run GPU workload descriptors against the simulated driver.
//!
//! For example:
//!   cargo run --bin wsim -- -w "0.RCS.1000.0.0,0.BCS.500.-1.1" -r 10 -v

use anyhow::Result;
use clap::CommandFactory;
use wsim::config::Config;
use wsim::run::run;
use wsim_track::Track;
use wsim_track::builder::setup_trackers;
use wsim_track::entity::toplevel;
use wsim_workload::prepare::ClientRole;

fn main() -> Result<()> {
    let matches = Config::command().get_matches();
    let (config, workloads) = Config::from_matches(&matches)?;

    let tracker = setup_trackers(&config.trackers_config())?;
    let top = toplevel(&tracker, "wsim");

    let result = run(&top, &config, &workloads);
    tracker.shutdown();
    let report = result?;

    let verbosity = config.verbosity();
    for stats in &report.clients {
        if verbosity > 1 || (verbosity > 0 && stats.role == ClientRole::Master) {
            println!("{stats}");
        }
    }
    if verbosity > 0 {
        println!("{report}");
    }
    Ok(())
}
