// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Turn a configuration into prepared clients and run them.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use wsim_engine::driver::Driver;
use wsim_engine::sim_driver::SimDriver;
use wsim_engine::sim_error;
use wsim_engine::types::SimError;
use wsim_track::entity::Entity;
use wsim_track::{debug, info};
use wsim_workload::client::run_clients;
use wsim_workload::context::SimulationContext;
use wsim_workload::prepare::{ClientOptions, ClientRole, ClientWorkload, prepare};
use wsim_workload::runner::ClientStats;
use wsim_workload::workload::Workload;

use crate::config::{Config, WorkloadArg};
use crate::loader::load_descriptor;

/// The outcome of a whole run.
#[derive(Debug)]
pub struct Report {
    /// Per-client statistics in client order.
    pub clients: Vec<ClientStats>,

    /// Wall time from starting the first client to joining the last.
    pub elapsed: Duration,

    /// Workload iterations requested across all clients.
    pub requested: u64,
}

impl Report {
    #[must_use]
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.requested as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:.3}s elapsed ({:.3} workloads/s)",
            self.elapsed.as_secs_f64(),
            self.rate()
        )
    }
}

/// Run the configured workloads on a driver for the configured device.
pub fn run(
    top: &Arc<Entity>,
    config: &Config,
    workloads: &[WorkloadArg],
) -> Result<Report, SimError> {
    let driver = Arc::new(SimDriver::new(top, config.device()?));
    run_with_driver(top, driver, config, workloads)
}

/// Run the configured workloads on the given driver.
pub fn run_with_driver(
    top: &Arc<Entity>,
    driver: Arc<dyn Driver>,
    config: &Config,
    workloads: &[WorkloadArg],
) -> Result<Report, SimError> {
    let num_clients = check_clients(config, workloads)?;

    let seed = config.seed();
    let sim = SimulationContext::new(top, driver, config.sim_config(seed));
    info!(top ; "random seed {seed}, {num_clients} client(s)");

    let append = match &config.append {
        Some(arg) => {
            let steps = sim
                .parse(&load_descriptor(arg)?)
                .map_err(|e| SimError(format!("Failed to parse append workload: {}", e.0)))?;
            Some(steps)
        }
        None => None,
    };

    let mut templates = Vec::with_capacity(workloads.len());
    for (i, arg) in workloads.iter().enumerate() {
        let steps = sim
            .parse(&load_descriptor(&arg.descriptor)?)
            .map_err(|e| SimError(format!("Failed to parse workload {i}: {}", e.0)))?;
        let workload = Workload::assemble(&sim, &format!("workload{i}"), steps, append.as_deref())
            .map_err(|e| SimError(format!("Failed to parse workload {i}: {}", e.0)))?;
        debug!(top ; "workload {i} has {} steps", workload.steps.len());
        templates.push(workload);
    }

    let clients = prepare_clients(&sim, config, workloads, &templates, num_clients)?;

    let start = Instant::now();
    let stats = run_clients(top, clients)?;
    let elapsed = start.elapsed();

    Ok(Report {
        clients: stats,
        elapsed,
        requested: num_clients as u64 * config.repeat(),
    })
}

/// Check the client options against the workloads and return how many
/// clients will run.
fn check_clients(config: &Config, workloads: &[WorkloadArg]) -> Result<usize, SimError> {
    if workloads.is_empty() {
        return sim_error!("No workload specified!");
    }
    if config.repeat() == 0 {
        return sim_error!("Invalid repeat count!");
    }

    let clients = config.clients();
    if clients == 0 {
        return sim_error!("Invalid number of clients!");
    }
    if workloads.len() > 1 && clients > 1 {
        return sim_error!("Cloned clients cannot be combined with multiple workloads!");
    }

    Ok(clients.max(workloads.len()))
}

fn prepare_clients(
    sim: &SimulationContext,
    config: &Config,
    workloads: &[WorkloadArg],
    templates: &[Workload],
    num_clients: usize,
) -> Result<Vec<ClientWorkload>, SimError> {
    // A lone client has nobody to stop
    let master = if num_clients > 1 {
        workloads.iter().position(|w| w.master)
    } else {
        None
    };

    let mut clients = Vec::with_capacity(num_clients);
    for id in 0..num_clients {
        let index = if workloads.len() > 1 { id } else { 0 };
        let arg = &workloads[index];
        let role = match master {
            Some(master) if master == id => ClientRole::Master,
            Some(_) => ClientRole::Background,
            None => ClientRole::Normal,
        };
        let options = ClientOptions {
            repeat: config.repeat(),
            priority: arg.priority,
            sseu: arg.sseu,
            role,
        };
        let client = prepare(sim, &templates[index], id, options)
            .map_err(|e| SimError(format!("Failed to prepare workload {id}: {}", e.0)))?;
        clients.push(client);
    }
    Ok(clients)
}
