// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! State shared by every stage of a simulation run.

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use wsim_engine::device::DeviceInfo;
use wsim_engine::driver::Driver;
use wsim_engine::types::SimError;
use wsim_track::entity::Entity;

use crate::parser::parse_steps;
use crate::step::Step;

/// Run-wide settings that affect how workloads are compiled and run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Factor applied to every batch duration.
    pub duration_scale: f64,

    /// Factor applied to every delay step.
    pub delay_scale: f64,

    /// Wait for data dependencies in the runner rather than relying on the
    /// driver to order submissions.
    pub dep_sync: bool,

    /// Give every client the same random sequences.
    pub synced_clients: bool,

    /// Seed of the master random number generator.
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            duration_scale: 1.0,
            delay_scale: 1.0,
            dep_sync: false,
            synced_clients: false,
            seed: 0,
        }
    }
}

/// Everything that lives for the whole simulation run.
///
/// One of these is created up front and handed to the parser, the assembler,
/// the preparer and, through the prepared workloads, the runner.
pub struct SimulationContext {
    pub driver: Arc<dyn Driver>,
    pub device: DeviceInfo,
    pub config: SimConfig,
    pub top: Arc<Entity>,

    /// Only drawn from before client threads start.
    master_rng: Mutex<StdRng>,

    /// Seed shared by every random stream when clients are synced.
    synced_seed: u64,
}

impl SimulationContext {
    pub fn new(top: &Arc<Entity>, driver: Arc<dyn Driver>, config: SimConfig) -> Self {
        let device = driver.device_info();
        let mut master_rng = StdRng::seed_from_u64(config.seed);
        let synced_seed = master_rng.next_u64();
        Self {
            driver,
            device,
            config,
            top: top.clone(),
            master_rng: Mutex::new(master_rng),
            synced_seed,
        }
    }

    /// Seed for the next random stream.
    ///
    /// Synced clients all get the same seed; otherwise each call draws a
    /// fresh one from the master generator.
    pub fn next_seed(&self) -> u64 {
        if self.config.synced_clients {
            self.synced_seed
        } else {
            self.master_rng.lock().unwrap().next_u64()
        }
    }

    /// Parse a workload descriptor for this device and configuration.
    pub fn parse(&self, desc: &str) -> Result<Vec<Step>, SimError> {
        parse_steps(desc, &self.device, &self.config)
    }
}
