// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Helpers shared by the tests of this and dependent crates.

use std::sync::Arc;

use wsim_engine::sim_driver::SimDriver;
use wsim_engine::test_helpers::{quiet_top, sim_driver};
use wsim_engine::types::SimError;

use crate::context::{SimConfig, SimulationContext};
use crate::prepare::{ClientOptions, ClientWorkload, prepare};
use crate::workload::Workload;

/// A simulation on a default device, keeping a typed handle to the driver so
/// tests can inspect it.
pub struct TestSim {
    pub driver: Arc<SimDriver>,
    pub sim: SimulationContext,
}

impl TestSim {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(sim_driver(), SimConfig::default())
    }

    #[must_use]
    pub fn with_config(driver: Arc<SimDriver>, config: SimConfig) -> Self {
        let sim = SimulationContext::new(&quiet_top(), driver.clone(), config);
        Self { driver, sim }
    }

    /// Parse and assemble a descriptor.
    pub fn assemble(&self, desc: &str) -> Result<Workload, SimError> {
        let steps = self.sim.parse(desc)?;
        Workload::assemble(&self.sim, "workload", steps, None)
    }

    /// Parse, assemble and prepare a descriptor as client 0.
    pub fn client(&self, desc: &str, options: ClientOptions) -> Result<ClientWorkload, SimError> {
        let workload = self.assemble(desc)?;
        prepare(&self.sim, &workload, 0, options)
    }
}

impl Default for TestSim {
    fn default() -> Self {
        Self::new()
    }
}
