// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Helpers shared by the tests of this and dependent crates.

use std::sync::Arc;

use wsim_track::entity::{Entity, toplevel};
use wsim_track::tracker::dev_null_tracker;

use crate::device::{DeviceInfo, DriverVariant};
use crate::driver::{BatchHandle, ContextHandle, Driver, EngineTarget, Submission, Submitted};
use crate::engine::EngineId;
use crate::sim_driver::SimDriver;

/// A top-level entity that does not log anything.
#[must_use]
pub fn quiet_top() -> Arc<Entity> {
    toplevel(&dev_null_tracker(), "test")
}

/// A driver for a default gen12 i915 device.
#[must_use]
pub fn sim_driver() -> Arc<SimDriver> {
    Arc::new(SimDriver::new(&quiet_top(), DeviceInfo::default()))
}

/// A driver for a device of the given generation and variant.
#[must_use]
pub fn sim_driver_for(generation: u32, variant: DriverVariant, num_video: usize) -> Arc<SimDriver> {
    Arc::new(SimDriver::new(
        &quiet_top(),
        DeviceInfo::new(generation, variant, num_video),
    ))
}

/// Create a batch with the given duration and submit it with no buffers.
pub fn submit_simple(
    driver: &SimDriver,
    context: ContextHandle,
    engine: EngineId,
    duration_us: Option<u64>,
) -> (BatchHandle, Submitted) {
    let batch = driver.create_batch(100).unwrap();
    driver.set_batch_duration(batch, duration_us).unwrap();
    let submitted = driver
        .submit(&Submission {
            context,
            target: EngineTarget::Engine(engine),
            batch,
            buffers: Vec::new(),
            fence_waits: Vec::new(),
            emit_fence: true,
        })
        .unwrap();
    (batch, submitted)
}
