// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The GPU side of `wsim`.
//!
//! This crate describes the device the workloads run on and the driver they
//! talk to:
//!
//!  - [`engine`]: logical engine names and physical engine descriptors.
//!  - [`device`]: device topology and capability queries.
//!  - [`driver`]: the [`Driver`](crate::driver::Driver) trait through which
//!    every context, buffer, batch, submission and fence operation goes.
//!  - [`sim_driver`]: a software implementation of that trait which models
//!    execution times without any hardware.
//!
//! # Example
//!
//! ```rust
//! use wsim_engine::device::DeviceInfo;
//! use wsim_engine::driver::{Driver, EngineTarget, Submission};
//! use wsim_engine::engine::EngineId;
//! use wsim_engine::sim_driver::SimDriver;
//!
//! let driver = SimDriver::quiet(DeviceInfo::default());
//! let context = driver.create_context(None).unwrap();
//! let batch = driver.create_batch(100).unwrap();
//! driver.set_batch_duration(batch, Some(100)).unwrap();
//! let submitted = driver
//!     .submit(&Submission {
//!         context,
//!         target: EngineTarget::Engine(EngineId::Rcs),
//!         batch,
//!         buffers: Vec::new(),
//!         fence_waits: Vec::new(),
//!         emit_fence: false,
//!     })
//!     .unwrap();
//! driver.wait(submitted.handle).unwrap();
//! ```

pub mod device;
pub mod driver;
pub mod engine;
pub mod sim_driver;
pub mod test_helpers;
pub mod types;
