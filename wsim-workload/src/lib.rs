// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Compile and run GPU workload descriptors.
//!
//! A workload goes through four stages:
//!
//!  - [`parser`]: the descriptor text becomes a list of [`Step`](step::Step)s.
//!  - [`workload`]: the steps are validated and assembled into a template,
//!    allocating any shared working sets.
//!  - [`prepare`]: the template is turned into a [`ClientWorkload`] with its
//!    own contexts, buffers and batches.
//!  - [`runner`]: the client loops over its steps, submitting batches to the
//!    driver.
//!
//! [`client::run_clients`] runs several prepared clients in parallel.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//!
//! use wsim_engine::test_helpers::{quiet_top, sim_driver};
//! use wsim_workload::context::{SimConfig, SimulationContext};
//! use wsim_workload::prepare::{ClientOptions, prepare};
//! use wsim_workload::workload::Workload;
//!
//! let top = quiet_top();
//! let sim = SimulationContext::new(&top, sim_driver(), SimConfig::default());
//! let steps = sim.parse("0.RCS.100.0.0,0.BCS.100.-1.1").unwrap();
//! let workload = Workload::assemble(&sim, "workload", steps, None).unwrap();
//! let mut client = prepare(&sim, &workload, 0, ClientOptions::default()).unwrap();
//! let stats = client.run(&AtomicBool::new(false)).unwrap();
//! assert_eq!(stats.iterations, 1);
//! ```
//!
//! [`ClientWorkload`]: prepare::ClientWorkload

pub mod client;
pub mod context;
pub mod parser;
pub mod prepare;
pub mod runner;
pub mod step;
pub mod test_helpers;
pub mod workload;
