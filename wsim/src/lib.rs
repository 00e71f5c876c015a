// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Library behind the `wsim` binary.
//!
//! [`config`] resolves the command line and configuration sources,
//! [`loader`] reads descriptor files and [`run`] builds and runs the
//! clients.

pub mod config;
pub mod loader;
pub mod run;
