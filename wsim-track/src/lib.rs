// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! This crate provides the _track_ (logging) capabilities used by `wsim`.
//!
//! Every part of the simulator that wants to emit messages owns an
//! [`Entity`](crate::entity::Entity). Entities form a hierarchy below a single
//! top-level entity, for example `wsim::client1::runner`, and the level at
//! which each entity emits is chosen by matching its full name against a list
//! of regular expressions.
//!
//! Messages are emitted using the [`trace`], [`debug`], [`info`], [`warn`] and
//! [`error`] macros which take the entity followed by a format string:
//!
//! ```rust
//! use wsim_track::entity::toplevel;
//! use wsim_track::info;
//! use wsim_track::tracker::dev_null_tracker;
//!
//! let tracker = dev_null_tracker();
//! let top = toplevel(&tracker, "top");
//! info!(top ; "{} clients", 4);
//! ```
//!
//! All trackers are `Send + Sync` so that entities can be moved into client
//! threads.

// Enable warnings for missing documentation
#![warn(missing_docs)]

use std::sync::{Arc, Mutex};

pub use log;

pub mod builder;
pub mod entity;
pub mod id;

/// Include the trackers.
pub mod tracker;
pub use tracker::{Track, Tracker};

pub mod test_helpers;

/// Type used for unique entity identifiers.
pub use id::Id;

/// A type alias for objects that receive _log_ events.
///
/// The writer must implement Send in order to be shared between threads.
pub type Writer = Box<dyn std::io::Write + Send>;
type SharedWriter = Arc<Mutex<Writer>>;

/// ID value which indicates where there is no valid ID
pub const NO_ID: Id = Id(0);

/// The root ID from which all other IDs are derived
pub const ROOT: Id = Id(1);

/// Add an entity creation event
#[macro_export]
macro_rules! create {
    ($entity:expr) => {{
        if $entity
            .tracker
            .is_entity_enabled($entity.id, $crate::log::Level::Trace)
        {
            let parent_id = match &$entity.parent {
                Some(parent) => parent.id,
                None => $crate::NO_ID,
            };
            $entity
                .tracker
                .create(parent_id, $entity.id, $entity.full_name().as_str());
        }
    }};
}

/// Add an entity destroy event
#[macro_export]
macro_rules! destroy {
    ($entity:expr) => {{
        if $entity
            .tracker
            .is_entity_enabled($entity.id, $crate::log::Level::Trace)
        {
            match &$entity.parent {
                Some(parent) => $entity.tracker.destroy(parent.id, $entity.id),
                None => $entity.tracker.destroy($crate::NO_ID, $entity.id),
            };
        }
    }};
}

/// Base macro for log messages of all level.
///
/// The message is only formatted if the [`Tracker`] has the entity enabled at
/// the requested level.
#[macro_export]
macro_rules! log_base {
    ($entity:expr ; $lvl:expr, $($arg:tt)+) => (
        if $entity.tracker.is_entity_enabled($entity.id, $lvl) {
            $entity.tracker.log($entity.id, $lvl, format_args!($($arg)+));
        }
    );
}

/// The `trace` macro provides a wrapper for the [`log_base`] macro
/// at level `log::Level::Trace`
#[macro_export]
macro_rules! trace {
    ($entity:expr ; $($arg:tt)+) => (
        $crate::log_base!($entity ; $crate::log::Level::Trace, $($arg)+);
    );
}

/// The `debug` macro provides a wrapper for the [`log_base`] macro
/// at level `log::Level::Debug`
#[macro_export]
macro_rules! debug {
    ($entity:expr ; $($arg:tt)+) => (
        $crate::log_base!($entity ; $crate::log::Level::Debug, $($arg)+);
    );
}

/// The `info` macro provides a wrapper for the [`log_base`] macro at
/// level `log::Level::Info`
#[macro_export]
macro_rules! info {
    ($entity:expr ; $($arg:tt)+) => (
        $crate::log_base!($entity ; $crate::log::Level::Info, $($arg)+);
    );
}

/// The `warn` macro provides a wrapper for the [`log_base`] macro at
/// level `log::Level::Warn`
#[macro_export]
macro_rules! warn {
    ($entity:expr ; $($arg:tt)+) => (
        $crate::log_base!($entity ; $crate::log::Level::Warn, $($arg)+);
    );
}

/// the `error` macro provides a wrapper for the [`log_base`] macro
/// at level `log::Level::Error`
#[macro_export]
macro_rules! error {
    ($entity:expr ; $($arg:tt)+) => (
        $crate::log_base!($entity ; $crate::log::Level::Error, $($arg)+);
    );
}
