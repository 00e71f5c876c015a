// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! This module provides helper functions for testing logging output
//!
//! The aim of this module is to provide commonly-used functions that enable the
//! testing of the output that should appear from logging macros.

use core::sync::atomic::Ordering;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;

use regex::Regex;

use crate::{Id, Track};

/// A tracker that keeps track events.
pub struct TestTracker {
    events: Mutex<Vec<String>>,

    unique_id: AtomicU64,

    level: log::Level,
}

impl TestTracker {
    /// Create a new [`Tracker`](crate::Tracker) for the tests.
    ///
    /// This keeps the track events in memory for checking later.
    #[must_use]
    pub fn new(initial_id: u64) -> Self {
        Self::with_level(initial_id, log::Level::Trace)
    }

    /// Create a test tracker that only records events up to `level`.
    #[must_use]
    pub fn with_level(initial_id: u64, level: log::Level) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            unique_id: AtomicU64::new(initial_id),
            level,
        }
    }

    fn add_event(&self, event: String) {
        println!("{event}");
        let mut events = self.events.lock().unwrap();
        events.push(event);
    }

    /// Return a copy of the events seen so far.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl Track for TestTracker {
    fn unique_id(&self) -> Id {
        let id = self.unique_id.fetch_add(1, Ordering::SeqCst);
        Id(id)
    }

    fn is_entity_enabled(&self, _id: Id, level: log::Level) -> bool {
        level <= self.level
    }

    fn add_entity(&self, _id: Id, _entity_name: &str) {
        // Do nothing
    }

    fn create(&self, created_by: Id, id: Id, name: &str) {
        self.add_event(format!("{created_by}: created {id}, {name}"));
    }

    fn destroy(&self, destroyed_by: Id, id: Id) {
        self.add_event(format!("{destroyed_by}: destroyed {id}"));
    }

    fn log(&self, id: Id, level: log::Level, msg: std::fmt::Arguments) {
        self.add_event(format!("{id}:{level}: {msg}"));
    }

    fn shutdown(&self) {
        // Do nothing
    }
}

/// Initialise a tracker for tests
///
/// Returns both the concrete [`TestTracker`] (to check events) and the same
/// object as a [`Tracker`](crate::Tracker) to build entities from.
///
/// # Arguments
///
/// * `start_id` - The ID value to be set as the starting value
///
/// # Examples
///
/// ```
/// use wsim_track::test_helpers;
///
/// let (test_tracker, tracker) = wsim_track::test_init!(10);
/// let top = wsim_track::entity::toplevel(&tracker, "top");
/// test_helpers::check_and_clear(&test_tracker, &["0: created 10, top"]);
/// ```
#[macro_export]
macro_rules! test_init {
    ($start_id:expr) => {{
        let test_tracker = std::sync::Arc::new($crate::test_helpers::TestTracker::new($start_id));
        let tracker: $crate::Tracker = test_tracker.clone();
        (test_tracker, tracker)
    }};
}

/// Check and clear the _log_ output
///
/// This function asserts that the events seen since the start or the last
/// time this function was called match the expected regular expressions, and
/// then clears the recorded events.
///
/// # Arguments
///
/// * `tracker`  - A reference to the [`TestTracker`] being used in the test.
/// * `expected` - An array of expected regular expressions that the events
///   will be matched against.
pub fn check_and_clear(tracker: &TestTracker, expected: &[&str]) {
    let mut log_contents_ref = tracker.events.lock().unwrap();

    println!("Checking {:?} matches {:?}", expected, *log_contents_ref);

    // Check that there are the same number of strings produced as expected
    let num_strings = expected.len();
    assert_eq!(num_strings, log_contents_ref.len());

    for (i, log_expect) in expected.iter().enumerate() {
        let re = Regex::new(log_expect).unwrap();
        let actual = &(*log_contents_ref[i]);
        println!("Checking {i}: {log_expect:?} matches {actual:?}");
        assert!(re.is_match(actual));
    }

    log_contents_ref.clear();
}

/// Assert that at least one recorded event matches `expected`.
pub fn check_contains(tracker: &TestTracker, expected: &str) {
    let re = Regex::new(expected).unwrap();
    let events = tracker.events.lock().unwrap();
    assert!(
        events.iter().any(|event| re.is_match(event)),
        "No event matches {expected:?} in {:?}",
        *events
    );
}
