// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Define the [`Track`] trait a number of [`Tracker`]s.

/// Include the /dev/null tracker.
pub mod dev_null;
/// Include the multi-tracker.
pub mod multi_tracker;
/// Include the text-based tracker.
pub mod text;

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub use dev_null::DevNullTracker;
use log::Level;
pub use multi_tracker::MultiTracker;
use regex::Regex;
pub use text::TextTracker;

use crate::{Id, ROOT};

/// Error returned when a tracker cannot be configured.
#[derive(Debug)]
pub struct TrackConfigError(pub String);

impl fmt::Display for TrackConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error: {}", self.0)
    }
}

impl std::error::Error for TrackConfigError {}

/// This is the interface that is supported by all [`Tracker`]s.
pub trait Track {
    /// Allocate a new global ID
    fn unique_id(&self) -> Id;

    /// Determine whether an entity is enabled at the given level.
    fn is_entity_enabled(&self, id: Id, level: Level) -> bool;

    /// Register a new entity so that its level can be determined.
    fn add_entity(&self, id: Id, entity_name: &str);

    /// Track when an entity is created.
    fn create(&self, created_by: Id, id: Id, name: &str);

    /// Track when an entity is destroyed.
    fn destroy(&self, destroyed_by: Id, id: Id);

    /// Track a log message of the given level.
    fn log(&self, msg_by: Id, level: Level, msg: fmt::Arguments);

    /// Flush any buffered output.
    fn shutdown(&self);
}

/// The type of a [`Tracker`] that is shared across entities and threads.
pub type Tracker = Arc<dyn Track + Send + Sync>;

/// Create a [`Tracker`] that prints log messages at `level` to `stdout`.
pub fn stdout_tracker(level: Level) -> Tracker {
    let entity_manager = EntityManager::new(level);
    let stdout_writer = Box::new(io::BufWriter::new(io::stdout()));
    Arc::new(TextTracker::new(entity_manager, stdout_writer))
}

/// Create a [`Tracker`] that suppresses all events.
pub fn dev_null_tracker() -> Tracker {
    Arc::new(DevNullTracker {})
}

/// The [`EntityManager`] is responsible for determining entity log levels.
///
/// This manager is also used to allocate unique [`Id`] values.
pub struct EntityManager {
    /// Level of _log_ events to output when no filter matches.
    default_entity_level: Level,

    /// List of regular expressions mapping entity names to log levels. The
    /// first match wins.
    regex_to_entity_level: Vec<(Regex, Level)>,

    /// Levels resolved for each entity as it is added.
    entity_levels: Mutex<HashMap<Id, Level>>,

    /// Used to assign unique IDs.
    unique_id: AtomicU64,
}

impl EntityManager {
    /// Constructor with the default [`log::Level`]
    #[must_use]
    pub fn new(default_entity_level: Level) -> Self {
        Self {
            default_entity_level,
            regex_to_entity_level: Vec::new(),
            entity_levels: Mutex::new(HashMap::new()),
            unique_id: AtomicU64::new(ROOT.0 + 1),
        }
    }

    /// Allocate the next unique [`Id`].
    pub fn unique_id(&self) -> Id {
        Id(self.unique_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Add a filter that sets the level of all entities whose full name
    /// matches `regex_str`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use wsim_track::tracker::EntityManager;
    /// let mut manager = EntityManager::new(log::Level::Warn);
    /// manager.add_entity_level_filter(".*runner.*", log::Level::Trace).unwrap();
    /// ```
    pub fn add_entity_level_filter(
        &mut self,
        regex_str: &str,
        level: Level,
    ) -> Result<(), TrackConfigError> {
        match Regex::new(regex_str) {
            Ok(regex) => self.regex_to_entity_level.push((regex, level)),
            Err(e) => {
                return Err(TrackConfigError(format!(
                    "Failed to parse regex {regex_str}:\n{e}\n"
                )));
            }
        }
        Ok(())
    }

    /// Return the level that applies to an entity with the given full name.
    #[must_use]
    pub fn log_level_for(&self, entity_name: &str) -> Level {
        for (regex, level) in &self.regex_to_entity_level {
            if regex.is_match(entity_name) {
                return *level;
            }
        }
        self.default_entity_level
    }

    /// Resolve and remember the level for a new entity.
    pub fn add_entity(&self, id: Id, entity_name: &str) {
        let level = self.log_level_for(entity_name);
        self.entity_levels.lock().unwrap().insert(id, level);
    }

    /// Determine whether the entity is enabled at `level`.
    pub fn is_log_enabled_at_level(&self, id: Id, level: Level) -> bool {
        let entity_level = match self.entity_levels.lock().unwrap().get(&id) {
            Some(entity_level) => *entity_level,
            None => self.default_entity_level,
        };
        level <= entity_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity_paths() -> Vec<&'static str> {
        vec![
            "wsim",
            "wsim::client0",
            "wsim::client0::runner",
            "wsim::client1::runner",
        ]
    }

    #[test]
    fn no_filters() {
        let manager = EntityManager::new(Level::Error);

        for p in entity_paths() {
            assert_eq!(manager.log_level_for(p), Level::Error);
        }
    }

    #[test]
    fn filter_client0() {
        let mut manager = EntityManager::new(Level::Error);
        manager
            .add_entity_level_filter(r".*client0.*", Level::Debug)
            .unwrap();

        let expected_levels = [Level::Error, Level::Debug, Level::Debug, Level::Error];

        for (i, p) in entity_paths().iter().enumerate() {
            assert_eq!(manager.log_level_for(p), expected_levels[i]);
        }
    }

    #[test]
    fn first_filter_wins() {
        let mut manager = EntityManager::new(Level::Warn);
        manager
            .add_entity_level_filter(r".*client1::runner", Level::Trace)
            .unwrap();
        manager
            .add_entity_level_filter(r".*runner", Level::Info)
            .unwrap();

        let expected_levels = [Level::Warn, Level::Warn, Level::Info, Level::Trace];

        for (i, p) in entity_paths().iter().enumerate() {
            assert_eq!(manager.log_level_for(p), expected_levels[i]);
        }
    }

    #[test]
    fn bad_regex() {
        let mut manager = EntityManager::new(Level::Warn);
        assert!(manager.add_entity_level_filter(r"(", Level::Info).is_err());
    }

    #[test]
    fn enabled_levels() {
        let mut manager = EntityManager::new(Level::Warn);
        manager.add_entity_level_filter(r"dbg", Level::Debug).unwrap();

        let quiet = manager.unique_id();
        manager.add_entity(quiet, "quiet");
        let dbg = manager.unique_id();
        manager.add_entity(dbg, "dbg");

        assert!(manager.is_log_enabled_at_level(quiet, Level::Error));
        assert!(manager.is_log_enabled_at_level(quiet, Level::Warn));
        assert!(!manager.is_log_enabled_at_level(quiet, Level::Info));
        assert!(manager.is_log_enabled_at_level(dbg, Level::Debug));
        assert!(!manager.is_log_enabled_at_level(dbg, Level::Trace));
    }

    #[test]
    fn ids() {
        let manager = EntityManager::new(Level::Error);
        for i in 0..10 {
            assert_eq!(manager.unique_id(), Id(i + ROOT.0 + 1));
        }
    }
}
