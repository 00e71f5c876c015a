// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Named log sources.
//!
//! The run, each workload template, each client and the driver model own an
//! [`Entity`]. Entities form a tree under the `wsim` top level, so a client
//! logs as `wsim::workload0::client1` and log filters can select it by name.

use std::fmt;
use std::sync::Arc;

use crate::{Id, Tracker, create, destroy};

/// A named source of log messages, such as a client or the driver.
///
/// Entities are shared with `Arc` because clients log from their own
/// threads. Only the root made by [`toplevel`] has no parent.
pub struct Entity {
    pub name: String,
    pub parent: Option<Arc<Entity>>,

    /// Tags every message so the tracker can apply per-entity levels.
    pub id: Id,

    pub tracker: Tracker,
}

static JOIN: &str = "::";

impl Entity {
    /// Create a child of `parent` and register its full name with the
    /// tracker.
    #[must_use]
    pub fn new(parent: &Arc<Entity>, name: &str) -> Self {
        let full_name = format!("{parent}{JOIN}{name}");

        let tracker = parent.tracker.clone();
        let id = tracker.unique_id();
        tracker.add_entity(id, &full_name);

        let entity = Self {
            name: String::from(name),
            parent: Some(parent.clone()),
            id,
            tracker,
        };

        create!(entity);

        entity
    }

    /// The `::`-separated path from the root, as matched by log filters.
    #[must_use]
    pub fn full_name(&self) -> String {
        self.to_string()
    }
}

impl Drop for Entity {
    fn drop(&mut self) {
        destroy!(self);
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("id", &self.id)
            .finish()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = &self.parent {
            parent.fmt(f)?;
            write!(f, "{}{}", JOIN, self.name)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

/// Create the root entity of a run.
pub fn toplevel(tracker: &Tracker, name: &str) -> Arc<Entity> {
    let id = tracker.unique_id();
    tracker.add_entity(id, name);
    let top = Arc::new(Entity {
        parent: None,
        name: String::from(name),
        id,
        tracker: tracker.clone(),
    });
    create!(top);
    top
}
