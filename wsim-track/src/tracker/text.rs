// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::tracker::{EntityManager, Track};
use crate::{Id, SharedWriter, Writer};

/// A simple text logger to output messages to a Writer.
pub struct TextTracker {
    entity_manager: EntityManager,

    /// Writer to which all _log_ events will be written.
    writer: SharedWriter,
}

impl TextTracker {
    /// Create a new [`TextTracker`] with an [`EntityManager`].
    pub fn new(entity_manager: EntityManager, writer: Writer) -> Self {
        Self {
            entity_manager,
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    fn write_line(&self, line: String) {
        let mut writer = self.writer.lock().unwrap();
        // A failed write to the log cannot be reported anywhere else
        let _ = writer.write_all(line.as_bytes());
    }
}

/// Implementation for each [`Track`] event
impl Track for TextTracker {
    fn unique_id(&self) -> Id {
        self.entity_manager.unique_id()
    }

    fn is_entity_enabled(&self, id: Id, level: log::Level) -> bool {
        self.entity_manager.is_log_enabled_at_level(id, level)
    }

    fn add_entity(&self, id: Id, entity_name: &str) {
        self.entity_manager.add_entity(id, entity_name);
    }

    fn create(&self, created_by: Id, id: Id, name: &str) {
        self.write_line(format!("{created_by}: created {id}, {name}\n"));
    }

    fn destroy(&self, destroyed_by: Id, id: Id) {
        self.write_line(format!("{destroyed_by}: destroyed {id}\n"));
    }

    fn log(&self, id: Id, level: log::Level, msg: std::fmt::Arguments) {
        self.write_line(format!("{id}:{level}: {msg}\n"));
    }

    fn shutdown(&self) {
        let _ = self.writer.lock().unwrap().flush();
    }
}

impl Drop for TextTracker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
