// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Id

/// IDs that should be unique across the simulation
///
/// Each _log_ event is emitted with the ID of the entity that emitted it.
/// There are two reserved ID values: [NO_ID](crate::NO_ID) and
/// [ROOT](crate::ROOT).
#[derive(Copy, Clone, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Id(pub u64);

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
