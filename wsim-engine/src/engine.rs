// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Logical engine identifiers and physical engine descriptors.
//!
//! Workload descriptors name engines with [`EngineId`] values. Some of these
//! are generic (`DEFAULT`, `VCS`) and only become a physical
//! [`EngineDescriptor`] once the device topology is known.

use std::fmt;
use std::str::FromStr;

use crate::sim_error;
use crate::types::SimError;

/// Number of logical engine identifiers.
pub const NUM_ENGINES: usize = 7;

/// Logical engine selector used by workload steps.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EngineId {
    Default,
    Rcs,
    Bcs,
    Vcs,
    Vcs1,
    Vcs2,
    Vecs,
}

impl EngineId {
    /// All engines in index order.
    pub const ALL: [EngineId; NUM_ENGINES] = [
        EngineId::Default,
        EngineId::Rcs,
        EngineId::Bcs,
        EngineId::Vcs,
        EngineId::Vcs1,
        EngineId::Vcs2,
        EngineId::Vecs,
    ];

    /// Dense index of this engine, suitable for per-engine arrays.
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Bit of this engine in an engine mask.
    #[must_use]
    pub fn mask_bit(self) -> u64 {
        1 << self.index()
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            EngineId::Default => "DEFAULT",
            EngineId::Rcs => "RCS",
            EngineId::Bcs => "BCS",
            EngineId::Vcs => "VCS",
            EngineId::Vcs1 => "VCS1",
            EngineId::Vcs2 => "VCS2",
            EngineId::Vecs => "VECS",
        }
    }

    /// Whether this names a specific engine rather than a class.
    #[must_use]
    pub fn is_specific(self) -> bool {
        !matches!(self, EngineId::Default | EngineId::Vcs)
    }

    #[must_use]
    pub fn class(self) -> EngineClass {
        match self {
            EngineId::Default | EngineId::Rcs => EngineClass::Render,
            EngineId::Bcs => EngineClass::Copy,
            EngineId::Vcs | EngineId::Vcs1 | EngineId::Vcs2 => EngineClass::Video,
            EngineId::Vecs => EngineClass::VideoEnhance,
        }
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for EngineId {
    type Err = SimError;

    /// Engine names are matched case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for engine in EngineId::ALL {
            if engine.name().eq_ignore_ascii_case(s) {
                return Ok(engine);
            }
        }
        sim_error!(format!("Unknown engine '{s}'"))
    }
}

/// Class of a physical engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EngineClass {
    Render,
    Copy,
    Video,
    VideoEnhance,
}

impl fmt::Display for EngineClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EngineClass::Render => write!(f, "render"),
            EngineClass::Copy => write!(f, "copy"),
            EngineClass::Video => write!(f, "video"),
            EngineClass::VideoEnhance => write!(f, "video-enhance"),
        }
    }
}

/// A physical engine: a class plus an instance number within that class.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EngineDescriptor {
    pub class: EngineClass,
    pub instance: u16,
}

impl EngineDescriptor {
    #[must_use]
    pub fn new(class: EngineClass, instance: u16) -> Self {
        Self { class, instance }
    }
}

impl fmt::Display for EngineDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.class, self.instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_case_insensitive() {
        assert_eq!("rcs".parse::<EngineId>().unwrap(), EngineId::Rcs);
        assert_eq!("Vcs2".parse::<EngineId>().unwrap(), EngineId::Vcs2);
        assert_eq!("VECS".parse::<EngineId>().unwrap(), EngineId::Vecs);
        assert!("VCS3".parse::<EngineId>().is_err());
        assert!("".parse::<EngineId>().is_err());
    }

    #[test]
    fn indices_are_dense() {
        for (i, engine) in EngineId::ALL.iter().enumerate() {
            assert_eq!(engine.index(), i);
        }
    }

    #[test]
    fn generic_engines() {
        assert!(!EngineId::Default.is_specific());
        assert!(!EngineId::Vcs.is_specific());
        assert!(EngineId::Vcs1.is_specific());
        assert_eq!(EngineId::Default.class(), EngineClass::Render);
    }
}
