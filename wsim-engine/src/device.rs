// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Device topology and capabilities.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::engine::{EngineClass, EngineDescriptor, EngineId};
use crate::sim_error;
use crate::types::SimError;

/// Hardware generation assumed when none is configured.
pub const DEFAULT_GENERATION: u32 = 12;

/// Number of video engine instances assumed when none is configured.
pub const DEFAULT_VIDEO_ENGINES: usize = 2;

/// Largest number of video instances that can be addressed by name.
pub const MAX_VIDEO_ENGINES: usize = 2;

/// First generation that can run unbound (spinning) batches.
const UNBOUND_BATCH_GENERATION: u32 = 8;

/// First generation that supports load balancing across engines.
const LOAD_BALANCE_GENERATION: u32 = 11;

/// The flavour of kernel driver being modelled.
///
/// The two flavours differ in which workload features they support.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverVariant {
    #[default]
    I915,
    Xe,
}

impl fmt::Display for DriverVariant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DriverVariant::I915 => write!(f, "i915"),
            DriverVariant::Xe => write!(f, "xe"),
        }
    }
}

impl FromStr for DriverVariant {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "i915" => Ok(DriverVariant::I915),
            "xe" => Ok(DriverVariant::Xe),
            _ => sim_error!(format!("Unknown driver variant '{s}'")),
        }
    }
}

/// Everything the workload code needs to know about the device.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceInfo {
    pub generation: u32,
    pub variant: DriverVariant,
    pub engines: Vec<EngineDescriptor>,
}

impl DeviceInfo {
    /// Build a device with one render, one copy, `num_video` video and one
    /// video-enhance engine.
    #[must_use]
    pub fn new(generation: u32, variant: DriverVariant, num_video: usize) -> Self {
        let mut engines = vec![
            EngineDescriptor::new(EngineClass::Render, 0),
            EngineDescriptor::new(EngineClass::Copy, 0),
        ];
        for instance in 0..num_video.min(MAX_VIDEO_ENGINES) {
            engines.push(EngineDescriptor::new(EngineClass::Video, instance as u16));
        }
        engines.push(EngineDescriptor::new(EngineClass::VideoEnhance, 0));

        Self {
            generation,
            variant,
            engines,
        }
    }

    #[must_use]
    pub fn is_xe(&self) -> bool {
        self.variant == DriverVariant::Xe
    }

    #[must_use]
    pub fn supports_unbound_batches(&self) -> bool {
        self.generation >= UNBOUND_BATCH_GENERATION
    }

    #[must_use]
    pub fn supports_load_balance(&self) -> bool {
        self.generation >= LOAD_BALANCE_GENERATION
    }

    /// Submit fences (start ordering rather than completion ordering).
    #[must_use]
    pub fn supports_submit_fences(&self) -> bool {
        !self.is_xe()
    }

    #[must_use]
    pub fn num_engines_in_class(&self, class: EngineClass) -> usize {
        self.engines.iter().filter(|e| e.class == class).count()
    }

    /// The video engines in topology order, by name.
    #[must_use]
    pub fn video_engines(&self) -> Vec<EngineId> {
        [EngineId::Vcs1, EngineId::Vcs2]
            .into_iter()
            .take(self.num_engines_in_class(EngineClass::Video))
            .collect()
    }

    /// Expand a generic engine name to the specific engines it covers.
    #[must_use]
    pub fn expand_engine(&self, engine: EngineId) -> Vec<EngineId> {
        match engine {
            EngineId::Vcs => self.video_engines(),
            engine => vec![engine],
        }
    }

    /// Return the physical engine behind a specific engine name.
    ///
    /// `VCS` has no single physical engine and is rejected.
    pub fn physical_engine(&self, engine: EngineId) -> Result<EngineDescriptor, SimError> {
        let descriptor = match engine {
            EngineId::Default | EngineId::Rcs => EngineDescriptor::new(EngineClass::Render, 0),
            EngineId::Bcs => EngineDescriptor::new(EngineClass::Copy, 0),
            EngineId::Vcs1 => EngineDescriptor::new(EngineClass::Video, 0),
            EngineId::Vcs2 => EngineDescriptor::new(EngineClass::Video, 1),
            EngineId::Vecs => EngineDescriptor::new(EngineClass::VideoEnhance, 0),
            EngineId::Vcs => {
                return sim_error!("VCS does not name a single physical engine");
            }
        };

        if self.engines.contains(&descriptor) {
            Ok(descriptor)
        } else {
            sim_error!(format!("Engine {engine} not present on this device"))
        }
    }
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self::new(
            DEFAULT_GENERATION,
            DriverVariant::default(),
            DEFAULT_VIDEO_ENGINES,
        )
    }
}
