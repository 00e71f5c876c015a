// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The interface between the workload code and the GPU driver.
//!
//! Everything the simulator needs from a kernel driver goes through the
//! [`Driver`] trait: context management, buffer allocation, batch creation,
//! submission, waiting and software fence timelines. The
//! [`SimDriver`](crate::sim_driver::SimDriver) implements it in software.

use std::fmt;

use crate::device::DeviceInfo;
use crate::engine::EngineId;
use crate::types::{SimError, SimResult};

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident, $inner:ty) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub $inner);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

handle_type!(
    /// GPU address space shared between contexts.
    VmHandle,
    u32
);
handle_type!(
    /// A submission context.
    ContextHandle,
    u32
);
handle_type!(
    /// A GPU buffer.
    BufferHandle,
    u32
);
handle_type!(
    /// A command buffer that runs for a programmed duration.
    BatchHandle,
    u32
);
handle_type!(
    /// One submission of a batch.
    SubmissionHandle,
    u64
);
handle_type!(
    /// A fence that can be waited on by later submissions.
    FenceHandle,
    u64
);
handle_type!(
    /// A software timeline that fences can be created on.
    TimelineHandle,
    u32
);

/// A bond between sibling engines and a master engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineBond {
    /// Mask of [`EngineId::mask_bit`] values for the bonded siblings.
    pub mask: u64,
    pub master: EngineId,
}

impl EngineBond {
    /// The sibling engines in index order.
    #[must_use]
    pub fn siblings(&self) -> Vec<EngineId> {
        EngineId::ALL
            .into_iter()
            .filter(|e| self.mask & e.mask_bit() != 0)
            .collect()
    }
}

/// Engine configuration of a context.
///
/// Slot 0 of the map is reserved for the virtual (load balanced) engine, so
/// `engines[i]` is addressed as slot `i + 1`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContextEngines {
    pub engines: Vec<EngineId>,
    pub load_balance: bool,
    pub bonds: Vec<EngineBond>,
}

/// Where a submission is sent.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EngineTarget {
    /// A named engine on a context without an engine map.
    Engine(EngineId),
    /// A slot of the context's engine map (0 is the virtual engine).
    MapSlot(usize),
}

impl fmt::Display for EngineTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EngineTarget::Engine(engine) => write!(f, "{engine}"),
            EngineTarget::MapSlot(slot) => write!(f, "slot{slot}"),
        }
    }
}

/// How a submission waits on an input fence.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FenceMode {
    /// Start once the fence has signalled completion.
    Completion,
    /// Start once the work behind the fence has started.
    Submit,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FenceWait {
    pub fence: FenceHandle,
    pub mode: FenceMode,
}

/// A buffer referenced by a submission.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BufferUse {
    pub buffer: BufferHandle,
    pub write: bool,
}

/// Everything needed to submit a batch.
#[derive(Clone, Debug)]
pub struct Submission {
    pub context: ContextHandle,
    pub target: EngineTarget,
    pub batch: BatchHandle,
    pub buffers: Vec<BufferUse>,
    pub fence_waits: Vec<FenceWait>,
    /// Request an output fence for this submission.
    pub emit_fence: bool,
}

/// The result of a submission.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Submitted {
    pub handle: SubmissionHandle,
    pub out_fence: Option<FenceHandle>,
}

/// The GPU driver as seen by the simulator.
///
/// All methods take `&self` so that one driver can be shared by all client
/// threads.
pub trait Driver: Send + Sync {
    /// Query the topology and capabilities of the device.
    fn device_info(&self) -> DeviceInfo;

    fn create_vm(&self) -> Result<VmHandle, SimError>;

    /// Create a context, optionally sharing an existing address space.
    fn create_context(&self, vm: Option<VmHandle>) -> Result<ContextHandle, SimError>;

    /// Return the address space of a context.
    fn context_vm(&self, context: ContextHandle) -> Result<VmHandle, SimError>;

    fn destroy_context(&self, context: ContextHandle) -> SimResult;

    /// Install an engine map, load balancing and bonds on a context.
    fn set_context_engines(&self, context: ContextHandle, engines: &ContextEngines) -> SimResult;

    fn set_priority(&self, context: ContextHandle, priority: i32) -> SimResult;

    /// Persistent contexts keep running after they are closed.
    fn set_persistence(&self, context: ContextHandle, persistent: bool) -> SimResult;

    /// The slice mask that enables every slice of the device.
    fn device_slice_mask(&self) -> u64;

    fn set_sseu(&self, context: ContextHandle, slice_mask: u64) -> SimResult;

    fn allocate_buffer(&self, size: u64) -> Result<BufferHandle, SimError>;

    fn free_buffer(&self, buffer: BufferHandle) -> SimResult;

    /// Create a command buffer with the given preemption timeout.
    fn create_batch(&self, preempt_us: u32) -> Result<BatchHandle, SimError>;

    /// Program how long the batch runs for. `None` spins until terminated.
    fn set_batch_duration(&self, batch: BatchHandle, duration_us: Option<u64>) -> SimResult;

    /// End a spinning batch.
    fn terminate_batch(&self, batch: BatchHandle) -> SimResult;

    fn free_batch(&self, batch: BatchHandle) -> SimResult;

    fn submit(&self, submission: &Submission) -> Result<Submitted, SimError>;

    /// Block until a submission has completed.
    fn wait(&self, submission: SubmissionHandle) -> SimResult;

    fn create_timeline(&self) -> Result<TimelineHandle, SimError>;

    /// Create a fence that signals when the timeline reaches `seqno`.
    fn create_fence(&self, timeline: TimelineHandle, seqno: u64) -> Result<FenceHandle, SimError>;

    /// Advance a timeline by `increment`.
    fn advance_timeline(&self, timeline: TimelineHandle, increment: u64) -> SimResult;

    /// Current value of a timeline.
    fn timeline_value(&self, timeline: TimelineHandle) -> Result<u64, SimError>;

    fn destroy_timeline(&self, timeline: TimelineHandle) -> SimResult;

    /// Release a fence handle.
    fn close_fence(&self, fence: FenceHandle) -> SimResult;
}
