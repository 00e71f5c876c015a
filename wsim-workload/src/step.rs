// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The steps a workload is made of.

use std::fmt;

use rand::{Rng, RngCore};
use wsim_engine::driver::EngineBond;
use wsim_engine::engine::EngineId;

/// How long a batch runs for, in microseconds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BatchDuration {
    /// Uniformly random in `min..=max` (fixed when equal).
    Bounded { min: u64, max: u64 },
    /// Spins until terminated.
    Unbound,
}

impl BatchDuration {
    #[must_use]
    pub fn fixed(us: u64) -> Self {
        BatchDuration::Bounded { min: us, max: us }
    }

    #[must_use]
    pub fn is_unbound(&self) -> bool {
        matches!(self, BatchDuration::Unbound)
    }

    /// Whether a new duration has to be drawn for every submission.
    #[must_use]
    pub fn is_random(&self) -> bool {
        matches!(self, BatchDuration::Bounded { min, max } if min != max)
    }

    /// Pick the duration of the next submission. `None` when unbound.
    pub fn draw(&self, rng: &mut impl RngCore) -> Option<u64> {
        match *self {
            BatchDuration::Bounded { min, max } => Some(uniform(rng, min, max)),
            BatchDuration::Unbound => None,
        }
    }
}

/// Uniformly random in `min..=max` without touching the generator when the
/// range is a single value.
fn uniform(rng: &mut impl RngCore, min: u64, max: u64) -> u64 {
    if min >= max {
        min
    } else {
        rng.gen_range(min..=max)
    }
}

/// A data dependency of a batch.
///
/// Without a working set, `target` is a negative offset to an earlier step
/// whose output buffer is read. With a working set it is the index of a
/// buffer in that set.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DependencyEntry {
    pub target: i32,
    pub write: bool,
    pub working_set: Option<u32>,
}

impl DependencyEntry {
    #[must_use]
    pub fn relative(target: i32) -> Self {
        Self {
            target,
            write: false,
            working_set: None,
        }
    }
}

/// Fence dependencies of a batch: negative offsets to fence-emitting steps.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FenceDependencies {
    pub targets: Vec<i32>,

    /// Wait for the fenced work to be submitted rather than completed.
    pub submit_fence: bool,
}

/// Allocation granularity of working-set buffers.
pub const PAGE_SIZE: u64 = 4096;

/// Largest buffer size that can still be rounded up to a whole page.
pub const MAX_BUFFER_SIZE: u64 = u64::MAX - (PAGE_SIZE - 1);

/// Longest batch duration, delay or period, in microseconds.
pub const MAX_DURATION_US: u64 = u32::MAX as u64;

/// Size range of one working-set buffer, in bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BufferSize {
    pub min: u64,
    pub max: u64,
}

impl BufferSize {
    /// Pick a size in range, rounded up to the allocation granularity.
    pub fn draw(&self, rng: &mut impl RngCore) -> u64 {
        uniform(rng, self.min, self.max).next_multiple_of(PAGE_SIZE)
    }
}

/// The declaration of a working set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkingSetSpec {
    pub id: u32,
    pub shared: bool,
    pub sizes: Vec<BufferSize>,
}

/// A GPU batch submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    pub engine: EngineId,
    pub duration: BatchDuration,
    pub data_deps: Vec<DependencyEntry>,
    pub fence_deps: FenceDependencies,
    /// Wait for completion straight after submitting.
    pub wait: bool,
}

/// What a step does, with only the fields relevant to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepKind {
    Batch(Batch),
    /// Wait for an earlier batch.
    Sync { target: i32 },
    Delay { us: u64 },
    /// Pad the iteration out to a total length.
    Period { us: u64 },
    Throttle { distance: usize },
    QueueDepthThrottle { depth: usize },
    /// A software fence that later steps can wait on (`f`).
    SoftFenceWait,
    /// Signal the software fence `target` steps back.
    SoftFenceSignal { target: i32 },
    ContextPriority { priority: i32 },
    Preemption { timeout_us: u32 },
    EngineMap { engines: Vec<EngineId> },
    LoadBalance,
    Bond(EngineBond),
    /// End the unbound batch `target` steps back.
    Terminate { target: i32 },
    SseuConfig { slice_mask: u64 },
    WorkingSet(WorkingSetSpec),
}

impl StepKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Batch(_) => "batch",
            StepKind::Sync { .. } => "sync",
            StepKind::Delay { .. } => "delay",
            StepKind::Period { .. } => "period",
            StepKind::Throttle { .. } => "throttle",
            StepKind::QueueDepthThrottle { .. } => "queue depth throttle",
            StepKind::SoftFenceWait => "fence",
            StepKind::SoftFenceSignal { .. } => "fence signal",
            StepKind::ContextPriority { .. } => "priority",
            StepKind::Preemption { .. } => "preemption",
            StepKind::EngineMap { .. } => "engine map",
            StepKind::LoadBalance => "load balance",
            StepKind::Bond(_) => "bond",
            StepKind::Terminate { .. } => "terminate",
            StepKind::SseuConfig { .. } => "sseu",
            StepKind::WorkingSet(_) => "working set",
        }
    }
}

/// One workload instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Step {
    /// Position in the workload. Relative references are offsets from this.
    pub idx: usize,

    /// Index into the context table. Zero for steps without a context.
    pub context: usize,

    /// Another step uses this one as a fence dependency.
    pub emit_fence: bool,

    pub kind: StepKind,
}

impl Step {
    #[must_use]
    pub fn new(idx: usize, context: usize, kind: StepKind) -> Self {
        Self {
            idx,
            context,
            emit_fence: false,
            kind,
        }
    }

    #[must_use]
    pub fn batch(&self) -> Option<&Batch> {
        match &self.kind {
            StepKind::Batch(batch) => Some(batch),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_batch(&self) -> bool {
        self.batch().is_some()
    }

    /// Resolve an offset relative to this step to an absolute index.
    #[must_use]
    pub fn offset(&self, target: i32) -> Option<usize> {
        let idx = self.idx as i64 + i64::from(target);
        usize::try_from(idx).ok()
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.kind.name(), self.idx)
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn fixed_duration_is_exact() {
        let mut rng = StdRng::seed_from_u64(7);
        let duration = BatchDuration::fixed(1000);
        for _ in 0..100 {
            assert_eq!(duration.draw(&mut rng), Some(1000));
        }
        assert!(!duration.is_random());
    }

    #[test]
    fn random_duration_is_deterministic_and_in_range() {
        let duration = BatchDuration::Bounded { min: 100, max: 200 };
        let mut first = StdRng::seed_from_u64(42);
        let mut second = StdRng::seed_from_u64(42);

        let a: Vec<u64> = (0..1000).filter_map(|_| duration.draw(&mut first)).collect();
        let b: Vec<u64> = (0..1000).filter_map(|_| duration.draw(&mut second)).collect();
        assert_eq!(a, b);
        assert!(a.iter().all(|d| (100..=200).contains(d)));
        assert!(a.iter().any(|d| *d != a[0]));
    }

    #[test]
    fn unbound_has_no_duration() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(BatchDuration::Unbound.draw(&mut rng), None);
    }

    #[test]
    fn buffer_sizes_round_to_pages() {
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(BufferSize { min: 1, max: 1 }.draw(&mut rng), PAGE_SIZE);
        for _ in 0..100 {
            let size = BufferSize {
                min: 4096,
                max: 65536,
            }
            .draw(&mut rng);
            assert_eq!(size % PAGE_SIZE, 0);
            assert!((4096..=65536).contains(&size));
        }
    }

    #[test]
    fn extreme_ranges_stay_in_bounds() {
        let mut rng = StdRng::seed_from_u64(11);
        let duration = BatchDuration::Bounded {
            min: 1,
            max: u64::MAX,
        };
        for _ in 0..100 {
            assert!(duration.draw(&mut rng).is_some_and(|d| d >= 1));
        }

        let size = BufferSize {
            min: MAX_BUFFER_SIZE - PAGE_SIZE,
            max: MAX_BUFFER_SIZE,
        };
        for _ in 0..100 {
            assert_eq!(size.draw(&mut rng) % PAGE_SIZE, 0);
        }
    }

    #[test]
    fn offsets() {
        let step = Step::new(3, 0, StepKind::SoftFenceWait);
        assert_eq!(step.offset(-1), Some(2));
        assert_eq!(step.offset(-3), Some(0));
        assert_eq!(step.offset(-4), None);
    }
}
