// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! A software model of the GPU driver.
//!
//! The [`SimDriver`] does not execute anything. Each submission is given a
//! start and a completion time which are resolved as soon as everything it
//! depends on is known:
//!
//!  - the previous submission to the same physical engine from the same
//!    context must have completed,
//!  - buffers order submissions implicitly: a writer waits for the previous
//!    writer and all readers since, a reader waits for the previous writer,
//!  - input fences wait for completion, or for the start of the work behind
//!    the fence when used in [`FenceMode::Submit`],
//!  - timeline fences wait for the timeline to reach their sequence number.
//!
//! A bounded batch completes its programmed duration after it starts. An
//! unbound batch only completes once it has been terminated.
//!
//! [`Driver::wait`] blocks the calling thread until the modelled completion
//! time has passed, which gives the workload real wall-clock behaviour.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use wsim_track::entity::{Entity, toplevel};
use wsim_track::tracker::dev_null_tracker;
use wsim_track::{debug, trace};

use crate::device::DeviceInfo;
use crate::driver::{
    BatchHandle, BufferHandle, ContextEngines, ContextHandle, Driver, EngineTarget, FenceHandle,
    FenceMode, Submission, SubmissionHandle, Submitted, TimelineHandle, VmHandle,
};
use crate::engine::{EngineClass, EngineDescriptor, EngineId};
use crate::sim_error;
use crate::types::{SimError, SimResult};

/// Slice mask reported for the whole device (two slices).
pub const DEVICE_SLICE_MASK: u64 = 0b11;

/// Counters of driver activity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub contexts_created: u64,
    pub contexts_destroyed: u64,
    pub priority_writes: u64,
    pub sseu_writes: u64,
    pub buffers_allocated: u64,
    pub bytes_allocated: u64,
    pub buffers_freed: u64,
    pub batches_created: u64,
    pub submissions: u64,
    pub terminations: u64,
}

struct ContextState {
    vm: VmHandle,
    engines: ContextEngines,
    priority: i32,
    persistent: bool,
    slice_mask: u64,
}

#[derive(Default)]
struct BufferState {
    last_write: Option<SubmissionHandle>,
    reads: Vec<SubmissionHandle>,
}

struct BatchState {
    duration: Option<Duration>,
    preempt_us: u32,
}

#[derive(Copy, Clone, Debug)]
enum Dependency {
    Completion(SubmissionHandle),
    Start(SubmissionHandle),
    Timeline(TimelineHandle, u64),
}

#[derive(Copy, Clone)]
enum FenceSource {
    Submission(SubmissionHandle),
    Timeline(TimelineHandle, u64),
}

struct TimelineState {
    value: u64,
    previous_value: u64,
    advanced_at: Instant,
}

struct SubmissionRecord {
    batch: BatchHandle,
    duration: Option<Duration>,
    pending: Vec<Dependency>,
    ready_at: Instant,
    started_at: Option<Instant>,
    terminated_at: Option<Instant>,
    completed_at: Option<Instant>,
}

struct State {
    next_handle: u64,
    contexts: HashMap<ContextHandle, ContextState>,
    buffers: HashMap<BufferHandle, BufferState>,
    buffer_sizes: HashMap<BufferHandle, u64>,
    batches: HashMap<BatchHandle, BatchState>,
    submissions: BTreeMap<SubmissionHandle, SubmissionRecord>,
    engine_tails: HashMap<(ContextHandle, EngineDescriptor), SubmissionHandle>,
    fences: HashMap<FenceHandle, FenceSource>,
    timelines: HashMap<TimelineHandle, TimelineState>,
    stats: DriverStats,
    /// Time used for anything that completed before it was forgotten.
    origin: Instant,
}

impl State {
    fn new() -> Self {
        Self {
            next_handle: 1,
            contexts: HashMap::new(),
            buffers: HashMap::new(),
            buffer_sizes: HashMap::new(),
            batches: HashMap::new(),
            submissions: BTreeMap::new(),
            engine_tails: HashMap::new(),
            fences: HashMap::new(),
            timelines: HashMap::new(),
            stats: DriverStats::default(),
            origin: Instant::now(),
        }
    }

    fn next_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn context(&self, context: ContextHandle) -> Result<&ContextState, SimError> {
        match self.contexts.get(&context) {
            Some(state) => Ok(state),
            None => sim_error!(format!("Unknown context {context}")),
        }
    }

    fn context_mut(&mut self, context: ContextHandle) -> Result<&mut ContextState, SimError> {
        match self.contexts.get_mut(&context) {
            Some(state) => Ok(state),
            None => sim_error!(format!("Unknown context {context}")),
        }
    }

    /// The time at which a dependency is satisfied, if known yet.
    fn dependency_time(&self, dependency: Dependency) -> Option<Instant> {
        match dependency {
            Dependency::Completion(handle) => match self.submissions.get(&handle) {
                Some(record) => record.completed_at,
                None => Some(self.origin),
            },
            Dependency::Start(handle) => match self.submissions.get(&handle) {
                Some(record) => record.started_at,
                None => Some(self.origin),
            },
            Dependency::Timeline(timeline, seqno) => match self.timelines.get(&timeline) {
                Some(state) if seqno <= state.previous_value => Some(self.origin),
                Some(state) if seqno <= state.value => Some(state.advanced_at),
                Some(_) => None,
                // A destroyed timeline releases its waiters
                None => Some(self.origin),
            },
        }
    }

    /// When the engine will next be idle for this context. `None` means
    /// unknown (it is blocked or spinning).
    fn busy_until(&self, context: ContextHandle, engine: EngineDescriptor) -> Option<Instant> {
        match self.engine_tails.get(&(context, engine)) {
            Some(tail) => self.dependency_time(Dependency::Completion(*tail)),
            None => Some(self.origin),
        }
    }

    fn least_busy(&self, context: ContextHandle, candidates: &[EngineDescriptor]) -> Option<EngineDescriptor> {
        candidates
            .iter()
            .min_by_key(|engine| match self.busy_until(context, **engine) {
                Some(time) => (false, Some(time)),
                None => (true, None),
            })
            .copied()
    }

    /// Resolve every submission whose dependencies are now known.
    ///
    /// Dependencies always point at earlier submissions, so one pass in
    /// handle order is enough.
    fn settle(&mut self) {
        let unresolved: Vec<SubmissionHandle> = self
            .submissions
            .iter()
            .filter(|(_, record)| record.completed_at.is_none())
            .map(|(handle, _)| *handle)
            .collect();

        for handle in unresolved {
            let Some(record) = self.submissions.get(&handle) else {
                continue;
            };

            let mut ready_at = record.ready_at;
            let mut pending = Vec::new();
            if record.started_at.is_none() {
                for dependency in &record.pending {
                    match self.dependency_time(*dependency) {
                        Some(time) => ready_at = ready_at.max(time),
                        None => pending.push(*dependency),
                    }
                }
            }

            let Some(record) = self.submissions.get_mut(&handle) else {
                continue;
            };
            if record.started_at.is_none() {
                record.ready_at = ready_at;
                record.pending = pending;
                if record.pending.is_empty() {
                    record.started_at = Some(ready_at);
                }
            }
            if let Some(start) = record.started_at {
                record.completed_at = match (record.duration, record.terminated_at) {
                    (Some(duration), _) => Some(start + duration),
                    (None, Some(terminated_at)) => Some(start.max(terminated_at)),
                    (None, None) => None,
                };
            }
        }
    }

    /// Forget submissions that completed in the past. Anything that later
    /// refers to them is treated as already satisfied.
    fn prune(&mut self, now: Instant) {
        self.submissions
            .retain(|_, record| record.completed_at.is_none_or(|end| end > now));
    }

    fn physical_engine(
        &self,
        device: &DeviceInfo,
        context: ContextHandle,
        target: EngineTarget,
    ) -> Result<EngineDescriptor, SimError> {
        let engines = &self.context(context)?.engines;
        match target {
            EngineTarget::Engine(engine) => {
                if !engines.engines.is_empty() {
                    return sim_error!(format!(
                        "Context {context} has an engine map, cannot submit to {engine}"
                    ));
                }
                if engine == EngineId::Vcs {
                    let video: Vec<EngineDescriptor> = device
                        .engines
                        .iter()
                        .filter(|e| e.class == EngineClass::Video)
                        .copied()
                        .collect();
                    match self.least_busy(context, &video) {
                        Some(engine) => Ok(engine),
                        None => sim_error!("No video engines present"),
                    }
                } else {
                    device.physical_engine(engine)
                }
            }
            EngineTarget::MapSlot(0) => {
                if !engines.load_balance {
                    return sim_error!(format!(
                        "Context {context} is not load balanced, cannot use the virtual engine"
                    ));
                }
                let siblings = engines
                    .engines
                    .iter()
                    .map(|e| device.physical_engine(*e))
                    .collect::<Result<Vec<_>, SimError>>()?;
                match self.least_busy(context, &siblings) {
                    Some(engine) => Ok(engine),
                    None => sim_error!(format!("Context {context} has an empty engine map")),
                }
            }
            EngineTarget::MapSlot(slot) => match engines.engines.get(slot - 1) {
                Some(engine) => device.physical_engine(*engine),
                None => sim_error!(format!("Context {context} has no engine in slot {slot}")),
            },
        }
    }
}

/// The software driver.
pub struct SimDriver {
    entity: Arc<Entity>,
    device: DeviceInfo,
    state: Mutex<State>,
    progress: Condvar,
}

impl SimDriver {
    #[must_use]
    pub fn new(parent: &Arc<Entity>, device: DeviceInfo) -> Self {
        let entity = Arc::new(Entity::new(parent, "driver"));
        debug!(entity ; "gen{} {} device with {} engines", device.generation, device.variant, device.engines.len());
        Self {
            entity,
            device,
            state: Mutex::new(State::new()),
            progress: Condvar::new(),
        }
    }

    /// Create a driver that does not log anything.
    #[must_use]
    pub fn quiet(device: DeviceInfo) -> Self {
        let top = toplevel(&dev_null_tracker(), "wsim");
        Self::new(&top, device)
    }

    /// A snapshot of the activity counters.
    pub fn stats(&self) -> DriverStats {
        self.lock().stats.clone()
    }

    /// The priority currently applied to a context.
    pub fn context_priority(&self, context: ContextHandle) -> Result<i32, SimError> {
        Ok(self.lock().context(context)?.priority)
    }

    /// The slice mask currently applied to a context.
    pub fn context_slice_mask(&self, context: ContextHandle) -> Result<u64, SimError> {
        Ok(self.lock().context(context)?.slice_mask)
    }

    pub fn context_persistent(&self, context: ContextHandle) -> Result<bool, SimError> {
        Ok(self.lock().context(context)?.persistent)
    }

    /// The preemption timeout a batch was created with.
    pub fn batch_preempt_us(&self, batch: BatchHandle) -> Result<u32, SimError> {
        match self.lock().batches.get(&batch) {
            Some(state) => Ok(state.preempt_us),
            None => sim_error!(format!("Unknown batch {batch}")),
        }
    }

    /// The duration programmed into a batch. `None` when it is unbound.
    pub fn batch_duration(&self, batch: BatchHandle) -> Result<Option<Duration>, SimError> {
        match self.lock().batches.get(&batch) {
            Some(state) => Ok(state.duration),
            None => sim_error!(format!("Unknown batch {batch}")),
        }
    }

    /// Number of submissions that have not completed yet.
    pub fn outstanding(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .submissions
            .values()
            .filter(|record| record.completed_at.is_none_or(|end| end > now))
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn changed(&self, mut state: MutexGuard<'_, State>) {
        state.settle();
        drop(state);
        self.progress.notify_all();
    }
}

impl Driver for SimDriver {
    fn device_info(&self) -> DeviceInfo {
        self.device.clone()
    }

    fn create_vm(&self) -> Result<VmHandle, SimError> {
        let mut state = self.lock();
        Ok(VmHandle(state.next_handle() as u32))
    }

    fn create_context(&self, vm: Option<VmHandle>) -> Result<ContextHandle, SimError> {
        let mut state = self.lock();
        let vm = match vm {
            Some(vm) => vm,
            None => VmHandle(state.next_handle() as u32),
        };
        let context = ContextHandle(state.next_handle() as u32);
        state.contexts.insert(
            context,
            ContextState {
                vm,
                engines: ContextEngines::default(),
                priority: 0,
                persistent: true,
                slice_mask: DEVICE_SLICE_MASK,
            },
        );
        state.stats.contexts_created += 1;
        trace!(self.entity ; "created context {context} (vm {vm})");
        Ok(context)
    }

    fn context_vm(&self, context: ContextHandle) -> Result<VmHandle, SimError> {
        Ok(self.lock().context(context)?.vm)
    }

    fn destroy_context(&self, context: ContextHandle) -> SimResult {
        let mut state = self.lock();
        if state.contexts.remove(&context).is_none() {
            return sim_error!(format!("Unknown context {context}"));
        }
        state.engine_tails.retain(|(ctx, _), _| *ctx != context);
        state.stats.contexts_destroyed += 1;
        Ok(())
    }

    fn set_context_engines(&self, context: ContextHandle, engines: &ContextEngines) -> SimResult {
        if engines.engines.is_empty() {
            return sim_error!(format!("Empty engine map for context {context}"));
        }
        for engine in &engines.engines {
            if !engine.is_specific() {
                return sim_error!(format!("Engine map cannot contain {engine}"));
            }
            self.device.physical_engine(*engine)?;
        }
        if engines.load_balance && !self.device.supports_load_balance() {
            return sim_error!("Load balancing needs gen11 or later");
        }
        if !engines.bonds.is_empty() && !engines.load_balance {
            return sim_error!(format!("Bonds on context {context} need load balancing"));
        }
        for bond in &engines.bonds {
            for sibling in bond.siblings() {
                if !engines.engines.contains(&sibling) {
                    return sim_error!(format!(
                        "Bonded engine {sibling} is not in the engine map of context {context}"
                    ));
                }
            }
        }

        let mut state = self.lock();
        state.context_mut(context)?.engines = engines.clone();
        trace!(self.entity ; "context {context} engines {:?}", engines);
        Ok(())
    }

    fn set_priority(&self, context: ContextHandle, priority: i32) -> SimResult {
        let mut state = self.lock();
        state.context_mut(context)?.priority = priority;
        state.stats.priority_writes += 1;
        trace!(self.entity ; "context {context} priority {priority}");
        Ok(())
    }

    fn set_persistence(&self, context: ContextHandle, persistent: bool) -> SimResult {
        let mut state = self.lock();
        state.context_mut(context)?.persistent = persistent;
        Ok(())
    }

    fn device_slice_mask(&self) -> u64 {
        DEVICE_SLICE_MASK
    }

    fn set_sseu(&self, context: ContextHandle, slice_mask: u64) -> SimResult {
        if slice_mask == 0 || slice_mask & !DEVICE_SLICE_MASK != 0 {
            return sim_error!(format!("Invalid slice mask {slice_mask:#x}"));
        }
        let mut state = self.lock();
        state.context_mut(context)?.slice_mask = slice_mask;
        state.stats.sseu_writes += 1;
        Ok(())
    }

    fn allocate_buffer(&self, size: u64) -> Result<BufferHandle, SimError> {
        if size == 0 {
            return sim_error!("Cannot allocate an empty buffer");
        }
        let mut state = self.lock();
        let buffer = BufferHandle(state.next_handle() as u32);
        state.buffers.insert(buffer, BufferState::default());
        state.buffer_sizes.insert(buffer, size);
        state.stats.buffers_allocated += 1;
        state.stats.bytes_allocated += size;
        Ok(buffer)
    }

    fn free_buffer(&self, buffer: BufferHandle) -> SimResult {
        let mut state = self.lock();
        if state.buffers.remove(&buffer).is_none() {
            return sim_error!(format!("Unknown buffer {buffer}"));
        }
        state.buffer_sizes.remove(&buffer);
        state.stats.buffers_freed += 1;
        Ok(())
    }

    fn create_batch(&self, preempt_us: u32) -> Result<BatchHandle, SimError> {
        let mut state = self.lock();
        let batch = BatchHandle(state.next_handle() as u32);
        state.batches.insert(
            batch,
            BatchState {
                duration: Some(Duration::ZERO),
                preempt_us,
            },
        );
        state.stats.batches_created += 1;
        Ok(batch)
    }

    fn set_batch_duration(&self, batch: BatchHandle, duration_us: Option<u64>) -> SimResult {
        let mut state = self.lock();
        match state.batches.get_mut(&batch) {
            Some(batch_state) => {
                batch_state.duration = duration_us.map(Duration::from_micros);
                Ok(())
            }
            None => sim_error!(format!("Unknown batch {batch}")),
        }
    }

    fn terminate_batch(&self, batch: BatchHandle) -> SimResult {
        let mut state = self.lock();
        if !state.batches.contains_key(&batch) {
            return sim_error!(format!("Unknown batch {batch}"));
        }
        let now = Instant::now();
        for record in state.submissions.values_mut() {
            if record.batch == batch && record.duration.is_none() && record.terminated_at.is_none()
            {
                record.terminated_at = Some(now);
            }
        }
        state.stats.terminations += 1;
        self.changed(state);
        Ok(())
    }

    fn free_batch(&self, batch: BatchHandle) -> SimResult {
        let mut state = self.lock();
        if state.batches.remove(&batch).is_none() {
            return sim_error!(format!("Unknown batch {batch}"));
        }
        Ok(())
    }

    fn submit(&self, submission: &Submission) -> Result<Submitted, SimError> {
        let mut state = self.lock();
        let now = Instant::now();
        state.prune(now);

        let engine = state.physical_engine(&self.device, submission.context, submission.target)?;
        let duration = match state.batches.get(&submission.batch) {
            Some(batch_state) => batch_state.duration,
            None => return sim_error!(format!("Unknown batch {}", submission.batch)),
        };

        let handle = SubmissionHandle(state.next_handle());
        let mut pending = Vec::new();

        if let Some(tail) = state.engine_tails.get(&(submission.context, engine)) {
            pending.push(Dependency::Completion(*tail));
        }

        for fence_wait in &submission.fence_waits {
            let dependency = match state.fences.get(&fence_wait.fence) {
                Some(FenceSource::Submission(source)) => match fence_wait.mode {
                    FenceMode::Completion => Dependency::Completion(*source),
                    FenceMode::Submit => Dependency::Start(*source),
                },
                Some(FenceSource::Timeline(timeline, seqno)) => {
                    Dependency::Timeline(*timeline, *seqno)
                }
                None => return sim_error!(format!("Unknown fence {}", fence_wait.fence)),
            };
            pending.push(dependency);
        }

        let live: Vec<SubmissionHandle> = state.submissions.keys().copied().collect();
        for buffer_use in &submission.buffers {
            let Some(buffer_state) = state.buffers.get_mut(&buffer_use.buffer) else {
                return sim_error!(format!("Unknown buffer {}", buffer_use.buffer));
            };
            buffer_state.reads.retain(|read| live.binary_search(read).is_ok());

            if let Some(writer) = buffer_state.last_write {
                pending.push(Dependency::Completion(writer));
            }
            if buffer_use.write {
                pending.extend(buffer_state.reads.iter().map(|r| Dependency::Completion(*r)));
                buffer_state.last_write = Some(handle);
                buffer_state.reads.clear();
            } else {
                buffer_state.reads.push(handle);
            }
        }

        // A buffer used twice by one submission must not make it wait for itself
        pending.retain(|dependency| match dependency {
            Dependency::Completion(h) | Dependency::Start(h) => *h != handle,
            Dependency::Timeline(..) => true,
        });

        state.submissions.insert(
            handle,
            SubmissionRecord {
                batch: submission.batch,
                duration,
                pending,
                ready_at: now,
                started_at: None,
                terminated_at: None,
                completed_at: None,
            },
        );
        state.engine_tails.insert((submission.context, engine), handle);

        let out_fence = if submission.emit_fence {
            let fence = FenceHandle(state.next_handle());
            state.fences.insert(fence, FenceSource::Submission(handle));
            Some(fence)
        } else {
            None
        };

        state.stats.submissions += 1;
        trace!(self.entity ; "submission {handle} ctx {} on {engine} ({:?})", submission.context, duration);
        self.changed(state);

        Ok(Submitted { handle, out_fence })
    }

    fn wait(&self, submission: SubmissionHandle) -> SimResult {
        let mut state = self.lock();
        if submission.0 >= state.next_handle {
            return sim_error!(format!("Unknown submission {submission}"));
        }
        loop {
            state.settle();
            let completed_at = match state.submissions.get(&submission) {
                Some(record) => record.completed_at,
                None => return Ok(()),
            };
            if let Some(end) = completed_at {
                drop(state);
                let now = Instant::now();
                if end > now {
                    thread::sleep(end - now);
                }
                return Ok(());
            }
            state = self.progress.wait(state).unwrap();
        }
    }

    fn create_timeline(&self) -> Result<TimelineHandle, SimError> {
        let mut state = self.lock();
        let timeline = TimelineHandle(state.next_handle() as u32);
        let origin = state.origin;
        state.timelines.insert(
            timeline,
            TimelineState {
                value: 0,
                previous_value: 0,
                advanced_at: origin,
            },
        );
        Ok(timeline)
    }

    fn create_fence(&self, timeline: TimelineHandle, seqno: u64) -> Result<FenceHandle, SimError> {
        let mut state = self.lock();
        if !state.timelines.contains_key(&timeline) {
            return sim_error!(format!("Unknown timeline {timeline}"));
        }
        let fence = FenceHandle(state.next_handle());
        state
            .fences
            .insert(fence, FenceSource::Timeline(timeline, seqno));
        Ok(fence)
    }

    fn advance_timeline(&self, timeline: TimelineHandle, increment: u64) -> SimResult {
        let mut state = self.lock();
        let Some(timeline_state) = state.timelines.get_mut(&timeline) else {
            return sim_error!(format!("Unknown timeline {timeline}"));
        };
        timeline_state.previous_value = timeline_state.value;
        timeline_state.value += increment;
        timeline_state.advanced_at = Instant::now();
        trace!(self.entity ; "timeline {timeline} at {}", timeline_state.value);
        self.changed(state);
        Ok(())
    }

    fn timeline_value(&self, timeline: TimelineHandle) -> Result<u64, SimError> {
        match self.lock().timelines.get(&timeline) {
            Some(timeline_state) => Ok(timeline_state.value),
            None => sim_error!(format!("Unknown timeline {timeline}")),
        }
    }

    fn destroy_timeline(&self, timeline: TimelineHandle) -> SimResult {
        let mut state = self.lock();
        if state.timelines.remove(&timeline).is_none() {
            return sim_error!(format!("Unknown timeline {timeline}"));
        }
        self.changed(state);
        Ok(())
    }

    fn close_fence(&self, fence: FenceHandle) -> SimResult {
        let mut state = self.lock();
        if state.fences.remove(&fence).is_none() {
            return sim_error!(format!("Unknown fence {fence}"));
        }
        Ok(())
    }
}
