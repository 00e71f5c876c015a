// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Run a prepared workload.
//!
//! Every iteration walks the steps in order. Control steps adjust the
//! runner's state or block the client thread; batch steps are submitted to
//! the driver. The stop flag is checked before every step, so a background
//! client stops at the next step boundary once its master has finished.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use wsim_engine::driver::{
    FenceHandle, FenceMode, FenceWait, Submission, SubmissionHandle, TimelineHandle,
};
use wsim_engine::engine::{EngineId, NUM_ENGINES};
use wsim_engine::sim_error;
use wsim_engine::types::{SimError, SimResult};
use wsim_track::{debug, info, trace};

use crate::prepare::{ClientRole, ClientWorkload};
use crate::step::{Batch, Step, StepKind};
use crate::workload::nearest_batch;

/// Iteration times observed at period steps.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeriodStats {
    pub samples: u64,
    pub total: Duration,
    pub min: Option<Duration>,
    pub max: Duration,
    /// Period steps reached after their period had already elapsed.
    pub missed: u64,
}

impl PeriodStats {
    fn record(&mut self, elapsed: Duration) {
        self.samples += 1;
        self.total += elapsed;
        self.min = Some(self.min.map_or(elapsed, |min| min.min(elapsed)));
        self.max = self.max.max(elapsed);
    }
}

/// What a client did while it ran.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientStats {
    pub id: usize,
    pub role: ClientRole,
    pub elapsed: Duration,

    /// Iterations started, including one cut short by a stop request.
    pub iterations: u64,

    pub periods: PeriodStats,

    /// Highest number of queued submissions seen on each logical engine.
    pub max_in_flight: [usize; NUM_ENGINES],
}

impl ClientStats {
    /// Iterations per second.
    #[must_use]
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.iterations as f64 / secs
        } else {
            0.0
        }
    }

    /// Average iteration time at period steps, if there were any.
    #[must_use]
    pub fn period_average(&self) -> Option<Duration> {
        if self.periods.samples == 0 || self.iterations == 0 {
            return None;
        }
        Some(self.periods.total / self.iterations as u32)
    }
}

impl fmt::Display for ClientStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let marker = if self.role == ClientRole::Background {
            ' '
        } else {
            '*'
        };
        write!(
            f,
            "{marker}{}: {:.3}s elapsed ({} cycles, {:.3} workloads/s).",
            self.id,
            self.elapsed.as_secs_f64(),
            self.iterations,
            self.rate()
        )?;
        if let Some(avg) = self.period_average() {
            write!(
                f,
                " Time avg/min/max={}/{}/{}us; {} missed.",
                avg.as_micros(),
                self.periods.min.unwrap_or_default().as_micros(),
                self.periods.max.as_micros(),
                self.periods.missed
            )?;
        }
        Ok(())
    }
}

/// State that lives for one run of a client.
struct RunState {
    /// Latest submission of each batch step.
    submissions: Vec<Option<SubmissionHandle>>,

    /// Fences created this iteration, by step: out-fences of batches and
    /// the software fences of `f` steps.
    fences: Vec<Option<FenceHandle>>,

    /// Batch steps with a submission outstanding, oldest first, per logical
    /// engine.
    in_flight: [VecDeque<usize>; NUM_ENGINES],

    /// The queue each batch step is currently in.
    queued_on: Vec<Option<EngineId>>,

    throttle: usize,
    queue_depth: usize,

    /// Timeline value at the start of the current iteration.
    sync_seqno: u64,
    iteration_start: Instant,

    /// Draws the duration of every randomised submission.
    rng: StdRng,

    periods: PeriodStats,
    max_in_flight: [usize; NUM_ENGINES],
}

impl RunState {
    fn new(num_steps: usize, rng: StdRng) -> Self {
        Self {
            submissions: vec![None; num_steps],
            fences: vec![None; num_steps],
            in_flight: std::array::from_fn(|_| VecDeque::new()),
            queued_on: vec![None; num_steps],
            throttle: 0,
            queue_depth: 0,
            sync_seqno: 0,
            iteration_start: Instant::now(),
            rng,
            periods: PeriodStats::default(),
            max_in_flight: [0; NUM_ENGINES],
        }
    }
}

impl ClientWorkload {
    /// Run the workload until its iterations are done or, for background
    /// clients, until `stop` is set.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<ClientStats, SimError> {
        let mut state = RunState::new(self.steps.len(), self.batch_rng.clone());
        let start = Instant::now();
        info!(self.entity ; "running {} steps", self.steps.len());

        let mut iterations = 0;
        while !stop.load(Ordering::Relaxed)
            && (self.is_background() || iterations < self.options.repeat)
        {
            state.iteration_start = Instant::now();
            let result = self.run_steps(&mut state, stop);
            let cleanup = self.end_iteration(&mut state);
            result?;
            cleanup?;
            iterations += 1;
        }

        let stopped = stop.load(Ordering::Relaxed);
        self.drain(&mut state, stopped)?;
        self.batch_rng = state.rng;

        let stats = ClientStats {
            id: self.id,
            role: self.options.role,
            elapsed: start.elapsed(),
            iterations,
            periods: state.periods,
            max_in_flight: state.max_in_flight,
        };
        debug!(self.entity ; "{stats}");
        Ok(stats)
    }

    fn run_steps(&mut self, state: &mut RunState, stop: &AtomicBool) -> SimResult {
        for i in 0..self.steps.len() {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            let step = &self.steps[i];
            match &step.kind {
                StepKind::Delay { us } => thread::sleep(Duration::from_micros(*us)),
                StepKind::Period { us } => {
                    let elapsed = state.iteration_start.elapsed();
                    state.periods.record(elapsed);
                    match Duration::from_micros(*us).checked_sub(elapsed) {
                        Some(slack) => thread::sleep(slack),
                        None => {
                            state.periods.missed += 1;
                            trace!(self.entity ; "missed period at step {i}");
                        }
                    }
                }
                StepKind::Sync { target } => {
                    let target_idx = i as i64 + i64::from(*target);
                    self.sync_to(state, target_idx)?;
                }
                StepKind::Throttle { distance } => state.throttle = *distance,
                StepKind::QueueDepthThrottle { depth } => state.queue_depth = *depth,
                StepKind::SoftFenceWait => {
                    let timeline = self.timeline()?;
                    let seqno = state.sync_seqno + i as u64 + 1;
                    state.fences[i] = Some(self.driver.create_fence(timeline, seqno)?);
                }
                StepKind::SoftFenceSignal { target } => {
                    let timeline = self.timeline()?;
                    let Some(target_idx) = step.offset(*target) else {
                        return sim_error!(format!("Invalid sw fence target at step {i}!"));
                    };
                    let seqno = state.sync_seqno + target_idx as u64 + 1;
                    let current = self.driver.timeline_value(timeline)?;
                    if seqno > current {
                        self.driver.advance_timeline(timeline, seqno - current)?;
                    }
                }
                StepKind::ContextPriority { priority } => {
                    let ctx = &mut self.contexts[step.context];
                    if ctx.priority != *priority {
                        self.driver.set_priority(ctx.handle, *priority)?;
                        ctx.priority = *priority;
                    }
                }
                StepKind::SseuConfig { slice_mask } => {
                    let ctx = &mut self.contexts[step.context];
                    if ctx.slice_mask != *slice_mask {
                        self.driver.set_sseu(ctx.handle, *slice_mask)?;
                        ctx.slice_mask = *slice_mask;
                    }
                }
                StepKind::Terminate { target } => {
                    let resources = step
                        .offset(*target)
                        .and_then(|t| self.resources.get(t))
                        .and_then(Option::as_ref);
                    let Some(resources) = resources else {
                        return sim_error!(format!("Invalid terminate target at step {i}!"));
                    };
                    self.driver.terminate_batch(resources.batch)?;
                }
                StepKind::Preemption { .. }
                | StepKind::EngineMap { .. }
                | StepKind::LoadBalance
                | StepKind::Bond(_)
                | StepKind::WorkingSet(_) => {}
                StepKind::Batch(_) => {
                    if !self.run_batch(state, i, stop)? {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Submit batch step `i`. Returns false if a stop was requested.
    fn run_batch(&self, state: &mut RunState, i: usize, stop: &AtomicBool) -> Result<bool, SimError> {
        let step = &self.steps[i];
        let Some(batch) = step.batch() else {
            return sim_error!(format!("Step {i} is not a batch!"));
        };

        if self.dep_sync {
            for dep in batch.data_deps.iter().filter(|dep| dep.working_set.is_none()) {
                if let Some(handle) = step.offset(dep.target).and_then(|t| state.submissions[t]) {
                    self.driver.wait(handle)?;
                }
            }
        }

        if state.throttle > 0 {
            self.sync_to(state, i as i64 - state.throttle as i64)?;
        }

        let submission = self.submission(state, step, batch, i)?;
        let submitted = self.driver.submit(&submission)?;
        trace!(self.entity ; "step {i} submitted as {}", submitted.handle);
        state.submissions[i] = Some(submitted.handle);
        if step.emit_fence {
            state.fences[i] = submitted.out_fence;
        }

        let engine = batch.engine;
        if let Some(previous) = state.queued_on[i].take() {
            state.in_flight[previous.index()].retain(|queued| *queued != i);
        }
        state.in_flight[engine.index()].push_back(i);
        state.queued_on[i] = Some(engine);

        if stop.load(Ordering::Relaxed) {
            return Ok(false);
        }

        if batch.wait {
            self.driver.wait(submitted.handle)?;
        }

        if state.queue_depth > 0 {
            while state.in_flight[engine.index()].len() > state.queue_depth {
                let Some(oldest) = state.in_flight[engine.index()].pop_front() else {
                    break;
                };
                state.queued_on[oldest] = None;
                if let Some(handle) = state.submissions[oldest] {
                    self.driver.wait(handle)?;
                }
            }
        }

        let queued = state.in_flight[engine.index()].len();
        let max = &mut state.max_in_flight[engine.index()];
        *max = (*max).max(queued);
        Ok(true)
    }

    /// Describe the next submission of batch step `i`, programming its
    /// duration first.
    fn submission(
        &self,
        state: &mut RunState,
        step: &Step,
        batch: &Batch,
        i: usize,
    ) -> Result<Submission, SimError> {
        let Some(resources) = &self.resources[i] else {
            return sim_error!(format!("Batch step {i} has no resources!"));
        };

        if batch.duration.is_random() || batch.duration.is_unbound() {
            let duration = batch.duration.draw(&mut state.rng);
            self.driver.set_batch_duration(resources.batch, duration)?;
        }

        let mode = if batch.fence_deps.submit_fence {
            FenceMode::Submit
        } else {
            FenceMode::Completion
        };
        let fence_waits = batch
            .fence_deps
            .targets
            .iter()
            .filter_map(|target| step.offset(*target).and_then(|t| state.fences[t]))
            .map(|fence| FenceWait { fence, mode })
            .collect();

        Ok(Submission {
            context: self.contexts[step.context].handle,
            target: resources.target,
            batch: resources.batch,
            buffers: resources.buffers.clone(),
            fence_waits,
            emit_fence: step.emit_fence,
        })
    }

    /// Wait for the batch at or before `target_idx`, wrapping around to the
    /// previous iteration's batches when it is negative.
    fn sync_to(&self, state: &RunState, target_idx: i64) -> SimResult {
        let target = nearest_batch(&self.steps, target_idx);
        if let Some(handle) = target.and_then(|t| state.submissions[t]) {
            self.driver.wait(handle)?;
        }
        Ok(())
    }

    /// Release every software fence waiter of this iteration and close the
    /// fences it created.
    fn end_iteration(&self, state: &mut RunState) -> SimResult {
        let mut result = Ok(());
        if let Some(timeline) = self.timeline {
            let end = state.sync_seqno + self.steps.len() as u64;
            result = self.driver.timeline_value(timeline).and_then(|current| {
                if end > current {
                    self.driver.advance_timeline(timeline, end - current)
                } else {
                    Ok(())
                }
            });
            state.sync_seqno = end;
        }

        for fence in state.fences.iter_mut().filter_map(Option::take) {
            let closed = self.driver.close_fence(fence);
            if result.is_ok() {
                result = closed;
            }
        }
        result
    }

    /// Wait for the last submission on every engine. After a stop request
    /// unbound batches still spinning are ended first.
    fn drain(&self, state: &mut RunState, stopped: bool) -> SimResult {
        if stopped {
            for i in state.in_flight.iter().flatten() {
                let unbound = self.steps[*i]
                    .batch()
                    .is_some_and(|batch| batch.duration.is_unbound());
                if let (true, Some(resources)) = (unbound, &self.resources[*i]) {
                    self.driver.terminate_batch(resources.batch)?;
                }
            }
        }

        for queue in &mut state.in_flight {
            if let Some(handle) = queue.back().and_then(|last| state.submissions[*last]) {
                self.driver.wait(handle)?;
            }
            queue.clear();
        }
        Ok(())
    }

    fn timeline(&self) -> Result<TimelineHandle, SimError> {
        match self.timeline {
            Some(timeline) => Ok(timeline),
            None => sim_error!("Software fence without a timeline!"),
        }
    }
}
