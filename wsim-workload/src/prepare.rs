// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Turn a workload template into a runnable client.
//!
//! Preparation creates and configures the client's contexts, allocates its
//! private working sets and every buffer and batch its steps need. All of
//! these are owned by the returned [`ClientWorkload`] and released when it is
//! dropped, including anything created before a preparation error.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use wsim_engine::driver::{
    BatchHandle, BufferHandle, BufferUse, ContextEngines, ContextHandle, Driver, EngineTarget,
    TimelineHandle,
};
use wsim_engine::engine::EngineId;
use wsim_engine::sim_error;
use wsim_engine::types::SimError;
use wsim_track::entity::Entity;
use wsim_track::{debug, warn};

use crate::context::SimulationContext;
use crate::step::{PAGE_SIZE, Step, StepKind};
use crate::workload::{WorkingSet, WorkingSetBuffers, Workload};

/// Preemption timeout of batches not covered by an `X` step.
pub const DEFAULT_PREEMPT_US: u32 = 100;

/// Size of the buffer every batch writes.
pub const OUTPUT_BUFFER_SIZE: u64 = 4096;

/// How a client relates to the others in the run.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ClientRole {
    /// Runs its own iterations and finishes.
    #[default]
    Normal,
    /// Runs its own iterations and then stops every background client.
    Master,
    /// Loops until stopped.
    Background,
}

/// Per-client settings.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ClientOptions {
    pub repeat: u64,
    pub priority: i32,
    /// Restrict every context to a single slice.
    pub sseu: bool,
    pub role: ClientRole,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            repeat: 1,
            priority: 0,
            sseu: false,
            role: ClientRole::Normal,
        }
    }
}

/// One of the client's GPU contexts.
#[derive(Clone, Debug)]
pub struct Context {
    pub handle: ContextHandle,
    pub engines: ContextEngines,

    /// Last priority applied through the driver.
    pub priority: i32,

    /// Last slice mask applied through the driver.
    pub slice_mask: u64,
}

/// Driver objects used to submit one batch step.
#[derive(Clone, Debug)]
pub struct BatchResources {
    pub batch: BatchHandle,
    pub output: BufferHandle,
    /// Everything the submission touches, the output buffer first.
    pub buffers: Vec<BufferUse>,
    pub target: EngineTarget,
    pub preempt_us: u32,
}

/// A workload prepared for one client.
pub struct ClientWorkload {
    pub id: usize,
    pub entity: Arc<Entity>,
    pub options: ClientOptions,
    pub steps: Vec<Step>,
    pub contexts: Vec<Context>,
    pub working_sets: BTreeMap<u32, WorkingSet>,

    /// Indexed like `steps`; `None` for anything but batches.
    pub resources: Vec<Option<BatchResources>>,
    pub timeline: Option<TimelineHandle>,

    pub(crate) driver: Arc<dyn Driver>,
    pub(crate) batch_rng: StdRng,
    pub(crate) dep_sync: bool,
}

impl ClientWorkload {
    pub fn is_master(&self) -> bool {
        self.options.role == ClientRole::Master
    }

    pub fn is_background(&self) -> bool {
        self.options.role == ClientRole::Background
    }

    /// Bytes touched by one iteration: every distinct buffer batches read or
    /// write, plus one page of commands per batch.
    #[must_use]
    pub fn active_set_bytes(&self) -> u64 {
        let mut sizes: HashMap<BufferHandle, u64> = HashMap::new();
        let mut batches = 0;
        for (step, resources) in self.steps.iter().zip(&self.resources) {
            let (Some(batch), Some(resources)) = (step.batch(), resources) else {
                continue;
            };
            batches += 1;
            for (dep, buffer) in batch.data_deps.iter().zip(&resources.buffers[1..]) {
                let size = match dep.working_set {
                    Some(id) => self.working_sets[&id].buffers().sizes[dep.target as usize],
                    None => OUTPUT_BUFFER_SIZE,
                };
                sizes.insert(buffer.buffer, size);
            }
        }
        sizes.values().sum::<u64>() + batches * PAGE_SIZE
    }
}

/// Prepare `workload` to be run as client `id`.
pub fn prepare(
    sim: &SimulationContext,
    workload: &Workload,
    id: usize,
    options: ClientOptions,
) -> Result<ClientWorkload, SimError> {
    let entity = Arc::new(Entity::new(&workload.entity, &format!("client{id}")));
    let batch_rng = StdRng::seed_from_u64(sim.next_seed());
    let mut buffer_rng = StdRng::seed_from_u64(sim.next_seed());

    let mut client = ClientWorkload {
        id,
        entity,
        options,
        steps: workload.steps.clone(),
        contexts: Vec::with_capacity(workload.num_contexts),
        working_sets: BTreeMap::new(),
        resources: Vec::with_capacity(workload.steps.len()),
        timeline: None,
        driver: sim.driver.clone(),
        batch_rng,
        dep_sync: sim.config.dep_sync,
    };

    let engines = configure_engines(sim, &client.steps, workload.num_contexts)?;
    create_contexts(sim, &mut client, engines)?;

    for step in &client.steps {
        if let StepKind::WorkingSet(definition) = &step.kind {
            let set = match workload.shared_set(definition.id) {
                Some(shared) => WorkingSet::Shared(shared.clone()),
                None => WorkingSet::Private(WorkingSetBuffers::allocate(
                    &sim.driver,
                    definition,
                    &mut buffer_rng,
                )?),
            };
            client.working_sets.insert(definition.id, set);
        }
    }

    if workload.has_soft_fences() {
        client.timeline = Some(sim.driver.create_timeline()?);
    }

    allocate_batches(sim, &mut client)?;

    debug!(client.entity ; "active set {} bytes", client.active_set_bytes());

    Ok(client)
}

/// Collect the engine configuration of every context from its `M`, `B` and
/// `b` steps, in workload order.
fn configure_engines(
    sim: &SimulationContext,
    steps: &[Step],
    num_contexts: usize,
) -> Result<Vec<ContextEngines>, SimError> {
    let mut engines = vec![ContextEngines::default(); num_contexts];
    for step in steps {
        let ctx = &mut engines[step.context];
        match &step.kind {
            StepKind::EngineMap { engines: map } => ctx.engines = map.clone(),
            StepKind::LoadBalance => {
                if ctx.engines.is_empty() {
                    return sim_error!(format!(
                        "Load balancing at step {} needs an engine map!",
                        step.idx
                    ));
                }
                if !sim.device.supports_load_balance() {
                    return sim_error!(format!(
                        "Load balancing at step {} needs Gen11+!",
                        step.idx
                    ));
                }
                ctx.load_balance = true;
            }
            StepKind::Bond(bond) => {
                if !ctx.load_balance {
                    return sim_error!(format!(
                        "Engine bond at step {} needs a load balancing engine map!",
                        step.idx
                    ));
                }
                ctx.bonds.push(bond.clone());
            }
            _ => {}
        }
    }
    Ok(engines)
}

fn create_contexts(
    sim: &SimulationContext,
    client: &mut ClientWorkload,
    engines: Vec<ContextEngines>,
) -> Result<(), SimError> {
    let driver = &sim.driver;
    let vm = driver.create_vm()?;
    let slice_mask = if client.options.sseu {
        1
    } else {
        driver.device_slice_mask()
    };

    for engines in engines {
        let handle = driver.create_context(Some(vm))?;
        client.contexts.push(Context {
            handle,
            engines,
            priority: client.options.priority,
            slice_mask,
        });
        let ctx = &client.contexts[client.contexts.len() - 1];

        driver.set_persistence(handle, false)?;
        if !ctx.engines.engines.is_empty() {
            driver.set_context_engines(handle, &ctx.engines)?;
        }
        if client.options.priority != 0 {
            driver.set_priority(handle, client.options.priority)?;
        }
        if client.options.sseu {
            driver.set_sseu(handle, slice_mask)?;
        }
    }

    let device_mask = driver.device_slice_mask();
    for step in &client.steps {
        if let StepKind::SseuConfig { slice_mask } = step.kind {
            if slice_mask & !device_mask != 0 {
                return sim_error!(format!("Invalid SSEU mask at step {}!", step.idx));
            }
        }
    }
    Ok(())
}

/// Where on its context a batch for `engine` is submitted.
fn engine_target(
    sim: &SimulationContext,
    ctx: &Context,
    engine: EngineId,
    idx: usize,
) -> Result<EngineTarget, SimError> {
    let map = &ctx.engines;
    if map.engines.is_empty() {
        let present = match engine {
            EngineId::Vcs => !sim.device.video_engines().is_empty(),
            _ => sim.device.physical_engine(engine).is_ok(),
        };
        if !present {
            return sim_error!(format!("Engine {engine} at step {idx} is not present!"));
        }
        return Ok(EngineTarget::Engine(engine));
    }

    match map.engines.iter().position(|e| *e == engine) {
        Some(slot) => Ok(EngineTarget::MapSlot(slot + 1)),
        None if map.load_balance => Ok(EngineTarget::MapSlot(0)),
        None => sim_error!(format!(
            "Engine {engine} at step {idx} is not in the engine map of its context!"
        )),
    }
}

fn allocate_batches(sim: &SimulationContext, client: &mut ClientWorkload) -> Result<(), SimError> {
    let driver = &sim.driver;
    let mut preempt_us = vec![DEFAULT_PREEMPT_US; client.contexts.len()];

    for i in 0..client.steps.len() {
        let step = &client.steps[i];
        let batch = match &step.kind {
            StepKind::Preemption { timeout_us } => {
                preempt_us[step.context] = *timeout_us;
                client.resources.push(None);
                continue;
            }
            StepKind::Batch(batch) => batch,
            _ => {
                client.resources.push(None);
                continue;
            }
        };

        let target = engine_target(sim, &client.contexts[step.context], batch.engine, step.idx)?;

        let mut buffers = Vec::with_capacity(batch.data_deps.len() + 1);
        for dep in &batch.data_deps {
            let buffer = match dep.working_set {
                Some(id) => client.working_sets[&id].buffers().buffers[dep.target as usize],
                None => match step.offset(dep.target).and_then(|t| client.resources[t].as_ref()) {
                    Some(resources) => resources.output,
                    None => {
                        return sim_error!(format!("Invalid dependency at step {}!", step.idx));
                    }
                },
            };
            buffers.push(BufferUse {
                buffer,
                write: dep.write,
            });
        }

        let output = driver.allocate_buffer(OUTPUT_BUFFER_SIZE)?;
        buffers.insert(
            0,
            BufferUse {
                buffer: output,
                write: true,
            },
        );
        let handle = match driver.create_batch(preempt_us[step.context]) {
            Ok(handle) => handle,
            Err(e) => {
                let _ = driver.free_buffer(output);
                return Err(e);
            }
        };
        client.resources.push(Some(BatchResources {
            batch: handle,
            output,
            buffers,
            target,
            preempt_us: preempt_us[step.context],
        }));
        driver.set_batch_duration(handle, batch.duration.draw(&mut client.batch_rng))?;
    }
    Ok(())
}

impl Drop for ClientWorkload {
    fn drop(&mut self) {
        let driver = &self.driver;
        let mut results = Vec::new();
        for resources in self.resources.iter().flatten() {
            results.push(driver.free_batch(resources.batch));
            results.push(driver.free_buffer(resources.output));
        }
        for ctx in &self.contexts {
            results.push(driver.destroy_context(ctx.handle));
        }
        if let Some(timeline) = self.timeline.take() {
            results.push(driver.destroy_timeline(timeline));
        }
        for e in results.into_iter().filter_map(Result::err) {
            warn!(self.entity ; "teardown: {e}");
        }
    }
}
