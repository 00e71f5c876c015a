// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Assemble parsed steps into a workload template.
//!
//! The template is built once and then prepared for every client that runs
//! it. Shared working sets are allocated here so that every client uses the
//! same buffers. Private working sets are allocated per client by the
//! preparer.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::RngCore;
use rand::SeedableRng;
use rand::rngs::StdRng;
use wsim_engine::driver::{BufferHandle, Driver};
use wsim_engine::sim_error;
use wsim_engine::types::SimError;
use wsim_track::debug;
use wsim_track::entity::Entity;

use crate::context::SimulationContext;
use crate::parser::{check_fence_signals, check_working_set_ids, mark_fence_emitters};
use crate::step::{Step, StepKind, WorkingSetSpec};

/// The buffers of one working set, freed when dropped.
pub struct WorkingSetBuffers {
    pub id: u32,
    pub buffers: Vec<BufferHandle>,
    pub sizes: Vec<u64>,
    driver: Arc<dyn Driver>,
}

impl WorkingSetBuffers {
    /// Allocate every buffer of a working set, drawing sizes from `rng`.
    pub fn allocate(
        driver: &Arc<dyn Driver>,
        definition: &WorkingSetSpec,
        rng: &mut impl RngCore,
    ) -> Result<Self, SimError> {
        let mut set = Self {
            id: definition.id,
            buffers: Vec::with_capacity(definition.sizes.len()),
            sizes: Vec::with_capacity(definition.sizes.len()),
            driver: driver.clone(),
        };
        for size in &definition.sizes {
            let size = size.draw(rng);
            set.buffers.push(driver.allocate_buffer(size)?);
            set.sizes.push(size);
        }
        Ok(set)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.sizes.iter().sum()
    }
}

impl Drop for WorkingSetBuffers {
    fn drop(&mut self) {
        for buffer in self.buffers.drain(..) {
            // Nothing useful can be done about a buffer the driver lost
            let _ = self.driver.free_buffer(buffer);
        }
    }
}

/// A working set as seen by one client.
pub enum WorkingSet {
    /// Allocated once with the template and used by every client.
    Shared(Arc<WorkingSetBuffers>),
    /// Allocated for, and owned by, a single client.
    Private(WorkingSetBuffers),
}

impl WorkingSet {
    #[must_use]
    pub fn buffers(&self) -> &WorkingSetBuffers {
        match self {
            WorkingSet::Shared(buffers) => buffers,
            WorkingSet::Private(buffers) => buffers,
        }
    }

    #[must_use]
    pub fn is_shared(&self) -> bool {
        matches!(self, WorkingSet::Shared(_))
    }
}

/// Index of the batch at or before `target`, wrapping around to the end of
/// the workload when `target` is negative.
///
/// Returns `None` if the workload has no batches.
#[must_use]
pub fn nearest_batch(steps: &[Step], target: i64) -> Option<usize> {
    let len = steps.len() as i64;
    if len == 0 {
        return None;
    }
    let mut idx = target.rem_euclid(len);
    for _ in 0..len {
        if steps[idx as usize].is_batch() {
            return Some(idx as usize);
        }
        idx = (idx - 1).rem_euclid(len);
    }
    None
}

/// The canonical form of a workload, shared by every client that runs it.
pub struct Workload {
    pub entity: Arc<Entity>,
    pub steps: Vec<Step>,

    /// Size of the context table: the highest context referenced plus one.
    pub num_contexts: usize,

    shared_sets: BTreeMap<u32, Arc<WorkingSetBuffers>>,
}

impl Workload {
    /// Build a template from parsed steps.
    ///
    /// When `append` is given its steps are added after the workload's own,
    /// re-indexed so that their relative references stay within the
    /// appended part.
    pub fn assemble(
        sim: &SimulationContext,
        name: &str,
        mut steps: Vec<Step>,
        append: Option<&[Step]>,
    ) -> Result<Self, SimError> {
        if let Some(append) = append {
            let offset = steps.len();
            steps.extend(append.iter().cloned().map(|mut step| {
                step.idx += offset;
                step
            }));
            mark_fence_emitters(&mut steps)?;
            check_fence_signals(&steps)?;
            check_working_set_ids(&steps)?;
        }

        if steps.is_empty() {
            return sim_error!("Empty workload!");
        }
        validate_targets(&steps)?;

        let num_contexts = steps.iter().map(|step| step.context).max().unwrap_or(0) + 1;
        let entity = Arc::new(Entity::new(&sim.top, name));

        let mut rng = StdRng::seed_from_u64(sim.next_seed());
        let mut shared_sets = BTreeMap::new();
        let mut shared_bytes = 0;
        for step in &steps {
            if let StepKind::WorkingSet(definition) = &step.kind {
                if definition.shared {
                    let set = WorkingSetBuffers::allocate(&sim.driver, definition, &mut rng)?;
                    shared_bytes += set.total_bytes();
                    shared_sets.insert(definition.id, Arc::new(set));
                }
            }
        }
        if !shared_sets.is_empty() {
            debug!(entity ; "{} shared working sets, {} bytes", shared_sets.len(), shared_bytes);
        }

        Ok(Self {
            entity,
            steps,
            num_contexts,
            shared_sets,
        })
    }

    #[must_use]
    pub fn shared_set(&self, id: u32) -> Option<&Arc<WorkingSetBuffers>> {
        self.shared_sets.get(&id)
    }

    /// Total bytes allocated for shared working sets.
    #[must_use]
    pub fn shared_bytes(&self) -> u64 {
        self.shared_sets.values().map(|set| set.total_bytes()).sum()
    }

    /// Whether any step needs a software fence timeline.
    #[must_use]
    pub fn has_soft_fences(&self) -> bool {
        self.steps
            .iter()
            .any(|step| step.kind == StepKind::SoftFenceWait)
    }
}

/// Check the references the parser cannot check on its own.
fn validate_targets(steps: &[Step]) -> Result<(), SimError> {
    let working_sets: BTreeMap<u32, &WorkingSetSpec> = steps
        .iter()
        .filter_map(|step| match &step.kind {
            StepKind::WorkingSet(definition) => Some((definition.id, definition)),
            _ => None,
        })
        .collect();

    for step in steps {
        match &step.kind {
            StepKind::Sync { target } => {
                let target_idx = step.idx as i64 + i64::from(*target);
                if target_idx < 0 || nearest_batch(steps, target_idx).is_none() {
                    return sim_error!(format!("Invalid sync target at step {}!", step.idx));
                }
            }
            StepKind::Terminate { target } => {
                let unbound = step
                    .offset(*target)
                    .and_then(|idx| steps.get(idx))
                    .and_then(Step::batch)
                    .is_some_and(|batch| batch.duration.is_unbound());
                if !unbound {
                    return sim_error!(format!("Invalid terminate target at step {}!", step.idx));
                }
            }
            StepKind::Batch(batch) => {
                for dep in &batch.data_deps {
                    match dep.working_set {
                        None => {
                            let is_batch = step
                                .offset(dep.target)
                                .filter(|idx| *idx < step.idx)
                                .and_then(|idx| steps.get(idx))
                                .is_some_and(Step::is_batch);
                            if !is_batch {
                                return sim_error!(format!(
                                    "Invalid dependency at step {}!",
                                    step.idx
                                ));
                            }
                        }
                        Some(id) => {
                            let Some(definition) = working_sets.get(&id) else {
                                return sim_error!(format!(
                                    "Unknown working set {id} at step {}!",
                                    step.idx
                                ));
                            };
                            if dep.target < 0 || dep.target as usize >= definition.sizes.len() {
                                return sim_error!(format!(
                                    "Invalid working set {id} dependency at step {}!",
                                    step.idx
                                ));
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{Batch, BatchDuration, FenceDependencies};
    use wsim_engine::engine::EngineId;

    fn batch(idx: usize) -> Step {
        Step::new(
            idx,
            0,
            StepKind::Batch(Batch {
                engine: EngineId::Rcs,
                duration: BatchDuration::fixed(10),
                data_deps: Vec::new(),
                fence_deps: FenceDependencies::default(),
                wait: false,
            }),
        )
    }

    #[test]
    fn nearest_batch_walks_back() {
        let steps = vec![batch(0), Step::new(1, 0, StepKind::Delay { us: 1 }), batch(2)];
        assert_eq!(nearest_batch(&steps, 2), Some(2));
        assert_eq!(nearest_batch(&steps, 1), Some(0));
        assert_eq!(nearest_batch(&steps, 0), Some(0));
    }

    #[test]
    fn nearest_batch_wraps_around() {
        let steps = vec![Step::new(0, 0, StepKind::Delay { us: 1 }), batch(1)];
        assert_eq!(nearest_batch(&steps, 0), Some(1));
        assert_eq!(nearest_batch(&steps, -1), Some(1));
        assert_eq!(nearest_batch(&steps, -5), Some(1));
    }

    #[test]
    fn nearest_batch_without_batches() {
        let steps = vec![Step::new(0, 0, StepKind::Delay { us: 1 })];
        assert_eq!(nearest_batch(&steps, 0), None);
        assert_eq!(nearest_batch(&[], 0), None);
    }
}
