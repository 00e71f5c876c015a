// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Compile a workload descriptor into [`Step`]s.
//!
//! A descriptor is a list of records separated by `,`. Each record is a list
//! of fields separated by `.`. Records whose first field starts with `#` are
//! comments. A record whose first field is one of the step keywords (`d`,
//! `p`, `P`, `s`, `S`, `t`, `q`, `a`, `f`, `M`, `T`, `X`, `B`, `b`, `w`, `W`)
//! is a control step; anything else is a batch:
//!
//! ```text
//! <context>.<engine>.<duration>.<dependencies>.<wait>
//! ```
//!
//! Parsing is strict: the first invalid record fails the whole descriptor
//! with an error naming the step index.

use std::collections::HashSet;
use std::str::FromStr;

use wsim_engine::device::DeviceInfo;
use wsim_engine::driver::EngineBond;
use wsim_engine::engine::EngineId;
use wsim_engine::sim_error;
use wsim_engine::types::SimError;

use crate::context::SimConfig;
use crate::step::{
    Batch, BatchDuration, BufferSize, DependencyEntry, FenceDependencies, MAX_BUFFER_SIZE,
    MAX_DURATION_US, Step, StepKind, WorkingSetSpec,
};

/// Parse a whole descriptor and run the post-parse validation passes.
pub fn parse_steps(
    desc: &str,
    device: &DeviceInfo,
    config: &SimConfig,
) -> Result<Vec<Step>, SimError> {
    let mut steps: Vec<Step> = Vec::new();

    for record in desc.split(',') {
        let record = record.trim();
        if record.is_empty() {
            continue;
        }
        let fields: Vec<&str> = record.split('.').filter(|f| !f.is_empty()).collect();
        if fields.first().is_some_and(|f| f.starts_with('#')) {
            continue;
        }

        let parser = StepParser {
            idx: steps.len(),
            fields: &fields,
            device,
            config,
        };
        steps.push(parser.parse()?);
    }

    mark_fence_emitters(&mut steps)?;
    check_fence_signals(&steps)?;
    check_working_set_ids(&steps)?;

    Ok(steps)
}

/// Every fence dependency must name an earlier batch or software fence, which
/// then has to emit a fence.
pub(crate) fn mark_fence_emitters(steps: &mut [Step]) -> Result<(), SimError> {
    let mut emitters = Vec::new();
    for step in steps.iter() {
        let Some(batch) = step.batch() else {
            continue;
        };
        for target in &batch.fence_deps.targets {
            let target_idx = match step.offset(*target) {
                Some(target_idx) if target_idx < step.idx => target_idx,
                _ => return sim_error!(format!("Invalid dependency target {}!", step.idx)),
            };
            match steps[target_idx].kind {
                StepKind::Batch(_) | StepKind::SoftFenceWait => emitters.push(target_idx),
                _ => return sim_error!(format!("Invalid dependency target {}!", step.idx)),
            }
        }
    }

    for idx in emitters {
        steps[idx].emit_fence = true;
    }
    Ok(())
}

pub(crate) fn check_fence_signals(steps: &[Step]) -> Result<(), SimError> {
    for step in steps {
        let StepKind::SoftFenceSignal { target } = step.kind else {
            continue;
        };
        let valid = match step.offset(target) {
            Some(target_idx) if target_idx < step.idx => {
                steps[target_idx].kind == StepKind::SoftFenceWait
            }
            _ => false,
        };
        if !valid {
            return sim_error!(format!("Invalid sw fence target at step {}!", step.idx));
        }
    }
    Ok(())
}

pub(crate) fn check_working_set_ids(steps: &[Step]) -> Result<(), SimError> {
    let mut ids = HashSet::new();
    for step in steps {
        if let StepKind::WorkingSet(definition) = &step.kind {
            if !ids.insert(definition.id) {
                return sim_error!(format!(
                    "Duplicate working set {} at step {}!",
                    definition.id, step.idx
                ));
            }
        }
    }
    Ok(())
}

fn scale(value: u64, factor: f64) -> u64 {
    (factor * value as f64).round() as u64
}

/// Parse a buffer size with an optional `k`, `m` or `g` suffix.
fn parse_size(s: &str) -> Option<u64> {
    let (digits, multiplier) = match s.chars().last()? {
        'k' | 'K' => (&s[..s.len() - 1], 1 << 10),
        'm' | 'M' => (&s[..s.len() - 1], 1 << 20),
        'g' | 'G' => (&s[..s.len() - 1], 1 << 30),
        _ => (s, 1),
    };
    let value: u64 = digits.parse().ok()?;
    if value == 0 {
        return None;
    }
    value
        .checked_mul(multiplier)
        .filter(|size| *size <= MAX_BUFFER_SIZE)
}

/// Parse `[count n]size[-max]`.
fn parse_buffer_sizes(token: &str) -> Option<Vec<BufferSize>> {
    let (count, sizes) = match token.split_once('n') {
        Some((count, sizes)) => (count.parse::<usize>().ok()?, sizes),
        None => (1, token),
    };
    if count == 0 {
        return None;
    }

    let (min, max) = match sizes.split_once('-') {
        Some((min, max)) => (parse_size(min)?, parse_size(max)?),
        None => {
            let size = parse_size(sizes)?;
            (size, size)
        }
    };
    if max < min {
        return None;
    }

    Some(vec![BufferSize { min, max }; count])
}

/// Parse a single working-set buffer index or an `A-B` range.
fn parse_working_set_targets(targets: &str) -> Option<Vec<i32>> {
    match targets.split_once('-') {
        Some((from, to)) => {
            let from: i32 = from.parse().ok()?;
            let to: i32 = to.parse().ok()?;
            if from < 0 || to <= from {
                return None;
            }
            Some((from..=to).collect())
        }
        None => {
            let target: i32 = targets.parse().ok()?;
            (target >= 0).then(|| vec![target])
        }
    }
}

struct StepParser<'a> {
    idx: usize,
    fields: &'a [&'a str],
    device: &'a DeviceInfo,
    config: &'a SimConfig,
}

impl StepParser<'_> {
    fn parse(&self) -> Result<Step, SimError> {
        let idx = self.idx;
        let step = match self.fields[0] {
            "d" => {
                let us: i64 = self.single_value("delay")?;
                if us <= 0 {
                    return self.invalid("delay");
                }
                let us = scale(us as u64, self.config.delay_scale);
                if us > MAX_DURATION_US {
                    return self.invalid("delay");
                }
                Step::new(idx, 0, StepKind::Delay { us })
            }
            "p" => {
                let us: i64 = self.single_value("period")?;
                if us <= 0 || us as u64 > MAX_DURATION_US {
                    return self.invalid("period");
                }
                Step::new(idx, 0, StepKind::Period { us: us as u64 })
            }
            "P" => {
                self.check_not_xe("Priority")?;
                self.expect_fields(3, "priority")?;
                let context = self.context_field(1)?;
                let priority: i32 = self.value(2, "priority")?;
                Step::new(idx, context, StepKind::ContextPriority { priority })
            }
            "s" => {
                let target = self.relative_target("sync target")?;
                Step::new(idx, 0, StepKind::Sync { target })
            }
            "S" => {
                self.check_not_xe("SSEU")?;
                self.expect_fields(3, "SSEU")?;
                let context = self.context_field(1)?;
                let slice_mask: u64 = self.value(2, "SSEU")?;
                if slice_mask == 0 {
                    return self.invalid("SSEU");
                }
                Step::new(idx, context, StepKind::SseuConfig { slice_mask })
            }
            "t" => {
                let distance: i64 = self.single_value("throttle")?;
                if distance < 0 {
                    return self.invalid("throttle");
                }
                Step::new(
                    idx,
                    0,
                    StepKind::Throttle {
                        distance: distance as usize,
                    },
                )
            }
            "q" => {
                let depth: i64 = self.single_value("qd throttle")?;
                if depth < 0 {
                    return self.invalid("qd throttle");
                }
                Step::new(
                    idx,
                    0,
                    StepKind::QueueDepthThrottle {
                        depth: depth as usize,
                    },
                )
            }
            "a" => {
                let target: i32 = self.single_value("sw fence signal")?;
                if target >= 0 {
                    return self.invalid("sw fence signal");
                }
                Step::new(idx, 0, StepKind::SoftFenceSignal { target })
            }
            "f" => {
                self.expect_fields(1, "sw fence")?;
                Step::new(idx, 0, StepKind::SoftFenceWait)
            }
            "M" => {
                self.expect_fields(3, "engine map")?;
                let context = self.context_field(1)?;
                let engines = self.engine_map(self.fields[2])?;
                Step::new(idx, context, StepKind::EngineMap { engines })
            }
            "T" => {
                let target = self.relative_target("terminate target")?;
                Step::new(idx, 0, StepKind::Terminate { target })
            }
            "X" => {
                self.expect_fields(3, "preemption period")?;
                let context = self.context_field(1)?;
                let timeout_us: i64 = self.value(2, "preemption period")?;
                let Ok(timeout_us) = u32::try_from(timeout_us) else {
                    return self.invalid("preemption period");
                };
                Step::new(idx, context, StepKind::Preemption { timeout_us })
            }
            "B" => {
                self.expect_fields(2, "load balance")?;
                let context = self.context_field(1)?;
                Step::new(idx, context, StepKind::LoadBalance)
            }
            "b" => {
                self.check_not_xe("Bonding")?;
                self.expect_fields(4, "bond")?;
                let context = self.context_field(1)?;
                let mut mask = 0;
                for name in self.fields[2].split('|') {
                    mask |= self.bond_engine(name)?.mask_bit();
                }
                let master = self.bond_engine(self.fields[3])?;
                Step::new(idx, context, StepKind::Bond(EngineBond { mask, master }))
            }
            "w" | "W" => {
                self.check_not_xe("Working sets")?;
                let definition = self.working_set(self.fields[0] == "W")?;
                Step::new(idx, 0, StepKind::WorkingSet(definition))
            }
            _ => self.batch()?,
        };
        Ok(step)
    }

    fn invalid<T>(&self, what: &str) -> Result<T, SimError> {
        sim_error!(format!("Invalid {what} at step {}!", self.idx))
    }

    fn check_not_xe(&self, feature: &str) -> Result<(), SimError> {
        if self.device.is_xe() {
            return sim_error!(format!(
                "{feature} step {} is not supported by the xe driver!",
                self.idx
            ));
        }
        Ok(())
    }

    fn expect_fields(&self, count: usize, what: &str) -> Result<(), SimError> {
        if self.fields.len() != count {
            return self.invalid(what);
        }
        Ok(())
    }

    fn value<T: FromStr>(&self, field: usize, what: &str) -> Result<T, SimError> {
        match self.fields.get(field).map(|f| f.parse::<T>()) {
            Some(Ok(value)) => Ok(value),
            _ => self.invalid(what),
        }
    }

    fn single_value<T: FromStr>(&self, what: &str) -> Result<T, SimError> {
        self.expect_fields(2, what)?;
        self.value(1, what)
    }

    fn context_field(&self, field: usize) -> Result<usize, SimError> {
        let context: i64 = self.value(field, "context")?;
        match usize::try_from(context) {
            Ok(context) => Ok(context),
            Err(_) => self.invalid("context"),
        }
    }

    /// A strictly negative offset that stays within the workload.
    fn relative_target(&self, what: &str) -> Result<i32, SimError> {
        let target: i32 = self.single_value(what)?;
        if target >= 0 || self.idx as i64 + i64::from(target) < 0 {
            return self.invalid(what);
        }
        Ok(target)
    }

    fn engine(&self, name: &str, what: &str) -> Result<EngineId, SimError> {
        match EngineId::from_str(name) {
            Ok(engine) => Ok(engine),
            Err(_) => self.invalid(what),
        }
    }

    fn engine_map(&self, list: &str) -> Result<Vec<EngineId>, SimError> {
        let mut engines = Vec::new();
        for name in list.split('|') {
            let engine = self.engine(name, "engine map")?;
            if engine == EngineId::Default {
                return self.invalid("engine map");
            }
            engines.extend(self.device.expand_engine(engine));
        }
        if engines.is_empty() {
            return self.invalid("engine map");
        }
        Ok(engines)
    }

    fn bond_engine(&self, name: &str) -> Result<EngineId, SimError> {
        let engine = self.engine(name, "bond")?;
        if !engine.is_specific() {
            return self.invalid("bond");
        }
        Ok(engine)
    }

    fn working_set(&self, shared: bool) -> Result<WorkingSetSpec, SimError> {
        if self.fields.len() < 3 {
            return self.invalid("working set");
        }
        let id: i64 = self.value(1, "working set")?;
        let Ok(id) = u32::try_from(id) else {
            return self.invalid("working set");
        };

        let mut sizes = Vec::new();
        for field in &self.fields[2..] {
            for token in field.split('/').filter(|t| !t.is_empty()) {
                match parse_buffer_sizes(token) {
                    Some(buffers) => sizes.extend(buffers),
                    None => return self.invalid("working set"),
                }
            }
        }
        if sizes.is_empty() {
            return self.invalid("working set");
        }

        Ok(WorkingSetSpec { id, shared, sizes })
    }

    fn batch(&self) -> Result<Step, SimError> {
        if self.fields.len() != 5 {
            return self.invalid("record");
        }

        let context = match self.fields[0].parse::<i64>().map(usize::try_from) {
            Ok(Ok(context)) => context,
            _ => return self.invalid("context id"),
        };
        let engine = self.engine(self.fields[1], "engine id")?;
        let duration = self.duration(self.fields[2])?;
        let (data_deps, fence_deps) = self.dependencies(self.fields[3])?;
        let wait = match self.fields[4] {
            "0" => false,
            "1" => true,
            _ => return self.invalid("wait flag"),
        };

        Ok(Step::new(
            self.idx,
            context,
            StepKind::Batch(Batch {
                engine,
                duration,
                data_deps,
                fence_deps,
                wait,
            }),
        ))
    }

    fn duration(&self, field: &str) -> Result<BatchDuration, SimError> {
        if field == "*" {
            if !self.device.supports_unbound_batches() {
                return sim_error!(format!("Infinite batch at step {} needs Gen8+!", self.idx));
            }
            return Ok(BatchDuration::Unbound);
        }

        let scale_factor = self.config.duration_scale;
        let (min, max) = match field.split_once('-') {
            Some((min, max)) => (min, Some(max)),
            None => (field, None),
        };
        let min = match min.parse::<u64>() {
            Ok(min) if min > 0 && scale(min, scale_factor) <= MAX_DURATION_US => {
                scale(min, scale_factor)
            }
            _ => return self.invalid("duration"),
        };
        let max = match max {
            Some(max) => match max.parse::<u64>() {
                Ok(max)
                    if max > 0
                        && scale(max, scale_factor) > min
                        && scale(max, scale_factor) <= MAX_DURATION_US =>
                {
                    scale(max, scale_factor)
                }
                _ => return self.invalid("maximum duration"),
            },
            None => min,
        };

        Ok(BatchDuration::Bounded { min, max })
    }

    fn dependencies(
        &self,
        field: &str,
    ) -> Result<(Vec<DependencyEntry>, FenceDependencies), SimError> {
        let mut data_deps = Vec::new();
        let mut fence_deps = FenceDependencies::default();
        if field == "0" {
            return Ok((data_deps, fence_deps));
        }

        for token in field.split('/') {
            let mut chars = token.chars();
            match chars.next() {
                Some('-') => {
                    if !chars.next().is_some_and(|c| c.is_ascii_digit()) {
                        return self.invalid("dependency");
                    }
                    let target = self.dependency_offset(token)?;
                    data_deps.push(DependencyEntry::relative(target));
                }
                Some(kind @ ('f' | 's')) => {
                    if kind == 's' && !self.device.supports_submit_fences() {
                        return sim_error!(format!(
                            "Submit fences at step {} are not supported by the xe driver!",
                            self.idx
                        ));
                    }
                    if !fence_deps.targets.is_empty() {
                        return sim_error!(format!(
                            "Multiple fences at step {} are not supported!",
                            self.idx
                        ));
                    }
                    let target = self.dependency_offset(&token[1..])?;
                    fence_deps.targets.push(target);
                    fence_deps.submit_fence = kind == 's';
                }
                Some(kind @ ('r' | 'w')) => {
                    let Some((id, targets)) = token[1..].split_once('-') else {
                        return self.invalid("dependency");
                    };
                    let Ok(id) = id.parse::<u32>() else {
                        return self.invalid("dependency");
                    };
                    let Some(targets) = parse_working_set_targets(targets) else {
                        return self.invalid("dependency");
                    };
                    data_deps.extend(targets.into_iter().map(|target| DependencyEntry {
                        target,
                        write: kind == 'w',
                        working_set: Some(id),
                    }));
                }
                _ => return self.invalid("dependency"),
            }
        }

        Ok((data_deps, fence_deps))
    }

    /// A strictly negative offset that stays within the workload.
    fn dependency_offset(&self, s: &str) -> Result<i32, SimError> {
        match s.parse::<i32>() {
            Ok(target) if target < 0 && self.idx as i64 + i64::from(target) >= 0 => Ok(target),
            _ => self.invalid("dependency"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(parse_size("4096"), Some(4096));
        assert_eq!(parse_size("4k"), Some(4096));
        assert_eq!(parse_size("2M"), Some(2 << 20));
        assert_eq!(parse_size("1g"), Some(1 << 30));
        assert_eq!(parse_size("0"), None);
        assert_eq!(parse_size("k"), None);
        assert_eq!(parse_size("4x"), None);
        assert_eq!(parse_size(&MAX_BUFFER_SIZE.to_string()), Some(MAX_BUFFER_SIZE));
        assert_eq!(parse_size("18446744073709551615"), None);
        assert_eq!(parse_size("17179869184g"), None);
    }

    #[test]
    fn buffer_size_tokens() {
        assert_eq!(
            parse_buffer_sizes("3n4k"),
            Some(vec![BufferSize { min: 4096, max: 4096 }; 3])
        );
        assert_eq!(
            parse_buffer_sizes("4k-16k"),
            Some(vec![BufferSize {
                min: 4096,
                max: 16384
            }])
        );
        assert_eq!(parse_buffer_sizes("0n4k"), None);
        assert_eq!(parse_buffer_sizes("16k-4k"), None);
    }

    #[test]
    fn working_set_targets() {
        assert_eq!(parse_working_set_targets("2"), Some(vec![2]));
        assert_eq!(parse_working_set_targets("1-3"), Some(vec![1, 2, 3]));
        assert_eq!(parse_working_set_targets("3-3"), None);
        assert_eq!(parse_working_set_targets("x"), None);
    }

    #[test]
    fn scaling_rounds() {
        assert_eq!(scale(1000, 1.0), 1000);
        assert_eq!(scale(3, 0.5), 2);
        assert_eq!(scale(1000, 0.25), 250);
    }
}
