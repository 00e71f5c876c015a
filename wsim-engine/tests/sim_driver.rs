// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use wsim_engine::device::DriverVariant;
use wsim_engine::driver::{
    BufferUse, ContextEngines, Driver, EngineBond, EngineTarget, FenceMode, FenceWait, Submission,
};
use wsim_engine::engine::EngineId;
use wsim_engine::test_helpers::{sim_driver, sim_driver_for, submit_simple};

const MS: u64 = 1000;

#[test]
fn wait_blocks_for_duration() {
    let driver = sim_driver();
    let context = driver.create_context(None).unwrap();

    let start = Instant::now();
    let (_, submitted) = submit_simple(&driver, context, EngineId::Rcs, Some(20 * MS));
    driver.wait(submitted.handle).unwrap();
    assert!(start.elapsed() >= Duration::from_millis(20));
}

#[test]
fn same_engine_runs_in_order() {
    let driver = sim_driver();
    let context = driver.create_context(None).unwrap();

    let start = Instant::now();
    submit_simple(&driver, context, EngineId::Rcs, Some(15 * MS));
    let (_, second) = submit_simple(&driver, context, EngineId::Rcs, Some(15 * MS));
    driver.wait(second.handle).unwrap();
    assert!(start.elapsed() >= Duration::from_millis(30));
}

#[test]
fn different_engines_overlap() {
    let driver = sim_driver();
    let context = driver.create_context(None).unwrap();

    let start = Instant::now();
    let (_, first) = submit_simple(&driver, context, EngineId::Rcs, Some(50 * MS));
    let (_, second) = submit_simple(&driver, context, EngineId::Bcs, Some(50 * MS));
    driver.wait(first.handle).unwrap();
    driver.wait(second.handle).unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_millis(95));
}

#[test]
fn unbound_batch_runs_until_terminated() {
    let driver = sim_driver();
    let context = driver.create_context(None).unwrap();

    let start = Instant::now();
    let (batch, submitted) = submit_simple(&driver, context, EngineId::Rcs, None);
    assert_eq!(driver.outstanding(), 1);

    let waiter = {
        let driver = Arc::clone(&driver);
        thread::spawn(move || driver.wait(submitted.handle).unwrap())
    };

    thread::sleep(Duration::from_millis(20));
    driver.terminate_batch(batch).unwrap();
    waiter.join().unwrap();

    assert!(start.elapsed() >= Duration::from_millis(20));
    assert_eq!(driver.outstanding(), 0);
    assert_eq!(driver.stats().terminations, 1);
}

fn submit_waiting_on(
    driver: &wsim_engine::sim_driver::SimDriver,
    context: wsim_engine::driver::ContextHandle,
    fence_waits: Vec<FenceWait>,
) -> wsim_engine::driver::Submitted {
    let batch = driver.create_batch(100).unwrap();
    driver.set_batch_duration(batch, Some(0)).unwrap();
    driver
        .submit(&Submission {
            context,
            target: EngineTarget::Engine(EngineId::Bcs),
            batch,
            buffers: Vec::new(),
            fence_waits,
            emit_fence: false,
        })
        .unwrap()
}

#[test]
fn completion_fence_waits_for_end() {
    let driver = sim_driver();
    let context = driver.create_context(None).unwrap();

    let start = Instant::now();
    let (_, first) = submit_simple(&driver, context, EngineId::Rcs, Some(30 * MS));
    let fence = first.out_fence.unwrap();
    let second = submit_waiting_on(
        &driver,
        context,
        vec![FenceWait {
            fence,
            mode: FenceMode::Completion,
        }],
    );
    driver.wait(second.handle).unwrap();
    assert!(start.elapsed() >= Duration::from_millis(30));
}

#[test]
fn submit_fence_waits_for_start() {
    let driver = sim_driver();
    let context = driver.create_context(None).unwrap();

    let start = Instant::now();
    let (_, first) = submit_simple(&driver, context, EngineId::Rcs, Some(60 * MS));
    let fence = first.out_fence.unwrap();
    let second = submit_waiting_on(
        &driver,
        context,
        vec![FenceWait {
            fence,
            mode: FenceMode::Submit,
        }],
    );
    driver.wait(second.handle).unwrap();
    assert!(start.elapsed() < Duration::from_millis(55));
    driver.close_fence(fence).unwrap();
    assert!(driver.close_fence(fence).is_err());
}

#[test]
fn timeline_fence_released_by_advance() {
    let driver = sim_driver();
    let context = driver.create_context(None).unwrap();
    let timeline = driver.create_timeline().unwrap();
    let fence = driver.create_fence(timeline, 3).unwrap();

    let submitted = submit_waiting_on(
        &driver,
        context,
        vec![FenceWait {
            fence,
            mode: FenceMode::Completion,
        }],
    );
    assert_eq!(driver.outstanding(), 1);

    driver.advance_timeline(timeline, 2).unwrap();
    assert_eq!(driver.outstanding(), 1);

    let start = Instant::now();
    let waiter = {
        let driver = Arc::clone(&driver);
        thread::spawn(move || driver.wait(submitted.handle).unwrap())
    };
    thread::sleep(Duration::from_millis(20));
    driver.advance_timeline(timeline, 1).unwrap();
    waiter.join().unwrap();

    assert!(start.elapsed() >= Duration::from_millis(20));
    assert_eq!(driver.timeline_value(timeline).unwrap(), 3);
}

#[test]
fn reader_waits_for_writer() {
    let driver = sim_driver();
    let context = driver.create_context(None).unwrap();
    let buffer = driver.allocate_buffer(4096).unwrap();

    let start = Instant::now();
    let writer = driver.create_batch(100).unwrap();
    driver.set_batch_duration(writer, Some(30 * MS)).unwrap();
    driver
        .submit(&Submission {
            context,
            target: EngineTarget::Engine(EngineId::Rcs),
            batch: writer,
            buffers: vec![BufferUse {
                buffer,
                write: true,
            }],
            fence_waits: Vec::new(),
            emit_fence: false,
        })
        .unwrap();

    let reader = driver.create_batch(100).unwrap();
    driver.set_batch_duration(reader, Some(0)).unwrap();
    let read = driver
        .submit(&Submission {
            context,
            target: EngineTarget::Engine(EngineId::Bcs),
            batch: reader,
            buffers: vec![BufferUse {
                buffer,
                write: false,
            }],
            fence_waits: Vec::new(),
            emit_fence: false,
        })
        .unwrap();

    driver.wait(read.handle).unwrap();
    assert!(start.elapsed() >= Duration::from_millis(30));
}

#[test]
fn load_balancing_spreads_work() {
    let driver = sim_driver();
    let context = driver.create_context(None).unwrap();
    driver
        .set_context_engines(
            context,
            &ContextEngines {
                engines: vec![EngineId::Vcs1, EngineId::Vcs2],
                load_balance: true,
                bonds: Vec::new(),
            },
        )
        .unwrap();

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..2 {
        let batch = driver.create_batch(100).unwrap();
        driver.set_batch_duration(batch, Some(50 * MS)).unwrap();
        let submitted = driver
            .submit(&Submission {
                context,
                target: EngineTarget::MapSlot(0),
                batch,
                buffers: Vec::new(),
                fence_waits: Vec::new(),
                emit_fence: false,
            })
            .unwrap();
        handles.push(submitted.handle);
    }
    for handle in handles {
        driver.wait(handle).unwrap();
    }
    assert!(start.elapsed() < Duration::from_millis(95));
}

#[test]
fn engine_configuration_errors() {
    let old = sim_driver_for(9, DriverVariant::I915, 2);
    let context = old.create_context(None).unwrap();
    let balanced = ContextEngines {
        engines: vec![EngineId::Vcs1, EngineId::Vcs2],
        load_balance: true,
        bonds: Vec::new(),
    };
    assert!(old.set_context_engines(context, &balanced).is_err());

    let driver = sim_driver();
    let context = driver.create_context(None).unwrap();
    let bonded_without_balance = ContextEngines {
        engines: vec![EngineId::Vcs1, EngineId::Vcs2],
        load_balance: false,
        bonds: vec![EngineBond {
            mask: EngineId::Vcs1.mask_bit(),
            master: EngineId::Rcs,
        }],
    };
    assert!(
        driver
            .set_context_engines(context, &bonded_without_balance)
            .is_err()
    );

    let generic = ContextEngines {
        engines: vec![EngineId::Vcs],
        load_balance: false,
        bonds: Vec::new(),
    };
    assert!(driver.set_context_engines(context, &generic).is_err());
}

#[test]
fn submission_target_errors() {
    let driver = sim_driver();
    let context = driver.create_context(None).unwrap();
    driver
        .set_context_engines(
            context,
            &ContextEngines {
                engines: vec![EngineId::Rcs],
                load_balance: false,
                bonds: Vec::new(),
            },
        )
        .unwrap();
    let batch = driver.create_batch(100).unwrap();

    let mut submission = Submission {
        context,
        target: EngineTarget::MapSlot(0),
        batch,
        buffers: Vec::new(),
        fence_waits: Vec::new(),
        emit_fence: false,
    };
    assert!(driver.submit(&submission).is_err());

    submission.target = EngineTarget::MapSlot(2);
    assert!(driver.submit(&submission).is_err());

    submission.target = EngineTarget::Engine(EngineId::Rcs);
    assert!(driver.submit(&submission).is_err());

    submission.target = EngineTarget::MapSlot(1);
    let submitted = driver.submit(&submission).unwrap();
    driver.wait(submitted.handle).unwrap();
}

#[test]
fn context_settings_are_counted() {
    let driver = sim_driver();
    let vm = driver.create_vm().unwrap();
    let first = driver.create_context(Some(vm)).unwrap();
    let second = driver.create_context(Some(vm)).unwrap();
    assert_eq!(driver.context_vm(second).unwrap(), vm);

    driver.set_priority(first, -512).unwrap();
    driver.set_priority(second, 256).unwrap();
    driver.set_sseu(first, 1).unwrap();
    assert!(driver.set_sseu(first, 0b100).is_err());
    driver.set_persistence(first, false).unwrap();

    assert_eq!(driver.context_priority(first).unwrap(), -512);
    assert_eq!(driver.context_slice_mask(first).unwrap(), 1);
    assert!(!driver.context_persistent(first).unwrap());

    let stats = driver.stats();
    assert_eq!(stats.contexts_created, 2);
    assert_eq!(stats.priority_writes, 2);
    assert_eq!(stats.sseu_writes, 1);

    driver.destroy_context(first).unwrap();
    assert!(driver.set_priority(first, 0).is_err());
}
