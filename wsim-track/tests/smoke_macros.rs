// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Ensure that all version of each macro can be used

use std::sync::Arc;

use wsim_track::entity::{Entity, toplevel};
use wsim_track::{Id, debug, error, info, test_helpers, test_init, trace, warn};

macro_rules! build_with_entity {
    ($name:ident, $macro:ident, $slvl:expr) => (
        #[test]
        fn $name() {
            let (test_tracker, tracker) = test_init!(100);

            let top = toplevel(&tracker, "top");
            test_helpers::check_and_clear(&test_tracker, &["0: created 100, top"]);
            assert_eq!(top.id, Id(100));

            $macro!(top ; "Loc with no args");
            test_helpers::check_and_clear(&test_tracker, &[concat!("100:", $slvl, ": Loc with no args")]);

            $macro!(top ; "Loc with {} argument", 1);
            test_helpers::check_and_clear(&test_tracker, &[concat!("100:", $slvl, ": Loc with 1 argument")]);

            $macro!(top ; "Loc with {}, {} arguments", 1, 1 + 1);
            test_helpers::check_and_clear(&test_tracker, &[concat!("100:", $slvl,": Loc with 1, 2 arguments")]);

            drop(top);
            test_helpers::check_and_clear(&test_tracker, &["0: destroyed 100"]);
        }
    );
}

build_with_entity!(trace_with_entity, trace, "TRACE");
build_with_entity!(info_with_entity, info, "INFO");
build_with_entity!(debug_with_entity, debug, "DEBUG");
build_with_entity!(warn_with_entity, warn, "WARN");
build_with_entity!(error_with_entity, error, "ERROR");

#[test]
fn hierarchy() {
    let (test_tracker, tracker) = test_init!(10);

    let top = toplevel(&tracker, "wsim");
    let client = Arc::new(Entity::new(&top, "client0"));
    let runner = Entity::new(&client, "runner");
    test_helpers::check_and_clear(
        &test_tracker,
        &[
            "0: created 10, wsim",
            "10: created 11, wsim::client0",
            "11: created 12, wsim::client0::runner",
        ],
    );

    assert_eq!(runner.full_name(), "wsim::client0::runner");
    assert_eq!(format!("{runner}"), "wsim::client0::runner");

    drop(runner);
    test_helpers::check_and_clear(&test_tracker, &["11: destroyed 12"]);
}

#[test]
fn level_filtering() {
    let test_tracker = Arc::new(test_helpers::TestTracker::with_level(1, log::Level::Warn));
    let tracker: wsim_track::Tracker = test_tracker.clone();

    let top = toplevel(&tracker, "top");
    info!(top ; "hidden");
    debug!(top ; "hidden");
    warn!(top ; "shown");
    test_helpers::check_and_clear(&test_tracker, &["1:WARN: shown"]);
}

#[test]
fn entities_across_threads() {
    let (test_tracker, tracker) = test_init!(1);
    let top = toplevel(&tracker, "top");

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let entity = Entity::new(&top, &format!("thread{i}"));
            std::thread::spawn(move || {
                info!(entity ; "hello from {i}");
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for i in 0..4 {
        test_helpers::check_contains(&test_tracker, &format!("INFO: hello from {i}"));
    }
}
