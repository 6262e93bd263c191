// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The demonstration suite run by the binary.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::atomic::{AtomicUsize, Ordering},
    thread,
    time::Duration,
};
use testsched_runner::{
    ensure,
    model::ExecutionModels,
    test_group::{GroupedTestCases, SimpleGroup, TestFailure, TestGroup},
};

/// A group that counts how many of its tests are in flight in this process.
#[derive(Debug, Default)]
struct FixtureGroup {
    in_flight: AtomicUsize,
}

impl TestGroup for FixtureGroup {
    fn name(&self) -> &str {
        "Fixtures"
    }

    fn setup(&self) -> Result<(), TestFailure> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn teardown(&self) -> Result<(), TestFailure> {
        let previous = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        ensure!(previous > 0, "teardown ran without a matching setup");
        Ok(())
    }
}

/// Builds the demonstration suite.
///
/// With `include_crash`, a group runnable only under process models gets a test that aborts its
/// process.
pub(crate) fn suite(include_crash: bool) -> GroupedTestCases {
    let mut grouped = GroupedTestCases::new();

    grouped
        .add_group(SimpleGroup::new("Arithmetic"))
        .add_test("arith_checked_overflow", || {
            ensure!(u8::MAX.checked_add(1).is_none());
            Ok(())
        })
        .add_test("arith_wrapping", || {
            ensure!(250_u8.wrapping_add(10) == 4);
            Ok(())
        })
        .add_test("arith_parse_error", || {
            let value: i64 = "-1234".parse()?;
            ensure!(value == -1234, "parsed {value}");
            Ok(())
        });

    grouped
        .add_group(SimpleGroup::new("Strings"))
        .add_test("string_len", || {
            ensure!("μs".len() == 3);
            ensure!("μs".chars().count() == 2);
            Ok(())
        })
        .add_test("string_split", || {
            let tokens: Vec<_> = "a, b,,c".split(',').map(str::trim).collect();
            ensure!(tokens == ["a", "b", "", "c"], "got {tokens:?}");
            Ok(())
        });

    grouped
        .add_group(SimpleGroup::new("Collections"))
        .add_test("collections_btree_order", || {
            let map: BTreeMap<_, _> = [(3, "c"), (1, "a"), (2, "b")].into_iter().collect();
            let values: Vec<_> = map.values().copied().collect();
            ensure!(values == ["a", "b", "c"]);
            Ok(())
        })
        .add_test("collections_deque_rotate", || {
            let mut deque: VecDeque<_> = (1..=4).collect();
            deque.rotate_left(1);
            ensure!(deque == [2, 3, 4, 1], "got {deque:?}");
            Ok(())
        });

    grouped
        .add_group(FixtureGroup::default())
        .add_test("fixture_slow_first", || {
            thread::sleep(Duration::from_millis(40));
            Ok(())
        })
        .add_test("fixture_fast_second", || {
            thread::sleep(Duration::from_millis(5));
            Ok(())
        })
        .add_test("fixture_medium_third", || {
            thread::sleep(Duration::from_millis(20));
            Ok(())
        });

    if include_crash {
        grouped
            .add_group(
                SimpleGroup::new("Isolation").with_models(ExecutionModels::MULTI_PROCESS),
            )
            .add_test("isolation_before_crash", || Ok(()))
            .add_test("isolation_abort", || std::process::abort())
            .add_test("isolation_after_crash", || Ok(()));
    }

    grouped
}
