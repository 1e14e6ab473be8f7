//! Property tests for the completion join: whatever order work items and the
//! owner report in, the finish event fires exactly once, after the last
//! report, poisoned iff anything failed.

#[macro_use]
mod common;

use common::*;
use optrack::event::{EventPoll, EventSubsystem};
use optrack::types::faults;
use proptest::prelude::*;

#[derive(Debug, Clone)]
struct JoinPlan {
    item_results: Vec<bool>,
    finish_order: Vec<usize>,
    owner_result: bool,
    owner_slot: usize,
}

fn join_plan() -> impl Strategy<Value = JoinPlan> {
    prop::collection::vec(prop::bool::weighted(0.8), 0..8).prop_flat_map(|item_results| {
        let n = item_results.len();
        let order: Vec<usize> = (0..n).collect();
        (
            Just(item_results),
            Just(order).prop_shuffle(),
            prop::bool::weighted(0.8),
            0..=n,
        )
            .prop_map(
                |(item_results, finish_order, owner_result, owner_slot)| JoinPlan {
                    item_results,
                    finish_order,
                    owner_result,
                    owner_slot,
                },
            )
    })
}

proptest! {
    #![proptest_config(test_proptest_config(128))]

    #[test]
    fn join_fires_once_after_last_report(plan in join_plan()) {
        init_test_logging_with_level(tracing::Level::WARN);
        let node = SingleNode::new();
        let op = node.op("join");
        prop_assert!(op.mark_ready());
        prop_assert!(op.mark_started());

        let mut handles: Vec<_> = plan
            .item_results
            .iter()
            .map(|_| Some(op.add_async_work_item(FlagItem::default()).expect("add")))
            .collect();

        let total_reports = plan.item_results.len() + 1;
        let mut reports = 0;
        let report = |reports: &mut usize| {
            *reports += 1;
            let expected = if *reports == total_reports { 1 } else { 0 };
            assert_eq!(node.events.trigger_count(op.finish_event()), expected);
        };

        for (position, &index) in plan.finish_order.iter().enumerate() {
            if position == plan.owner_slot {
                prop_assert!(op.mark_finished(plan.owner_result));
                report(&mut reports);
            }
            let handle = handles[index].take().expect("each item finishes once");
            handle.mark_finished(plan.item_results[index]);
            report(&mut reports);
        }
        if plan.owner_slot == plan.finish_order.len() {
            prop_assert!(op.mark_finished(plan.owner_result));
            report(&mut reports);
        }

        let poisoned = !plan.owner_result || plan.item_results.contains(&false);
        prop_assert_eq!(node.events.trigger_count(op.finish_event()), 1);
        prop_assert_eq!(
            node.events.poll(op.finish_event()),
            EventPoll::Triggered { poisoned }
        );
        let failed = plan.item_results.iter().filter(|ok| !**ok).count();
        prop_assert_eq!(op.failed_work_items(), failed);
        prop_assert_eq!(op.reference_count(), 1);
    }

    #[test]
    fn cancellation_during_join_still_fires_once(
        items in 1usize..6,
        cancel_after in 0usize..6,
    ) {
        init_test_logging_with_level(tracing::Level::WARN);
        let node = SingleNode::new();
        let op = node.op("cancel-join");
        prop_assert!(op.mark_ready());
        prop_assert!(op.mark_started());
        let handles: Vec<_> = (0..items)
            .map(|_| op.add_async_work_item(FlagItem::default()).expect("add"))
            .collect();
        prop_assert!(op.mark_finished(true));

        for (position, handle) in handles.into_iter().enumerate() {
            if position == cancel_after {
                op.attempt_cancellation(faults::CANCELLED, b"mid-join");
            }
            handle.mark_finished(true);
        }

        prop_assert_eq!(node.events.trigger_count(op.finish_event()), 1);
        prop_assert!(op.is_complete());
    }
}
