//! Property-based tests for run determinism and the command drain
//!
//! Runs use real (un-paused) time, so deliveries are kept to a few
//! milliseconds.

use futures::{stream, StreamExt};
use proptest::prelude::*;

use tealoop::component::engine;
use tealoop::demo::{counter, Counter, CounterCmd, CounterMsg};
use tealoop::Snapshot;

type CounterSnapshot = Snapshot<CounterMsg, Counter, CounterCmd>;

fn message_strategy() -> impl Strategy<Value = CounterMsg> {
    prop_oneof![
        Just(CounterMsg::Increment),
        Just(CounterMsg::Decrement),
        Just(CounterMsg::Reset),
        any::<i32>().prop_map(|value| CounterMsg::Set {
            value: i64::from(value)
        }),
        (any::<i32>(), 0u64..3).prop_map(|(value, delay_ms)| CounterMsg::Later {
            value: i64::from(value),
            delay_ms
        }),
    ]
}

fn run(messages: Vec<CounterMsg>) -> Vec<CounterSnapshot> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        engine::run_local(&counter::env(), stream::iter(messages))
            .map(|result| result.unwrap())
            .collect()
            .await
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_same_messages_same_snapshots(messages in prop::collection::vec(message_strategy(), 0..16)) {
        let first = run(messages.clone());
        let second = run(messages);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_deliveries_land_before_next_message(messages in prop::collection::vec(message_strategy(), 0..16)) {
        let snapshots = run(messages.clone());

        // Initial, one per external message, one per delivery.
        let later_count = messages
            .iter()
            .filter(|m| matches!(m, CounterMsg::Later { .. }))
            .count();
        prop_assert_eq!(snapshots.len(), 1 + messages.len() + later_count);

        let applied: Vec<&CounterMsg> = snapshots
            .iter()
            .filter_map(|s| match s {
                Snapshot::Regular(regular) => Some(&regular.message),
                Snapshot::Initial(_) => None,
            })
            .collect();
        for (idx, message) in applied.iter().enumerate() {
            if let CounterMsg::Later { value, .. } = message {
                prop_assert_eq!(applied.get(idx + 1), Some(&&CounterMsg::Delivered { value: *value }));
            }
        }
        prop_assert!(snapshots.iter().all(|s| s.current_state().pending <= 1));
    }
}
