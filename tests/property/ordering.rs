//! Property tests for list ordering and decoder robustness.
//!
//! 1. Sorting with `display_order` always yields priority rank descending,
//!    newest first within a rank.
//! 2. `Query::public_tasks()` returns exactly the public rows, in display order.
//! 3. Random bytes never make `codec::decode` panic.

use proptest::prelude::*;
use tasklist_proto::codec;
use tasklist_proto::filter::Query;
use tasklist_proto::task::{
    Category, NewTask, OwnerId, Priority, Task, TaskId, Timestamp, display_order, sort_for_display,
};
use uuid::Uuid;

fn arb_priority() -> impl Strategy<Value = Priority> {
    prop::sample::select(Priority::ALL.to_vec())
}

fn arb_category() -> impl Strategy<Value = Category> {
    prop::sample::select(Category::ALL.to_vec())
}

fn arb_task() -> impl Strategy<Value = Task> {
    (
        any::<u128>(),
        "[a-z ]{1,24}",
        arb_category(),
        arb_priority(),
        any::<bool>(),
        prop::option::of("[a-z]{1,8}"),
        0u64..1_000_000,
    )
        .prop_map(|(id, title, category, priority, completed, owner, created)| {
            let mut row = NewTask::public(title, category, priority);
            row.completed = completed;
            row.owner = owner.map(OwnerId::new);
            row.into_task(
                TaskId::from_uuid(Uuid::from_u128(id)),
                Timestamp::from_millis(created),
            )
        })
}

proptest! {
    #[test]
    fn sorted_rows_are_in_display_order(mut rows in prop::collection::vec(arb_task(), 0..40)) {
        sort_for_display(&mut rows);
        for pair in rows.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            prop_assert!(a.priority.rank() >= b.priority.rank());
            if a.priority == b.priority {
                prop_assert!(a.created_at >= b.created_at);
            }
            prop_assert_ne!(display_order(a, b), std::cmp::Ordering::Greater);
        }
    }

    #[test]
    fn public_query_keeps_only_public_rows(rows in prop::collection::vec(arb_task(), 0..40)) {
        let out = Query::public_tasks().run(&rows);
        let expected = rows.iter().filter(|t| t.owner.is_none()).count();
        prop_assert_eq!(out.len(), expected);
        prop_assert!(out.iter().all(Task::is_public));
        for pair in out.windows(2) {
            prop_assert_ne!(display_order(&pair[0], &pair[1]), std::cmp::Ordering::Greater);
        }
    }

    #[test]
    fn random_bytes_never_panic_decode(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode(&bytes);
    }
}
