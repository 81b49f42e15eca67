//! Property-based invariant tests for the keyed list reconciler.
//!
//! 1. Reconciling a list with itself yields an empty script.
//! 2. Applying the script to `previous` yields `next`.
//! 3. Items with unchanged key and content never get an `Update`.
//! 4. Every op class appears in canonical order: removes last.
//! 5. Moves never exceed the number of surviving items.
//! 6. Duplicate keys are rejected on either side.

use std::collections::HashMap;

use proptest::prelude::*;
use tessera_view::reconcile::{EditOp, KeySide, reconcile};

type Item = (u32, u8);

fn key(item: &Item) -> u32 {
    item.0
}

// ── Helpers ─────────────────────────────────────────────────────────────

/// Lists with unique keys drawn from a small pool so that snapshots share
/// many keys.
fn keyed_list() -> impl Strategy<Value = Vec<Item>> {
    proptest::sample::subsequence((0u32..24).collect::<Vec<_>>(), 0..=24)
        .prop_shuffle()
        .prop_flat_map(|keys| {
            let n = keys.len();
            (Just(keys), proptest::collection::vec(0u8..3, n))
        })
        .prop_map(|(keys, contents)| keys.into_iter().zip(contents).collect())
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Idempotence
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn self_reconcile_is_empty(xs in keyed_list()) {
        let script = reconcile(&xs, &xs, key).unwrap();
        prop_assert!(script.is_empty(), "unexpected ops: {:?}", script.ops());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Round trip
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn apply_reaches_next(previous in keyed_list(), next in keyed_list()) {
        let script = reconcile(&previous, &next, key).unwrap();
        let mut live = previous.clone();
        script.apply(&mut live, key).unwrap();
        prop_assert_eq!(&live, &next, "script {:?}", script.ops());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. No spurious updates
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn updates_only_for_changed_content(previous in keyed_list(), next in keyed_list()) {
        let before: HashMap<u32, u8> = previous.iter().copied().collect();
        let script = reconcile(&previous, &next, key).unwrap();
        for op in script.ops() {
            if let EditOp::Update { key, item } = op {
                prop_assert_ne!(before.get(key), Some(&item.1));
            }
        }
        let expected_updates = next
            .iter()
            .filter(|(k, c)| before.get(k).is_some_and(|old| old != c))
            .count();
        prop_assert_eq!(script.counts().updates, expected_updates);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Removes come last
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn removes_trail_the_script(previous in keyed_list(), next in keyed_list()) {
        let script = reconcile(&previous, &next, key).unwrap();
        let first_remove = script
            .ops()
            .iter()
            .position(|op| matches!(op, EditOp::Remove { .. }))
            .unwrap_or(script.len());
        let only_removes_after = script.ops()[first_remove..]
            .iter()
            .all(|op| matches!(op, EditOp::Remove { .. }));
        prop_assert!(only_removes_after);

        let gone = previous.iter().filter(|p| !next.iter().any(|n| n.0 == p.0)).count();
        prop_assert_eq!(script.counts().removes, gone);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Move bound
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn moves_bounded_by_survivors(previous in keyed_list(), next in keyed_list()) {
        let script = reconcile(&previous, &next, key).unwrap();
        let survivors = next.iter().filter(|n| previous.iter().any(|p| p.0 == n.0)).count();
        prop_assert!(script.counts().moves <= survivors.saturating_sub(1));
        prop_assert_eq!(script.counts().inserts, next.len() - survivors);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 6. Duplicate keys
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn duplicate_in_next_is_rejected(mut next in keyed_list().prop_filter("non-empty", |v| !v.is_empty())) {
        let dup = next[0];
        next.push(dup);
        let err = reconcile(&[], &next, key).unwrap_err();
        prop_assert_eq!(err.key, dup.0);
        prop_assert_eq!(err.side, KeySide::Next);
    }

    #[test]
    fn duplicate_in_previous_is_rejected(mut previous in keyed_list().prop_filter("non-empty", |v| !v.is_empty())) {
        let dup = previous[previous.len() - 1];
        previous.insert(0, dup);
        let err = reconcile(&previous, &[], key).unwrap_err();
        prop_assert_eq!(err.side, KeySide::Previous);
    }
}
