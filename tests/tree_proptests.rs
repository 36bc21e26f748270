//! Property-based tests for the tree.
//!
//! Differential testing against `std::collections::BTreeMap` as the oracle:
//! any sequence of inserts, overwrites, deletes, lookups and range scans
//! must agree with the oracle, and the structural invariants must hold at
//! the end of every sequence.

mod common;

use std::collections::BTreeMap;

use fastfair::{FastFairTree, HeapAllocator};
use proptest::prelude::*;

/// Keys drawn from a small domain so sequences collide, overwrite and
/// delete each other; values nonzero (zero is the null handle).
fn small_key() -> impl Strategy<Value = i64> {
    -64i64..=64
}

fn value() -> impl Strategy<Value = u64> {
    1u64..=u64::MAX
}

#[derive(Debug, Clone)]
enum Op {
    Insert(i64, u64),
    Delete(i64),
    Search(i64),
    Scan(i64, i64),
}

fn operations(max_ops: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![
            4 => (small_key(), value()).prop_map(|(k, v)| Op::Insert(k, v)),
            2 => small_key().prop_map(Op::Delete),
            2 => small_key().prop_map(Op::Search),
            1 => (small_key(), small_key()).prop_map(|(a, b)| Op::Scan(a.min(b), a.max(b))),
        ],
        0..=max_ops,
    )
}

/// A tree with tiny pages so random sequences exercise splits and
/// multi-level descent, not just one leaf.
type SmallPageTree = FastFairTree<HeapAllocator, 7>;

fn oracle_scan(oracle: &BTreeMap<i64, u64>, min: i64, max: i64) -> Vec<u64> {
    if min >= max {
        // Strict bounds: an empty or inverted window holds nothing.
        return Vec::new();
    }
    oracle
        .range((
            std::ops::Bound::Excluded(min),
            std::ops::Bound::Excluded(max),
        ))
        .map(|(_, &v)| v)
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Every inserted key is retrievable with its latest value.
    #[test]
    fn insert_then_search_returns_value(keys in prop::collection::vec((small_key(), value()), 1..200)) {
        let tree = SmallPageTree::new();
        let mut oracle: BTreeMap<i64, u64> = BTreeMap::new();

        for (key, val) in keys {
            tree.insert(key, val);
            oracle.insert(key, val);
        }
        for (&key, &val) in &oracle {
            prop_assert_eq!(tree.search(key), Some(val), "key {} mismatched", key);
        }
        tree.check_invariants();
    }

    /// Deleted keys vanish, survivors keep their values.
    #[test]
    fn inserts_and_deletes_match_final_set(
        inserts in prop::collection::vec((small_key(), value()), 1..150),
        deletes in prop::collection::vec(small_key(), 0..80),
    ) {
        let tree = SmallPageTree::new();
        let mut oracle: BTreeMap<i64, u64> = BTreeMap::new();

        for (key, val) in inserts {
            tree.insert(key, val);
            oracle.insert(key, val);
        }
        for key in deletes {
            tree.delete(key);
            oracle.remove(&key);
        }

        for key in -70i64..=70 {
            prop_assert_eq!(
                tree.search(key),
                oracle.get(&key).copied(),
                "key {} disagreed with the oracle",
                key
            );
        }
        tree.check_invariants();
    }

    /// Scan returns exactly the strictly-in-range values, ascending.
    #[test]
    fn scan_matches_oracle_range(
        inserts in prop::collection::vec((small_key(), value()), 0..150),
        bounds in (small_key(), small_key()),
    ) {
        let tree = SmallPageTree::new();
        let mut oracle: BTreeMap<i64, u64> = BTreeMap::new();
        for (key, val) in inserts {
            tree.insert(key, val);
            oracle.insert(key, val);
        }

        let (min, max) = (bounds.0.min(bounds.1), bounds.0.max(bounds.1));
        let mut out = Vec::new();
        let appended = tree.scan(min, max, &mut out);

        prop_assert_eq!(appended, out.len());
        prop_assert_eq!(out, oracle_scan(&oracle, min, max));
    }

    /// Arbitrary operation sequences agree with the oracle step by step.
    #[test]
    fn differential_random_ops(ops in operations(300)) {
        let tree = SmallPageTree::new();
        let mut oracle: BTreeMap<i64, u64> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(key, val) => {
                    tree.insert(key, val);
                    oracle.insert(key, val);
                }
                Op::Delete(key) => {
                    tree.delete(key);
                    oracle.remove(&key);
                }
                Op::Search(key) => {
                    prop_assert_eq!(
                        tree.search(key),
                        oracle.get(&key).copied(),
                        "search({}) diverged",
                        key
                    );
                }
                Op::Scan(min, max) => {
                    let mut out = Vec::new();
                    tree.scan(min, max, &mut out);
                    prop_assert_eq!(out, oracle_scan(&oracle, min, max), "scan({}, {}) diverged", min, max);
                }
            }
        }
        tree.check_invariants();
    }

    /// Re-inserting a key is an overwrite, never a duplicate record.
    #[test]
    fn reinsert_is_idempotent_overwrite(key in small_key(), v1 in value(), v2 in value()) {
        let tree = SmallPageTree::new();
        tree.insert(key, v1);
        tree.insert(key, v2);

        prop_assert_eq!(tree.search(key), Some(v2));
        let mut out = Vec::new();
        prop_assert_eq!(tree.scan(key - 1, key + 1, &mut out), 1);
        tree.check_invariants();
    }

    /// Deleting an absent key changes nothing observable.
    #[test]
    fn delete_absent_is_noop(
        inserts in prop::collection::vec((small_key(), value()), 0..60),
        absent in 100i64..200,
    ) {
        let tree = SmallPageTree::new();
        let mut oracle: BTreeMap<i64, u64> = BTreeMap::new();
        for (key, val) in inserts {
            tree.insert(key, val);
            oracle.insert(key, val);
        }

        tree.delete(absent);

        for (&key, &val) in &oracle {
            prop_assert_eq!(tree.search(key), Some(val));
        }
        let mut out = Vec::new();
        prop_assert_eq!(tree.scan(i64::MIN, i64::MAX - 1, &mut out), oracle.len());
        tree.check_invariants();
    }
}

/// The default-cardinality layout gets one heavier differential pass.
#[test]
fn differential_default_cardinality() {
    common::init_tracing();

    let tree: FastFairTree = FastFairTree::new();
    let mut oracle: BTreeMap<i64, u64> = BTreeMap::new();

    for key in common::scrambled_keys(4096) {
        let val = key.unsigned_abs() | 1;
        tree.insert(key, val);
        oracle.insert(key, val);
    }
    // Thin the tree back out.
    for key in oracle.keys().copied().step_by(3).collect::<Vec<_>>() {
        tree.delete(key);
        oracle.remove(&key);
    }

    for (&key, &val) in &oracle {
        assert_eq!(tree.search(key), Some(val), "key {key} lost");
    }
    let mut out = Vec::new();
    tree.scan(i64::MIN, i64::MAX - 1, &mut out);
    assert_eq!(out, oracle_scan(&oracle, i64::MIN, i64::MAX - 1));
    tree.check_invariants();
}
