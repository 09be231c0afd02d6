//! Property-based tests for query construction
//!
//! Target names are repeated once per vector supplied for that target, and once
//! for targets that have no vectors; non-finite vectors never reach a store.

use std::collections::BTreeMap;

use proptest::prelude::*;
use ricecoder_rag::{reconcile_targets, InvalidVectorError, QueryParams, Vector};

const TARGETS: [&str; 4] = ["title", "body", "summary", "tags"];

fn target_name() -> impl Strategy<Value = String> {
    prop::sample::select(TARGETS.to_vec()).prop_map(str::to_string)
}

fn finite_vector() -> impl Strategy<Value = Vector> {
    prop::collection::vec(-10.0f32..10.0, 1..4)
}

fn per_target_vectors() -> impl Strategy<Value = BTreeMap<String, Vec<Vector>>> {
    prop::collection::btree_map(target_name(), prop::collection::vec(finite_vector(), 1..4), 0..4)
}

#[test]
fn documented_example_expands_first_target() {
    let mut per_target = BTreeMap::new();
    per_target.insert("t1".to_string(), vec![vec![0.1], vec![0.2]]);
    let declared = vec!["t1".to_string(), "t1".to_string(), "t2".to_string()];

    assert_eq!(reconcile_targets(&declared, &per_target), vec!["t1", "t1", "t2"]);

    let query = QueryParams::new(3)
        .with_vectors_per_target(per_target)
        .with_target_vectors(declared)
        .build()
        .unwrap();
    assert_eq!(query.target_vectors, vec!["t1", "t1", "t2"]);
    assert!(query.vector.is_none());
}

#[test]
fn declaring_each_target_once_gives_the_same_expansion() {
    let mut per_target = BTreeMap::new();
    per_target.insert("t1".to_string(), vec![vec![0.1], vec![0.2]]);
    let declared = vec!["t1".to_string(), "t2".to_string()];
    assert_eq!(reconcile_targets(&declared, &per_target), vec!["t1", "t1", "t2"]);
}

proptest! {
    #[test]
    fn prop_each_target_repeats_once_per_vector(
        declared in prop::collection::vec(target_name(), 1..6),
        per_target in per_target_vectors(),
    ) {
        let reconciled = reconcile_targets(&declared, &per_target);

        let mut distinct: Vec<&String> = Vec::new();
        for target in &declared {
            if !distinct.contains(&target) {
                distinct.push(target);
            }
        }

        for target in &distinct {
            let expected = per_target.get(*target).map(Vec::len).unwrap_or(1);
            let actual = reconciled.iter().filter(|name| name == target).count();
            prop_assert_eq!(actual, expected, "target {}", target);
        }
        prop_assert!(reconciled.iter().all(|name| declared.contains(name)));

        // Names appear grouped, in first-declaration order
        let mut order: Vec<&String> = Vec::new();
        for name in &reconciled {
            if order.last() != Some(&name) {
                order.push(name);
            }
        }
        prop_assert_eq!(order, distinct);
    }

    #[test]
    fn prop_reconciling_twice_is_stable(
        declared in prop::collection::vec(target_name(), 1..6),
        per_target in per_target_vectors(),
    ) {
        let once = reconcile_targets(&declared, &per_target);
        let twice = reconcile_targets(&once, &per_target);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_multi_target_suppresses_primary_vector(
        primary in finite_vector(),
        per_target in per_target_vectors(),
        certainty in prop::option::of(0.0f32..1.0),
        distance in prop::option::of(0.0f32..2.0),
        limit in 0usize..20,
    ) {
        let mut params = QueryParams::new(limit)
            .with_vector(primary.clone())
            .with_vectors_per_target(per_target.clone());
        params.certainty = certainty;
        params.distance = distance;
        let query = params.build().unwrap();

        if per_target.is_empty() {
            prop_assert_eq!(query.vector, Some(primary));
        } else {
            prop_assert!(query.vector.is_none());
            prop_assert_eq!(query.vectors_per_target, per_target);
        }
        prop_assert_eq!(query.certainty, certainty);
        prop_assert_eq!(query.distance, distance);
        prop_assert_eq!(query.limit, limit);
    }

    #[test]
    fn prop_non_finite_values_are_rejected(
        mut vector in finite_vector(),
        position in 0usize..4,
        bad in prop::sample::select(vec![f32::NAN, f32::INFINITY, f32::NEG_INFINITY]),
    ) {
        let position = position % vector.len();
        vector[position] = bad;
        let err = QueryParams::new(1).with_vector(vector).build().unwrap_err();
        let is_non_finite = matches!(err, InvalidVectorError::NonFinite { position: p, .. } if p == position);
        prop_assert!(is_non_finite);
    }
}
