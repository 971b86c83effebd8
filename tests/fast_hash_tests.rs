//! Tests for the hasher selection.
//!
//! This module checks that every `DefaultHashBuilder` (SipHash, `fxhash` or
//! `ahash`, depending on features) is deterministic across map instances,
//! and that maps built with an explicit hasher behave the same way.

use hamt_persist::persistent::{DefaultHashBuilder, PersistentHashMap, PersistentHashSet};
use rstest::rstest;
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;

// =============================================================================
// Referential Transparency Tests
// =============================================================================

/// The same key must hash the same way in every map instance.
#[rstest]
fn test_same_key_produces_same_hash() {
    let first = DefaultHashBuilder::default();
    let second = DefaultHashBuilder::default();

    assert_eq!(first.hash_one("key"), second.hash_one("key"));
    assert_eq!(first.hash_one(42_i32), second.hash_one(42_i32));
}

/// Maps with the same entries iterate in the same order.
#[rstest]
fn test_deterministic_iteration_order() {
    let entries: Vec<(String, i32)> = (0..200).map(|index| (format!("key{index}"), index)).collect();

    let map1: PersistentHashMap<String, i32> = entries.iter().cloned().collect();
    let map2: PersistentHashMap<String, i32> = entries.iter().rev().cloned().collect();

    let order1: Vec<&String> = map1.keys().collect();
    let order2: Vec<&String> = map2.keys().collect();
    assert_eq!(order1, order2);
}

/// Separately built maps with the same entries compare equal.
#[rstest]
fn test_equal_maps_across_instances() {
    let map1: PersistentHashMap<i32, i32> = (0..1000).map(|index| (index, index)).collect();
    let map2: PersistentHashMap<i32, i32> = (0..1000).rev().map(|index| (index, index)).collect();

    assert_eq!(map1, map2);
    assert!(!map1.ptr_eq(&map2));
}

// =============================================================================
// Explicit hasher tests
// =============================================================================

#[rstest]
fn test_with_random_state_hasher() {
    let hasher = RandomState::new();
    let map = (0..500).fold(PersistentHashMap::with_hasher(hasher), |map, index| {
        map.insert(index, index * 2)
    });

    assert_eq!(map.len(), 500);
    assert_eq!(map.get(&250), Some(&500));
    assert_eq!(map.remove(&250).get(&250), None);
    assert_eq!(map.check_invariants(), Ok(()));
}

#[rstest]
fn test_derived_versions_keep_hasher() {
    let hasher = RandomState::new();
    let map = PersistentHashMap::with_hasher(hasher.clone()).insert("a", 1);
    let derived = map.insert("b", 2).remove("a");

    assert_eq!(
        derived.hasher().hash_one("b"),
        hasher.hash_one("b")
    );
    assert_eq!(derived.get("b"), Some(&2));
}

#[rstest]
fn test_hashset_with_default_hasher() {
    let set: PersistentHashSet<String> = ["alpha", "beta", "gamma"]
        .into_iter()
        .map(String::from)
        .collect();

    assert!(set.contains("beta"));
    assert!(!set.contains("delta"));
}

#[cfg(feature = "fxhash")]
#[rstest]
fn test_fxhash_is_default() {
    let builder: rustc_hash::FxBuildHasher = DefaultHashBuilder::default();
    let map = PersistentHashMap::with_hasher(builder).insert(1, "one");
    assert_eq!(map.get(&1), Some(&"one"));
}

#[cfg(feature = "ahash")]
#[rstest]
fn test_fixed_ahash_builder_is_seeded_identically() {
    use hamt_persist::persistent::FixedAHashBuilder;

    let first = FixedAHashBuilder;
    let second = FixedAHashBuilder::default();
    assert_eq!(first.hash_one("seeded"), second.hash_one("seeded"));

    let map = PersistentHashMap::with_hasher(first).insert("seeded", 1);
    assert_eq!(map.get("seeded"), Some(&1));
}
