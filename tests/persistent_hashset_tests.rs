//! Unit tests for PersistentHashSet.

use hamt_persist::persistent::PersistentHashSet;
use proptest::prelude::*;
use rstest::rstest;

// =============================================================================
// Basic operations
// =============================================================================

#[rstest]
fn test_new_set_is_empty() {
    let set: PersistentHashSet<String> = PersistentHashSet::new();
    assert!(set.is_empty());
    assert_eq!(set.iter().count(), 0);
}

#[rstest]
fn test_insert_is_persistent() {
    let set1 = PersistentHashSet::new().insert("a".to_string());
    let set2 = set1.insert("b".to_string());

    assert_eq!(set1.len(), 1);
    assert!(!set1.contains("b"));
    assert_eq!(set2.len(), 2);
    assert!(set2.contains("a"));
    assert!(set2.contains("b"));
}

#[rstest]
fn test_insert_duplicate_keeps_len() {
    let set = PersistentHashSet::singleton(1).insert(1);
    assert_eq!(set.len(), 1);
}

#[rstest]
fn test_remove_until_empty() {
    let set: PersistentHashSet<i32> = (0..100).collect();
    let emptied = (0..100).fold(set.clone(), |set, element| set.remove(&element));

    assert!(emptied.is_empty());
    assert_eq!(set.len(), 100);
}

#[rstest]
fn test_debug_output() {
    assert_eq!(format!("{:?}", PersistentHashSet::singleton(5)), "{5}");
}

// =============================================================================
// Set algebra laws
// =============================================================================

fn arbitrary_set() -> impl Strategy<Value = PersistentHashSet<u8>> {
    prop::collection::vec(any::<u8>(), 0..40).prop_map(|elements| elements.into_iter().collect())
}

proptest! {
    #[test]
    fn prop_union_is_commutative(left in arbitrary_set(), right in arbitrary_set()) {
        prop_assert_eq!(left.union(&right), right.union(&left));
    }

    #[test]
    fn prop_intersection_is_subset_of_both(left in arbitrary_set(), right in arbitrary_set()) {
        let intersection = left.intersection(&right);
        prop_assert!(intersection.is_subset(&left));
        prop_assert!(intersection.is_subset(&right));
    }

    #[test]
    fn prop_difference_is_disjoint_from_other(left in arbitrary_set(), right in arbitrary_set()) {
        prop_assert!(left.difference(&right).is_disjoint(&right));
    }

    #[test]
    fn prop_symmetric_difference_law(left in arbitrary_set(), right in arbitrary_set()) {
        let expected = left.union(&right).difference(&left.intersection(&right));
        prop_assert_eq!(left.symmetric_difference(&right), expected);
    }

    #[test]
    fn prop_union_len_law(left in arbitrary_set(), right in arbitrary_set()) {
        let union = left.union(&right);
        let intersection = left.intersection(&right);
        prop_assert_eq!(union.len() + intersection.len(), left.len() + right.len());
    }
}
