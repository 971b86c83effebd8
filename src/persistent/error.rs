//! Error type for the fallible map operations.
//!
//! Lookups never fail: absence is `None`. The only fallible operations are
//! [`try_insert`](super::PersistentHashMap::try_insert), which refuses to
//! overwrite, and [`check_invariants`](super::PersistentHashMap::check_invariants),
//! which reports the first structural invariant a trie violates.

use thiserror::Error;

/// Errors reported by [`PersistentHashMap`](super::PersistentHashMap).
///
/// # Examples
///
/// ```rust
/// use hamt_persist::persistent::{MapError, PersistentHashMap};
///
/// let map = PersistentHashMap::singleton("key".to_string(), 1);
/// let error = map.try_insert("key".to_string(), 2).unwrap_err();
/// assert_eq!(error, MapError::KeyExists);
/// assert_eq!(error.to_string(), "key already present in map");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum MapError {
    /// `try_insert` was called with a key the map already contains.
    #[error("key already present in map")]
    KeyExists,

    /// A branch's bitmap population differs from its child count.
    #[error("branch at depth {depth} has {bits} bitmap bits but {children} children")]
    BitmapMismatch {
        /// Depth of the offending branch.
        depth: usize,
        /// Number of set bits in the bitmap.
        bits: u32,
        /// Length of the dense child array.
        children: usize,
    },

    /// A non-root branch has no children.
    #[error("empty branch at depth {depth}")]
    EmptyBranch {
        /// Depth of the offending branch.
        depth: usize,
    },

    /// A non-root branch holds a single leaf or collision list that should
    /// have been pulled up into its parent.
    #[error("uncompacted single-entry branch at depth {depth}")]
    UncompactedBranch {
        /// Depth of the offending branch.
        depth: usize,
    },

    /// An entry sits in a slot its hash does not select.
    #[error("entry stored at depth {depth} under a slot its hash does not select")]
    MisplacedEntry {
        /// Depth at which the mismatch was found.
        depth: usize,
    },

    /// A collision list holds fewer than two entries.
    #[error("collision list at depth {depth} holds {entries} entries")]
    CollisionTooSmall {
        /// Depth of the slot holding the list.
        depth: usize,
        /// Number of entries found.
        entries: usize,
    },

    /// A collision list holds an entry whose hash differs from the list's.
    #[error("collision list at depth {depth} holds an entry with a different hash")]
    CollisionHashMismatch {
        /// Depth of the slot holding the list.
        depth: usize,
    },

    /// A branch exists below the last level the hash can address.
    #[error("branch at depth {depth} exceeds the maximum trie depth")]
    DepthExceeded {
        /// Depth of the offending branch.
        depth: usize,
    },

    /// The recorded entry count differs from the number of reachable entries.
    #[error("map records {recorded} entries but {counted} are reachable")]
    LengthMismatch {
        /// The map's cached length.
        recorded: usize,
        /// Entries found by walking the trie.
        counted: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_map_error_display() {
        let error = MapError::BitmapMismatch {
            depth: 2,
            bits: 3,
            children: 4,
        };
        assert_eq!(
            error.to_string(),
            "branch at depth 2 has 3 bitmap bits but 4 children"
        );
        assert_eq!(
            MapError::LengthMismatch {
                recorded: 5,
                counted: 4
            }
            .to_string(),
            "map records 5 entries but 4 are reachable"
        );
    }

    #[rstest]
    fn test_map_error_error_trait() {
        let error = MapError::KeyExists;
        let _: &dyn std::error::Error = &error;
    }
}
