//! Persistent (immutable) hash containers.
//!
//! This module provides an immutable hash map built on a hash array mapped
//! trie (HAMT), plus the containers layered on top of it:
//!
//! - [`PersistentHashMap`]: Persistent hash map (HAMT)
//! - [`TransientHashMap`]: In-place batch builder for a [`PersistentHashMap`]
//! - [`PersistentHashSet`]: Persistent hash set (based on HAMT)
//! - [`SharedHashMap`]: Single-writer publication cell for map versions
//!   (`shared` feature)
//!
//! # Structural Sharing
//!
//! Every update returns a new map. Only the nodes on the path from the root
//! to the edited slot are copied; every other subtree is shared by reference
//! between the old and the new version.
//!
//! # Examples
//!
//! ## `PersistentHashMap`
//!
//! ```rust
//! use hamt_persist::persistent::PersistentHashMap;
//!
//! let empty = PersistentHashMap::new();
//! let first = empty.insert("a", 1);
//! let second = first.insert("b", 2);
//! let third = second.insert("a", 99);
//!
//! assert_eq!(first.get("a"), Some(&1));
//! assert_eq!(second.get("a"), Some(&1));
//! assert_eq!(third.get("a"), Some(&99));
//! assert_eq!(third.get("b"), Some(&2));
//! assert_eq!(third.len(), 2);
//! assert_eq!(first.get("b"), None);
//!
//! let fourth = third.remove("a");
//! assert!(!fourth.contains_key("a"));
//! assert_eq!(fourth.len(), 1);
//! assert_eq!(third.get("a"), Some(&99));
//! ```
//!
//! ## `PersistentHashSet`
//!
//! ```rust
//! use hamt_persist::persistent::PersistentHashSet;
//!
//! let set: PersistentHashSet<i32> = [1, 2, 3].into_iter().collect();
//! let other: PersistentHashSet<i32> = [2, 3, 4].into_iter().collect();
//!
//! assert_eq!(set.union(&other).len(), 4);
//! assert_eq!(set.intersection(&other).len(), 2);
//! ```

// =============================================================================
// Reference Counter Type Alias
// =============================================================================

/// Reference-counted smart pointer type used for trie nodes.
///
/// When the `arc` feature is enabled (the default), this is `std::sync::Arc`,
/// which makes maps `Send + Sync` so that any number of threads can read
/// the same version.
///
/// When the `arc` feature is disabled, this is `std::rc::Rc`,
/// which is faster but not thread-safe.
#[cfg(feature = "arc")]
pub(crate) type ReferenceCounter<T> = std::sync::Arc<T>;

#[cfg(not(feature = "arc"))]
pub(crate) type ReferenceCounter<T> = std::rc::Rc<T>;

mod error;
mod hashing;
mod hashmap;
mod hashset;
mod node;
#[cfg(feature = "shared")]
mod shared;
mod transient;

pub use error::MapError;
#[cfg(feature = "ahash")]
pub use hashing::FixedAHashBuilder;
pub use hashing::DefaultHashBuilder;
pub use hashmap::PersistentHashMap;
pub use hashmap::PersistentHashMapIntoIterator;
pub use hashmap::PersistentHashMapIterator;
pub use hashset::PersistentHashSet;
pub use hashset::PersistentHashSetIntoIterator;
pub use hashset::PersistentHashSetIterator;
#[cfg(feature = "shared")]
pub use shared::SharedHashMap;
pub use transient::TransientHashMap;

// =============================================================================
// Tests
// =============================================================================
