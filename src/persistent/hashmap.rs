//! Persistent (immutable) hash map based on HAMT.
//!
//! This module provides [`PersistentHashMap`], an immutable hash map
//! that uses structural sharing for efficient operations.
//!
//! # Overview
//!
//! `PersistentHashMap` is based on Hash Array Mapped Trie (HAMT). Keys are
//! hashed to 32 bits and the hash is consumed five bits per level, giving a
//! 32-way branching trie at most seven levels deep.
//!
//! - O(log32 N) get (effectively O(1) for practical sizes)
//! - O(log32 N) insert
//! - O(log32 N) remove
//! - O(1) len and `is_empty`
//!
//! All operations return new maps without modifying the original,
//! and structural sharing ensures memory efficiency.
//!
//! # Examples
//!
//! ```rust
//! use hamt_persist::persistent::PersistentHashMap;
//!
//! let map = PersistentHashMap::new()
//!     .insert("one".to_string(), 1)
//!     .insert("two".to_string(), 2)
//!     .insert("three".to_string(), 3);
//!
//! assert_eq!(map.get("one"), Some(&1));
//! assert_eq!(map.get("two"), Some(&2));
//! assert_eq!(map.get("three"), Some(&3));
//!
//! // Structural sharing: the original map is preserved
//! let updated = map.insert("one".to_string(), 100);
//! assert_eq!(map.get("one"), Some(&1));       // Original unchanged
//! assert_eq!(updated.get("one"), Some(&100)); // New version
//! ```
//!
//! # Internal Structure
//!
//! The HAMT uses:
//! - 32-way branching (5 bits per level)
//! - Bitmap to track which slots are occupied, with a dense child array
//! - Collision lists for keys whose full hashes are identical
//! - Structural sharing via reference-counted nodes
//! - Path compaction on remove, so deleted keys never leave single-entry
//!   branches behind

use std::borrow::Borrow;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::iter::{FromIterator, FusedIterator};
use std::slice;

use arrayvec::ArrayVec;

use super::ReferenceCounter;
use super::error::MapError;
use super::hashing::{DefaultHashBuilder, MAX_DEPTH, hash_key};
use super::node::{self, Branch, Entry, Slot};
use super::transient::TransientHashMap;

// =============================================================================
// PersistentHashMap Definition
// =============================================================================

/// A persistent (immutable) hash map based on HAMT.
///
/// `PersistentHashMap` is an immutable data structure that uses structural
/// sharing to efficiently support functional programming patterns.
///
/// The hasher is pluggable through the `S` parameter; see
/// [`DefaultHashBuilder`] for the compile-time default.
///
/// # Time Complexity
///
/// | Operation      | Complexity        |
/// |----------------|-------------------|
/// | `new`          | O(1)              |
/// | `get`          | O(log32 N)        |
/// | `insert`       | O(log32 N)        |
/// | `remove`       | O(log32 N)        |
/// | `contains_key` | O(log32 N)        |
/// | `len`          | O(1)              |
/// | `is_empty`     | O(1)              |
///
/// # Examples
///
/// ```rust
/// use hamt_persist::persistent::PersistentHashMap;
///
/// let map = PersistentHashMap::singleton("key".to_string(), 42);
/// assert_eq!(map.get("key"), Some(&42));
/// ```
pub struct PersistentHashMap<K, V, S = DefaultHashBuilder> {
    /// Root branch of the trie, `None` for the empty map
    pub(super) root: Option<ReferenceCounter<Branch<K, V>>>,
    /// Number of entries
    pub(super) length: usize,
    pub(super) hasher: S,
}

impl<K, V> PersistentHashMap<K, V> {
    /// Creates a new empty map using [`DefaultHashBuilder`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hamt_persist::persistent::PersistentHashMap;
    ///
    /// let map: PersistentHashMap<String, i32> = PersistentHashMap::new();
    /// assert!(map.is_empty());
    /// ```
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }
}

impl<K, V, S> PersistentHashMap<K, V, S> {
    /// Creates a new empty map which will use `hasher` to hash keys.
    ///
    /// Every map derived from this one through `insert`/`remove` keeps a
    /// clone of the same hasher.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::collections::hash_map::RandomState;
    /// use hamt_persist::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::with_hasher(RandomState::new()).insert(1, "one");
    /// assert_eq!(map.get(&1), Some(&"one"));
    /// ```
    #[inline]
    #[must_use]
    pub const fn with_hasher(hasher: S) -> Self {
        Self {
            root: None,
            length: 0,
            hasher,
        }
    }

    /// Returns the number of entries in the map.
    ///
    /// # Complexity
    ///
    /// O(1)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hamt_persist::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new()
    ///     .insert("a".to_string(), 1)
    ///     .insert("b".to_string(), 2);
    /// assert_eq!(map.len(), 2);
    /// ```
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.length
    }

    /// Returns `true` if the map contains no entries.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hamt_persist::persistent::PersistentHashMap;
    ///
    /// let empty: PersistentHashMap<String, i32> = PersistentHashMap::new();
    /// assert!(empty.is_empty());
    ///
    /// let non_empty = empty.insert("key".to_string(), 42);
    /// assert!(!non_empty.is_empty());
    /// ```
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns a reference to the map's hasher.
    #[inline]
    #[must_use]
    pub const fn hasher(&self) -> &S {
        &self.hasher
    }

    /// Returns `true` if both maps share the same root node.
    ///
    /// Two empty maps are pointer-equal. A `false` result says nothing about
    /// whether the contents differ.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hamt_persist::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new().insert("a", 1);
    /// let copy = map.clone();
    /// let updated = map.insert("a", 2);
    ///
    /// assert!(map.ptr_eq(&copy));
    /// assert!(!map.ptr_eq(&updated));
    /// ```
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.root, &other.root) {
            (None, None) => true,
            (Some(left), Some(right)) => ReferenceCounter::ptr_eq(left, right),
            _ => false,
        }
    }

    /// Returns an iterator over key-value pairs.
    ///
    /// The iterator is lazy and walks the trie depth-first in slot order, so
    /// the order depends on the key hashes, not on insertion order. Each call
    /// starts a fresh traversal.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hamt_persist::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new()
    ///     .insert("a".to_string(), 1)
    ///     .insert("b".to_string(), 2);
    ///
    /// for (key, value) in map.iter() {
    ///     println!("{}: {}", key, value);
    /// }
    /// ```
    #[must_use]
    pub fn iter(&self) -> PersistentHashMapIterator<'_, K, V> {
        PersistentHashMapIterator::new(self.root.as_deref(), self.length)
    }

    /// Returns an iterator over keys.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hamt_persist::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new()
    ///     .insert("a".to_string(), 1)
    ///     .insert("b".to_string(), 2);
    ///
    /// let mut keys: Vec<&String> = map.keys().collect();
    /// keys.sort();
    /// assert_eq!(keys, vec!["a", "b"]);
    /// ```
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(key, _)| key)
    }

    /// Returns an iterator over values.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hamt_persist::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new()
    ///     .insert("a".to_string(), 1)
    ///     .insert("b".to_string(), 2);
    ///
    /// let sum: i32 = map.values().sum();
    /// assert_eq!(sum, 3);
    /// ```
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, value)| value)
    }

    /// Verifies the trie's structural invariants.
    ///
    /// Checks bitmap/child-array agreement, entry placement, collision list
    /// shape, path compaction, depth bounds and the cached length. Intended
    /// for tests and debugging; a map built only through this crate's API
    /// always passes.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant as a [`MapError`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hamt_persist::persistent::PersistentHashMap;
    ///
    /// let map: PersistentHashMap<i32, i32> = (0..1000).map(|index| (index, index)).collect();
    /// assert!(map.check_invariants().is_ok());
    /// ```
    pub fn check_invariants(&self) -> Result<(), MapError> {
        let counted = match &self.root {
            Some(root) => root
                .validate(true)
                .inspect_err(|error| tracing::debug!(%error, "map invariant violated"))?,
            None => 0,
        };
        let result = if counted == self.length {
            Ok(())
        } else {
            Err(MapError::LengthMismatch {
                recorded: self.length,
                counted,
            })
        };
        result.inspect_err(|error| tracing::debug!(%error, "map invariant violated"))
    }
}

impl<K: Hash + Eq, V> PersistentHashMap<K, V> {
    /// Creates a map containing a single key-value pair.
    ///
    /// # Arguments
    ///
    /// * `key` - The key
    /// * `value` - The value
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hamt_persist::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::singleton("key".to_string(), 42);
    /// assert_eq!(map.len(), 1);
    /// assert_eq!(map.get("key"), Some(&42));
    /// ```
    #[inline]
    #[must_use]
    pub fn singleton(key: K, value: V) -> Self {
        Self::new().insert(key, value)
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> PersistentHashMap<K, V, S> {
    /// Looks up the stored entry for `key`.
    fn find_entry<Q>(&self, key: &Q) -> Option<&Entry<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let root = self.root.as_deref()?;
        root.find(hash_key(&self.hasher, key), key)
    }

    /// Returns a reference to the value corresponding to the key.
    ///
    /// The key may be any borrowed form of the map's key type, but `Hash` and
    /// `Eq` on the borrowed form must match those for the key type.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to look up
    ///
    /// # Complexity
    ///
    /// O(log32 N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hamt_persist::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new()
    ///     .insert("hello".to_string(), 42);
    ///
    /// // Can use &str to look up String keys
    /// assert_eq!(map.get("hello"), Some(&42));
    /// assert_eq!(map.get("world"), None);
    /// ```
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find_entry(key).map(|entry| &entry.value)
    }

    /// Returns the stored key and value corresponding to the key.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hamt_persist::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new().insert("key".to_string(), 42);
    /// assert_eq!(map.get_key_value("key"), Some((&"key".to_string(), &42)));
    /// ```
    #[must_use]
    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find_entry(key).map(|entry| (&entry.key, &entry.value))
    }

    /// Returns `true` if the map contains a value for the specified key.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to check
    ///
    /// # Complexity
    ///
    /// O(log32 N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hamt_persist::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new()
    ///     .insert("key".to_string(), 42);
    ///
    /// assert!(map.contains_key("key"));
    /// assert!(!map.contains_key("other"));
    /// ```
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find_entry(key).is_some()
    }
}

impl<K: Hash + Eq, V, S: BuildHasher + Clone> PersistentHashMap<K, V, S> {
    /// Inserts a key-value pair into the map.
    ///
    /// If the map already contains the key, the value is replaced.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to insert
    /// * `value` - The value to insert
    ///
    /// # Complexity
    ///
    /// O(log32 N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hamt_persist::persistent::PersistentHashMap;
    ///
    /// let map1 = PersistentHashMap::new().insert("key".to_string(), 1);
    /// let map2 = map1.insert("key".to_string(), 2);
    ///
    /// assert_eq!(map1.get("key"), Some(&1)); // Original unchanged
    /// assert_eq!(map2.get("key"), Some(&2)); // New version
    /// ```
    #[must_use]
    pub fn insert(&self, key: K, value: V) -> Self {
        let hash = hash_key(&self.hasher, &key);
        self.insert_hashed(hash, key, value)
    }

    fn insert_hashed(&self, hash: u32, key: K, value: V) -> Self {
        let mut root = self
            .root
            .clone()
            .unwrap_or_else(|| ReferenceCounter::new(Branch::empty()));
        let replaced = node::insert(
            &mut root,
            ReferenceCounter::new(Entry::new(hash, key, value)),
            0,
        );

        Self {
            root: Some(root),
            length: if replaced.is_some() {
                self.length
            } else {
                self.length + 1
            },
            hasher: self.hasher.clone(),
        }
    }

    /// Inserts a key-value pair only if the key is not yet present.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::KeyExists`] if the map already contains `key`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hamt_persist::persistent::{MapError, PersistentHashMap};
    ///
    /// let map = PersistentHashMap::new().insert("a", 1);
    ///
    /// assert_eq!(map.try_insert("b", 2).unwrap().get("b"), Some(&2));
    /// assert_eq!(map.try_insert("a", 2).unwrap_err(), MapError::KeyExists);
    /// ```
    pub fn try_insert(&self, key: K, value: V) -> Result<Self, MapError> {
        let hash = hash_key(&self.hasher, &key);
        let present = self
            .root
            .as_deref()
            .is_some_and(|root| root.find(hash, &key).is_some());
        if present {
            Err(MapError::KeyExists)
        } else {
            Ok(self.insert_hashed(hash, key, value))
        }
    }

    /// Removes a key from the map.
    ///
    /// Returns a new map without the key. Branches left holding a single
    /// entry are collapsed into their parent. If the key doesn't exist,
    /// returns a map sharing the original root.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to remove
    ///
    /// # Complexity
    ///
    /// O(log32 N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hamt_persist::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new()
    ///     .insert("a".to_string(), 1)
    ///     .insert("b".to_string(), 2);
    /// let removed = map.remove("a");
    ///
    /// assert_eq!(map.len(), 2);     // Original unchanged
    /// assert_eq!(removed.len(), 1); // New version
    /// assert_eq!(removed.get("a"), None);
    /// ```
    #[must_use]
    pub fn remove<Q>(&self, key: &Q) -> Self
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = hash_key(&self.hasher, key);
        let Some(root) = &self.root else {
            return self.clone();
        };
        if root.find(hash, key).is_none() {
            return self.clone();
        }

        let mut root = ReferenceCounter::clone(root);
        node::remove(&mut root, hash, key, 0);
        Self {
            root: (!root.is_empty()).then_some(root),
            length: self.length - 1,
            hasher: self.hasher.clone(),
        }
    }

    /// Updates the value for a key using a function.
    ///
    /// Returns `None` if the key doesn't exist.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to update
    /// * `function` - The function to apply to the value
    ///
    /// # Complexity
    ///
    /// O(log32 N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hamt_persist::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new().insert("count".to_string(), 10);
    /// let updated = map.update("count", |value| value + 1);
    ///
    /// assert_eq!(updated.unwrap().get("count"), Some(&11));
    /// ```
    #[must_use]
    pub fn update<Q, F>(&self, key: &Q, function: F) -> Option<Self>
    where
        K: Borrow<Q> + Clone,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&V) -> V,
    {
        let entry = self.find_entry(key)?;
        let new_value = function(&entry.value);
        Some(self.insert_hashed(entry.hash, entry.key.clone(), new_value))
    }

    /// Updates or removes a value for a key using an updater function.
    ///
    /// The updater function receives `Some(&V)` if the key exists, or `None` if it doesn't.
    /// If the updater returns `Some(V)`, the value is inserted or updated.
    /// If the updater returns `None`, the key is removed (if it exists).
    ///
    /// # Arguments
    ///
    /// * `key` - The key to update
    /// * `updater` - A function that receives the current value (or None) and returns
    ///   the new value (or None to remove)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hamt_persist::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new().insert("count".to_string(), 10);
    ///
    /// // Increment existing value
    /// let updated = map.update_with("count", |maybe_value| {
    ///     maybe_value.map(|value| value + 1)
    /// });
    /// assert_eq!(updated.get("count"), Some(&11));
    ///
    /// // Insert if not exists
    /// let inserted = map.update_with("new_key", |maybe_value| {
    ///     Some(maybe_value.copied().unwrap_or(100))
    /// });
    /// assert_eq!(inserted.get("new_key"), Some(&100));
    ///
    /// // Remove by returning None
    /// let removed = map.update_with("count", |_| None);
    /// assert_eq!(removed.get("count"), None);
    /// ```
    #[must_use]
    pub fn update_with<Q, F>(&self, key: &Q, updater: F) -> Self
    where
        K: Borrow<Q> + Clone,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
        F: FnOnce(Option<&V>) -> Option<V>,
    {
        let entry = self.find_entry(key);
        match (entry, updater(entry.map(|entry| &entry.value))) {
            (Some(entry), Some(value)) => self.insert_hashed(entry.hash, entry.key.clone(), value),
            (Some(_), None) => self.remove(key),
            (None, Some(value)) => self.insert(key.to_owned(), value),
            (None, None) => self.clone(),
        }
    }

    /// Merges two maps, with values from `other` taking precedence on key conflicts.
    ///
    /// # Arguments
    ///
    /// * `other` - The map to merge with
    ///
    /// # Complexity
    ///
    /// O(m log32 (n + m)) where m is the size of `other`
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hamt_persist::persistent::PersistentHashMap;
    ///
    /// let map1 = PersistentHashMap::new()
    ///     .insert("a".to_string(), 1)
    ///     .insert("b".to_string(), 2);
    /// let map2 = PersistentHashMap::new()
    ///     .insert("b".to_string(), 20)
    ///     .insert("c".to_string(), 3);
    ///
    /// let merged = map1.merge(&map2);
    ///
    /// assert_eq!(merged.get("a"), Some(&1));
    /// assert_eq!(merged.get("b"), Some(&20)); // From map2
    /// assert_eq!(merged.get("c"), Some(&3));
    /// ```
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self
    where
        K: Clone,
        V: Clone,
    {
        if other.is_empty() {
            return self.clone();
        }
        let mut transient = self.clone().transient();
        transient.extend(other.iter().map(|(key, value)| (key.clone(), value.clone())));
        transient.persistent()
    }

    /// Converts this persistent map into a transient map for batch updates.
    ///
    /// The conversion is O(1). Nodes still shared with other maps are copied
    /// the first time the transient edits them; after that edits happen in
    /// place.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hamt_persist::persistent::PersistentHashMap;
    ///
    /// let map: PersistentHashMap<i32, i32> = (0..10).map(|index| (index, index)).collect();
    ///
    /// let mut transient = map.clone().transient();
    /// transient.insert(10, 10);
    /// transient.remove(&0);
    /// let updated = transient.persistent();
    ///
    /// assert_eq!(map.len(), 10);
    /// assert_eq!(updated.len(), 10);
    /// assert!(!updated.contains_key(&0));
    /// ```
    #[must_use]
    pub fn transient(self) -> TransientHashMap<K, V, S> {
        TransientHashMap::from_parts(self.root, self.length, self.hasher)
    }
}

// =============================================================================
// Iterator Implementation
// =============================================================================

/// An iterator over key-value pairs of a [`PersistentHashMap`].
///
/// Walks the trie lazily with an explicit stack bounded by the trie depth.
pub struct PersistentHashMapIterator<'a, K, V> {
    branches: ArrayVec<slice::Iter<'a, Slot<K, V>>, MAX_DEPTH>,
    collision: slice::Iter<'a, ReferenceCounter<Entry<K, V>>>,
    remaining: usize,
}

impl<'a, K, V> PersistentHashMapIterator<'a, K, V> {
    fn new(root: Option<&'a Branch<K, V>>, length: usize) -> Self {
        let mut branches = ArrayVec::new();
        if let Some(root) = root {
            branches.push(root.children.iter());
        }
        Self {
            branches,
            collision: slice::Iter::default(),
            remaining: length,
        }
    }
}

impl<'a, K, V> Iterator for PersistentHashMapIterator<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.collision.next() {
                self.remaining -= 1;
                return Some((&entry.key, &entry.value));
            }
            let top = self.branches.last_mut()?;
            match top.next() {
                None => {
                    self.branches.pop();
                }
                Some(Slot::Leaf(entry)) => {
                    self.remaining -= 1;
                    return Some((&entry.key, &entry.value));
                }
                Some(Slot::Collision(collision)) => {
                    self.collision = collision.entries.iter();
                }
                Some(Slot::Branch(child)) => {
                    self.branches.push(child.children.iter());
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for PersistentHashMapIterator<'_, K, V> {
    fn len(&self) -> usize {
        self.remaining
    }
}

impl<K, V> FusedIterator for PersistentHashMapIterator<'_, K, V> {}

impl<K, V> Clone for PersistentHashMapIterator<'_, K, V> {
    fn clone(&self) -> Self {
        Self {
            branches: self.branches.clone(),
            collision: self.collision.clone(),
            remaining: self.remaining,
        }
    }
}

/// An owning iterator over key-value pairs of a [`PersistentHashMap`].
///
/// Entries not shared with another map are moved out; shared ones are cloned.
pub struct PersistentHashMapIntoIterator<K, V> {
    entries: std::vec::IntoIter<ReferenceCounter<Entry<K, V>>>,
}

impl<K: Clone, V: Clone> Iterator for PersistentHashMapIntoIterator<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.entries
            .next()
            .map(|entry| match ReferenceCounter::try_unwrap(entry) {
                Ok(owned) => (owned.key, owned.value),
                Err(shared) => (shared.key.clone(), shared.value.clone()),
            })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl<K: Clone, V: Clone> ExactSizeIterator for PersistentHashMapIntoIterator<K, V> {
    fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<K: Clone, V: Clone> FusedIterator for PersistentHashMapIntoIterator<K, V> {}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<K, V, S: Clone> Clone for PersistentHashMap<K, V, S> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            length: self.length,
            hasher: self.hasher.clone(),
        }
    }
}

impl<K, V, S: Default> Default for PersistentHashMap<K, V, S> {
    #[inline]
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> FromIterator<(K, V)> for PersistentHashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher + Clone + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut transient = TransientHashMap::with_hasher(S::default());
        transient.extend(iter);
        transient.persistent()
    }
}

impl<K: Clone, V: Clone, S> IntoIterator for PersistentHashMap<K, V, S> {
    type Item = (K, V);
    type IntoIter = PersistentHashMapIntoIterator<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        let mut entries = Vec::with_capacity(self.length);
        if let Some(root) = self.root {
            node::drain_branch(root, &mut entries);
        }
        PersistentHashMapIntoIterator {
            entries: entries.into_iter(),
        }
    }
}

impl<'a, K, V, S> IntoIterator for &'a PersistentHashMap<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = PersistentHashMapIterator<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K, V, S> PartialEq for PersistentHashMap<K, V, S>
where
    K: Hash + Eq,
    V: PartialEq,
    S: BuildHasher,
{
    fn eq(&self, other: &Self) -> bool {
        if self.length != other.length {
            return false;
        }
        if self.ptr_eq(other) {
            return true;
        }

        self.iter()
            .all(|(key, value)| other.get(key).is_some_and(|other_value| other_value == value))
    }
}

impl<K: Hash + Eq, V: Eq, S: BuildHasher> Eq for PersistentHashMap<K, V, S> {}

impl<K: fmt::Debug, V: fmt::Debug, S> fmt::Debug for PersistentHashMap<K, V, S> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_map().entries(self.iter()).finish()
    }
}

impl<K: fmt::Display, V: fmt::Display, S> fmt::Display for PersistentHashMap<K, V, S> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{{")?;
        for (index, (key, value)) in self.iter().enumerate() {
            if index > 0 {
                write!(formatter, ", ")?;
            }
            write!(formatter, "{key}: {value}")?;
        }
        write!(formatter, "}}")
    }
}

// =============================================================================
// Rayon Support
// =============================================================================

#[cfg(feature = "rayon")]
impl<K: Sync, V: Sync, S> PersistentHashMap<K, V, S> {
    /// Returns a parallel iterator over key-value pairs.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hamt_persist::persistent::PersistentHashMap;
    /// use rayon::prelude::*;
    ///
    /// let map: PersistentHashMap<i32, i32> = (0..100).map(|index| (index, index)).collect();
    /// let sum: i32 = map.par_iter().map(|(_, value)| *value).sum();
    /// assert_eq!(sum, 4950);
    /// ```
    #[must_use]
    pub fn par_iter(&self) -> rayon::vec::IntoIter<(&K, &V)> {
        use rayon::iter::IntoParallelIterator;
        self.iter().collect::<Vec<_>>().into_par_iter()
    }
}

#[cfg(feature = "rayon")]
impl<K, V, S> rayon::iter::FromParallelIterator<(K, V)> for PersistentHashMap<K, V, S>
where
    K: Hash + Eq + Send,
    V: Send,
    S: BuildHasher + Clone + Default,
{
    fn from_par_iter<I>(par_iter: I) -> Self
    where
        I: rayon::iter::IntoParallelIterator<Item = (K, V)>,
    {
        use rayon::iter::ParallelIterator;
        let entries: Vec<(K, V)> = par_iter.into_par_iter().collect();
        entries.into_iter().collect()
    }
}

// =============================================================================
// Serde Support
// =============================================================================

#[cfg(feature = "serde")]
impl<K: serde::Serialize, V: serde::Serialize, S> serde::Serialize for PersistentHashMap<K, V, S> {
    fn serialize<Ser>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error>
    where
        Ser: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(feature = "serde")]
struct PersistentHashMapVisitor<K, V, S> {
    marker: std::marker::PhantomData<fn() -> PersistentHashMap<K, V, S>>,
}

#[cfg(feature = "serde")]
impl<K, V, S> PersistentHashMapVisitor<K, V, S> {
    const fn new() -> Self {
        Self {
            marker: std::marker::PhantomData,
        }
    }
}

#[cfg(feature = "serde")]
impl<'de, K, V, S> serde::de::Visitor<'de> for PersistentHashMapVisitor<K, V, S>
where
    K: serde::Deserialize<'de> + Hash + Eq,
    V: serde::Deserialize<'de>,
    S: BuildHasher + Clone + Default,
{
    type Value = PersistentHashMap<K, V, S>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::MapAccess<'de>,
    {
        let mut transient = TransientHashMap::with_hasher(S::default());
        while let Some((key, value)) = access.next_entry()? {
            transient.upsert(key, value);
        }
        Ok(transient.persistent())
    }
}

#[cfg(feature = "serde")]
impl<'de, K, V, S> serde::Deserialize<'de> for PersistentHashMap<K, V, S>
where
    K: serde::Deserialize<'de> + Hash + Eq,
    V: serde::Deserialize<'de>,
    S: BuildHasher + Clone + Default,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(PersistentHashMapVisitor::new())
    }
}

#[cfg(feature = "arc")]
static_assertions::assert_impl_all!(PersistentHashMap<String, i32>: Send, Sync);

#[cfg(not(feature = "arc"))]
static_assertions::assert_not_impl_any!(PersistentHashMap<String, i32>: Send, Sync);

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::hash::{BuildHasherDefault, Hasher};

    /// Hasher that passes an integer key through unchanged.
    #[derive(Default)]
    struct IdentityHasher(u64);

    impl Hasher for IdentityHasher {
        fn finish(&self) -> u64 {
            self.0
        }

        fn write(&mut self, bytes: &[u8]) {
            for &byte in bytes {
                self.0 = (self.0 << 8) | u64::from(byte);
            }
        }

        fn write_u32(&mut self, value: u32) {
            self.0 = u64::from(value);
        }
    }

    type IdentityMap<V> = PersistentHashMap<u32, V, BuildHasherDefault<IdentityHasher>>;

    /// Collects every node reachable from the root as raw addresses, tagged
    /// with whether it lies on the path selected by `hash`.
    fn node_addresses<K, V, S>(map: &PersistentHashMap<K, V, S>, hash: u32) -> Vec<(usize, bool)> {
        fn walk<K, V>(branch: &Branch<K, V>, hash: u32, depth: usize, on_path: bool, out: &mut Vec<(usize, bool)>) {
            out.push((std::ptr::from_ref(branch) as usize, on_path));
            let selected = crate::persistent::hashing::slot_index(hash, depth);
            let mut remaining = branch.bitmap;
            for child in &branch.children {
                let slot = remaining.trailing_zeros();
                remaining &= remaining - 1;
                let child_on_path = on_path && slot == selected;
                match child {
                    Slot::Leaf(entry) => {
                        out.push((ReferenceCounter::as_ptr(entry) as usize, child_on_path));
                    }
                    Slot::Collision(collision) => {
                        out.push((ReferenceCounter::as_ptr(collision) as usize, child_on_path));
                    }
                    Slot::Branch(child) => walk(child, hash, depth + 1, child_on_path, out),
                }
            }
        }
        let mut out = Vec::new();
        if let Some(root) = &map.root {
            walk(root, hash, 0, true, &mut out);
        }
        out
    }

    #[rstest]
    fn test_new_creates_empty() {
        let map: PersistentHashMap<String, i32> = PersistentHashMap::new();
        assert!(map.is_empty());
        assert_eq!(map.len(), 0);
        assert!(map.root.is_none());
    }

    #[rstest]
    fn test_singleton() {
        let map = PersistentHashMap::singleton("key".to_string(), 42);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("key"), Some(&42));
    }

    #[rstest]
    fn test_versions_scenario() {
        let empty = PersistentHashMap::new();
        let first = empty.insert("a", 1);
        let second = first.insert("b", 2);
        let third = second.insert("a", 99);

        assert_eq!(first.get("a"), Some(&1));
        assert_eq!(second.get("a"), Some(&1));
        assert_eq!(second.get("b"), Some(&2));
        assert_eq!(third.get("a"), Some(&99));
        assert_eq!(third.get("b"), Some(&2));
        assert_eq!(third.len(), 2);
        assert_eq!(first.get("b"), None);

        let fourth = third.remove("a");
        assert!(!fourth.contains_key("a"));
        assert_eq!(fourth.len(), 1);
        assert_eq!(fourth.get("b"), Some(&2));
        assert_eq!(third.get("a"), Some(&99));
    }

    #[rstest]
    fn test_insert_overwrite_copies_only_the_path() {
        let original: IdentityMap<u32> = (0..2_000).map(|key| (key, key)).collect();
        let key = 1_234;
        let updated = original.insert(key, 0);

        let before = node_addresses(&original, key);
        let after = node_addresses(&updated, key);
        assert_eq!(before.len(), after.len());

        for ((before_address, on_path), (after_address, _)) in before.iter().zip(&after) {
            if *on_path {
                assert_ne!(before_address, after_address, "path node was not copied");
            } else {
                assert_eq!(before_address, after_address, "off-path node was copied");
            }
        }
        assert!(before.iter().filter(|(_, on_path)| *on_path).count() >= 2);
        assert_eq!(original.get(&key), Some(&key));
        assert_eq!(updated.get(&key), Some(&0));
    }

    #[rstest]
    fn test_remove_absent_key_shares_root() {
        let map = PersistentHashMap::new().insert("a", 1).insert("b", 2);
        let removed = map.remove("missing");

        assert!(removed.ptr_eq(&map));
        assert_eq!(removed.len(), 2);
    }

    #[rstest]
    fn test_remove_last_entry_drops_root() {
        let map = PersistentHashMap::singleton("a".to_string(), 1);
        let removed = map.remove("a");

        assert!(removed.is_empty());
        assert!(removed.root.is_none());
        assert!(removed.ptr_eq(&PersistentHashMap::new()));
    }

    #[rstest]
    fn test_top_bit_keys_reach_deepest_level() {
        let map: IdentityMap<&str> = PersistentHashMap::default()
            .insert(0x4000_0000, "high")
            .insert(0x8000_0000, "higher")
            .insert(0xC000_0000, "highest");

        assert_eq!(map.get(&0x4000_0000), Some(&"high"));
        assert_eq!(map.get(&0x8000_0000), Some(&"higher"));
        assert_eq!(map.get(&0xC000_0000), Some(&"highest"));
        assert_eq!(map.get(&0), None);
        assert_eq!(map.check_invariants(), Ok(()));

        let collected: Vec<u32> = map.keys().copied().collect();
        assert_eq!(collected, vec![0x4000_0000, 0x8000_0000, 0xC000_0000]);
    }

    #[rstest]
    fn test_iteration_order_follows_slots() {
        let map: IdentityMap<()> = [33_u32, 2, 1, 64, 0]
            .into_iter()
            .map(|key| (key, ()))
            .collect();

        // slot 0 splits into 0 and 64, slot 1 into 1 and 33
        let keys: Vec<u32> = map.keys().copied().collect();
        assert_eq!(keys, vec![0, 64, 1, 33, 2]);
    }

    #[rstest]
    fn test_iterator_is_exact_size() {
        let map: PersistentHashMap<i32, i32> = (0..100).map(|index| (index, index)).collect();
        let mut iterator = map.iter();

        assert_eq!(iterator.len(), 100);
        iterator.next();
        assert_eq!(iterator.len(), 99);
        assert_eq!(iterator.count(), 99);
    }

    #[rstest]
    fn test_iteration_is_restartable() {
        let map: PersistentHashMap<i32, i32> = (0..50).map(|index| (index, index)).collect();
        let first: Vec<_> = map.iter().collect();
        let second: Vec<_> = map.iter().collect();
        assert_eq!(first, second);
    }

    #[rstest]
    fn test_into_iter_moves_unshared_entries() {
        let map: PersistentHashMap<String, Vec<i32>> = (0..20)
            .map(|index| (index.to_string(), vec![index]))
            .collect();
        let shared = map.clone();

        let mut owned: Vec<(String, Vec<i32>)> = map.into_iter().collect();
        owned.sort();

        assert_eq!(owned.len(), 20);
        assert_eq!(shared.len(), 20);
        assert_eq!(shared.get("7"), Some(&vec![7]));
    }

    #[rstest]
    fn test_eq() {
        let map1 = PersistentHashMap::new()
            .insert("a".to_string(), 1)
            .insert("b".to_string(), 2);
        let map2 = PersistentHashMap::new()
            .insert("b".to_string(), 2)
            .insert("a".to_string(), 1);

        assert_eq!(map1, map2);
        assert_ne!(map1, map2.insert("b".to_string(), 3));
    }

    #[rstest]
    fn test_display() {
        let empty: PersistentHashMap<i32, i32> = PersistentHashMap::new();
        assert_eq!(format!("{empty}"), "{}");
        assert_eq!(format!("{}", PersistentHashMap::singleton(1, 2)), "{1: 2}");
    }

    #[rstest]
    fn test_check_invariants_detects_length_mismatch() {
        let mut map = PersistentHashMap::new().insert(1, 1);
        map.length = 2;

        assert_eq!(
            map.check_invariants(),
            Err(MapError::LengthMismatch {
                recorded: 2,
                counted: 1
            })
        );
    }
}
