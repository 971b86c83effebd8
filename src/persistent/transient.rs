//! Transient (mutable) builder for [`PersistentHashMap`].
//!
//! A [`TransientHashMap`] edits the trie in place wherever it is the sole
//! owner of a node, and falls back to path copying where a node is still
//! shared with a persistent map. Converting in either direction is O(1).
//!
//! # Transient-Persistent Pattern
//!
//! ```rust
//! use hamt_persist::persistent::{PersistentHashMap, TransientHashMap};
//!
//! let mut transient = TransientHashMap::new();
//! for index in 0..100 {
//!     transient.insert(index, index * 2);
//! }
//! let map: PersistentHashMap<i32, i32> = transient.persistent();
//!
//! assert_eq!(map.len(), 100);
//! assert_eq!(map.get(&21), Some(&42));
//! ```

use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;
use std::rc::Rc;

use super::ReferenceCounter;
use super::hashing::{DefaultHashBuilder, hash_key};
use super::hashmap::PersistentHashMap;
use super::node::{self, Branch, Entry};

// =============================================================================
// TransientHashMap Definition
// =============================================================================

/// A mutable hash map that shares its trie representation with
/// [`PersistentHashMap`].
///
/// `TransientHashMap` is neither `Send` nor `Sync`: it is a single-owner
/// builder, meant to be filled on one thread and then frozen with
/// [`persistent`](Self::persistent).
pub struct TransientHashMap<K, V, S = DefaultHashBuilder> {
    root: Option<ReferenceCounter<Branch<K, V>>>,
    length: usize,
    hasher: S,
    _marker: PhantomData<Rc<()>>,
}

static_assertions::assert_not_impl_any!(TransientHashMap<i32, i32>: Send, Sync);
static_assertions::assert_not_impl_any!(TransientHashMap<String, String>: Send, Sync);

impl<K, V> TransientHashMap<K, V> {
    /// Creates a new empty transient map.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hamt_persist::persistent::TransientHashMap;
    ///
    /// let transient: TransientHashMap<i32, i32> = TransientHashMap::new();
    /// assert!(transient.is_empty());
    /// ```
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }
}

impl<K, V> Default for TransientHashMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> TransientHashMap<K, V, S> {
    /// Creates a new empty transient map using `hasher`.
    #[inline]
    #[must_use]
    pub const fn with_hasher(hasher: S) -> Self {
        Self::from_parts(None, 0, hasher)
    }

    pub(super) const fn from_parts(
        root: Option<ReferenceCounter<Branch<K, V>>>,
        length: usize,
        hasher: S,
    ) -> Self {
        Self {
            root,
            length,
            hasher,
            _marker: PhantomData,
        }
    }

    /// Returns the number of entries.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.length
    }

    /// Returns `true` if the transient map holds no entries.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Freezes this transient map into a [`PersistentHashMap`].
    ///
    /// # Complexity
    ///
    /// O(1)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hamt_persist::persistent::TransientHashMap;
    ///
    /// let mut transient = TransientHashMap::new();
    /// transient.insert("a", 1);
    /// let map = transient.persistent();
    ///
    /// assert_eq!(map.get("a"), Some(&1));
    /// ```
    #[must_use]
    pub fn persistent(self) -> PersistentHashMap<K, V, S> {
        tracing::trace!(length = self.length, "transient map frozen");
        PersistentHashMap {
            root: self.root,
            length: self.length,
            hasher: self.hasher,
        }
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> TransientHashMap<K, V, S> {
    /// Returns a reference to the value corresponding to the key.
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let root = self.root.as_deref()?;
        root.find(hash_key(&self.hasher, key), key)
            .map(|entry| &entry.value)
    }

    /// Returns `true` if the transient map contains the key.
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Inserts or replaces an entry, reporting whether the key was new.
    pub(crate) fn upsert(&mut self, key: K, value: V) -> bool {
        self.upsert_entry(key, value).is_none()
    }

    fn upsert_entry(&mut self, key: K, value: V) -> Option<ReferenceCounter<Entry<K, V>>> {
        let hash = hash_key(&self.hasher, &key);
        let root = self
            .root
            .get_or_insert_with(|| ReferenceCounter::new(Branch::empty()));
        let replaced = node::insert(root, ReferenceCounter::new(Entry::new(hash, key, value)), 0);
        if replaced.is_none() {
            self.length += 1;
        }
        replaced
    }

    fn remove_entry<Q>(&mut self, key: &Q) -> Option<ReferenceCounter<Entry<K, V>>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = hash_key(&self.hasher, key);
        let root = self.root.as_mut()?;
        root.find(hash, key)?;

        let removed = node::remove(root, hash, key, 0);
        if removed.is_some() {
            self.length -= 1;
        }
        if root.is_empty() {
            self.root = None;
        }
        removed
    }
}

impl<K: Hash + Eq, V: Clone, S: BuildHasher> TransientHashMap<K, V, S> {
    /// Inserts a key-value pair, returning the previous value.
    ///
    /// The previous value is moved out when no persistent map still shares
    /// it, and cloned otherwise.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hamt_persist::persistent::TransientHashMap;
    ///
    /// let mut transient = TransientHashMap::new();
    /// assert_eq!(transient.insert("a", 1), None);
    /// assert_eq!(transient.insert("a", 2), Some(1));
    /// assert_eq!(transient.len(), 1);
    /// ```
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.upsert_entry(key, value).map(take_value)
    }

    /// Removes a key, returning its value if it was present.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hamt_persist::persistent::TransientHashMap;
    ///
    /// let mut transient = TransientHashMap::new();
    /// transient.insert("a", 1);
    ///
    /// assert_eq!(transient.remove("a"), Some(1));
    /// assert_eq!(transient.remove("a"), None);
    /// assert!(transient.is_empty());
    /// ```
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.remove_entry(key).map(take_value)
    }
}

impl<K: Hash + Eq + Clone, V, S: BuildHasher> TransientHashMap<K, V, S> {
    /// Replaces the value for an existing key with `function(&value)`.
    ///
    /// Returns `false` and leaves the map untouched if the key is absent.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hamt_persist::persistent::TransientHashMap;
    ///
    /// let mut transient = TransientHashMap::new();
    /// transient.insert("count".to_string(), 1);
    ///
    /// assert!(transient.update_with("count", |value| value + 1));
    /// assert!(!transient.update_with("missing", |value| value + 1));
    /// assert_eq!(transient.get("count"), Some(&2));
    /// ```
    pub fn update_with<Q, F>(&mut self, key: &Q, function: F) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&V) -> V,
    {
        let Some(root) = self.root.as_deref() else {
            return false;
        };
        let Some(entry) = root.find(hash_key(&self.hasher, key), key) else {
            return false;
        };
        let (owned_key, value) = (entry.key.clone(), function(&entry.value));
        self.upsert(owned_key, value);
        true
    }
}

fn take_value<K, V: Clone>(entry: ReferenceCounter<Entry<K, V>>) -> V {
    match ReferenceCounter::try_unwrap(entry) {
        Ok(owned) => owned.value,
        Err(shared) => shared.value.clone(),
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> Extend<(K, V)> for TransientHashMap<K, V, S> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.upsert(key, value);
        }
    }
}

impl<K: std::fmt::Debug, V: std::fmt::Debug, S> std::fmt::Debug for TransientHashMap<K, V, S> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TransientHashMap")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
