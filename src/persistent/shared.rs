//! Single-writer publication cell for [`PersistentHashMap`] versions.
//!
//! Readers call [`SharedHashMap::snapshot`] to get the current version. The
//! snapshot is an O(1) clone of the root, so a reader holds the lock only for
//! the clone and then works on an immutable map that no writer can change.
//!
//! Writers are serialized by a mutex. A writer computes the next version from
//! the current one outside the read/write lock and then swaps it in, so
//! readers never wait for a writer's computation.

use std::borrow::Borrow;
use std::fmt;
use std::hash::{BuildHasher, Hash};

use parking_lot::{Mutex, RwLock};

use super::hashing::DefaultHashBuilder;
use super::hashmap::PersistentHashMap;

/// A published map together with its version number.
struct Published<K, V, S> {
    version: u64,
    map: PersistentHashMap<K, V, S>,
}

/// A thread-safe cell holding the latest version of a [`PersistentHashMap`].
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use std::thread;
/// use hamt_persist::persistent::SharedHashMap;
///
/// let shared = Arc::new(SharedHashMap::new());
/// shared.insert("a", 1);
///
/// let before = shared.snapshot();
/// let writer = {
///     let shared = Arc::clone(&shared);
///     thread::spawn(move || shared.insert("b", 2))
/// };
/// let version = writer.join().unwrap();
///
/// assert_eq!(version, 2);
/// assert_eq!(before.get("b"), None);
/// assert_eq!(shared.snapshot().get("b"), Some(&2));
/// ```
pub struct SharedHashMap<K, V, S = DefaultHashBuilder> {
    current: RwLock<Published<K, V, S>>,
    writer: Mutex<()>,
}

impl<K, V> SharedHashMap<K, V> {
    /// Creates a cell holding an empty map at version 0.
    #[must_use]
    pub fn new() -> Self {
        Self::from_map(PersistentHashMap::new())
    }
}

impl<K, V> Default for SharedHashMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> From<PersistentHashMap<K, V, S>> for SharedHashMap<K, V, S> {
    fn from(map: PersistentHashMap<K, V, S>) -> Self {
        Self::from_map(map)
    }
}

impl<K, V, S> SharedHashMap<K, V, S> {
    /// Creates a cell publishing `map` as version 0.
    #[must_use]
    pub fn from_map(map: PersistentHashMap<K, V, S>) -> Self {
        Self {
            current: RwLock::new(Published { version: 0, map }),
            writer: Mutex::new(()),
        }
    }

    /// Returns the number of the latest published version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.current.read().version
    }
}

impl<K, V, S: Clone> SharedHashMap<K, V, S> {
    /// Returns the latest published map.
    #[must_use]
    pub fn snapshot(&self) -> PersistentHashMap<K, V, S> {
        self.current.read().map.clone()
    }

    /// Returns the latest published map and its version, read atomically.
    #[must_use]
    pub fn versioned_snapshot(&self) -> (u64, PersistentHashMap<K, V, S>) {
        let published = self.current.read();
        (published.version, published.map.clone())
    }

    /// Derives the next version from the current one and publishes it.
    ///
    /// `function` runs with the writer lock held but without blocking
    /// readers. Returns the version that is current afterwards. If
    /// `function` returns a map sharing the current root, nothing is
    /// published and the version does not change.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hamt_persist::persistent::SharedHashMap;
    ///
    /// let shared = SharedHashMap::new();
    /// let version = shared.update(|map| map.insert("a", 1).insert("b", 2));
    ///
    /// assert_eq!(version, 1);
    /// assert_eq!(shared.snapshot().len(), 2);
    /// ```
    pub fn update<F>(&self, function: F) -> u64
    where
        F: FnOnce(&PersistentHashMap<K, V, S>) -> PersistentHashMap<K, V, S>,
    {
        let _writer = self.writer.lock();
        let (version, base) = self.versioned_snapshot();
        let next = function(&base);
        if next.ptr_eq(&base) {
            return version;
        }

        let length = next.len();
        let mut published = self.current.write();
        published.version = version + 1;
        published.map = next;
        tracing::debug!(version = published.version, length, "published map version");
        published.version
    }
}

impl<K: Hash + Eq, V, S: BuildHasher + Clone> SharedHashMap<K, V, S> {
    /// Publishes a version with `key` set to `value`.
    pub fn insert(&self, key: K, value: V) -> u64 {
        self.update(|map| map.insert(key, value))
    }

    /// Publishes a version without `key`.
    ///
    /// Removing an absent key publishes nothing.
    pub fn remove<Q>(&self, key: &Q) -> u64
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.update(|map| map.remove(key))
    }
}

impl<K: fmt::Debug, V: fmt::Debug, S> fmt::Debug for SharedHashMap<K, V, S> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let published = self.current.read();
        formatter
            .debug_struct("SharedHashMap")
            .field("version", &published.version)
            .field("map", &published.map)
            .finish()
    }
}

static_assertions::assert_impl_all!(SharedHashMap<String, i32>: Send, Sync);
