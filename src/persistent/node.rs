//! Trie nodes and the path-copy algorithms that edit them.
//!
//! Every node is reference counted. Editing goes through
//! [`ReferenceCounter::make_mut`], which clones a node only when another map
//! still references it. The clone copies exactly one level (the bitmap and the
//! dense child array of shared references), so an edit on a shared trie
//! copies the spine from the root to the touched slot and nothing else, while
//! an edit on a uniquely owned trie (a transient) happens in place.

use std::borrow::Borrow;
use std::mem;

use arrayvec::ArrayVec;
use smallvec::{SmallVec, smallvec};

use super::ReferenceCounter;
use super::error::MapError;
use super::hashing::{MAX_DEPTH, dense_position, slot_bit, slot_index};

// =============================================================================
// Node Definitions
// =============================================================================

/// A key-value pair together with its folded hash.
pub(crate) struct Entry<K, V> {
    pub(crate) hash: u32,
    pub(crate) key: K,
    pub(crate) value: V,
}

impl<K, V> Entry<K, V> {
    pub(crate) const fn new(hash: u32, key: K, value: V) -> Self {
        Self { hash, key, value }
    }

    #[inline]
    fn matches<Q>(&self, hash: u32, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        self.hash == hash && self.key.borrow() == key
    }
}

/// Entries whose full hashes are identical.
pub(crate) struct Collision<K, V> {
    pub(crate) hash: u32,
    pub(crate) entries: SmallVec<[ReferenceCounter<Entry<K, V>>; 2]>,
}

/// Bitmap-indexed internal node.
pub(crate) struct Branch<K, V> {
    pub(crate) bitmap: u32,
    pub(crate) children: Vec<Slot<K, V>>,
}

/// A populated child slot of a [`Branch`].
pub(crate) enum Slot<K, V> {
    Leaf(ReferenceCounter<Entry<K, V>>),
    Collision(ReferenceCounter<Collision<K, V>>),
    Branch(ReferenceCounter<Branch<K, V>>),
}

// Manual impls: cloning a node clones references, never keys or values.

impl<K, V> Clone for Slot<K, V> {
    fn clone(&self) -> Self {
        match self {
            Self::Leaf(entry) => Self::Leaf(ReferenceCounter::clone(entry)),
            Self::Collision(collision) => Self::Collision(ReferenceCounter::clone(collision)),
            Self::Branch(branch) => Self::Branch(ReferenceCounter::clone(branch)),
        }
    }
}

impl<K, V> Clone for Branch<K, V> {
    fn clone(&self) -> Self {
        Self {
            bitmap: self.bitmap,
            children: self.children.clone(),
        }
    }
}

impl<K, V> Clone for Collision<K, V> {
    fn clone(&self) -> Self {
        Self {
            hash: self.hash,
            entries: self.entries.clone(),
        }
    }
}

impl<K, V> Slot<K, V> {
    /// Leaves and collision lists end a path; branches continue it.
    const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Branch(_))
    }
}

// =============================================================================
// Collision lists
// =============================================================================

impl<K, V> Collision<K, V> {
    fn pair(existing: ReferenceCounter<Entry<K, V>>, entry: ReferenceCounter<Entry<K, V>>) -> Self {
        Self {
            hash: entry.hash,
            entries: smallvec![existing, entry],
        }
    }

    fn position_of<Q>(&self, hash: u32, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        if self.hash != hash {
            return None;
        }
        self.entries
            .iter()
            .position(|entry| entry.key.borrow() == key)
    }

    /// Replaces the entry with an equal key, or appends.
    fn upsert(&mut self, entry: ReferenceCounter<Entry<K, V>>) -> Option<ReferenceCounter<Entry<K, V>>>
    where
        K: Eq,
    {
        match self
            .entries
            .iter_mut()
            .find(|existing| existing.key == entry.key)
        {
            Some(existing) => Some(mem::replace(existing, entry)),
            None => {
                self.entries.push(entry);
                None
            }
        }
    }
}

// =============================================================================
// Lookup
// =============================================================================

impl<K, V> Branch<K, V> {
    /// Creates an empty branch, used only as a root.
    pub(crate) const fn empty() -> Self {
        Self {
            bitmap: 0,
            children: Vec::new(),
        }
    }

    /// Number of populated slots.
    pub(crate) fn len(&self) -> usize {
        self.children.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Finds the entry for `key`, descending without backtracking.
    pub(crate) fn find<Q>(&self, hash: u32, key: &Q) -> Option<&Entry<K, V>>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let mut branch = self;
        let mut depth = 0;
        loop {
            let bit = slot_bit(hash, depth);
            if branch.bitmap & bit == 0 {
                return None;
            }
            match &branch.children[dense_position(branch.bitmap, bit)] {
                Slot::Leaf(entry) => return entry.matches(hash, key).then_some(&**entry),
                Slot::Collision(collision) => {
                    return collision
                        .position_of(hash, key)
                        .map(|index| &*collision.entries[index]);
                }
                Slot::Branch(child) => {
                    branch = &**child;
                    depth += 1;
                }
            }
        }
    }
}

// =============================================================================
// Insert
// =============================================================================

/// Inserts `entry` below `branch`, copying every shared node on the path.
///
/// Returns the entry that was replaced, if the key was already present.
pub(crate) fn insert<K: Eq, V>(
    branch: &mut ReferenceCounter<Branch<K, V>>,
    entry: ReferenceCounter<Entry<K, V>>,
    depth: usize,
) -> Option<ReferenceCounter<Entry<K, V>>> {
    ReferenceCounter::make_mut(branch).insert(entry, depth)
}

impl<K: Eq, V> Branch<K, V> {
    fn insert(
        &mut self,
        entry: ReferenceCounter<Entry<K, V>>,
        depth: usize,
    ) -> Option<ReferenceCounter<Entry<K, V>>> {
        let bit = slot_bit(entry.hash, depth);
        let position = dense_position(self.bitmap, bit);

        if self.bitmap & bit == 0 {
            self.bitmap |= bit;
            self.children.insert(position, Slot::Leaf(entry));
            return None;
        }

        let slot = &mut self.children[position];
        match slot {
            Slot::Branch(child) => insert(child, entry, depth + 1),
            Slot::Leaf(existing) if existing.hash == entry.hash && existing.key == entry.key => {
                Some(mem::replace(existing, entry))
            }
            Slot::Leaf(existing) if existing.hash == entry.hash => {
                tracing::trace!(
                    hash = entry.hash,
                    depth,
                    "hash collision, storing entries in a collision list"
                );
                let existing = ReferenceCounter::clone(existing);
                *slot = Slot::Collision(ReferenceCounter::new(Collision::pair(existing, entry)));
                None
            }
            Slot::Leaf(existing) => {
                let sibling_hash = existing.hash;
                let sibling = Slot::Leaf(ReferenceCounter::clone(existing));
                *slot = Slot::Branch(ReferenceCounter::new(Self::split(
                    sibling,
                    sibling_hash,
                    entry,
                    depth + 1,
                )));
                None
            }
            Slot::Collision(collision) if collision.hash == entry.hash => {
                ReferenceCounter::make_mut(collision).upsert(entry)
            }
            Slot::Collision(collision) => {
                let sibling_hash = collision.hash;
                let sibling = Slot::Collision(ReferenceCounter::clone(collision));
                *slot = Slot::Branch(ReferenceCounter::new(Self::split(
                    sibling,
                    sibling_hash,
                    entry,
                    depth + 1,
                )));
                None
            }
        }
    }

    /// Builds the branch chain separating a terminal slot from a new entry
    /// whose hash differs from the terminal's.
    fn split(
        sibling: Slot<K, V>,
        sibling_hash: u32,
        entry: ReferenceCounter<Entry<K, V>>,
        depth: usize,
    ) -> Self {
        debug_assert!(
            depth < MAX_DEPTH,
            "distinct hashes must diverge before the hash is exhausted"
        );
        let sibling_bit = slot_bit(sibling_hash, depth);
        let entry_bit = slot_bit(entry.hash, depth);

        if sibling_bit == entry_bit {
            let child = Self::split(sibling, sibling_hash, entry, depth + 1);
            Self {
                bitmap: sibling_bit,
                children: vec![Slot::Branch(ReferenceCounter::new(child))],
            }
        } else if sibling_bit < entry_bit {
            Self {
                bitmap: sibling_bit | entry_bit,
                children: vec![sibling, Slot::Leaf(entry)],
            }
        } else {
            Self {
                bitmap: sibling_bit | entry_bit,
                children: vec![Slot::Leaf(entry), sibling],
            }
        }
    }
}

// =============================================================================
// Remove
// =============================================================================

/// Removes `key` from below `branch`, copying every shared node on the path.
///
/// Callers look the key up first: a miss below the first level would still
/// have copied the levels above it.
pub(crate) fn remove<K, V, Q>(
    branch: &mut ReferenceCounter<Branch<K, V>>,
    hash: u32,
    key: &Q,
    depth: usize,
) -> Option<ReferenceCounter<Entry<K, V>>>
where
    K: Borrow<Q>,
    Q: Eq + ?Sized,
{
    ReferenceCounter::make_mut(branch).remove(hash, key, depth)
}

impl<K, V> Branch<K, V> {
    fn remove<Q>(&mut self, hash: u32, key: &Q, depth: usize) -> Option<ReferenceCounter<Entry<K, V>>>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let bit = slot_bit(hash, depth);
        if self.bitmap & bit == 0 {
            return None;
        }
        let position = dense_position(self.bitmap, bit);
        let slot = &mut self.children[position];

        match slot {
            Slot::Leaf(existing) => {
                if !existing.matches(hash, key) {
                    return None;
                }
                let removed = ReferenceCounter::clone(existing);
                self.bitmap &= !bit;
                self.children.remove(position);
                Some(removed)
            }
            Slot::Collision(collision) => {
                let index = collision.position_of(hash, key)?;
                let list = ReferenceCounter::make_mut(collision);
                let removed = list.entries.remove(index);
                if list.entries.len() == 1
                    && let Some(last) = list.entries.pop()
                {
                    *slot = Slot::Leaf(last);
                }
                Some(removed)
            }
            Slot::Branch(child) => {
                let removed = remove(child, hash, key, depth + 1)?;
                if child.is_empty() {
                    self.bitmap &= !bit;
                    self.children.remove(position);
                } else if child.children.len() == 1 && child.children[0].is_terminal() {
                    let only = child.children[0].clone();
                    *slot = only;
                }
                Some(removed)
            }
        }
    }
}

// =============================================================================
// Draining
// =============================================================================

/// Moves every entry reachable from `slot` into `out`, in iteration order.
///
/// Nodes owned only by this trie are taken apart; shared nodes are walked by
/// reference so their entries are cloned handles.
pub(crate) fn drain_slot<K, V>(slot: Slot<K, V>, out: &mut Vec<ReferenceCounter<Entry<K, V>>>) {
    match slot {
        Slot::Leaf(entry) => out.push(entry),
        Slot::Collision(collision) => match ReferenceCounter::try_unwrap(collision) {
            Ok(owned) => out.extend(owned.entries),
            Err(shared) => out.extend(shared.entries.iter().cloned()),
        },
        Slot::Branch(branch) => drain_branch(branch, out),
    }
}

pub(crate) fn drain_branch<K, V>(
    branch: ReferenceCounter<Branch<K, V>>,
    out: &mut Vec<ReferenceCounter<Entry<K, V>>>,
) {
    match ReferenceCounter::try_unwrap(branch) {
        Ok(owned) => {
            for child in owned.children {
                drain_slot(child, out);
            }
        }
        Err(shared) => {
            for child in &shared.children {
                drain_slot(child.clone(), out);
            }
        }
    }
}

// =============================================================================
// Validation
// =============================================================================

impl<K, V> Branch<K, V> {
    /// Checks the structural invariants of the subtree and returns the number
    /// of entries it holds.
    pub(crate) fn validate(&self, is_root: bool) -> Result<usize, MapError> {
        let mut path = ArrayVec::<u32, MAX_DEPTH>::new();
        self.validate_at(0, is_root, &mut path)
    }

    fn validate_at(
        &self,
        depth: usize,
        is_root: bool,
        path: &mut ArrayVec<u32, MAX_DEPTH>,
    ) -> Result<usize, MapError> {
        if depth >= MAX_DEPTH {
            return Err(MapError::DepthExceeded { depth });
        }
        let bits = self.bitmap.count_ones();
        if bits as usize != self.len() {
            return Err(MapError::BitmapMismatch {
                depth,
                bits,
                children: self.len(),
            });
        }
        if !is_root {
            match self.children.as_slice() {
                [] => return Err(MapError::EmptyBranch { depth }),
                [only] if only.is_terminal() => {
                    return Err(MapError::UncompactedBranch { depth });
                }
                _ => {}
            }
        }

        let mut remaining = self.bitmap;
        let mut count = 0;
        for child in &self.children {
            let slot = remaining.trailing_zeros();
            remaining &= remaining - 1;
            path.push(slot);
            count += match child {
                Slot::Leaf(entry) => {
                    check_placement(entry.hash, path)?;
                    1
                }
                Slot::Collision(collision) => {
                    if collision.entries.len() < 2 {
                        return Err(MapError::CollisionTooSmall {
                            depth,
                            entries: collision.entries.len(),
                        });
                    }
                    if collision
                        .entries
                        .iter()
                        .any(|entry| entry.hash != collision.hash)
                    {
                        return Err(MapError::CollisionHashMismatch { depth });
                    }
                    check_placement(collision.hash, path)?;
                    collision.entries.len()
                }
                Slot::Branch(branch) => branch.validate_at(depth + 1, false, path)?,
            };
            path.pop();
        }
        Ok(count)
    }
}

/// Checks that `hash` selects every slot on `path`.
fn check_placement(hash: u32, path: &[u32]) -> Result<(), MapError> {
    match path
        .iter()
        .enumerate()
        .find(|&(depth, &slot)| slot_index(hash, depth) != slot)
    {
        Some((depth, _)) => Err(MapError::MisplacedEntry { depth }),
        None => Ok(()),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn entry(hash: u32, key: &'static str, value: i32) -> ReferenceCounter<Entry<&'static str, i32>> {
        ReferenceCounter::new(Entry::new(hash, key, value))
    }

    fn root_with(entries: &[(u32, &'static str, i32)]) -> ReferenceCounter<Branch<&'static str, i32>> {
        let mut root = ReferenceCounter::new(Branch::empty());
        for &(hash, key, value) in entries {
            insert(&mut root, entry(hash, key, value), 0);
        }
        root
    }

    fn first_leaf(root: &Branch<&'static str, i32>) -> ReferenceCounter<Entry<&'static str, i32>> {
        match &root.children[0] {
            Slot::Leaf(entry) => ReferenceCounter::clone(entry),
            _ => panic!("expected a leaf"),
        }
    }

    fn first_branch(root: &Branch<&'static str, i32>) -> ReferenceCounter<Branch<&'static str, i32>> {
        match &root.children[1] {
            Slot::Branch(branch) => ReferenceCounter::clone(branch),
            _ => panic!("expected a branch"),
        }
    }

    #[rstest]
    fn test_insert_distinct_slots_stay_in_root() {
        let root = root_with(&[(1, "a", 1), (2, "b", 2), (31, "c", 3)]);
        assert_eq!(root.bitmap, (1 << 1) | (1 << 2) | (1 << 31));
        assert_eq!(root.len(), 3);
        assert_eq!(root.validate(true), Ok(3));
    }

    #[rstest]
    fn test_shared_prefix_builds_branch_chain() {
        // identical in the first three levels, split at depth 3
        let low = 0b00001_00001_00001;
        let first = low | (1 << 15);
        let second = low | (2 << 15);
        let root = root_with(&[(first, "a", 1), (second, "b", 2)]);

        let mut branch = &root;
        for _ in 0..3 {
            assert_eq!(branch.len(), 1);
            branch = match &branch.children[0] {
                Slot::Branch(child) => child,
                _ => panic!("expected a branch"),
            };
        }
        assert_eq!(branch.len(), 2);
        assert_eq!(root.validate(true), Ok(2));
    }

    #[rstest]
    fn test_hashes_differing_only_in_top_bits_split_at_last_level() {
        let first = 0x4000_0000;
        let second = 0x8000_0000;
        let root = root_with(&[(first, "a", 1), (second, "b", 2)]);

        assert_eq!(root.find(first, "a").map(|entry| entry.value), Some(1));
        assert_eq!(root.find(second, "b").map(|entry| entry.value), Some(2));
        assert_eq!(root.validate(true), Ok(2));
    }

    #[rstest]
    fn test_identical_hashes_form_collision_list() {
        let root = root_with(&[(7, "a", 1), (7, "b", 2), (7, "c", 3)]);

        assert_eq!(root.len(), 1);
        match &root.children[0] {
            Slot::Collision(collision) => {
                assert_eq!(collision.hash, 7);
                assert_eq!(collision.entries.len(), 3);
            }
            _ => panic!("expected a collision list"),
        }
        assert_eq!(root.find(7, "b").map(|entry| entry.value), Some(2));
        assert!(root.find(7, "d").is_none());
        assert_eq!(root.validate(true), Ok(3));
    }

    #[rstest]
    fn test_collision_list_splits_when_new_hash_shares_slot() {
        let root = root_with(&[(7, "a", 1), (7, "b", 2), (7 | (1 << 5), "c", 3)]);

        assert_eq!(root.find(7, "a").map(|entry| entry.value), Some(1));
        assert_eq!(root.find(7 | (1 << 5), "c").map(|entry| entry.value), Some(3));
        assert_eq!(root.validate(true), Ok(3));
    }

    #[rstest]
    fn test_remove_compacts_single_leaf_branch() {
        let low = 0b00001_00001_00001;
        let mut root = root_with(&[(low | (1 << 15), "a", 1), (low | (2 << 15), "b", 2)]);

        let removed = remove(&mut root, low | (2 << 15), "b", 0);

        assert_eq!(removed.map(|entry| entry.value), Some(2));
        assert_eq!(root.len(), 1);
        assert!(matches!(root.children[0], Slot::Leaf(_)));
        assert_eq!(root.validate(true), Ok(1));
    }

    #[rstest]
    fn test_remove_from_collision_list_down_to_leaf() {
        let mut root = root_with(&[(7, "a", 1), (7, "b", 2)]);

        let removed = remove(&mut root, 7, "a", 0);

        assert_eq!(removed.map(|entry| entry.value), Some(1));
        assert!(matches!(root.children[0], Slot::Leaf(_)));
        assert_eq!(root.validate(true), Ok(1));
    }

    #[rstest]
    fn test_remove_missing_key_returns_none() {
        let mut root = root_with(&[(7, "a", 1), (7, "b", 2), (9, "c", 3)]);

        assert!(remove(&mut root, 7, "z", 0).is_none());
        assert!(remove(&mut root, 9, "z", 0).is_none());
        assert!(remove(&mut root, 10, "c", 0).is_none());
        assert_eq!(root.validate(true), Ok(3));
    }

    #[rstest]
    fn test_insert_copies_only_the_path() {
        let low = 0b00001_00001_00001;
        let original = root_with(&[
            (low | (1 << 15), "a", 1),
            (low | (2 << 15), "b", 2),
            (0, "c", 3),
        ]);
        let mut edited = ReferenceCounter::clone(&original);
        insert(&mut edited, entry(low | (1 << 15), "a", 100), 0);

        assert!(!ReferenceCounter::ptr_eq(&original, &edited));
        // slot 0 is off the edited path
        assert!(ReferenceCounter::ptr_eq(
            &first_leaf(&original),
            &first_leaf(&edited)
        ));
        assert!(!ReferenceCounter::ptr_eq(
            &first_branch(&original),
            &first_branch(&edited)
        ));
        assert_eq!(original.find(low | (1 << 15), "a").map(|entry| entry.value), Some(1));
        assert_eq!(edited.find(low | (1 << 15), "a").map(|entry| entry.value), Some(100));
    }

    #[rstest]
    fn test_validate_reports_bitmap_mismatch() {
        let mut root = root_with(&[(1, "a", 1), (2, "b", 2)]);
        ReferenceCounter::make_mut(&mut root).bitmap = 1 << 1;

        assert_eq!(
            root.validate(true),
            Err(MapError::BitmapMismatch {
                depth: 0,
                bits: 1,
                children: 2
            })
        );
    }

    #[rstest]
    fn test_validate_reports_misplaced_entry() {
        let mut root = root_with(&[(1, "a", 1)]);
        ReferenceCounter::make_mut(&mut root).bitmap = 1 << 3;

        assert_eq!(root.validate(true), Err(MapError::MisplacedEntry { depth: 0 }));
    }

    #[rstest]
    fn test_validate_reports_uncompacted_branch() {
        let leaf = Slot::Leaf(entry(1, "a", 1));
        let inner = Branch {
            bitmap: 1 << 0,
            children: vec![leaf],
        };
        let root: Branch<&str, i32> = Branch {
            bitmap: 1 << 1,
            children: vec![Slot::Branch(ReferenceCounter::new(inner))],
        };

        assert_eq!(root.validate(true), Err(MapError::UncompactedBranch { depth: 1 }));
    }

    #[rstest]
    fn test_drain_preserves_iteration_order() {
        let root = root_with(&[(3, "c", 3), (1, "a", 1), (7, "x", 7), (7, "y", 8)]);
        let mut out = Vec::new();
        drain_branch(root, &mut out);

        let keys: Vec<&str> = out.iter().map(|entry| entry.key).collect();
        assert_eq!(keys, vec!["a", "c", "x", "y"]);
    }
}
