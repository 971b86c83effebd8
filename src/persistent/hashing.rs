//! Hash configuration and bit partitioning for the trie.
//!
//! Keys are hashed with a [`BuildHasher`] to a `u64`, folded to 32 bits and
//! then consumed five bits per trie level, least-significant group first.
//!
//! The default hasher is selected at compile time:
//!
//! | Feature   | `DefaultHashBuilder`                      |
//! |-----------|-------------------------------------------|
//! | (none)    | `BuildHasherDefault<DefaultHasher>`       |
//! | `fxhash`  | `rustc_hash::FxBuildHasher`               |
//! | `ahash`   | [`FixedAHashBuilder`] (fixed seeds)       |
//!
//! All three are deterministic: the same key hashes to the same value in
//! every map instance, which keeps equality and merging cheap to reason about.

use std::hash::{BuildHasher, Hash};

// =============================================================================
// Constants
// =============================================================================

/// Bits of the hash consumed at each trie level.
pub(crate) const BITS_PER_LEVEL: u32 = 5;

/// Number of child slots in a branch (2^5 = 32).
pub(crate) const BRANCHING_FACTOR: usize = 1 << BITS_PER_LEVEL;

/// Mask selecting one level's worth of hash bits.
const SLOT_MASK: u32 = (BRANCHING_FACTOR - 1) as u32;

/// Width of the folded hash.
pub(crate) const HASH_BITS: u32 = 32;

/// Number of trie levels before the hash is exhausted (ceil(32 / 5) = 7).
///
/// Branches only exist at depths `0..MAX_DEPTH`.
pub(crate) const MAX_DEPTH: usize = HASH_BITS.div_ceil(BITS_PER_LEVEL) as usize;

// =============================================================================
// Default hasher selection
// =============================================================================

/// The hasher used when a map is created with `new()`.
#[cfg(feature = "fxhash")]
pub type DefaultHashBuilder = rustc_hash::FxBuildHasher;

/// The hasher used when a map is created with `new()`.
#[cfg(all(feature = "ahash", not(feature = "fxhash")))]
pub type DefaultHashBuilder = FixedAHashBuilder;

/// The hasher used when a map is created with `new()`.
#[cfg(not(any(feature = "fxhash", feature = "ahash")))]
pub type DefaultHashBuilder =
    std::hash::BuildHasherDefault<std::collections::hash_map::DefaultHasher>;

/// An `ahash` builder with fixed seeds.
///
/// `ahash::RandomState::new()` picks per-instance random seeds, which would
/// give two maps with the same entries different trie shapes. This builder
/// always uses the same seeds.
#[cfg(feature = "ahash")]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FixedAHashBuilder;

#[cfg(feature = "ahash")]
impl FixedAHashBuilder {
    const SEEDS: [u64; 4] = [
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    ];
}

#[cfg(feature = "ahash")]
impl BuildHasher for FixedAHashBuilder {
    type Hasher = ahash::AHasher;

    fn build_hasher(&self) -> Self::Hasher {
        let [k0, k1, k2, k3] = Self::SEEDS;
        ahash::RandomState::with_seeds(k0, k1, k2, k3).build_hasher()
    }
}

// =============================================================================
// Hash computation
// =============================================================================

/// Hashes a key and folds the result to the trie's 32-bit hash.
#[inline]
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn hash_key<Q, S>(builder: &S, key: &Q) -> u32
where
    Q: Hash + ?Sized,
    S: BuildHasher,
{
    let full = builder.hash_one(key);
    (full ^ (full >> 32)) as u32
}

/// Extracts the slot index selected by `hash` at `depth`.
#[inline]
pub(crate) const fn slot_index(hash: u32, depth: usize) -> u32 {
    // depth < MAX_DEPTH keeps the shift below 32
    (hash >> (depth as u32 * BITS_PER_LEVEL)) & SLOT_MASK
}

/// Bitmap bit for the slot selected by `hash` at `depth`.
#[inline]
pub(crate) const fn slot_bit(hash: u32, depth: usize) -> u32 {
    1u32 << slot_index(hash, depth)
}

/// Position of `bit` in a dense child array described by `bitmap`.
#[inline]
pub(crate) const fn dense_position(bitmap: u32, bit: u32) -> usize {
    (bitmap & (bit - 1)).count_ones() as usize
}

// =============================================================================
// Tests
// =============================================================================
