//! # hamt-persist
//!
//! A persistent (immutable) hash map built on a hash array mapped trie.
//!
//! ## Overview
//!
//! Every update returns a new map and leaves the receiver untouched. Only
//! the nodes on the path from the root to the edited slot are copied, so old
//! and new versions share everything else. The crate includes:
//!
//! - **`PersistentHashMap`**: HAMT with 32-way branching, collision lists
//!   and path compaction on remove
//! - **`TransientHashMap`**: batch builder that edits uniquely owned nodes in
//!   place
//! - **`PersistentHashSet`**: set wrapper with the usual set algebra
//! - **`SharedHashMap`**: single-writer publication cell for sharing
//!   versions across threads
//!
//! ## Feature Flags
//!
//! - `arc` (default): share nodes with `Arc` so maps are `Send + Sync`
//! - `shared` (default): `SharedHashMap`
//! - `serde`: `Serialize`/`Deserialize` implementations
//! - `rayon`: parallel iteration and collection
//! - `fxhash`: use `rustc-hash` as the default hasher
//! - `ahash`: use fixed-seed `ahash` as the default hasher
//! - `full`: `arc`, `shared`, `serde` and `rayon`
//!
//! ## Example
//!
//! ```rust
//! use hamt_persist::prelude::*;
//!
//! let base = PersistentHashMap::new().insert("a", 1);
//! let next = base.insert("b", 2);
//!
//! assert_eq!(base.len(), 1);
//! assert_eq!(next.len(), 2);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// Note: Disabling redundant_closure_for_method_calls due to clippy 0.1.92 panic bug
#![allow(clippy::redundant_closure_for_method_calls)]

/// Prelude module for convenient imports.
///
/// # Usage
///
/// ```rust
/// use hamt_persist::prelude::*;
/// ```
pub mod prelude {
    pub use crate::persistent::*;
}

pub mod persistent;
