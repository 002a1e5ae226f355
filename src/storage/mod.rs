//! Transactional page cache and the page-backed structures built on it.
//!
//! Every structure here is a thin handle holding the page number of its
//! descriptor. Links between pages are plain page numbers resolved through
//! [`cache::PageCache`], so no structure ever aliases a cached page.

/// Typed page objects and the codec contract.
pub mod object;

/// Write cache, read cache and commit/discard.
pub mod cache;

/// Fixed-width element encodings shared by the structures.
pub mod codec;

/// Byte strings spanning chained pages.
pub mod blob;

/// B+ tree over fixed-width keys.
pub mod btree;

/// Rank-ordered skip index.
pub mod skiplist;

/// Chunked positional list.
pub mod list;

/// Per-database key index with version stamps and watch tokens.
pub mod keys;


/// Structural outcome of a removal.
///
/// `Emptied` is a success: the structure holds nothing and the key that owns
/// it should be deleted by the caller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Rebalance {
    /// Removed without merging nodes.
    Ok,
    /// Removal merged two nodes.
    Merged,
    /// The structure is now empty.
    Emptied,
}

impl Rebalance {
    /// True for [`Rebalance::Emptied`].
    pub fn is_emptied(self) -> bool {
        self == Rebalance::Emptied
    }
}

/// Walk direction for bounded iteration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Direction {
    /// Head to tail.
    #[default]
    Forward,
    /// Tail to head.
    Backward,
}
