//! Shared identifiers and the error taxonomy used across the engine.

use std::fmt;

/// Checksum and digest helpers.
pub mod checksum;

/// Number of a fixed-size page inside the backing store.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct PageId(pub u64);

impl PageId {
    /// Page 0 is the header and doubles as the "no page" marker in links.
    pub const NONE: PageId = PageId(0);

    /// Returns true when this id is the null link.
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Returns `Some(self)` for a real page, `None` for the null link.
    pub fn as_option(self) -> Option<PageId> {
        if self.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Length in bytes of a [`Digest`].
pub const DIGEST_LEN: usize = 20;

/// 20-byte SHA-1 content digest.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Digest(pub [u8; DIGEST_LEN]);

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", hex::encode(self.0))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Errors surfaced by every layer of the engine.
///
/// Nothing below the caller retries: each fallible step hands its status up and
/// the caller decides between `discard` and carrying on.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Underlying I/O failed.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Bytes on disk or in the cache violate an invariant.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Malformed input such as an out-of-range position.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Expected absence.
    #[error("not found")]
    NotFound,
    /// The key holds a different kind of value.
    #[error("operation against a key holding the wrong kind of value")]
    WrongType,
    /// Staging memory could not be reserved.
    #[error("out of memory")]
    OutOfMemory,
    /// A watched key changed since it was watched.
    #[error("watched key changed")]
    Conflict,
    /// A write was attempted through a read-only handle.
    #[error("store is read-only")]
    ReadOnly,
}

impl From<std::collections::TryReserveError> for StoreError {
    fn from(_: std::collections::TryReserveError) -> Self {
        StoreError::OutOfMemory
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
