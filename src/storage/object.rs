//! The contract every page-resident structure implements.
//!
//! Pages are not self-describing on disk: a reader must already know what lives
//! at a page number. [`PageCodec`] is that knowledge for one type, and
//! [`PageObject`] is its object-safe face stored in the transaction cache.

use std::any::Any;
use std::fmt;

use crate::primitives::bytes::buf::{Reader, Writer};
use crate::types::{PageId, Result, StoreError};

/// Tag naming what a page object is; used in logs and assertions only.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PageKind {
    /// Opaque bytes.
    Raw,
    /// Member of the free-page chain.
    Free,
    /// Piece of a blob.
    Blob,
    /// Search tree descriptor.
    TreeRoot,
    /// Search tree node.
    TreeNode,
    /// Skip index descriptor.
    SkipRoot,
    /// Skip index node.
    SkipNode,
    /// Chunked list descriptor.
    ListRoot,
    /// Chunked list chunk.
    ListChunk,
    /// Sorted-set descriptor pairing a skip index with a member tree.
    SortedSet,
}

/// Typed (de)serialization of one kind of page.
///
/// `encode` receives a zeroed page-sized buffer and must fail with `Invalid`
/// rather than panic when the object does not fit. Decoding the bytes produced
/// by `encode` yields an equal object.
pub trait PageCodec: Clone + fmt::Debug + 'static {
    /// Kind tag.
    const KIND: PageKind;
    /// Serializes into `page`.
    fn encode(&self, page: &mut [u8]) -> Result<()>;
    /// Deserializes from a full page.
    fn decode(page: &[u8]) -> Result<Self>;
}

/// Object-safe view of a [`PageCodec`] held by the cache.
pub trait PageObject: fmt::Debug {
    /// Kind tag.
    fn kind(&self) -> PageKind;
    /// Serializes into `page`.
    fn encode(&self, page: &mut [u8]) -> Result<()>;
    /// Boxed deep copy.
    fn clone_object(&self) -> Box<dyn PageObject>;
    /// Downcasting hook.
    fn as_any(&self) -> &dyn Any;
}

impl<T: PageCodec> PageObject for T {
    fn kind(&self) -> PageKind {
        T::KIND
    }

    fn encode(&self, page: &mut [u8]) -> Result<()> {
        PageCodec::encode(self, page)
    }

    fn clone_object(&self) -> Box<dyn PageObject> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Fails with `Invalid` when `needed` bytes do not fit a page of `page_len`.
pub fn ensure_fits(needed: usize, page_len: usize, what: &'static str) -> Result<()> {
    if needed > page_len {
        Err(StoreError::Invalid(what))
    } else {
        Ok(())
    }
}

/// Uninterpreted page contents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawPage(pub Vec<u8>);

impl PageCodec for RawPage {
    const KIND: PageKind = PageKind::Raw;

    fn encode(&self, page: &mut [u8]) -> Result<()> {
        ensure_fits(self.0.len(), page.len(), "raw page larger than page size")?;
        page[..self.0.len()].copy_from_slice(&self.0);
        Ok(())
    }

    fn decode(page: &[u8]) -> Result<Self> {
        Ok(RawPage(page.to_vec()))
    }
}

/// Released page, linked into the header's free chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreePage {
    /// Next free page, or [`PageId::NONE`].
    pub next: PageId,
}

impl PageCodec for FreePage {
    const KIND: PageKind = PageKind::Free;

    fn encode(&self, page: &mut [u8]) -> Result<()> {
        Writer::new(page).u64(self.next.0);
        Ok(())
    }

    fn decode(page: &[u8]) -> Result<Self> {
        Ok(FreePage {
            next: PageId(Reader::new(page).u64()?),
        })
    }
}
