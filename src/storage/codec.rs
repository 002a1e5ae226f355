//! Fixed-width element codecs shared by tree keys, tree values and list elements.

use crate::primitives::bytes::{get_f64, get_u64, put_f64, put_u64};
use crate::types::{Digest, PageId, Result, StoreError, DIGEST_LEN};

/// A value that always serializes to exactly `WIDTH` bytes.
pub trait FixedCodec: Clone + std::fmt::Debug + 'static {
    /// Encoded width in bytes.
    const WIDTH: usize;
    /// Writes `self` into `dst[..WIDTH]`.
    fn put(&self, dst: &mut [u8]);
    /// Reads a value from `src[..WIDTH]`.
    fn get(src: &[u8]) -> Result<Self>;
}

impl FixedCodec for () {
    const WIDTH: usize = 0;

    fn put(&self, _dst: &mut [u8]) {}

    fn get(_src: &[u8]) -> Result<Self> {
        Ok(())
    }
}

impl FixedCodec for u64 {
    const WIDTH: usize = 8;

    fn put(&self, dst: &mut [u8]) {
        put_u64(dst, *self);
    }

    fn get(src: &[u8]) -> Result<Self> {
        get_u64(src)
    }
}

impl FixedCodec for PageId {
    const WIDTH: usize = 8;

    fn put(&self, dst: &mut [u8]) {
        put_u64(dst, self.0);
    }

    fn get(src: &[u8]) -> Result<Self> {
        get_u64(src).map(PageId)
    }
}

impl FixedCodec for f64 {
    const WIDTH: usize = 8;

    fn put(&self, dst: &mut [u8]) {
        put_f64(dst, *self);
    }

    fn get(src: &[u8]) -> Result<Self> {
        get_f64(src)
    }
}

impl FixedCodec for Digest {
    const WIDTH: usize = DIGEST_LEN;

    fn put(&self, dst: &mut [u8]) {
        dst[..DIGEST_LEN].copy_from_slice(&self.0);
    }

    fn get(src: &[u8]) -> Result<Self> {
        let head = src
            .get(..DIGEST_LEN)
            .ok_or(StoreError::Corruption("digest field truncated"))?;
        let mut raw = [0u8; DIGEST_LEN];
        raw.copy_from_slice(head);
        Ok(Digest(raw))
    }
}

/// Hash entry: field name blob and value blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashField {
    /// Blob holding the field name.
    pub field: PageId,
    /// Blob holding the value.
    pub value: PageId,
}

impl FixedCodec for HashField {
    const WIDTH: usize = 16;

    fn put(&self, dst: &mut [u8]) {
        self.field.put(dst);
        self.value.put(&mut dst[8..]);
    }

    fn get(src: &[u8]) -> Result<Self> {
        Ok(Self {
            field: PageId::get(src)?,
            value: PageId::get(src.get(8..).unwrap_or_default())?,
        })
    }
}

/// Sorted-set member entry: score and member blob.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MemberScore {
    /// Member score.
    pub score: f64,
    /// Blob holding the member bytes.
    pub member: PageId,
}

impl FixedCodec for MemberScore {
    const WIDTH: usize = 16;

    fn put(&self, dst: &mut [u8]) {
        self.score.put(dst);
        self.member.put(&mut dst[8..]);
    }

    fn get(src: &[u8]) -> Result<Self> {
        Ok(Self {
            score: f64::get(src)?,
            member: PageId::get(src.get(8..).unwrap_or_default())?,
        })
    }
}
