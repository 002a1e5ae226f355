#![forbid(unsafe_code)]
//! Fixed-width big-endian field helpers shared by every page codec.

use crate::types::{Result, StoreError};

/// Writes a big-endian u32 at the start of `dst`.
pub fn put_u32(dst: &mut [u8], v: u32) {
    dst[..4].copy_from_slice(&v.to_be_bytes());
}

/// Writes a big-endian u64 at the start of `dst`.
pub fn put_u64(dst: &mut [u8], v: u64) {
    dst[..8].copy_from_slice(&v.to_be_bytes());
}

/// Writes the raw bit pattern of an f64.
pub fn put_f64(dst: &mut [u8], v: f64) {
    put_u64(dst, v.to_bits());
}

/// Reads a big-endian u32 from the start of `src`.
pub fn get_u32(src: &[u8]) -> Result<u32> {
    let head = src
        .get(..4)
        .ok_or(StoreError::Corruption("u32 field truncated"))?;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(head);
    Ok(u32::from_be_bytes(raw))
}

/// Reads a big-endian u64 from the start of `src`.
pub fn get_u64(src: &[u8]) -> Result<u64> {
    let head = src
        .get(..8)
        .ok_or(StoreError::Corruption("u64 field truncated"))?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(head);
    Ok(u64::from_be_bytes(raw))
}

/// Reads an f64 written by [`put_f64`].
pub fn get_f64(src: &[u8]) -> Result<f64> {
    get_u64(src).map(f64::from_bits)
}

pub mod buf {
    //! Slice cursors for sequential page encoding and decoding.

    use super::*;

    /// Reads fields front to back, failing with `Corruption` on a short buffer.
    pub struct Reader<'a> {
        buf: &'a [u8],
        off: usize,
    }

    impl<'a> Reader<'a> {
        /// Creates a reader positioned at offset 0.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Takes the next `n` bytes.
        pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
            let end = self
                .off
                .checked_add(n)
                .ok_or(StoreError::Corruption("cursor offset overflow"))?;
            let slice = self
                .buf
                .get(self.off..end)
                .ok_or(StoreError::Corruption("page shorter than its encoding"))?;
            self.off = end;
            Ok(slice)
        }

        /// Reads one byte.
        pub fn u8(&mut self) -> Result<u8> {
            Ok(self.take(1)?[0])
        }

        /// Reads a big-endian u32.
        pub fn u32(&mut self) -> Result<u32> {
            get_u32(self.take(4)?)
        }

        /// Reads a big-endian u64.
        pub fn u64(&mut self) -> Result<u64> {
            get_u64(self.take(8)?)
        }

        /// Reads an f64.
        pub fn f64(&mut self) -> Result<f64> {
            get_f64(self.take(8)?)
        }

        /// Bytes not yet consumed.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }
    }

    /// Writes fields front to back into a page-sized buffer.
    ///
    /// Callers size their encodings against the page size up front, so running
    /// past the end is a programming error and panics like slice indexing.
    pub struct Writer<'a> {
        buf: &'a mut [u8],
        off: usize,
    }

    impl<'a> Writer<'a> {
        /// Creates a writer positioned at offset 0.
        pub fn new(buf: &'a mut [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Copies raw bytes.
        pub fn bytes(&mut self, src: &[u8]) {
            self.buf[self.off..self.off + src.len()].copy_from_slice(src);
            self.off += src.len();
        }

        /// Writes one byte.
        pub fn u8(&mut self, v: u8) {
            self.bytes(&[v]);
        }

        /// Writes a big-endian u32.
        pub fn u32(&mut self, v: u32) {
            self.bytes(&v.to_be_bytes());
        }

        /// Writes a big-endian u64.
        pub fn u64(&mut self, v: u64) {
            self.bytes(&v.to_be_bytes());
        }

        /// Writes an f64.
        pub fn f64(&mut self, v: f64) {
            self.u64(v.to_bits());
        }

        /// Reserves `n` bytes and returns them for in-place encoding.
        pub fn slot(&mut self, n: usize) -> &mut [u8] {
            let start = self.off;
            self.off += n;
            &mut self.buf[start..start + n]
        }

        /// Bytes written so far.
        pub fn position(&self) -> usize {
            self.off
        }
    }
}
