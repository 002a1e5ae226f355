//! Byte strings spanning a chain of pages.

use std::cmp::Ordering;

use super::cache::PageCache;
use super::object::{ensure_fits, PageCodec, PageKind};
use crate::primitives::bytes::buf::{Reader, Writer};
use crate::types::{PageId, Result, StoreError};

const BLOB_HEADER_LEN: usize = 12;

/// One link of a blob chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobPage {
    /// Next link, or [`PageId::NONE`].
    pub next: PageId,
    /// Bytes held by this link.
    pub data: Vec<u8>,
}

impl PageCodec for BlobPage {
    const KIND: PageKind = PageKind::Blob;

    fn encode(&self, page: &mut [u8]) -> Result<()> {
        ensure_fits(
            BLOB_HEADER_LEN + self.data.len(),
            page.len(),
            "blob chunk larger than page",
        )?;
        let mut w = Writer::new(page);
        w.u32(self.data.len() as u32);
        w.u64(self.next.0);
        w.bytes(&self.data);
        Ok(())
    }

    fn decode(page: &[u8]) -> Result<Self> {
        let mut r = Reader::new(page);
        let len = r.u32()? as usize;
        let next = PageId(r.u64()?);
        let data = r.take(len)?.to_vec();
        Ok(Self { next, data })
    }
}

fn chunk_capacity(cache: &PageCache) -> usize {
    cache.page_size() - BLOB_HEADER_LEN
}

/// Stores `bytes` and returns the first page of the chain.
pub fn store(cache: &mut PageCache, bytes: &[u8]) -> Result<PageId> {
    let capacity = chunk_capacity(cache);
    let chunks: Vec<&[u8]> = if bytes.is_empty() {
        vec![&[][..]]
    } else {
        bytes.chunks(capacity).collect()
    };
    let mut pages = Vec::with_capacity(chunks.len());
    for _ in &chunks {
        pages.push(cache.alloc_page()?);
    }
    for (i, chunk) in chunks.iter().enumerate() {
        let next = pages.get(i + 1).copied().unwrap_or(PageId::NONE);
        cache.put(
            pages[i],
            BlobPage {
                next,
                data: chunk.to_vec(),
            },
        )?;
    }
    Ok(pages[0])
}

/// Reads the whole blob starting at `page`.
pub fn read(cache: &mut PageCache, page: PageId) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut cursor = page;
    while let Some(current) = cursor.as_option() {
        let link: BlobPage = cache.get(current)?;
        out.extend_from_slice(&link.data);
        cursor = link.next;
    }
    Ok(out)
}

/// Byte-wise comparison of the stored blob against `other`, without reassembling it.
pub fn compare(cache: &mut PageCache, page: PageId, other: &[u8]) -> Result<Ordering> {
    let mut rest = other;
    let mut cursor = page;
    while let Some(current) = cursor.as_option() {
        let link: BlobPage = cache.get(current)?;
        let n = link.data.len().min(rest.len());
        match link.data[..n].cmp(&rest[..n]) {
            Ordering::Equal => {}
            unequal => return Ok(unequal),
        }
        if link.data.len() > n {
            return Ok(Ordering::Greater);
        }
        rest = &rest[n..];
        cursor = link.next;
    }
    Ok(if rest.is_empty() {
        Ordering::Equal
    } else {
        Ordering::Less
    })
}

/// Releases every page of the chain.
pub fn free(cache: &mut PageCache, page: PageId) -> Result<()> {
    if page.is_none() {
        return Err(StoreError::Invalid("blob page 0"));
    }
    let mut cursor = page;
    while let Some(current) = cursor.as_option() {
        let link: BlobPage = cache.get(current)?;
        cache.free_page(current)?;
        cursor = link.next;
    }
    Ok(())
}
