use crate::primitives::bytes::buf::{Reader, Writer};
use crate::storage::codec::FixedCodec;
use crate::storage::object::{ensure_fits, PageCodec, PageKind};
use crate::types::{PageId, Result};

const CHUNK_HEADER_LEN: usize = 4 + 8 + 8;

/// List descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListRoot {
    /// First chunk.
    pub left: PageId,
    /// Last chunk.
    pub right: PageId,
    /// Total element count.
    pub size: u64,
    /// Elements per chunk at most.
    pub max_chunk_size: u32,
    /// Encoded width of one element.
    pub element_width: u32,
}

impl PageCodec for ListRoot {
    const KIND: PageKind = PageKind::ListRoot;

    fn encode(&self, page: &mut [u8]) -> Result<()> {
        let mut w = Writer::new(page);
        w.u64(self.left.0);
        w.u64(self.right.0);
        w.u64(self.size);
        w.u32(self.max_chunk_size);
        w.u32(self.element_width);
        Ok(())
    }

    fn decode(page: &[u8]) -> Result<Self> {
        let mut r = Reader::new(page);
        Ok(Self {
            left: PageId(r.u64()?),
            right: PageId(r.u64()?),
            size: r.u64()?,
            max_chunk_size: r.u32()?,
            element_width: r.u32()?,
        })
    }
}

/// A run of consecutive elements.
#[derive(Clone, Debug, PartialEq)]
pub struct ListChunk<E> {
    /// Previous chunk.
    pub left: PageId,
    /// Next chunk.
    pub right: PageId,
    /// Elements in list order.
    pub elements: Vec<E>,
}

impl<E> ListChunk<E> {
    pub(crate) fn new(left: PageId, right: PageId, elements: Vec<E>) -> Self {
        Self {
            left,
            right,
            elements,
        }
    }
}

/// Largest chunk that fits a page of `page_size` bytes.
pub fn max_chunk_size_for<E: FixedCodec>(page_size: usize) -> u32 {
    ((page_size - CHUNK_HEADER_LEN) / E::WIDTH.max(1)) as u32
}

impl<E: FixedCodec> PageCodec for ListChunk<E> {
    const KIND: PageKind = PageKind::ListChunk;

    fn encode(&self, page: &mut [u8]) -> Result<()> {
        ensure_fits(
            CHUNK_HEADER_LEN + self.elements.len() * E::WIDTH,
            page.len(),
            "list chunk overflows page",
        )?;
        let mut w = Writer::new(page);
        w.u32(self.elements.len() as u32);
        w.u64(self.left.0);
        w.u64(self.right.0);
        for element in &self.elements {
            element.put(w.slot(E::WIDTH));
        }
        Ok(())
    }

    fn decode(page: &[u8]) -> Result<Self> {
        let mut r = Reader::new(page);
        let count = r.u32()? as usize;
        let left = PageId(r.u64()?);
        let right = PageId(r.u64()?);
        let mut elements = Vec::with_capacity(count.min(page.len()));
        for _ in 0..count {
            elements.push(E::get(r.take(E::WIDTH)?)?);
        }
        Ok(Self {
            left,
            right,
            elements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_chunk_fits_page() {
        let max = max_chunk_size_for::<u64>(1024) as u64;
        assert_eq!(max, 125);
        let chunk = ListChunk::new(PageId(2), PageId::NONE, (0..max).collect::<Vec<u64>>());
        let mut page = vec![0u8; 1024];
        PageCodec::encode(&chunk, &mut page).unwrap();
        assert_eq!(ListChunk::<u64>::decode(&page).unwrap(), chunk);

        let over = ListChunk::new(PageId::NONE, PageId::NONE, (0..=max).collect::<Vec<u64>>());
        assert!(PageCodec::encode(&over, &mut page).is_err());
    }
}
