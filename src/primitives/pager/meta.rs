use std::ops::Range;

use crate::primitives::bytes::{get_u32, get_u64, put_u32, put_u64};
use crate::primitives::io::FileIo;
use crate::types::{PageId, Result, StoreError};

/// Magic prefix identifying a store file.
pub const META_MAGIC: [u8; 8] = *b"PAGEKV\0\x01";

const META_MAGIC_RANGE: Range<usize> = 0..8;
const META_PAGE_SIZE: Range<usize> = 8..12;
const META_DATABASE_COUNT: Range<usize> = 12..16;
const META_NUMBER_OF_PAGES: Range<usize> = 16..24;
const META_NEXT_FREE_PAGE: Range<usize> = 24..32;
const META_FREE_HEAD: Range<usize> = 32..40;
const META_ROOTS_START: usize = 40;
const ROOT_LEN: usize = 8;

/// Header stored in page 0.
///
/// Besides the layout constants it holds the allocation counters and one root
/// page per logical database. The transaction cache keeps two copies: the live
/// one and a snapshot taken at transaction start, which `discard` restores.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Meta {
    /// Size of each page in bytes.
    pub page_size: u32,
    /// Number of pages the store spans, header included.
    pub number_of_pages: u64,
    /// Next never-used page number handed out once the free list is empty.
    pub next_free_page: PageId,
    /// Head of the chain of freed pages, or [`PageId::NONE`].
    pub free_head: PageId,
    /// Root page of each logical database's key index, or [`PageId::NONE`].
    pub database_roots: Vec<PageId>,
}

impl Meta {
    /// Header for a fresh store.
    pub fn new(page_size: u32, database_count: u32) -> Result<Self> {
        let meta = Self {
            page_size,
            number_of_pages: 1,
            next_free_page: PageId(1),
            free_head: PageId::NONE,
            database_roots: vec![PageId::NONE; database_count as usize],
        };
        meta.validate()?;
        Ok(meta)
    }

    /// Number of logical databases.
    pub fn database_count(&self) -> u32 {
        self.database_roots.len() as u32
    }

    fn validate(&self) -> Result<()> {
        if self.database_roots.is_empty() {
            return Err(StoreError::Invalid("database count must be at least one"));
        }
        let needed = META_ROOTS_START + self.database_roots.len() * ROOT_LEN;
        if needed > self.page_size as usize {
            return Err(StoreError::Invalid("database roots do not fit in the header page"));
        }
        Ok(())
    }

    /// Serializes into a page-sized buffer.
    pub fn encode(&self, page: &mut [u8]) {
        page.fill(0);
        page[META_MAGIC_RANGE].copy_from_slice(&META_MAGIC);
        put_u32(&mut page[META_PAGE_SIZE], self.page_size);
        put_u32(&mut page[META_DATABASE_COUNT], self.database_count());
        put_u64(&mut page[META_NUMBER_OF_PAGES], self.number_of_pages);
        put_u64(&mut page[META_NEXT_FREE_PAGE], self.next_free_page.0);
        put_u64(&mut page[META_FREE_HEAD], self.free_head.0);
        for (i, root) in self.database_roots.iter().enumerate() {
            let off = META_ROOTS_START + i * ROOT_LEN;
            put_u64(&mut page[off..off + ROOT_LEN], root.0);
        }
    }

    /// Parses a header page.
    pub fn decode(page: &[u8]) -> Result<Self> {
        if page.get(META_MAGIC_RANGE) != Some(&META_MAGIC[..]) {
            return Err(StoreError::Corruption("header magic mismatch"));
        }
        if page.len() < META_ROOTS_START {
            return Err(StoreError::Corruption("header truncated"));
        }
        let page_size = get_u32(&page[META_PAGE_SIZE])?;
        let database_count = get_u32(&page[META_DATABASE_COUNT])?;
        let number_of_pages = get_u64(&page[META_NUMBER_OF_PAGES])?;
        let next_free_page = PageId(get_u64(&page[META_NEXT_FREE_PAGE])?);
        let free_head = PageId(get_u64(&page[META_FREE_HEAD])?);
        let roots_end = (database_count as usize)
            .checked_mul(ROOT_LEN)
            .and_then(|len| len.checked_add(META_ROOTS_START))
            .filter(|&end| end <= page.len())
            .ok_or(StoreError::Corruption("database count exceeds the header page"))?;
        let mut database_roots = Vec::with_capacity(database_count as usize);
        for raw in page[META_ROOTS_START..roots_end].chunks_exact(ROOT_LEN) {
            database_roots.push(PageId(get_u64(raw)?));
        }
        let meta = Self {
            page_size,
            number_of_pages,
            next_free_page,
            free_head,
            database_roots,
        };
        if next_free_page.0 > number_of_pages || free_head.0 >= number_of_pages.max(1) {
            return Err(StoreError::Corruption("header counters out of range"));
        }
        meta.validate()
            .map_err(|_| StoreError::Corruption("header layout invalid"))?;
        Ok(meta)
    }
}

/// Reads the page size recorded in an existing store, or `None` for an empty medium.
pub fn peek_page_size(io: &dyn FileIo) -> Result<Option<u32>> {
    if io.len()? < META_ROOTS_START as u64 {
        return Ok(None);
    }
    let mut head = [0u8; META_ROOTS_START];
    io.read_at(0, &mut head)?;
    if head[META_MAGIC_RANGE] != META_MAGIC {
        return Err(StoreError::Corruption("header magic mismatch"));
    }
    Ok(Some(get_u32(&head[META_PAGE_SIZE])?))
}
