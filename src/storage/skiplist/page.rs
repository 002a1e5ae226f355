use crate::primitives::bytes::buf::{Reader, Writer};
use crate::storage::object::{ensure_fits, PageCodec, PageKind};
use crate::types::{PageId, Result};

const NODE_HEADER_LEN: usize = 8 + 8 + 8 + 4;
const LEVEL_LEN: usize = 16;

/// Skip index descriptor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SkipRoot {
    /// Sentinel node carrying every level.
    pub head: PageId,
    /// Last node, or [`PageId::NONE`] when empty.
    pub tail: PageId,
    /// Element count.
    pub size: u64,
    /// Number of levels currently in use, at least 1.
    pub level: u32,
}

impl PageCodec for SkipRoot {
    const KIND: PageKind = PageKind::SkipRoot;

    fn encode(&self, page: &mut [u8]) -> Result<()> {
        let mut w = Writer::new(page);
        w.u64(self.head.0);
        w.u64(self.tail.0);
        w.u64(self.size);
        w.u32(self.level);
        Ok(())
    }

    fn decode(page: &[u8]) -> Result<Self> {
        let mut r = Reader::new(page);
        Ok(Self {
            head: PageId(r.u64()?),
            tail: PageId(r.u64()?),
            size: r.u64()?,
            level: r.u32()?,
        })
    }
}

/// Forward link at one level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SkipLevel {
    /// Next node at this level.
    pub right: PageId,
    /// Level-0 steps to `right`, or to one past the tail when `right` is none.
    pub span: u64,
}

/// One element of the index.
#[derive(Clone, Debug, PartialEq)]
pub struct SkipNode {
    /// Blob holding the member bytes; none on the head sentinel.
    pub value: PageId,
    /// Primary sort key.
    pub score: f64,
    /// Previous node at level 0, none for the first node.
    pub left: PageId,
    /// Forward links, lowest level first.
    pub levels: Vec<SkipLevel>,
}

impl SkipNode {
    pub(crate) fn sentinel(levels: usize) -> Self {
        Self {
            value: PageId::NONE,
            score: 0.0,
            left: PageId::NONE,
            levels: vec![SkipLevel::default(); levels],
        }
    }

    /// Next node at level 0.
    pub fn right(&self) -> PageId {
        self.levels
            .first()
            .map(|level| level.right)
            .unwrap_or(PageId::NONE)
    }
}

impl PageCodec for SkipNode {
    const KIND: PageKind = PageKind::SkipNode;

    fn encode(&self, page: &mut [u8]) -> Result<()> {
        ensure_fits(
            NODE_HEADER_LEN + self.levels.len() * LEVEL_LEN,
            page.len(),
            "skip node overflows page",
        )?;
        let mut w = Writer::new(page);
        w.u64(self.value.0);
        w.f64(self.score);
        w.u64(self.left.0);
        w.u32(self.levels.len() as u32);
        for level in &self.levels {
            w.u64(level.right.0);
            w.u64(level.span);
        }
        Ok(())
    }

    fn decode(page: &[u8]) -> Result<Self> {
        let mut r = Reader::new(page);
        let value = PageId(r.u64()?);
        let score = r.f64()?;
        let left = PageId(r.u64()?);
        let count = r.u32()? as usize;
        let mut levels = Vec::with_capacity(count.min(page.len() / LEVEL_LEN));
        for _ in 0..count {
            levels.push(SkipLevel {
                right: PageId(r.u64()?),
                span: r.u64()?,
            });
        }
        Ok(Self {
            value,
            score,
            left,
            levels,
        })
    }
}
