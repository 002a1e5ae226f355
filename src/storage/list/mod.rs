//! Positional list stored as a doubly linked chain of element chunks.
//!
//! Chunks stay packed: no chunk is empty and no two neighbours would fit
//! together in one chunk. Inserts into a full chunk first push an element into
//! a neighbour with room and only split when neither has any.

/// Descriptor and chunk page formats.
pub mod page;

use std::marker::PhantomData;

use super::cache::PageCache;
use super::codec::FixedCodec;
use super::{Direction, Rebalance};
use crate::types::{PageId, Result, StoreError};
pub use page::{max_chunk_size_for, ListChunk, ListRoot};

#[cfg(test)]
mod tests;

/// Handle to a list whose descriptor lives at `root_page`.
pub struct List<E> {
    root_page: PageId,
    _marker: PhantomData<fn() -> E>,
}

impl<E> Clone for List<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for List<E> {}

impl<E> std::fmt::Debug for List<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("List")
            .field("root_page", &self.root_page)
            .finish()
    }
}

enum Offload<E> {
    Left((PageId, ListChunk<E>)),
    Right((PageId, ListChunk<E>)),
    Split,
}

struct Located<E> {
    page: PageId,
    chunk: ListChunk<E>,
    offset: usize,
}

fn resolve(pos: i64, size: u64, insert: bool) -> Result<u64> {
    let size = size as i64;
    let bound = if insert { size + 1 } else { size };
    let resolved = if pos < 0 { pos + bound } else { pos };
    if resolved < 0 || resolved >= bound {
        return Err(StoreError::Invalid("list position out of range"));
    }
    Ok(resolved as u64)
}

impl<E: FixedCodec> List<E> {
    /// Creates an empty list with at most `max_chunk_size` elements per chunk.
    pub fn create(cache: &mut PageCache, max_chunk_size: u32) -> Result<Self> {
        if max_chunk_size < 2 {
            return Err(StoreError::Invalid("list chunks must hold at least 2 elements"));
        }
        if max_chunk_size > max_chunk_size_for::<E>(cache.page_size()) {
            return Err(StoreError::Invalid("list chunk size exceeds page capacity"));
        }
        let root_page = cache.alloc_page()?;
        cache.put(
            root_page,
            ListRoot {
                left: PageId::NONE,
                right: PageId::NONE,
                size: 0,
                max_chunk_size,
                element_width: E::WIDTH as u32,
            },
        )?;
        Ok(Self::open(root_page))
    }

    /// Creates an empty list sized to fill whole pages.
    pub fn create_default(cache: &mut PageCache) -> Result<Self> {
        let max = max_chunk_size_for::<E>(cache.page_size());
        Self::create(cache, max)
    }

    /// Attaches to an existing list.
    pub fn open(root_page: PageId) -> Self {
        Self {
            root_page,
            _marker: PhantomData,
        }
    }

    /// Descriptor page number.
    pub fn root_page(&self) -> PageId {
        self.root_page
    }

    /// Reads the descriptor, rejecting one written for another element type.
    pub fn descriptor(&self, cache: &mut PageCache) -> Result<ListRoot> {
        let root: ListRoot = cache.get(self.root_page)?;
        if root.element_width as usize != E::WIDTH {
            return Err(StoreError::Corruption("list element width mismatch"));
        }
        Ok(root)
    }

    /// Element count.
    pub fn len(&self, cache: &mut PageCache) -> Result<u64> {
        Ok(self.descriptor(cache)?.size)
    }

    /// True when the list holds no elements.
    pub fn is_empty(&self, cache: &mut PageCache) -> Result<bool> {
        Ok(self.len(cache)? == 0)
    }

    /// Finds the chunk holding absolute position `pos`, walking from the nearer end.
    fn locate(&self, cache: &mut PageCache, root: &ListRoot, pos: u64) -> Result<Located<E>> {
        if pos < root.size / 2 {
            let mut skipped = 0u64;
            let mut cursor = root.left;
            while let Some(page) = cursor.as_option() {
                let chunk: ListChunk<E> = cache.get(page)?;
                let len = chunk.elements.len() as u64;
                if pos < skipped + len {
                    let offset = (pos - skipped) as usize;
                    return Ok(Located {
                        page,
                        chunk,
                        offset,
                    });
                }
                skipped += len;
                cursor = chunk.right;
            }
        } else {
            let mut remaining = root.size - pos;
            let mut cursor = root.right;
            while let Some(page) = cursor.as_option() {
                let chunk: ListChunk<E> = cache.get(page)?;
                let len = chunk.elements.len() as u64;
                if remaining <= len {
                    let offset = (len - remaining) as usize;
                    return Ok(Located {
                        page,
                        chunk,
                        offset,
                    });
                }
                remaining -= len;
                cursor = chunk.left;
            }
        }
        Err(StoreError::Corruption("list chunks shorter than recorded size"))
    }

    /// Element at `pos`; `-1` is the last element.
    pub fn get_at(&self, cache: &mut PageCache, pos: i64) -> Result<E> {
        let root = self.descriptor(cache)?;
        let pos = resolve(pos, root.size, false)?;
        let found = self.locate(cache, &root, pos)?;
        Ok(found.chunk.elements[found.offset].clone())
    }

    /// Overwrites the element at `pos`, returning the previous one.
    pub fn set_at(&self, cache: &mut PageCache, pos: i64, element: E) -> Result<E> {
        let root = self.descriptor(cache)?;
        let pos = resolve(pos, root.size, false)?;
        let mut found = self.locate(cache, &root, pos)?;
        let old = std::mem::replace(&mut found.chunk.elements[found.offset], element);
        cache.put(found.page, found.chunk)?;
        Ok(old)
    }

    /// Inserts `element` so it ends up at `pos`; `-1` appends.
    pub fn insert_at(&self, cache: &mut PageCache, pos: i64, element: E) -> Result<()> {
        let mut root = self.descriptor(cache)?;
        let pos = resolve(pos, root.size, true)?;
        if root.size == 0 {
            let page = cache.alloc_page()?;
            cache.put(page, ListChunk::new(PageId::NONE, PageId::NONE, vec![element]))?;
            root.left = page;
            root.right = page;
        } else {
            let found = if pos == root.size {
                let chunk: ListChunk<E> = cache.get(root.right)?;
                let offset = chunk.elements.len();
                Located {
                    page: root.right,
                    chunk,
                    offset,
                }
            } else {
                self.locate(cache, &root, pos)?
            };
            self.rebalance_after_insert(cache, &mut root, found, element)?;
        }
        root.size += 1;
        cache.put(self.root_page, root)
    }

    fn rebalance_after_insert(
        &self,
        cache: &mut PageCache,
        root: &mut ListRoot,
        found: Located<E>,
        element: E,
    ) -> Result<()> {
        let max = root.max_chunk_size as usize;
        let Located {
            page,
            mut chunk,
            offset,
        } = found;
        if chunk.elements.len() < max {
            chunk.elements.insert(offset, element);
            return cache.put(page, chunk);
        }

        let len = chunk.elements.len();
        let left = match chunk.left.as_option() {
            Some(p) => Some((p, cache.get::<ListChunk<E>>(p)?)),
            None => None,
        }
        .filter(|(_, c)| c.elements.len() < max);
        let right = match chunk.right.as_option() {
            Some(p) => Some((p, cache.get::<ListChunk<E>>(p)?)),
            None => None,
        }
        .filter(|(_, c)| c.elements.len() < max);
        let target = match (left, right) {
            (Some(l), Some(r)) => {
                // moves needed on each side; ties go left
                if offset <= (len - offset) + r.1.elements.len() {
                    Offload::Left(l)
                } else {
                    Offload::Right(r)
                }
            }
            (Some(l), None) => Offload::Left(l),
            (None, Some(r)) => Offload::Right(r),
            (None, None) => Offload::Split,
        };

        match target {
            Offload::Left((left_page, mut left_chunk)) => {
                if offset == 0 {
                    left_chunk.elements.push(element);
                } else {
                    left_chunk.elements.push(chunk.elements.remove(0));
                    chunk.elements.insert(offset - 1, element);
                    cache.put(page, chunk)?;
                }
                cache.put(left_page, left_chunk)
            }
            Offload::Right((right_page, mut right_chunk)) => {
                if offset == len {
                    right_chunk.elements.insert(0, element);
                } else {
                    let moved = chunk.elements.remove(len - 1);
                    right_chunk.elements.insert(0, moved);
                    chunk.elements.insert(offset, element);
                    cache.put(page, chunk)?;
                }
                cache.put(right_page, right_chunk)
            }
            Offload::Split => {
                let mid = len / 2;
                let new_page = cache.alloc_page()?;
                let mut tail = ListChunk::new(page, chunk.right, chunk.elements.split_off(mid));
                if offset <= mid {
                    chunk.elements.insert(offset, element);
                } else {
                    tail.elements.insert(offset - mid, element);
                }
                match tail.right.as_option() {
                    Some(next) => {
                        let mut next_chunk: ListChunk<E> = cache.get(next)?;
                        next_chunk.left = new_page;
                        cache.put(next, next_chunk)?;
                    }
                    None => root.right = new_page,
                }
                chunk.right = new_page;
                cache.put(page, chunk)?;
                cache.put(new_page, tail)
            }
        }
    }

    /// Removes and returns the element at `pos`, with the structural outcome.
    pub fn remove_at(&self, cache: &mut PageCache, pos: i64) -> Result<(E, Rebalance)> {
        let mut root = self.descriptor(cache)?;
        let pos = resolve(pos, root.size, false)?;
        let Located {
            page,
            mut chunk,
            offset,
        } = self.locate(cache, &root, pos)?;
        let element = chunk.elements.remove(offset);
        root.size -= 1;
        let outcome = self.rebalance_after_remove(cache, &mut root, page, chunk)?;
        cache.put(self.root_page, root)?;
        if root.size == 0 {
            return Ok((element, Rebalance::Emptied));
        }
        Ok((element, outcome))
    }

    fn rebalance_after_remove(
        &self,
        cache: &mut PageCache,
        root: &mut ListRoot,
        page: PageId,
        mut chunk: ListChunk<E>,
    ) -> Result<Rebalance> {
        if chunk.elements.is_empty() {
            self.unlink(cache, root, page)?;
            cache.free_page(page)?;
            return Ok(Rebalance::Ok);
        }
        let max = root.max_chunk_size as usize;
        if let Some(left_page) = chunk.left.as_option() {
            let mut left: ListChunk<E> = cache.get(left_page)?;
            if left.elements.len() + chunk.elements.len() <= max {
                left.elements.append(&mut chunk.elements);
                cache.put(left_page, left)?;
                self.unlink(cache, root, page)?;
                cache.free_page(page)?;
                return Ok(Rebalance::Merged);
            }
        }
        if let Some(right_page) = chunk.right.as_option() {
            let mut right: ListChunk<E> = cache.get(right_page)?;
            if right.elements.len() + chunk.elements.len() <= max {
                chunk.elements.append(&mut right.elements);
                cache.put(page, chunk)?;
                self.unlink(cache, root, right_page)?;
                cache.free_page(right_page)?;
                return Ok(Rebalance::Merged);
            }
        }
        cache.put(page, chunk)?;
        Ok(Rebalance::Ok)
    }

    fn unlink(&self, cache: &mut PageCache, root: &mut ListRoot, page: PageId) -> Result<()> {
        let chunk: ListChunk<E> = cache.get(page)?;
        match chunk.left.as_option() {
            Some(left_page) => {
                let mut left: ListChunk<E> = cache.get(left_page)?;
                left.right = chunk.right;
                cache.put(left_page, left)?;
            }
            None => root.left = chunk.right,
        }
        match chunk.right.as_option() {
            Some(right_page) => {
                let mut right: ListChunk<E> = cache.get(right_page)?;
                right.left = chunk.left;
                cache.put(right_page, right)?;
            }
            None => root.right = chunk.left,
        }
        Ok(())
    }

    /// Up to `count` elements read from one end.
    pub fn iter(&self, cache: &mut PageCache, direction: Direction, count: usize) -> Result<Vec<E>> {
        let root = self.descriptor(cache)?;
        let mut out = Vec::with_capacity(count.min(root.size as usize));
        let mut cursor = match direction {
            Direction::Forward => root.left,
            Direction::Backward => root.right,
        };
        while let Some(page) = cursor.as_option() {
            if out.len() >= count {
                break;
            }
            let chunk: ListChunk<E> = cache.get(page)?;
            let want = count - out.len();
            match direction {
                Direction::Forward => {
                    out.extend(chunk.elements.iter().take(want).cloned());
                    cursor = chunk.right;
                }
                Direction::Backward => {
                    out.extend(chunk.elements.iter().rev().take(want).cloned());
                    cursor = chunk.left;
                }
            }
        }
        Ok(out)
    }

    /// Every element in order.
    pub fn to_vec(&self, cache: &mut PageCache) -> Result<Vec<E>> {
        self.iter(cache, Direction::Forward, usize::MAX)
    }

    /// Frees every chunk and the descriptor.
    pub fn destroy(self, cache: &mut PageCache) -> Result<()> {
        let root = self.descriptor(cache)?;
        let mut cursor = root.left;
        while let Some(page) = cursor.as_option() {
            let chunk: ListChunk<E> = cache.get(page)?;
            cache.free_page(page)?;
            cursor = chunk.right;
        }
        cache.free_page(self.root_page)
    }

    /// Audits chunk links, fill, packing and the element total.
    pub fn is_balanced(&self, cache: &mut PageCache) -> Result<bool> {
        let root = self.descriptor(cache)?;
        let max = root.max_chunk_size as usize;
        let mut total = 0u64;
        let mut previous = PageId::NONE;
        let mut previous_len: Option<usize> = None;
        let mut cursor = root.left;
        while let Some(page) = cursor.as_option() {
            let chunk: ListChunk<E> = cache.get(page)?;
            let len = chunk.elements.len();
            if len == 0 || len > max || chunk.left != previous {
                return Ok(false);
            }
            if previous_len.is_some_and(|p| p + len <= max) {
                return Ok(false);
            }
            total += len as u64;
            if total > root.size {
                return Ok(false);
            }
            previous = page;
            previous_len = Some(len);
            cursor = chunk.right;
        }
        Ok(total == root.size && previous == root.right)
    }
}
