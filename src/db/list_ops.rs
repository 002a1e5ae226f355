//! List commands. Values are [`List<PageId>`]s of element blobs.

use crate::storage::blob;
use crate::storage::keys::KeyKind;
use crate::storage::list::List;
use crate::storage::Direction;
use crate::types::{PageId, Result, StoreError};

use super::{window, Db};

impl Db {
    fn list(&mut self, key: &[u8]) -> Result<Option<List<PageId>>> {
        Ok(self.value_page(key, KeyKind::List)?.map(List::open))
    }

    fn push<V: AsRef<[u8]>>(&mut self, key: &[u8], values: &[V], pos: i64) -> Result<u64> {
        let existing = self.list(key)?;
        if values.is_empty() {
            return match existing {
                Some(list) => list.len(&mut self.cache),
                None => Ok(0),
            };
        }
        let list = match existing {
            Some(list) => list,
            None => List::create_default(&mut self.cache)?,
        };
        for value in values {
            let page = blob::store(&mut self.cache, value.as_ref())?;
            list.insert_at(&mut self.cache, pos, page)?;
        }
        match existing {
            Some(_) => self.touch(key)?,
            None => self.set(key, KeyKind::List, list.root_page(), 0)?,
        };
        list.len(&mut self.cache)
    }

    fn pop(&mut self, key: &[u8], pos: i64) -> Result<Option<Vec<u8>>> {
        let Some(list) = self.list(key)? else {
            return Ok(None);
        };
        let (page, outcome) = list.remove_at(&mut self.cache, pos)?;
        let value = blob::read(&mut self.cache, page)?;
        blob::free(&mut self.cache, page)?;
        self.settle(key, outcome)?;
        Ok(Some(value))
    }

    /// Pushes each value onto the head in turn, so the last one ends up first.
    /// Returns the new length.
    pub fn lpush<V: AsRef<[u8]>>(&mut self, key: &[u8], values: &[V]) -> Result<u64> {
        self.push(key, values, 0)
    }

    /// Appends each value to the tail. Returns the new length.
    pub fn rpush<V: AsRef<[u8]>>(&mut self, key: &[u8], values: &[V]) -> Result<u64> {
        self.push(key, values, -1)
    }

    /// Removes and returns the head element.
    pub fn lpop(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.pop(key, 0)
    }

    /// Removes and returns the tail element.
    pub fn rpop(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.pop(key, -1)
    }

    /// Element count; 0 for a missing key.
    pub fn llen(&mut self, key: &[u8]) -> Result<u64> {
        match self.list(key)? {
            Some(list) => list.len(&mut self.cache),
            None => Ok(0),
        }
    }

    /// Element at `index`, `-1` being the last. `None` when out of range.
    pub fn lindex(&mut self, key: &[u8], index: i64) -> Result<Option<Vec<u8>>> {
        let Some(list) = self.list(key)? else {
            return Ok(None);
        };
        let len = list.len(&mut self.cache)? as i64;
        let pos = if index < 0 { index + len } else { index };
        if pos < 0 || pos >= len {
            return Ok(None);
        }
        let page = list.get_at(&mut self.cache, pos)?;
        Ok(Some(blob::read(&mut self.cache, page)?))
    }

    /// Overwrites the element at `index`.
    ///
    /// A missing key is `NotFound`; an index outside the list is `Invalid`.
    pub fn lset(&mut self, key: &[u8], index: i64, value: &[u8]) -> Result<()> {
        let list = self.list(key)?.ok_or(StoreError::NotFound)?;
        let page = blob::store(&mut self.cache, value)?;
        match list.set_at(&mut self.cache, index, page) {
            Ok(old) => blob::free(&mut self.cache, old)?,
            Err(err) => {
                blob::free(&mut self.cache, page)?;
                return Err(err);
            }
        }
        self.touch(key)?;
        Ok(())
    }

    /// Elements from `start` to `stop` inclusive; negative indexes count from
    /// the tail and out-of-range bounds are clamped.
    pub fn lrange(&mut self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        let Some(list) = self.list(key)? else {
            return Ok(Vec::new());
        };
        let len = list.len(&mut self.cache)?;
        let Some((first, last)) = window(start, stop, len) else {
            return Ok(Vec::new());
        };
        let pages = if first >= len - 1 - last {
            let count = (len - first) as usize;
            let mut tail = list.iter(&mut self.cache, Direction::Backward, count)?;
            tail.reverse();
            tail.truncate((last - first + 1) as usize);
            tail
        } else {
            let head = list.iter(&mut self.cache, Direction::Forward, (last + 1) as usize)?;
            head.into_iter().skip(first as usize).collect()
        };
        let mut out = Vec::with_capacity(pages.len());
        for page in pages {
            out.push(blob::read(&mut self.cache, page)?);
        }
        Ok(out)
    }
}
