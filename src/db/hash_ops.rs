//! Hash commands. Values are `BTree<Digest, HashField>`s keyed by field digest;
//! every entry owns a field blob and a value blob.

use crate::storage::blob;
use crate::storage::btree::BTree;
use crate::storage::codec::HashField;
use crate::storage::keys::KeyKind;
use crate::storage::Rebalance;
use crate::types::checksum::key_digest;
use crate::types::{Digest, Result, StoreError};

use super::{optional, Db};

impl Db {
    fn hash_tree(&mut self, key: &[u8]) -> Result<Option<BTree<Digest, HashField>>> {
        Ok(self.value_page(key, KeyKind::Hash)?.map(BTree::open))
    }

    fn hash_entry(&mut self, key: &[u8], field: &[u8]) -> Result<Option<HashField>> {
        let Some(tree) = self.hash_tree(key)? else {
            return Ok(None);
        };
        optional(tree.find(&mut self.cache, &key_digest(field)))
    }

    /// Sets `field` to `value`. Returns true when the field is new.
    pub fn hset(&mut self, key: &[u8], field: &[u8], value: &[u8]) -> Result<bool> {
        let existing = self.hash_tree(key)?;
        let tree = match existing {
            Some(tree) => tree,
            None => BTree::create(&mut self.cache)?,
        };
        let digest = key_digest(field);
        let created = match optional(tree.find(&mut self.cache, &digest))? {
            Some(mut entry) => {
                blob::free(&mut self.cache, entry.value)?;
                entry.value = blob::store(&mut self.cache, value)?;
                tree.replace(&mut self.cache, digest, entry)?;
                false
            }
            None => {
                let entry = HashField {
                    field: blob::store(&mut self.cache, field)?,
                    value: blob::store(&mut self.cache, value)?,
                };
                tree.add(&mut self.cache, digest, entry)?;
                true
            }
        };
        match existing {
            Some(_) => self.touch(key)?,
            None => self.set(key, KeyKind::Hash, tree.root_page(), 0)?,
        };
        Ok(created)
    }

    /// Value stored under `field`.
    pub fn hget(&mut self, key: &[u8], field: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.hash_entry(key, field)? {
            Some(entry) => Ok(Some(blob::read(&mut self.cache, entry.value)?)),
            None => Ok(None),
        }
    }

    /// True when `field` is set.
    pub fn hexists(&mut self, key: &[u8], field: &[u8]) -> Result<bool> {
        Ok(self.hash_entry(key, field)?.is_some())
    }

    /// Removes fields, returning how many were set.
    pub fn hdel<F: AsRef<[u8]>>(&mut self, key: &[u8], fields: &[F]) -> Result<u64> {
        let Some(tree) = self.hash_tree(key)? else {
            return Ok(0);
        };
        let mut removed = 0;
        let mut outcome = Rebalance::Ok;
        for field in fields {
            let digest = key_digest(field.as_ref());
            if let Some((entry, rebalance)) = optional(tree.remove(&mut self.cache, &digest))? {
                blob::free(&mut self.cache, entry.field)?;
                blob::free(&mut self.cache, entry.value)?;
                removed += 1;
                outcome = rebalance;
                if outcome.is_emptied() {
                    break;
                }
            }
        }
        if removed > 0 {
            self.settle(key, outcome)?;
        }
        Ok(removed)
    }

    /// Field count; 0 for a missing key.
    pub fn hlen(&mut self, key: &[u8]) -> Result<u64> {
        match self.hash_tree(key)? {
            Some(tree) => tree.len(&mut self.cache),
            None => Ok(0),
        }
    }

    /// Every field and value, in field-digest order.
    pub fn hgetall(&mut self, key: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let Some(tree) = self.hash_tree(key)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for (_, entry) in tree.entries(&mut self.cache)? {
            let field = blob::read(&mut self.cache, entry.field)?;
            let value = blob::read(&mut self.cache, entry.value)?;
            out.push((field, value));
        }
        Ok(out)
    }

    /// Adds `delta` to the decimal integer stored under `field`, treating a
    /// missing field as 0. Returns the new value.
    pub fn hincrby(&mut self, key: &[u8], field: &[u8], delta: i64) -> Result<i64> {
        let current = match self.hget(key, field)? {
            Some(bytes) => std::str::from_utf8(&bytes)
                .ok()
                .and_then(|text| text.parse::<i64>().ok())
                .ok_or(StoreError::Invalid("hash value is not an integer"))?,
            None => 0,
        };
        let next = current
            .checked_add(delta)
            .ok_or(StoreError::Invalid("increment would overflow"))?;
        self.hset(key, field, next.to_string().as_bytes())?;
        Ok(next)
    }
}
