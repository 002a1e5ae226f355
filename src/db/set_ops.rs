//! Set commands. Values are `BTree<Digest, PageId>`s keyed by member digest,
//! each entry pointing at the member blob.

use std::collections::HashSet;

use crate::storage::blob;
use crate::storage::btree::BTree;
use crate::storage::keys::KeyKind;
use crate::storage::Rebalance;
use crate::types::checksum::key_digest;
use crate::types::{Digest, PageId, Result};

use super::{optional, Db};

impl Db {
    fn set_tree(&mut self, key: &[u8]) -> Result<Option<BTree<Digest, PageId>>> {
        Ok(self.value_page(key, KeyKind::Set)?.map(BTree::open))
    }

    /// Adds members, returning how many were not already present.
    pub fn sadd<M: AsRef<[u8]>>(&mut self, key: &[u8], members: &[M]) -> Result<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        let existing = self.set_tree(key)?;
        let tree = match existing {
            Some(tree) => tree,
            None => BTree::create(&mut self.cache)?,
        };
        let mut added = 0;
        for member in members {
            let member = member.as_ref();
            let digest = key_digest(member);
            if optional(tree.find(&mut self.cache, &digest))?.is_some() {
                continue;
            }
            let page = blob::store(&mut self.cache, member)?;
            tree.add(&mut self.cache, digest, page)?;
            added += 1;
        }
        match existing {
            None => {
                self.set(key, KeyKind::Set, tree.root_page(), 0)?;
            }
            Some(_) if added > 0 => {
                self.touch(key)?;
            }
            Some(_) => {}
        }
        Ok(added)
    }

    /// Removes members, returning how many were present.
    pub fn srem<M: AsRef<[u8]>>(&mut self, key: &[u8], members: &[M]) -> Result<u64> {
        let Some(tree) = self.set_tree(key)? else {
            return Ok(0);
        };
        let mut removed = 0;
        let mut outcome = Rebalance::Ok;
        for member in members {
            let digest = key_digest(member.as_ref());
            if let Some((page, rebalance)) = optional(tree.remove(&mut self.cache, &digest))? {
                blob::free(&mut self.cache, page)?;
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

    /// True when `member` is in the set.
    pub fn sismember(&mut self, key: &[u8], member: &[u8]) -> Result<bool> {
        let Some(tree) = self.set_tree(key)? else {
            return Ok(false);
        };
        Ok(optional(tree.find(&mut self.cache, &key_digest(member)))?.is_some())
    }

    /// Member count; 0 for a missing key.
    pub fn scard(&mut self, key: &[u8]) -> Result<u64> {
        match self.set_tree(key)? {
            Some(tree) => tree.len(&mut self.cache),
            None => Ok(0),
        }
    }

    /// Every member, in digest order.
    pub fn smembers(&mut self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        let Some(tree) = self.set_tree(key)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for (_, page) in tree.entries(&mut self.cache)? {
            out.push(blob::read(&mut self.cache, page)?);
        }
        Ok(out)
    }

    /// Removes and returns a random member.
    pub fn spop(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(tree) = self.set_tree(key)? else {
            return Ok(None);
        };
        let (digest, page) = tree.random_element(&mut self.cache)?;
        let member = blob::read(&mut self.cache, page)?;
        let (_, outcome) = tree.remove(&mut self.cache, &digest)?;
        blob::free(&mut self.cache, page)?;
        self.settle(key, outcome)?;
        Ok(Some(member))
    }

    /// Up to `count` random members without removing them.
    ///
    /// With `allow_repeats` exactly `count` picks are made and a member may
    /// come back more than once. Without it the members are distinct and the
    /// result is capped at the set size.
    pub fn srandmember(
        &mut self,
        key: &[u8],
        count: usize,
        allow_repeats: bool,
    ) -> Result<Vec<Vec<u8>>> {
        let Some(tree) = self.set_tree(key)? else {
            return Ok(Vec::new());
        };
        let len = tree.len(&mut self.cache)?;
        if !allow_repeats && count as u64 >= len {
            return self.smembers(key);
        }
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            let (digest, page) = tree.random_element(&mut self.cache)?;
            if !allow_repeats && !seen.insert(digest) {
                continue;
            }
            out.push(blob::read(&mut self.cache, page)?);
        }
        Ok(out)
    }
}
