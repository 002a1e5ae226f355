//! Rank-ordered skip index keyed by `(score, value)`.
//!
//! Every forward link records its span in level-0 steps, so rank queries and
//! rank-tracking descents run in logarithmic time. Nodes also keep a level-0
//! back link for reverse iteration. Member bytes live in blobs and ties on score
//! are broken by byte comparison of those blobs.

/// Descriptor and node page formats.
pub mod page;

use std::cmp::Ordering;

use rand::Rng;

use super::blob;
use super::cache::PageCache;
use super::{Direction, Rebalance};
use crate::types::{PageId, Result, StoreError};
pub use page::{SkipLevel, SkipNode, SkipRoot};


/// Highest level a node may carry; the head sentinel always carries all of them.
pub const MAX_LEVEL: usize = 32;
/// Chance of promoting a node one more level.
pub const PROBABILITY: f64 = 0.25;

/// Boundary semantics for [`SkipList::first_node`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RangeMode {
    /// Last node strictly before the target.
    Before,
    /// Last node at or before the target.
    UpTo,
    /// First node at or after the target.
    Include,
    /// First node strictly after the target.
    Exclude,
}

/// Handle to an index whose descriptor lives at `root_page`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SkipList {
    root_page: PageId,
}

/// Draws a level from a geometric distribution capped at [`MAX_LEVEL`].
pub fn random_level<R: Rng + ?Sized>(rng: &mut R) -> usize {
    let mut level = 1;
    while level < MAX_LEVEL && rng.gen_bool(PROBABILITY) {
        level += 1;
    }
    level
}

/// Whether a descent moves past `node` when looking for `(score, value)`.
///
/// With `inclusive` set, exact matches are passed too. A missing `value` makes
/// every node with an equal score compare as a tie.
fn passes(
    cache: &mut PageCache,
    node: &SkipNode,
    score: f64,
    value: Option<&[u8]>,
    inclusive: bool,
) -> Result<bool> {
    if node.score < score {
        return Ok(true);
    }
    if node.score > score {
        return Ok(false);
    }
    match value {
        None => Ok(inclusive),
        Some(bytes) => {
            let ord = blob::compare(cache, node.value, bytes)?;
            Ok(ord == Ordering::Less || (inclusive && ord == Ordering::Equal))
        }
    }
}

fn check_score(score: f64) -> Result<()> {
    if score.is_nan() {
        return Err(StoreError::Invalid("score is not a number"));
    }
    Ok(())
}

struct Descent {
    update: [PageId; MAX_LEVEL],
    rank: [u64; MAX_LEVEL],
}

impl SkipList {
    /// Creates an empty index.
    pub fn create(cache: &mut PageCache) -> Result<Self> {
        let root_page = cache.alloc_page()?;
        let head = cache.alloc_page()?;
        cache.put(head, SkipNode::sentinel(MAX_LEVEL))?;
        cache.put(
            root_page,
            SkipRoot {
                head,
                tail: PageId::NONE,
                size: 0,
                level: 1,
            },
        )?;
        Ok(Self { root_page })
    }

    /// Attaches to an existing index.
    pub fn open(root_page: PageId) -> Self {
        Self { root_page }
    }

    /// Descriptor page number.
    pub fn root_page(&self) -> PageId {
        self.root_page
    }

    /// Reads the descriptor.
    pub fn descriptor(&self, cache: &mut PageCache) -> Result<SkipRoot> {
        cache.get(self.root_page)
    }

    /// Element count.
    pub fn len(&self, cache: &mut PageCache) -> Result<u64> {
        Ok(self.descriptor(cache)?.size)
    }

    /// True when the index holds no elements.
    pub fn is_empty(&self, cache: &mut PageCache) -> Result<bool> {
        Ok(self.len(cache)? == 0)
    }

    /// Member bytes of `node`.
    pub fn value(&self, cache: &mut PageCache, node: &SkipNode) -> Result<Vec<u8>> {
        blob::read(cache, node.value)
    }

    fn descend(
        &self,
        cache: &mut PageCache,
        root: &SkipRoot,
        score: f64,
        value: Option<&[u8]>,
        inclusive: bool,
    ) -> Result<(Descent, SkipNode)> {
        let mut descent = Descent {
            update: [root.head; MAX_LEVEL],
            rank: [0; MAX_LEVEL],
        };
        let mut x_page = root.head;
        let mut x: SkipNode = cache.get(root.head)?;
        let top = root.level as usize;
        for i in (0..top).rev() {
            descent.rank[i] = if i + 1 == top { 0 } else { descent.rank[i + 1] };
            while let Some(next) = x.levels[i].right.as_option() {
                let candidate: SkipNode = cache.get(next)?;
                if !passes(cache, &candidate, score, value, inclusive)? {
                    break;
                }
                descent.rank[i] += x.levels[i].span;
                x_page = next;
                x = candidate;
            }
            descent.update[i] = x_page;
        }
        Ok((descent, x))
    }

    /// Inserts `value` under `score` and returns the new node's page.
    pub fn insert(&self, cache: &mut PageCache, score: f64, value: &[u8]) -> Result<PageId> {
        check_score(score)?;
        let mut root = self.descriptor(cache)?;
        let (mut descent, _) = self.descend(cache, &root, score, Some(value), false)?;

        let level = random_level(cache.rng());
        let current = root.level as usize;
        if level > current {
            let mut head: SkipNode = cache.get(root.head)?;
            for i in current..level {
                descent.rank[i] = 0;
                descent.update[i] = root.head;
                head.levels[i].span = root.size;
            }
            cache.put(root.head, head)?;
            root.level = level as u32;
        }

        let value_page = blob::store(cache, value)?;
        let node_page = cache.alloc_page()?;
        let mut node = SkipNode {
            value: value_page,
            score,
            left: PageId::NONE,
            levels: vec![SkipLevel::default(); level],
        };
        let rank0 = descent.rank[0];
        for i in 0..level {
            let prev_page = descent.update[i];
            let mut prev: SkipNode = cache.get(prev_page)?;
            let crossed = rank0 - descent.rank[i];
            node.levels[i].right = prev.levels[i].right;
            node.levels[i].span = prev.levels[i].span - crossed;
            prev.levels[i].right = node_page;
            prev.levels[i].span = crossed + 1;
            cache.put(prev_page, prev)?;
        }
        for i in level..root.level as usize {
            let prev_page = descent.update[i];
            let mut prev: SkipNode = cache.get(prev_page)?;
            prev.levels[i].span += 1;
            cache.put(prev_page, prev)?;
        }

        if descent.update[0] != root.head {
            node.left = descent.update[0];
        }
        match node.right().as_option() {
            Some(right_page) => {
                let mut right: SkipNode = cache.get(right_page)?;
                right.left = node_page;
                cache.put(right_page, right)?;
            }
            None => root.tail = node_page,
        }
        cache.put(node_page, node)?;
        root.size += 1;
        cache.put(self.root_page, root)?;
        Ok(node_page)
    }

    /// Removes the element matching `score` and `value` exactly.
    ///
    /// Returns [`Rebalance::Emptied`] when the index is left without elements;
    /// the caller owns deleting the key that references it.
    pub fn delete(&self, cache: &mut PageCache, score: f64, value: &[u8]) -> Result<Rebalance> {
        check_score(score)?;
        let mut root = self.descriptor(cache)?;
        let (descent, before) = self.descend(cache, &root, score, Some(value), false)?;
        let x_page = before.right().as_option().ok_or(StoreError::NotFound)?;
        let x: SkipNode = cache.get(x_page)?;
        if x.score != score || blob::compare(cache, x.value, value)? != Ordering::Equal {
            return Err(StoreError::NotFound);
        }

        for i in 0..root.level as usize {
            let prev_page = descent.update[i];
            let mut prev: SkipNode = cache.get(prev_page)?;
            if prev.levels[i].right == x_page {
                prev.levels[i].span = prev.levels[i].span + x.levels[i].span - 1;
                prev.levels[i].right = x.levels[i].right;
            } else {
                prev.levels[i].span -= 1;
            }
            cache.put(prev_page, prev)?;
        }
        match x.right().as_option() {
            Some(right_page) => {
                let mut right: SkipNode = cache.get(right_page)?;
                right.left = x.left;
                cache.put(right_page, right)?;
            }
            None => root.tail = x.left,
        }

        let head: SkipNode = cache.get(root.head)?;
        while root.level > 1 && head.levels[root.level as usize - 1].right.is_none() {
            root.level -= 1;
        }
        blob::free(cache, x.value)?;
        cache.free_page(x_page)?;
        root.size -= 1;
        cache.put(self.root_page, root)?;
        Ok(if root.size == 0 {
            Rebalance::Emptied
        } else {
            Rebalance::Ok
        })
    }

    /// Finds the boundary node for `score` under `mode`.
    ///
    /// Returns the node page, the node and its zero-based rank, or `NotFound`
    /// when no node satisfies the boundary.
    pub fn first_node(
        &self,
        cache: &mut PageCache,
        score: f64,
        mode: RangeMode,
        value: Option<&[u8]>,
    ) -> Result<(PageId, SkipNode, u64)> {
        check_score(score)?;
        let root = self.descriptor(cache)?;
        let inclusive = matches!(mode, RangeMode::UpTo | RangeMode::Exclude);
        let (descent, last) = self.descend(cache, &root, score, value, inclusive)?;
        let passed = descent.rank[0];
        match mode {
            RangeMode::Include | RangeMode::Exclude => {
                let page = last.right().as_option().ok_or(StoreError::NotFound)?;
                let node = cache.get(page)?;
                Ok((page, node, passed))
            }
            RangeMode::Before | RangeMode::UpTo => {
                if passed == 0 {
                    return Err(StoreError::NotFound);
                }
                Ok((descent.update[0], last, passed - 1))
            }
        }
    }

    /// Node at zero-based `rank`; negative ranks count back from the tail.
    pub fn node_by_rank(&self, cache: &mut PageCache, rank: i64) -> Result<(PageId, SkipNode)> {
        let root = self.descriptor(cache)?;
        let size = root.size as i64;
        let rank = if rank < 0 { rank + size } else { rank };
        if rank < 0 || rank >= size {
            return Err(StoreError::NotFound);
        }
        let target = rank as u64 + 1;
        let mut traversed = 0u64;
        let mut x_page = root.head;
        let mut x: SkipNode = cache.get(root.head)?;
        for i in (0..root.level as usize).rev() {
            while let Some(next) = x.levels[i].right.as_option() {
                if traversed + x.levels[i].span > target {
                    break;
                }
                traversed += x.levels[i].span;
                x_page = next;
                x = cache.get(next)?;
            }
            if traversed == target {
                return Ok((x_page, x));
            }
        }
        Err(StoreError::Corruption("skip index spans disagree with size"))
    }

    /// Up to `count` nodes starting at `start` and walking level 0 in `direction`.
    pub fn iter(
        &self,
        cache: &mut PageCache,
        start: PageId,
        direction: Direction,
        count: usize,
    ) -> Result<Vec<(PageId, SkipNode)>> {
        let mut out = Vec::new();
        let mut cursor = start;
        while out.len() < count {
            let Some(page) = cursor.as_option() else {
                break;
            };
            let node: SkipNode = cache.get(page)?;
            cursor = match direction {
                Direction::Forward => node.right(),
                Direction::Backward => node.left,
            };
            out.push((page, node));
        }
        Ok(out)
    }

    /// Frees every node, its blob, the head and the descriptor.
    pub fn destroy(self, cache: &mut PageCache) -> Result<()> {
        let root = self.descriptor(cache)?;
        let head: SkipNode = cache.get(root.head)?;
        let mut cursor = head.right();
        while let Some(page) = cursor.as_option() {
            let node: SkipNode = cache.get(page)?;
            blob::free(cache, node.value)?;
            cache.free_page(page)?;
            cursor = node.right();
        }
        cache.free_page(root.head)?;
        cache.free_page(self.root_page)
    }

    /// Audits ordering, spans at every level, back links, tail and size.
    pub fn is_balanced(&self, cache: &mut PageCache) -> Result<bool> {
        let root = self.descriptor(cache)?;
        let head: SkipNode = cache.get(root.head)?;
        let level = root.level as usize;
        if head.levels.len() != MAX_LEVEL || level == 0 || level > MAX_LEVEL {
            return Ok(false);
        }
        if level > 1 && head.levels[level - 1].right.is_none() {
            return Ok(false);
        }
        if head.levels[level..].iter().any(|l| !l.right.is_none()) {
            return Ok(false);
        }

        let mut ranks = std::collections::HashMap::new();
        let mut previous: Option<(PageId, f64, Vec<u8>)> = None;
        let mut cursor = head.right();
        let mut position = 0u64;
        while let Some(page) = cursor.as_option() {
            position += 1;
            if position > root.size {
                return Ok(false);
            }
            let node: SkipNode = cache.get(page)?;
            let bytes = blob::read(cache, node.value)?;
            match &previous {
                None => {
                    if !node.left.is_none() {
                        return Ok(false);
                    }
                }
                Some((prev_page, prev_score, prev_bytes)) => {
                    if node.left != *prev_page
                        || node.score < *prev_score
                        || (node.score == *prev_score && bytes < *prev_bytes)
                    {
                        return Ok(false);
                    }
                }
            }
            ranks.insert(page, position);
            cursor = node.right();
            previous = Some((page, node.score, bytes));
        }
        if position != root.size {
            return Ok(false);
        }
        let last = previous.map(|(page, _, _)| page).unwrap_or(PageId::NONE);
        if last != root.tail {
            return Ok(false);
        }

        for i in 0..level {
            let mut at = 0u64;
            let mut node = head.clone();
            loop {
                let Some(link) = node.levels.get(i) else {
                    return Ok(false);
                };
                let reached = at + link.span;
                match link.right.as_option() {
                    None => {
                        if reached != root.size {
                            return Ok(false);
                        }
                        break;
                    }
                    Some(next) => {
                        if ranks.get(&next) != Some(&reached) {
                            return Ok(false);
                        }
                        at = reached;
                        node = cache.get(next)?;
                    }
                }
            }
        }
        Ok(true)
    }
}
