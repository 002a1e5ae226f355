//! Sorted-set commands.
//!
//! A value is a [`SortedSetRoot`]: the skip index orders `(score, member)`
//! pairs and owns the member blobs, the member tree maps a member digest to
//! its score and to the blob held by its skip node.

use std::ops::Bound;

use crate::storage::cache::PageCache;
use crate::storage::codec::MemberScore;
use crate::storage::keys::{KeyKind, SortedSetRoot};
use crate::storage::skiplist::{RangeMode, SkipList, SkipNode};
use crate::storage::{Direction, Rebalance};
use crate::types::checksum::key_digest;
use crate::types::{PageId, Result, StoreError};

use super::{optional, window, Db};

/// Outcome of placing a member.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Placed {
    Added,
    Moved,
    Unchanged,
}

fn check_score(score: f64) -> Result<()> {
    if score.is_nan() {
        return Err(StoreError::Invalid("score is not a number"));
    }
    Ok(())
}

/// Inserts `member` at `score`, moving it when it already holds another score.
fn place(
    cache: &mut PageCache,
    root: &SortedSetRoot,
    member: &[u8],
    score: f64,
) -> Result<Placed> {
    let digest = key_digest(member);
    let previous = optional(root.members().find(cache, &digest))?;
    if let Some(previous) = previous {
        if previous.score == score {
            return Ok(Placed::Unchanged);
        }
        root.ranks().delete(cache, previous.score, member)?;
    }
    let node_page = root.ranks().insert(cache, score, member)?;
    let node: SkipNode = cache.get(node_page)?;
    root.members().replace(
        cache,
        digest,
        MemberScore {
            score,
            member: node.value,
        },
    )?;
    Ok(match previous {
        Some(_) => Placed::Moved,
        None => Placed::Added,
    })
}

/// First node inside `min..max` and the number of nodes in that window.
fn score_window(
    cache: &mut PageCache,
    ranks: SkipList,
    min: Bound<f64>,
    max: Bound<f64>,
) -> Result<Option<(PageId, u64)>> {
    let (low, low_mode) = match min {
        Bound::Included(score) => (score, RangeMode::Include),
        Bound::Excluded(score) => (score, RangeMode::Exclude),
        Bound::Unbounded => (f64::NEG_INFINITY, RangeMode::Include),
    };
    let (high, high_mode) = match max {
        Bound::Included(score) => (score, RangeMode::UpTo),
        Bound::Excluded(score) => (score, RangeMode::Before),
        Bound::Unbounded => (f64::INFINITY, RangeMode::UpTo),
    };
    let Some((first, _, low_rank)) = optional(ranks.first_node(cache, low, low_mode, None))?
    else {
        return Ok(None);
    };
    let Some((_, _, high_rank)) = optional(ranks.first_node(cache, high, high_mode, None))?
    else {
        return Ok(None);
    };
    if high_rank < low_rank {
        return Ok(None);
    }
    Ok(Some((first, high_rank - low_rank + 1)))
}

/// Parses a score bound in command syntax: `1.5`, `(1.5` for an exclusive
/// bound, `-inf` or `+inf`.
pub fn parse_score_bound(text: &str) -> Result<Bound<f64>> {
    let (exclusive, number) = match text.strip_prefix('(') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let score: f64 = number
        .parse()
        .map_err(|_| StoreError::Invalid("score bound is not a number"))?;
    check_score(score)?;
    Ok(if exclusive {
        Bound::Excluded(score)
    } else {
        Bound::Included(score)
    })
}

impl Db {
    fn zset(&mut self, key: &[u8]) -> Result<Option<SortedSetRoot>> {
        match self.value_page(key, KeyKind::SortedSet)? {
            Some(page) => self.cache.get(page).map(Some),
            None => Ok(None),
        }
    }

    fn scored(
        &mut self,
        ranks: SkipList,
        nodes: Vec<(PageId, SkipNode)>,
    ) -> Result<Vec<(Vec<u8>, f64)>> {
        let mut out = Vec::with_capacity(nodes.len());
        for (_, node) in nodes {
            out.push((ranks.value(&mut self.cache, &node)?, node.score));
        }
        Ok(out)
    }

    /// Sets the score of `member`, adding it when absent.
    ///
    /// Returns true when the member is new. Re-adding a member with a new
    /// score moves it.
    pub fn zadd(&mut self, key: &[u8], score: f64, member: &[u8]) -> Result<bool> {
        check_score(score)?;
        let existing = self.value_page(key, KeyKind::SortedSet)?;
        let page = match existing {
            Some(page) => page,
            None => SortedSetRoot::create(&mut self.cache)?,
        };
        let root: SortedSetRoot = self.cache.get(page)?;
        let placed = place(&mut self.cache, &root, member, score)?;
        match (existing, placed) {
            (None, _) => {
                self.set(key, KeyKind::SortedSet, page, 0)?;
            }
            (Some(_), Placed::Unchanged) => {}
            (Some(_), _) => {
                self.touch(key)?;
            }
        }
        Ok(placed == Placed::Added)
    }

    /// Adds `delta` to the score of `member`, treating a missing member as 0.
    /// Returns the new score.
    pub fn zincrby(&mut self, key: &[u8], delta: f64, member: &[u8]) -> Result<f64> {
        let score = self.zscore(key, member)?.unwrap_or(0.0) + delta;
        if score.is_nan() {
            return Err(StoreError::Invalid("resulting score is not a number"));
        }
        self.zadd(key, score, member)?;
        Ok(score)
    }

    /// Score of `member`.
    pub fn zscore(&mut self, key: &[u8], member: &[u8]) -> Result<Option<f64>> {
        let Some(root) = self.zset(key)? else {
            return Ok(None);
        };
        let found = optional(root.members().find(&mut self.cache, &key_digest(member)))?;
        Ok(found.map(|entry| entry.score))
    }

    /// Zero-based position of `member` in ascending `(score, member)` order.
    pub fn zrank(&mut self, key: &[u8], member: &[u8]) -> Result<Option<u64>> {
        let Some(root) = self.zset(key)? else {
            return Ok(None);
        };
        let Some(entry) = optional(root.members().find(&mut self.cache, &key_digest(member)))?
        else {
            return Ok(None);
        };
        let (_, _, rank) =
            root.ranks()
                .first_node(&mut self.cache, entry.score, RangeMode::Include, Some(member))?;
        Ok(Some(rank))
    }

    /// Member count; 0 for a missing key.
    pub fn zcard(&mut self, key: &[u8]) -> Result<u64> {
        match self.zset(key)? {
            Some(root) => root.members().len(&mut self.cache),
            None => Ok(0),
        }
    }

    /// Removes members, returning how many were present.
    pub fn zrem<M: AsRef<[u8]>>(&mut self, key: &[u8], members: &[M]) -> Result<u64> {
        let Some(root) = self.zset(key)? else {
            return Ok(0);
        };
        let mut removed = 0;
        let mut outcome = Rebalance::Ok;
        for member in members {
            let member = member.as_ref();
            let digest = key_digest(member);
            let Some((entry, _)) = optional(root.members().remove(&mut self.cache, &digest))?
            else {
                continue;
            };
            outcome = root.ranks().delete(&mut self.cache, entry.score, member)?;
            removed += 1;
            if outcome.is_emptied() {
                break;
            }
        }
        if removed > 0 {
            self.settle(key, outcome)?;
        }
        Ok(removed)
    }

    /// Members ranked `start..=stop` with their scores, lowest score first.
    /// Negative ranks count from the highest; bounds are clamped.
    pub fn zrange(&mut self, key: &[u8], start: i64, stop: i64) -> Result<Vec<(Vec<u8>, f64)>> {
        self.rank_window(key, start, stop, Direction::Forward)
    }

    /// Like [`Db::zrange`], with ranks counted from the highest score.
    pub fn zrevrange(&mut self, key: &[u8], start: i64, stop: i64) -> Result<Vec<(Vec<u8>, f64)>> {
        self.rank_window(key, start, stop, Direction::Backward)
    }

    fn rank_window(
        &mut self,
        key: &[u8],
        start: i64,
        stop: i64,
        direction: Direction,
    ) -> Result<Vec<(Vec<u8>, f64)>> {
        let Some(root) = self.zset(key)? else {
            return Ok(Vec::new());
        };
        let ranks = root.ranks();
        let len = ranks.len(&mut self.cache)?;
        let Some((first, last)) = window(start, stop, len) else {
            return Ok(Vec::new());
        };
        let origin = match direction {
            Direction::Forward => first,
            Direction::Backward => len - 1 - first,
        };
        let (page, _) = ranks.node_by_rank(&mut self.cache, origin as i64)?;
        let nodes = ranks.iter(&mut self.cache, page, direction, (last - first + 1) as usize)?;
        self.scored(ranks, nodes)
    }

    /// Members whose score lies between `min` and `max`, lowest first.
    ///
    /// See [`parse_score_bound`] for reading bounds in command syntax.
    pub fn zrangebyscore(
        &mut self,
        key: &[u8],
        min: Bound<f64>,
        max: Bound<f64>,
    ) -> Result<Vec<(Vec<u8>, f64)>> {
        let Some(root) = self.zset(key)? else {
            return Ok(Vec::new());
        };
        let ranks = root.ranks();
        match score_window(&mut self.cache, ranks, min, max)? {
            Some((first, count)) => {
                let count = count as usize;
                let nodes = ranks.iter(&mut self.cache, first, Direction::Forward, count)?;
                self.scored(ranks, nodes)
            }
            None => Ok(Vec::new()),
        }
    }

    /// Number of members whose score lies between `min` and `max`.
    pub fn zcount(&mut self, key: &[u8], min: Bound<f64>, max: Bound<f64>) -> Result<u64> {
        let Some(root) = self.zset(key)? else {
            return Ok(0);
        };
        let window = score_window(&mut self.cache, root.ranks(), min, max)?;
        Ok(window.map_or(0, |(_, count)| count))
    }
}
