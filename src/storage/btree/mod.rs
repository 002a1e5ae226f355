#![forbid(unsafe_code)]

//! Fixed-width-key B+ tree stored one node per page.
//!
//! Values live in leaves only; internal separators satisfy
//! `left < separator <= right`. Nodes split when they exceed `max_node_size`
//! keys and borrow from or merge with a sibling when they fall below half of it.

/// Node and descriptor page formats.
pub mod page;

use std::marker::PhantomData;
use std::mem;

use rand::Rng;
use smallvec::SmallVec;

use super::cache::PageCache;
use super::codec::FixedCodec;
use super::Rebalance;
use crate::types::{PageId, Result, StoreError};
pub use page::{max_node_size_for, TreeNode, TreeRoot};


/// Keys usable in a [`BTree`].
pub trait TreeKey: FixedCodec + Ord {}

impl<T: FixedCodec + Ord> TreeKey for T {}

/// Outcome of [`BTree::add`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Added {
    /// Inserted.
    Ok,
    /// The key was already present; nothing changed.
    Found,
}

type Path = SmallVec<[(PageId, usize); 8]>;

/// Handle to a tree whose descriptor lives at `root_page`.
///
/// Holds no page data; every call resolves pages through the cache.
pub struct BTree<K, V> {
    root_page: PageId,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for BTree<K, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, V> Copy for BTree<K, V> {}

impl<K, V> std::fmt::Debug for BTree<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTree")
            .field("root_page", &self.root_page)
            .finish()
    }
}

fn child_index<K: Ord>(keys: &[K], key: &K) -> usize {
    keys.partition_point(|k| k <= key)
}

impl<K: TreeKey, V: FixedCodec> BTree<K, V> {
    /// Creates an empty tree with the largest fan-out the page size allows.
    pub fn create(cache: &mut PageCache) -> Result<Self> {
        let fanout = max_node_size_for::<K, V>(cache.page_size());
        Self::create_with_fanout(cache, fanout)
    }

    /// Creates an empty tree with at most `max_node_size` keys per node.
    pub fn create_with_fanout(cache: &mut PageCache, max_node_size: u32) -> Result<Self> {
        if max_node_size < 3 {
            return Err(StoreError::Invalid("tree fan-out must be at least 3"));
        }
        if max_node_size > max_node_size_for::<K, V>(cache.page_size()) {
            return Err(StoreError::Invalid("tree fan-out exceeds page capacity"));
        }
        let root_page = cache.alloc_page()?;
        let leaf_page = cache.alloc_page()?;
        cache.put(leaf_page, TreeNode::<K, V>::leaf())?;
        cache.put(
            root_page,
            TreeRoot {
                root: leaf_page,
                height: 1,
                len: 0,
                max_node_size,
            },
        )?;
        Ok(Self::open(root_page))
    }

    /// Attaches to an existing tree.
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

    /// Reads the descriptor.
    pub fn descriptor(&self, cache: &mut PageCache) -> Result<TreeRoot> {
        cache.get(self.root_page)
    }

    /// Number of entries.
    pub fn len(&self, cache: &mut PageCache) -> Result<u64> {
        Ok(self.descriptor(cache)?.len)
    }

    /// True when the tree holds no entries.
    pub fn is_empty(&self, cache: &mut PageCache) -> Result<bool> {
        Ok(self.len(cache)? == 0)
    }

    fn descend(
        &self,
        cache: &mut PageCache,
        desc: &TreeRoot,
        key: &K,
    ) -> Result<(Path, PageId, TreeNode<K, V>)> {
        let mut path = Path::new();
        let mut page = desc.root;
        let mut node: TreeNode<K, V> = cache.get(page)?;
        while !node.leaf {
            let idx = child_index(&node.keys, key);
            path.push((page, idx));
            page = *node
                .children
                .get(idx)
                .ok_or(StoreError::Corruption("tree node missing child"))?;
            node = cache.get(page)?;
        }
        Ok((path, page, node))
    }

    /// Looks up `key`.
    pub fn find(&self, cache: &mut PageCache, key: &K) -> Result<V> {
        let desc = self.descriptor(cache)?;
        let (_, _, leaf) = self.descend(cache, &desc, key)?;
        match leaf.keys.binary_search(key) {
            Ok(pos) => Ok(leaf.values[pos].clone()),
            Err(_) => Err(StoreError::NotFound),
        }
    }

    /// Inserts `key`; an existing key is left untouched and reported as `Found`.
    pub fn add(&self, cache: &mut PageCache, key: K, value: V) -> Result<Added> {
        let mut desc = self.descriptor(cache)?;
        let (path, page, mut leaf) = self.descend(cache, &desc, &key)?;
        let pos = match leaf.keys.binary_search(&key) {
            Ok(_) => return Ok(Added::Found),
            Err(pos) => pos,
        };
        leaf.keys.insert(pos, key);
        leaf.values.insert(pos, value);
        desc.len += 1;
        self.rebalance_after_insert(cache, &mut desc, path, page, leaf)?;
        cache.put(self.root_page, desc)?;
        Ok(Added::Ok)
    }

    /// Inserts or overwrites `key`, returning the previous value.
    pub fn replace(&self, cache: &mut PageCache, key: K, value: V) -> Result<Option<V>> {
        let desc = self.descriptor(cache)?;
        let (_, page, mut leaf) = self.descend(cache, &desc, &key)?;
        match leaf.keys.binary_search(&key) {
            Ok(pos) => {
                let old = mem::replace(&mut leaf.values[pos], value);
                cache.put(page, leaf)?;
                Ok(Some(old))
            }
            Err(_) => {
                self.add(cache, key, value)?;
                Ok(None)
            }
        }
    }

    fn rebalance_after_insert(
        &self,
        cache: &mut PageCache,
        desc: &mut TreeRoot,
        mut path: Path,
        mut page: PageId,
        mut node: TreeNode<K, V>,
    ) -> Result<()> {
        let max = desc.max_node_size as usize;
        loop {
            if node.keys.len() <= max {
                return cache.put(page, node);
            }
            let (separator, right) = split(&mut node);
            let right_page = cache.alloc_page()?;
            cache.put(page, node)?;
            cache.put(right_page, right)?;
            match path.pop() {
                Some((parent_page, idx)) => {
                    let mut parent: TreeNode<K, V> = cache.get(parent_page)?;
                    parent.keys.insert(idx, separator);
                    parent.children.insert(idx + 1, right_page);
                    page = parent_page;
                    node = parent;
                }
                None => {
                    let new_root = cache.alloc_page()?;
                    cache.put(new_root, TreeNode::<K, V>::internal(separator, page, right_page))?;
                    desc.root = new_root;
                    desc.height += 1;
                    return Ok(());
                }
            }
        }
    }

    /// Removes `key`, returning its value and whether the tree became empty.
    pub fn remove(&self, cache: &mut PageCache, key: &K) -> Result<(V, Rebalance)> {
        let mut desc = self.descriptor(cache)?;
        let (path, page, mut leaf) = self.descend(cache, &desc, key)?;
        let pos = leaf
            .keys
            .binary_search(key)
            .map_err(|_| StoreError::NotFound)?;
        leaf.keys.remove(pos);
        let value = leaf.values.remove(pos);
        desc.len -= 1;
        let outcome = self.rebalance_after_remove(cache, &mut desc, path, page, leaf)?;
        cache.put(self.root_page, desc)?;
        if desc.len == 0 {
            Ok((value, Rebalance::Emptied))
        } else {
            Ok((value, outcome))
        }
    }

    fn rebalance_after_remove(
        &self,
        cache: &mut PageCache,
        desc: &mut TreeRoot,
        mut path: Path,
        mut page: PageId,
        mut node: TreeNode<K, V>,
    ) -> Result<Rebalance> {
        let min = desc.max_node_size as usize / 2;
        let mut outcome = Rebalance::Ok;
        loop {
            let Some((parent_page, idx)) = path.pop() else {
                if !node.leaf && node.keys.is_empty() {
                    desc.root = node.children[0];
                    desc.height -= 1;
                    cache.free_page(page)?;
                } else {
                    cache.put(page, node)?;
                }
                return Ok(outcome);
            };
            if node.keys.len() >= min {
                cache.put(page, node)?;
                return Ok(outcome);
            }
            let mut parent: TreeNode<K, V> = cache.get(parent_page)?;
            if idx > 0 {
                let left_page = parent.children[idx - 1];
                let mut left: TreeNode<K, V> = cache.get(left_page)?;
                if left.keys.len() > min {
                    borrow_from_left(&mut left, &mut node, &mut parent.keys[idx - 1]);
                    cache.put(left_page, left)?;
                    cache.put(page, node)?;
                    cache.put(parent_page, parent)?;
                    return Ok(outcome);
                }
                let separator = parent.keys.remove(idx - 1);
                parent.children.remove(idx);
                merge(&mut left, node, separator);
                cache.put(left_page, left)?;
                cache.free_page(page)?;
            } else {
                let right_page = parent.children[idx + 1];
                let mut right: TreeNode<K, V> = cache.get(right_page)?;
                if right.keys.len() > min {
                    borrow_from_right(&mut node, &mut right, &mut parent.keys[idx]);
                    cache.put(right_page, right)?;
                    cache.put(page, node)?;
                    cache.put(parent_page, parent)?;
                    return Ok(outcome);
                }
                let separator = parent.keys.remove(idx);
                parent.children.remove(idx + 1);
                merge(&mut node, right, separator);
                cache.put(page, node)?;
                cache.free_page(right_page)?;
            }
            outcome = Rebalance::Merged;
            page = parent_page;
            node = parent;
        }
    }

    /// In-order cursor over all entries.
    pub fn iter(&self, cache: &mut PageCache) -> Result<TreeIter<K, V>> {
        let desc = self.descriptor(cache)?;
        let root: TreeNode<K, V> = cache.get(desc.root)?;
        Ok(TreeIter {
            stack: vec![(root, 0)],
        })
    }

    /// Collects every entry in key order.
    pub fn entries(&self, cache: &mut PageCache) -> Result<Vec<(K, V)>> {
        let mut iter = self.iter(cache)?;
        let mut out = Vec::new();
        while let Some(entry) = iter.next(cache)? {
            out.push(entry);
        }
        Ok(out)
    }

    /// Picks an entry by choosing a uniformly random child at every level.
    ///
    /// Entries in sparse subtrees are favoured; that bias is accepted to keep
    /// the pick at one root-to-leaf descent.
    pub fn random_element(&self, cache: &mut PageCache) -> Result<(K, V)> {
        let desc = self.descriptor(cache)?;
        if desc.len == 0 {
            return Err(StoreError::NotFound);
        }
        let mut node: TreeNode<K, V> = cache.get(desc.root)?;
        while !node.leaf {
            let idx = cache.rng().gen_range(0..node.children.len());
            node = cache.get(node.children[idx])?;
        }
        if node.keys.is_empty() {
            return Err(StoreError::Corruption("empty leaf in non-empty tree"));
        }
        let idx = cache.rng().gen_range(0..node.keys.len());
        Ok((node.keys[idx].clone(), node.values[idx].clone()))
    }

    /// Frees every node and the descriptor.
    pub fn destroy(self, cache: &mut PageCache) -> Result<()> {
        let desc = self.descriptor(cache)?;
        let mut pending = vec![desc.root];
        while let Some(page) = pending.pop() {
            let node: TreeNode<K, V> = cache.get(page)?;
            pending.extend(node.children.iter().copied());
            cache.free_page(page)?;
        }
        cache.free_page(self.root_page)
    }

    /// Audits ordering, separator bounds, fill factors, leaf depth and the entry count.
    pub fn is_balanced(&self, cache: &mut PageCache) -> Result<bool> {
        let desc = self.descriptor(cache)?;
        let mut audit = Audit {
            desc,
            min: desc.max_node_size as usize / 2,
            count: 0,
        };
        let ok = audit.node::<K, V>(cache, desc.root, 1, None, None)?;
        Ok(ok && audit.count == desc.len)
    }
}

struct Audit {
    desc: TreeRoot,
    min: usize,
    count: u64,
}

impl Audit {
    fn node<K: TreeKey, V: FixedCodec>(
        &mut self,
        cache: &mut PageCache,
        page: PageId,
        depth: u32,
        lower: Option<&K>,
        upper: Option<&K>,
    ) -> Result<bool> {
        let node: TreeNode<K, V> = cache.get(page)?;
        let is_root = page == self.desc.root;
        let n = node.keys.len();
        if n > self.desc.max_node_size as usize || (!is_root && n < self.min) {
            return Ok(false);
        }
        if node.keys.windows(2).any(|w| w[0] >= w[1]) {
            return Ok(false);
        }
        if let (Some(lo), Some(first)) = (lower, node.keys.first()) {
            if first < lo {
                return Ok(false);
            }
        }
        if let (Some(hi), Some(last)) = (upper, node.keys.last()) {
            if last >= hi {
                return Ok(false);
            }
        }
        if node.leaf {
            self.count += n as u64;
            return Ok(depth == self.desc.height && node.values.len() == n);
        }
        if node.children.len() != n + 1 || (is_root && n == 0) {
            return Ok(false);
        }
        for (i, &child) in node.children.iter().enumerate() {
            let lo = if i == 0 { lower } else { Some(&node.keys[i - 1]) };
            let hi = if i == n { upper } else { Some(&node.keys[i]) };
            if !self.node::<K, V>(cache, child, depth + 1, lo, hi)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn split<K: TreeKey, V: FixedCodec>(node: &mut TreeNode<K, V>) -> (K, TreeNode<K, V>) {
    let mid = node.keys.len() / 2;
    if node.leaf {
        let keys = node.keys.split_off(mid);
        let values = node.values.split_off(mid);
        let separator = keys[0].clone();
        (
            separator,
            TreeNode {
                leaf: true,
                keys,
                values,
                children: Vec::new(),
            },
        )
    } else {
        let keys = node.keys.split_off(mid + 1);
        let children = node.children.split_off(mid + 1);
        let separator = node.keys.remove(mid);
        (
            separator,
            TreeNode {
                leaf: false,
                keys,
                values: Vec::new(),
                children,
            },
        )
    }
}

fn borrow_from_left<K: TreeKey, V: FixedCodec>(
    left: &mut TreeNode<K, V>,
    node: &mut TreeNode<K, V>,
    separator: &mut K,
) {
    let last = left.keys.len() - 1;
    let key = left.keys.remove(last);
    if node.leaf {
        node.keys.insert(0, key);
        node.values.insert(0, left.values.remove(last));
        *separator = node.keys[0].clone();
    } else {
        node.keys.insert(0, mem::replace(separator, key));
        node.children.insert(0, left.children.remove(last + 1));
    }
}

fn borrow_from_right<K: TreeKey, V: FixedCodec>(
    node: &mut TreeNode<K, V>,
    right: &mut TreeNode<K, V>,
    separator: &mut K,
) {
    let key = right.keys.remove(0);
    if node.leaf {
        node.keys.push(key);
        node.values.push(right.values.remove(0));
        *separator = right.keys[0].clone();
    } else {
        node.keys.push(mem::replace(separator, key));
        node.children.push(right.children.remove(0));
    }
}

fn merge<K: TreeKey, V: FixedCodec>(
    left: &mut TreeNode<K, V>,
    right: TreeNode<K, V>,
    separator: K,
) {
    if !left.leaf {
        left.keys.push(separator);
        left.children.extend(right.children);
    }
    left.keys.extend(right.keys);
    left.values.extend(right.values);
}

/// Lazy in-order walk; each step may fault pages through the cache.
pub struct TreeIter<K, V> {
    stack: Vec<(TreeNode<K, V>, usize)>,
}

impl<K: TreeKey, V: FixedCodec> TreeIter<K, V> {
    /// Next entry, or `None` when exhausted.
    pub fn next(&mut self, cache: &mut PageCache) -> Result<Option<(K, V)>> {
        loop {
            let Some((node, idx)) = self.stack.last_mut() else {
                return Ok(None);
            };
            if node.leaf {
                if *idx < node.keys.len() {
                    let entry = (node.keys[*idx].clone(), node.values[*idx].clone());
                    *idx += 1;
                    return Ok(Some(entry));
                }
                self.stack.pop();
            } else if *idx < node.children.len() {
                let child = node.children[*idx];
                *idx += 1;
                let child_node: TreeNode<K, V> = cache.get(child)?;
                self.stack.push((child_node, 0));
            } else {
                self.stack.pop();
            }
        }
    }
}
