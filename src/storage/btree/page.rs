use crate::primitives::bytes::buf::{Reader, Writer};
use crate::storage::codec::FixedCodec;
use crate::storage::object::{ensure_fits, PageCodec, PageKind};
use crate::types::{PageId, Result, StoreError};

const NODE_HEADER_LEN: usize = 5;
const CHILD_LEN: usize = 8;

/// Tree descriptor page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreeRoot {
    /// Root node page.
    pub root: PageId,
    /// Levels from root to leaves; a lone leaf root has height 1.
    pub height: u32,
    /// Number of stored entries.
    pub len: u64,
    /// Maximum keys per node.
    pub max_node_size: u32,
}

impl PageCodec for TreeRoot {
    const KIND: PageKind = PageKind::TreeRoot;

    fn encode(&self, page: &mut [u8]) -> Result<()> {
        let mut w = Writer::new(page);
        w.u64(self.root.0);
        w.u32(self.height);
        w.u64(self.len);
        w.u32(self.max_node_size);
        Ok(())
    }

    fn decode(page: &[u8]) -> Result<Self> {
        let mut r = Reader::new(page);
        Ok(Self {
            root: PageId(r.u64()?),
            height: r.u32()?,
            len: r.u64()?,
            max_node_size: r.u32()?,
        })
    }
}

/// Tree node: sorted keys plus leaf values or `keys.len() + 1` children.
#[derive(Clone, Debug, PartialEq)]
pub struct TreeNode<K, V> {
    /// Leaf flag.
    pub leaf: bool,
    /// Sorted keys; in internal nodes these are separators.
    pub keys: Vec<K>,
    /// Values, leaves only.
    pub values: Vec<V>,
    /// Children, internal nodes only.
    pub children: Vec<PageId>,
}

impl<K: FixedCodec, V: FixedCodec> TreeNode<K, V> {
    /// Empty leaf.
    pub fn leaf() -> Self {
        Self {
            leaf: true,
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Internal node with a single separator.
    pub fn internal(key: K, left: PageId, right: PageId) -> Self {
        Self {
            leaf: false,
            keys: vec![key],
            values: Vec::new(),
            children: vec![left, right],
        }
    }

    fn encoded_len(&self) -> usize {
        let n = self.keys.len();
        let tail = if self.leaf {
            n * V::WIDTH
        } else {
            (n + 1) * CHILD_LEN
        };
        NODE_HEADER_LEN + n * K::WIDTH + tail
    }
}

/// Largest node fan-out whose leaves and internal nodes both fit `page_size`.
pub fn max_node_size_for<K: FixedCodec, V: FixedCodec>(page_size: usize) -> u32 {
    let body = page_size - NODE_HEADER_LEN;
    let leaf = body / (K::WIDTH + V::WIDTH).max(1);
    let internal = (body - CHILD_LEN) / (K::WIDTH + CHILD_LEN);
    leaf.min(internal) as u32
}

impl<K: FixedCodec, V: FixedCodec> PageCodec for TreeNode<K, V> {
    const KIND: PageKind = PageKind::TreeNode;

    fn encode(&self, page: &mut [u8]) -> Result<()> {
        ensure_fits(self.encoded_len(), page.len(), "tree node overflows page")?;
        let expected_tail = if self.leaf {
            self.values.len() == self.keys.len()
        } else {
            self.children.len() == self.keys.len() + 1
        };
        if !expected_tail {
            return Err(StoreError::Invalid("tree node arity mismatch"));
        }
        let mut w = Writer::new(page);
        w.u8(u8::from(self.leaf));
        w.u32(self.keys.len() as u32);
        for key in &self.keys {
            key.put(w.slot(K::WIDTH));
        }
        if self.leaf {
            for value in &self.values {
                value.put(w.slot(V::WIDTH));
            }
        } else {
            for child in &self.children {
                w.u64(child.0);
            }
        }
        Ok(())
    }

    fn decode(page: &[u8]) -> Result<Self> {
        let mut r = Reader::new(page);
        let leaf = match r.u8()? {
            0 => false,
            1 => true,
            _ => return Err(StoreError::Corruption("tree node flag")),
        };
        let n = r.u32()? as usize;
        let mut node = Self {
            leaf,
            keys: Vec::with_capacity(n),
            values: Vec::new(),
            children: Vec::new(),
        };
        for _ in 0..n {
            node.keys.push(K::get(r.take(K::WIDTH)?)?);
        }
        if leaf {
            node.values.reserve(n);
            for _ in 0..n {
                node.values.push(V::get(r.take(V::WIDTH)?)?);
            }
        } else {
            node.children.reserve(n + 1);
            for _ in 0..=n {
                node.children.push(PageId(r.u64()?));
            }
        }
        Ok(node)
    }
}
