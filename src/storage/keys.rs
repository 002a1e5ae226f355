//! Per-database key index.
//!
//! Each database maps `key_digest(key)` to a [`KeyRecord`] in a B+ tree whose
//! descriptor page is `database_roots[db]`. The tree is created by the first
//! write and destroyed when its last key goes away. Records carry a version
//! stamp that changes on every mutation, which is what [`WatchToken`]s compare.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use tracing::debug;

use super::blob;
use super::btree::BTree;
use super::cache::PageCache;
use super::codec::{FixedCodec, HashField, MemberScore};
use super::list::List;
use super::object::{PageCodec, PageKind};
use super::skiplist::SkipList;
use crate::primitives::bytes::buf::{Reader, Writer};
use crate::primitives::bytes::{get_u64, put_u64};
use crate::types::checksum::key_digest;
use crate::types::{Digest, PageId, Result, StoreError};

/// Kind of value a key holds, which fixes the layout behind `value_page`.
///
/// | kind | `value_page` points at |
/// |------|------------------------|
/// | `String` | a blob |
/// | `List` | a [`List<PageId>`] of element blobs |
/// | `Set` | a [`BTree<Digest, PageId>`] of member blobs |
/// | `Hash` | a [`BTree<Digest, HashField>`] |
/// | `SortedSet` | a [`SortedSetRoot`] |
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum KeyKind {
    /// Byte string.
    String = 1,
    /// Positional list.
    List = 2,
    /// Unordered member set.
    Set = 3,
    /// Members ordered by score.
    SortedSet = 4,
    /// Field to value map.
    Hash = 5,
}

impl KeyKind {
    fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            1 => Self::String,
            2 => Self::List,
            3 => Self::Set,
            4 => Self::SortedSet,
            5 => Self::Hash,
            _ => return Err(StoreError::Corruption("unknown key kind")),
        })
    }
}

/// Index entry for one key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyRecord {
    /// Value layout.
    pub kind: KeyKind,
    /// Blob with the raw key bytes.
    pub name_page: PageId,
    /// Root of the value.
    pub value_page: PageId,
    /// Unix milliseconds after which the key is gone, or 0.
    pub expires_ms: u64,
    /// Mutation stamp; never 0 for a live key.
    pub version: u64,
}

impl KeyRecord {
    /// True when an expiry is set and `now_ms` is past it.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_ms != 0 && self.expires_ms <= now_ms
    }
}

impl FixedCodec for KeyRecord {
    const WIDTH: usize = 1 + 8 + 8 + 8 + 8;

    fn put(&self, dst: &mut [u8]) {
        dst[0] = self.kind as u8;
        put_u64(&mut dst[1..], self.name_page.0);
        put_u64(&mut dst[9..], self.value_page.0);
        put_u64(&mut dst[17..], self.expires_ms);
        put_u64(&mut dst[25..], self.version);
    }

    fn get(src: &[u8]) -> Result<Self> {
        if src.len() < Self::WIDTH {
            return Err(StoreError::Corruption("key record truncated"));
        }
        Ok(Self {
            kind: KeyKind::from_tag(src[0])?,
            name_page: PageId(get_u64(&src[1..])?),
            value_page: PageId(get_u64(&src[9..])?),
            expires_ms: get_u64(&src[17..])?,
            version: get_u64(&src[25..])?,
        })
    }
}

/// Sorted-set value: a skip index for rank order plus a member tree for lookup.
///
/// Member blobs are owned by the skip index; [`MemberScore::member`] points at
/// the same blob the skip node does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SortedSetRoot {
    /// Skip index descriptor.
    pub ranks: PageId,
    /// `BTree<Digest, MemberScore>` descriptor.
    pub members: PageId,
}

impl PageCodec for SortedSetRoot {
    const KIND: PageKind = PageKind::SortedSet;

    fn encode(&self, page: &mut [u8]) -> Result<()> {
        let mut w = Writer::new(page);
        w.u64(self.ranks.0);
        w.u64(self.members.0);
        Ok(())
    }

    fn decode(page: &[u8]) -> Result<Self> {
        let mut r = Reader::new(page);
        Ok(Self {
            ranks: PageId(r.u64()?),
            members: PageId(r.u64()?),
        })
    }
}

impl SortedSetRoot {
    /// Allocates an empty sorted set and returns its descriptor page.
    pub fn create(cache: &mut PageCache) -> Result<PageId> {
        let page = cache.alloc_page()?;
        let ranks = SkipList::create(cache)?.root_page();
        let members = BTree::<Digest, MemberScore>::create(cache)?.root_page();
        cache.put(page, SortedSetRoot { ranks, members })?;
        Ok(page)
    }

    /// Skip index handle.
    pub fn ranks(&self) -> SkipList {
        SkipList::open(self.ranks)
    }

    /// Member tree handle.
    pub fn members(&self) -> BTree<Digest, MemberScore> {
        BTree::open(self.members)
    }
}

/// Frees every page reachable from a value of `kind` rooted at `page`.
pub fn destroy_value(cache: &mut PageCache, kind: KeyKind, page: PageId) -> Result<()> {
    match kind {
        KeyKind::String => blob::free(cache, page),
        KeyKind::List => {
            let list = List::<PageId>::open(page);
            for element in list.to_vec(cache)? {
                blob::free(cache, element)?;
            }
            list.destroy(cache)
        }
        KeyKind::Set => {
            let tree = BTree::<Digest, PageId>::open(page);
            for (_, member) in tree.entries(cache)? {
                blob::free(cache, member)?;
            }
            tree.destroy(cache)
        }
        KeyKind::Hash => {
            let tree = BTree::<Digest, HashField>::open(page);
            for (_, entry) in tree.entries(cache)? {
                blob::free(cache, entry.field)?;
                blob::free(cache, entry.value)?;
            }
            tree.destroy(cache)
        }
        KeyKind::SortedSet => {
            let root: SortedSetRoot = cache.get(page)?;
            root.members().destroy(cache)?;
            root.ranks().destroy(cache)?;
            cache.free_page(page)
        }
    }
}

/// Wall-clock time in Unix milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn fresh_version(cache: &mut PageCache) -> u64 {
    loop {
        let version: u64 = cache.rng().gen();
        if version != 0 {
            return version;
        }
    }
}

fn bump(version: u64) -> u64 {
    match version.wrapping_add(1) {
        0 => 1,
        next => next,
    }
}

/// Snapshot of a key's version taken by [`Keyspace::watch`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct WatchToken {
    /// Digest of the watched key.
    pub digest: Digest,
    /// Version at watch time; 0 when the key did not exist.
    pub version: u64,
    /// Database index.
    pub db: usize,
}

/// Result of [`check_watch`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Every watched key still has its watched version.
    Ok,
    /// At least one watched key changed.
    Conflict,
}

impl WatchOutcome {
    /// Maps `Conflict` to [`StoreError::Conflict`].
    pub fn into_result(self) -> Result<()> {
        match self {
            WatchOutcome::Ok => Ok(()),
            WatchOutcome::Conflict => Err(StoreError::Conflict),
        }
    }
}

/// Compares each token against the current record, ignoring expiry.
pub fn check_watch(cache: &mut PageCache, tokens: &[WatchToken]) -> Result<WatchOutcome> {
    for token in tokens {
        let keyspace = Keyspace::new(cache, token.db)?;
        let current = keyspace
            .lookup(cache, &token.digest)?
            .map(|record| record.version)
            .unwrap_or(0);
        if current != token.version {
            debug!(db = token.db, digest = %token.digest, "keys.watch_conflict");
            return Ok(WatchOutcome::Conflict);
        }
    }
    Ok(WatchOutcome::Ok)
}

/// Key operations scoped to one database.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Keyspace {
    db: usize,
}

impl Keyspace {
    /// Binds to database `db`, which must exist in the header.
    pub fn new(cache: &PageCache, db: usize) -> Result<Self> {
        if db >= cache.meta().database_count() as usize {
            return Err(StoreError::Invalid("database index out of range"));
        }
        Ok(Self { db })
    }

    /// Database index.
    pub fn db(&self) -> usize {
        self.db
    }

    fn tree(&self, cache: &PageCache) -> Result<Option<BTree<Digest, KeyRecord>>> {
        Ok(cache.database_root(self.db)?.as_option().map(BTree::open))
    }

    fn tree_or_create(&self, cache: &mut PageCache) -> Result<BTree<Digest, KeyRecord>> {
        if let Some(tree) = self.tree(cache)? {
            return Ok(tree);
        }
        let tree = BTree::create(cache)?;
        cache.set_database_root(self.db, tree.root_page())?;
        Ok(tree)
    }

    fn lookup(&self, cache: &mut PageCache, digest: &Digest) -> Result<Option<KeyRecord>> {
        let Some(tree) = self.tree(cache)? else {
            return Ok(None);
        };
        match tree.find(cache, digest) {
            Ok(record) => Ok(Some(record)),
            Err(StoreError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn store(&self, cache: &mut PageCache, digest: Digest, record: KeyRecord) -> Result<()> {
        self.tree_or_create(cache)?.replace(cache, digest, record)?;
        Ok(())
    }

    /// Live record for `key`.
    ///
    /// An expired key reads as absent. A writable handle also deletes it along
    /// with its value; a read-only handle leaves it in place.
    pub fn get(&self, cache: &mut PageCache, key: &[u8], now_ms: u64) -> Result<Option<KeyRecord>> {
        let digest = key_digest(key);
        let Some(record) = self.lookup(cache, &digest)? else {
            return Ok(None);
        };
        if !record.is_expired(now_ms) {
            return Ok(Some(record));
        }
        if !cache.is_read_only() {
            debug!(db = self.db, digest = %digest, "keys.expired_evict");
            self.remove_record(cache, &digest, record)?;
        }
        Ok(None)
    }

    /// Like [`Keyspace::get`], but a record of another kind is `WrongType`.
    pub fn get_kind(
        &self,
        cache: &mut PageCache,
        key: &[u8],
        kind: KeyKind,
        now_ms: u64,
    ) -> Result<Option<KeyRecord>> {
        match self.get(cache, key, now_ms)? {
            Some(record) if record.kind != kind => Err(StoreError::WrongType),
            other => Ok(other),
        }
    }

    /// Points `key` at a value and returns the new version.
    ///
    /// A new key gets a random non-zero version. An existing key keeps its name
    /// blob, has its previous value freed when `value_page` differs, and has its
    /// version bumped.
    pub fn set(
        &self,
        cache: &mut PageCache,
        key: &[u8],
        kind: KeyKind,
        value_page: PageId,
        expires_ms: u64,
    ) -> Result<u64> {
        let digest = key_digest(key);
        let record = match self.lookup(cache, &digest)? {
            Some(existing) => {
                if existing.value_page != value_page {
                    destroy_value(cache, existing.kind, existing.value_page)?;
                }
                KeyRecord {
                    kind,
                    name_page: existing.name_page,
                    value_page,
                    expires_ms,
                    version: bump(existing.version),
                }
            }
            None => KeyRecord {
                kind,
                name_page: blob::store(cache, key)?,
                value_page,
                expires_ms,
                version: fresh_version(cache),
            },
        };
        self.store(cache, digest, record)?;
        Ok(record.version)
    }

    /// Bumps the version after the value was mutated in place.
    pub fn touch(&self, cache: &mut PageCache, key: &[u8]) -> Result<u64> {
        let digest = key_digest(key);
        let mut record = self.lookup(cache, &digest)?.ok_or(StoreError::NotFound)?;
        record.version = bump(record.version);
        self.store(cache, digest, record)?;
        Ok(record.version)
    }

    /// Sets or clears (`0`) the expiry of an existing key.
    pub fn set_expiry(&self, cache: &mut PageCache, key: &[u8], expires_ms: u64) -> Result<()> {
        let digest = key_digest(key);
        let mut record = self.lookup(cache, &digest)?.ok_or(StoreError::NotFound)?;
        record.expires_ms = expires_ms;
        record.version = bump(record.version);
        self.store(cache, digest, record)
    }

    /// Deletes `key` and its value. Returns whether it existed.
    pub fn delete(&self, cache: &mut PageCache, key: &[u8]) -> Result<bool> {
        let digest = key_digest(key);
        match self.lookup(cache, &digest)? {
            Some(record) => {
                self.remove_record(cache, &digest, record)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove_record(&self, cache: &mut PageCache, digest: &Digest, record: KeyRecord) -> Result<()> {
        let Some(tree) = self.tree(cache)? else {
            return Err(StoreError::NotFound);
        };
        destroy_value(cache, record.kind, record.value_page)?;
        blob::free(cache, record.name_page)?;
        let (_, outcome) = tree.remove(cache, digest)?;
        if outcome.is_emptied() {
            tree.destroy(cache)?;
            cache.set_database_root(self.db, PageId::NONE)?;
        }
        Ok(())
    }

    /// Names of every live key, in digest order.
    pub fn keys(&self, cache: &mut PageCache, now_ms: u64) -> Result<Vec<Vec<u8>>> {
        let Some(tree) = self.tree(cache)? else {
            return Ok(Vec::new());
        };
        let mut names = Vec::new();
        for (_, record) in tree.entries(cache)? {
            if !record.is_expired(now_ms) {
                names.push(blob::read(cache, record.name_page)?);
            }
        }
        Ok(names)
    }

    /// Number of records, expired ones included until they are evicted.
    pub fn len(&self, cache: &mut PageCache) -> Result<u64> {
        match self.tree(cache)? {
            Some(tree) => tree.len(cache),
            None => Ok(0),
        }
    }

    /// True when the database holds no records.
    pub fn is_empty(&self, cache: &mut PageCache) -> Result<bool> {
        Ok(self.len(cache)? == 0)
    }

    /// Captures the current version of `key`, ignoring expiry.
    pub fn watch(&self, cache: &mut PageCache, key: &[u8]) -> Result<WatchToken> {
        let digest = key_digest(key);
        let version = self
            .lookup(cache, &digest)?
            .map(|record| record.version)
            .unwrap_or(0);
        Ok(WatchToken {
            digest,
            version,
            db: self.db,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::io::MemIo;
    use crate::primitives::pager::{Backing, PagerOptions};

    fn memory_cache() -> PageCache {
        let mut cache =
            PageCache::open(Backing::Memory(MemIo::new()), &PagerOptions::default()).unwrap();
        cache.reseed(99);
        cache
    }

    fn string_value(cache: &mut PageCache, bytes: &[u8]) -> PageId {
        blob::store(cache, bytes).unwrap()
    }

    #[test]
    fn record_codec_roundtrip() {
        let record = KeyRecord {
            kind: KeyKind::Hash,
            name_page: PageId(3),
            value_page: PageId(4),
            expires_ms: 1_700_000_000_000,
            version: u64::MAX,
        };
        let mut buf = [0u8; KeyRecord::WIDTH];
        record.put(&mut buf);
        assert_eq!(KeyRecord::get(&buf).unwrap(), record);
        buf[0] = 9;
        assert!(matches!(KeyRecord::get(&buf), Err(StoreError::Corruption(_))));
    }

    #[test]
    fn versions_start_nonzero_and_bump() -> Result<()> {
        let mut cache = memory_cache();
        let keys = Keyspace::new(&cache, 0)?;
        let value = string_value(&mut cache, b"v1");
        let v1 = keys.set(&mut cache, b"k", KeyKind::String, value, 0)?;
        assert_ne!(v1, 0);
        let v2 = keys.touch(&mut cache, b"k")?;
        assert_eq!(v2, bump(v1));
        let other = string_value(&mut cache, b"v2");
        let v3 = keys.set(&mut cache, b"k", KeyKind::String, other, 0)?;
        assert_eq!(v3, bump(v2));
        let record = keys.get(&mut cache, b"k", 0)?.expect("present");
        assert_eq!(blob::read(&mut cache, record.value_page)?, b"v2");
        assert_eq!(bump(u64::MAX), 1);
        Ok(())
    }

    #[test]
    fn databases_are_isolated_and_bounded() -> Result<()> {
        let mut cache = memory_cache();
        let zero = Keyspace::new(&cache, 0)?;
        let one = Keyspace::new(&cache, 1)?;
        let value = string_value(&mut cache, b"x");
        zero.set(&mut cache, b"shared", KeyKind::String, value, 0)?;
        assert!(one.get(&mut cache, b"shared", 0)?.is_none());
        assert_eq!(zero.len(&mut cache)?, 1);
        assert_eq!(one.len(&mut cache)?, 0);
        assert!(matches!(
            Keyspace::new(&cache, 16),
            Err(StoreError::Invalid(_))
        ));
        Ok(())
    }

    #[test]
    fn expired_key_is_evicted_on_read() -> Result<()> {
        let mut cache = memory_cache();
        let keys = Keyspace::new(&cache, 0)?;
        let value = string_value(&mut cache, b"soon gone");
        keys.set(&mut cache, b"ttl", KeyKind::String, value, 1_000)?;
        assert!(keys.get(&mut cache, b"ttl", 999)?.is_some());
        assert!(keys.keys(&mut cache, 1_000)?.is_empty());
        assert_eq!(keys.len(&mut cache)?, 1);
        assert!(keys.get(&mut cache, b"ttl", 1_000)?.is_none());
        assert_eq!(keys.len(&mut cache)?, 0);
        assert!(cache.database_root(0)?.is_none());
        Ok(())
    }

    #[test]
    fn watch_ignores_expiry() -> Result<()> {
        let mut cache = memory_cache();
        let keys = Keyspace::new(&cache, 2)?;
        let value = string_value(&mut cache, b"v");
        keys.set(&mut cache, b"w", KeyKind::String, value, 5)?;
        let token = keys.watch(&mut cache, b"w")?;
        assert_ne!(token.version, 0);
        assert_eq!(check_watch(&mut cache, &[token])?, WatchOutcome::Ok);
        keys.touch(&mut cache, b"w")?;
        assert_eq!(check_watch(&mut cache, &[token])?, WatchOutcome::Conflict);
        assert!(matches!(
            check_watch(&mut cache, &[token])?.into_result(),
            Err(StoreError::Conflict)
        ));

        let absent = keys.watch(&mut cache, b"missing")?;
        assert_eq!(absent.version, 0);
        assert_eq!(check_watch(&mut cache, &[absent])?, WatchOutcome::Ok);
        let value = string_value(&mut cache, b"v");
        keys.set(&mut cache, b"missing", KeyKind::String, value, 0)?;
        assert_eq!(check_watch(&mut cache, &[absent])?, WatchOutcome::Conflict);
        Ok(())
    }

    #[test]
    fn wrong_kind_is_reported() -> Result<()> {
        let mut cache = memory_cache();
        let keys = Keyspace::new(&cache, 0)?;
        let value = string_value(&mut cache, b"s");
        keys.set(&mut cache, b"k", KeyKind::String, value, 0)?;
        assert!(matches!(
            keys.get_kind(&mut cache, b"k", KeyKind::List, 0),
            Err(StoreError::WrongType)
        ));
        assert!(keys.get_kind(&mut cache, b"k", KeyKind::String, 0)?.is_some());
        Ok(())
    }

    #[test]
    fn delete_frees_every_value_layout() -> Result<()> {
        let mut cache = memory_cache();
        let keys = Keyspace::new(&cache, 0)?;
        // a live key keeps the index tree allocated throughout
        let anchor = string_value(&mut cache, b"anchor");
        keys.set(&mut cache, b"anchor", KeyKind::String, anchor, 0)?;
        let baseline = cache.meta().number_of_pages;

        let build = |cache: &mut PageCache| -> Result<()> {
            let keys = Keyspace::new(cache, 0)?;

            let list = List::<PageId>::create(cache, 4)?;
            for i in 0..10u8 {
                let element = blob::store(cache, &[i; 40])?;
                list.insert_at(cache, -1, element)?;
            }
            keys.set(cache, b"list", KeyKind::List, list.root_page(), 0)?;

            let set = BTree::<Digest, PageId>::create(cache)?;
            for i in 0..10u8 {
                let member = blob::store(cache, &[i])?;
                set.add(cache, key_digest(&[i]), member)?;
            }
            keys.set(cache, b"set", KeyKind::Set, set.root_page(), 0)?;

            let hash = BTree::<Digest, HashField>::create(cache)?;
            for i in 0..10u8 {
                let field = blob::store(cache, &[b'f', i])?;
                let value = blob::store(cache, &[b'v', i])?;
                hash.add(cache, key_digest(&[b'f', i]), HashField { field, value })?;
            }
            keys.set(cache, b"hash", KeyKind::Hash, hash.root_page(), 0)?;

            let zset = SortedSetRoot::create(cache)?;
            let root: SortedSetRoot = cache.get(zset)?;
            for i in 0..10u8 {
                let node = root.ranks().insert(cache, f64::from(i), &[b'm', i])?;
                let member = cache.get::<crate::storage::skiplist::SkipNode>(node)?.value;
                root.members().add(
                    cache,
                    key_digest(&[b'm', i]),
                    MemberScore {
                        score: f64::from(i),
                        member,
                    },
                )?;
            }
            keys.set(cache, b"zset", KeyKind::SortedSet, zset, 0)?;
            Ok(())
        };

        build(&mut cache)?;
        let grown = cache.meta().number_of_pages;
        assert!(grown > baseline);
        for key in [&b"list"[..], b"set", b"hash", b"zset"] {
            assert!(keys.delete(&mut cache, key)?);
            assert!(!keys.delete(&mut cache, key)?);
        }
        build(&mut cache)?;
        assert_eq!(cache.meta().number_of_pages, grown);
        Ok(())
    }
}
