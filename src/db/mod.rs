//! Top-level handle tying the transaction cache to the key index.
//!
//! A [`Db`] owns one [`PageCache`] and a selected database. Key operations go
//! through [`Keyspace`]. Typed commands for lists, sets, hashes and sorted
//! sets live in the `*_ops` modules; they create the key on first write, bump
//! its version on every mutation and delete it once the value is emptied.
//! Structure-level work can still use [`Db::cache`] directly and record the
//! resulting root page with [`Db::set`].

mod config;
mod hash_ops;
mod list_ops;
mod set_ops;
mod zset_ops;

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::primitives::concurrency::WalLock;
use crate::primitives::io::MemIo;
use crate::primitives::pager::{self, Backing};
use crate::storage::blob;
use crate::storage::cache::PageCache;
use crate::storage::keys::{self, KeyKind, KeyRecord, Keyspace, WatchOutcome, WatchToken};
use crate::storage::Rebalance;
use crate::types::{Digest, PageId, Result, StoreError};

pub use config::{Config, ConfigError};
pub use zset_ops::parse_score_bound;

/// An open store.
pub struct Db {
    cache: PageCache,
    keyspace: Keyspace,
    path: Option<PathBuf>,
}

impl Db {
    /// Opens the store at `path`, replaying any WAL left by a crashed writer.
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = Self::from_backing(Backing::File(path.clone()), &config, Some(path))?;
        info!(
            path = ?db.path,
            page_size = db.cache.page_size(),
            read_only = db.cache.is_read_only(),
            "db.open"
        );
        Ok(db)
    }

    /// Opens a fresh in-memory store.
    pub fn open_memory(config: Config) -> Result<Self> {
        Self::open_io(MemIo::new(), config)
    }

    /// Opens a store over an existing memory buffer; clones share contents.
    pub fn open_io(io: MemIo, config: Config) -> Result<Self> {
        Self::from_backing(Backing::Memory(io), &config, None)
    }

    fn from_backing(backing: Backing, config: &Config, path: Option<PathBuf>) -> Result<Self> {
        if let Err(err) = config.validate() {
            warn!(error = %err, "db.config_rejected");
            return Err(StoreError::Invalid("invalid configuration"));
        }
        let mut cache = PageCache::open(backing, &config.pager_options())?;
        if let Some(seed) = config.rng_seed {
            cache.reseed(seed);
        }
        let keyspace = Keyspace::new(&cache, 0)?;
        Ok(Self {
            cache,
            keyspace,
            path,
        })
    }

    /// True while some other process holds the writer lock on the store at `path`.
    pub fn is_writer_active(path: impl AsRef<Path>) -> Result<bool> {
        WalLock::is_held(pager::wal_path(path.as_ref()))
    }

    /// Switches the database subsequent key operations address.
    pub fn select(&mut self, db: usize) -> Result<()> {
        self.keyspace = Keyspace::new(&self.cache, db)?;
        Ok(())
    }

    /// Currently selected database.
    pub fn selected(&self) -> usize {
        self.keyspace.db()
    }

    /// Number of databases in the header.
    pub fn database_count(&self) -> u32 {
        self.cache.meta().database_count()
    }

    /// Live record for `key`; expired keys read as absent.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<KeyRecord>> {
        self.keyspace.get(&mut self.cache, key, keys::now_ms())
    }

    /// Like [`Db::get`], but a record of another kind is `WrongType`.
    pub fn get_kind(&mut self, key: &[u8], kind: KeyKind) -> Result<Option<KeyRecord>> {
        self.keyspace
            .get_kind(&mut self.cache, key, kind, keys::now_ms())
    }

    /// Points `key` at the value rooted at `value_page` and returns its new version.
    ///
    /// `expires_ms` is a unix timestamp in milliseconds, `0` for none.
    pub fn set(
        &mut self,
        key: &[u8],
        kind: KeyKind,
        value_page: PageId,
        expires_ms: u64,
    ) -> Result<u64> {
        self.keyspace
            .set(&mut self.cache, key, kind, value_page, expires_ms)
    }

    /// Stores `value` as a string key.
    pub fn set_string(&mut self, key: &[u8], value: &[u8]) -> Result<u64> {
        let page = blob::store(&mut self.cache, value)?;
        self.set(key, KeyKind::String, page, 0)
    }

    /// Reads a string key.
    pub fn get_string(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.get_kind(key, KeyKind::String)? {
            Some(record) => Ok(Some(blob::read(&mut self.cache, record.value_page)?)),
            None => Ok(None),
        }
    }

    /// Bumps the version of a key whose value was mutated in place.
    pub fn touch(&mut self, key: &[u8]) -> Result<u64> {
        self.keyspace.touch(&mut self.cache, key)
    }

    /// Sets or clears (`0`) the expiry of an existing key.
    pub fn set_expiry(&mut self, key: &[u8], expires_ms: u64) -> Result<()> {
        self.keyspace.set_expiry(&mut self.cache, key, expires_ms)
    }

    /// Deletes a key and its value. Returns whether it existed.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        self.keyspace.delete(&mut self.cache, key)
    }

    /// Names of every live key in the selected database.
    pub fn keys(&mut self) -> Result<Vec<Vec<u8>>> {
        self.keyspace.keys(&mut self.cache, keys::now_ms())
    }

    /// Record count of the selected database.
    pub fn len(&mut self) -> Result<u64> {
        self.keyspace.len(&mut self.cache)
    }

    /// True when the selected database holds no records.
    pub fn is_empty(&mut self) -> Result<bool> {
        self.keyspace.is_empty(&mut self.cache)
    }

    /// Captures the current version of `key`.
    pub fn watch(&mut self, key: &[u8]) -> Result<WatchToken> {
        self.keyspace.watch(&mut self.cache, key)
    }

    /// Compares tokens against the current versions.
    pub fn check_watch(&mut self, tokens: &[WatchToken]) -> Result<WatchOutcome> {
        keys::check_watch(&mut self.cache, tokens)
    }

    /// Makes the staged changes durable.
    pub fn commit(&mut self) -> Result<()> {
        self.cache.commit()
    }

    /// Drops the staged changes.
    pub fn discard(&mut self) {
        self.cache.discard()
    }

    /// Digest of the staged pages.
    pub fn dirty_hash(&self) -> Result<Digest> {
        self.cache.dirty_hash()
    }

    /// True when a write is staged.
    pub fn is_dirty(&self) -> bool {
        self.cache.is_dirty()
    }

    /// True for handles opened with [`OpenMode::ReadOnly`](crate::primitives::pager::OpenMode).
    pub fn is_read_only(&self) -> bool {
        self.cache.is_read_only()
    }

    /// Path of the store file, `None` for memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The transaction cache, for building value structures.
    pub fn cache(&mut self) -> &mut PageCache {
        &mut self.cache
    }

    fn value_page(&mut self, key: &[u8], kind: KeyKind) -> Result<Option<PageId>> {
        Ok(self.get_kind(key, kind)?.map(|record| record.value_page))
    }

    /// Records a mutation of an existing key's value.
    fn settle(&mut self, key: &[u8], outcome: Rebalance) -> Result<()> {
        if outcome.is_emptied() {
            self.delete(key)?;
        } else {
            self.touch(key)?;
        }
        Ok(())
    }
}

/// Maps `NotFound` to `None`.
fn optional<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(StoreError::NotFound) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Resolves an inclusive `start..=stop` window over `len` elements; negative
/// indexes count from the end. `None` when the window is empty.
fn window(start: i64, stop: i64, len: u64) -> Option<(u64, u64)> {
    let len = i64::try_from(len).ok()?;
    let start = if start < 0 { (start + len).max(0) } else { start };
    let stop = if stop < 0 { stop + len } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some((start as u64, stop as u64))
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("path", &self.path)
            .field("selected", &self.keyspace.db())
            .field("read_only", &self.cache.is_read_only())
            .finish()
    }
}
