//! Transaction cache layered over the page store.
//!
//! Reads fault pages in through a bounded LRU of decoded objects. Writes are
//! staged in an ordered map keyed by page number until `commit` pushes them
//! through the WAL. `discard` drops the staging and restores the header
//! snapshot taken when the transaction started.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;

use lru::LruCache;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use super::object::{FreePage, PageCodec, PageObject};
use crate::primitives::pager::{wal_path, Backing, Meta, Pager, PagerOptions};
use crate::primitives::wal::{self, Recovery, Wal, WalPage};
use crate::types::checksum::{Checksum, Sha1Digest};
use crate::types::{Digest, PageId, Result, StoreError};

/// Read cache, write cache and header bookkeeping for one handle.
pub struct PageCache {
    pager: Pager,
    wal: Option<Wal>,
    meta: Meta,
    snapshot: Meta,
    read_cache: LruCache<PageId, Box<dyn PageObject>>,
    write_cache: BTreeMap<PageId, Box<dyn PageObject>>,
    overlay: HashMap<PageId, Vec<u8>>,
    rng: ChaCha8Rng,
    poisoned: bool,
}

impl PageCache {
    /// Opens the backing medium, runs WAL recovery and loads the header.
    pub fn open(backing: Backing, options: &PagerOptions) -> Result<Self> {
        let (pager, meta) = Pager::open(backing, options)?;
        let wal = pager
            .path()
            .map(|path| Wal::new(wal_path(path), options.synchronous));
        let capacity = NonZeroUsize::new(options.cache_pages.max(1))
            .ok_or(StoreError::Invalid("read cache capacity must be non-zero"))?;
        let mut cache = Self {
            pager,
            wal,
            snapshot: meta.clone(),
            meta,
            read_cache: LruCache::new(capacity),
            write_cache: BTreeMap::new(),
            overlay: HashMap::new(),
            rng: ChaCha8Rng::seed_from_u64(rand::random()),
            poisoned: false,
        };
        cache.recover()?;
        debug!(
            page_size = cache.meta.page_size,
            pages = cache.meta.number_of_pages,
            read_only = cache.pager.is_read_only(),
            "cache.open"
        );
        Ok(cache)
    }

    fn recover(&mut self) -> Result<()> {
        let Some(wal) = &self.wal else {
            return Ok(());
        };
        match wal.recover(&self.pager)? {
            Recovery::Replayed(_) | Recovery::Discarded => {
                self.meta = Meta::decode(&self.pager.read(PageId(0))?)?;
            }
            Recovery::Staged(pages) => {
                self.overlay = pages
                    .into_iter()
                    .map(|WalPage { page, bytes }| (page, bytes))
                    .collect();
                self.meta = match self.overlay.get(&PageId(0)) {
                    Some(header) => Meta::decode(header)?,
                    None => Meta::decode(&self.pager.read(PageId(0))?)?,
                };
            }
            Recovery::Clean => {}
        }
        self.snapshot = self.meta.clone();
        Ok(())
    }

    /// Returns a private copy of the object at `page`.
    ///
    /// Lookup order: staged writes, read cache, pending-WAL overlay, page store.
    pub fn get<T: PageCodec>(&mut self, page: PageId) -> Result<T> {
        self.ensure_usable()?;
        if page.is_none() {
            return Err(StoreError::Invalid("page 0 holds the header"));
        }
        if let Some(staged) = self.write_cache.get(&page) {
            return staged
                .as_any()
                .downcast_ref::<T>()
                .cloned()
                .ok_or(StoreError::Corruption("staged page has a different type"));
        }
        if let Some(hit) = self
            .read_cache
            .get(&page)
            .and_then(|cached| cached.as_any().downcast_ref::<T>())
        {
            return Ok(hit.clone());
        }
        let object = match self.overlay.get(&page) {
            Some(bytes) => T::decode(bytes)?,
            None => {
                if page.0 >= self.meta.number_of_pages {
                    return Err(StoreError::NotFound);
                }
                T::decode(&self.pager.read(page)?)?
            }
        };
        self.read_cache.put(page, Box::new(object.clone()));
        Ok(object)
    }

    /// Stages `object` at `page`; later `get`s see it until commit or discard.
    pub fn put<T: PageCodec>(&mut self, page: PageId, object: T) -> Result<()> {
        self.ensure_writable()?;
        if page.is_none() {
            return Err(StoreError::Invalid("page 0 holds the header"));
        }
        if page.0 >= self.meta.number_of_pages {
            return Err(StoreError::Invalid("page was never allocated"));
        }
        self.read_cache.pop(&page);
        self.write_cache.insert(page, Box::new(object));
        Ok(())
    }

    /// Hands out a page number, reusing freed pages first.
    pub fn alloc_page(&mut self) -> Result<PageId> {
        self.ensure_writable()?;
        if let Some(head) = self.meta.free_head.as_option() {
            let free: FreePage = self.get(head)?;
            self.meta.free_head = free.next;
            return Ok(head);
        }
        let page = self.meta.next_free_page;
        self.meta.next_free_page = PageId(page.0 + 1);
        self.meta.number_of_pages = self.meta.number_of_pages.max(page.0 + 1);
        Ok(page)
    }

    /// Returns `page` to the free chain.
    pub fn free_page(&mut self, page: PageId) -> Result<()> {
        let next = self.meta.free_head;
        self.put(page, FreePage { next })?;
        self.meta.free_head = page;
        Ok(())
    }

    /// Makes every staged page durable, or none of them.
    ///
    /// A failure before the WAL record is durable leaves the staged state for
    /// the caller to discard. A failure while applying a durable record is
    /// finished by replaying that record; if the replay fails as well the
    /// handle refuses further work with `Corruption` until [`PageCache::reload`]
    /// succeeds.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_usable()?;
        if !self.is_dirty() {
            return Ok(());
        }
        self.ensure_writable()?;
        let pages = self.staged_images()?;
        self.pager.grow_backing(self.meta.number_of_pages)?;
        let applied = match &self.wal {
            Some(wal) => {
                let guard = wal.write_record(self.pager.page_size(), &pages)?;
                wal.finish(&self.pager, &pages, guard)
            }
            None => wal::apply(&self.pager, &pages),
        };
        if let Err(err) = applied {
            return self.settle_failed_apply(err);
        }
        self.write_cache.clear();
        self.read_cache.clear();
        self.snapshot = self.meta.clone();
        info!(pages = pages.len(), "cache.commit");
        Ok(())
    }

    // The store may hold some pages of the record and not others.
    fn settle_failed_apply(&mut self, err: StoreError) -> Result<()> {
        self.write_cache.clear();
        self.read_cache.clear();
        self.overlay.clear();
        self.meta = self.snapshot.clone();
        if self.wal.is_some() && self.recover().and_then(|()| self.reread_header()).is_ok() {
            warn!(error = %err, "cache.commit completed by wal replay");
            return Ok(());
        }
        warn!(error = %err, "cache.commit left the store partially applied");
        self.poisoned = true;
        Err(err)
    }

    fn reread_header(&mut self) -> Result<()> {
        self.meta = Meta::decode(&self.pager.read(PageId(0))?)?;
        self.snapshot = self.meta.clone();
        Ok(())
    }

    /// Drops staged pages and rolls the header back. Never touches the medium.
    pub fn discard(&mut self) {
        let staged = self.write_cache.len();
        self.write_cache.clear();
        self.read_cache.clear();
        self.meta = self.snapshot.clone();
        debug!(staged, "cache.discard");
    }

    /// Re-runs recovery and re-reads the header to observe other processes' commits.
    pub fn reload(&mut self) -> Result<()> {
        if self.is_dirty() {
            return Err(StoreError::Invalid("reload with staged changes"));
        }
        if self.poisoned && self.wal.is_none() {
            return self.ensure_usable();
        }
        self.read_cache.clear();
        self.overlay.clear();
        self.reread_header()?;
        self.recover()?;
        if self.poisoned {
            info!("cache.reload cleared failed commit");
            self.poisoned = false;
        }
        Ok(())
    }

    /// Digest over the staged pages and, when changed, the header.
    ///
    /// Equal digests before and after an operation mean it changed nothing.
    pub fn dirty_hash(&self) -> Result<Digest> {
        let mut hasher = Sha1Digest::default();
        let mut buf = vec![0u8; self.pager.page_size()];
        for (page, object) in &self.write_cache {
            buf.fill(0);
            object.encode(&mut buf)?;
            hasher.update(&page.0.to_be_bytes());
            hasher.update(&buf);
        }
        if self.meta != self.snapshot {
            self.meta.encode(&mut buf);
            hasher.update(&0u64.to_be_bytes());
            hasher.update(&buf);
        }
        Ok(hasher.finalize())
    }

    fn staged_images(&self) -> Result<Vec<WalPage>> {
        let page_size = self.pager.page_size();
        let mut pages = Vec::new();
        pages.try_reserve_exact(self.write_cache.len() + 1)?;
        if self.meta != self.snapshot {
            let mut bytes = vec![0u8; page_size];
            self.meta.encode(&mut bytes);
            pages.push(WalPage {
                page: PageId(0),
                bytes,
            });
        }
        for (&page, object) in &self.write_cache {
            let mut bytes = Vec::new();
            bytes.try_reserve_exact(page_size)?;
            bytes.resize(page_size, 0);
            object.encode(&mut bytes)?;
            pages.push(WalPage { page, bytes });
        }
        Ok(pages)
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.poisoned {
            Err(StoreError::Corruption("a failed commit left the store partially applied"))
        } else {
            Ok(())
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_usable()?;
        if self.pager.is_read_only() {
            Err(StoreError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// True when pages are staged or the header moved.
    pub fn is_dirty(&self) -> bool {
        !self.write_cache.is_empty() || self.meta != self.snapshot
    }

    /// Number of staged pages.
    pub fn staged_len(&self) -> usize {
        self.write_cache.len()
    }

    /// Root page of logical database `index`.
    pub fn database_root(&self, index: usize) -> Result<PageId> {
        self.meta
            .database_roots
            .get(index)
            .copied()
            .ok_or(StoreError::Invalid("database index out of range"))
    }

    /// Points logical database `index` at `root`.
    pub fn set_database_root(&mut self, index: usize, root: PageId) -> Result<()> {
        self.ensure_writable()?;
        let slot = self
            .meta
            .database_roots
            .get_mut(index)
            .ok_or(StoreError::Invalid("database index out of range"))?;
        *slot = root;
        Ok(())
    }

    /// Current header.
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> usize {
        self.pager.page_size()
    }

    /// True for read-only handles.
    pub fn is_read_only(&self) -> bool {
        self.pager.is_read_only()
    }

    /// Handle-scoped PRNG used for version stamps and skip levels.
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    /// Replaces the PRNG with a seeded one for reproducible runs.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    /// WAL file path for file-backed stores.
    pub fn wal_path(&self) -> Option<&std::path::Path> {
        self.wal.as_ref().map(Wal::path)
    }
}
