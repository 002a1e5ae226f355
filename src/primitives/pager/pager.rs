use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::meta::{peek_page_size, Meta};
use crate::primitives::io::{FileIo, MemIo, StdFileIo};
use crate::types::{PageId, Result, StoreError};

/// Default page size in bytes.
pub const DEFAULT_PAGE_SIZE: u32 = 1024;
/// Smallest supported page size; the skip index head sentinel needs this much.
pub const MIN_PAGE_SIZE: u32 = 1024;
/// Largest supported page size.
pub const MAX_PAGE_SIZE: u32 = 1 << 16;

/// Durability level applied during commit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Synchronous {
    /// Sync the WAL before applying it and the store afterwards.
    #[default]
    Full,
    /// Sync the store after applying; the WAL is written but not synced.
    Normal,
    /// Never sync explicitly.
    Off,
}

impl Synchronous {
    /// Returns the string representation of the synchronous mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Synchronous::Full => "full",
            Synchronous::Normal => "normal",
            Synchronous::Off => "off",
        }
    }

    /// Parses a synchronous mode from a string (case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "full" => Some(Synchronous::Full),
            "normal" => Some(Synchronous::Normal),
            "off" => Some(Synchronous::Off),
            _ => None,
        }
    }
}

/// How the backing medium is opened.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// Never writes; pending WAL pages are overlaid in memory.
    ReadOnly,
    /// The store must already exist.
    ReadWrite,
    /// Creates the store when missing.
    #[default]
    Create,
}

/// Where pages live.
#[derive(Clone)]
pub enum Backing {
    /// A file on disk; the WAL sits next to it with a `-wal` suffix.
    File(PathBuf),
    /// A growable buffer. Clone a [`MemIo`] to reopen the same contents.
    Memory(MemIo),
    /// Any other medium. With a `path`, commits go through a WAL next to it.
    Custom {
        /// The page medium.
        io: Arc<dyn FileIo>,
        /// Store path the WAL path is derived from.
        path: Option<PathBuf>,
    },
}

/// Options consumed by [`Pager::open`] and the transaction cache above it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PagerOptions {
    /// Page size for newly created stores; existing stores keep their own.
    pub page_size: u32,
    /// Number of logical databases in a new store.
    pub database_count: u32,
    /// Capacity of the read cache in pages.
    pub cache_pages: usize,
    /// Durability mode for commits.
    pub synchronous: Synchronous,
    /// Open mode.
    pub mode: OpenMode,
}

impl Default for PagerOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            database_count: 16,
            cache_pages: 1024,
            synchronous: Synchronous::Full,
            mode: OpenMode::Create,
        }
    }
}

/// Returns the WAL path for a store path.
pub fn wal_path(path: &Path) -> PathBuf {
    append_suffix(path, "-wal")
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("pagekv"));
    name.push(suffix);
    let mut new_path = path.to_path_buf();
    new_path.set_file_name(name);
    new_path
}

fn validate_page_size(page_size: u32) -> Result<()> {
    if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) || !page_size.is_power_of_two() {
        return Err(StoreError::Invalid(
            "page size must be a power of two between 1024 and 65536",
        ));
    }
    Ok(())
}

/// Page store: maps page numbers to fixed-size blocks at `page * page_size`.
///
/// It knows nothing about what pages contain. Allocation counters live in the
/// header, which the transaction cache owns; the pager only moves bytes.
pub struct Pager {
    io: Arc<dyn FileIo>,
    page_size: usize,
    path: Option<PathBuf>,
    read_only: bool,
    synchronous: Synchronous,
}

impl Pager {
    /// Opens (or creates) the medium and returns it with the header found on it.
    ///
    /// The header returned here predates WAL recovery; callers that recover
    /// must re-read it afterwards.
    pub fn open(backing: Backing, options: &PagerOptions) -> Result<(Self, Meta)> {
        validate_page_size(options.page_size)?;
        let read_only = options.mode == OpenMode::ReadOnly;
        let (io, path): (Arc<dyn FileIo>, Option<PathBuf>) = match backing {
            Backing::File(path) => {
                let io = StdFileIo::open_with_mode(&path, options.mode)?;
                (Arc::new(io), Some(path))
            }
            Backing::Memory(mem) => (Arc::new(mem), None),
            Backing::Custom { io, path } => (io, path),
        };
        let stored = peek_page_size(io.as_ref())?;
        let page_size = match stored {
            Some(existing) => {
                validate_page_size(existing)
                    .map_err(|_| StoreError::Corruption("stored page size invalid"))?;
                if existing != options.page_size {
                    debug!(
                        stored = existing,
                        requested = options.page_size,
                        "pager.open using stored page size"
                    );
                }
                existing
            }
            None if options.mode == OpenMode::Create => options.page_size,
            None => return Err(StoreError::NotFound),
        };
        let pager = Self {
            io,
            page_size: page_size as usize,
            path,
            read_only,
            synchronous: options.synchronous,
        };
        let meta = if stored.is_none() {
            let meta = Meta::new(page_size, options.database_count)?;
            let mut page = vec![0u8; pager.page_size];
            meta.encode(&mut page);
            pager.write(PageId(0), &page)?;
            pager.sync()?;
            info!(
                page_size,
                databases = options.database_count,
                "pager.open created store"
            );
            meta
        } else {
            Meta::decode(&pager.read(PageId(0))?)?
        };
        Ok((pager, meta))
    }

    /// Reads one page. A page past the end of the medium is `NotFound`.
    pub fn read(&self, page: PageId) -> Result<Vec<u8>> {
        let off = self.offset(page)?;
        let len = self.io.len()?;
        if off >= len {
            return Err(StoreError::NotFound);
        }
        if off + self.page_size as u64 > len {
            return Err(StoreError::Corruption("short page read"));
        }
        let mut buf = vec![0u8; self.page_size];
        self.io.read_at(off, &mut buf)?;
        Ok(buf)
    }

    /// Writes one full page in place.
    pub fn write(&self, page: PageId, bytes: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        if bytes.len() != self.page_size {
            return Err(StoreError::Invalid("page payload length mismatch"));
        }
        let off = self.offset(page)?;
        self.io.write_at(off, bytes)
    }

    /// Extends the medium so it holds at least `pages` pages.
    pub fn grow_backing(&self, pages: u64) -> Result<()> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        let want = pages
            .checked_mul(self.page_size as u64)
            .ok_or(StoreError::Invalid("page count overflow"))?;
        if self.io.len()? < want {
            self.io.truncate(want)?;
        }
        Ok(())
    }

    /// Pages currently present on the medium.
    pub fn pages_on_medium(&self) -> Result<u64> {
        Ok(self.io.len()? / self.page_size as u64)
    }

    /// Flushes the medium.
    pub fn sync(&self) -> Result<()> {
        self.io.sync_all()
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Store path for file-backed stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// True when opened with [`OpenMode::ReadOnly`].
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Durability mode.
    pub fn synchronous(&self) -> Synchronous {
        self.synchronous
    }

    fn offset(&self, page: PageId) -> Result<u64> {
        page.0
            .checked_mul(self.page_size as u64)
            .ok_or(StoreError::Invalid("page number overflow"))
    }
}
