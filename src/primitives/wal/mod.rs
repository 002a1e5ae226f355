#![forbid(unsafe_code)]
//! Single-record redo log used by commit.
//!
//! A record is written in full, synced, applied to the store in place and then
//! truncated away. The file itself stays, so the lock always lives on the inode
//! recovery reads. Layout:
//!
//! ```text
//! [0..8)    magic "PKVWAL01"
//! [8..28)   SHA-1 over bytes [28..)
//! [28..32)  page count (u32 BE)
//! then      page count x (page number u32 BE, page_size bytes)
//! ```
//!
//! Re-applying a record rewrites identical bytes, so replay is idempotent.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::primitives::bytes::get_u32;
use crate::primitives::concurrency::{WalLock, WalLockGuard};
use crate::primitives::pager::{Pager, Synchronous};
use crate::types::checksum::{Checksum, Sha1Digest};
use crate::types::{PageId, Result, StoreError, DIGEST_LEN};

/// Magic prefix of every WAL record.
pub const WAL_MAGIC: [u8; 8] = *b"PKVWAL01";
/// Bytes before the first page entry.
pub const RECORD_HEADER_LEN: usize = 32;

const MAGIC_RANGE: Range<usize> = 0..8;
const DIGEST_RANGE: Range<usize> = 8..8 + DIGEST_LEN;
const COUNT_RANGE: Range<usize> = 28..32;
const ENTRY_PREFIX_LEN: usize = 4;

/// One page image carried by a record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalPage {
    /// Destination page.
    pub page: PageId,
    /// Full page image.
    pub bytes: Vec<u8>,
}

/// What recovery found on open.
#[derive(Debug)]
pub enum Recovery {
    /// No record was present.
    Clean,
    /// A valid record was applied to the store; holds the page count.
    Replayed(usize),
    /// A torn or invalid record was thrown away.
    Discarded,
    /// Read-only open: a valid record exists and its pages must be overlaid.
    Staged(Vec<WalPage>),
}

/// Serializes pages into a record.
pub fn encode_record(page_size: usize, pages: &[WalPage]) -> Result<Vec<u8>> {
    let count =
        u32::try_from(pages.len()).map_err(|_| StoreError::Invalid("too many pages in record"))?;
    let total = RECORD_HEADER_LEN + pages.len() * (ENTRY_PREFIX_LEN + page_size);
    let mut out = Vec::new();
    out.try_reserve_exact(total)?;
    out.extend_from_slice(&WAL_MAGIC);
    out.extend_from_slice(&[0u8; DIGEST_LEN]);
    out.extend_from_slice(&count.to_be_bytes());
    for entry in pages {
        if entry.bytes.len() != page_size {
            return Err(StoreError::Invalid("page payload length mismatch"));
        }
        let page = u32::try_from(entry.page.0)
            .map_err(|_| StoreError::Invalid("page number does not fit in a wal entry"))?;
        out.extend_from_slice(&page.to_be_bytes());
        out.extend_from_slice(&entry.bytes);
    }
    let digest = record_digest(&out);
    out[DIGEST_RANGE].copy_from_slice(&digest);
    Ok(out)
}

/// Parses and validates a record; any defect is reported as `Corruption`.
pub fn decode_record(page_size: usize, raw: &[u8]) -> Result<Vec<WalPage>> {
    let entry_len = ENTRY_PREFIX_LEN + page_size;
    if raw.len() < RECORD_HEADER_LEN + entry_len {
        return Err(StoreError::Corruption("wal record truncated"));
    }
    if raw[MAGIC_RANGE] != WAL_MAGIC {
        return Err(StoreError::Corruption("wal magic mismatch"));
    }
    if raw[DIGEST_RANGE] != record_digest(raw) {
        return Err(StoreError::Corruption("wal digest mismatch"));
    }
    let count = get_u32(&raw[COUNT_RANGE])? as usize;
    if raw.len() != RECORD_HEADER_LEN + count * entry_len {
        return Err(StoreError::Corruption("wal page count disagrees with length"));
    }
    let mut pages = Vec::with_capacity(count);
    for entry in raw[RECORD_HEADER_LEN..].chunks_exact(entry_len) {
        pages.push(WalPage {
            page: PageId(u64::from(get_u32(entry)?)),
            bytes: entry[ENTRY_PREFIX_LEN..].to_vec(),
        });
    }
    Ok(pages)
}

fn record_digest(raw: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha1Digest::default();
    hasher.update(&raw[DIGEST_RANGE.end..]);
    hasher.finalize().0
}

/// WAL file next to a store.
pub struct Wal {
    path: PathBuf,
    synchronous: Synchronous,
}

impl Wal {
    /// Handle for the WAL at `path`; nothing is created until a commit.
    pub fn new(path: impl Into<PathBuf>, synchronous: Synchronous) -> Self {
        Self {
            path: path.into(),
            synchronous,
        }
    }

    /// WAL file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes a record under the exclusive lock and returns the still-held lock.
    ///
    /// The record is durable (under `Full`) once this returns; nothing has been
    /// applied to the store yet.
    pub fn write_record(&self, page_size: usize, pages: &[WalPage]) -> Result<WalLockGuard> {
        let record = encode_record(page_size, pages)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        let guard = WalLock::acquire(Arc::new(file))?;
        // Closing any other descriptor of this file would drop the lock, so all
        // I/O goes through the guard's own handle.
        let mut out = guard.file();
        out.set_len(0)?;
        out.seek(SeekFrom::Start(0))?;
        out.write_all(&record)?;
        if self.synchronous == Synchronous::Full {
            out.sync_all()?;
        }
        Ok(guard)
    }

    /// Full commit protocol: log, apply, sync, truncate.
    pub fn commit(&self, pager: &Pager, pages: &[WalPage]) -> Result<()> {
        let guard = self.write_record(pager.page_size(), pages)?;
        self.finish(pager, pages, guard)
    }

    /// Applies a record made durable by [`Wal::write_record`] and truncates it.
    ///
    /// On error the record is left in place for [`Wal::recover`].
    pub fn finish(&self, pager: &Pager, pages: &[WalPage], guard: WalLockGuard) -> Result<()> {
        apply(pager, pages)?;
        self.retire(guard)?;
        debug!(pages = pages.len(), "wal.commit applied");
        Ok(())
    }

    /// True when the WAL file holds a record, valid or not.
    pub fn has_record(&self) -> Result<bool> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len() > 0),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Replays or discards whatever record is present.
    ///
    /// Read-only pagers never write: a valid record comes back as
    /// [`Recovery::Staged`] and stays on disk for the next writer.
    pub fn recover(&self, pager: &Pager) -> Result<Recovery> {
        if pager.is_read_only() {
            let raw = match read_all(&self.path)? {
                Some(raw) if !raw.is_empty() => raw,
                _ => return Ok(Recovery::Clean),
            };
            return match decode_record(pager.page_size(), &raw) {
                Ok(pages) => {
                    info!(pages = pages.len(), "wal.recover staging pending record");
                    Ok(Recovery::Staged(pages))
                }
                Err(StoreError::Corruption(reason)) => {
                    warn!(reason, "wal.recover ignoring invalid record");
                    Ok(Recovery::Clean)
                }
                Err(err) => Err(err),
            };
        }
        let file = match OpenOptions::new().read(true).write(true).open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Recovery::Clean),
            Err(err) => return Err(err.into()),
        };
        let guard = WalLock::acquire(Arc::new(file))?;
        let mut raw = Vec::new();
        guard.file().read_to_end(&mut raw)?;
        if raw.is_empty() {
            return Ok(Recovery::Clean);
        }
        let outcome = match decode_record(pager.page_size(), &raw) {
            Ok(pages) => {
                apply(pager, &pages)?;
                info!(pages = pages.len(), "wal.recover replayed record");
                Recovery::Replayed(pages.len())
            }
            Err(StoreError::Corruption(reason)) => {
                warn!(reason, "wal.recover discarding torn record");
                Recovery::Discarded
            }
            Err(err) => return Err(err),
        };
        self.retire(guard)?;
        Ok(outcome)
    }

    // The file is never unlinked: a writer blocked on the lock must end up
    // holding the same inode that recovery opens by path.
    fn retire(&self, guard: WalLockGuard) -> Result<()> {
        guard.file().set_len(0)?;
        if self.synchronous == Synchronous::Full {
            guard.file().sync_all()?;
        }
        drop(guard);
        Ok(())
    }
}

/// Writes each page in place and syncs the store unless durability is off.
pub fn apply(pager: &Pager, pages: &[WalPage]) -> Result<()> {
    for entry in pages {
        pager.write(entry.page, &entry.bytes)?;
    }
    if pager.synchronous() != Synchronous::Off {
        pager.sync()?;
    }
    Ok(())
}

fn read_all(path: &Path) -> Result<Option<Vec<u8>>> {
    match File::open(path) {
        Ok(mut file) => {
            let mut raw = Vec::new();
            file.read_to_end(&mut raw)?;
            Ok(Some(raw))
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}
