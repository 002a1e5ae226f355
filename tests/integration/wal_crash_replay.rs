#![allow(missing_docs)]

use std::fs::OpenOptions;
use std::path::Path;

use pagekv::primitives::pager::{wal_path, Backing, Meta, Pager, PagerOptions, Synchronous};
use pagekv::primitives::wal::{Wal, WalPage};
use pagekv::storage::cache::PageCache;
use pagekv::storage::object::RawPage;
use pagekv::types::{PageId, Result, StoreError};
use tempfile::tempdir;

fn options() -> PagerOptions {
    PagerOptions {
        synchronous: Synchronous::Normal,
        ..PagerOptions::default()
    }
}

fn has_pending_record(path: &Path) -> Result<bool> {
    Wal::new(wal_path(path), Synchronous::Full).has_record()
}

/// Creates a store with one committed page and returns its page size.
fn seed_store(path: &Path) -> Result<usize> {
    let mut cache = PageCache::open(Backing::File(path.to_path_buf()), &options())?;
    let page = cache.alloc_page()?;
    cache.put(page, RawPage(vec![0xAA; 32]))?;
    cache.commit()?;
    Ok(cache.page_size())
}

/// A record that rewrites page 1, appends page 2 and points database 0 at it.
fn post_state(path: &Path, page_size: usize) -> Result<Vec<WalPage>> {
    let cache = PageCache::open(Backing::File(path.to_path_buf()), &options())?;
    let mut meta: Meta = cache.meta().clone();
    meta.number_of_pages = 3;
    meta.next_free_page = PageId(3);
    meta.database_roots[0] = PageId(2);
    let mut header = vec![0u8; page_size];
    meta.encode(&mut header);
    Ok(vec![
        WalPage {
            page: PageId(0),
            bytes: header,
        },
        WalPage {
            page: PageId(1),
            bytes: vec![0xBB; page_size],
        },
        WalPage {
            page: PageId(2),
            bytes: vec![0xCC; page_size],
        },
    ])
}

fn assert_post_state(cache: &mut PageCache, page_size: usize) -> Result<()> {
    assert_eq!(cache.meta().number_of_pages, 3);
    assert_eq!(cache.database_root(0)?, PageId(2));
    assert_eq!(cache.get::<RawPage>(PageId(1))?, RawPage(vec![0xBB; page_size]));
    assert_eq!(cache.get::<RawPage>(PageId(2))?, RawPage(vec![0xCC; page_size]));
    Ok(())
}

#[test]
fn record_written_but_never_applied_is_replayed() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("replay.pkv");
    let page_size = seed_store(&path)?;
    let pages = post_state(&path, page_size)?;

    let guard = Wal::new(wal_path(&path), Synchronous::Full).write_record(page_size, &pages)?;
    drop(guard); // crash before apply
    assert!(has_pending_record(&path)?);

    let mut cache = PageCache::open(Backing::File(path.clone()), &options())?;
    assert_post_state(&mut cache, page_size)?;
    assert!(!has_pending_record(&path)?);
    Ok(())
}

#[test]
fn partially_applied_record_is_completed() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("partial.pkv");
    let page_size = seed_store(&path)?;
    let pages = post_state(&path, page_size)?;

    let guard = Wal::new(wal_path(&path), Synchronous::Full).write_record(page_size, &pages)?;
    {
        // crash after the first data page reached the store
        let (pager, _) = Pager::open(Backing::File(path.clone()), &options())?;
        pager.write(PageId(1), &pages[1].bytes)?;
    }
    drop(guard);

    let mut cache = PageCache::open(Backing::File(path.clone()), &options())?;
    assert_post_state(&mut cache, page_size)?;
    assert!(!has_pending_record(&path)?);
    Ok(())
}

#[test]
fn torn_record_leaves_pre_state() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("torn.pkv");
    let page_size = seed_store(&path)?;
    let pages = post_state(&path, page_size)?;

    drop(Wal::new(wal_path(&path), Synchronous::Full).write_record(page_size, &pages)?);
    let wal = OpenOptions::new().write(true).open(wal_path(&path))?;
    let len = wal.metadata()?.len();
    wal.set_len(len - 10)?;
    drop(wal);

    let mut cache = PageCache::open(Backing::File(path.clone()), &options())?;
    assert_eq!(cache.meta().number_of_pages, 2);
    assert_eq!(cache.database_root(0)?, PageId::NONE);
    let first: RawPage = cache.get(PageId(1))?;
    assert_eq!(&first.0[..32], &[0xAA; 32]);
    assert!(matches!(
        cache.get::<RawPage>(PageId(2)),
        Err(StoreError::NotFound)
    ));
    assert!(!has_pending_record(&path)?);
    Ok(())
}

#[test]
fn corrupted_checksum_is_discarded() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("flipped.pkv");
    let page_size = seed_store(&path)?;
    let pages = post_state(&path, page_size)?;

    drop(Wal::new(wal_path(&path), Synchronous::Full).write_record(page_size, &pages)?);
    let mut raw = std::fs::read(wal_path(&path))?;
    let last = raw.len() - 1;
    raw[last] ^= 0xFF;
    std::fs::write(wal_path(&path), &raw)?;

    let cache = PageCache::open(Backing::File(path.clone()), &options())?;
    assert_eq!(cache.meta().number_of_pages, 2);
    assert!(!has_pending_record(&path)?);
    Ok(())
}

#[test]
fn empty_wal_file_is_clean() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("empty.pkv");
    seed_store(&path)?;
    std::fs::write(wal_path(&path), b"")?;
    let cache = PageCache::open(Backing::File(path.clone()), &options())?;
    assert_eq!(cache.meta().number_of_pages, 2);
    assert!(!has_pending_record(&path)?);
    Ok(())
}
