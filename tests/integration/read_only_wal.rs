#![allow(missing_docs)]

use std::path::Path;

use pagekv::primitives::pager::{wal_path, Backing, OpenMode, PagerOptions, Synchronous};
use pagekv::primitives::wal::{Wal, WalPage};
use pagekv::storage::cache::PageCache;
use pagekv::storage::object::RawPage;
use pagekv::types::{PageId, Result, StoreError};
use pagekv::{Config, Db};
use tempfile::tempdir;

fn read_only() -> PagerOptions {
    PagerOptions {
        mode: OpenMode::ReadOnly,
        ..PagerOptions::default()
    }
}

fn has_pending_record(path: &Path) -> Result<bool> {
    Wal::new(wal_path(path), Synchronous::Full).has_record()
}

#[test]
fn read_only_handle_overlays_pending_record_without_applying_it() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("ro.pkv");
    let options = PagerOptions::default();
    let page_size = {
        let mut cache = PageCache::open(Backing::File(path.clone()), &options)?;
        let page = cache.alloc_page()?;
        cache.put(page, RawPage(vec![0x01; 8]))?;
        cache.commit()?;
        cache.page_size()
    };

    let mut header = vec![0u8; page_size];
    {
        let cache = PageCache::open(Backing::File(path.clone()), &options)?;
        let mut meta = cache.meta().clone();
        meta.database_roots[1] = PageId(1);
        meta.encode(&mut header);
    }
    let pages = vec![
        WalPage {
            page: PageId(0),
            bytes: header,
        },
        WalPage {
            page: PageId(1),
            bytes: vec![0x02; page_size],
        },
    ];
    drop(Wal::new(wal_path(&path), options.synchronous).write_record(page_size, &pages)?);
    let store_before = std::fs::read(&path)?;

    let mut reader = PageCache::open(Backing::File(path.clone()), &read_only())?;
    assert!(reader.is_read_only());
    assert_eq!(reader.database_root(1)?, PageId(1));
    assert_eq!(reader.get::<RawPage>(PageId(1))?, RawPage(vec![0x02; page_size]));
    assert!(has_pending_record(&path)?);
    assert_eq!(std::fs::read(&path)?, store_before);

    assert!(matches!(reader.alloc_page(), Err(StoreError::ReadOnly)));
    assert!(matches!(
        reader.put(PageId(1), RawPage(Vec::new())),
        Err(StoreError::ReadOnly)
    ));
    assert!(matches!(
        reader.set_database_root(0, PageId(1)),
        Err(StoreError::ReadOnly)
    ));
    assert!(reader.commit().is_ok());
    drop(reader);

    let mut writer = PageCache::open(Backing::File(path.clone()), &options)?;
    assert!(!has_pending_record(&path)?);
    assert_eq!(writer.database_root(1)?, PageId(1));
    assert_eq!(writer.get::<RawPage>(PageId(1))?, RawPage(vec![0x02; page_size]));
    Ok(())
}

#[test]
fn read_only_db_hides_expired_keys_without_deleting() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("ro_expiry.pkv");
    {
        let mut db = Db::open(&path, Config::testing(9))?;
        db.set_string(b"stale", b"old")?;
        db.set_expiry(b"stale", 1)?;
        db.set_string(b"fresh", b"new")?;
        db.commit()?;
    }

    let mut reader = Db::open(&path, Config::testing(9).read_only())?;
    assert_eq!(reader.get(b"stale")?, None);
    assert_eq!(reader.keys()?, vec![b"fresh".to_vec()]);
    assert_eq!(reader.len()?, 2);
    assert!(!reader.is_dirty());
    drop(reader);

    let mut writer = Db::open(&path, Config::testing(9))?;
    assert_eq!(writer.get(b"stale")?, None);
    assert_eq!(writer.len()?, 1);
    Ok(())
}

#[test]
fn reload_observes_other_handles_commits() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("reload.pkv");
    let mut writer = Db::open(&path, Config::testing(4))?;
    writer.set_string(b"a", b"1")?;
    writer.commit()?;

    let mut reader = Db::open(&path, Config::testing(4).read_only())?;
    assert_eq!(reader.get_string(b"b")?, None);

    writer.set_string(b"b", b"2")?;
    writer.commit()?;
    reader.cache().reload()?;
    assert_eq!(reader.get_string(b"b")?, Some(b"2".to_vec()));
    Ok(())
}

#[test]
fn read_only_open_of_missing_store_fails() {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("nothing.pkv");
    assert!(Db::open(&path, Config::testing(1).read_only()).is_err());
}
