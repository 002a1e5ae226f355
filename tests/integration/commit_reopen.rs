#![allow(missing_docs)]

use std::path::Path;

use pagekv::primitives::io::MemIo;
use pagekv::primitives::pager::{wal_path, Backing, OpenMode, PagerOptions, Synchronous};
use pagekv::primitives::wal::Wal;
use pagekv::storage::cache::PageCache;
use pagekv::storage::object::RawPage;
use pagekv::types::{PageId, Result, StoreError};
use pagekv::{Config, Db};
use tempfile::tempdir;

fn page_image(page_size: usize, fill: u8) -> RawPage {
    let mut bytes = vec![0u8; page_size];
    bytes[..16].fill(fill);
    bytes[page_size - 1] = fill;
    RawPage(bytes)
}

fn has_pending_record(path: &Path) -> Result<bool> {
    Wal::new(wal_path(path), Synchronous::Full).has_record()
}

#[test]
fn committed_pages_survive_reopen_and_wal_is_emptied() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("commit.pkv");
    let options = PagerOptions::default();

    let mut staged = Vec::new();
    {
        let mut cache = PageCache::open(Backing::File(path.clone()), &options)?;
        let page_size = cache.page_size();
        for fill in [0x11u8, 0x22, 0x33] {
            let page = cache.alloc_page()?;
            let image = page_image(page_size, fill);
            cache.put(page, image.clone())?;
            staged.push((page, image));
        }
        cache.commit()?;
        assert!(!cache.is_dirty());
    }
    assert!(!has_pending_record(&path)?);

    let mut cache = PageCache::open(Backing::File(path.clone()), &options)?;
    assert_eq!(cache.meta().number_of_pages, 4);
    for (page, image) in staged {
        assert_eq!(cache.get::<RawPage>(page)?, image);
    }
    assert!(!has_pending_record(&path)?);
    Ok(())
}

#[test]
fn discard_leaves_medium_untouched() -> Result<()> {
    let mem = MemIo::new();
    let options = PagerOptions::default();
    let mut cache = PageCache::open(Backing::Memory(mem.clone()), &options)?;
    let before = mem.snapshot();
    let page = cache.alloc_page()?;
    cache.put(page, page_image(cache.page_size(), 0x7A))?;
    cache.set_database_root(2, page)?;
    cache.discard();
    assert_eq!(mem.snapshot(), before);
    assert_eq!(cache.database_root(2)?, PageId::NONE);
    assert!(matches!(cache.get::<RawPage>(page), Err(StoreError::NotFound)));
    Ok(())
}

#[test]
fn existing_store_keeps_its_page_size() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("sized.pkv");
    {
        let mut db = Db::open(&path, Config::testing(1).with_page_size(4096))?;
        db.set_string(b"k", b"v")?;
        db.commit()?;
    }
    let mut db = Db::open(&path, Config::testing(1).with_page_size(1024))?;
    assert_eq!(db.cache().page_size(), 4096);
    assert_eq!(db.get_string(b"k")?, Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn missing_store_is_not_created_without_create_mode() {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("absent.pkv");
    let config = Config::testing(1).with_mode(OpenMode::ReadWrite);
    assert!(Db::open(&path, config).is_err());
    assert!(!path.exists());
}

#[test]
fn durability_modes_all_commit() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    for mode in [Synchronous::Full, Synchronous::Normal, Synchronous::Off] {
        let path = dir.path().join(format!("sync_{}.pkv", mode.as_str()));
        {
            let mut db = Db::open(&path, Config::testing(3).with_synchronous(mode))?;
            db.set_string(b"mode", mode.as_str().as_bytes())?;
            db.commit()?;
        }
        let mut db = Db::open(&path, Config::testing(3))?;
        assert_eq!(db.get_string(b"mode")?, Some(mode.as_str().as_bytes().to_vec()));
        assert!(!Db::is_writer_active(&path)?);
    }
    Ok(())
}
