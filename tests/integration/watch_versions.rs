#![allow(missing_docs)]

use pagekv::primitives::io::MemIo;
use pagekv::types::{Result, StoreError};
use pagekv::{Config, Db, WatchOutcome};

fn shared_pair() -> Result<(Db, Db)> {
    let io = MemIo::new();
    let first = Db::open_io(io.clone(), Config::testing(21))?;
    let second = Db::open_io(io, Config::testing(22))?;
    Ok((first, second))
}

#[test]
fn concurrent_bump_conflicts_until_rewatched() -> Result<()> {
    let (mut watcher, mut other) = shared_pair()?;
    let created = watcher.set_string(b"k", b"v1")?;
    watcher.commit()?;

    let token = watcher.watch(b"k")?;
    assert_eq!(token.version, created);

    other.cache().reload()?;
    let bumped = other.touch(b"k")?;
    assert_eq!(bumped, created.wrapping_add(1).max(1));
    other.commit()?;

    watcher.cache().reload()?;
    assert_eq!(watcher.check_watch(&[token])?, WatchOutcome::Conflict);
    assert!(matches!(
        watcher.check_watch(&[token])?.into_result(),
        Err(StoreError::Conflict)
    ));

    let fresh = watcher.watch(b"k")?;
    assert_eq!(fresh.version, bumped);
    assert_eq!(watcher.check_watch(&[fresh])?, WatchOutcome::Ok);
    Ok(())
}

#[test]
fn every_mutation_moves_the_version() -> Result<()> {
    let mut db = Db::open_memory(Config::testing(5))?;
    let absent = db.watch(b"k")?;
    assert_eq!(absent.version, 0);
    assert_eq!(db.check_watch(&[absent])?, WatchOutcome::Ok);

    db.set_string(b"k", b"one")?;
    assert_eq!(db.check_watch(&[absent])?, WatchOutcome::Conflict);

    let token = db.watch(b"k")?;
    db.set_string(b"k", b"two")?;
    assert_eq!(db.check_watch(&[token])?, WatchOutcome::Conflict);

    let token = db.watch(b"k")?;
    db.set_expiry(b"k", u64::MAX)?;
    assert_eq!(db.check_watch(&[token])?, WatchOutcome::Conflict);

    let token = db.watch(b"k")?;
    assert!(db.delete(b"k")?);
    assert_eq!(db.check_watch(&[token])?, WatchOutcome::Conflict);
    Ok(())
}

#[test]
fn reads_leave_versions_alone() -> Result<()> {
    let mut db = Db::open_memory(Config::testing(6))?;
    db.set_string(b"k", b"v")?;
    let token = db.watch(b"k")?;
    for _ in 0..3 {
        assert_eq!(db.get_string(b"k")?, Some(b"v".to_vec()));
    }
    db.keys()?;
    db.commit()?;
    assert_eq!(db.check_watch(&[token])?, WatchOutcome::Ok);
    Ok(())
}

#[test]
fn watch_ignores_expiry() -> Result<()> {
    let mut db = Db::open_memory(Config::testing(8))?;
    db.set_string(b"k", b"v")?;
    db.set_expiry(b"k", 1)?;
    let token = db.watch(b"k")?;
    assert_ne!(token.version, 0);
    assert_eq!(db.check_watch(&[token])?, WatchOutcome::Ok);
    // a read evicts the expired key, which counts as a change
    assert_eq!(db.get(b"k")?, None);
    assert_eq!(db.check_watch(&[token])?, WatchOutcome::Conflict);
    Ok(())
}

#[test]
fn tokens_remember_their_database() -> Result<()> {
    let mut db = Db::open_memory(Config::testing(10))?;
    db.select(3)?;
    db.set_string(b"k", b"three")?;
    let token = db.watch(b"k")?;
    db.select(0)?;
    db.set_string(b"k", b"zero")?;
    assert_eq!(db.check_watch(&[token])?, WatchOutcome::Ok);
    db.select(3)?;
    db.touch(b"k")?;
    db.select(0)?;
    assert_eq!(db.check_watch(&[token])?, WatchOutcome::Conflict);
    Ok(())
}

#[test]
fn recreated_key_gets_a_fresh_version() -> Result<()> {
    let mut db = Db::open_memory(Config::testing(12))?;
    let first = db.set_string(b"k", b"a")?;
    db.delete(b"k")?;
    let second = db.set_string(b"k", b"b")?;
    assert_ne!(second, 0);
    assert_ne!(second, first);
    assert_ne!(second, first.wrapping_add(1));
    Ok(())
}
