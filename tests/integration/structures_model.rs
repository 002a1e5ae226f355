#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

use pagekv::primitives::io::MemIo;
use pagekv::storage::keys::SortedSetRoot;
use pagekv::storage::skiplist::RangeMode;
use pagekv::types::{PageId, Result, StoreError};
use pagekv::{Config, Db, KeyKind};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::tempdir;

#[test]
fn sorted_set_survives_reopen_and_matches_model() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("zset.pkv");
    let mut model: BTreeMap<Vec<u8>, f64> = BTreeMap::new();
    {
        let mut db = Db::open(&path, Config::testing(31))?;
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        for step in 0..600 {
            let member = format!("player-{}", rng.gen_range(0..80)).into_bytes();
            let score = f64::from(rng.gen_range(-50..50));
            let added = db.zadd(b"board", score, &member)?;
            assert_eq!(added, model.insert(member, score).is_none());
            if step % 100 == 0 {
                db.commit()?;
            }
        }
        db.commit()?;
    }

    let mut db = Db::open(&path, Config::testing(31))?;
    let mut expected: Vec<(Vec<u8>, f64)> = model
        .iter()
        .map(|(member, score)| (member.clone(), *score))
        .collect();
    expected.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    assert_eq!(db.zrange(b"board", 0, -1)?, expected);
    assert_eq!(db.zcard(b"board")?, model.len() as u64);
    for (rank, (member, score)) in expected.iter().enumerate() {
        assert_eq!(db.zrank(b"board", member)?, Some(rank as u64));
        assert_eq!(db.zscore(b"board", member)?, Some(*score));
    }

    let record = db
        .get_kind(b"board", KeyKind::SortedSet)?
        .ok_or(StoreError::NotFound)?;
    let root: SortedSetRoot = db.cache().get(record.value_page)?;
    assert!(root.ranks().is_balanced(db.cache())?);
    assert!(root.members().is_balanced(db.cache())?);

    // rank of the first member with score >= 0 equals the count of negatives
    let negatives = model.values().filter(|score| **score < 0.0).count() as u64;
    assert_eq!(db.zcount(b"board", Unbounded, Excluded(0.0))?, negatives);
    if let Ok((_, node, rank)) =
        root.ranks()
            .first_node(db.cache(), 0.0, RangeMode::Include, None)
    {
        assert_eq!(rank, negatives);
        assert!(node.score >= 0.0);
    }
    Ok(())
}

#[test]
fn list_hash_and_set_values_roundtrip_through_keys() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("mixed.pkv");
    {
        let mut db = Db::open(&path, Config::testing(41))?;
        db.rpush(b"words", &["alpha", "beta", "gamma"])?;
        db.hset(b"info", b"name", b"pagekv")?;
        db.hset(b"info", b"kind", b"store")?;
        db.sadd(b"tags", &["x", "y"])?;
        db.commit()?;
    }

    let mut db = Db::open(&path, Config::testing(41))?;
    let mut names = db.keys()?;
    names.sort();
    assert_eq!(names, vec![b"info".to_vec(), b"tags".to_vec(), b"words".to_vec()]);

    assert_eq!(
        db.lrange(b"words", 0, -1)?,
        vec![b"alpha".to_vec(), b"beta".to_vec(), b"gamma".to_vec()]
    );
    assert_eq!(db.hget(b"info", b"name")?, Some(b"pagekv".to_vec()));
    assert_eq!(db.hlen(b"info")?, 2);
    assert_eq!(db.scard(b"tags")?, 2);
    assert!(db.sismember(b"tags", b"x")?);
    assert!(!db.sismember(b"tags", b"z")?);

    let pages = db.cache().meta().number_of_pages;
    for key in [&b"words"[..], b"info", b"tags"] {
        assert!(db.delete(key)?);
    }
    assert!(db.is_empty()?);
    assert_eq!(db.cache().database_root(0)?, PageId::NONE);
    db.commit()?;

    // everything freed above is reused before the store grows
    db.lpush(b"words", &["alpha", "beta", "gamma"])?;
    assert_eq!(db.lindex(b"words", 0)?, Some(b"gamma".to_vec()));
    assert_eq!(db.cache().meta().number_of_pages, pages);
    Ok(())
}

#[test]
fn draining_values_through_commands_frees_their_keys() -> Result<()> {
    let io = MemIo::new();
    let mut db = Db::open_io(io.clone(), Config::testing(47))?;
    db.rpush(b"queue", &["a", "b"])?;
    db.sadd(b"tags", &["t"])?;
    db.hset(b"info", b"f", b"v")?;
    db.zadd(b"board", 1.0, b"m")?;
    db.commit()?;

    assert_eq!(db.lpop(b"queue")?, Some(b"a".to_vec()));
    assert_eq!(db.rpop(b"queue")?, Some(b"b".to_vec()));
    assert_eq!(db.spop(b"tags")?, Some(b"t".to_vec()));
    assert_eq!(db.hdel(b"info", &["f"])?, 1);
    assert_eq!(db.zrem(b"board", &["m"])?, 1);
    assert!(db.is_empty()?);
    db.commit()?;

    let mut reopened = Db::open_io(io, Config::testing(47))?;
    assert!(reopened.is_empty()?);
    assert_eq!(reopened.cache().database_root(0)?, PageId::NONE);
    Ok(())
}

#[test]
fn dirty_hash_tracks_whether_anything_changed() -> Result<()> {
    let mut db = Db::open_memory(Config::testing(51))?;
    db.set_string(b"k", b"v")?;
    db.commit()?;

    let clean = db.dirty_hash()?;
    db.get_string(b"k")?;
    db.keys()?;
    assert_eq!(db.dirty_hash()?, clean);
    assert!(!db.is_dirty());

    db.touch(b"k")?;
    let touched = db.dirty_hash()?;
    assert_ne!(touched, clean);
    db.discard();
    assert_eq!(db.dirty_hash()?, clean);
    Ok(())
}
