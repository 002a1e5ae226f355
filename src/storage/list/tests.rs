use super::{List, ListRoot};
use crate::primitives::io::MemIo;
use crate::primitives::pager::{Backing, PagerOptions};
use crate::storage::cache::PageCache;
use crate::storage::{Direction, Rebalance};
use crate::types::{Result, StoreError};
use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn memory_cache() -> PageCache {
    PageCache::open(Backing::Memory(MemIo::new()), &PagerOptions::default())
        .expect("open memory cache")
}

fn chunk_count(list: &List<u64>, cache: &mut PageCache) -> Result<usize> {
    let root: ListRoot = list.descriptor(cache)?;
    let mut count = 0;
    let mut cursor = root.left;
    while let Some(page) = cursor.as_option() {
        let chunk: super::ListChunk<u64> = cache.get(page)?;
        count += 1;
        cursor = chunk.right;
    }
    Ok(count)
}

#[test]
fn small_chunks_keep_logical_order() -> Result<()> {
    let mut cache = memory_cache();
    let list = List::<u64>::create(&mut cache, 2)?;
    let (x, y, z) = (u64::from(b'x'), u64::from(b'y'), u64::from(b'z'));
    list.insert_at(&mut cache, 0, x)?;
    list.insert_at(&mut cache, 0, y)?;
    list.insert_at(&mut cache, 1, z)?;
    assert_eq!(list.to_vec(&mut cache)?, vec![y, z, x]);
    assert!(list.is_balanced(&mut cache)?);

    let (removed, outcome) = list.remove_at(&mut cache, 1)?;
    assert_eq!(removed, z);
    assert_eq!(outcome, Rebalance::Merged);
    assert_eq!(list.to_vec(&mut cache)?, vec![y, x]);
    assert_eq!(chunk_count(&list, &mut cache)?, 1);
    assert!(list.is_balanced(&mut cache)?);
    Ok(())
}

#[test]
fn negative_positions_count_from_tail() -> Result<()> {
    let mut cache = memory_cache();
    let list = List::<u64>::create(&mut cache, 3)?;
    for value in 0..5u64 {
        list.insert_at(&mut cache, -1, value)?;
    }
    assert_eq!(list.to_vec(&mut cache)?, vec![0, 1, 2, 3, 4]);
    assert_eq!(list.get_at(&mut cache, -1)?, 4);
    assert_eq!(list.get_at(&mut cache, -5)?, 0);
    list.insert_at(&mut cache, -2, 9)?;
    assert_eq!(list.to_vec(&mut cache)?, vec![0, 1, 2, 3, 9, 4]);
    assert_eq!(list.set_at(&mut cache, -3, 7)?, 3);
    assert_eq!(list.remove_at(&mut cache, -1)?.0, 4);
    assert_eq!(list.to_vec(&mut cache)?, vec![0, 1, 2, 7, 9]);

    assert!(matches!(list.get_at(&mut cache, 5), Err(StoreError::Invalid(_))));
    assert!(matches!(list.get_at(&mut cache, -6), Err(StoreError::Invalid(_))));
    assert!(matches!(
        list.insert_at(&mut cache, 7, 1),
        Err(StoreError::Invalid(_))
    ));
    assert!(matches!(
        list.insert_at(&mut cache, -7, 1),
        Err(StoreError::Invalid(_))
    ));
    Ok(())
}

#[test]
fn full_chunk_offloads_into_neighbour_before_splitting() -> Result<()> {
    let mut cache = memory_cache();
    let list = List::<u64>::create(&mut cache, 4)?;
    for value in 0..8u64 {
        list.insert_at(&mut cache, -1, value)?;
    }
    // the split at 4 leaves room on the left, later appends push into it
    assert_eq!(chunk_count(&list, &mut cache)?, 2);
    let pages_before = cache.meta().number_of_pages;
    list.remove_at(&mut cache, 0)?;
    list.insert_at(&mut cache, 3, 100)?;
    assert_eq!(cache.meta().number_of_pages, pages_before);
    assert_eq!(list.to_vec(&mut cache)?, vec![1, 2, 3, 100, 4, 5, 6, 7]);
    assert!(list.is_balanced(&mut cache)?);
    Ok(())
}

#[test]
fn removing_last_element_reports_emptied() -> Result<()> {
    let mut cache = memory_cache();
    let list = List::<u64>::create(&mut cache, 4)?;
    list.insert_at(&mut cache, 0, 1)?;
    list.insert_at(&mut cache, 0, 2)?;
    assert_eq!(list.remove_at(&mut cache, 0)?, (2, Rebalance::Ok));
    assert_eq!(list.remove_at(&mut cache, 0)?, (1, Rebalance::Emptied));
    let root = list.descriptor(&mut cache)?;
    assert!(root.left.is_none() && root.right.is_none());
    assert!(list.is_balanced(&mut cache)?);
    Ok(())
}

#[test]
fn bounded_iteration_in_both_directions() -> Result<()> {
    let mut cache = memory_cache();
    let list = List::<u64>::create(&mut cache, 3)?;
    for value in 0..10u64 {
        list.insert_at(&mut cache, -1, value)?;
    }
    assert_eq!(list.iter(&mut cache, Direction::Forward, 4)?, vec![0, 1, 2, 3]);
    assert_eq!(list.iter(&mut cache, Direction::Backward, 4)?, vec![9, 8, 7, 6]);
    assert_eq!(list.iter(&mut cache, Direction::Backward, 100)?.len(), 10);
    Ok(())
}

#[test]
fn destroy_frees_chunks_for_reuse() -> Result<()> {
    let mut cache = memory_cache();
    let list = List::<u64>::create(&mut cache, 2)?;
    for value in 0..9u64 {
        list.insert_at(&mut cache, 0, value)?;
    }
    let pages = cache.meta().number_of_pages;
    list.destroy(&mut cache)?;
    let again = List::<u64>::create(&mut cache, 2)?;
    for value in 0..9u64 {
        again.insert_at(&mut cache, 0, value)?;
    }
    assert_eq!(cache.meta().number_of_pages, pages);
    Ok(())
}

#[test]
fn chunk_size_limits_are_enforced() {
    let mut cache = memory_cache();
    assert!(matches!(
        List::<u64>::create(&mut cache, 1),
        Err(StoreError::Invalid(_))
    ));
    assert!(matches!(
        List::<u64>::create(&mut cache, 126),
        Err(StoreError::Invalid(_))
    ));
}

#[test]
fn randomized_sequence_matches_vec_model() -> Result<()> {
    let mut cache = memory_cache();
    let list = List::<u64>::create(&mut cache, 5)?;
    let mut model: Vec<u64> = Vec::new();
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    for step in 0..4_000u64 {
        if model.is_empty() || rng.gen_bool(0.55) {
            let pos = rng.gen_range(0..=model.len());
            list.insert_at(&mut cache, pos as i64, step)?;
            model.insert(pos, step);
        } else {
            let pos = rng.gen_range(0..model.len());
            let (value, outcome) = list.remove_at(&mut cache, pos as i64)?;
            assert_eq!(value, model.remove(pos));
            assert_eq!(outcome == Rebalance::Emptied, model.is_empty());
        }
        if step % 250 == 0 {
            assert!(list.is_balanced(&mut cache)?);
            assert_eq!(list.to_vec(&mut cache)?, model);
            cache.commit()?;
        }
    }
    for (i, value) in model.iter().enumerate() {
        assert_eq!(list.get_at(&mut cache, i as i64)?, *value);
    }
    assert!(list.is_balanced(&mut cache)?);
    Ok(())
}

#[derive(Clone, Debug)]
enum PropOp {
    Insert(i64, u64),
    Remove(i64),
}

fn op_strategy() -> impl Strategy<Value = PropOp> {
    prop_oneof![
        (-40i64..40, any::<u64>()).prop_map(|(p, v)| PropOp::Insert(p, v)),
        (-40i64..40).prop_map(PropOp::Remove),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]
    #[test]
    fn list_matches_vec_random_ops(
        max_chunk in 2u32..6,
        ops in prop::collection::vec(op_strategy(), 1..150),
    ) {
        let mut cache = memory_cache();
        let list = List::<u64>::create(&mut cache, max_chunk).expect("create list");
        let mut model: Vec<u64> = Vec::new();
        for op in ops {
            match op {
                PropOp::Insert(pos, value) => {
                    let len = model.len() as i64;
                    let at = if pos < 0 { pos + len + 1 } else { pos };
                    let result = list.insert_at(&mut cache, pos, value);
                    if (0..=len).contains(&at) {
                        prop_assert!(result.is_ok());
                        model.insert(at as usize, value);
                    } else {
                        prop_assert!(matches!(result, Err(StoreError::Invalid(_))));
                    }
                }
                PropOp::Remove(pos) => {
                    let len = model.len() as i64;
                    let at = if pos < 0 { pos + len } else { pos };
                    let result = list.remove_at(&mut cache, pos);
                    if (0..len).contains(&at) {
                        let (value, _) = result.expect("remove");
                        prop_assert_eq!(value, model.remove(at as usize));
                    } else {
                        prop_assert!(matches!(result, Err(StoreError::Invalid(_))));
                    }
                }
            }
            prop_assert!(list.is_balanced(&mut cache).expect("audit"));
        }
        prop_assert_eq!(list.to_vec(&mut cache).expect("collect"), model);
    }
}
