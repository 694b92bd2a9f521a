//! Block cache unit tests.
//!
//! LRU ordering, the one-block-per-key invariant, generational handles,
//! page invalidation, and the flush contract on promotion flags.

use pretty_assertions::assert_eq;
use rivet_core::block::cache::{BlockCache, cache_key};
use rivet_core::block::Block;

fn block_at(pc: u32) -> Block {
    Block {
        pc_start: pc,
        pc_end: pc + 4,
        ..Block::default()
    }
}

fn put_at(cache: &mut BlockCache, pc: u32) -> Option<Block> {
    cache.put(cache_key(pc, 0), block_at(pc))
}

#[test]
fn put_then_get_resolves() {
    let mut cache = BlockCache::new(4);
    assert!(put_at(&mut cache, 0x1000).is_none());
    let r = cache.get(cache_key(0x1000, 0), true).unwrap();
    assert_eq!(cache.resolve(r).unwrap().pc_start, 0x1000);
    assert_eq!(cache.len(), 1);
}

#[test]
fn missing_key_is_none() {
    let mut cache = BlockCache::new(4);
    assert!(cache.get(cache_key(0x4000, 0), true).is_none());
}

#[test]
fn same_key_put_replaces_and_returns_prior() {
    let mut cache = BlockCache::new(4);
    assert!(put_at(&mut cache, 0x1000).is_none());
    let mut replacement = block_at(0x1000);
    replacement.pc_end = 0x1010;
    let prior = cache.put(cache_key(0x1000, 0), replacement).unwrap();
    assert_eq!(prior.pc_end, 0x1004);
    assert_eq!(cache.len(), 1);
    let r = cache.get(cache_key(0x1000, 0), false).unwrap();
    assert_eq!(cache.resolve(r).unwrap().pc_end, 0x1010);
}

#[test]
fn full_insert_evicts_least_recently_used() {
    let mut cache = BlockCache::new(2); // 4 slots
    for pc in [0x1000, 0x2000, 0x3000, 0x4000] {
        assert!(put_at(&mut cache, pc).is_none());
    }
    // Touch the oldest so 0x2000 becomes the LRU victim.
    let _ = cache.get(cache_key(0x1000, 0), true);
    let evicted = put_at(&mut cache, 0x5000).unwrap();
    assert_eq!(evicted.pc_start, 0x2000);
    assert!(cache.get(cache_key(0x1000, 0), false).is_some());
    assert!(cache.get(cache_key(0x2000, 0), false).is_none());
}

#[test]
fn lookup_without_promotion_keeps_lru_order() {
    let mut cache = BlockCache::new(2);
    for pc in [0x1000, 0x2000, 0x3000, 0x4000] {
        assert!(put_at(&mut cache, pc).is_none());
    }
    // A non-promoting probe must not save 0x1000 from eviction.
    let _ = cache.get(cache_key(0x1000, 0), false);
    let evicted = put_at(&mut cache, 0x5000).unwrap();
    assert_eq!(evicted.pc_start, 0x1000);
}

#[test]
fn stale_handles_resolve_to_none_after_eviction() {
    let mut cache = BlockCache::new(1); // 2 slots
    let _ = put_at(&mut cache, 0x1000);
    let stale = cache.get(cache_key(0x1000, 0), false).unwrap();
    let _ = put_at(&mut cache, 0x2000);
    let _ = put_at(&mut cache, 0x3000); // evicts 0x1000
    assert!(cache.resolve(stale).is_none());
}

#[test]
fn satp_distinguishes_keys() {
    let mut cache = BlockCache::new(4);
    let _ = cache.put(cache_key(0x1000, 0), block_at(0x1000));
    let mut tagged = block_at(0x1000);
    tagged.satp = 7;
    let prior = cache.put(cache_key(0x1000, 7), tagged);
    assert!(prior.is_none());
    assert_eq!(cache.len(), 2);
}

#[test]
fn invalidate_by_page_removes_only_that_page() {
    let mut cache = BlockCache::new(4);
    for pc in [0x1000, 0x1800, 0x2000, 0x3000] {
        let _ = put_at(&mut cache, pc);
    }
    let n = cache.invalidate_by_page(0x1234, 0);
    assert_eq!(n, 2);
    assert!(cache.get(cache_key(0x1000, 0), false).is_none());
    assert!(cache.get(cache_key(0x1800, 0), false).is_none());
    assert!(cache.get(cache_key(0x2000, 0), false).is_some());
}

#[test]
fn invalidate_by_satp_matches_tag() {
    let mut cache = BlockCache::new(4);
    let _ = cache.put(cache_key(0x1000, 1), block_at(0x1000));
    let _ = cache.put(cache_key(0x2000, 1), block_at(0x2000));
    let _ = cache.put(cache_key(0x3000, 2), block_at(0x3000));
    assert_eq!(cache.invalidate_by_satp(1), 2);
    assert_eq!(cache.len(), 1);
}

#[test]
fn clear_destroys_everything_and_runs_callback() {
    let mut cache = BlockCache::new(3);
    for pc in [0x1000, 0x2000, 0x3000] {
        let _ = put_at(&mut cache, pc);
    }
    let handle = cache.get(cache_key(0x2000, 0), false).unwrap();
    let mut seen = 0;
    cache.clear(|_| seen += 1);
    assert_eq!(seen, 3);
    assert!(cache.is_empty());
    assert!(cache.resolve(handle).is_none());
}

#[test]
fn flush_clears_every_promotion_flag() {
    let mut cache = BlockCache::new(3);
    for pc in [0x1000, 0x2000, 0x3000] {
        let mut b = block_at(pc);
        b.hot = true;
        b.hot2 = true;
        b.native_invocations = 99;
        let _ = cache.put(cache_key(pc, 0), b);
    }
    cache.for_each_mut(Block::clear_native);
    cache.for_each_mut(|b| {
        assert!(!b.hot);
        assert!(!b.hot2);
        assert!(b.native_fn.is_none());
        assert_eq!(b.native_invocations, 0);
    });
}

#[test]
fn reinsert_after_eviction_gets_fresh_generation() {
    let mut cache = BlockCache::new(1);
    let _ = put_at(&mut cache, 0x1000);
    let old = cache.get(cache_key(0x1000, 0), false).unwrap();
    let _ = put_at(&mut cache, 0x2000);
    let _ = put_at(&mut cache, 0x3000);
    let _ = put_at(&mut cache, 0x1000);
    let new = cache.get(cache_key(0x1000, 0), false).unwrap();
    assert!(cache.resolve(old).is_none() || old != new);
    assert!(cache.resolve(new).is_some());
}
