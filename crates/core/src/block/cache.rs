//! LRU block cache.
//!
//! Maps a guest key (PC, plus the SATP tag when address translation is
//! active) to the owned `Block`. The cache holds a power-of-two number of
//! slots; a full insertion evicts the least-recently-used entry and returns
//! it so the caller can destroy it and drop any native code that referred to
//! it.
//!
//! Recency is kept in an intrusive doubly-linked list threaded through the
//! fixed slot array by index; the key map is a hash index over the same
//! slots. A secondary page index allows O(1) invalidation of every block
//! whose starting page matches a given virtual page.
//!
//! Invariant: at most one block exists per key. A second `put` with the same
//! key replaces the first and returns the prior block.

use std::collections::HashMap;

use super::{Block, BlockRef};
use crate::common::PAGE_SHIFT;

/// Sentinel index terminating the intrusive LRU list.
const NIL: u32 = u32::MAX;

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    key: u64,
    block: Option<Block>,
    lru_prev: u32,
    lru_next: u32,
}

/// Fixed-capacity LRU map from guest key to owned block.
#[derive(Debug)]
pub struct BlockCache {
    slots: Vec<Slot>,
    map: HashMap<u64, u32>,
    page_index: HashMap<u32, Vec<u32>>,
    free: Vec<u32>,
    head: u32,
    tail: u32,
}

/// Builds the cache key from a starting PC and the SATP tag.
#[inline]
pub const fn cache_key(pc: u32, satp: u32) -> u64 {
    (pc as u64) | ((satp as u64) << 32)
}

impl BlockCache {
    /// Creates a cache with `2^bits` slots.
    pub fn new(bits: u8) -> Self {
        let capacity = 1usize << bits;
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::default);
        Self {
            slots,
            map: HashMap::with_capacity(capacity),
            page_index: HashMap::new(),
            free: (0..capacity as u32).rev().collect(),
            head: NIL,
            tail: NIL,
        }
    }

    /// Number of blocks currently cached.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns whether the cache holds no blocks.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Looks up the block for `key`, optionally promoting it to
    /// most-recently-used.
    pub fn get(&mut self, key: u64, update_lru: bool) -> Option<BlockRef> {
        let idx = *self.map.get(&key)?;
        if update_lru {
            self.lru_unlink(idx);
            self.lru_push_front(idx);
        }
        Some(BlockRef {
            index: idx,
            generation: self.slots[idx as usize].generation,
        })
    }

    /// Resolves a handle, returning `None` when the referenced slot has been
    /// reused since the handle was created.
    #[inline]
    pub fn resolve(&self, r: BlockRef) -> Option<&Block> {
        let slot = self.slots.get(r.index as usize)?;
        if slot.generation != r.generation {
            return None;
        }
        slot.block.as_ref()
    }

    /// Mutable variant of [`Self::resolve`].
    #[inline]
    pub fn resolve_mut(&mut self, r: BlockRef) -> Option<&mut Block> {
        let slot = self.slots.get_mut(r.index as usize)?;
        if slot.generation != r.generation {
            return None;
        }
        slot.block.as_mut()
    }

    /// Inserts a block under `key`, returning the block it displaced: the
    /// previous holder of the same key, or the LRU victim when the cache was
    /// full. The inserted block becomes most-recently-used.
    pub fn put(&mut self, key: u64, block: Block) -> Option<Block> {
        let mut displaced = None;

        if let Some(&idx) = self.map.get(&key) {
            displaced = self.remove_slot(idx);
        } else if self.free.is_empty() {
            let victim = self.tail;
            debug_assert_ne!(victim, NIL);
            displaced = self.remove_slot(victim);
        }

        #[allow(clippy::unwrap_used)] // a slot was freed above if none were
        let idx = self.free.pop().unwrap();
        let page = block.pc_start >> PAGE_SHIFT;
        let slot = &mut self.slots[idx as usize];
        slot.key = key;
        slot.block = Some(block);
        let _ = self.map.insert(key, idx);
        self.page_index.entry(page).or_default().push(idx);
        self.lru_push_front(idx);
        displaced
    }

    /// Removes and returns the block in `idx`, bumping the slot generation.
    fn remove_slot(&mut self, idx: u32) -> Option<Block> {
        let key;
        let block;
        {
            let slot = &mut self.slots[idx as usize];
            block = slot.block.take()?;
            key = slot.key;
            slot.generation = slot.generation.wrapping_add(1);
        }
        let _ = self.map.remove(&key);
        let page = block.pc_start >> PAGE_SHIFT;
        if let Some(list) = self.page_index.get_mut(&page) {
            list.retain(|&i| i != idx);
            if list.is_empty() {
                let _ = self.page_index.remove(&page);
            }
        }
        self.lru_unlink(idx);
        self.free.push(idx);
        Some(block)
    }

    /// Removes every block whose SATP tag matches, returning the count.
    pub fn invalidate_by_satp(&mut self, satp: u32) -> u32 {
        let victims: Vec<u32> = self
            .map
            .iter()
            .filter(|&(&key, _)| (key >> 32) as u32 == satp)
            .map(|(_, &idx)| idx)
            .collect();
        let mut n = 0;
        for idx in victims {
            if self.remove_slot(idx).is_some() {
                n += 1;
            }
        }
        n
    }

    /// Removes every block starting in the page of `va` with a matching SATP
    /// tag, returning the count. O(1) in the cache size through the page
    /// index.
    pub fn invalidate_by_page(&mut self, va: u32, satp: u32) -> u32 {
        let page = va >> PAGE_SHIFT;
        let Some(list) = self.page_index.get(&page) else {
            return 0;
        };
        let victims: Vec<u32> = list
            .iter()
            .copied()
            .filter(|&idx| (self.slots[idx as usize].key >> 32) as u32 == satp)
            .collect();
        let mut n = 0;
        for idx in victims {
            if self.remove_slot(idx).is_some() {
                n += 1;
            }
        }
        n
    }

    /// Applies `f` to every cached block. Used by the code-cache flush to
    /// clear the `hot`/`hot2` promotion state.
    pub fn for_each_mut<F: FnMut(&mut Block)>(&mut self, mut f: F) {
        for slot in &mut self.slots {
            if let Some(block) = slot.block.as_mut() {
                f(block);
            }
        }
    }

    /// Destroys every cached block, invoking `f` on each before it is
    /// dropped. All outstanding handles become stale.
    pub fn clear<F: FnMut(&mut Block)>(&mut self, mut f: F) {
        for idx in 0..self.slots.len() as u32 {
            if self.slots[idx as usize].block.is_some()
                && let Some(mut block) = self.remove_slot(idx)
            {
                f(&mut block);
            }
        }
    }

    fn lru_push_front(&mut self, idx: u32) {
        let old_head = self.head;
        {
            let slot = &mut self.slots[idx as usize];
            slot.lru_prev = NIL;
            slot.lru_next = old_head;
        }
        if old_head != NIL {
            self.slots[old_head as usize].lru_prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn lru_unlink(&mut self, idx: u32) {
        let (prev, next) = {
            let slot = &self.slots[idx as usize];
            (slot.lru_prev, slot.lru_next)
        };
        if prev != NIL {
            self.slots[prev as usize].lru_next = next;
        } else if self.head == idx {
            self.head = next;
        }
        if next != NIL {
            self.slots[next as usize].lru_prev = prev;
        } else if self.tail == idx {
            self.tail = prev;
        }
        let slot = &mut self.slots[idx as usize];
        slot.lru_prev = NIL;
        slot.lru_next = NIL;
    }
}
