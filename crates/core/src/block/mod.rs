//! Basic blocks.
//!
//! A `Block` is a maximal straight-line run of decoded instructions ending in
//! a control-flow terminator (or a forced split). This module provides:
//! 1. **Block record:** IR sequence, address range, and the tier-1/tier-2
//!    promotion state.
//! 2. **Handles:** Generational references used for cross-block links
//!    (`branch_taken`, `branch_untaken`, `predict`).
//! 3. **Builder, cache, fusion:** The submodules covering construction,
//!    LRU-managed ownership, and the macro-op rewrite pass.

/// The fetch-decode-append block builder.
pub mod builder;
/// The LRU block cache.
pub mod cache;
/// The macro-op fusion pass.
pub mod fusion;

use crate::isa::insn::Insn;

pub use cache::BlockCache;

/// Entry point of a tier-2 compiled function.
pub type Tier2Fn = unsafe extern "C" fn(rv: *mut crate::core::cpu::Cpu);

/// Generational handle to a block owned by the block cache.
///
/// Never owning: eviction bumps the slot generation, after which a stale
/// handle resolves to `None` and the holder re-resolves through the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockRef {
    /// Slot index inside the cache.
    pub index: u32,
    /// Generation the slot had when the handle was created.
    pub generation: u32,
}

/// A translated basic block.
#[derive(Debug, Default)]
pub struct Block {
    /// First guest address covered (inclusive).
    pub pc_start: u32,
    /// One past the last guest address covered (exclusive).
    pub pc_end: u32,
    /// Decoded instructions in program order; never empty once built.
    pub insns: Vec<Insn>,
    /// Cycle weight charged when the block executes. Initially the
    /// instruction count; fusion preserves it.
    pub cycle_cost: u32,
    /// The block ended because the next fetch would cross a page boundary,
    /// not because of a terminator.
    pub page_terminated: bool,
    /// Every instruction is tier-1 translatable. Blocks containing atomic,
    /// floating-point, CSR or fence content stay on the interpreter.
    pub translatable: bool,
    /// Address-translation tag; part of the cache key when translation is
    /// active, zero otherwise.
    pub satp: u32,
    /// Last-observed successor, used by the driver's prediction fast path.
    pub predict: Option<BlockRef>,

    /// Interpreted invocation count; reaching the tier-1 threshold queues
    /// compilation.
    pub invocations: u32,

    /// Tier-1 state: the block has native code in the current code-cache
    /// generation.
    pub hot: bool,
    /// Offset of the block's native entry inside the code cache.
    pub native_offset: u32,
    /// Native tier-1 invocation count; reaching the tier-2 threshold queues
    /// promotion.
    pub native_invocations: u32,

    /// Tier-2 state: an optimized function is installed for this block.
    pub hot2: bool,
    /// A tier-2 compile request has been queued (avoids duplicate requests).
    pub compiled: bool,
    /// Weak pointer to the tier-2 function; cleared on every code-cache
    /// flush together with `hot`/`hot2`.
    pub native_fn: Option<Tier2Fn>,
}

impl Block {
    /// Returns the terminator instruction.
    ///
    /// # Panics
    ///
    /// Panics if called on an empty block; blocks are never empty once the
    /// builder returns them.
    #[inline]
    pub fn terminator(&self) -> &Insn {
        #[allow(clippy::unwrap_used)]
        self.insns.last().unwrap()
    }

    /// Mutable access to the terminator instruction.
    ///
    /// # Panics
    ///
    /// Panics if called on an empty block.
    #[inline]
    pub fn terminator_mut(&mut self) -> &mut Insn {
        #[allow(clippy::unwrap_used)]
        self.insns.last_mut().unwrap()
    }

    /// Drops all promotion state. Invoked for every cached block when the
    /// code cache is flushed, atomically with the flush from the guest's
    /// point of view (the flush happens between blocks).
    #[inline]
    pub fn clear_native(&mut self) {
        self.hot = false;
        self.hot2 = false;
        self.compiled = false;
        self.native_offset = 0;
        self.native_invocations = 0;
        self.native_fn = None;
    }
}
