//! Tier-2 optimizing JIT.
//!
//! Strong hotspots are re-translated into a value-based pseudo-IR, run
//! through scalar passes, and materialised as standalone native functions on
//! a worker thread. Finished functions are installed into the inline cache:
//! a direct-mapped `pc & (N-1)` array of atomic entry pointers probed both
//! by the driver and by the stub at the head of every tier-1 fragment. The
//! reader sees either the old or the new pointer; both are valid entry
//! points.

/// The pseudo-IR, trace builder, and scalar passes.
pub(crate) mod ir;
/// Lowering of optimized IR to native code.
pub(crate) mod lower;

use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::block::Tier2Fn;
use crate::common::CoreError;
use crate::config::Config;

use super::JitState;
use ir::T2Func;

/// Byte offset of the `pc` tag inside [`T2Entry`], consulted by the tier-1
/// probe stub.
pub(crate) const ENTRY_PC_OFFSET: i32 = 8;

/// One installed tier-2 function. The layout is part of the generated-code
/// contract: `func` at offset 0, `pc` at [`ENTRY_PC_OFFSET`].
#[repr(C)]
pub struct T2Entry {
    /// Entry point of the optimized function.
    pub func: Tier2Fn,
    /// Guest PC the function was compiled for.
    pub pc: u32,
}

/// Direct-mapped inline cache of tier-2 entry points.
pub struct InlineCache {
    slots: Vec<AtomicPtr<T2Entry>>,
    mask: u32,
    /// Owner of every live entry; installation and teardown serialise here.
    entries: Mutex<Vec<Box<T2Entry>>>,
}

impl InlineCache {
    /// Creates a cache with `2^bits` slots.
    pub fn new(bits: u8) -> Self {
        let n = 1usize << bits;
        let mut slots = Vec::with_capacity(n);
        slots.resize_with(n, || AtomicPtr::new(std::ptr::null_mut()));
        Self {
            slots,
            mask: (n - 1) as u32,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Host address of the slot for `pc`, baked into tier-1 probe stubs.
    pub fn slot_addr(&self, pc: u32) -> usize {
        std::ptr::from_ref(&self.slots[(pc & self.mask) as usize]) as usize
    }

    /// Driver-side probe: the installed function for `pc`, if any.
    pub fn lookup(&self, pc: u32) -> Option<Tier2Fn> {
        let p = self.slots[(pc & self.mask) as usize].load(Ordering::Acquire);
        if p.is_null() {
            return None;
        }
        // SAFETY: non-null slot pointers reference entries owned by
        // `self.entries`; they are only dropped in `clear`, which runs on
        // the driver thread between executed blocks.
        let entry = unsafe { &*p };
        (entry.pc == pc).then_some(entry.func)
    }

    /// Installs a compiled function; the slot store is a release so the
    /// entry contents are visible before the pointer.
    pub fn install(&self, pc: u32, func: Tier2Fn) {
        let mut entries = match self.entries.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut boxed = Box::new(T2Entry { func, pc });
        let raw: *mut T2Entry = &mut *boxed;
        entries.push(boxed);
        self.slots[(pc & self.mask) as usize].store(raw, Ordering::Release);
    }

    /// Number of functions currently installed.
    pub fn installed(&self) -> usize {
        match self.entries.lock() {
            Ok(g) => g.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Empties every slot and drops the owned entries. Called from the
    /// code-cache flush path, between executed blocks.
    pub fn clear(&self) {
        let mut entries = match self.entries.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        for slot in &self.slots {
            slot.store(std::ptr::null_mut(), Ordering::Release);
        }
        entries.clear();
    }
}

// SAFETY: slot access is atomic; the entry list is mutex-guarded.
unsafe impl Send for InlineCache {}
// SAFETY: as above.
unsafe impl Sync for InlineCache {}

impl std::fmt::Debug for InlineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InlineCache")
            .field("slots", &self.slots.len())
            .finish()
    }
}

/// Tier-2 compiler front: owns the worker thread and the inline cache.
pub struct Tier2 {
    tx: Option<Sender<T2Func>>,
    worker: Option<JoinHandle<()>>,
    /// Shared inline cache, also baked into tier-1 probe stubs.
    pub inline_cache: Arc<InlineCache>,
}

impl Tier2 {
    /// Spawns the worker with a private code buffer.
    ///
    /// # Errors
    ///
    /// Returns an error when the worker's executable mapping fails.
    pub fn new(config: &Config) -> Result<Self, CoreError> {
        let inline_cache = Arc::new(InlineCache::new(config.jit.inline_cache_bits));
        // The worker keeps its own assembler state; the tier-1 prologue it
        // emits is unused, the buffer is simply a fresh executable region.
        let mut asm = JitState::new(config, None)?;
        let (tx, rx): (Sender<T2Func>, Receiver<T2Func>) = channel();
        let ic = Arc::clone(&inline_cache);

        let worker = std::thread::Builder::new()
            .name("rivet-tier2".into())
            .spawn(move || {
                while let Ok(mut func) = rx.recv() {
                    ir::optimize(&mut func);
                    let pc = func.pc;
                    asm.code.enter_write_mode();
                    let entry = lower::lower(&mut asm, &func);
                    asm.code.exit_write_mode();
                    match entry {
                        Some(offset) => {
                            asm.code.invalidate_icache(offset, asm.offset);
                            // SAFETY: `offset` is the entry of the function
                            // just materialised into the worker's mapping,
                            // which lives as long as the worker.
                            let func_ptr: Tier2Fn = unsafe {
                                std::mem::transmute(
                                    asm.code.base().cast_const().add(offset as usize),
                                )
                            };
                            ic.install(pc, func_ptr);
                            debug!(pc = format_args!("{pc:#x}"), offset, "tier-2 install");
                        }
                        None => {
                            warn!(
                                pc = format_args!("{pc:#x}"),
                                "tier-2 lowering skipped (buffer or frame limit)"
                            );
                        }
                    }
                }
            })
            .map_err(CoreError::Io)?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
            inline_cache,
        })
    }

    /// Queues a trace for optimization. Drops the request silently when the
    /// worker has gone away.
    pub(crate) fn enqueue(&self, func: T2Func) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(func);
        }
    }
}

impl Drop for Tier2 {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for Tier2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tier2").finish_non_exhaustive()
    }
}
