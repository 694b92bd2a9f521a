//! Tier-1 and tier-2 JIT compilers.
//!
//! The tier-1 translator turns hot basic blocks into host machine code,
//! chaining directly-reachable blocks into one contiguous generation inside
//! an executable code cache. Per block it runs the liveness pre-pass, walks
//! the IR through per-opcode emitters backed by a small assembler
//! (x86-64 and aarch64), records pending relocations, and resolves them
//! against the generation's offset map once translation settles.
//!
//! The tier-2 backend re-translates stronger hotspots through an optimizing
//! pseudo-IR on a worker thread and installs the result into an inline
//! cache probed by tier-1 prologue stubs.

/// Executable code cache mapping.
pub mod codecache;
/// Per-block liveness analysis and the host register allocator.
pub mod regalloc;
/// Tier-2 optimizing backend.
pub mod tier2;

#[cfg(target_arch = "aarch64")]
mod a64;
mod emit;
#[cfg(target_arch = "x86_64")]
mod x64;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::block::cache::{BlockCache, cache_key};
use crate::block::BlockRef;
use crate::common::N_REGS;
use crate::config::Config;
use crate::core::cpu::Cpu;
use crate::stats::SimStats;
use codecache::CodeCache;
use regalloc::{HostRegEntry, N_HOST_REGS};
use tier2::InlineCache;

/// Entry signature of the generated prologue: `(hart, fragment entry)`.
pub type Tier1Entry = unsafe extern "C" fn(*mut Cpu, *const u8);

/// Operand sizes understood by the assembler layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Size {
    S8,
    S16,
    S32,
    S64,
}

/// x86-flavoured condition codes shared by both backends; the aarch64
/// assembler maps them onto A64 condition fields.
pub(crate) mod cc {
    /// Jump if equal.
    pub const JE: u8 = 0x84;
    /// Jump if not equal.
    pub const JNE: u8 = 0x85;
    /// Jump if below (unsigned).
    pub const JB: u8 = 0x82;
    /// Jump if above or equal (unsigned).
    pub const JAE: u8 = 0x83;
    /// Jump if less (signed).
    pub const JL: u8 = 0x8c;
    /// Jump if greater or equal (signed).
    pub const JGE: u8 = 0x8d;
    /// Unconditional jump.
    pub const JMP: u8 = 0xe9;
}

/// Pending relocation target.
#[derive(Clone, Copy, Debug)]
pub(crate) enum JumpTarget {
    /// Jump to the fragment translated for this guest `(pc, satp)` key, or
    /// fall through to the inlined exit path when the key is unknown.
    Pc(u32, u32),
    /// Jump to a known code-cache offset.
    Offset(u32),
    /// Jump to the shared epilogue.
    Exit,
}

/// One pending relocation.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Jump {
    /// Code-cache location of the patch field (x86-64: the rel32 slot;
    /// aarch64: the branch instruction).
    pub patch_loc: u32,
    /// Where the jump must land.
    pub target: JumpTarget,
}

/// Offset-map entry: one translated fragment of the current generation.
#[derive(Clone, Copy, Debug)]
pub(crate) struct OffsetEntry {
    pub pc: u32,
    pub satp: u32,
    pub offset: u32,
}

/// Tier-1 translator state.
pub struct JitState {
    pub(crate) code: CodeCache,
    /// Emit cursor into the code cache.
    pub(crate) offset: u32,
    /// Capacity of the code cache.
    pub(crate) size: u32,
    /// Offset of the shared epilogue.
    pub(crate) exit_loc: u32,
    /// Cursor position right after the prologue/epilogue stubs; flushing
    /// resets to here.
    pub(crate) org_size: u32,

    /// Fragments committed in the current generation.
    pub(crate) offset_map: Vec<OffsetEntry>,
    /// Pending relocations of the current translation pass.
    pub(crate) jumps: Vec<Jump>,
    /// Keys already committed this generation (dedups chained blocks).
    pub(crate) set: HashSet<u64>,
    /// The cache ran out of space or blocks; finish and flush.
    pub(crate) should_flush: bool,

    /// Host register bindings, fixed-size keyed by host register.
    pub(crate) reg_map: [HostRegEntry; N_HOST_REGS],
    /// Last IR index reading each guest register; `-1` means never read.
    pub(crate) liveness: [i32; N_REGS],
    /// Guest register indices sorted farthest-last-use first.
    pub(crate) candidates: [u8; N_REGS],

    /// Active tier-2 frame size (consulted by the epilogue emitter).
    pub(crate) t2_frame: u32,

    max_blocks: u32,
    pub(crate) in_jump_threshold: u32,
    /// Tier-2 inline cache probed by the per-block prologue stub.
    pub(crate) inline_cache: Option<Arc<InlineCache>>,
}

impl JitState {
    /// Creates the translator, maps the code cache, and emits the shared
    /// prologue/epilogue.
    ///
    /// # Errors
    ///
    /// Returns an error when the executable mapping cannot be established.
    pub fn new(
        config: &Config,
        inline_cache: Option<Arc<InlineCache>>,
    ) -> Result<Self, crate::common::CoreError> {
        let code = CodeCache::new(config.jit.code_cache_size)?;
        let size = config.jit.code_cache_size as u32;
        let mut state = Self {
            code,
            offset: 0,
            size,
            exit_loc: 0,
            org_size: 0,
            offset_map: Vec::new(),
            jumps: Vec::new(),
            set: HashSet::new(),
            should_flush: false,
            reg_map: regalloc::fresh_map(),
            liveness: [-1; N_REGS],
            candidates: [0; N_REGS],
            t2_frame: 0,
            max_blocks: config.jit.max_blocks,
            in_jump_threshold: config.jit.in_jump_threshold,
            inline_cache,
        };
        state.code.enter_write_mode();
        state.prepare_translate();
        state.code.exit_write_mode();
        state.code.invalidate_icache(0, state.org_size);
        Ok(state)
    }

    /// Runs the fragment at `offset` on the hart.
    ///
    /// # Safety
    ///
    /// `offset` must be a fragment entry produced by [`Self::compile`] in
    /// the current generation, and `cpu` must be the live hart.
    pub unsafe fn run(&self, cpu: *mut Cpu, offset: u32) {
        // SAFETY: the base points at the prologue emitted in `new`; the
        // contract above guarantees the fragment is valid in this
        // generation.
        unsafe {
            let entry: Tier1Entry = std::mem::transmute(self.code.base().cast_const());
            entry(cpu, self.code.base().cast_const().add(offset as usize));
        }
    }

    /// Translates `root` and every directly-reachable already-cached block
    /// into the current generation, then resolves relocations and performs
    /// the host's instruction-cache maintenance.
    pub fn compile(
        &mut self,
        cpu: &Cpu,
        cache: &mut BlockCache,
        root: BlockRef,
        stats: &mut SimStats,
    ) {
        let Some(blk) = cache.resolve(root) else {
            return;
        };
        let root_key = cache_key(blk.pc_start, blk.satp);
        if self.set.contains(&root_key) {
            // Already translated this generation through a chain; adopt the
            // existing fragment.
            if let Some(entry) = self
                .offset_map
                .iter()
                .find(|e| cache_key(e.pc, e.satp) == root_key)
            {
                let offset = entry.offset;
                if let Some(blk) = cache.resolve_mut(root) {
                    blk.native_offset = offset;
                    blk.hot = true;
                }
            }
            return;
        }

        loop {
            self.jumps.clear();
            if self.offset_map.len() as u32 >= self.max_blocks {
                self.should_flush = true;
            }
            let start = self.offset;
            self.code.enter_write_mode();
            if !self.should_flush {
                self.translate_chain(cpu, cache, root);
            }
            if self.should_flush {
                self.code.exit_write_mode();
                self.flush(cache, stats);
                continue;
            }
            self.resolve_jumps();
            self.code.exit_write_mode();
            self.code.invalidate_icache(start, self.offset);
            break;
        }

        // Promote only if the root actually landed in this generation (an
        // untranslatable root leaves no fragment behind).
        if self.set.contains(&root_key)
            && let Some(blk) = cache.resolve_mut(root)
        {
            blk.hot = true;
            stats.jit_compiles += 1;
        }
    }

    /// Depth-first translation over the chain of already-built successors.
    fn translate_chain(&mut self, cpu: &Cpu, cache: &mut BlockCache, root: BlockRef) {
        let mut worklist = vec![root];
        while let Some(bref) = worklist.pop() {
            if self.offset_map.len() as u32 >= self.max_blocks || self.should_flush {
                return;
            }
            let offset = self.offset;
            let in_jump_threshold = self.in_jump_threshold;
            let Some(blk) = cache.resolve_mut(bref) else {
                continue;
            };
            if !blk.translatable {
                continue;
            }
            let key = cache_key(blk.pc_start, blk.satp);
            if !self.set.insert(key) {
                continue;
            }
            blk.native_offset = offset;
            self.offset_map.push(OffsetEntry {
                pc: blk.pc_start,
                satp: blk.satp,
                offset,
            });
            debug!(
                pc = format_args!("{:#x}", blk.pc_start),
                offset, "translating block"
            );
            self.translate_block(cpu, blk);
            if self.should_flush {
                return;
            }

            // Chain through the statically linked successors, then through
            // the dominant indirect target when the history is decisive.
            let term = blk.terminator();
            let taken = term.branch_taken;
            let untaken = term.branch_untaken;
            let dominant = term
                .history
                .as_ref()
                .and_then(|h| h.dominant())
                .filter(|&(_, count)| count >= in_jump_threshold)
                .map(|(pc, _)| pc);
            let satp = blk.satp;

            if let Some(pc) = dominant
                && let Some(r) = cache.get(cache_key(pc, satp), false)
            {
                worklist.push(r);
            }
            if let Some(r) = taken {
                worklist.push(r);
            }
            if let Some(r) = untaken {
                worklist.push(r);
            }
        }
    }

    /// Emits one block: the tier-2 probe stub, the per-opcode bodies, and
    /// the fall-through tail for blocks without a control-flow terminator.
    fn translate_block(&mut self, cpu: &Cpu, blk: &mut crate::block::Block) {
        self.reset_regs();
        self.liveness_calc(&blk.insns);
        if self.inline_cache.is_some() {
            self.emit_tier2_probe(blk.pc_start);
        }
        // Charge the block's cycle cost on entry; chained fragments never
        // return to the driver, so the accounting must live in the code.
        self.emit_bump_cycle(blk.cycle_cost);
        for idx in 0..blk.insns.len() {
            if self.should_flush {
                return;
            }
            self.regs_refresh(idx as i32);
            self.emit_insn(cpu, &blk.insns[idx]);
        }

        let term_is_flow = blk.terminator().op.is_terminator();
        if !term_is_flow && !self.should_flush {
            // Page-terminated or capacity-split block: fall through to the
            // sequential successor, or exit with the PC stored.
            self.store_back();
            if blk.terminator().branch_taken.is_some() {
                self.emit_jmp(blk.pc_end, blk.satp);
            }
            let tmp = Self::temp_reg();
            self.emit_load_imm(tmp, blk.pc_end);
            self.emit_store(Size::S32, tmp, Self::param_reg0(), offset_of_pc());
            self.emit_exit();
        }
    }

    /// Resolves every pending relocation against the offset map. Unknown
    /// targets fall through to the exit path inlined right after each jump.
    fn resolve_jumps(&mut self) {
        for i in 0..self.jumps.len() {
            let jump = self.jumps[i];
            let target_loc = match jump.target {
                JumpTarget::Offset(o) => o,
                JumpTarget::Exit => self.exit_loc,
                JumpTarget::Pc(pc, satp) => self
                    .offset_map
                    .iter()
                    .find(|e| e.pc == pc && e.satp == satp)
                    .map_or_else(|| self.fallthrough_loc(jump.patch_loc), |e| e.offset),
            };
            self.patch_jump(jump.patch_loc, target_loc);
        }
        self.jumps.clear();
    }

    /// Flushes the code cache: reset the cursor to the stubs, forget the
    /// generation's fragments, and clear every promotion flag (and the
    /// tier-2 inline cache) so no dangling native pointer is ever consulted.
    pub fn flush(&mut self, cache: &mut BlockCache, stats: &mut SimStats) {
        debug!(generation_bytes = self.offset - self.org_size, "code cache flush");
        self.should_flush = false;
        self.offset = self.org_size;
        self.offset_map.clear();
        self.set.clear();
        cache.for_each_mut(crate::block::Block::clear_native);
        if let Some(ic) = &self.inline_cache {
            ic.clear();
        }
        stats.jit_flushes += 1;
    }

    /// Appends raw bytes at the emit cursor, raising `should_flush` when
    /// the cache is exhausted.
    #[inline]
    pub(crate) fn emit_bytes(&mut self, data: &[u8]) {
        if self.offset as usize + data.len() > self.size as usize {
            self.should_flush = true;
            return;
        }
        self.code.write(self.offset, data);
        self.offset += data.len() as u32;
    }

    #[inline]
    pub(crate) fn emit1(&mut self, x: u8) {
        self.emit_bytes(&[x]);
    }

    #[inline]
    pub(crate) fn emit2(&mut self, x: u16) {
        self.emit_bytes(&x.to_le_bytes());
    }

    #[inline]
    pub(crate) fn emit4(&mut self, x: u32) {
        self.emit_bytes(&x.to_le_bytes());
    }

    #[inline]
    pub(crate) fn emit8(&mut self, x: u64) {
        self.emit_bytes(&x.to_le_bytes());
    }

    /// Adds `cost` to the hart's cycle counter through the scratch
    /// register.
    pub(crate) fn emit_bump_cycle(&mut self, cost: u32) {
        if cost == 0 {
            return;
        }
        let tmp = Self::temp_reg();
        self.emit_load(Size::S64, Self::param_reg0(), tmp, offset_of_cycle());
        self.emit_add64_imm(tmp, cost);
        self.emit_store(Size::S64, tmp, Self::param_reg0(), offset_of_cycle());
    }

    /// Records a relocation whose target is a known code-cache offset.
    #[inline]
    pub(crate) fn add_jump_to_offset(&mut self, patch_loc: u32, target_offset: u32) {
        self.jumps.push(Jump {
            patch_loc,
            target: JumpTarget::Offset(target_offset),
        });
    }
}

/// Byte offset of the integer register file inside [`Cpu`].
#[inline]
pub(crate) fn offset_of_x(reg: u8) -> i32 {
    (std::mem::offset_of!(Cpu, x) + 4 * usize::from(reg)) as i32
}

/// Byte offset of the program counter inside [`Cpu`].
#[inline]
pub(crate) fn offset_of_pc() -> i32 {
    std::mem::offset_of!(Cpu, pc) as i32
}

/// Byte offset of the cycle counter inside [`Cpu`].
#[inline]
pub(crate) fn offset_of_cycle() -> i32 {
    std::mem::offset_of!(Cpu, csr_cycle) as i32
}

/// Byte offset of the compressed-instruction flag inside [`Cpu`].
#[inline]
pub(crate) fn offset_of_compressed() -> i32 {
    std::mem::offset_of!(Cpu, compressed) as i32
}

impl std::fmt::Debug for JitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitState")
            .field("offset", &self.offset)
            .field("blocks", &self.offset_map.len())
            .finish_non_exhaustive()
    }
}
