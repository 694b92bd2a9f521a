//! Top-level driver.
//!
//! `Machine` owns the hart, the block cache, and both JIT tiers, and runs
//! the step loop: look up (or build) the block for the current PC through
//! the prediction fast path, dispatch it to the best available execution
//! tier, then patch the previous block's branch edges so later transitions
//! chain without a cache probe.
//!
//! Execution leaves the loop only on halt, cycle-budget expiry, or the
//! external interrupt flag; all three are observed at block boundaries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::json;

use crate::block::cache::{BlockCache, cache_key};
use crate::block::{BlockRef, builder, fusion};
use crate::common::{CoreError, Trap};
use crate::config::Config;
use crate::core::cpu::Cpu;
use crate::interp;
use crate::isa::abi;
use crate::isa::op::Op;
use crate::sim::loader::{self, LoadedImage};
use crate::sim::memory::Memory;
use crate::stats::SimStats;

#[cfg(all(feature = "jit", any(target_arch = "x86_64", target_arch = "aarch64")))]
use crate::jit::{JitState, tier2::Tier2};

/// Cycles per step-loop quantum in [`Machine::run`].
const STEP_QUANTUM: u64 = 4096;

/// How one block is about to execute.
enum Plan {
    Interp,
    #[cfg(all(feature = "jit", any(target_arch = "x86_64", target_arch = "aarch64")))]
    Tier1(u32),
    #[cfg(all(feature = "jit", any(target_arch = "x86_64", target_arch = "aarch64")))]
    Tier2(crate::block::Tier2Fn),
}

/// The emulator: hart, block pipeline, and JIT tiers.
pub struct Machine {
    /// Guest architectural state.
    pub cpu: Cpu,
    /// Active configuration.
    pub config: Config,
    /// Execution statistics.
    pub stats: SimStats,
    /// Block cache (owns every built block).
    pub cache: BlockCache,

    #[cfg(all(feature = "jit", any(target_arch = "x86_64", target_arch = "aarch64")))]
    jit: Option<JitState>,
    #[cfg(all(feature = "jit", any(target_arch = "x86_64", target_arch = "aarch64")))]
    tier2: Option<Tier2>,

    /// Cross-thread interrupt flag, polled at block boundaries only.
    interrupted: Arc<AtomicBool>,
    /// Previously executed block, for edge patching and prediction.
    prev: Option<BlockRef>,
    /// Facts about the loaded guest image.
    pub image: Option<LoadedImage>,
}

impl Machine {
    /// Builds a machine from a configuration.
    ///
    /// # Errors
    ///
    /// Fails when the guest image or the executable code cache cannot be
    /// mapped.
    pub fn new(config: Config) -> Result<Self, CoreError> {
        let mem = Memory::new()?;
        let cpu = Cpu::new(mem, &config);
        let cache = BlockCache::new(config.block.cache_bits);

        #[cfg(all(feature = "jit", any(target_arch = "x86_64", target_arch = "aarch64")))]
        let (jit, tier2) = if config.jit.enabled {
            let tier2 = if config.jit.tier2 {
                Some(Tier2::new(&config)?)
            } else {
                None
            };
            let ic = tier2.as_ref().map(|t| Arc::clone(&t.inline_cache));
            (Some(JitState::new(&config, ic)?), tier2)
        } else {
            (None, None)
        };

        Ok(Self {
            cpu,
            config,
            stats: SimStats::default(),
            cache,
            #[cfg(all(feature = "jit", any(target_arch = "x86_64", target_arch = "aarch64")))]
            jit,
            #[cfg(all(feature = "jit", any(target_arch = "x86_64", target_arch = "aarch64")))]
            tier2,
            interrupted: Arc::new(AtomicBool::new(false)),
            prev: None,
            image: None,
        })
    }

    /// Loads a guest ELF and prepares the stack per the newlib convention.
    ///
    /// # Errors
    ///
    /// Propagates loader failures (malformed image).
    pub fn load_elf(&mut self, data: &[u8], args: &[String]) -> Result<(), CoreError> {
        let image = loader::load_elf(&mut self.cpu.mem, data)?;
        loader::setup_stack(&mut self.cpu, &image, args);
        self.image = Some(image);
        Ok(())
    }

    /// Clone of the interrupt flag; setting it stops execution at the next
    /// block boundary.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    /// Runs until the hart halts or the interrupt flag is raised, then
    /// returns the guest exit code.
    pub fn run(&mut self) -> Option<u32> {
        while !self.cpu.halt && !self.interrupted.load(Ordering::Relaxed) {
            self.step(STEP_QUANTUM);
        }
        #[cfg(all(feature = "jit", any(target_arch = "x86_64", target_arch = "aarch64")))]
        if let Some(t2) = &self.tier2 {
            self.stats.tier2_installs = t2.inline_cache.installed() as u64;
        }
        self.cpu.take_exit()
    }

    /// Executes up to `budget` guest cycles.
    pub fn step(&mut self, budget: u64) {
        let target = self.cpu.csr_cycle.saturating_add(budget);
        while self.cpu.csr_cycle < target && !self.cpu.halt {
            if self.interrupted.load(Ordering::Relaxed) {
                break;
            }
            let pc = self.cpu.pc;
            if Cpu::insn_is_misaligned(pc) {
                self.cpu.raise(Trap::InstructionMisaligned(pc));
                self.cpu.csr_cycle += 1;
                self.stats.traps_taken += 1;
                self.prev = None;
                continue;
            }

            // Prediction fast path: the last block's observed successor.
            let predicted = self.prev.and_then(|p| {
                let pb = self.cache.resolve(p)?;
                let pred = pb.predict?;
                (self.cache.resolve(pred)?.pc_start == pc).then_some(pred)
            });
            let bref = match predicted {
                Some(r) => {
                    self.stats.predict_hits += 1;
                    r
                }
                None => self.get_or_build(pc),
            };

            if let Some(prev) = self.prev {
                self.patch_edges(prev, bref, pc);
            }

            self.execute(bref);
            self.prev = Some(bref);
        }
    }

    /// Looks the current PC up in the block cache, building (and fusing)
    /// the block on a miss.
    fn get_or_build(&mut self, pc: u32) -> BlockRef {
        let key = cache_key(pc, 0);
        if let Some(r) = self.cache.get(key, true) {
            self.stats.cache_hits += 1;
            return r;
        }
        self.stats.cache_misses += 1;

        let capacity = 1usize << self.config.block.capacity_bits;
        let mut block = builder::build(&self.cpu.mem, pc, capacity, false);
        if self.config.block.fusion {
            self.stats.fused_ops += u64::from(fusion::run(&mut block));
        }
        self.stats.blocks_built += 1;

        let evicted = self.cache.put(key, block);
        if let Some(victim) = evicted {
            self.stats.cache_evictions += 1;
            // Native code elsewhere may chain straight into the victim's
            // fragment; dropping a compiled block forces a generation flush
            // so no dangling entry is ever consulted.
            #[cfg(all(feature = "jit", any(target_arch = "x86_64", target_arch = "aarch64")))]
            if victim.hot
                && let Some(jit) = self.jit.as_mut()
            {
                jit.flush(&mut self.cache, &mut self.stats);
            }
            #[cfg(not(all(feature = "jit", any(target_arch = "x86_64", target_arch = "aarch64"))))]
            let _ = victim;
        }

        #[allow(clippy::unwrap_used)] // just inserted under this key
        self.cache.get(key, false).unwrap()
    }

    /// Lazily resolves the edge the previous block just took, and refreshes
    /// its successor prediction. Links are monotonic: a pointer is only
    /// replaced, never invalidated, until the cache is cleared.
    fn patch_edges(&mut self, prev: BlockRef, next: BlockRef, pc: u32) {
        let Some(pb) = self.cache.resolve_mut(prev) else {
            return;
        };
        pb.predict = Some(next);

        let page_fallthrough = pb.pc_end;
        let term = pb.terminator_mut();
        let taken_pc = match term.op {
            Op::Jal | Op::CJal | Op::CJ | Op::Beq | Op::Bne | Op::Blt | Op::Bge | Op::Bltu
            | Op::Bgeu | Op::CBeqz | Op::CBnez => term.pc.wrapping_add(term.imm as u32),
            Op::FusedAddBranch => term.pc.wrapping_add(4).wrapping_add(term.imm2 as u32),
            // Indirect and environment terminators have no static edges;
            // split blocks fall through to the next sequential address.
            _ if !term.op.is_terminator() => page_fallthrough,
            _ => return,
        };
        if pc == taken_pc {
            term.branch_taken = Some(next);
        } else if term.op.is_cond_branch() && pc == term.pc.wrapping_add(u32::from(term.len)) {
            term.branch_untaken = Some(next);
        }
    }

    /// Dispatches one block to the best execution tier.
    fn execute(&mut self, bref: BlockRef) {
        let plan = self.plan(bref);
        match plan {
            None => {}
            Some(Plan::Interp) => {
                let Some(blk) = self.cache.resolve_mut(bref) else {
                    return;
                };
                let completed = interp::run_block(&mut self.cpu, blk);
                blk.invocations = blk.invocations.saturating_add(1);
                if !completed {
                    self.stats.traps_taken += 1;
                }
                let ready = blk.invocations;
                let translatable = blk.translatable;
                let fence_i = blk.terminator().op == Op::Fencei;

                // `>=` rather than `==`: a code-cache flush drops `hot` but
                // not the invocation count, and the block must be able to
                // re-enter the next generation.
                #[cfg(all(feature = "jit", any(target_arch = "x86_64", target_arch = "aarch64")))]
                if translatable
                    && ready >= self.config.jit.hot_threshold
                    && let Some(jit) = self.jit.as_mut()
                {
                    jit.compile(&self.cpu, &mut self.cache, bref, &mut self.stats);
                }
                #[cfg(not(all(feature = "jit", any(target_arch = "x86_64", target_arch = "aarch64"))))]
                let _ = (ready, translatable);

                if fence_i {
                    self.flush_translation();
                }
            }
            #[cfg(all(feature = "jit", any(target_arch = "x86_64", target_arch = "aarch64")))]
            Some(Plan::Tier1(offset)) => {
                if let Some(jit) = self.jit.as_ref() {
                    // SAFETY: the offset was installed by `compile` in the
                    // current generation; `hot` is cleared on every flush
                    // before any fragment could dangle.
                    unsafe {
                        jit.run(&mut self.cpu, offset);
                    }
                    self.stats.jit_invocations += 1;
                    self.cpu.x[0] = 0;
                }
            }
            #[cfg(all(feature = "jit", any(target_arch = "x86_64", target_arch = "aarch64")))]
            Some(Plan::Tier2(func)) => {
                // SAFETY: the pointer came from the inline cache, whose
                // entries stay alive until the flush path clears them
                // between blocks.
                unsafe {
                    func(&mut self.cpu);
                }
                self.stats.tier2_invocations += 1;
                self.cpu.x[0] = 0;
            }
        }
    }

    /// Chooses the tier for this invocation and performs the associated
    /// bookkeeping (cycle cost for native tiers, promotion triggers).
    fn plan(&mut self, bref: BlockRef) -> Option<Plan> {
        #[cfg(all(feature = "jit", any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            let hot2_threshold = self.config.jit.hot2_threshold;
            let mut promote = false;
            let plan = {
                let Some(blk) = self.cache.resolve_mut(bref) else {
                    return None;
                };
                if self.jit.is_none() {
                    return Some(Plan::Interp);
                }
                if blk.hot2
                    && let Some(func) = blk.native_fn
                {
                    Plan::Tier2(func)
                } else if blk.hot {
                    // Adopt a freshly installed tier-2 function for this PC.
                    if let Some(t2) = self.tier2.as_ref()
                        && let Some(func) = t2.inline_cache.lookup(blk.pc_start)
                    {
                        blk.hot2 = true;
                        blk.native_fn = Some(func);
                        Plan::Tier2(func)
                    } else {
                        blk.native_invocations = blk.native_invocations.saturating_add(1);
                        // Promote strong hotspots to the optimizing backend.
                        if !blk.compiled && blk.native_invocations >= hot2_threshold {
                            blk.compiled = true;
                            promote = true;
                        }
                        Plan::Tier1(blk.native_offset)
                    }
                } else {
                    Plan::Interp
                }
            };

            if promote
                && let Some(t2) = self.tier2.as_ref()
                && let Some(func) = crate::jit::tier2::ir::build(
                    &self.cache,
                    bref,
                    self.cpu.mem.base() as i64,
                    self.cpu.on_ecall as usize,
                    self.cpu.on_ebreak as usize,
                )
            {
                t2.enqueue(func);
            }
            Some(plan)
        }
        #[cfg(not(all(feature = "jit", any(target_arch = "x86_64", target_arch = "aarch64"))))]
        {
            self.cache.resolve(bref)?;
            Some(Plan::Interp)
        }
    }

    /// Drops every translated artifact: block cache, code cache generation,
    /// and installed tier-2 functions. Taken after `FENCE.I`.
    fn flush_translation(&mut self) {
        self.prev = None;
        self.cache.clear(|_| {});
        #[cfg(all(feature = "jit", any(target_arch = "x86_64", target_arch = "aarch64")))]
        if let Some(jit) = self.jit.as_mut() {
            jit.flush(&mut self.cache, &mut self.stats);
        }
    }

    /// JSON dump of the architectural register state, for the CLI's
    /// `--dump-registers`.
    pub fn dump_registers(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (i, &v) in self.cpu.x.iter().enumerate() {
            let _ = map.insert(abi::reg_name(i as u8).to_string(), json!(v));
        }
        let _ = map.insert("pc".into(), json!(self.cpu.pc));
        serde_json::Value::Object(map)
    }

    /// The architectural-test signature range as hex words, one per line.
    /// Returns `None` when the image carries no signature symbols.
    pub fn signature(&self) -> Option<String> {
        let image = self.image.as_ref()?;
        let (begin, end) = (image.sig_begin?, image.sig_end?);
        let mut out = String::new();
        let mut addr = begin;
        while addr < end {
            out.push_str(&format!("{:08x}\n", self.cpu.mem.read_w(addr)));
            addr += 4;
        }
        Some(out)
    }
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("pc", &format_args!("{:#010x}", self.cpu.pc))
            .field("blocks", &self.cache.len())
            .finish_non_exhaustive()
    }
}
