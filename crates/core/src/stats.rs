//! Execution statistics collection and reporting.
//!
//! This module tracks pipeline metrics for the emulator. It provides:
//! 1. **Block pipeline:** Blocks built, cache hits/misses, evictions, and
//!    prediction hits.
//! 2. **Fusion:** Count of synthesized fused operations.
//! 3. **JIT:** Tier-1 compilations, code-cache flushes, and tier-2 installs.
//! 4. **Wall clock:** Host time elapsed since construction.

use std::time::Instant;

/// Execution statistics tracked by the driver.
#[derive(Clone, Debug)]
pub struct SimStats {
    start_time: Instant,
    /// Basic blocks built by the block builder.
    pub blocks_built: u64,
    /// Block cache lookups that hit.
    pub cache_hits: u64,
    /// Block cache lookups that missed.
    pub cache_misses: u64,
    /// Blocks destroyed by LRU eviction.
    pub cache_evictions: u64,
    /// Block transitions resolved through the `predict` fast path.
    pub predict_hits: u64,
    /// Fused operations synthesized by the fusion pass.
    pub fused_ops: u64,
    /// Traps vectored through the CSR unit.
    pub traps_taken: u64,
    /// Blocks compiled by the tier-1 translator.
    pub jit_compiles: u64,
    /// Code-cache flush generations.
    pub jit_flushes: u64,
    /// Native tier-1 invocations.
    pub jit_invocations: u64,
    /// Tier-2 functions installed into the inline cache.
    pub tier2_installs: u64,
    /// Native tier-2 invocations.
    pub tier2_invocations: u64,
}

impl Default for SimStats {
    fn default() -> Self {
        Self {
            start_time: Instant::now(),
            blocks_built: 0,
            cache_hits: 0,
            cache_misses: 0,
            cache_evictions: 0,
            predict_hits: 0,
            fused_ops: 0,
            traps_taken: 0,
            jit_compiles: 0,
            jit_flushes: 0,
            jit_invocations: 0,
            tier2_installs: 0,
            tier2_invocations: 0,
        }
    }
}

impl SimStats {
    /// Prints a summary report to stderr.
    ///
    /// # Arguments
    ///
    /// * `cycles` - Final value of the guest cycle counter.
    pub fn print(&self, cycles: u64) {
        let secs = self.start_time.elapsed().as_secs_f64();
        let mips = if secs > 0.0 {
            (cycles as f64) / secs / 1.0e6
        } else {
            0.0
        };
        eprintln!("--- execution statistics ---");
        eprintln!("cycles            {cycles}");
        eprintln!("wall time         {secs:.3}s ({mips:.1} MIPS)");
        eprintln!(
            "blocks            built={} hits={} misses={} evicted={} predicted={}",
            self.blocks_built,
            self.cache_hits,
            self.cache_misses,
            self.cache_evictions,
            self.predict_hits
        );
        eprintln!("fusion            {} fused ops", self.fused_ops);
        eprintln!("traps             {}", self.traps_taken);
        eprintln!(
            "tier-1            compiles={} flushes={} invocations={}",
            self.jit_compiles, self.jit_flushes, self.jit_invocations
        );
        eprintln!(
            "tier-2            installs={} invocations={}",
            self.tier2_installs, self.tier2_invocations
        );
    }
}
