//! Configuration system for the emulator.
//!
//! This module defines all configuration structures used to parameterize the
//! execution core. It provides:
//! 1. **Defaults:** Baseline constants (block capacity, cache geometry, JIT
//!    thresholds, code cache size).
//! 2. **Structures:** Hierarchical config for general behaviour, the block
//!    pipeline, and the JIT tiers.
//!
//! Configuration is supplied as JSON (see the CLI's `--config`) or built with
//! `Config::default()`.

use serde::Deserialize;

/// Default configuration constants.
///
/// These values define the baseline behaviour when not explicitly overridden
/// by a configuration file.
mod defaults {
    /// Basic-block capacity in instructions (2^10).
    ///
    /// Blocks longer than this are split; the successor block starts at the
    /// next sequential program counter.
    pub const BLOCK_CAPACITY_BITS: u8 = 10;

    /// Block cache capacity in entries (2^10). Must be a power of two.
    pub const CACHE_BITS: u8 = 10;

    /// Tier-1 compilation threshold in block invocations.
    ///
    /// Once a block has been interpreted this many times it is handed to the
    /// tier-1 translator.
    pub const HOT_THRESHOLD: u32 = 4096;

    /// Tier-2 promotion threshold in native invocations of tier-1 code.
    pub const HOT2_THRESHOLD: u32 = 4096;

    /// Size of the executable tier-1 code cache in bytes (16 MiB).
    pub const CODE_CACHE_SIZE: usize = 16 * 1024 * 1024;

    /// Maximum number of blocks translated per code-cache generation.
    pub const MAX_BLOCKS: u32 = 8192;

    /// Branch-history hit count required before an indirect target is
    /// inlined as a guarded direct jump.
    pub const IN_JUMP_THRESHOLD: u32 = 256;

    /// Inline-cache slot count for tier-2 entry points (2^10).
    pub const INLINE_CACHE_BITS: u8 = 10;
}

/// General execution behaviour.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Trace executed instructions to stderr.
    pub trace: bool,
    /// Suppress ordinary stdout (guest output still flows).
    pub quiet: bool,
    /// Permit misaligned loads and stores instead of trapping; the access is
    /// performed byte-wise.
    pub allow_misalign: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            trace: false,
            quiet: false,
            allow_misalign: false,
        }
    }
}

/// Block pipeline parameters.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BlockConfig {
    /// log2 of the per-block instruction capacity.
    pub capacity_bits: u8,
    /// log2 of the block cache entry count.
    pub cache_bits: u8,
    /// Run the macro-op fusion pass on freshly built blocks.
    pub fusion: bool,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            capacity_bits: defaults::BLOCK_CAPACITY_BITS,
            cache_bits: defaults::CACHE_BITS,
            fusion: true,
        }
    }
}

/// JIT tier parameters.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct JitConfig {
    /// Enable the tier-1 translator.
    pub enabled: bool,
    /// Enable the tier-2 optimizing backend and its worker thread.
    pub tier2: bool,
    /// Block invocation count that triggers tier-1 compilation.
    pub hot_threshold: u32,
    /// Native invocation count that triggers tier-2 promotion.
    pub hot2_threshold: u32,
    /// Tier-1 code cache size in bytes.
    pub code_cache_size: usize,
    /// Maximum blocks translated per code-cache generation.
    pub max_blocks: u32,
    /// Branch-history count required to inline an indirect target.
    pub in_jump_threshold: u32,
    /// log2 of the tier-2 inline-cache slot count.
    pub inline_cache_bits: u8,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tier2: true,
            hot_threshold: defaults::HOT_THRESHOLD,
            hot2_threshold: defaults::HOT2_THRESHOLD,
            code_cache_size: defaults::CODE_CACHE_SIZE,
            max_blocks: defaults::MAX_BLOCKS,
            in_jump_threshold: defaults::IN_JUMP_THRESHOLD,
            inline_cache_bits: defaults::INLINE_CACHE_BITS,
        }
    }
}

/// Root configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General execution behaviour.
    pub general: GeneralConfig,
    /// Block pipeline parameters.
    pub block: BlockConfig,
    /// JIT tier parameters.
    pub jit: JitConfig,
}
