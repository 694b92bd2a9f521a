//! RV32 binary-translating emulator library.
//!
//! This crate implements a user-mode RV32IMAFC emulator built around a
//! dynamic-translation pipeline:
//! 1. **ISA:** Decoding of all base, M, A, F, C (plus Zifencei/Zicsr)
//!    encodings into an internal IR (`Insn`).
//! 2. **Blocks:** A basic-block builder, an LRU block cache keyed by guest PC,
//!    and a macro-op fusion pass over freshly built blocks.
//! 3. **Execution:** A threaded interpreter, a tier-1 JIT emitting x86-64 or
//!    aarch64 machine code into an executable code cache, and a tier-2
//!    optimizing JIT fed by a worker thread.
//! 4. **System:** CSR file and trap unit, guest memory image, ELF32 loader,
//!    newlib-style syscall layer, and the driving step loop (`Machine`).

/// Common types and constants (traps, register counts, page geometry).
pub mod common;
/// Emulator configuration (defaults, hierarchical config structures).
pub mod config;
/// CPU hart state: registers, CSR file, and the trap unit.
pub mod core;
/// Instruction set: opcodes, IR record, decoder, compressed decoder, ABI names.
pub mod isa;
/// Basic blocks: builder, LRU cache, and macro-op fusion.
pub mod block;
/// Threaded interpreter over decoded blocks.
pub mod interp;
/// Tier-1 and tier-2 JIT compilers and the executable code cache.
#[cfg(all(feature = "jit", any(target_arch = "x86_64", target_arch = "aarch64")))]
pub mod jit;
/// Simulation: guest memory image, ELF loader, syscalls, and the CPU driver.
pub mod sim;
/// Execution statistics collection and reporting.
pub mod stats;

/// Root configuration type; use `Config::default()` or deserialize from JSON.
pub use crate::config::Config;
/// Hart architectural state; the JIT reads it through a pinned pointer.
pub use crate::core::cpu::Cpu;
/// Top-level driver; owns the CPU, the block cache, and both JIT tiers.
pub use crate::sim::machine::Machine;
