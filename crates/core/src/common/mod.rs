//! Common types and constants shared across the emulator.
//!
//! This module gathers the definitions every pipeline stage relies on:
//! 1. **Traps:** The synchronous exception model (`Trap`).
//! 2. **Errors:** Host-side failures surfaced to the embedder (`CoreError`).
//! 3. **Geometry:** Register-file and page-size constants.

/// Trap definitions for the exception model.
pub mod trap;

pub use trap::Trap;

use thiserror::Error;

/// Number of general-purpose registers in the RV32 register file.
pub const N_REGS: usize = 32;

/// Guest page size used for block termination and cache invalidation (4 KiB).
pub const PAGE_SIZE: u32 = 4096;

/// Shift converting a guest address into its page number.
pub const PAGE_SHIFT: u32 = 12;

/// Length in bytes of a compressed instruction.
pub const INSN_16: u8 = 2;

/// Length in bytes of an uncompressed instruction.
pub const INSN_32: u8 = 4;

/// Host-side failures.
///
/// Guest-visible conditions never take this path; they are modelled as
/// [`Trap`]s and vectored through the CSR unit.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The guest image is not a loadable ELF32 RISC-V executable.
    #[error("malformed guest ELF: {0}")]
    Elf(String),

    /// A host memory mapping could not be established.
    #[error("host allocation failure: {0}")]
    Mmap(String),

    /// An I/O error while reading guest input or writing a dump.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
