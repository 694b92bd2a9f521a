//! Trap definitions.
//!
//! This module defines the synchronous exception model of the core. It
//! provides:
//! 1. **Trap Representation:** Every exception the execution pipeline can
//!    raise, with its associated trap value.
//! 2. **Cause Codes:** The `mcause` encoding mandated by the privileged
//!    specification.
//! 3. **Error Handling:** Integration with the standard error traits so traps
//!    can be reported at the embedder boundary.

use std::fmt;

/// Synchronous exceptions raised by the execution core.
///
/// Every trap routes through the CSR unit: `mepc`, `mtval` and `mcause` are
/// written before control transfers to the `mtvec` handler. The associated
/// value is the trap value stored into `mtval`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trap {
    /// Instruction address misaligned exception.
    ///
    /// Raised when a taken control-flow transfer targets a program counter
    /// that is not aligned to the instruction size. The associated value is
    /// the misaligned target address.
    InstructionMisaligned(u32),

    /// Illegal instruction exception.
    ///
    /// Raised when an encoding does not decode to any implemented
    /// instruction. The associated value is the offending instruction bits.
    IllegalInstruction(u32),

    /// Breakpoint exception, raised by `EBREAK`/`C.EBREAK`.
    ///
    /// The associated value is the program counter of the breakpoint.
    Breakpoint(u32),

    /// Load address misaligned exception.
    ///
    /// Raised when a load accesses a misaligned address and the misaligned
    /// access policy rejects it. The associated value is the address.
    LoadMisaligned(u32),

    /// Store/AMO address misaligned exception.
    ///
    /// Raised when a store or atomic accesses a misaligned address and the
    /// misaligned access policy rejects it. The associated value is the
    /// address.
    StoreMisaligned(u32),

    /// Environment call from machine mode, raised by `ECALL`.
    EnvironmentCall,
}

impl Trap {
    /// Returns the `mcause` exception code for this trap.
    #[inline]
    pub const fn cause(self) -> u32 {
        match self {
            Self::InstructionMisaligned(_) => 0,
            Self::IllegalInstruction(_) => 2,
            Self::Breakpoint(_) => 3,
            Self::LoadMisaligned(_) => 4,
            Self::StoreMisaligned(_) => 6,
            Self::EnvironmentCall => 11,
        }
    }

    /// Returns the value stored into `mtval` when this trap is taken.
    #[inline]
    pub const fn tval(self) -> u32 {
        match self {
            Self::InstructionMisaligned(a)
            | Self::LoadMisaligned(a)
            | Self::StoreMisaligned(a)
            | Self::Breakpoint(a) => a,
            Self::IllegalInstruction(bits) => bits,
            Self::EnvironmentCall => 0,
        }
    }
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InstructionMisaligned(a) => write!(f, "InstructionMisaligned({a:#x})"),
            Self::IllegalInstruction(bits) => write!(f, "IllegalInstruction({bits:#010x})"),
            Self::Breakpoint(pc) => write!(f, "Breakpoint({pc:#x})"),
            Self::LoadMisaligned(a) => write!(f, "LoadMisaligned({a:#x})"),
            Self::StoreMisaligned(a) => write!(f, "StoreMisaligned({a:#x})"),
            Self::EnvironmentCall => write!(f, "EnvironmentCall"),
        }
    }
}

impl std::error::Error for Trap {}
