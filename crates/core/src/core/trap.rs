//! Trap vectoring logic.
//!
//! This module implements exception entry for the core. On a trap it
//! performs, in order:
//! 1. `mepc` ← program counter of the faulting instruction,
//! 2. `mtval` ← offending value (address or instruction bits),
//! 3. `mcause` ← exception code,
//! 4. `pc` ← `mtvec` base (direct mode) or `mtvec + 4·cause` (vectored).
//!
//! When no handler is installed (`mtvec == 0`) the default handler advances
//! the program counter past the faulting instruction so userland front-ends
//! (instruction-set tests in particular) keep running.

use tracing::debug;

use super::Cpu;
use crate::common::trap::Trap;
use crate::common::{INSN_16, INSN_32};

/// `mtvec` mode field: all exceptions vector to base.
const MTVEC_DIRECT: u32 = 0;
/// `mtvec` mode field: vector to `base + 4 * cause`.
const MTVEC_VECTORED: u32 = 1;

impl Cpu {
    /// Takes a synchronous trap at the current program counter.
    ///
    /// No trap bypasses this path: `mcause`, `mepc` and `mtval` are always
    /// written before control transfers.
    pub fn raise(&mut self, trap: Trap) {
        let code = trap.cause();
        self.csr_mepc = self.pc;
        self.csr_mtval = trap.tval();
        self.csr_mcause = code;

        debug!(pc = format_args!("{:#x}", self.pc), %trap, "trap");

        let base = self.csr_mtvec & !0x3;
        let mode = self.csr_mtvec & 0x3;
        if self.csr_mtvec == 0 {
            // No handler installed: step over the faulting instruction.
            self.default_handler();
            return;
        }
        match mode {
            MTVEC_DIRECT => self.pc = base,
            MTVEC_VECTORED => self.pc = base + 4 * code,
            _ => self.pc = base,
        }
    }

    /// Default handler used when `mtvec` is zero: advance `mepc` past the
    /// faulting instruction and resume there, as `mret` would.
    fn default_handler(&mut self) {
        self.csr_mepc += if self.compressed {
            u32::from(INSN_16)
        } else {
            u32::from(INSN_32)
        };
        self.pc = self.csr_mepc;
    }

    /// Executes `MRET`: return to `mepc`.
    ///
    /// The core models machine mode only, so the privilege-stack bookkeeping
    /// reduces to restoring the program counter (with the low bit cleared).
    #[inline]
    pub fn do_mret(&mut self) {
        self.pc = self.csr_mepc & !1;
    }

    /// Returns whether `pc` violates instruction alignment. With the C
    /// extension enabled the low bit must be clear.
    #[inline]
    pub const fn insn_is_misaligned(pc: u32) -> bool {
        pc & 0x1 != 0
    }
}
