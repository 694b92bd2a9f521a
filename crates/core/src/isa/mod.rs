//! Instruction set support.
//!
//! This module covers everything between raw instruction bits and the IR the
//! rest of the pipeline consumes:
//! 1. **Opcodes:** The `Op` tag over all implemented operations, including
//!    the synthetic fused opcodes.
//! 2. **IR:** The decoded instruction record (`Insn`) and fusion entries.
//! 3. **Decoding:** The 32-bit decoder and the 16-bit compressed decoder.
//! 4. **ABI:** Register index constants and assembler names.

/// ABI register indices and names.
pub mod abi;
/// The 32-bit instruction decoder.
pub mod decode;
/// Decoded instruction record and fusion entries.
pub mod insn;
/// Operation tags for the IR.
pub mod op;
/// The 16-bit compressed instruction decoder.
pub mod rvc;

pub use insn::{FuseEntry, Insn};
pub use op::Op;
