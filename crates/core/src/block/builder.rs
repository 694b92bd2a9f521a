//! Basic-block builder.
//!
//! Starting from a guest program counter, fetch-decode-append into a fresh
//! `Block` until a terminator is reached, the per-block capacity runs out,
//! or (when page bounding is requested) the next fetch would cross a 4 KiB
//! page boundary.
//!
//! An undecodable word appends an `Illegal` record carrying the raw bits and
//! terminates the block; executing that record raises the
//! illegal-instruction trap at the faulting PC.
//!
//! Blocks are immutable once built except for the two lazy branch-edge
//! handles, the `predict` hint, the fusion rewrite, and the promotion flags.

use tracing::trace;

use super::Block;
use crate::common::{PAGE_SHIFT, PAGE_SIZE};
use crate::isa::decode::decode;
use crate::isa::insn::Insn;
use crate::isa::op::Op;
use crate::sim::memory::Memory;

/// Builds the block starting at `pc_start`.
///
/// # Arguments
///
/// * `mem` - Guest memory to fetch from.
/// * `pc_start` - First instruction address.
/// * `capacity` - Maximum instructions per block.
/// * `page_bounded` - Stop at 4 KiB page boundaries (address-translation
///   builds); sequential fall-through is later chained like a taken edge.
pub fn build(mem: &Memory, pc_start: u32, capacity: usize, page_bounded: bool) -> Block {
    let mut block = Block {
        pc_start,
        pc_end: pc_start,
        translatable: true,
        ..Block::default()
    };

    while block.insns.len() < capacity {
        let word = mem.ifetch(block.pc_end);
        let Some(ir) = decode(word, block.pc_end) else {
            let mut ir = Insn::at(block.pc_end);
            ir.op = Op::Illegal;
            ir.imm = word as i32;
            // Trap-value bookkeeping wants the real encoding length so the
            // default handler can step over it.
            ir.len = if word & 0x3 == 0x3 { 4 } else { 2 };
            block.pc_end += u32::from(ir.len);
            block.translatable = false;
            block.insns.push(ir);
            break;
        };

        block.pc_end += u32::from(ir.len);
        block.translatable &= ir.op.is_translatable();
        let done = ir.op.is_terminator();
        block.insns.push(ir);
        if done {
            break;
        }

        if page_bounded && block.pc_end & (PAGE_SIZE - 1) == 0 {
            block.page_terminated = true;
            break;
        }
    }

    block.cycle_cost = block.insns.len() as u32;
    trace!(
        pc_start = format_args!("{pc_start:#x}"),
        pc_end = format_args!("{:#x}", block.pc_end),
        insns = block.insns.len(),
        page = pc_start >> PAGE_SHIFT,
        "block built"
    );
    block
}
