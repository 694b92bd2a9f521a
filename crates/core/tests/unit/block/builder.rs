//! Block builder unit tests.
//!
//! Termination rules, the address-range invariant, capacity splitting,
//! page bounding, and illegal-encoding conversion.

use pretty_assertions::assert_eq;
use rivet_core::block::builder::build;
use rivet_core::isa::op::Op;
use rivet_core::sim::memory::Memory;

use crate::common::builder::instruction as rv;

fn mem_with(words: &[u32], base: u32) -> Memory {
    let mut mem = Memory::new().unwrap();
    let mut addr = base;
    for &w in words {
        mem.write_w(addr, w);
        addr += 4;
    }
    mem
}

#[test]
fn block_ends_at_a_jump() {
    let mem = mem_with(
        &[rv::addi(1, 0, 1), rv::addi(2, 1, 2), rv::jal(0, -8)],
        0x1000,
    );
    let blk = build(&mem, 0x1000, 1024, false);
    assert_eq!(blk.insns.len(), 3);
    assert_eq!(blk.terminator().op, Op::Jal);
    assert_eq!(blk.pc_start, 0x1000);
    assert_eq!(blk.pc_end, 0x100c);
    assert!(blk.translatable);
    assert!(!blk.page_terminated);
}

#[test]
fn address_range_equals_sum_of_lengths() {
    let mut mem = Memory::new().unwrap();
    // Mixed widths: c.addi, addi, c.j.
    mem.write_s(0x1000, rv::c_addi(5, 1));
    mem.write_w(0x1002, rv::addi(6, 5, 2));
    mem.write_s(0x1006, rv::c_j(-6));
    let blk = build(&mem, 0x1000, 1024, false);
    let total: u32 = blk.insns.iter().map(|i| u32::from(i.len)).sum();
    assert_eq!(blk.pc_end - blk.pc_start, total);
    assert_eq!(blk.pc_end, 0x1008);
}

#[test]
fn branches_and_environment_calls_terminate() {
    for term in [
        rv::beq(0, 0, 8),
        rv::jalr(0, 1, 0),
        rv::ecall(),
        rv::ebreak(),
        rv::mret(),
        rv::fence_i(),
    ] {
        let mem = mem_with(&[rv::addi(1, 0, 1), term], 0x1000);
        let blk = build(&mem, 0x1000, 1024, false);
        assert_eq!(blk.insns.len(), 2, "terminator {term:#010x}");
    }
}

#[test]
fn capacity_splits_without_terminator() {
    let code: Vec<u32> = (0..8).map(|i| rv::addi(1, 1, i)).collect();
    let mem = mem_with(&code, 0x1000);
    let blk = build(&mem, 0x1000, 4, false);
    assert_eq!(blk.insns.len(), 4);
    assert!(!blk.terminator().op.is_terminator());
    assert!(!blk.page_terminated);
}

#[test]
fn page_bounded_block_stops_at_page_edge() {
    let code: Vec<u32> = (0..4).map(|_| rv::addi(1, 1, 1)).collect();
    let mem = mem_with(&code, 0x1ff8);
    let blk = build(&mem, 0x1ff8, 1024, true);
    assert_eq!(blk.insns.len(), 2);
    assert_eq!(blk.pc_end, 0x2000);
    assert!(blk.page_terminated);
}

#[test]
fn illegal_word_becomes_trap_record() {
    let mem = mem_with(&[rv::addi(1, 0, 1), 0xffff_ffff], 0x1000);
    let blk = build(&mem, 0x1000, 1024, false);
    assert_eq!(blk.insns.len(), 2);
    let term = blk.terminator();
    assert_eq!(term.op, Op::Illegal);
    assert_eq!(term.imm as u32, 0xffff_ffff);
    assert_eq!(term.len, 4);
    assert!(!blk.translatable);
}

#[test]
fn illegal_compressed_word_has_len_two() {
    let mut mem = Memory::new().unwrap();
    mem.write_s(0x1000, 0x0000);
    let blk = build(&mem, 0x1000, 1024, false);
    assert_eq!(blk.terminator().op, Op::Illegal);
    assert_eq!(blk.terminator().len, 2);
}

#[test]
fn cycle_cost_is_instruction_count() {
    let mem = mem_with(
        &[rv::addi(1, 0, 1), rv::addi(2, 0, 2), rv::jal(0, 0)],
        0x1000,
    );
    let blk = build(&mem, 0x1000, 1024, false);
    assert_eq!(blk.cycle_cost, 3);
}

#[test]
fn csr_content_marks_block_untranslatable() {
    let mem = mem_with(&[rv::csrrw(1, 0x340, 2), rv::jal(0, 0)], 0x1000);
    let blk = build(&mem, 0x1000, 1024, false);
    assert!(!blk.translatable);
}
