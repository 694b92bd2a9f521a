//! Macro-op fusion unit tests.
//!
//! One test per recognized pattern, plus the run-length cap, pattern
//! guards, and the length-accounting invariant after rewrite.

use pretty_assertions::assert_eq;
use rivet_core::block::builder::build;
use rivet_core::block::fusion;
use rivet_core::block::Block;
use rivet_core::isa::op::Op;
use rivet_core::sim::memory::Memory;

use crate::common::builder::instruction as rv;

fn fused_block(words: &[u32]) -> (Block, u32) {
    let mut mem = Memory::new().unwrap();
    let mut addr = 0x1000;
    for &w in words {
        mem.write_w(addr, w);
        addr += 4;
    }
    let mut blk = build(&mem, 0x1000, 1024, false);
    let n = fusion::run(&mut blk);
    (blk, n)
}

#[test]
fn lui_plus_addi_becomes_constant_load() {
    let (blk, n) = fused_block(&[
        rv::lui(10, 0x12345),
        rv::addi(10, 10, 0x678),
        rv::jal(0, 0),
    ]);
    assert_eq!(n, 1);
    let ir = &blk.insns[0];
    assert_eq!(ir.op, Op::FusedLoadImm32);
    assert_eq!(ir.rd, 10);
    assert_eq!(ir.imm, 0x12345 << 12);
    assert_eq!(ir.imm2, 0x678);
    assert_eq!(ir.len, 8);
}

#[test]
fn lui_addi_with_different_rd_does_not_fuse_into_constant() {
    let (blk, _) = fused_block(&[rv::lui(10, 1), rv::addi(11, 11, 4), rv::jal(0, 0)]);
    assert!(blk.insns.iter().all(|i| i.op != Op::FusedLoadImm32));
}

#[test]
fn lui_run_gathers_entries() {
    let (blk, n) = fused_block(&[rv::lui(1, 1), rv::lui(2, 2), rv::lui(3, 3), rv::jal(0, 0)]);
    assert_eq!(n, 1);
    let ir = &blk.insns[0];
    assert_eq!(ir.op, Op::FusedLuiRun);
    assert_eq!(ir.imm2, 3);
    assert_eq!(ir.fuse.len(), 3);
    assert_eq!(ir.fuse[2].rd, 3);
    assert_eq!(ir.fuse[2].imm, 3 << 12);
    assert_eq!(ir.len, 12);
}

#[test]
fn runs_cap_at_sixteen_entries() {
    let code: Vec<u32> = (0..18).map(|i| rv::lui(1 + (i % 20), i as i32)).collect();
    let (blk, _) = fused_block(&code);
    assert_eq!(blk.insns[0].op, Op::FusedLuiRun);
    assert_eq!(blk.insns[0].fuse.len(), 16);
    // The two-instruction tail becomes its own run.
    assert_eq!(blk.insns[1].op, Op::FusedLuiRun);
    assert_eq!(blk.insns[1].fuse.len(), 2);
}

#[test]
fn lui_add_precompute() {
    let (blk, n) = fused_block(&[rv::lui(5, 0x10), rv::add(6, 7, 5), rv::jal(0, 0)]);
    assert_eq!(n, 1);
    let ir = &blk.insns[0];
    assert_eq!(ir.op, Op::FusedLuiAdd);
    assert_eq!(ir.rd, 5); // constant destination
    assert_eq!(ir.rs1, 7); // add source
    assert_eq!(ir.rs2, 6); // add destination
}

#[test]
fn store_run_requires_common_base() {
    let (blk, n) = fused_block(&[
        rv::sw(2, 10, 0),
        rv::sw(2, 11, 4),
        rv::sw(2, 12, 8),
        rv::sw(3, 13, 12),
        rv::jal(0, 0),
    ]);
    assert_eq!(n, 1);
    assert_eq!(blk.insns[0].op, Op::FusedStoreRun);
    assert_eq!(blk.insns[0].fuse.len(), 3);
    assert_eq!(blk.insns[1].op, Op::Sw);
}

#[test]
fn load_run_gathers() {
    let (blk, n) = fused_block(&[rv::lw(10, 2, 0), rv::lw(11, 2, 4), rv::jal(0, 0)]);
    assert_eq!(n, 1);
    assert_eq!(blk.insns[0].op, Op::FusedLoadRun);
    assert_eq!(blk.insns[0].fuse.len(), 2);
}

#[test]
fn shift_cluster_keeps_per_entry_operation() {
    let (blk, n) = fused_block(&[
        rv::slli(1, 1, 4),
        rv::srli(2, 2, 3),
        rv::srai(3, 3, 2),
        rv::jal(0, 0),
    ]);
    assert_eq!(n, 1);
    let ir = &blk.insns[0];
    assert_eq!(ir.op, Op::FusedShiftRun);
    assert_eq!(ir.fuse[0].op, Op::Slli);
    assert_eq!(ir.fuse[1].op, Op::Srli);
    assert_eq!(ir.fuse[2].op, Op::Srai);
}

#[test]
fn syscall_fast_path() {
    let (blk, n) = fused_block(&[rv::addi(17, 0, 93), rv::ecall()]);
    assert_eq!(n, 1);
    let ir = &blk.insns[0];
    assert_eq!(ir.op, Op::FusedSyscall);
    assert_eq!(ir.imm, 93);
    assert_eq!(blk.insns.len(), 1);
}

#[test]
fn li_into_other_register_is_not_a_syscall() {
    let (blk, _) = fused_block(&[rv::addi(16, 0, 93), rv::ecall()]);
    assert!(blk.insns.iter().all(|i| i.op != Op::FusedSyscall));
}

#[test]
fn addi_run_gathers() {
    let (blk, n) = fused_block(&[
        rv::addi(1, 0, 1),
        rv::addi(2, 1, 2),
        rv::addi(3, 2, 3),
        rv::jal(0, 0),
    ]);
    assert_eq!(n, 1);
    assert_eq!(blk.insns[0].op, Op::FusedAddiRun);
    assert_eq!(blk.insns[0].fuse.len(), 3);
}

#[test]
fn absolute_load_and_store() {
    let (blk, _) = fused_block(&[rv::lui(5, 0x20), rv::lw(6, 5, 0x40), rv::jal(0, 0)]);
    let ir = &blk.insns[0];
    assert_eq!(ir.op, Op::FusedAbsLoad);
    assert_eq!(ir.rd, 5);
    assert_eq!(ir.rs2, 6);
    assert_eq!(ir.imm, 0x20 << 12);
    assert_eq!(ir.imm2, 0x40);

    let (blk, _) = fused_block(&[rv::lui(5, 0x20), rv::sw(5, 7, 0x40), rv::jal(0, 0)]);
    let ir = &blk.insns[0];
    assert_eq!(ir.op, Op::FusedAbsStore);
    assert_eq!(ir.rs1, 7); // value to store
}

#[test]
fn post_increment_load() {
    let (blk, n) = fused_block(&[rv::lw(10, 11, 0), rv::addi(11, 11, 4), rv::jal(0, 0)]);
    assert_eq!(n, 1);
    let ir = &blk.insns[0];
    assert_eq!(ir.op, Op::FusedLoadInc);
    assert_eq!((ir.rd, ir.rs1), (10, 11));
    assert_eq!(ir.imm2, 4);
}

#[test]
fn post_increment_guard_rejects_base_clobber() {
    // The load writes its own base; fusing would change semantics.
    let (blk, _) = fused_block(&[rv::lw(11, 11, 0), rv::addi(11, 11, 4), rv::jal(0, 0)]);
    assert!(blk.insns.iter().all(|i| i.op != Op::FusedLoadInc));
}

#[test]
fn decrement_and_branch_becomes_terminator() {
    let (blk, n) = fused_block(&[rv::addi(5, 5, -1), rv::bne(5, 0, -16)]);
    assert_eq!(n, 1);
    assert_eq!(blk.insns.len(), 1);
    let ir = blk.terminator();
    assert_eq!(ir.op, Op::FusedAddBranch);
    assert_eq!(ir.imm, -1);
    assert_eq!(ir.imm2, -16);
    assert!(ir.op.is_terminator());
    assert!(ir.op.is_cond_branch());
}

#[test]
fn length_accounting_survives_rewrite() {
    let (blk, _) = fused_block(&[
        rv::lui(1, 1),
        rv::lui(2, 2),
        rv::addi(3, 0, 1),
        rv::addi(4, 0, 2),
        rv::jal(0, 0),
    ]);
    let total: u32 = blk.insns.iter().map(|i| u32::from(i.len)).sum();
    assert_eq!(blk.pc_end - blk.pc_start, total);
}

#[test]
fn cycle_cost_is_preserved() {
    let (blk, _) = fused_block(&[rv::lui(1, 1), rv::lui(2, 2), rv::lui(3, 3), rv::jal(0, 0)]);
    assert_eq!(blk.cycle_cost, 4);
}
