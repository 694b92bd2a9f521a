//! Macro-op fusion.
//!
//! Runs once per block immediately after construction. A peephole window
//! scans neighbouring instructions and rewrites recognized runs and pairs
//! into single synthetic operations whose `fuse` slice carries the original
//! operands. Entries execute strictly in program order, so every rewrite is
//! bit-for-bit equivalent under ordinary execution; on a trap the
//! interpreter replays per-entry, preserving per-instruction semantics.
//!
//! Runs are capped at [`FUSE_MAX_ENTRIES`]; longer sequences keep their
//! tail as ordinary instructions. Fusion never crosses the block
//! terminator, with one deliberate exception: the decrement-and-branch pair
//! *becomes* the terminator.

use super::Block;
use crate::isa::abi::{REG_A7, REG_ZERO};
use crate::isa::insn::{FUSE_MAX_ENTRIES, FuseEntry, Insn};
use crate::isa::op::Op;

/// Applies the fusion pass to a freshly built block, returning the number
/// of synthetic operations created.
pub fn run(block: &mut Block) -> u32 {
    let insns = std::mem::take(&mut block.insns);
    let mut out: Vec<Insn> = Vec::with_capacity(insns.len());
    let mut fused = 0u32;
    let mut i = 0;

    while i < insns.len() {
        let n = try_fuse(&insns[i..], &mut out);
        if n > 0 {
            fused += 1;
            i += n;
        } else {
            out.push(insns[i].clone());
            i += 1;
        }
    }

    block.insns = out;
    fused
}

/// Copies the operand fields of `ir` into a fusion entry.
fn entry(ir: &Insn) -> FuseEntry {
    FuseEntry {
        imm: ir.imm,
        rd: ir.rd,
        rs1: ir.rs1,
        rs2: ir.rs2,
        op: ir.op,
    }
}

/// Counts the leading run of instructions in `w` accepted by `pred`,
/// starting from a window already known to begin the run.
fn run_len(w: &[Insn], pred: impl Fn(&Insn) -> bool) -> usize {
    let mut n = 0;
    while n < w.len() && n < FUSE_MAX_ENTRIES && pred(&w[n]) {
        n += 1;
    }
    n
}

/// Attempts every pattern at the start of window `w`. On success pushes the
/// synthetic instruction and returns how many originals it consumed.
fn try_fuse(w: &[Insn], out: &mut Vec<Insn>) -> usize {
    match w[0].op {
        Op::Lui => fuse_lui(w, out),
        Op::Addi => fuse_addi(w, out),
        Op::Sw => fuse_store_run(w, out),
        Op::Lw => fuse_load(w, out),
        Op::Slli | Op::Srli | Op::Srai => fuse_shift_run(w, out),
        _ => 0,
    }
}

/// Patterns anchored on `LUI`: constant runs, full 32-bit constant loads,
/// precompute-and-add, and absolute-address accesses.
fn fuse_lui(w: &[Insn], out: &mut Vec<Insn>) -> usize {
    let lui = &w[0];

    let n = run_len(w, |ir| ir.op == Op::Lui);
    if n >= 2 {
        let mut ir = Insn::at(lui.pc);
        ir.op = Op::FusedLuiRun;
        ir.len = (4 * n) as u8;
        ir.imm2 = n as i32;
        ir.fuse = w[..n].iter().map(entry).collect();
        out.push(ir);
        return n;
    }

    let Some(next) = w.get(1) else { return 0 };
    match next.op {
        // LUI rd,hi ; ADDI rd,rd,lo — a 32-bit constant load.
        Op::Addi if next.rd == lui.rd && next.rs1 == lui.rd => {
            let mut ir = Insn::at(lui.pc);
            ir.op = Op::FusedLoadImm32;
            ir.len = 8;
            ir.rd = lui.rd;
            ir.imm = lui.imm;
            ir.imm2 = next.imm;
            out.push(ir);
            2
        }
        // LUI rd,hi ; ADD rd2,rs1,rd — precompute + add.
        Op::Add if next.rs2 == lui.rd => {
            let mut ir = Insn::at(lui.pc);
            ir.op = Op::FusedLuiAdd;
            ir.len = 8;
            ir.rd = lui.rd;
            ir.imm = lui.imm;
            ir.rs1 = next.rs1;
            ir.rs2 = next.rd;
            out.push(ir);
            2
        }
        // LUI rd,hi ; LW rd2,lo(rd) — absolute-address load.
        Op::Lw if next.rs1 == lui.rd => {
            let mut ir = Insn::at(lui.pc);
            ir.op = Op::FusedAbsLoad;
            ir.len = 8;
            ir.rd = lui.rd;
            ir.rs2 = next.rd;
            ir.imm = lui.imm;
            ir.imm2 = next.imm;
            out.push(ir);
            2
        }
        // LUI rd,hi ; SW rs2,lo(rd) — absolute-address store.
        Op::Sw if next.rs1 == lui.rd => {
            let mut ir = Insn::at(lui.pc);
            ir.op = Op::FusedAbsStore;
            ir.len = 8;
            ir.rd = lui.rd;
            ir.rs1 = next.rs2;
            ir.imm = lui.imm;
            ir.imm2 = next.imm;
            out.push(ir);
            2
        }
        _ => 0,
    }
}

/// Patterns anchored on `ADDI`: the syscall fast path, decrement-and-branch,
/// and plain ADDI clusters.
fn fuse_addi(w: &[Insn], out: &mut Vec<Insn>) -> usize {
    let addi = &w[0];

    // LI a7,n ; ECALL — the syscall fast path (standard calling convention
    // only; RV32E uses a different syscall register).
    if addi.rd == REG_A7
        && addi.rs1 == REG_ZERO
        && let Some(next) = w.get(1)
        && next.op == Op::Ecall
    {
        let mut ir = Insn::at(addi.pc);
        ir.op = Op::FusedSyscall;
        ir.len = 8;
        ir.imm = addi.imm;
        out.push(ir);
        return 2;
    }

    // ADDI rd,rs1,k ; BNE rd,x0,target — decrement-and-branch. This pair
    // becomes the block terminator.
    if let Some(next) = w.get(1)
        && next.op == Op::Bne
        && next.rs1 == addi.rd
        && next.rs2 == REG_ZERO
        && w.len() == 2
    {
        let mut ir = Insn::at(addi.pc);
        ir.op = Op::FusedAddBranch;
        ir.len = 8;
        ir.rd = addi.rd;
        ir.rs1 = addi.rs1;
        ir.imm = addi.imm;
        ir.imm2 = next.imm;
        out.push(ir);
        return 2;
    }

    let n = run_len(w, |ir| ir.op == Op::Addi);
    if n >= 2 {
        let mut ir = Insn::at(addi.pc);
        ir.op = Op::FusedAddiRun;
        ir.len = (4 * n) as u8;
        ir.imm2 = n as i32;
        ir.fuse = w[..n].iter().map(entry).collect();
        out.push(ir);
        return n;
    }
    0
}

/// Gather-store: consecutive `SW` off a common base register.
fn fuse_store_run(w: &[Insn], out: &mut Vec<Insn>) -> usize {
    let base = w[0].rs1;
    let n = run_len(w, |ir| ir.op == Op::Sw && ir.rs1 == base);
    if n < 2 {
        return 0;
    }
    let mut ir = Insn::at(w[0].pc);
    ir.op = Op::FusedStoreRun;
    ir.len = (4 * n) as u8;
    ir.imm2 = n as i32;
    ir.fuse = w[..n].iter().map(entry).collect();
    out.push(ir);
    n
}

/// Patterns anchored on `LW`: post-increment loads and gather-loads.
fn fuse_load(w: &[Insn], out: &mut Vec<Insn>) -> usize {
    let lw = &w[0];

    // LW rd,off(rs1) ; ADDI rs1,rs1,k — post-increment load. The load must
    // not clobber its own base.
    if let Some(next) = w.get(1)
        && next.op == Op::Addi
        && next.rd == lw.rs1
        && next.rs1 == lw.rs1
        && lw.rd != lw.rs1
    {
        let mut ir = Insn::at(lw.pc);
        ir.op = Op::FusedLoadInc;
        ir.len = 8;
        ir.rd = lw.rd;
        ir.rs1 = lw.rs1;
        ir.imm = lw.imm;
        ir.imm2 = next.imm;
        out.push(ir);
        return 2;
    }

    let base = lw.rs1;
    let n = run_len(w, |ir| ir.op == Op::Lw && ir.rs1 == base);
    if n < 2 {
        return 0;
    }
    let mut ir = Insn::at(lw.pc);
    ir.op = Op::FusedLoadRun;
    ir.len = (4 * n) as u8;
    ir.imm2 = n as i32;
    ir.fuse = w[..n].iter().map(entry).collect();
    out.push(ir);
    n
}

/// Shift cluster: consecutive immediate shifts of any flavour.
fn fuse_shift_run(w: &[Insn], out: &mut Vec<Insn>) -> usize {
    let n = run_len(w, |ir| {
        matches!(ir.op, Op::Slli | Op::Srli | Op::Srai)
    });
    if n < 2 {
        return 0;
    }
    let mut ir = Insn::at(w[0].pc);
    ir.op = Op::FusedShiftRun;
    ir.len = (4 * n) as u8;
    ir.imm2 = n as i32;
    ir.fuse = w[..n].iter().map(entry).collect();
    out.push(ir);
    n
}
