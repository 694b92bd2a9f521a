//! Driver loop tests: prediction, lazy edge patching, halting, the
//! interrupt flag, and translation flushing on `FENCE.I`.

use pretty_assertions::assert_eq;

use crate::common::builder::instruction as rv;
use crate::common::harness::{TestContext, exit_seq};
use rivet_core::block::cache::cache_key;

#[test]
fn exit_syscall_halts_with_code() {
    let mut ctx = TestContext::new();
    ctx.write_code(&exit_seq(42));
    assert_eq!(ctx.run(), Some(42));
    assert!(ctx.machine.cpu.halt);
}

#[test]
fn halting_is_sticky() {
    let mut ctx = TestContext::new();
    ctx.write_code(&exit_seq(1));
    let _ = ctx.run();
    let pc = ctx.pc();
    ctx.step(100);
    assert_eq!(ctx.pc(), pc);
}

#[test]
fn interrupt_flag_stops_at_a_block_boundary() {
    let mut ctx = TestContext::new();
    ctx.write_code(&[rv::jal(0, 0)]);
    ctx.machine.interrupt_flag().store(true, std::sync::atomic::Ordering::Relaxed);
    assert_eq!(ctx.run(), None);
    assert!(!ctx.machine.cpu.halt);
}

#[test]
fn loop_transitions_use_the_prediction_fast_path() {
    let mut ctx = TestContext::new();
    // Two blocks bouncing between each other.
    ctx.write_code(&[
        rv::addi(1, 1, 1), // block A
        rv::jal(0, 4),     // -> B
        rv::addi(2, 2, 1), // block B
        rv::jal(0, -12),   // -> A
    ]);
    ctx.step(64);
    assert!(ctx.machine.stats.predict_hits > 0);
    assert!(ctx.machine.stats.cache_misses <= 2);
}

#[test]
fn branch_edges_are_patched_after_first_transition() {
    let mut ctx = TestContext::new();
    // A conditional branch seen both ways.
    ctx.write_code(&[
        rv::bne(1, 0, 8),  // 0x1000: taken -> 0x1008, untaken -> 0x1004
        rv::jal(0, 0),     // 0x1004
        rv::jal(0, 0),     // 0x1008
    ]);
    // First pass: untaken (x1 == 0).
    ctx.step(4);
    // Second pass: restart taken.
    ctx.machine.cpu.pc = 0x1000;
    ctx.set_reg(1, 1);
    ctx.step(4);

    let r = ctx.machine.cache.get(cache_key(0x1000, 0), false).unwrap();
    let blk = ctx.machine.cache.resolve(r).unwrap();
    let term = blk.terminator();
    assert!(term.branch_untaken.is_some());
    assert!(term.branch_taken.is_some());

    // The spec relation between edge targets and the terminator.
    let taken = term.branch_taken.unwrap();
    let t = ctx.machine.cache.resolve(taken).unwrap();
    assert_eq!(t.pc_start, term.pc.wrapping_add(term.imm as u32));
    let untaken = term.branch_untaken.unwrap();
    let u = ctx.machine.cache.resolve(untaken).unwrap();
    assert_eq!(u.pc_start, term.pc.wrapping_add(u32::from(term.len)));
}

#[test]
fn blocks_are_reused_not_rebuilt() {
    let mut ctx = TestContext::new();
    ctx.write_code(&[rv::addi(1, 1, 1), rv::jal(0, -4)]);
    ctx.step(64);
    assert_eq!(ctx.machine.stats.blocks_built, 1);
}

#[test]
fn fence_i_flushes_translated_blocks() {
    let mut ctx = TestContext::new();
    // Pre-build a block at 0x1010 holding li x5,1 then park.
    ctx.write_code(&[rv::jal(0, 16)]); // jump over the patched region
    ctx.machine.cpu.mem.write_w(0x1010, rv::addi(5, 0, 1));
    ctx.machine.cpu.mem.write_w(0x1014, rv::jal(0, 0));
    ctx.step(4); // builds and runs the 0x1010 block
    assert_eq!(ctx.reg(5), 1);

    // Guest code patches 0x1010 to li x5,7 and issues fence.i.
    let patch = rv::addi(5, 0, 7);
    assert_eq!(patch & 0x800, 0, "low half must not sign-extend");
    ctx.machine.cpu.pc = 0x2000;
    ctx.machine.cpu.mem.write_w(0x2000, rv::lui(3, 1)); // x3 = 0x1000
    ctx.machine.cpu.mem.write_w(0x2004, rv::lui(2, (patch >> 12) as i32));
    ctx.machine.cpu.mem.write_w(0x2008, rv::addi(2, 2, (patch & 0xfff) as i32));
    ctx.machine.cpu.mem.write_w(0x200c, rv::sw(3, 2, 0x10)); // mem[0x1010] = patch
    ctx.machine.cpu.mem.write_w(0x2010, rv::fence_i());
    ctx.machine.cpu.mem.write_w(0x2014, rv::jal(0, 0));
    ctx.step(8);
    assert_eq!(ctx.machine.cpu.mem.read_w(0x1010), patch);

    ctx.machine.cpu.pc = 0x1010;
    ctx.step(8);
    assert_eq!(ctx.reg(5), 7, "stale translation executed after fence.i");
}

#[test]
fn register_dump_carries_abi_names() {
    let mut ctx = TestContext::new();
    ctx.set_reg(2, 0x1234);
    let dump = ctx.machine.dump_registers();
    assert_eq!(dump["sp"], 0x1234);
    assert_eq!(dump["zero"], 0);
    assert!(dump.get("pc").is_some());
}
