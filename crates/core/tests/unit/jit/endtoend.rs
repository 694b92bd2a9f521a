//! Tier-1 equivalence tests.
//!
//! The same guest program runs once under the pure interpreter and once
//! with an aggressive tier-1 threshold; the architectural outcomes must be
//! identical (the defining property of the translation).

use pretty_assertions::assert_eq;

use crate::common::builder::instruction as rv;
use crate::common::harness::{TestContext, exit_seq};
use rivet_core::Config;

fn jit_config(hot: u32) -> Config {
    let mut config = Config::default();
    config.jit.enabled = true;
    config.jit.tier2 = false;
    config.jit.hot_threshold = hot;
    config
}

/// Sum of 1..=n computed with a countdown loop, returned via `exit`.
fn sum_loop_program(n: i32) -> Vec<u32> {
    let mut code = vec![
        rv::addi(5, 0, n),   // 0x1000: x5 = n
        rv::addi(6, 0, 0),   // 0x1004: x6 = 0
        rv::add(6, 6, 5),    // 0x1008: loop: x6 += x5
        rv::addi(5, 5, -1),  // 0x100c
        rv::bne(5, 0, -8),   // 0x1010 -> 0x1008
    ];
    code.extend(exit_seq(0)); // exit; the sum is checked in x6
    code
}

fn run_program(code: &[u32], config: Config) -> (Option<u32>, [u32; 32], u64) {
    let mut ctx = TestContext::with_config(config);
    ctx.write_code(code);
    let exit = ctx.run();
    (exit, ctx.machine.cpu.x, ctx.machine.cpu.csr_cycle)
}

#[test]
fn tier1_matches_the_interpreter_on_a_loop() {
    let code = sum_loop_program(100);

    let mut interp_only = Config::default();
    interp_only.jit.enabled = false;
    let (exit_i, regs_i, cycle_i) = run_program(&code, interp_only);

    let (exit_j, regs_j, cycle_j) = run_program(&code, jit_config(2));

    assert_eq!(exit_i, Some(0));
    assert_eq!(regs_i[6], 5050);
    assert_eq!(exit_j, exit_i);
    assert_eq!(regs_j, regs_i);
    assert_eq!(cycle_j, cycle_i);
}

#[test]
fn tier1_actually_compiled_something() {
    let mut ctx = TestContext::with_config(jit_config(2));
    ctx.write_code(&sum_loop_program(50));
    let _ = ctx.run();
    assert!(ctx.machine.stats.jit_compiles > 0);
    assert!(ctx.machine.stats.jit_invocations > 0);
}

#[test]
fn tier1_handles_memory_and_multiplies() {
    // Store a table of squares, then sum it back.
    let mut code = vec![
        rv::addi(5, 0, 10),   // counter
        rv::lui(7, 0x10),     // x7 = 0x10000 (table base)
        rv::add(8, 0, 7),     // cursor
        // loop: x9 = x5 * x5 ; store ; advance
        rv::mul(9, 5, 5),     // 0x100c
        rv::sw(8, 9, 0),
        rv::addi(8, 8, 4),
        rv::addi(5, 5, -1),
        rv::bne(5, 0, -16),   // -> 0x100c
        // second loop: read back and sum into x6
        rv::addi(5, 0, 10),
        rv::add(8, 0, 7),
        rv::lw(9, 8, 0),      // 0x1028
        rv::add(6, 6, 9),
        rv::addi(8, 8, 4),
        rv::addi(5, 5, -1),
        rv::bne(5, 0, -16),   // -> 0x1028
    ];
    code.extend(exit_seq(0));
    let expect: u32 = (1..=10u32).map(|i| i * i).sum();

    let mut interp_only = Config::default();
    interp_only.jit.enabled = false;
    let (_, regs_i, _) = run_program(&code, interp_only);
    let (_, regs_j, _) = run_program(&code, jit_config(1));

    assert_eq!(regs_i[6], expect);
    assert_eq!(regs_j, regs_i);
}

#[test]
fn tier1_division_edge_cases_match() {
    let mut code = vec![
        rv::addi(1, 0, -1),
        rv::addi(2, 0, 0),
        rv::div(3, 1, 2),    // /0 -> all ones
        rv::lui(4, 0x80000), // INT_MIN
        rv::div(5, 4, 1),    // INT_MIN / -1 -> INT_MIN
        rv::rem(6, 4, 1),    // -> 0
        rv::rem(7, 1, 2),    // x % 0 -> x
        rv::addi(8, 0, 100),
        rv::addi(9, 0, 7),
        rv::div(28, 8, 9),
        rv::rem(29, 8, 9),
    ];
    code.extend(exit_seq(0));

    let mut interp_only = Config::default();
    interp_only.jit.enabled = false;
    let (_, regs_i, _) = run_program(&code, interp_only);
    let (_, regs_j, _) = run_program(&code, jit_config(1));

    assert_eq!(regs_i[3], 0xffff_ffff);
    assert_eq!(regs_i[5], 0x8000_0000);
    assert_eq!(regs_i[6], 0);
    assert_eq!(regs_i[7], 0xffff_ffff);
    assert_eq!(regs_i[28], 14);
    assert_eq!(regs_i[29], 2);
    assert_eq!(regs_j, regs_i);
}

#[test]
fn tier2_pipeline_preserves_semantics() {
    let mut config = jit_config(1);
    config.jit.tier2 = true;
    config.jit.hot2_threshold = 4;

    let code = sum_loop_program(5000);
    let (exit, regs, _) = run_program(&code, config);
    assert_eq!(exit, Some(0));
    assert_eq!(regs[6], 5000 * 5001 / 2);
}

#[test]
fn flush_threshold_of_one_still_terminates() {
    // Compile on the very first invocation of every block.
    let code = sum_loop_program(20);
    let (exit, regs, _) = run_program(&code, jit_config(1));
    assert_eq!(exit, Some(0));
    assert_eq!(regs[6], 210);
}
