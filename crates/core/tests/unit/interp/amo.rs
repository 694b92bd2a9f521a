//! A-extension semantics: load-reserved/store-conditional and the AMO
//! read-modify-write group.

use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::common::builder::instruction as rv;
use crate::common::harness::TestContext;

#[test]
fn lr_sc_pair_succeeds() {
    let mut ctx = TestContext::new();
    ctx.set_reg(1, 0x4000);
    ctx.set_reg(2, 99);
    ctx.machine.cpu.mem.write_w(0x4000, 7);
    ctx.write_code(&[rv::lr_w(5, 1), rv::sc_w(6, 1, 2), rv::jal(0, 0)]);
    ctx.step(8);
    assert_eq!(ctx.reg(5), 7);
    assert_eq!(ctx.reg(6), 0); // success
    assert_eq!(ctx.machine.cpu.mem.read_w(0x4000), 99);
}

#[test]
fn sc_without_reservation_fails() {
    let mut ctx = TestContext::new();
    ctx.set_reg(1, 0x4000);
    ctx.set_reg(2, 99);
    ctx.machine.cpu.mem.write_w(0x4000, 7);
    ctx.write_code(&[rv::sc_w(6, 1, 2), rv::jal(0, 0)]);
    ctx.step(8);
    assert_eq!(ctx.reg(6), 1); // failure
    assert_eq!(ctx.machine.cpu.mem.read_w(0x4000), 7);
}

#[test]
fn sc_to_a_different_word_fails() {
    let mut ctx = TestContext::new();
    ctx.set_reg(1, 0x4000);
    ctx.set_reg(3, 0x4008);
    ctx.set_reg(2, 99);
    ctx.write_code(&[rv::lr_w(5, 1), rv::sc_w(6, 3, 2), rv::jal(0, 0)]);
    ctx.step(8);
    assert_eq!(ctx.reg(6), 1);
}

#[rstest]
#[case(rv::amoadd_w(5, 1, 2), 10, 3, 13)]
#[case(rv::amoswap_w(5, 1, 2), 10, 3, 3)]
#[case(rv::amo(0x04, 5, 1, 2), 0b1100, 0b1010, 0b0110)] // amoxor
#[case(rv::amo(0x0c, 5, 1, 2), 0b1100, 0b1010, 0b1000)] // amoand
#[case(rv::amo(0x08, 5, 1, 2), 0b1100, 0b1010, 0b1110)] // amoor
#[case(rv::amo(0x10, 5, 1, 2), (-5i32) as u32, 3, (-5i32) as u32)] // amomin
#[case(rv::amo(0x14, 5, 1, 2), (-5i32) as u32, 3, 3)] // amomax
#[case(rv::amo(0x18, 5, 1, 2), (-5i32) as u32, 3, 3)] // amominu
#[case(rv::amo(0x1c, 5, 1, 2), (-5i32) as u32, 3, (-5i32) as u32)] // amomaxu
fn amo_read_modify_write(
    #[case] insn: u32,
    #[case] old: u32,
    #[case] operand: u32,
    #[case] new: u32,
) {
    let mut ctx = TestContext::new();
    ctx.set_reg(1, 0x4000);
    ctx.set_reg(2, operand);
    ctx.machine.cpu.mem.write_w(0x4000, old);
    ctx.write_code(&[insn, rv::jal(0, 0)]);
    ctx.step(8);
    assert_eq!(ctx.reg(5), old, "rd receives the prior value");
    assert_eq!(ctx.machine.cpu.mem.read_w(0x4000), new);
}

#[test]
fn misaligned_amo_always_traps() {
    let mut ctx = TestContext::new();
    ctx.machine.cpu.allow_misalign = true; // even under the permissive policy
    ctx.set_reg(1, 0x4002);
    ctx.write_code(&[rv::amoadd_w(5, 1, 2), rv::jal(0, 0)]);
    ctx.step(4);
    assert_eq!(ctx.machine.cpu.csr_mcause, 6);
    assert_eq!(ctx.machine.cpu.csr_mtval, 0x4002);
}
