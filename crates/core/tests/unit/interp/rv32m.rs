//! M-extension semantics, including the architected division edge cases.

use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::common::builder::instruction as rv;
use crate::common::harness::TestContext;

fn run_m(insn: u32, a: u32, b: u32) -> u32 {
    let mut ctx = TestContext::new();
    ctx.set_reg(1, a);
    ctx.set_reg(2, b);
    ctx.write_code(&[insn, rv::jal(0, 0)]);
    ctx.step(8);
    ctx.reg(3)
}

#[rstest]
#[case(7, 6, 42)]
#[case(0xffff_ffff, 2, 0xffff_fffe)] // low half of -1 * 2
#[case(0x8000_0000, 2, 0)]
fn mul_low_half(#[case] a: u32, #[case] b: u32, #[case] expect: u32) {
    assert_eq!(run_m(rv::mul(3, 1, 2), a, b), expect);
}

#[test]
fn mulh_variants() {
    // -1 * -1 = 1: signed high half is 0.
    assert_eq!(run_m(rv::mulh(3, 1, 2), u32::MAX, u32::MAX), 0);
    // 2^31 * 2 signed: (-2^31) * 2 = -2^32, high half -1.
    assert_eq!(run_m(rv::mulh(3, 1, 2), 0x8000_0000, 2), u32::MAX);
    // Unsigned: 0xFFFFFFFF * 0xFFFFFFFF = 0xFFFFFFFE_00000001.
    assert_eq!(run_m(rv::mulhu(3, 1, 2), u32::MAX, u32::MAX), 0xffff_fffe);
    // Signed * unsigned: -1 * 0xFFFFFFFF = -0xFFFFFFFF.
    assert_eq!(run_m(rv::mulhsu(3, 1, 2), u32::MAX, u32::MAX), u32::MAX);
}

#[rstest]
#[case(20, 6, 3)]
#[case((-20i32) as u32, 6, (-3i32) as u32)] // truncates toward zero
#[case(20, (-6i32) as u32, (-3i32) as u32)]
fn div_truncates_toward_zero(#[case] a: u32, #[case] b: u32, #[case] expect: u32) {
    assert_eq!(run_m(rv::div(3, 1, 2), a, b), expect);
}

#[test]
fn div_by_zero_yields_all_ones() {
    assert_eq!(run_m(rv::div(3, 1, 2), u32::MAX, 0), 0xffff_ffff);
    assert_eq!(run_m(rv::divu(3, 1, 2), 42, 0), u32::MAX);
}

#[test]
fn div_overflow_wraps_to_int_min() {
    assert_eq!(run_m(rv::div(3, 1, 2), 0x8000_0000, u32::MAX), 0x8000_0000);
}

#[rstest]
#[case(20, 6, 2)]
#[case((-20i32) as u32, 6, (-2i32) as u32)]
#[case(20, (-6i32) as u32, 2)]
fn rem_sign_follows_dividend(#[case] a: u32, #[case] b: u32, #[case] expect: u32) {
    assert_eq!(run_m(rv::rem(3, 1, 2), a, b), expect);
}

#[test]
fn rem_by_zero_yields_dividend() {
    assert_eq!(run_m(rv::rem(3, 1, 2), 42, 0), 42);
    assert_eq!(run_m(rv::remu(3, 1, 2), 42, 0), 42);
}

#[test]
fn rem_overflow_yields_zero() {
    assert_eq!(run_m(rv::rem(3, 1, 2), 0x8000_0000, u32::MAX), 0);
}

#[test]
fn divu_and_remu_are_unsigned() {
    assert_eq!(run_m(rv::divu(3, 1, 2), u32::MAX, 2), 0x7fff_ffff);
    assert_eq!(run_m(rv::remu(3, 1, 2), u32::MAX, 2), 1);
}
