//! F-extension semantics: arithmetic, NaN handling, classification, and
//! saturating conversions.

use pretty_assertions::assert_eq;

use crate::common::builder::instruction as rv;
use crate::common::harness::TestContext;
use rivet_core::core::csr;

fn fbits(v: f32) -> u32 {
    v.to_bits()
}

#[test]
fn move_between_files_is_bit_exact() {
    let mut ctx = TestContext::new();
    ctx.set_reg(1, 0xc0a0_0000); // -5.0
    ctx.write_code(&[rv::fmv_w_x(2, 1), rv::fmv_x_w(3, 2), rv::jal(0, 0)]);
    ctx.step(8);
    assert_eq!(ctx.machine.cpu.f[2], 0xc0a0_0000);
    assert_eq!(ctx.reg(3), 0xc0a0_0000);
}

#[test]
fn fadd_and_fdiv() {
    let mut ctx = TestContext::new();
    ctx.machine.cpu.f[1] = fbits(1.5);
    ctx.machine.cpu.f[2] = fbits(2.25);
    ctx.write_code(&[rv::fadd_s(3, 1, 2), rv::fdiv_s(4, 2, 1), rv::jal(0, 0)]);
    ctx.step(8);
    assert_eq!(ctx.machine.cpu.f[3], fbits(3.75));
    assert_eq!(ctx.machine.cpu.f[4], fbits(1.5));
}

#[test]
fn fdiv_by_zero_sets_the_dz_flag() {
    let mut ctx = TestContext::new();
    ctx.machine.cpu.f[1] = fbits(1.0);
    ctx.machine.cpu.f[2] = fbits(0.0);
    ctx.write_code(&[rv::fdiv_s(3, 1, 2), rv::jal(0, 0)]);
    ctx.step(8);
    assert_eq!(ctx.machine.cpu.f[3], fbits(f32::INFINITY));
    assert_ne!(ctx.machine.cpu.csr_read(csr::FFLAGS) & (1 << 3), 0);
}

#[test]
fn flw_and_fsw_move_raw_words() {
    let mut ctx = TestContext::new();
    ctx.set_reg(1, 0x4000);
    ctx.machine.cpu.mem.write_w(0x4000, fbits(6.5));
    ctx.write_code(&[rv::flw(2, 1, 0), rv::fsw(1, 2, 8), rv::jal(0, 0)]);
    ctx.step(8);
    assert_eq!(ctx.machine.cpu.mem.read_w(0x4008), fbits(6.5));
}

#[test]
fn load_store_word_loops_preserve_nan_payloads() {
    let mut ctx = TestContext::new();
    let payload = 0x7fa0_1234; // signaling NaN with payload
    ctx.set_reg(1, 0x4000);
    ctx.machine.cpu.mem.write_w(0x4000, payload);
    ctx.write_code(&[rv::flw(2, 1, 0), rv::fsw(1, 2, 4), rv::jal(0, 0)]);
    ctx.step(8);
    assert_eq!(ctx.machine.cpu.mem.read_w(0x4004), payload);
}

mod direct {
    //! Helper-level checks that need no guest code.

    use pretty_assertions::assert_eq;
    use rivet_core::interp::fpu;

    #[test]
    fn fmin_orders_signed_zeros() {
        let (out, invalid) = fpu::fmin((-0.0f32).to_bits(), 0.0f32.to_bits());
        assert_eq!(out, (-0.0f32).to_bits());
        assert!(!invalid);
        let (out, _) = fpu::fmax((-0.0f32).to_bits(), 0.0f32.to_bits());
        assert_eq!(out, 0.0f32.to_bits());
    }

    #[test]
    fn fmin_with_one_nan_returns_the_number() {
        let (out, _) = fpu::fmin(f32::NAN.to_bits(), 3.0f32.to_bits());
        assert_eq!(out, 3.0f32.to_bits());
    }

    #[test]
    fn fmin_with_two_nans_is_canonical() {
        let (out, _) = fpu::fmin(f32::NAN.to_bits(), f32::NAN.to_bits());
        assert_eq!(out, fpu::CANONICAL_NAN);
    }

    #[test]
    fn conversions_saturate() {
        assert_eq!(fpu::fcvt_w(3.9), (3, false));
        assert_eq!(fpu::fcvt_w(-3.9), (-3, false));
        assert_eq!(fpu::fcvt_w(3.0e10), (i32::MAX, true));
        assert_eq!(fpu::fcvt_w(-3.0e10), (i32::MIN, true));
        assert_eq!(fpu::fcvt_w(f32::NAN), (i32::MAX, true));
        assert_eq!(fpu::fcvt_wu(-1.0), (0, true));
        assert_eq!(fpu::fcvt_wu(5.0e9), (u32::MAX, true));
    }

    #[test]
    fn classification_covers_the_ten_classes() {
        assert_eq!(fpu::fclass(f32::NEG_INFINITY.to_bits()), 1 << 0);
        assert_eq!(fpu::fclass((-1.5f32).to_bits()), 1 << 1);
        assert_eq!(fpu::fclass(0x8000_0001), 1 << 2); // negative subnormal
        assert_eq!(fpu::fclass((-0.0f32).to_bits()), 1 << 3);
        assert_eq!(fpu::fclass(0.0f32.to_bits()), 1 << 4);
        assert_eq!(fpu::fclass(0x0000_0001), 1 << 5); // positive subnormal
        assert_eq!(fpu::fclass(1.5f32.to_bits()), 1 << 6);
        assert_eq!(fpu::fclass(f32::INFINITY.to_bits()), 1 << 7);
        assert_eq!(fpu::fclass(0x7f80_0001), 1 << 8); // signaling NaN
        assert_eq!(fpu::fclass(0x7fc0_0000), 1 << 9); // quiet NaN
    }
}
