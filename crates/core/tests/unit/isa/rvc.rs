//! Compressed decoder unit tests.
//!
//! Immediate scatter reconstruction, register mapping into `x8..x15`,
//! hint normalisation, and the RV32-reserved code points.

use pretty_assertions::assert_eq;
use rivet_core::isa::decode::decode;
use rivet_core::isa::op::Op;

use crate::common::builder::instruction as rv;

fn d16(h: u16) -> rivet_core::isa::Insn {
    decode(u32::from(h), 0x1000).unwrap()
}

#[test]
fn compressed_length_is_two() {
    assert_eq!(d16(rv::c_addi(5, 1)).len, 2);
}

#[test]
fn c_addi_signed_immediate() {
    let ir = d16(rv::c_addi(9, -3));
    assert_eq!(ir.op, Op::CAddi);
    assert_eq!(ir.rd, 9);
    assert_eq!(ir.rs1, 9);
    assert_eq!(ir.imm, -3);
}

#[test]
fn c_li_and_c_lui() {
    let ir = d16(rv::c_li(7, -32));
    assert_eq!(ir.op, Op::CLi);
    assert_eq!(ir.imm, -32);

    let ir = d16(rv::c_lui(7, -1));
    assert_eq!(ir.op, Op::CLui);
    assert_eq!(ir.imm, -1 << 12);
}

#[test]
fn c_lui_rd2_selects_addi16sp() {
    let ir = d16(rv::c_addi16sp(-64));
    assert_eq!(ir.op, Op::CAddi16sp);
    assert_eq!(ir.rd, 2);
    assert_eq!(ir.imm, -64);

    let ir = d16(rv::c_addi16sp(496));
    assert_eq!(ir.imm, 496);
}

#[test]
fn c_addi4spn_maps_prime_register() {
    let ir = d16(rv::c_addi4spn(10, 40));
    assert_eq!(ir.op, Op::CAddi4spn);
    assert_eq!(ir.rd, 10);
    assert_eq!(ir.imm, 40);
}

#[test]
fn c_addi4spn_zero_is_reserved() {
    assert!(decode(u32::from(rv::c_addi4spn(10, 0)), 0).is_none());
}

#[test]
fn c_lw_c_sw_offsets() {
    let ir = d16(rv::c_lw(8, 9, 0x7c));
    assert_eq!(ir.op, Op::CLw);
    assert_eq!((ir.rd, ir.rs1), (8, 9));
    assert_eq!(ir.imm, 0x7c);

    let ir = d16(rv::c_sw(15, 14, 64));
    assert_eq!(ir.op, Op::CSw);
    assert_eq!((ir.rs1, ir.rs2), (15, 14));
    assert_eq!(ir.imm, 64);
}

#[test]
fn c_jumps_and_branches() {
    let ir = d16(rv::c_jal(-100));
    assert_eq!(ir.op, Op::CJal);
    assert_eq!(ir.imm, -100);

    let ir = d16(rv::c_j(2046));
    assert_eq!(ir.op, Op::CJ);
    assert_eq!(ir.imm, 2046);

    let ir = d16(rv::c_beqz(12, -256));
    assert_eq!(ir.op, Op::CBeqz);
    assert_eq!(ir.rs1, 12);
    assert_eq!(ir.imm, -256);

    let ir = d16(rv::c_bnez(8, 254));
    assert_eq!(ir.op, Op::CBnez);
    assert_eq!(ir.imm, 254);
}

#[test]
fn c_register_jumps() {
    let ir = d16(rv::c_jr(1));
    assert_eq!(ir.op, Op::CJr);
    assert_eq!(ir.rs1, 1);
    assert!(ir.history.is_some());

    let ir = d16(rv::c_jalr(5));
    assert_eq!(ir.op, Op::CJalr);
    assert_eq!(ir.rs1, 5);

    assert_eq!(d16(rv::c_ebreak()).op, Op::CEbreak);
}

#[test]
fn c_jr_x0_is_reserved() {
    assert!(decode(u32::from(rv::c_jr(0)), 0).is_none());
}

#[test]
fn c_alu_group() {
    assert_eq!(d16(rv::c_sub(8, 9)).op, Op::CSub);
    assert_eq!(d16(rv::c_xor(8, 9)).op, Op::CXor);
    assert_eq!(d16(rv::c_or(8, 9)).op, Op::COr);
    assert_eq!(d16(rv::c_and(8, 9)).op, Op::CAnd);
    let ir = d16(rv::c_and(10, 12));
    assert_eq!((ir.rd, ir.rs1, ir.rs2), (10, 10, 12));
}

#[test]
fn c_shifts_and_andi() {
    let ir = d16(rv::c_srli(9, 7));
    assert_eq!(ir.op, Op::CSrli);
    assert_eq!(ir.imm, 7);

    let ir = d16(rv::c_srai(9, 31));
    assert_eq!(ir.op, Op::CSrai);

    let ir = d16(rv::c_andi(9, -5));
    assert_eq!(ir.op, Op::CAndi);
    assert_eq!(ir.imm, -5);

    let ir = d16(rv::c_slli(3, 12));
    assert_eq!(ir.op, Op::CSlli);
    assert_eq!(ir.rd, 3);
    assert_eq!(ir.imm, 12);
}

#[test]
fn c_stack_loads_and_stores() {
    let ir = d16(rv::c_lwsp(4, 0xfc));
    assert_eq!(ir.op, Op::CLwsp);
    assert_eq!(ir.rd, 4);
    assert_eq!(ir.rs1, 2);
    assert_eq!(ir.imm, 0xfc);

    let ir = d16(rv::c_swsp(8, 0xc8));
    assert_eq!(ir.op, Op::CSwsp);
    assert_eq!(ir.rs2, 8);
    assert_eq!(ir.imm, 0xc8);
}

#[test]
fn hints_normalise_to_nop() {
    assert_eq!(d16(rv::c_nop()).op, Op::CNop);
    // C.ADDI with rd == 0 and a non-zero immediate.
    assert_eq!(d16(rv::c_addi(0, 5)).op, Op::CNop);
    // C.MV with rd == 0.
    assert_eq!(d16(rv::c_mv(0, 5)).op, Op::CNop);
    // C.SLLI with shamt == 0.
    assert_eq!(d16(rv::c_slli(3, 0)).op, Op::CNop);
}

#[test]
fn rv64_code_points_are_reserved() {
    // C.SRLI/C.SRAI/C.SLLI with shamt[5] set.
    let srli64 = rv::c_srli(9, 0) | (1 << 12);
    assert!(decode(u32::from(srli64), 0).is_none());
    let slli64 = rv::c_slli(3, 0) | (1 << 12);
    assert!(decode(u32::from(slli64), 0).is_none());
    // C.SUBW (bit 12 set in the ALU group).
    let subw = rv::c_sub(8, 9) | (1 << 12);
    assert!(decode(u32::from(subw), 0).is_none());
}
