//! RV32 instruction decoder.
//!
//! This module turns raw instruction bits into the IR record the rest of the
//! pipeline consumes. It provides:
//! 1. **Dispatch:** A two-level decode — the low two bits select compressed
//!    vs. uncompressed, then bits 6:2 index the format handler.
//! 2. **Immediates:** Bit-exact reconstruction for the I, S, B, U and J
//!    formats (the compressed formats live in [`crate::isa::rvc`]).
//! 3. **Canonicalisation:** Hints and x0-targeted ALU operations decode to
//!    `NOP`; reserved encodings decode to `None`.

use crate::common::{INSN_16, INSN_32};
use crate::isa::insn::{BranchHistory, Insn};
use crate::isa::op::Op;
use crate::isa::rvc;

/// Destination register field (bits 11:7).
#[inline]
const fn rd(insn: u32) -> u8 {
    ((insn >> 7) & 0x1f) as u8
}

/// First source register field (bits 19:15).
#[inline]
const fn rs1(insn: u32) -> u8 {
    ((insn >> 15) & 0x1f) as u8
}

/// Second source register field (bits 24:20).
#[inline]
const fn rs2(insn: u32) -> u8 {
    ((insn >> 20) & 0x1f) as u8
}

/// Third source register field (bits 31:27, R4-type).
#[inline]
const fn rs3(insn: u32) -> u8 {
    ((insn >> 27) & 0x1f) as u8
}

/// funct3 field (bits 14:12).
#[inline]
const fn funct3(insn: u32) -> u32 {
    (insn >> 12) & 0x7
}

/// funct7 field (bits 31:25).
#[inline]
const fn funct7(insn: u32) -> u32 {
    (insn >> 25) & 0x7f
}

/// I-type immediate: `imm[11:0]` in bits 31:20, sign-extended.
#[inline]
const fn imm_i(insn: u32) -> i32 {
    (insn as i32) >> 20
}

/// S-type immediate: `imm[11:5]` in bits 31:25, `imm[4:0]` in bits 11:7.
#[inline]
const fn imm_s(insn: u32) -> i32 {
    (((insn & 0xfe00_0000) as i32) >> 20) | (((insn >> 7) & 0x1f) as i32)
}

/// B-type immediate: `imm[12|10:5]` in bits 31:25, `imm[4:1|11]` in bits 11:7.
#[inline]
const fn imm_b(insn: u32) -> i32 {
    (((insn & 0x8000_0000) as i32) >> 19)
        | (((insn >> 7) & 0x1) << 11) as i32
        | (((insn >> 25) & 0x3f) << 5) as i32
        | (((insn >> 8) & 0xf) << 1) as i32
}

/// U-type immediate: `imm[31:12]` in bits 31:12, low bits zero.
#[inline]
const fn imm_u(insn: u32) -> i32 {
    (insn & 0xffff_f000) as i32
}

/// J-type immediate: `imm[20|10:1|11|19:12]` in bits 31:12.
#[inline]
const fn imm_j(insn: u32) -> i32 {
    (((insn & 0x8000_0000) as i32) >> 11)
        | ((insn & 0x000f_f000) as i32)
        | (((insn >> 20) & 0x1) << 11) as i32
        | (((insn >> 21) & 0x3ff) << 1) as i32
}

/// Decodes one instruction word at `pc` into an IR record.
///
/// For compressed instructions only the low 16 bits of `word` are
/// meaningful. Returns `None` for any reserved or unimplemented encoding;
/// the block builder converts that into an illegal-instruction trap.
pub fn decode(word: u32, pc: u32) -> Option<Insn> {
    let mut ir = Insn::at(pc);
    if word & 0x3 == 0x3 {
        ir.len = INSN_32;
        decode_32(&mut ir, word)?;
    } else {
        ir.len = INSN_16;
        rvc::decode_16(&mut ir, (word & 0xffff) as u16)?;
    }
    if ir.op.is_indirect() {
        ir.history = Some(Box::new(BranchHistory::default()));
    }
    Some(ir)
}

/// Decodes an uncompressed instruction, dispatching on bits 6:2.
fn decode_32(ir: &mut Insn, insn: u32) -> Option<()> {
    match (insn >> 2) & 0x1f {
        0x00 => decode_load(ir, insn),
        0x01 => decode_load_fp(ir, insn),
        0x03 => decode_misc_mem(ir, insn),
        0x04 => decode_op_imm(ir, insn),
        0x05 => {
            // AUIPC
            ir.rd = rd(insn);
            ir.imm = imm_u(insn);
            ir.op = if ir.rd == 0 { Op::Nop } else { Op::Auipc };
            Some(())
        }
        0x08 => decode_store(ir, insn),
        0x09 => decode_store_fp(ir, insn),
        0x0b => decode_amo(ir, insn),
        0x0c => decode_op(ir, insn),
        0x0d => {
            // LUI
            ir.rd = rd(insn);
            ir.imm = imm_u(insn);
            ir.op = if ir.rd == 0 { Op::Nop } else { Op::Lui };
            Some(())
        }
        0x10 | 0x11 | 0x12 | 0x13 => decode_fmadd(ir, insn),
        0x14 => decode_op_fp(ir, insn),
        0x18 => decode_branch(ir, insn),
        0x19 => {
            // JALR
            if funct3(insn) != 0 {
                return None;
            }
            ir.op = Op::Jalr;
            ir.rd = rd(insn);
            ir.rs1 = rs1(insn);
            ir.imm = imm_i(insn);
            Some(())
        }
        0x1b => {
            ir.op = Op::Jal;
            ir.rd = rd(insn);
            ir.imm = imm_j(insn);
            Some(())
        }
        0x1c => decode_system(ir, insn),
        _ => None,
    }
}

fn decode_load(ir: &mut Insn, insn: u32) -> Option<()> {
    ir.rd = rd(insn);
    ir.rs1 = rs1(insn);
    ir.imm = imm_i(insn);
    ir.op = match funct3(insn) {
        0 => Op::Lb,
        1 => Op::Lh,
        2 => Op::Lw,
        4 => Op::Lbu,
        5 => Op::Lhu,
        _ => return None,
    };
    Some(())
}

fn decode_store(ir: &mut Insn, insn: u32) -> Option<()> {
    ir.rs1 = rs1(insn);
    ir.rs2 = rs2(insn);
    ir.imm = imm_s(insn);
    ir.op = match funct3(insn) {
        0 => Op::Sb,
        1 => Op::Sh,
        2 => Op::Sw,
        _ => return None,
    };
    Some(())
}

fn decode_branch(ir: &mut Insn, insn: u32) -> Option<()> {
    ir.rs1 = rs1(insn);
    ir.rs2 = rs2(insn);
    ir.imm = imm_b(insn);
    ir.op = match funct3(insn) {
        0 => Op::Beq,
        1 => Op::Bne,
        4 => Op::Blt,
        5 => Op::Bge,
        6 => Op::Bltu,
        7 => Op::Bgeu,
        _ => return None,
    };
    Some(())
}

fn decode_op_imm(ir: &mut Insn, insn: u32) -> Option<()> {
    ir.rd = rd(insn);
    ir.rs1 = rs1(insn);
    ir.imm = imm_i(insn);
    ir.op = match funct3(insn) {
        0 => Op::Addi,
        1 => {
            // SLLI with shamt[5] set is reserved on RV32.
            if funct7(insn) != 0 {
                return None;
            }
            ir.shamt = rs2(insn);
            ir.imm = i32::from(ir.shamt);
            Op::Slli
        }
        2 => Op::Slti,
        3 => Op::Sltiu,
        4 => Op::Xori,
        5 => {
            ir.shamt = rs2(insn);
            ir.imm = i32::from(ir.shamt);
            match funct7(insn) {
                0x00 => Op::Srli,
                0x20 => Op::Srai,
                _ => return None,
            }
        }
        6 => Op::Ori,
        7 => Op::Andi,
        _ => unreachable!(),
    };
    if ir.rd == 0 {
        ir.op = Op::Nop;
    }
    Some(())
}

fn decode_op(ir: &mut Insn, insn: u32) -> Option<()> {
    ir.rd = rd(insn);
    ir.rs1 = rs1(insn);
    ir.rs2 = rs2(insn);
    ir.op = match (funct7(insn), funct3(insn)) {
        (0x00, 0) => Op::Add,
        (0x20, 0) => Op::Sub,
        (0x00, 1) => Op::Sll,
        (0x00, 2) => Op::Slt,
        (0x00, 3) => Op::Sltu,
        (0x00, 4) => Op::Xor,
        (0x00, 5) => Op::Srl,
        (0x20, 5) => Op::Sra,
        (0x00, 6) => Op::Or,
        (0x00, 7) => Op::And,
        (0x01, 0) => Op::Mul,
        (0x01, 1) => Op::Mulh,
        (0x01, 2) => Op::Mulhsu,
        (0x01, 3) => Op::Mulhu,
        (0x01, 4) => Op::Div,
        (0x01, 5) => Op::Divu,
        (0x01, 6) => Op::Rem,
        (0x01, 7) => Op::Remu,
        _ => return None,
    };
    if ir.rd == 0 {
        ir.op = Op::Nop;
    }
    Some(())
}

fn decode_misc_mem(ir: &mut Insn, insn: u32) -> Option<()> {
    ir.op = match funct3(insn) {
        0 => Op::Fence,
        1 => Op::Fencei,
        _ => return None,
    };
    Some(())
}

fn decode_system(ir: &mut Insn, insn: u32) -> Option<()> {
    ir.rd = rd(insn);
    ir.rs1 = rs1(insn);
    // The CSR address doubles as the SYSTEM discriminator for funct3 == 0.
    ir.imm = ((insn >> 20) & 0xfff) as i32;
    ir.op = match funct3(insn) {
        0 => match insn >> 20 {
            0x000 => Op::Ecall,
            0x001 => Op::Ebreak,
            0x105 => Op::Wfi,
            0x302 => Op::Mret,
            _ => return None,
        },
        1 => Op::Csrrw,
        2 => Op::Csrrs,
        3 => Op::Csrrc,
        5 => Op::Csrrwi,
        6 => Op::Csrrsi,
        7 => Op::Csrrci,
        _ => return None,
    };
    Some(())
}

fn decode_amo(ir: &mut Insn, insn: u32) -> Option<()> {
    if funct3(insn) != 2 {
        return None;
    }
    ir.rd = rd(insn);
    ir.rs1 = rs1(insn);
    ir.rs2 = rs2(insn);
    // funct5 ignores the aq/rl ordering bits.
    ir.op = match funct7(insn) >> 2 {
        0x02 => {
            if ir.rs2 != 0 {
                return None;
            }
            Op::LrW
        }
        0x03 => Op::ScW,
        0x01 => Op::AmoswapW,
        0x00 => Op::AmoaddW,
        0x04 => Op::AmoxorW,
        0x0c => Op::AmoandW,
        0x08 => Op::AmoorW,
        0x10 => Op::AmominW,
        0x14 => Op::AmomaxW,
        0x18 => Op::AmominuW,
        0x1c => Op::AmomaxuW,
        _ => return None,
    };
    Some(())
}

fn decode_load_fp(ir: &mut Insn, insn: u32) -> Option<()> {
    if funct3(insn) != 2 {
        return None;
    }
    ir.op = Op::Flw;
    ir.rd = rd(insn);
    ir.rs1 = rs1(insn);
    ir.imm = imm_i(insn);
    Some(())
}

fn decode_store_fp(ir: &mut Insn, insn: u32) -> Option<()> {
    if funct3(insn) != 2 {
        return None;
    }
    ir.op = Op::Fsw;
    ir.rs1 = rs1(insn);
    ir.rs2 = rs2(insn);
    ir.imm = imm_s(insn);
    Some(())
}

fn decode_fmadd(ir: &mut Insn, insn: u32) -> Option<()> {
    // fmt field (bits 26:25) must select single precision.
    if (insn >> 25) & 0x3 != 0 {
        return None;
    }
    ir.rd = rd(insn);
    ir.rs1 = rs1(insn);
    ir.rs2 = rs2(insn);
    ir.rs3 = rs3(insn);
    ir.op = match (insn >> 2) & 0x1f {
        0x10 => Op::FmaddS,
        0x11 => Op::FmsubS,
        0x12 => Op::FnmsubS,
        0x13 => Op::FnmaddS,
        _ => unreachable!(),
    };
    Some(())
}

fn decode_op_fp(ir: &mut Insn, insn: u32) -> Option<()> {
    ir.rd = rd(insn);
    ir.rs1 = rs1(insn);
    ir.rs2 = rs2(insn);
    let f3 = funct3(insn);
    ir.op = match funct7(insn) {
        0x00 => Op::FaddS,
        0x04 => Op::FsubS,
        0x08 => Op::FmulS,
        0x0c => Op::FdivS,
        0x2c => {
            if ir.rs2 != 0 {
                return None;
            }
            Op::FsqrtS
        }
        0x10 => match f3 {
            0 => Op::FsgnjS,
            1 => Op::FsgnjnS,
            2 => Op::FsgnjxS,
            _ => return None,
        },
        0x14 => match f3 {
            0 => Op::FminS,
            1 => Op::FmaxS,
            _ => return None,
        },
        0x60 => match rs2(insn) {
            0 => Op::FcvtWS,
            1 => Op::FcvtWuS,
            _ => return None,
        },
        0x70 => match (rs2(insn), f3) {
            (0, 0) => Op::FmvXW,
            (0, 1) => Op::FclassS,
            _ => return None,
        },
        0x50 => match f3 {
            0 => Op::FleS,
            1 => Op::FltS,
            2 => Op::FeqS,
            _ => return None,
        },
        0x68 => match rs2(insn) {
            0 => Op::FcvtSW,
            1 => Op::FcvtSWu,
            _ => return None,
        },
        0x78 => {
            if rs2(insn) != 0 || f3 != 0 {
                return None;
            }
            Op::FmvWX
        }
        _ => return None,
    };
    Some(())
}
