//! aarch64 assembler backend.
//!
//! Implements the same emitter surface as the x86-64 backend; the
//! x86-flavoured ALU selector constants are mapped onto A64 encodings here,
//! so the per-opcode emitters stay backend-agnostic. Encodings follow the
//! Arm Architecture Reference Manual for A-profile (C4.1).

use super::{Jump, JumpTarget, JitState, Size, cc};

/// Physical register ids and the allocation sets for this backend.
pub(crate) mod reg {
    pub const R0: u8 = 0;
    pub const R1: u8 = 1;
    pub const R5: u8 = 5;
    pub const R6: u8 = 6;
    pub const R7: u8 = 7;
    pub const R8: u8 = 8;
    pub const R9: u8 = 9;
    pub const R10: u8 = 10;
    pub const R11: u8 = 11;
    pub const R12: u8 = 12;
    pub const R13: u8 = 13;
    pub const R14: u8 = 14;
    pub const R15: u8 = 15;
    pub const R16: u8 = 16;
    pub const R17: u8 = 17;
    pub const R19: u8 = 19;
    pub const R20: u8 = 20;
    pub const R21: u8 = 21;
    pub const R22: u8 = 22;
    pub const R23: u8 = 23;
    pub const R24: u8 = 24;
    pub const R25: u8 = 25;
    pub const R26: u8 = 26;
    pub const R29: u8 = 29;
    pub const R30: u8 = 30;
    pub const SP: u8 = 31;
    pub const RZ: u8 = 31;

    /// Registers handed to the allocator. R18 is the platform register on
    /// Apple and Windows and must not be used; R10/R24/R25 are internal
    /// scratch.
    pub const ALLOCATABLE: [u8; 12] = [
        R5, R6, R7, R9, R11, R12, R13, R14, R15, R16, R17, R26,
    ];
    /// Scratch register used by multi-step sequences.
    pub const TEMP: u8 = R8;
    /// Pinned hart pointer (first AAPCS64 argument).
    pub const PARAM0: u8 = R0;
    /// Second argument (the fragment entry); scratch after the branch.
    pub const PARAM1: u8 = R1;
    /// Callee-saved registers preserved by the prologue; kept an even count
    /// for pairwise store/load.
    pub const CALLEE: [u8; 8] = [R19, R20, R21, R22, R23, R24, R25, R26];
    /// Scratch for immediate synthesis.
    pub const TEMP_IMM: u8 = R24;
    /// Scratch for remainder computation.
    pub const TEMP_DIV: u8 = R25;
}

use reg::{R10, R30, RZ, SP};

/// Stack frame reserved by the prologue for generated code, plus the
/// callee-saved register area and the frame record.
const STACK_SIZE: u32 = 512;
const FRAME_SIZE: u32 = (STACK_SIZE + reg::CALLEE.len() as u32 * 8 + 2 * 8).next_multiple_of(16);

/// Add/subtract opcodes (bits 30:29).
const AS_ADD: u32 = 0;
const AS_SUB: u32 = 2;
const AS_SUBS: u32 = 3;

/// Logical (shifted register) opcodes.
const LOG_AND: u32 = 0x0000_0000;
const LOG_ORR: u32 = 0x2000_0000;
const LOG_EOR: u32 = 0x4000_0000;

/// Load/store (unscaled immediate) opcodes.
const LS_STRB: u32 = 0x0000_0000;
const LS_LDRB: u32 = 0x0040_0000;
const LS_LDRSBW: u32 = 0x00c0_0000;
const LS_STRH: u32 = 0x4000_0000;
const LS_LDRH: u32 = 0x4040_0000;
const LS_LDRSHW: u32 = 0x40c0_0000;
const LS_STRW: u32 = 0x8000_0000;
const LS_LDRW: u32 = 0x8040_0000;
const LS_LDRSW: u32 = 0x8080_0000;
const LS_STRX: u32 = 0xc000_0000;
const LS_LDRX: u32 = 0xc040_0000;

/// Load/store pair opcodes.
const LSP_STPX: u32 = 0xa900_0000;
const LSP_LDPX: u32 = 0xa940_0000;

/// Unconditional branch (register) opcodes.
const BR_BR: u32 = 0xd61f_0000;
const BR_BLR: u32 = 0xd63f_0000;
const BR_RET: u32 = 0xd65f_0000;

/// Unconditional branch (immediate).
const UBR_B: u32 = 0x1400_0000;
/// Conditional branch (immediate).
const BR_BCOND: u32 = 0x5400_0000;

/// Data-processing (2 source) opcodes.
const DP2_UDIV: u32 = 0x1ac0_0800;
const DP2_SDIV: u32 = 0x1ac0_0c00;
const DP2_LSLV: u32 = 0x1ac0_2000;
const DP2_LSRV: u32 = 0x1ac0_2400;
const DP2_ASRV: u32 = 0x1ac0_2800;

/// Data-processing (3 source) opcodes.
const DP3_MADD: u32 = 0x1b00_0000;
const DP3_MSUB: u32 = 0x1b00_8000;

/// Move wide (immediate) opcodes.
const MW_MOVN: u32 = 0x1280_0000;
const MW_MOVZ: u32 = 0x5280_0000;
const MW_MOVK: u32 = 0x7280_0000;

/// A64 condition fields.
const COND_EQ: u32 = 0;
const COND_NE: u32 = 1;
const COND_HS: u32 = 2;
const COND_LO: u32 = 3;
const COND_GE: u32 = 10;
const COND_LT: u32 = 11;
const COND_AL: u32 = 14;

/// Size bit (bit 31) of most instruction encodings.
#[inline]
const fn sz(is64: bool) -> u32 {
    (is64 as u32) << 31
}

impl JitState {
    #[inline]
    fn emit_a64(&mut self, insn: u32) {
        self.emit4(insn);
    }

    /// [ARM-A] C4.1.64: Add/subtract (immediate).
    fn emit_addsub_imm(&mut self, is64: bool, op: u32, rd: u8, rn: u8, imm12: u32) {
        let base = 0x1100_0000;
        self.emit_a64(
            sz(is64) | (op << 29) | base | (imm12 << 10) | (u32::from(rn) << 5) | u32::from(rd),
        );
        self.set_dirty(rd, true);
    }

    /// [ARM-A] C4.1.67: Logical (shifted register).
    fn emit_logical_register(&mut self, is64: bool, op: u32, rd: u8, rn: u8, rm: u8) {
        self.emit_a64(
            sz(is64) | op | (1 << 27) | (1 << 25) | (u32::from(rm) << 16) | (u32::from(rn) << 5)
                | u32::from(rd),
        );
        self.set_dirty(rd, true);
    }

    /// [ARM-A] C4.1.67: Add/subtract (shifted register).
    fn emit_addsub_register(&mut self, is64: bool, op: u32, rd: u8, rn: u8, rm: u8) {
        let base = 0x0b00_0000;
        self.emit_a64(
            sz(is64) | (op << 29) | base | (u32::from(rm) << 16) | (u32::from(rn) << 5)
                | u32::from(rd),
        );
        self.set_dirty(rd, true);
    }

    /// [ARM-A] C4.1.64: Move wide (immediate). Chooses MOVZ or MOVN plus a
    /// minimal train of MOVKs by whichever 16-bit pattern dominates.
    fn emit_movewide_imm(&mut self, is64: bool, rd: u8, imm: u64) {
        let halves: u32 = if is64 { 4 } else { 2 };
        let mut count0000: u32 = if is64 { 0 } else { 2 };
        let mut countffff: u32 = 0;
        for i in 0..halves {
            let block = (imm >> (i * 16)) & 0xffff;
            if block == 0xffff {
                countffff += 1;
            } else if block == 0 {
                count0000 += 1;
            }
        }

        let mut invert = count0000 < countffff;
        let mut op = if invert { MW_MOVN } else { MW_MOVZ };
        let skip_pattern: u64 = if invert { 0xffff } else { 0 };
        for i in 0..halves {
            let mut imm16 = (imm >> (i * 16)) & 0xffff;
            if imm16 != skip_pattern {
                if invert {
                    imm16 = !imm16 & 0xffff;
                }
                self.emit_a64(
                    sz(is64) | op | (i << 21) | ((imm16 as u32) << 5) | u32::from(rd),
                );
                op = MW_MOVK;
                invert = false;
            }
        }
        if op != MW_MOVK {
            self.emit_a64(sz(is64) | op | u32::from(rd));
        }
        self.set_dirty(rd, true);
    }

    /// [ARM-A] C4.1.66: Load/store register (unscaled immediate).
    fn emit_loadstore_imm(&mut self, op: u32, rt: u8, rn: u8, imm9: i32) {
        let base = 0x3800_0000;
        debug_assert!((-256..256).contains(&imm9));
        let imm9 = (imm9 & 0x1ff) as u32;
        self.emit_a64(base | op | (imm9 << 12) | (u32::from(rn) << 5) | u32::from(rt));
    }

    /// [ARM-A] C4.1.66: Load/store register pair (offset).
    fn emit_loadstorepair_imm(&mut self, op: u32, rt: u8, rt2: u8, rn: u8, imm7: i32) {
        debug_assert!(imm7 % 8 == 0);
        let imm7 = ((imm7 / 8) & 0x7f) as u32;
        self.emit_a64(
            op | (imm7 << 15) | (u32::from(rt2) << 10) | (u32::from(rn) << 5) | u32::from(rt),
        );
    }

    /// [ARM-A] C4.1.65: Unconditional branch (register).
    fn emit_uncond_branch_reg(&mut self, op: u32, rn: u8) {
        self.emit_a64(op | (u32::from(rn) << 5));
    }

    /// [ARM-A] C4.1.67: Data-processing (2 source).
    fn emit_dataproc_2source(&mut self, is64: bool, op: u32, rd: u8, rn: u8, rm: u8) {
        self.emit_a64(sz(is64) | op | (u32::from(rm) << 16) | (u32::from(rn) << 5) | u32::from(rd));
        self.set_dirty(rd, true);
    }

    /// [ARM-A] C4.1.67: Data-processing (3 source).
    fn emit_dataproc_3source(&mut self, is64: bool, op: u32, rd: u8, rn: u8, rm: u8, ra: u8) {
        self.emit_a64(
            sz(is64) | op | (u32::from(rm) << 16) | (u32::from(ra) << 10) | (u32::from(rn) << 5)
                | u32::from(rd),
        );
        self.set_dirty(rd, true);
    }

    /// 32-bit ALU operation using the shared x86-flavoured selectors.
    pub(crate) fn emit_alu32(&mut self, op: u8, src: u8, dst: u8) {
        match op {
            0x01 => self.emit_addsub_register(false, AS_ADD, dst, dst, src),
            0x29 => self.emit_addsub_register(false, AS_SUB, dst, dst, src),
            0x31 => self.emit_logical_register(false, LOG_EOR, dst, dst, src),
            0x09 => self.emit_logical_register(false, LOG_ORR, dst, dst, src),
            0x21 => self.emit_logical_register(false, LOG_AND, dst, dst, src),
            0xd3 => {
                // Shift group: the amount is staged in the scratch register
                // by the emitter convention.
                let amount = Self::temp_reg();
                match src {
                    4 => self.emit_dataproc_2source(false, DP2_LSLV, dst, dst, amount),
                    5 => self.emit_dataproc_2source(false, DP2_LSRV, dst, dst, amount),
                    _ => self.emit_dataproc_2source(false, DP2_ASRV, dst, dst, amount),
                }
            }
            _ => unreachable!("unmapped ALU selector {op:#x}"),
        }
        self.set_dirty(dst, true);
    }

    /// 32-bit ALU operation with a 32-bit immediate staged through R10.
    pub(crate) fn emit_alu32_imm32(&mut self, _op: u8, ext: u8, dst: u8, imm: i32) {
        self.emit_load_imm(R10, imm as u32);
        match ext {
            0 => self.emit_addsub_register(false, AS_ADD, dst, dst, R10),
            1 => self.emit_logical_register(false, LOG_ORR, dst, dst, R10),
            4 => self.emit_logical_register(false, LOG_AND, dst, dst, R10),
            6 => self.emit_logical_register(false, LOG_EOR, dst, dst, R10),
            _ => unreachable!("unmapped ALU-imm selector {ext:#x}"),
        }
        self.set_dirty(dst, true);
    }

    /// 32-bit shift with an immediate amount staged through R10.
    pub(crate) fn emit_alu32_imm8(&mut self, _op: u8, ext: u8, dst: u8, imm: u8) {
        self.emit_load_imm(R10, u32::from(imm));
        match ext {
            4 => self.emit_dataproc_2source(false, DP2_LSLV, dst, dst, R10),
            5 => self.emit_dataproc_2source(false, DP2_LSRV, dst, dst, R10),
            _ => self.emit_dataproc_2source(false, DP2_ASRV, dst, dst, R10),
        }
        self.set_dirty(dst, true);
    }

    /// 64-bit ALU operation; only the add selector is used cross-backend.
    pub(crate) fn emit_alu64(&mut self, op: u8, src: u8, dst: u8) {
        if op == 0x01 {
            self.emit_addsub_register(true, AS_ADD, dst, dst, src);
        }
    }

    /// 64-bit shift-right / add with an immediate (the widening multiply
    /// high-half extraction).
    pub(crate) fn emit_alu64_imm8(&mut self, op: u8, ext: u8, dst: u8, imm: u8) {
        if op == 0xc1 {
            self.emit_load_imm(R10, u32::from(imm));
            self.emit_dataproc_2source(true, DP2_LSRV, dst, dst, R10);
        } else if ext == 0 {
            self.emit_load_imm(R10, u32::from(imm));
            self.emit_addsub_register(true, AS_ADD, dst, dst, R10);
        }
    }

    /// Register-to-register move preserving all 64 bits.
    pub(crate) fn emit_mov(&mut self, src: u8, dst: u8) {
        self.emit_logical_register(true, LOG_ORR, dst, RZ, src);
        self.set_dirty(dst, true);
    }

    /// Sign-extends the low 32 bits of `reg` in place (`SBFM xd, xn, #0, #31`).
    pub(crate) fn emit_sxtw(&mut self, r: u8) {
        self.emit_a64(0x9340_7c00 | (u32::from(r) << 5) | u32::from(r));
    }

    pub(crate) fn emit_cmp32(&mut self, src: u8, dst: u8) {
        self.emit_addsub_register(false, AS_SUBS, RZ, dst, src);
    }

    pub(crate) fn emit_cmp_imm32(&mut self, dst: u8, imm: i32) {
        self.emit_load_imm(R10, imm as u32);
        self.emit_addsub_register(false, AS_SUBS, RZ, dst, R10);
    }

    /// 64-bit compare against a small immediate (pointer null checks).
    pub(crate) fn emit_cmp64_imm8(&mut self, dst: u8, imm: u8) {
        self.emit_movewide_imm(true, R10, u64::from(imm));
        self.emit_addsub_register(true, AS_SUBS, RZ, dst, R10);
    }

    /// 64-bit add of a 32-bit immediate staged through R10.
    pub(crate) fn emit_add64_imm(&mut self, dst: u8, imm: u32) {
        self.emit_load_imm(R10, imm);
        self.emit_addsub_register(true, AS_ADD, dst, dst, R10);
    }

    /// Emits a conditional branch placeholder and returns the location of
    /// the instruction for later patching.
    pub(crate) fn emit_jcc_offset(&mut self, code: u8) -> u32 {
        let cond = match code {
            cc::JE => COND_EQ,
            cc::JNE => COND_NE,
            cc::JL => COND_LT,
            cc::JGE => COND_GE,
            cc::JB => COND_LO,
            cc::JAE => COND_HS,
            cc::JMP => COND_AL,
            _ => unreachable!("unmapped condition {code:#x}"),
        };
        let loc = self.offset;
        self.emit_a64(BR_BCOND | cond);
        loc
    }

    /// Emits a branch to the fragment translated for guest `(pc, satp)`.
    pub(crate) fn emit_jmp(&mut self, target_pc: u32, target_satp: u32) {
        let loc = self.offset;
        self.jumps.push(Jump {
            patch_loc: loc,
            target: JumpTarget::Pc(target_pc, target_satp),
        });
        self.emit_a64(UBR_B);
    }

    /// Emits a branch to the shared epilogue.
    pub(crate) fn emit_exit(&mut self) {
        let loc = self.offset;
        self.jumps.push(Jump {
            patch_loc: loc,
            target: JumpTarget::Exit,
        });
        self.emit_a64(UBR_B);
    }

    /// Loads a 32-bit immediate (zero-extended to the full register).
    pub(crate) fn emit_load_imm(&mut self, dst: u8, imm: u32) {
        self.emit_movewide_imm(true, dst, u64::from(imm));
    }

    /// Loads a sign-extended 64-bit immediate.
    pub(crate) fn emit_load_imm_sext(&mut self, dst: u8, imm: i64) {
        if i64::from(imm as i32) == imm {
            self.emit_movewide_imm(false, dst, imm as u64);
        } else {
            self.emit_movewide_imm(true, dst, imm as u64);
        }
    }

    /// Loads `[src + offset]` into `dst`. A destination currently bound to
    /// guest `x0` materialises zero instead.
    pub(crate) fn emit_load(&mut self, size: Size, src: u8, dst: u8, offset: i32) {
        if self.host_is_x0(dst) {
            self.emit_load_imm(dst, 0);
            return;
        }
        let op = match size {
            Size::S8 => LS_LDRB,
            Size::S16 => LS_LDRH,
            Size::S32 => LS_LDRW,
            Size::S64 => LS_LDRX,
        };
        self.emit_loadstore_imm(op, dst, src, offset);
        self.set_dirty(dst, offset == 0);
    }

    /// Loads `[src + offset]` into `dst` with sign extension.
    pub(crate) fn emit_load_sext(&mut self, size: Size, src: u8, dst: u8, offset: i32) {
        if self.host_is_x0(dst) {
            self.emit_load_imm(dst, 0);
            return;
        }
        let op = match size {
            Size::S8 => LS_LDRSBW,
            Size::S16 => LS_LDRSHW,
            _ => LS_LDRSW,
        };
        self.emit_loadstore_imm(op, dst, src, offset);
        self.set_dirty(dst, offset == 0);
    }

    /// Stores `src` to `[dst + offset]`. A source bound to guest `x0`
    /// stores the zero register instead.
    pub(crate) fn emit_store(&mut self, size: Size, src: u8, dst: u8, offset: i32) {
        let src = if self.host_is_x0(src) {
            self.set_dirty(src, false);
            RZ
        } else {
            src
        };
        let op = match size {
            Size::S8 => LS_STRB,
            Size::S16 => LS_STRH,
            Size::S32 => LS_STRW,
            Size::S64 => LS_STRX,
        };
        self.emit_loadstore_imm(op, src, dst, offset);
        if offset != 0 {
            self.set_dirty(src, false);
        }
    }

    /// Returns whether physical register `r` currently holds guest `x0`.
    fn host_is_x0(&self, r: u8) -> bool {
        self.reg_map
            .iter()
            .any(|entry| entry.reg == r && entry.vm == 0)
    }

    /// Calls an absolute host address, preserving the link register.
    pub(crate) fn emit_call(&mut self, target: usize) {
        self.emit_addsub_imm(true, AS_SUB, SP, SP, 16);
        self.emit_loadstore_imm(LS_STRX, R30, SP, 0);

        self.emit_movewide_imm(true, reg::TEMP_IMM, target as u64);
        self.emit_uncond_branch_reg(BR_BLR, reg::TEMP_IMM);

        // The return value lands in R0 (the hart pointer slot); stash it in
        // the first allocatable register for call-result consumers.
        self.save_reg(0);
        self.unmap_vm_reg(0);
        self.emit_logical_register(true, LOG_ORR, reg::R5, RZ, reg::R0);

        self.emit_loadstore_imm(LS_LDRX, R30, SP, 0);
        self.emit_addsub_imm(true, AS_ADD, SP, SP, 16);
    }

    /// Calls through a register, preserving the link register.
    pub(crate) fn emit_call_reg(&mut self, r: u8) {
        self.emit_addsub_imm(true, AS_SUB, SP, SP, 16);
        self.emit_loadstore_imm(LS_STRX, R30, SP, 0);
        self.emit_uncond_branch_reg(BR_BLR, r);
        self.emit_loadstore_imm(LS_LDRX, R30, SP, 0);
        self.emit_addsub_imm(true, AS_ADD, SP, SP, 16);
    }

    /// `CSEL rd, rn, rm, cond`.
    fn emit_conditional_move(&mut self, rd: u8, rn: u8, rm: u8, cond: u32) {
        self.emit_a64(
            0x1a80_0000 | (u32::from(rm) << 16) | (cond << 12) | (u32::from(rn) << 5)
                | u32::from(rd),
        );
        self.set_dirty(rd, true);
    }

    /// Divide/remainder with the RISC-V zero-divisor and overflow results
    /// synthesized through conditional selects.
    fn divmod(&mut self, md: bool, rd: u8, rn: u8, rm: u8, sign: bool) {
        let div_dest = if md { reg::TEMP_DIV } else { rd };

        if sign {
            self.emit_cmp_imm32(rd, i32::MIN);
        }
        self.emit_dataproc_2source(false, if sign { DP2_SDIV } else { DP2_UDIV }, div_dest, rn, rm);
        if md {
            self.emit_dataproc_3source(false, DP3_MSUB, rd, rm, div_dest, rn);
        }

        if sign {
            let loc = self.emit_jcc_offset(cc::JNE);
            self.emit_cmp_imm32(rm, -1);
            if md {
                self.emit_load_imm(R10, 0);
            } else {
                self.emit_load_imm(R10, 0x8000_0000);
            }
            self.emit_conditional_move(rd, R10, rd, COND_EQ);
            let here = self.offset;
            self.add_jump_to_offset(loc, here);
        }
        if !md {
            // Zero divisor: quotient becomes all-ones.
            self.emit_cmp_imm32(rm, 0);
            self.emit_load_imm(Self::temp_reg(), u32::MAX);
            self.emit_conditional_move(rd, Self::temp_reg(), rd, COND_EQ);
        }
    }

    /// Multiply/divide/remainder using the shared selector constants.
    pub(crate) fn muldivmod(&mut self, opcode: u8, src: u8, dst: u8, sign: bool) {
        match opcode {
            0x28 => self.emit_dataproc_3source(false, DP3_MADD, dst, dst, src, RZ),
            0x2f => self.emit_dataproc_3source(true, DP3_MADD, dst, dst, src, RZ),
            0x38 => self.divmod(false, dst, dst, src, sign),
            0x98 => self.divmod(true, dst, dst, src, sign),
            _ => unreachable!("unmapped muldivmod selector {opcode:#x}"),
        }
    }

    /// Emits the shared prologue and epilogue.
    pub(crate) fn prepare_translate(&mut self) {
        self.emit_addsub_imm(true, AS_SUB, SP, SP, FRAME_SIZE);
        self.emit_loadstorepair_imm(LSP_STPX, reg::R29, R30, SP, 0);
        self.emit_addsub_imm(true, AS_ADD, reg::R29, SP, 0);
        for i in (0..reg::CALLEE.len()).step_by(2) {
            self.emit_loadstorepair_imm(
                LSP_STPX,
                reg::CALLEE[i],
                reg::CALLEE[i + 1],
                SP,
                ((i + 2) * 8) as i32,
            );
        }
        self.emit_uncond_branch_reg(BR_BR, reg::PARAM1);

        self.exit_loc = self.offset;
        for i in (0..reg::CALLEE.len()).step_by(2) {
            self.emit_loadstorepair_imm(
                LSP_LDPX,
                reg::CALLEE[i],
                reg::CALLEE[i + 1],
                SP,
                ((i + 2) * 8) as i32,
            );
        }
        self.emit_loadstorepair_imm(LSP_LDPX, reg::R29, R30, SP, 0);
        self.emit_addsub_imm(true, AS_ADD, SP, SP, FRAME_SIZE);
        self.emit_uncond_branch_reg(BR_RET, R30);
        self.org_size = self.offset;
    }

    /// Tier-2 function prologue: frame record plus `frame` bytes including
    /// the value-slot area above it.
    pub(crate) fn emit_t2_prologue(&mut self, frame: u32) {
        self.emit_addsub_imm(true, AS_SUB, SP, SP, frame);
        self.emit_loadstorepair_imm(LSP_STPX, reg::R29, R30, SP, 0);
        self.emit_addsub_imm(true, AS_ADD, reg::R29, SP, 0);
    }

    /// Tier-2 function epilogue, emitted at every trace exit.
    pub(crate) fn emit_t2_epilogue(&mut self) {
        self.emit_loadstorepair_imm(LSP_LDPX, reg::R29, R30, SP, 0);
        let frame = self.t2_frame;
        self.emit_addsub_imm(true, AS_ADD, SP, SP, frame);
        self.emit_uncond_branch_reg(BR_RET, R30);
    }

    /// Loads tier-2 value slot `slot` into `dst` (scaled 32-bit form).
    pub(crate) fn emit_frame_load(&mut self, slot: u32, dst: u8) {
        let imm12 = (16 + slot * 4) / 4;
        self.emit_a64(0xb940_0000 | (imm12 << 10) | (u32::from(reg::R29) << 5) | u32::from(dst));
    }

    /// Stores `src` into tier-2 value slot `slot` (scaled 32-bit form).
    pub(crate) fn emit_frame_store(&mut self, slot: u32, src: u8) {
        let imm12 = (16 + slot * 4) / 4;
        self.emit_a64(0xb900_0000 | (imm12 << 10) | (u32::from(reg::R29) << 5) | u32::from(src));
    }

    /// Frame bytes needed for `n` tier-2 value slots.
    pub(crate) const fn t2_frame_size(n: u32) -> u32 {
        (16 + n * 4).next_multiple_of(16)
    }

    /// Patches the branch instruction at `loc` to land on `target_loc`.
    pub(crate) fn patch_jump(&mut self, loc: u32, target_loc: u32) {
        let rel = (target_loc.wrapping_sub(loc) as i32) >> 2;
        let mut insn = self.code.read_u32(loc);
        if (insn & 0xfe00_0000) == BR_BCOND {
            debug_assert!((-(1 << 18)..(1 << 18)).contains(&rel));
            insn |= ((rel as u32) & 0x7_ffff) << 5;
        } else {
            debug_assert_eq!(insn & 0x7c00_0000, UBR_B);
            debug_assert!((-(1 << 25)..(1 << 25)).contains(&rel));
            insn |= (rel as u32) & 0x03ff_ffff;
        }
        self.code.write(loc, &insn.to_le_bytes());
    }

    /// Fall-through location of an unresolved branch: the next instruction
    /// (the inlined store-PC-and-exit path).
    pub(crate) const fn fallthrough_loc(&self, patch_loc: u32) -> u32 {
        patch_loc + 4
    }
}
