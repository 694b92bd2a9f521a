//! Per-opcode tier-1 emitters.
//!
//! One emitter per translatable IR operation, written against the
//! backend-agnostic assembler surface. Emitters obtain host registers from
//! the allocator, stage immediates through the scratch register, and leave
//! every guest-visible effect either in a mapped register (marked dirty) or
//! stored to the hart.
//!
//! Control-flow emitters spill all dirty mappings, then chain directly to
//! the translated successor when one exists; the inlined fallback stores
//! the target PC and takes the shared epilogue.

use crate::core::cpu::Cpu;
use crate::isa::abi::{REG_A7, REG_RA, REG_SP};
use crate::isa::insn::Insn;
use crate::isa::op::Op;

use super::{JitState, Size, cc, offset_of_compressed, offset_of_pc};

impl JitState {
    /// Emits native code for one instruction.
    pub(crate) fn emit_insn(&mut self, cpu: &Cpu, ir: &Insn) {
        let mem_base = cpu.mem.base() as i64;
        match ir.op {
            Op::Nop | Op::CNop | Op::Fence => {}

            Op::Lui | Op::CLui | Op::CLi => {
                let r = self.map_vm_reg(ir.rd);
                self.emit_load_imm(r, ir.imm as u32);
            }
            Op::Auipc => {
                let r = self.map_vm_reg(ir.rd);
                self.emit_load_imm(r, ir.pc.wrapping_add(ir.imm as u32));
            }

            Op::Jal => self.gen_jal(ir, Some(ir.rd).filter(|&r| r != 0), 4),
            Op::CJal => self.gen_jal(ir, Some(REG_RA), 2),
            Op::CJ => self.gen_jal(ir, None, 2),

            Op::Jalr => self.gen_jalr(ir, ir.rd, ir.imm, 4),
            Op::CJr => self.gen_jalr(ir, 0, 0, 2),
            Op::CJalr => self.gen_jalr(ir, REG_RA, 0, 2),

            Op::Beq => self.gen_branch(ir, cc::JE, ir.rs1, ir.rs2),
            Op::Bne => self.gen_branch(ir, cc::JNE, ir.rs1, ir.rs2),
            Op::Blt => self.gen_branch(ir, cc::JL, ir.rs1, ir.rs2),
            Op::Bge => self.gen_branch(ir, cc::JGE, ir.rs1, ir.rs2),
            Op::Bltu => self.gen_branch(ir, cc::JB, ir.rs1, ir.rs2),
            Op::Bgeu => self.gen_branch(ir, cc::JAE, ir.rs1, ir.rs2),
            Op::CBeqz => self.gen_branch(ir, cc::JE, ir.rs1, 0),
            Op::CBnez => self.gen_branch(ir, cc::JNE, ir.rs1, 0),

            Op::Lb => self.gen_load(mem_base, ir.rd, ir.rs1, ir.imm, Size::S8, true),
            Op::Lh => self.gen_load(mem_base, ir.rd, ir.rs1, ir.imm, Size::S16, true),
            Op::Lw => self.gen_load(mem_base, ir.rd, ir.rs1, ir.imm, Size::S32, false),
            Op::Lbu => self.gen_load(mem_base, ir.rd, ir.rs1, ir.imm, Size::S8, false),
            Op::Lhu => self.gen_load(mem_base, ir.rd, ir.rs1, ir.imm, Size::S16, false),
            Op::CLw => self.gen_load(mem_base, ir.rd, ir.rs1, ir.imm, Size::S32, false),
            Op::CLwsp => self.gen_load(mem_base, ir.rd, REG_SP, ir.imm, Size::S32, false),

            Op::Sb => self.gen_store(mem_base, ir.rs1, ir.rs2, ir.imm, Size::S8),
            Op::Sh => self.gen_store(mem_base, ir.rs1, ir.rs2, ir.imm, Size::S16),
            Op::Sw => self.gen_store(mem_base, ir.rs1, ir.rs2, ir.imm, Size::S32),
            Op::CSw => self.gen_store(mem_base, ir.rs1, ir.rs2, ir.imm, Size::S32),
            Op::CSwsp => self.gen_store(mem_base, REG_SP, ir.rs2, ir.imm, Size::S32),

            Op::Addi => self.gen_alu_imm32(ir.rd, ir.rs1, 0, ir.imm),
            Op::CAddi => self.gen_alu_imm32(ir.rd, ir.rd, 0, ir.imm),
            Op::CAddi4spn => self.gen_alu_imm32(ir.rd, REG_SP, 0, ir.imm),
            Op::CAddi16sp => self.gen_alu_imm32(REG_SP, REG_SP, 0, ir.imm),
            Op::Xori => self.gen_alu_imm32(ir.rd, ir.rs1, 6, ir.imm),
            Op::Ori => self.gen_alu_imm32(ir.rd, ir.rs1, 1, ir.imm),
            Op::Andi | Op::CAndi => self.gen_alu_imm32(ir.rd, ir.rs1, 4, ir.imm),

            Op::Slti => self.gen_set_less_imm(ir, cc::JL),
            Op::Sltiu => self.gen_set_less_imm(ir, cc::JB),

            Op::Slli | Op::CSlli => self.gen_shift_imm(ir.rd, ir.rs1, 4, ir.imm),
            Op::Srli | Op::CSrli => self.gen_shift_imm(ir.rd, ir.rs1, 5, ir.imm),
            Op::Srai | Op::CSrai => self.gen_shift_imm(ir.rd, ir.rs1, 7, ir.imm),

            Op::Add | Op::CAdd => self.gen_alu_reg(ir.rd, ir.rs1, ir.rs2, 0x01),
            Op::Sub | Op::CSub => self.gen_alu_reg(ir.rd, ir.rs1, ir.rs2, 0x29),
            Op::Xor | Op::CXor => self.gen_alu_reg(ir.rd, ir.rs1, ir.rs2, 0x31),
            Op::Or | Op::COr => self.gen_alu_reg(ir.rd, ir.rs1, ir.rs2, 0x09),
            Op::And | Op::CAnd => self.gen_alu_reg(ir.rd, ir.rs1, ir.rs2, 0x21),
            Op::Sll => self.gen_shift_reg(ir, 4),
            Op::Srl => self.gen_shift_reg(ir, 5),
            Op::Sra => self.gen_shift_reg(ir, 7),
            Op::Slt => self.gen_set_less(ir, cc::JL),
            Op::Sltu => self.gen_set_less(ir, cc::JB),

            Op::CMv => {
                let r0 = self.ra_load(ir.rs2);
                let r1 = self.map_vm_reg_reserved(ir.rd, r0);
                if r0 != r1 {
                    self.emit_mov(r0, r1);
                }
                self.set_dirty(r1, true);
            }

            Op::Ecall => self.gen_env_call(cpu.on_ecall as usize, ir.pc, ir.len),
            Op::Ebreak | Op::CEbreak => self.gen_env_call(cpu.on_ebreak as usize, ir.pc, ir.len),

            Op::Mul => {
                let (r0, r1) = self.ra_load2(ir.rs1, ir.rs2);
                let r2 = self.map_vm_reg_reserved2(ir.rd, r0, r1);
                let tmp = Self::temp_reg();
                self.emit_mov(r1, tmp);
                self.emit_mov(r0, r2);
                self.muldivmod(0x28, tmp, r2, false);
            }
            Op::Mulh => self.gen_mul_high(ir, true, true),
            Op::Mulhsu => self.gen_mul_high(ir, true, false),
            Op::Mulhu => self.gen_mul_high(ir, false, false),
            Op::Div => self.gen_divrem(ir, 0x38, true),
            Op::Divu => self.gen_divrem(ir, 0x38, false),
            Op::Rem => self.gen_divrem(ir, 0x98, true),
            Op::Remu => self.gen_divrem(ir, 0x98, false),

            Op::FusedLuiRun => {
                for i in 0..ir.fuse.len() {
                    let e = ir.fuse[i];
                    let r = self.map_vm_reg(e.rd);
                    self.emit_load_imm(r, e.imm as u32);
                }
            }
            Op::FusedLuiAdd => {
                let r0 = self.map_vm_reg(ir.rd);
                self.emit_load_imm(r0, ir.imm as u32);
                let tmp = Self::temp_reg();
                self.emit_mov(r0, tmp);
                let r1 = self.ra_load(ir.rs1);
                let r2 = self.map_vm_reg_reserved(ir.rs2, r1);
                self.emit_mov(r1, r2);
                self.emit_alu32(0x01, tmp, r2);
            }
            Op::FusedStoreRun => {
                for i in 0..ir.fuse.len() {
                    let e = ir.fuse[i];
                    let r0 = self.ra_load(e.rs1);
                    let tmp = Self::temp_reg();
                    self.emit_load_imm_sext(tmp, mem_base + i64::from(e.imm));
                    self.emit_alu64(0x01, r0, tmp);
                    let r1 = self.ra_load(e.rs2);
                    self.emit_store(Size::S32, r1, tmp, 0);
                }
            }
            Op::FusedLoadRun => {
                for i in 0..ir.fuse.len() {
                    let e = ir.fuse[i];
                    let r0 = self.ra_load(e.rs1);
                    let tmp = Self::temp_reg();
                    self.emit_load_imm_sext(tmp, mem_base + i64::from(e.imm));
                    self.emit_alu64(0x01, r0, tmp);
                    let r1 = self.map_vm_reg(e.rd);
                    self.emit_load(Size::S32, tmp, r1, 0);
                }
            }
            Op::FusedShiftRun => {
                for i in 0..ir.fuse.len() {
                    let e = ir.fuse[i];
                    let ext = match e.op {
                        Op::Slli => 4,
                        Op::Srli => 5,
                        _ => 7,
                    };
                    self.gen_shift_imm(e.rd, e.rs1, ext, e.imm);
                }
            }
            Op::FusedSyscall => {
                let r = self.map_vm_reg(REG_A7);
                self.emit_load_imm(r, ir.imm as u32);
                self.store_back();
                let tmp = Self::temp_reg();
                self.emit_load_imm(tmp, ir.pc.wrapping_add(4));
                self.emit_store(Size::S32, tmp, Self::param_reg0(), offset_of_pc());
                self.emit_set_compressed(false);
                self.emit_call(cpu.on_ecall as usize);
                self.emit_exit();
            }
            Op::FusedAddiRun => {
                for i in 0..ir.fuse.len() {
                    let e = ir.fuse[i];
                    self.gen_alu_imm32(e.rd, e.rs1, 0, e.imm);
                }
            }
            Op::FusedLoadImm32 => {
                let r = self.map_vm_reg(ir.rd);
                self.emit_load_imm(r, (ir.imm as u32).wrapping_add(ir.imm2 as u32));
            }
            Op::FusedAbsLoad => {
                let r0 = self.map_vm_reg(ir.rd);
                self.emit_load_imm(r0, ir.imm as u32);
                let addr = (ir.imm as u32).wrapping_add(ir.imm2 as u32);
                let tmp = Self::temp_reg();
                self.emit_load_imm_sext(tmp, mem_base + i64::from(addr));
                let r1 = self.map_vm_reg(ir.rs2);
                self.emit_load(Size::S32, tmp, r1, 0);
            }
            Op::FusedAbsStore => {
                let r0 = self.map_vm_reg(ir.rd);
                self.emit_load_imm(r0, ir.imm as u32);
                let addr = (ir.imm as u32).wrapping_add(ir.imm2 as u32);
                let tmp = Self::temp_reg();
                self.emit_load_imm_sext(tmp, mem_base + i64::from(addr));
                let r1 = self.ra_load(ir.rs1);
                self.emit_store(Size::S32, r1, tmp, 0);
            }
            Op::FusedLoadInc => {
                let r0 = self.ra_load(ir.rs1);
                let tmp = Self::temp_reg();
                self.emit_load_imm_sext(tmp, mem_base + i64::from(ir.imm));
                self.emit_alu64(0x01, r0, tmp);
                let r1 = self.map_vm_reg_reserved(ir.rd, r0);
                self.emit_load(Size::S32, tmp, r1, 0);
                self.emit_alu32_imm32(0x81, 0, r0, ir.imm2);
            }
            Op::FusedAddBranch => {
                let r0 = self.ra_load(ir.rs1);
                let r1 = self.map_vm_reg_reserved(ir.rd, r0);
                if r0 != r1 {
                    self.emit_mov(r0, r1);
                }
                self.emit_alu32_imm32(0x81, 0, r1, ir.imm);
                self.emit_cmp_imm32(r1, 0);
                self.store_back();
                let taken = ir.pc.wrapping_add(4).wrapping_add(ir.imm2 as u32);
                let untaken = ir.pc.wrapping_add(8);
                let loc = self.emit_jcc_offset(cc::JNE);
                if ir.branch_untaken.is_some() {
                    self.emit_jmp(untaken, 0);
                }
                self.gen_store_pc_exit(untaken);
                let here = self.offset;
                self.add_jump_to_offset(loc, here);
                if ir.branch_taken.is_some() {
                    self.emit_jmp(taken, 0);
                }
                self.gen_store_pc_exit(taken);
            }

            // Untranslatable tags never reach the translator.
            _ => unreachable!("untranslatable operation reached the tier-1 emitter"),
        }
    }

    /// Stores an immediate target PC and takes the shared epilogue.
    fn gen_store_pc_exit(&mut self, target: u32) {
        let tmp = Self::temp_reg();
        self.emit_load_imm(tmp, target);
        self.emit_store(Size::S32, tmp, Self::param_reg0(), offset_of_pc());
        self.emit_exit();
    }

    /// Direct jump with optional link register write.
    fn gen_jal(&mut self, ir: &Insn, link: Option<u8>, len: u32) {
        if let Some(rd) = link {
            let r = self.map_vm_reg(rd);
            self.emit_load_imm(r, ir.pc.wrapping_add(len));
        }
        self.store_back();
        let target = ir.pc.wrapping_add(ir.imm as u32);
        if ir.branch_taken.is_some() {
            self.emit_jmp(target, 0);
        }
        self.gen_store_pc_exit(target);
    }

    /// Indirect jump: compute the target, write the link, consult the
    /// branch-history table for a guarded direct chain, and exit.
    fn gen_jalr(&mut self, ir: &Insn, link: u8, imm: i32, len: u32) {
        let r0 = self.ra_load(ir.rs1);
        let tmp = Self::temp_reg();
        self.emit_mov(r0, tmp);
        if imm != 0 {
            self.emit_alu32_imm32(0x81, 0, tmp, imm);
        }
        self.emit_alu32_imm32(0x81, 4, tmp, !1);
        if link != 0 {
            let r1 = self.map_vm_reg(link);
            self.emit_load_imm(r1, ir.pc.wrapping_add(len));
        }
        self.store_back();

        // Inline the dominant observed target as a guarded direct jump.
        if let Some(h) = ir.history.as_ref()
            && let Some((target, count)) = h.dominant()
            && count >= self.in_jump_threshold
        {
            self.save_reg(0);
            self.unmap_vm_reg(0);
            let guard = self.reg_map[0].reg;
            self.emit_load_imm(guard, target);
            self.emit_cmp32(tmp, guard);
            let loc = self.emit_jcc_offset(cc::JNE);
            self.emit_jmp(target, 0);
            let here = self.offset;
            self.add_jump_to_offset(loc, here);
        }

        self.emit_store(Size::S32, tmp, Self::param_reg0(), offset_of_pc());
        self.emit_exit();
    }

    /// Conditional branch: compare, then chain both edges.
    fn gen_branch(&mut self, ir: &Insn, code: u8, rs1: u8, rs2: u8) {
        let (r0, r1) = self.ra_load2(rs1, rs2);
        self.emit_cmp32(r1, r0);
        self.store_back();
        let satp = 0;
        let taken = ir.pc.wrapping_add(ir.imm as u32);
        let untaken = ir.pc.wrapping_add(u32::from(ir.len));

        let loc = self.emit_jcc_offset(code);
        if ir.branch_untaken.is_some() {
            self.emit_jmp(untaken, satp);
        }
        self.gen_store_pc_exit(untaken);
        let here = self.offset;
        self.add_jump_to_offset(loc, here);
        if ir.branch_taken.is_some() {
            self.emit_jmp(taken, satp);
        }
        self.gen_store_pc_exit(taken);
    }

    /// Guest load through the RAM fast path: host address is
    /// `mem_base + imm + rs1`.
    fn gen_load(&mut self, mem_base: i64, rd: u8, rs1: u8, imm: i32, size: Size, sext: bool) {
        let r0 = self.ra_load(rs1);
        let tmp = Self::temp_reg();
        self.emit_load_imm_sext(tmp, mem_base + i64::from(imm));
        self.emit_alu64(0x01, r0, tmp);
        let r1 = self.map_vm_reg(rd);
        if sext {
            self.emit_load_sext(size, tmp, r1, 0);
        } else {
            self.emit_load(size, tmp, r1, 0);
        }
    }

    /// Guest store through the RAM fast path.
    fn gen_store(&mut self, mem_base: i64, rs1: u8, rs2: u8, imm: i32, size: Size) {
        let r0 = self.ra_load(rs1);
        let tmp = Self::temp_reg();
        self.emit_load_imm_sext(tmp, mem_base + i64::from(imm));
        self.emit_alu64(0x01, r0, tmp);
        let r1 = self.ra_load(rs2);
        self.emit_store(size, r1, tmp, 0);
    }

    /// Two-operand immediate ALU: `rd = rs1 op imm`.
    fn gen_alu_imm32(&mut self, rd: u8, rs1: u8, ext: u8, imm: i32) {
        let r0 = self.ra_load(rs1);
        let r1 = self.map_vm_reg_reserved(rd, r0);
        if r0 != r1 {
            self.emit_mov(r0, r1);
        }
        self.emit_alu32_imm32(0x81, ext, r1, imm);
    }

    /// Immediate shift: `rd = rs1 shift imm`.
    fn gen_shift_imm(&mut self, rd: u8, rs1: u8, ext: u8, imm: i32) {
        let r0 = self.ra_load(rs1);
        let r1 = self.map_vm_reg_reserved(rd, r0);
        if r0 != r1 {
            self.emit_mov(r0, r1);
        }
        self.emit_alu32_imm8(0xc1, ext, r1, (imm & 0x1f) as u8);
    }

    /// Three-operand register ALU: `rd = rs1 op rs2`.
    fn gen_alu_reg(&mut self, rd: u8, rs1: u8, rs2: u8, op: u8) {
        let (r0, r1) = self.ra_load2(rs1, rs2);
        let r2 = self.map_vm_reg_reserved2(rd, r0, r1);
        let tmp = Self::temp_reg();
        self.emit_mov(r1, tmp);
        self.emit_mov(r0, r2);
        self.emit_alu32(op, tmp, r2);
    }

    /// Variable shift: the amount is masked and staged in the scratch
    /// register.
    fn gen_shift_reg(&mut self, ir: &Insn, ext: u8) {
        let (r0, r1) = self.ra_load2(ir.rs1, ir.rs2);
        let r2 = self.map_vm_reg_reserved2(ir.rd, r0, r1);
        let tmp = Self::temp_reg();
        self.emit_mov(r1, tmp);
        self.emit_mov(r0, r2);
        self.emit_alu32_imm32(0x81, 4, tmp, 0x1f);
        self.emit_alu32(0xd3, ext, r2);
    }

    /// Set-less-than, register form.
    fn gen_set_less(&mut self, ir: &Insn, code: u8) {
        let (r0, r1) = self.ra_load2(ir.rs1, ir.rs2);
        let r2 = self.map_vm_reg_reserved2(ir.rd, r0, r1);
        self.emit_cmp32(r1, r0);
        self.emit_load_imm(r2, 1);
        let loc = self.emit_jcc_offset(code);
        self.emit_load_imm(r2, 0);
        let here = self.offset;
        self.add_jump_to_offset(loc, here);
    }

    /// Set-less-than, immediate form.
    fn gen_set_less_imm(&mut self, ir: &Insn, code: u8) {
        let r0 = self.ra_load(ir.rs1);
        self.emit_cmp_imm32(r0, ir.imm);
        let r1 = self.map_vm_reg_reserved(ir.rd, r0);
        self.emit_load_imm(r1, 1);
        let loc = self.emit_jcc_offset(code);
        self.emit_load_imm(r1, 0);
        let here = self.offset;
        self.add_jump_to_offset(loc, here);
    }

    /// Environment call: store the PC and the instruction-width flag (the
    /// handler's default trap path steps over the instruction by it), call
    /// the host handler, exit.
    fn gen_env_call(&mut self, handler: usize, pc: u32, len: u8) {
        self.store_back();
        let tmp = Self::temp_reg();
        self.emit_load_imm(tmp, pc);
        self.emit_store(Size::S32, tmp, Self::param_reg0(), offset_of_pc());
        self.emit_set_compressed(len == 2);
        self.emit_call(handler);
        self.emit_exit();
    }

    /// Stores the hart's compressed-instruction flag.
    fn emit_set_compressed(&mut self, compressed: bool) {
        let tmp = Self::temp_reg();
        self.emit_load_imm(tmp, u32::from(compressed));
        self.emit_store(Size::S8, tmp, Self::param_reg0(), offset_of_compressed());
    }

    /// Widening multiply: 64-bit product of (optionally sign-extended)
    /// operands, then the high half.
    fn gen_mul_high(&mut self, ir: &Insn, sext1: bool, sext2: bool) {
        let (r0, r1) = if sext1 || sext2 {
            self.ra_load2_sext(ir.rs1, ir.rs2, sext1, sext2)
        } else {
            self.ra_load2(ir.rs1, ir.rs2)
        };
        let r2 = self.map_vm_reg_reserved2(ir.rd, r0, r1);
        let tmp = Self::temp_reg();
        self.emit_mov(r1, tmp);
        self.emit_mov(r0, r2);
        self.muldivmod(0x2f, tmp, r2, false);
        self.emit_alu64_imm8(0xc1, 5, r2, 32);
    }

    /// Divide/remainder with the architected zero-divisor and overflow
    /// results.
    fn gen_divrem(&mut self, ir: &Insn, opcode: u8, sign: bool) {
        let (r0, r1) = if sign {
            self.ra_load2_sext(ir.rs1, ir.rs2, true, true)
        } else {
            self.ra_load2(ir.rs1, ir.rs2)
        };
        let r2 = self.map_vm_reg_reserved2(ir.rd, r0, r1);
        let tmp = Self::temp_reg();
        self.emit_mov(r1, tmp);
        self.emit_mov(r0, r2);
        self.muldivmod(opcode, tmp, r2, sign);
    }

    /// Tier-2 probe stub emitted at each block entry: on an inline-cache
    /// hit for this PC, call the optimized function and exit.
    pub(crate) fn emit_tier2_probe(&mut self, pc: u32) {
        let Some(ic) = self.inline_cache.as_ref() else {
            return;
        };
        let slot_addr = ic.slot_addr(pc);
        let tmp = Self::temp_reg();
        let scratch = Self::param_reg1();

        self.emit_load_imm_sext(tmp, slot_addr as i64);
        self.emit_load(Size::S64, tmp, tmp, 0);
        self.emit_cmp64_imm8(tmp, 0);
        let miss_null = self.emit_jcc_offset(cc::JE);
        self.emit_load(Size::S32, tmp, scratch, super::tier2::ENTRY_PC_OFFSET);
        self.emit_cmp_imm32(scratch, pc as i32);
        let miss_pc = self.emit_jcc_offset(cc::JNE);
        self.emit_load(Size::S64, tmp, tmp, 0);
        self.emit_call_reg(tmp);
        self.emit_exit();
        let here = self.offset;
        self.add_jump_to_offset(miss_null, here);
        self.add_jump_to_offset(miss_pc, here);
    }
}
