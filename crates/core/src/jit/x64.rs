//! x86-64 assembler backend.
//!
//! Byte-level emitters for the SysV AMD64 target. The MR encoding is used
//! whenever there is a choice, with the `src` slot doubling as the opcode
//! extension for the immediate forms, so the per-opcode emitters can drive
//! both backends through one x86-flavoured selector vocabulary.

use super::{Jump, JumpTarget, JitState, Size, cc};

/// Physical register ids and the allocation sets for this backend.
pub(crate) mod reg {
    pub const RAX: u8 = 0;
    pub const RCX: u8 = 1;
    pub const RDX: u8 = 2;
    pub const RBX: u8 = 3;
    pub const RSP: u8 = 4;
    pub const RBP: u8 = 5;
    pub const RSI: u8 = 6;
    pub const RDI: u8 = 7;
    pub const R8: u8 = 8;
    pub const R9: u8 = 9;
    pub const R10: u8 = 10;
    pub const R11: u8 = 11;
    pub const R13: u8 = 13;
    pub const R14: u8 = 14;
    pub const R15: u8 = 15;

    /// Registers handed to the allocator. R12 is deliberately omitted (its
    /// encoding collides with the SIB escape in ModRM addressing).
    pub const ALLOCATABLE: [u8; 10] = [RAX, RBX, RDX, R8, R9, R10, R11, R13, R14, R15];
    /// Scratch register used by multi-step sequences.
    pub const TEMP: u8 = RCX;
    /// Pinned hart pointer (first SysV argument).
    pub const PARAM0: u8 = RDI;
    /// Second SysV argument (the fragment entry); scratch after the jump.
    pub const PARAM1: u8 = RSI;
    /// Callee-saved registers preserved by the prologue.
    pub const NONVOLATILE: [u8; 5] = [RBP, RBX, R13, R14, R15];
}

use reg::{RAX, RBP, RCX, RDX, RSP};

/// Stack frame reserved by the prologue for generated code.
const STACK_SIZE: i32 = 512;

impl JitState {
    #[inline]
    fn emit_modrm(&mut self, md: u8, r: u8, m: u8) {
        self.emit1(md | ((r & 7) << 3) | (m & 7));
    }

    #[inline]
    fn emit_modrm_reg2reg(&mut self, r: u8, m: u8) {
        self.emit_modrm(0xc0, r, m);
    }

    fn emit_modrm_and_displacement(&mut self, r: u8, m: u8, d: i32) {
        if d == 0 && (m & 7) != RBP {
            self.emit_modrm(0x00, r, m);
        } else if (-128..=127).contains(&d) {
            self.emit_modrm(0x40, r, m);
            self.emit1(d as u8);
        } else {
            self.emit_modrm(0x80, r, m);
            self.emit4(d as u32);
        }
    }

    #[inline]
    fn emit_rex(&mut self, w: u8, r: u8, x: u8, b: u8) {
        self.emit1(0x40 | (w << 3) | (r << 2) | (x << 1) | b);
    }

    /// REX incorporating the top bit of both operands; skipped when no bits
    /// are set.
    #[inline]
    fn emit_basic_rex(&mut self, w: u8, src: u8, dst: u8) {
        if w != 0 || (src & 8) != 0 || (dst & 8) != 0 {
            self.emit_rex(w, u8::from(src & 8 != 0), 0, u8::from(dst & 8 != 0));
        }
    }

    pub(crate) fn emit_push(&mut self, r: u8) {
        self.emit_basic_rex(0, 0, r);
        self.emit1(0x50 | (r & 7));
    }

    pub(crate) fn emit_pop(&mut self, r: u8) {
        self.emit_basic_rex(0, 0, r);
        self.emit1(0x58 | (r & 7));
    }

    /// 32-bit ALU operation, register form (or opcode-extension form when
    /// `src` is an extension).
    pub(crate) fn emit_alu32(&mut self, op: u8, src: u8, dst: u8) {
        if (src & 8) != 0 || (dst & 8) != 0 {
            self.emit_basic_rex(0, src, dst);
        }
        self.emit1(op);
        self.emit_modrm_reg2reg(src, dst);
        self.set_dirty(dst, true);
    }

    /// 32-bit ALU operation with a 32-bit immediate.
    pub(crate) fn emit_alu32_imm32(&mut self, op: u8, ext: u8, dst: u8, imm: i32) {
        self.emit_alu32(op, ext, dst);
        self.emit4(imm as u32);
    }

    /// 32-bit ALU operation with an 8-bit immediate (shift group).
    pub(crate) fn emit_alu32_imm8(&mut self, op: u8, ext: u8, dst: u8, imm: u8) {
        self.emit_alu32(op, ext, dst);
        self.emit1(imm);
    }

    /// 64-bit ALU operation, register form.
    pub(crate) fn emit_alu64(&mut self, op: u8, src: u8, dst: u8) {
        self.emit_basic_rex(1, src, dst);
        self.emit1(op);
        self.emit_modrm_reg2reg(src, dst);
        self.set_dirty(dst, true);
    }

    /// 64-bit ALU operation with a 32-bit immediate.
    pub(crate) fn emit_alu64_imm32(&mut self, op: u8, ext: u8, dst: u8, imm: i32) {
        self.emit_alu64(op, ext, dst);
        self.emit4(imm as u32);
    }

    /// 64-bit ALU operation with an 8-bit immediate.
    pub(crate) fn emit_alu64_imm8(&mut self, op: u8, ext: u8, dst: u8, imm: u8) {
        self.emit_alu64(op, ext, dst);
        self.emit1(imm);
    }

    /// Register-to-register move preserving all 64 bits.
    pub(crate) fn emit_mov(&mut self, src: u8, dst: u8) {
        self.emit_alu64(0x89, src, dst);
    }

    /// Sign-extends the low 32 bits of `reg` in place.
    pub(crate) fn emit_sxtw(&mut self, r: u8) {
        self.emit_basic_rex(1, r, r);
        self.emit1(0x63);
        self.emit_modrm_reg2reg(r, r);
    }

    pub(crate) fn emit_cmp32(&mut self, src: u8, dst: u8) {
        self.emit_alu32(0x39, src, dst);
    }

    pub(crate) fn emit_cmp_imm32(&mut self, dst: u8, imm: i32) {
        self.emit_alu32_imm32(0x81, 7, dst, imm);
    }

    /// 64-bit compare against a small immediate (pointer null checks).
    pub(crate) fn emit_cmp64_imm8(&mut self, dst: u8, imm: u8) {
        self.emit_alu64_imm8(0x83, 7, dst, imm);
    }

    /// 64-bit add of a 32-bit immediate.
    pub(crate) fn emit_add64_imm(&mut self, dst: u8, imm: u32) {
        self.emit_alu64_imm32(0x81, 0, dst, imm as i32);
    }

    /// Emits a conditional (or, for [`cc::JMP`], unconditional) jump with a
    /// zero placeholder and returns the location of its rel32 patch field.
    pub(crate) fn emit_jcc_offset(&mut self, code: u8) -> u32 {
        if code != cc::JMP {
            self.emit1(0x0f);
        }
        self.emit1(code);
        let loc = self.offset;
        self.emit4(0);
        loc
    }

    /// Emits a jump to the fragment translated for guest `(pc, satp)`,
    /// recorded for the relocation pass.
    pub(crate) fn emit_jmp(&mut self, target_pc: u32, target_satp: u32) {
        self.emit1(cc::JMP);
        let loc = self.offset;
        self.jumps.push(Jump {
            patch_loc: loc,
            target: JumpTarget::Pc(target_pc, target_satp),
        });
        self.emit4(0);
    }

    /// Emits a jump to the shared epilogue.
    pub(crate) fn emit_exit(&mut self) {
        self.emit1(cc::JMP);
        let loc = self.offset;
        self.jumps.push(Jump {
            patch_loc: loc,
            target: JumpTarget::Exit,
        });
        self.emit4(0);
    }

    /// Loads a 32-bit immediate (zero-extended).
    pub(crate) fn emit_load_imm(&mut self, dst: u8, imm: u32) {
        if (dst & 8) != 0 {
            self.emit_basic_rex(0, 0, dst);
        }
        self.emit1(0xb8 | (dst & 7));
        self.emit4(imm);
        self.set_dirty(dst, true);
    }

    /// Loads a sign-extended 64-bit immediate, using the short form when it
    /// fits in 32 bits.
    pub(crate) fn emit_load_imm_sext(&mut self, dst: u8, imm: i64) {
        if i64::from(imm as i32) == imm {
            self.emit_alu64_imm32(0xc7, 0, dst, imm as i32);
        } else {
            self.emit_basic_rex(1, 0, dst);
            self.emit1(0xb8 | (dst & 7));
            self.emit8(imm as u64);
        }
        self.set_dirty(dst, true);
    }

    /// Loads `[src + offset]` into `dst` (zero-extending below 32 bits).
    ///
    /// A destination currently bound to guest `x0` materialises zero
    /// instead: the zero register never reads from memory.
    pub(crate) fn emit_load(&mut self, size: Size, src: u8, dst: u8, offset: i32) {
        if self.host_is_x0(dst) {
            self.emit_load_imm(dst, 0);
            return;
        }
        if (src & 8) != 0 || (dst & 8) != 0 || size == Size::S64 {
            self.emit_basic_rex(u8::from(size == Size::S64), dst, src);
        }
        match size {
            Size::S8 => {
                self.emit1(0x0f);
                self.emit1(0xb6);
            }
            Size::S16 => {
                self.emit1(0x0f);
                self.emit1(0xb7);
            }
            Size::S32 | Size::S64 => self.emit1(0x8b),
        }
        self.emit_modrm_and_displacement(dst, src, offset);
        self.set_dirty(dst, offset == 0);
    }

    /// Loads `[src + offset]` into `dst` with sign extension.
    pub(crate) fn emit_load_sext(&mut self, size: Size, src: u8, dst: u8, offset: i32) {
        if self.host_is_x0(dst) {
            self.emit_load_imm(dst, 0);
            return;
        }
        match size {
            Size::S8 | Size::S16 => {
                if (src & 8) != 0 || (dst & 8) != 0 {
                    self.emit_basic_rex(0, dst, src);
                }
                self.emit1(0x0f);
                self.emit1(if size == Size::S8 { 0xbe } else { 0xbf });
            }
            _ => {
                self.emit_basic_rex(1, dst, src);
                self.emit1(0x63);
            }
        }
        self.emit_modrm_and_displacement(dst, src, offset);
        self.set_dirty(dst, offset == 0);
    }

    /// Stores `src` to `[dst + offset]`. A source bound to guest `x0`
    /// stores an immediate zero instead.
    pub(crate) fn emit_store(&mut self, size: Size, src: u8, dst: u8, offset: i32) {
        if self.store_x0(size, src, dst, offset) {
            return;
        }
        if size == Size::S16 {
            self.emit1(0x66);
        }
        if (src & 8) != 0 || (dst & 8) != 0 || size == Size::S8 || size == Size::S64 {
            self.emit_rex(
                u8::from(size == Size::S64),
                u8::from(src & 8 != 0),
                0,
                u8::from(dst & 8 != 0),
            );
        }
        self.emit1(if size == Size::S8 { 0x88 } else { 0x89 });
        self.emit_modrm_and_displacement(src, dst, offset);
        if offset != 0 {
            self.set_dirty(src, false);
        }
    }

    /// Store of a host register bound to guest `x0`: write zero directly.
    fn store_x0(&mut self, size: Size, src: u8, dst: u8, offset: i32) -> bool {
        if !self.host_is_x0(src) {
            return false;
        }
        if size == Size::S16 {
            self.emit1(0x66);
        }
        if (dst & 8) != 0 {
            self.emit_rex(0, 0, 0, 1);
        }
        self.emit1(if size == Size::S8 { 0xc6 } else { 0xc7 });
        self.emit1(0x80 | (dst & 0x7));
        self.emit4(offset as u32);
        match size {
            Size::S8 => self.emit1(0),
            Size::S16 => self.emit2(0),
            _ => self.emit4(0),
        }
        self.set_dirty(src, false);
        true
    }

    /// Returns whether physical register `r` currently holds guest `x0`.
    fn host_is_x0(&self, r: u8) -> bool {
        self.reg_map
            .iter()
            .any(|entry| entry.reg == r && entry.vm == 0)
    }

    /// Calls an absolute host address through RAX.
    pub(crate) fn emit_call(&mut self, target: usize) {
        self.emit_load_imm_sext(RAX, target as i64);
        self.emit1(0xff);
        self.emit1(0xd0);
    }

    /// Calls through a register.
    pub(crate) fn emit_call_reg(&mut self, r: u8) {
        self.emit_basic_rex(0, 0, r);
        self.emit1(0xff);
        self.emit_modrm_reg2reg(2, r);
    }

    /// 64-bit `cmove dst, src`.
    fn emit_conditional_move(&mut self, src: u8, dst: u8) {
        self.emit1(0x48);
        self.emit1(0x0f);
        self.emit1(0x44);
        self.emit_modrm_reg2reg(dst, src);
    }

    /// Multiply/divide/remainder over the x86 one-operand forms, with the
    /// RISC-V divide-by-zero and overflow results synthesized branchlessly.
    ///
    /// Signed forms run a 64-bit IDIV over sign-extended operands: the
    /// quotient of `INT_MIN / -1` then fits, cannot fault, and truncates to
    /// the architected 32-bit result.
    pub(crate) fn muldivmod(&mut self, opcode: u8, src: u8, dst: u8, sign: bool) {
        let mul = (opcode & 0xf0) == 0x20;
        let div = (opcode & 0xf0) == 0x30;
        let md = (opcode & 0xf0) == 0x90;
        let is64 = (opcode & 0x07) == 0x07;

        // RAX and RDX are clobbered by the one-operand forms; preserve
        // their bindings and restore the mapping state afterwards.
        let (d1, r1) = (self.reg_map[0].dirty, self.reg_map[0].vm);
        let (d2, r2) = (self.reg_map[2].dirty, self.reg_map[2].vm);

        if dst != RAX {
            self.unmap_vm_reg(0);
            self.emit_push(RAX);
        }
        if dst != RDX {
            self.unmap_vm_reg(2);
            self.emit_push(RDX);
        }

        // Divisor in RCX, dividend in RAX.
        self.emit_mov(src, RCX);
        self.emit_mov(dst, RAX);

        if mul {
            if is64 {
                self.emit_rex(1, 0, 0, 0);
            }
            self.emit_alu32(0xf7, 4, RCX);
        } else {
            // Division cannot fault: a zero divisor is first replaced with
            // 1, and the architected results (-1 quotient, or the dividend
            // as remainder) are patched in afterwards with conditional
            // moves. The saved dividend sits below the saved flags.
            self.emit_load_imm(RDX, 1);
            if md {
                self.emit_push(RAX);
            }
            self.emit_alu32(0x85, RCX, RCX);
            self.emit1(0x9c); // pushfq
            self.emit_conditional_move(RDX, RCX);
            if sign {
                self.emit1(0x48);
                self.emit1(0x99); // cqo
                self.emit_rex(1, 0, 0, 0);
                self.emit_alu32(0xf7, 7, RCX);
            } else {
                self.emit_alu32(0x31, RDX, RDX);
                self.emit_alu32(0xf7, 6, RCX);
            }
            self.emit1(0x9d); // popfq: ZF set when the divisor was zero
            if div {
                self.emit_load_imm_sext(RCX, -1);
                self.emit_conditional_move(RCX, RAX);
            } else {
                self.emit_pop(RCX);
                self.emit_conditional_move(RCX, RDX);
            }
        }

        if dst != RDX {
            if md {
                self.emit_mov(RDX, dst);
            }
            self.emit_pop(RDX);
            self.reg_map[2].vm = r2;
            self.reg_map[2].dirty = d2;
        }
        if dst != RAX {
            if div || mul {
                self.emit_mov(RAX, dst);
            }
            self.emit_pop(RAX);
            self.reg_map[0].vm = r1;
            self.reg_map[0].dirty = d1;
        }
    }

    /// Emits the shared prologue and epilogue.
    ///
    /// The prologue saves the non-volatile registers, re-establishes
    /// 16-byte stack alignment, reserves the scratch frame, and jumps to
    /// the fragment entry passed in RSI. The epilogue at `exit_loc`
    /// reverses it.
    pub(crate) fn prepare_translate(&mut self) {
        for &r in &reg::NONVOLATILE {
            self.emit_push(r);
        }
        if reg::NONVOLATILE.len() % 2 == 0 {
            self.emit_alu64_imm32(0x81, 5, RSP, 0x8);
        }
        self.emit_mov(RSP, RBP);
        self.emit_alu64_imm32(0x81, 5, RSP, STACK_SIZE);

        // jmp *%rsi
        self.emit1(0xff);
        self.emit1(0xe6);

        self.exit_loc = self.offset;
        self.emit_mov(RBP, RSP);
        if reg::NONVOLATILE.len() % 2 == 0 {
            self.emit_alu64_imm32(0x81, 0, RSP, 0x8);
        }
        for &r in reg::NONVOLATILE.iter().rev() {
            self.emit_pop(r);
        }
        self.emit1(0xc3);
        self.org_size = self.offset;
    }

    /// Tier-2 function prologue: a conventional frame with `frame` bytes of
    /// value-slot storage (16-byte aligned so embedded calls stay ABI-clean).
    pub(crate) fn emit_t2_prologue(&mut self, frame: u32) {
        self.emit_push(RBP);
        self.emit_mov(RSP, RBP);
        self.emit_alu64_imm32(0x81, 5, RSP, frame as i32);
    }

    /// Tier-2 function epilogue, emitted at every trace exit.
    pub(crate) fn emit_t2_epilogue(&mut self) {
        self.emit_mov(RBP, RSP);
        self.emit_pop(RBP);
        self.emit1(0xc3);
    }

    /// Loads tier-2 value slot `slot` into `dst`.
    pub(crate) fn emit_frame_load(&mut self, slot: u32, dst: u8) {
        self.emit_load(Size::S32, RBP, dst, -((slot as i32) * 4 + 8));
    }

    /// Stores `src` into tier-2 value slot `slot`.
    pub(crate) fn emit_frame_store(&mut self, slot: u32, src: u8) {
        self.emit_store(Size::S32, src, RBP, -((slot as i32) * 4 + 8));
    }

    /// Frame bytes needed for `n` tier-2 value slots.
    pub(crate) const fn t2_frame_size(n: u32) -> u32 {
        (n * 4 + 8).next_multiple_of(16)
    }

    /// Writes the resolved rel32 of a jump whose patch field sits at `loc`.
    pub(crate) fn patch_jump(&mut self, loc: u32, target_loc: u32) {
        let rel = target_loc.wrapping_sub(loc + 4);
        self.code.write(loc, &rel.to_le_bytes());
    }

    /// Fall-through location of an unresolved jump: the code right after
    /// its patch field (the inlined store-PC-and-exit path).
    pub(crate) const fn fallthrough_loc(&self, patch_loc: u32) -> u32 {
        patch_loc + 4
    }
}
