//! Lowering of optimized tier-2 IR to native code.
//!
//! Every IR value gets a 32-bit frame slot; operations stage their operands
//! through the two scratch registers of the active backend and write the
//! result slot back. This trades register pressure for total simplicity:
//! the scalar passes have already removed the redundant work, and the
//! frame discipline keeps the lowering identical on both hosts.

use super::ir::{BinOp, CondOp, MemSize, T2Func, T2Op, T2Term, Val};
use crate::jit::{JitState, JumpTarget, Size, cc, offset_of_compressed, offset_of_pc, offset_of_x};

/// Value-slot cap: the aarch64 frame immediate bounds the slot area, and a
/// trace hot enough to exceed this is pathological anyway.
const MAX_VALS: u32 = 960;

/// Materialises `func`, returning the code-cache offset of its entry.
///
/// Returns `None` when the function exceeds the frame or buffer limits; the
/// caller simply leaves the block at tier 1.
pub(crate) fn lower(asm: &mut JitState, func: &T2Func) -> Option<u32> {
    if func.n_vals > MAX_VALS {
        return None;
    }
    let entry = asm.offset;
    let frame = JitState::t2_frame_size(func.n_vals);
    asm.t2_frame = frame;
    asm.jumps.clear();
    asm.emit_t2_prologue(frame);
    let mem_base = func.mem_base;

    let mut block_offset = vec![0u32; func.blocks.len()];
    let mut pending: Vec<(u32, usize)> = Vec::new();

    for (idx, block) in func.blocks.iter().enumerate() {
        block_offset[idx] = asm.offset;
        asm.emit_bump_cycle(block.cycles);
        for op in &block.ops {
            lower_op(asm, op, mem_base);
        }
        match block.term {
            Some(T2Term::Exit) | None => asm.emit_t2_epilogue(),
            Some(T2Term::Jump(target)) => {
                if target == idx + 1 {
                    // Fallthrough.
                } else {
                    let loc = asm.emit_jcc_offset(cc::JMP);
                    pending.push((loc, target));
                }
            }
            Some(T2Term::Branch {
                cond,
                lhs,
                rhs,
                taken,
                untaken,
            }) => {
                load_slot(asm, lhs, JitState::param_reg1());
                load_slot(asm, rhs, JitState::temp_reg());
                asm.emit_cmp32(JitState::temp_reg(), JitState::param_reg1());
                let code = match cond {
                    CondOp::Eq => cc::JE,
                    CondOp::Ne => cc::JNE,
                    CondOp::Lt => cc::JL,
                    CondOp::Ge => cc::JGE,
                    CondOp::Ltu => cc::JB,
                    CondOp::Geu => cc::JAE,
                };
                let loc = asm.emit_jcc_offset(code);
                pending.push((loc, taken));
                if untaken == idx + 1 {
                    // Fallthrough.
                } else {
                    let loc = asm.emit_jcc_offset(cc::JMP);
                    pending.push((loc, untaken));
                }
            }
        }
        if asm.should_flush {
            // The worker's buffer is exhausted; discard this function.
            asm.should_flush = false;
            asm.offset = entry;
            asm.jumps.clear();
            return None;
        }
    }

    for (loc, target) in pending {
        asm.patch_jump(loc, block_offset[target]);
    }
    // Internal control synthesized by the primitive layer (set-less,
    // divide fixups) resolves within the function.
    let jumps = std::mem::take(&mut asm.jumps);
    for j in jumps {
        if let JumpTarget::Offset(o) = j.target {
            asm.patch_jump(j.patch_loc, o);
        }
    }

    Some(entry)
}

/// Loads slot `v` into host register `dst`.
fn load_slot(asm: &mut JitState, v: Val, dst: u8) {
    asm.emit_frame_load(v, dst);
}

/// Stores host register `src` into slot `v`.
fn store_slot(asm: &mut JitState, v: Val, src: u8) {
    asm.emit_frame_store(v, src);
}

fn lower_op(asm: &mut JitState, op: &T2Op, mem_base: i64) {
    let tmp = JitState::temp_reg();
    let scr = JitState::param_reg1();
    let rv = JitState::param_reg0();

    match *op {
        T2Op::Const { dst, imm } => {
            asm.emit_load_imm(tmp, imm);
            store_slot(asm, dst, tmp);
        }
        T2Op::ReadReg { dst, reg } => {
            asm.emit_load(Size::S32, rv, tmp, offset_of_x(reg));
            store_slot(asm, dst, tmp);
        }
        T2Op::WriteReg { reg, src } => {
            load_slot(asm, src, tmp);
            asm.emit_store(Size::S32, tmp, rv, offset_of_x(reg));
        }
        T2Op::Bin { op, dst, lhs, rhs } => lower_bin(asm, op, dst, lhs, rhs),
        T2Op::Load {
            size,
            sext,
            dst,
            addr,
        } => {
            load_slot(asm, addr, scr);
            asm.emit_load_imm_sext(tmp, mem_base);
            asm.emit_alu64(0x01, scr, tmp);
            let sz = mem_size(size);
            if sext {
                asm.emit_load_sext(sz, tmp, scr, 0);
            } else {
                asm.emit_load(sz, tmp, scr, 0);
            }
            store_slot(asm, dst, scr);
        }
        T2Op::Store { size, src, addr } => {
            load_slot(asm, addr, scr);
            asm.emit_load_imm_sext(tmp, mem_base);
            asm.emit_alu64(0x01, scr, tmp);
            load_slot(asm, src, scr);
            asm.emit_store(mem_size(size), scr, tmp, 0);
        }
        T2Op::SetPc { imm } => {
            asm.emit_load_imm(tmp, imm);
            asm.emit_store(Size::S32, tmp, rv, offset_of_pc());
        }
        T2Op::SetPcVal { src } => {
            load_slot(asm, src, tmp);
            asm.emit_store(Size::S32, tmp, rv, offset_of_pc());
        }
        T2Op::SetCompressed { compressed } => {
            asm.emit_load_imm(tmp, u32::from(compressed));
            asm.emit_store(Size::S8, tmp, rv, offset_of_compressed());
        }
        T2Op::Call { target } => {
            asm.emit_call(target);
        }
    }
}

fn mem_size(size: MemSize) -> Size {
    match size {
        MemSize::Byte => Size::S8,
        MemSize::Half => Size::S16,
        MemSize::Word => Size::S32,
    }
}

fn lower_bin(asm: &mut JitState, op: BinOp, dst: Val, lhs: Val, rhs: Val) {
    let tmp = JitState::temp_reg();
    let scr = JitState::param_reg1();

    match op {
        BinOp::Add | BinOp::Sub | BinOp::And | BinOp::Or | BinOp::Xor => {
            load_slot(asm, lhs, scr);
            load_slot(asm, rhs, tmp);
            let sel = match op {
                BinOp::Add => 0x01,
                BinOp::Sub => 0x29,
                BinOp::And => 0x21,
                BinOp::Or => 0x09,
                _ => 0x31,
            };
            asm.emit_alu32(sel, tmp, scr);
            store_slot(asm, dst, scr);
        }
        BinOp::Sll | BinOp::Srl | BinOp::Sra => {
            load_slot(asm, rhs, tmp);
            asm.emit_alu32_imm32(0x81, 4, tmp, 0x1f);
            load_slot(asm, lhs, scr);
            let ext = match op {
                BinOp::Sll => 4,
                BinOp::Srl => 5,
                _ => 7,
            };
            asm.emit_alu32(0xd3, ext, scr);
            store_slot(asm, dst, scr);
        }
        BinOp::Slt | BinOp::Sltu => {
            load_slot(asm, lhs, scr);
            load_slot(asm, rhs, tmp);
            asm.emit_cmp32(tmp, scr);
            asm.emit_load_imm(scr, 1);
            let loc = asm.emit_jcc_offset(if op == BinOp::Slt { cc::JL } else { cc::JB });
            asm.emit_load_imm(scr, 0);
            let here = asm.offset;
            asm.add_jump_to_offset(loc, here);
            store_slot(asm, dst, scr);
        }
        BinOp::Mul => {
            load_slot(asm, lhs, scr);
            load_slot(asm, rhs, tmp);
            asm.muldivmod(0x28, tmp, scr, false);
            store_slot(asm, dst, scr);
        }
        BinOp::Mulh | BinOp::Mulhsu | BinOp::Mulhu => {
            load_slot(asm, lhs, scr);
            load_slot(asm, rhs, tmp);
            if matches!(op, BinOp::Mulh | BinOp::Mulhsu) {
                asm.emit_sxtw(scr);
            }
            if op == BinOp::Mulh {
                asm.emit_sxtw(tmp);
            }
            asm.muldivmod(0x2f, tmp, scr, false);
            asm.emit_alu64_imm8(0xc1, 5, scr, 32);
            store_slot(asm, dst, scr);
        }
        BinOp::Div | BinOp::Rem => {
            load_slot(asm, lhs, scr);
            load_slot(asm, rhs, tmp);
            asm.emit_sxtw(scr);
            asm.emit_sxtw(tmp);
            let sel = if op == BinOp::Div { 0x38 } else { 0x98 };
            asm.muldivmod(sel, tmp, scr, true);
            store_slot(asm, dst, scr);
        }
        BinOp::Divu | BinOp::Remu => {
            load_slot(asm, lhs, scr);
            load_slot(asm, rhs, tmp);
            let sel = if op == BinOp::Divu { 0x38 } else { 0x98 };
            asm.muldivmod(sel, tmp, scr, false);
            store_slot(asm, dst, scr);
        }
    }
}
