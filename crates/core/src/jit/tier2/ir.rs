//! Tier-2 pseudo-IR, trace builder, and scalar optimization passes.
//!
//! Each guest opcode expands into value-based pseudo-instructions over an
//! unbounded value namespace; one guest block becomes one IR block, and the
//! trace builder follows resolved branch edges so a hot region compiles as
//! a small CFG. Three passes run before lowering: constant folding, local
//! common-subexpression elimination, and dead-code elimination (including
//! dead register writes).

use std::collections::HashMap;

use crate::block::cache::BlockCache;
use crate::block::BlockRef;
use crate::isa::abi::{REG_A7, REG_RA, REG_SP};
use crate::isa::insn::Insn;
use crate::isa::op::Op;

/// IR value id.
pub(crate) type Val = u32;

/// Binary operators over 32-bit values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum BinOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Sll,
    Srl,
    Sra,
    Slt,
    Sltu,
    Mul,
    Mulh,
    Mulhsu,
    Mulhu,
    Div,
    Divu,
    Rem,
    Remu,
}

impl BinOp {
    /// Evaluates the operator over two known constants.
    pub(crate) fn eval(self, a: u32, b: u32) -> u32 {
        match self {
            Self::Add => a.wrapping_add(b),
            Self::Sub => a.wrapping_sub(b),
            Self::And => a & b,
            Self::Or => a | b,
            Self::Xor => a ^ b,
            Self::Sll => a << (b & 0x1f),
            Self::Srl => a >> (b & 0x1f),
            Self::Sra => ((a as i32) >> (b & 0x1f)) as u32,
            Self::Slt => u32::from((a as i32) < (b as i32)),
            Self::Sltu => u32::from(a < b),
            Self::Mul => a.wrapping_mul(b),
            Self::Mulh => ((i64::from(a as i32) * i64::from(b as i32)) >> 32) as u32,
            Self::Mulhsu => ((i64::from(a as i32) * i64::from(b)) >> 32) as u32,
            Self::Mulhu => ((u64::from(a) * u64::from(b)) >> 32) as u32,
            Self::Div => match (a as i32, b as i32) {
                (_, 0) => u32::MAX,
                (i32::MIN, -1) => a,
                (x, y) => (x / y) as u32,
            },
            Self::Divu => {
                if b == 0 {
                    u32::MAX
                } else {
                    a / b
                }
            }
            Self::Rem => match (a as i32, b as i32) {
                (_, 0) => a,
                (i32::MIN, -1) => 0,
                (x, y) => (x % y) as u32,
            },
            Self::Remu => {
                if b == 0 {
                    a
                } else {
                    a % b
                }
            }
        }
    }
}

/// Memory access widths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum MemSize {
    Byte,
    Half,
    Word,
}

/// One pseudo-instruction.
#[derive(Clone, Copy, Debug)]
pub(crate) enum T2Op {
    /// `dst = imm`.
    Const { dst: Val, imm: u32 },
    /// `dst = x[reg]`.
    ReadReg { dst: Val, reg: u8 },
    /// `x[reg] = src`.
    WriteReg { reg: u8, src: Val },
    /// `dst = lhs op rhs`.
    Bin { op: BinOp, dst: Val, lhs: Val, rhs: Val },
    /// `dst = mem[addr]`, optionally sign-extending.
    Load {
        size: MemSize,
        sext: bool,
        dst: Val,
        addr: Val,
    },
    /// `mem[addr] = src`.
    Store { size: MemSize, src: Val, addr: Val },
    /// `pc = imm`.
    SetPc { imm: u32 },
    /// `pc = src`.
    SetPcVal { src: Val },
    /// Set the compressed-instruction flag consulted by the trap unit's
    /// default handler.
    SetCompressed { compressed: bool },
    /// Call a host helper with the hart pointer.
    Call { target: usize },
}

/// Branch conditions (flags of `lhs - rhs`).
#[derive(Clone, Copy, Debug)]
pub(crate) enum CondOp {
    Eq,
    Ne,
    Lt,
    Ge,
    Ltu,
    Geu,
}

/// Block terminator.
#[derive(Clone, Copy, Debug)]
pub(crate) enum T2Term {
    /// Return to the driver; the PC has been stored.
    Exit,
    /// Fall into another IR block.
    Jump(usize),
    /// Two-way conditional branch.
    Branch {
        cond: CondOp,
        lhs: Val,
        rhs: Val,
        taken: usize,
        untaken: usize,
    },
}

/// One IR block.
#[derive(Debug, Default)]
pub(crate) struct T2Block {
    pub ops: Vec<T2Op>,
    pub term: Option<T2Term>,
    /// Guest cycle cost charged on entry; zero for synthetic exit stubs.
    pub cycles: u32,
}

/// A compiled trace: entry block first.
#[derive(Debug)]
pub(crate) struct T2Func {
    /// Guest entry PC (the inline-cache tag).
    pub pc: u32,
    /// Host base of the guest image, baked into memory accesses.
    pub mem_base: i64,
    pub blocks: Vec<T2Block>,
    pub n_vals: u32,
}

/// Trace builder state.
struct Builder<'a> {
    cache: &'a BlockCache,
    func: T2Func,
    /// Guest pc -> IR block index for blocks in the trace.
    block_of: HashMap<u32, usize>,
    on_ecall: usize,
    on_ebreak: usize,
    /// Maximum guest blocks pulled into one trace.
    limit: usize,
}

/// Builds the optimizing IR for the trace rooted at `root`.
///
/// Returns `None` when the root is gone or untranslatable.
pub(crate) fn build(
    cache: &BlockCache,
    root: BlockRef,
    mem_base: i64,
    on_ecall: usize,
    on_ebreak: usize,
) -> Option<T2Func> {
    let root_blk = cache.resolve(root)?;
    if !root_blk.translatable {
        return None;
    }
    let pc = root_blk.pc_start;
    let mut b = Builder {
        cache,
        func: T2Func {
            pc,
            mem_base,
            blocks: Vec::new(),
            n_vals: 0,
        },
        block_of: HashMap::new(),
        on_ecall,
        on_ebreak,
        limit: 64,
    };
    let entry = b.trace_block(root)?;
    debug_assert_eq!(entry, 0);
    Some(b.func)
}

impl Builder<'_> {
    fn val(&mut self) -> Val {
        let v = self.func.n_vals;
        self.func.n_vals += 1;
        v
    }

    /// Returns the IR index for the guest block behind `bref`, translating
    /// it on first visit.
    fn trace_block(&mut self, bref: BlockRef) -> Option<usize> {
        let blk = self.cache.resolve(bref)?;
        if !blk.translatable {
            return None;
        }
        if let Some(&idx) = self.block_of.get(&blk.pc_start) {
            return Some(idx);
        }
        if self.func.blocks.len() >= self.limit {
            return None;
        }

        let idx = self.func.blocks.len();
        self.func.blocks.push(T2Block::default());
        let _ = self.block_of.insert(blk.pc_start, idx);
        self.func.blocks[idx].cycles = blk.cycle_cost;

        let mut ops = Vec::new();
        let insns: Vec<Insn> = blk.insns.clone();
        let pc_end = blk.pc_end;
        for ir in &insns {
            if ir.op.is_terminator() {
                let term = self.lower_terminator(&mut ops, ir);
                self.func.blocks[idx].ops = ops;
                self.func.blocks[idx].term = Some(term);
                return Some(idx);
            }
            self.lower_insn(&mut ops, ir);
        }

        // No control-flow terminator (page-terminated or capacity split):
        // fall through to the sequential successor.
        let succ = insns.last().and_then(|t| t.branch_taken);
        let term = match succ.and_then(|s| self.trace_block(s)) {
            Some(target) => T2Term::Jump(target),
            None => {
                ops.push(T2Op::SetPc { imm: pc_end });
                T2Term::Exit
            }
        };
        self.func.blocks[idx].ops = ops;
        self.func.blocks[idx].term = Some(term);
        Some(idx)
    }

    /// Makes (or reuses) an exit stub block that stores `pc` and leaves.
    fn exit_block(&mut self, pc: u32) -> usize {
        let idx = self.func.blocks.len();
        self.func.blocks.push(T2Block {
            ops: vec![T2Op::SetPc { imm: pc }],
            term: Some(T2Term::Exit),
            cycles: 0,
        });
        idx
    }

    /// Edge helper: branch into the trace when the successor is resolved,
    /// otherwise through an exit stub.
    fn edge(&mut self, succ: Option<BlockRef>, pc: u32) -> usize {
        match succ.and_then(|s| self.trace_block(s)) {
            Some(idx) => idx,
            None => self.exit_block(pc),
        }
    }

    fn read(&mut self, ops: &mut Vec<T2Op>, reg: u8) -> Val {
        let dst = self.val();
        ops.push(T2Op::ReadReg { dst, reg });
        dst
    }

    fn konst(&mut self, ops: &mut Vec<T2Op>, imm: u32) -> Val {
        let dst = self.val();
        ops.push(T2Op::Const { dst, imm });
        dst
    }

    fn bin(&mut self, ops: &mut Vec<T2Op>, op: BinOp, lhs: Val, rhs: Val) -> Val {
        let dst = self.val();
        ops.push(T2Op::Bin { op, dst, lhs, rhs });
        dst
    }

    fn write(ops: &mut Vec<T2Op>, reg: u8, src: Val) {
        if reg != 0 {
            ops.push(T2Op::WriteReg { reg, src });
        }
    }

    /// `rd = rs1 op imm` shorthand.
    fn alu_imm(&mut self, ops: &mut Vec<T2Op>, op: BinOp, rd: u8, rs1: u8, imm: u32) {
        let a = self.read(ops, rs1);
        let c = self.konst(ops, imm);
        let d = self.bin(ops, op, a, c);
        Self::write(ops, rd, d);
    }

    /// `rd = rs1 op rs2` shorthand.
    fn alu_reg(&mut self, ops: &mut Vec<T2Op>, op: BinOp, rd: u8, rs1: u8, rs2: u8) {
        let a = self.read(ops, rs1);
        let b = self.read(ops, rs2);
        let d = self.bin(ops, op, a, b);
        Self::write(ops, rd, d);
    }

    fn mem_load(
        &mut self,
        ops: &mut Vec<T2Op>,
        rd: u8,
        rs1: u8,
        imm: u32,
        size: MemSize,
        sext: bool,
    ) {
        let a = self.read(ops, rs1);
        let c = self.konst(ops, imm);
        let addr = self.bin(ops, BinOp::Add, a, c);
        let dst = self.val();
        ops.push(T2Op::Load {
            size,
            sext,
            dst,
            addr,
        });
        Self::write(ops, rd, dst);
    }

    fn mem_store(&mut self, ops: &mut Vec<T2Op>, rs1: u8, rs2: u8, imm: u32, size: MemSize) {
        let a = self.read(ops, rs1);
        let c = self.konst(ops, imm);
        let addr = self.bin(ops, BinOp::Add, a, c);
        let src = self.read(ops, rs2);
        ops.push(T2Op::Store { size, src, addr });
    }

    /// Expands one straight-line instruction.
    fn lower_insn(&mut self, ops: &mut Vec<T2Op>, ir: &Insn) {
        let imm = ir.imm as u32;
        match ir.op {
            Op::Nop | Op::CNop | Op::Fence => {}

            Op::Lui | Op::CLui | Op::CLi => {
                let c = self.konst(ops, imm);
                Self::write(ops, ir.rd, c);
            }
            Op::Auipc => {
                let c = self.konst(ops, ir.pc.wrapping_add(imm));
                Self::write(ops, ir.rd, c);
            }

            Op::Lb => self.mem_load(ops, ir.rd, ir.rs1, imm, MemSize::Byte, true),
            Op::Lh => self.mem_load(ops, ir.rd, ir.rs1, imm, MemSize::Half, true),
            Op::Lw | Op::CLw => self.mem_load(ops, ir.rd, ir.rs1, imm, MemSize::Word, false),
            Op::CLwsp => self.mem_load(ops, ir.rd, REG_SP, imm, MemSize::Word, false),
            Op::Lbu => self.mem_load(ops, ir.rd, ir.rs1, imm, MemSize::Byte, false),
            Op::Lhu => self.mem_load(ops, ir.rd, ir.rs1, imm, MemSize::Half, false),

            Op::Sb => self.mem_store(ops, ir.rs1, ir.rs2, imm, MemSize::Byte),
            Op::Sh => self.mem_store(ops, ir.rs1, ir.rs2, imm, MemSize::Half),
            Op::Sw | Op::CSw => self.mem_store(ops, ir.rs1, ir.rs2, imm, MemSize::Word),
            Op::CSwsp => self.mem_store(ops, REG_SP, ir.rs2, imm, MemSize::Word),

            Op::Addi => self.alu_imm(ops, BinOp::Add, ir.rd, ir.rs1, imm),
            Op::CAddi => self.alu_imm(ops, BinOp::Add, ir.rd, ir.rd, imm),
            Op::CAddi4spn => self.alu_imm(ops, BinOp::Add, ir.rd, REG_SP, imm),
            Op::CAddi16sp => self.alu_imm(ops, BinOp::Add, REG_SP, REG_SP, imm),
            Op::Slti => self.alu_imm(ops, BinOp::Slt, ir.rd, ir.rs1, imm),
            Op::Sltiu => self.alu_imm(ops, BinOp::Sltu, ir.rd, ir.rs1, imm),
            Op::Xori => self.alu_imm(ops, BinOp::Xor, ir.rd, ir.rs1, imm),
            Op::Ori => self.alu_imm(ops, BinOp::Or, ir.rd, ir.rs1, imm),
            Op::Andi | Op::CAndi => self.alu_imm(ops, BinOp::And, ir.rd, ir.rs1, imm),
            Op::Slli | Op::CSlli => self.alu_imm(ops, BinOp::Sll, ir.rd, ir.rs1, imm),
            Op::Srli | Op::CSrli => self.alu_imm(ops, BinOp::Srl, ir.rd, ir.rs1, imm),
            Op::Srai | Op::CSrai => self.alu_imm(ops, BinOp::Sra, ir.rd, ir.rs1, imm),

            Op::Add | Op::CAdd => self.alu_reg(ops, BinOp::Add, ir.rd, ir.rs1, ir.rs2),
            Op::Sub | Op::CSub => self.alu_reg(ops, BinOp::Sub, ir.rd, ir.rs1, ir.rs2),
            Op::Sll => self.alu_reg(ops, BinOp::Sll, ir.rd, ir.rs1, ir.rs2),
            Op::Slt => self.alu_reg(ops, BinOp::Slt, ir.rd, ir.rs1, ir.rs2),
            Op::Sltu => self.alu_reg(ops, BinOp::Sltu, ir.rd, ir.rs1, ir.rs2),
            Op::Xor | Op::CXor => self.alu_reg(ops, BinOp::Xor, ir.rd, ir.rs1, ir.rs2),
            Op::Srl => self.alu_reg(ops, BinOp::Srl, ir.rd, ir.rs1, ir.rs2),
            Op::Sra => self.alu_reg(ops, BinOp::Sra, ir.rd, ir.rs1, ir.rs2),
            Op::Or | Op::COr => self.alu_reg(ops, BinOp::Or, ir.rd, ir.rs1, ir.rs2),
            Op::And | Op::CAnd => self.alu_reg(ops, BinOp::And, ir.rd, ir.rs1, ir.rs2),

            Op::Mul => self.alu_reg(ops, BinOp::Mul, ir.rd, ir.rs1, ir.rs2),
            Op::Mulh => self.alu_reg(ops, BinOp::Mulh, ir.rd, ir.rs1, ir.rs2),
            Op::Mulhsu => self.alu_reg(ops, BinOp::Mulhsu, ir.rd, ir.rs1, ir.rs2),
            Op::Mulhu => self.alu_reg(ops, BinOp::Mulhu, ir.rd, ir.rs1, ir.rs2),
            Op::Div => self.alu_reg(ops, BinOp::Div, ir.rd, ir.rs1, ir.rs2),
            Op::Divu => self.alu_reg(ops, BinOp::Divu, ir.rd, ir.rs1, ir.rs2),
            Op::Rem => self.alu_reg(ops, BinOp::Rem, ir.rd, ir.rs1, ir.rs2),
            Op::Remu => self.alu_reg(ops, BinOp::Remu, ir.rd, ir.rs1, ir.rs2),

            Op::CMv => {
                let v = self.read(ops, ir.rs2);
                Self::write(ops, ir.rd, v);
            }

            Op::FusedLuiRun => {
                for e in &ir.fuse {
                    let c = self.konst(ops, e.imm as u32);
                    Self::write(ops, e.rd, c);
                }
            }
            Op::FusedLuiAdd => {
                let c = self.konst(ops, imm);
                Self::write(ops, ir.rd, c);
                let a = self.read(ops, ir.rs1);
                let d = self.bin(ops, BinOp::Add, a, c);
                Self::write(ops, ir.rs2, d);
            }
            Op::FusedStoreRun => {
                for e in &ir.fuse {
                    self.mem_store(ops, e.rs1, e.rs2, e.imm as u32, MemSize::Word);
                }
            }
            Op::FusedLoadRun => {
                for e in &ir.fuse {
                    self.mem_load(ops, e.rd, e.rs1, e.imm as u32, MemSize::Word, false);
                }
            }
            Op::FusedShiftRun => {
                for e in &ir.fuse {
                    let op = match e.op {
                        Op::Slli => BinOp::Sll,
                        Op::Srli => BinOp::Srl,
                        _ => BinOp::Sra,
                    };
                    self.alu_imm(ops, op, e.rd, e.rs1, e.imm as u32);
                }
            }
            Op::FusedAddiRun => {
                for e in &ir.fuse {
                    self.alu_imm(ops, BinOp::Add, e.rd, e.rs1, e.imm as u32);
                }
            }
            Op::FusedLoadImm32 => {
                let c = self.konst(ops, imm.wrapping_add(ir.imm2 as u32));
                Self::write(ops, ir.rd, c);
            }
            Op::FusedAbsLoad => {
                let c = self.konst(ops, imm);
                Self::write(ops, ir.rd, c);
                let addr = self.konst(ops, imm.wrapping_add(ir.imm2 as u32));
                let dst = self.val();
                ops.push(T2Op::Load {
                    size: MemSize::Word,
                    sext: false,
                    dst,
                    addr,
                });
                Self::write(ops, ir.rs2, dst);
            }
            Op::FusedAbsStore => {
                let c = self.konst(ops, imm);
                Self::write(ops, ir.rd, c);
                let addr = self.konst(ops, imm.wrapping_add(ir.imm2 as u32));
                let src = self.read(ops, ir.rs1);
                ops.push(T2Op::Store {
                    size: MemSize::Word,
                    src,
                    addr,
                });
            }
            Op::FusedLoadInc => {
                self.mem_load(ops, ir.rd, ir.rs1, imm, MemSize::Word, false);
                self.alu_imm(ops, BinOp::Add, ir.rs1, ir.rs1, ir.imm2 as u32);
            }

            _ => unreachable!("untranslatable operation reached the tier-2 builder"),
        }
    }

    /// Expands a terminator, chaining into the trace where edges resolve.
    fn lower_terminator(&mut self, ops: &mut Vec<T2Op>, ir: &Insn) -> T2Term {
        let imm = ir.imm as u32;
        let cond_edges = |b: &mut Self, ops: &mut Vec<T2Op>, cond, lhs, rhs| {
            let taken_pc = ir.pc.wrapping_add(imm);
            let untaken_pc = ir.pc.wrapping_add(u32::from(ir.len));
            let _ = ops;
            let taken = b.edge(ir.branch_taken, taken_pc);
            let untaken = b.edge(ir.branch_untaken, untaken_pc);
            T2Term::Branch {
                cond,
                lhs,
                rhs,
                taken,
                untaken,
            }
        };

        match ir.op {
            Op::Jal | Op::CJal | Op::CJ => {
                let link = match ir.op {
                    Op::Jal => ir.rd,
                    Op::CJal => REG_RA,
                    _ => 0,
                };
                if link != 0 {
                    let c = self.konst(ops, ir.pc.wrapping_add(u32::from(ir.len)));
                    Self::write(ops, link, c);
                }
                let target_pc = ir.pc.wrapping_add(imm);
                match ir.branch_taken.and_then(|s| self.trace_block(s)) {
                    Some(idx) => T2Term::Jump(idx),
                    None => {
                        ops.push(T2Op::SetPc { imm: target_pc });
                        T2Term::Exit
                    }
                }
            }
            Op::Jalr | Op::CJr | Op::CJalr => {
                let a = self.read(ops, ir.rs1);
                let off = self.konst(ops, imm);
                let sum = self.bin(ops, BinOp::Add, a, off);
                let mask = self.konst(ops, !1);
                let target = self.bin(ops, BinOp::And, sum, mask);
                let link = match ir.op {
                    Op::Jalr => ir.rd,
                    Op::CJalr => REG_RA,
                    _ => 0,
                };
                if link != 0 {
                    let c = self.konst(ops, ir.pc.wrapping_add(u32::from(ir.len)));
                    Self::write(ops, link, c);
                }
                ops.push(T2Op::SetPcVal { src: target });
                T2Term::Exit
            }

            Op::Beq => {
                let (a, b) = (self.read(ops, ir.rs1), self.read(ops, ir.rs2));
                cond_edges(self, ops, CondOp::Eq, a, b)
            }
            Op::Bne => {
                let (a, b) = (self.read(ops, ir.rs1), self.read(ops, ir.rs2));
                cond_edges(self, ops, CondOp::Ne, a, b)
            }
            Op::Blt => {
                let (a, b) = (self.read(ops, ir.rs1), self.read(ops, ir.rs2));
                cond_edges(self, ops, CondOp::Lt, a, b)
            }
            Op::Bge => {
                let (a, b) = (self.read(ops, ir.rs1), self.read(ops, ir.rs2));
                cond_edges(self, ops, CondOp::Ge, a, b)
            }
            Op::Bltu => {
                let (a, b) = (self.read(ops, ir.rs1), self.read(ops, ir.rs2));
                cond_edges(self, ops, CondOp::Ltu, a, b)
            }
            Op::Bgeu => {
                let (a, b) = (self.read(ops, ir.rs1), self.read(ops, ir.rs2));
                cond_edges(self, ops, CondOp::Geu, a, b)
            }
            Op::CBeqz => {
                let a = self.read(ops, ir.rs1);
                let z = self.konst(ops, 0);
                cond_edges(self, ops, CondOp::Eq, a, z)
            }
            Op::CBnez => {
                let a = self.read(ops, ir.rs1);
                let z = self.konst(ops, 0);
                cond_edges(self, ops, CondOp::Ne, a, z)
            }
            Op::FusedAddBranch => {
                let a = self.read(ops, ir.rs1);
                let c = self.konst(ops, imm);
                let d = self.bin(ops, BinOp::Add, a, c);
                Self::write(ops, ir.rd, d);
                let z = self.konst(ops, 0);
                let taken_pc = ir.pc.wrapping_add(4).wrapping_add(ir.imm2 as u32);
                let untaken_pc = ir.pc.wrapping_add(8);
                let taken = self.edge(ir.branch_taken, taken_pc);
                let untaken = self.edge(ir.branch_untaken, untaken_pc);
                T2Term::Branch {
                    cond: CondOp::Ne,
                    lhs: d,
                    rhs: z,
                    taken,
                    untaken,
                }
            }

            Op::Ecall => {
                ops.push(T2Op::SetPc { imm: ir.pc });
                ops.push(T2Op::SetCompressed { compressed: false });
                ops.push(T2Op::Call {
                    target: self.on_ecall,
                });
                T2Term::Exit
            }
            Op::FusedSyscall => {
                let c = self.konst(ops, imm);
                Self::write(ops, REG_A7, c);
                ops.push(T2Op::SetPc {
                    imm: ir.pc.wrapping_add(4),
                });
                ops.push(T2Op::SetCompressed { compressed: false });
                ops.push(T2Op::Call {
                    target: self.on_ecall,
                });
                T2Term::Exit
            }
            Op::Ebreak | Op::CEbreak => {
                ops.push(T2Op::SetPc { imm: ir.pc });
                ops.push(T2Op::SetCompressed {
                    compressed: ir.len == 2,
                });
                ops.push(T2Op::Call {
                    target: self.on_ebreak,
                });
                T2Term::Exit
            }

            _ => {
                // Remaining terminators (fence.i, mret, illegal) never occur
                // in translatable blocks.
                ops.push(T2Op::SetPc { imm: ir.pc });
                T2Term::Exit
            }
        }
    }
}

/// CSE hash key over resolved operands.
#[derive(PartialEq, Eq, Hash)]
enum CseKey {
    Const(u32),
    Read(u8),
    Bin(BinOp, Val, Val),
}

/// Runs constant folding, local CSE, and dead-code elimination in place.
pub(crate) fn optimize(func: &mut T2Func) {
    let mut subst: Vec<Val> = (0..func.n_vals).collect();
    let resolve = |subst: &[Val], mut v: Val| {
        while subst[v as usize] != v {
            v = subst[v as usize];
        }
        v
    };

    for block in &mut func.blocks {
        let mut consts: HashMap<Val, u32> = HashMap::new();
        let mut table: HashMap<CseKey, Val> = HashMap::new();
        let mut out = Vec::with_capacity(block.ops.len());

        for op in block.ops.drain(..) {
            // Resolve operands through the substitution map, then fold and
            // number the expression.
            let op = match op {
                T2Op::Bin { op, dst, lhs, rhs } => {
                    let (lhs, rhs) = (resolve(&subst, lhs), resolve(&subst, rhs));
                    if let (Some(&a), Some(&b)) = (consts.get(&lhs), consts.get(&rhs)) {
                        T2Op::Const {
                            dst,
                            imm: op.eval(a, b),
                        }
                    } else {
                        T2Op::Bin { op, dst, lhs, rhs }
                    }
                }
                T2Op::WriteReg { reg, src } => T2Op::WriteReg {
                    reg,
                    src: resolve(&subst, src),
                },
                T2Op::Load {
                    size,
                    sext,
                    dst,
                    addr,
                } => T2Op::Load {
                    size,
                    sext,
                    dst,
                    addr: resolve(&subst, addr),
                },
                T2Op::Store { size, src, addr } => T2Op::Store {
                    size,
                    src: resolve(&subst, src),
                    addr: resolve(&subst, addr),
                },
                T2Op::SetPcVal { src } => T2Op::SetPcVal {
                    src: resolve(&subst, src),
                },
                other => other,
            };

            match op {
                T2Op::Const { dst, imm } => {
                    if let Some(&prev) = table.get(&CseKey::Const(imm)) {
                        subst[dst as usize] = prev;
                    } else {
                        let _ = table.insert(CseKey::Const(imm), dst);
                        let _ = consts.insert(dst, imm);
                        out.push(op);
                    }
                }
                T2Op::ReadReg { dst, reg } => {
                    if let Some(&prev) = table.get(&CseKey::Read(reg)) {
                        subst[dst as usize] = prev;
                    } else {
                        let _ = table.insert(CseKey::Read(reg), dst);
                        out.push(op);
                    }
                }
                T2Op::Bin { op: b, dst, lhs, rhs } => {
                    if let Some(&prev) = table.get(&CseKey::Bin(b, lhs, rhs)) {
                        subst[dst as usize] = prev;
                    } else {
                        let _ = table.insert(CseKey::Bin(b, lhs, rhs), dst);
                        out.push(op);
                    }
                }
                T2Op::WriteReg { reg, src } => {
                    // The written value becomes the known content of `reg`.
                    let _ = table.remove(&CseKey::Read(reg));
                    let _ = table.insert(CseKey::Read(reg), src);
                    out.push(op);
                }
                T2Op::Call { .. } => {
                    // The helper may rewrite any register.
                    table.retain(|k, _| !matches!(k, CseKey::Read(_)));
                    out.push(op);
                }
                other => out.push(other),
            }
        }

        // Patch terminator operands.
        if let Some(term) = block.term.as_mut() {
            match term {
                T2Term::Branch { lhs, rhs, .. } => {
                    *lhs = resolve(&subst, *lhs);
                    *rhs = resolve(&subst, *rhs);
                }
                T2Term::Exit | T2Term::Jump(_) => {}
            }
        }
        block.ops = out;
    }

    dce(func);
}

/// Backward dead-code elimination: drops pure operations whose value is
/// never used and register writes that are overwritten before any observer.
fn dce(func: &mut T2Func) {
    let mut used = vec![false; func.n_vals as usize];

    // Terminator operands are roots across all blocks.
    for block in &func.blocks {
        if let Some(T2Term::Branch { lhs, rhs, .. }) = block.term {
            used[lhs as usize] = true;
            used[rhs as usize] = true;
        }
    }

    for block in &mut func.blocks {
        let mut will_write = [false; 32];
        let mut keep = vec![true; block.ops.len()];

        for (i, op) in block.ops.iter().enumerate().rev() {
            match *op {
                T2Op::WriteReg { reg, src } => {
                    if will_write[usize::from(reg)] {
                        keep[i] = false;
                    } else {
                        will_write[usize::from(reg)] = true;
                        used[src as usize] = true;
                    }
                }
                T2Op::ReadReg { dst, reg } => {
                    will_write[usize::from(reg)] = false;
                    if !used[dst as usize] {
                        keep[i] = false;
                    }
                }
                T2Op::Const { dst, .. } => {
                    if !used[dst as usize] {
                        keep[i] = false;
                    }
                }
                T2Op::Bin { dst, lhs, rhs, .. } => {
                    if used[dst as usize] {
                        used[lhs as usize] = true;
                        used[rhs as usize] = true;
                    } else {
                        keep[i] = false;
                    }
                }
                T2Op::Load { dst, addr, .. } => {
                    if used[dst as usize] {
                        used[addr as usize] = true;
                    } else {
                        keep[i] = false;
                    }
                }
                T2Op::Store { src, addr, .. } => {
                    used[src as usize] = true;
                    used[addr as usize] = true;
                }
                T2Op::SetPcVal { src } => {
                    used[src as usize] = true;
                }
                T2Op::Call { .. } => {
                    // The helper observes and may rewrite every register.
                    will_write = [false; 32];
                }
                T2Op::SetPc { .. } | T2Op::SetCompressed { .. } => {}
            }
        }

        let mut i = 0;
        block.ops.retain(|_| {
            let k = keep[i];
            i += 1;
            k
        });
    }
}
