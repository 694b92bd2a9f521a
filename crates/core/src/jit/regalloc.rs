//! Per-block liveness analysis and the host register allocator.
//!
//! The allocator keeps a fixed-size table of host registers, each holding
//! its current guest binding with `dirty` and `alive` bits. Allocation
//! policy:
//! - A free (`!alive`) register is preferred.
//! - Otherwise the victim is chosen through the spill-candidate queue: the
//!   guest registers sorted by last-read index, farthest first. The victim
//!   is written back when dirty and rebound.
//! - `map_reserved`/`map_reserved2` exclude named host registers from the
//!   pick so three-operand sequences cannot evict their own operands.
//!
//! Guest `x0` is never dirty and never stored back; a host register bound
//! to it serves as an always-available zero.

use crate::common::N_REGS;
use crate::isa::abi::REG_SP;
use crate::isa::insn::Insn;
use crate::isa::op::Op;

use super::{JitState, Size, offset_of_x};

#[cfg(target_arch = "x86_64")]
use super::x64::reg::{self as host};

#[cfg(target_arch = "aarch64")]
use super::a64::reg::{self as host};

/// Number of allocatable host registers.
pub(crate) const N_HOST_REGS: usize = host::ALLOCATABLE.len();

/// One host register binding.
#[derive(Clone, Copy, Debug)]
pub struct HostRegEntry {
    /// Physical host register id.
    pub reg: u8,
    /// Bound guest register, `-1` when unbound.
    pub vm: i16,
    /// Host copy differs from the `Cpu.x` slot.
    pub dirty: bool,
    /// The binding is still wanted before the end of the block.
    pub alive: bool,
}

/// Builds the initial (unbound) register map.
pub(crate) fn fresh_map() -> [HostRegEntry; N_HOST_REGS] {
    let mut map = [HostRegEntry {
        reg: 0,
        vm: -1,
        dirty: false,
        alive: false,
    }; N_HOST_REGS];
    for (entry, &reg) in map.iter_mut().zip(host::ALLOCATABLE.iter()) {
        entry.reg = reg;
    }
    map
}

impl JitState {
    /// The scratch register of the backend.
    #[inline]
    pub(crate) const fn temp_reg() -> u8 {
        host::TEMP
    }

    /// First parameter register; pinned to the hart pointer.
    #[inline]
    pub(crate) const fn param_reg0() -> u8 {
        host::PARAM0
    }

    /// Second parameter register; free for scratch use after the prologue.
    #[inline]
    pub(crate) const fn param_reg1() -> u8 {
        host::PARAM1
    }

    /// Unbinds every host register.
    pub(crate) fn reset_regs(&mut self) {
        for entry in &mut self.reg_map {
            entry.vm = -1;
            entry.dirty = false;
            entry.alive = false;
        }
    }

    /// Marks the binding of physical register `reg` dirty or clean.
    /// Non-allocatable registers are ignored.
    pub(crate) fn set_dirty(&mut self, reg: u8, dirty: bool) {
        for entry in &mut self.reg_map {
            if entry.reg == reg {
                entry.dirty = dirty;
                return;
            }
        }
    }

    /// Writes the binding in map slot `idx` back to its `Cpu.x` slot when
    /// dirty. `x0` is never stored back.
    pub(crate) fn save_reg(&mut self, idx: usize) {
        let entry = self.reg_map[idx];
        if !entry.dirty {
            return;
        }
        if entry.vm == 0 {
            self.reg_map[idx].dirty = false;
            return;
        }
        self.emit_store(
            Size::S32,
            entry.reg,
            Self::param_reg0(),
            offset_of_x(entry.vm as u8),
        );
        self.reg_map[idx].dirty = false;
    }

    /// Spills every dirty binding. Invoked before branches, host calls,
    /// trap paths, and at block exit.
    pub(crate) fn store_back(&mut self) {
        for idx in 0..N_HOST_REGS {
            if self.reg_map[idx].vm != -1 {
                self.save_reg(idx);
            }
        }
    }

    /// Clears `alive` on bindings whose guest register is not read at or
    /// after instruction `idx`.
    pub(crate) fn regs_refresh(&mut self, idx: i32) {
        for entry in &mut self.reg_map {
            if entry.vm == -1 {
                continue;
            }
            if self.liveness[entry.vm as usize] < idx {
                entry.alive = false;
            }
        }
    }

    /// Unbinds map slot `idx`.
    pub(crate) fn unmap_vm_reg(&mut self, idx: usize) {
        self.reg_map[idx].vm = -1;
    }

    fn set_vm_reg(&mut self, idx: usize, vm: u8) {
        self.reg_map[idx].vm = i16::from(vm);
        self.reg_map[idx].alive = true;
    }

    /// Picks a map slot for a new binding, never choosing `reserved`.
    fn reg_pick(&self, reserved: i16) -> usize {
        for (idx, entry) in self.reg_map.iter().enumerate() {
            if i16::from(entry.reg) == reserved {
                continue;
            }
            if !entry.alive {
                return idx;
            }
        }
        // Registers exhausted: evict the binding with the farthest last use.
        for &candidate in &self.candidates {
            for (idx, entry) in self.reg_map.iter().enumerate() {
                if i16::from(entry.reg) == reserved {
                    continue;
                }
                if entry.vm == i16::from(candidate) {
                    return idx;
                }
            }
        }
        unreachable!("allocatable register file cannot be fully reserved");
    }

    /// Picks a map slot, never choosing either reserved register.
    fn reg_pick2(&self, reserved1: i16, reserved2: i16) -> usize {
        for (idx, entry) in self.reg_map.iter().enumerate() {
            if i16::from(entry.reg) == reserved1 || i16::from(entry.reg) == reserved2 {
                continue;
            }
            if !entry.alive {
                return idx;
            }
        }
        for &candidate in &self.candidates {
            for (idx, entry) in self.reg_map.iter().enumerate() {
                if i16::from(entry.reg) == reserved1 || i16::from(entry.reg) == reserved2 {
                    continue;
                }
                if entry.vm == i16::from(candidate) {
                    return idx;
                }
            }
        }
        unreachable!("allocatable register file cannot be fully reserved");
    }

    /// Ensures a host register is bound to guest `vm`, spilling a victim if
    /// the file is exhausted. Returns the physical register.
    pub(crate) fn map_vm_reg(&mut self, vm: u8) -> u8 {
        for entry in &self.reg_map {
            if entry.vm == i16::from(vm) {
                return entry.reg;
            }
        }
        let idx = self.reg_pick(-1);
        let target = self.reg_map[idx].reg;
        self.save_reg(idx);
        self.unmap_vm_reg(idx);
        self.set_vm_reg(idx, vm);
        target
    }

    /// As [`Self::map_vm_reg`], excluding one already-allocated host
    /// register from the spill pick.
    pub(crate) fn map_vm_reg_reserved(&mut self, vm: u8, reserved: u8) -> u8 {
        for entry in &self.reg_map {
            if entry.vm == i16::from(vm) {
                return entry.reg;
            }
        }
        let idx = self.reg_pick(i16::from(reserved));
        let target = self.reg_map[idx].reg;
        self.save_reg(idx);
        self.unmap_vm_reg(idx);
        self.set_vm_reg(idx, vm);
        target
    }

    /// As [`Self::map_vm_reg`], excluding two already-allocated host
    /// registers. Used to synthesize three-operand sequences where `rd`,
    /// `rs1` and `rs2` may all differ.
    pub(crate) fn map_vm_reg_reserved2(&mut self, vm: u8, reserved1: u8, reserved2: u8) -> u8 {
        for entry in &self.reg_map {
            if entry.vm == i16::from(vm) {
                return entry.reg;
            }
        }
        let idx = self.reg_pick2(i16::from(reserved1), i16::from(reserved2));
        let target = self.reg_map[idx].reg;
        self.save_reg(idx);
        self.unmap_vm_reg(idx);
        self.set_vm_reg(idx, vm);
        target
    }

    /// Binds guest `vm` and loads its value from the `Cpu.x` slot unless it
    /// was already resident. Guest `x0` materialises an immediate zero.
    pub(crate) fn ra_load(&mut self, vm: u8) -> u8 {
        let mut origin = -1i16;
        for entry in &self.reg_map {
            if entry.vm == i16::from(vm) {
                origin = i16::from(entry.reg);
            }
        }
        let target = self.map_vm_reg(vm);
        if origin != i16::from(target) {
            self.emit_load(Size::S32, Self::param_reg0(), target, offset_of_x(vm));
        }
        target
    }

    /// Binds and loads two guest registers, guaranteeing distinct host
    /// registers when the guest registers differ.
    pub(crate) fn ra_load2(&mut self, vm1: u8, vm2: u8) -> (u8, u8) {
        let mut origin1 = -1i16;
        let mut origin2 = -1i16;
        for entry in &self.reg_map {
            if entry.vm == i16::from(vm1) {
                origin1 = i16::from(entry.reg);
            }
            if entry.vm == i16::from(vm2) {
                origin2 = i16::from(entry.reg);
            }
        }

        let (r1, r2) = if vm1 == vm2 {
            let r = self.map_vm_reg(vm1);
            (r, r)
        } else {
            let r1 = self.map_vm_reg(vm1);
            let r2 = self.map_vm_reg_reserved(vm2, r1);
            debug_assert_ne!(r1, r2);
            (r1, r2)
        };

        if origin1 != i16::from(r1) {
            self.emit_load(Size::S32, Self::param_reg0(), r1, offset_of_x(vm1));
        }
        if origin2 != i16::from(r2) {
            self.emit_load(Size::S32, Self::param_reg0(), r2, offset_of_x(vm2));
        }
        (r1, r2)
    }

    /// As [`Self::ra_load2`] with optional 64-bit sign extension of either
    /// operand (the widening multiply and signed divide paths).
    pub(crate) fn ra_load2_sext(&mut self, vm1: u8, vm2: u8, sext1: bool, sext2: bool) -> (u8, u8) {
        let mut origin1 = -1i16;
        let mut origin2 = -1i16;
        for entry in &self.reg_map {
            if entry.vm == i16::from(vm1) {
                origin1 = i16::from(entry.reg);
            }
            if entry.vm == i16::from(vm2) {
                origin2 = i16::from(entry.reg);
            }
        }

        let (r1, r2) = if vm1 == vm2 {
            let r = self.map_vm_reg(vm1);
            (r, r)
        } else {
            let r1 = self.map_vm_reg(vm1);
            let r2 = self.map_vm_reg_reserved(vm2, r1);
            (r1, r2)
        };

        if origin1 == i16::from(r1) {
            if sext1 {
                // Already resident but possibly not sign-extended.
                self.emit_sxtw(r1);
            }
        } else if sext1 {
            self.emit_load_sext(Size::S32, Self::param_reg0(), r1, offset_of_x(vm1));
        } else {
            self.emit_load(Size::S32, Self::param_reg0(), r1, offset_of_x(vm1));
        }
        if origin2 == i16::from(r2) {
            if sext2 {
                self.emit_sxtw(r2);
            }
        } else if sext2 {
            self.emit_load_sext(Size::S32, Self::param_reg0(), r2, offset_of_x(vm2));
        } else {
            self.emit_load(Size::S32, Self::param_reg0(), r2, offset_of_x(vm2));
        }
        (r1, r2)
    }

    /// Resets the liveness table and computes the last-read index of every
    /// guest register over `insns`, then rebuilds the spill-candidate queue
    /// sorted farthest-last-use first.
    pub(crate) fn liveness_calc(&mut self, insns: &[Insn]) {
        self.liveness = [-1; N_REGS];
        for (idx, ir) in insns.iter().enumerate() {
            let idx = idx as i32;
            match ir.op {
                Op::Nop
                | Op::CNop
                | Op::Illegal
                | Op::Lui
                | Op::Auipc
                | Op::Jal
                | Op::CJal
                | Op::CJ
                | Op::CLi
                | Op::CLui
                | Op::Ecall
                | Op::Ebreak
                | Op::CEbreak
                | Op::FusedLuiRun
                | Op::FusedSyscall
                | Op::FusedLoadImm32
                | Op::FusedAbsLoad => {}

                Op::Jalr
                | Op::Lb
                | Op::Lh
                | Op::Lw
                | Op::Lbu
                | Op::Lhu
                | Op::Addi
                | Op::Slti
                | Op::Sltiu
                | Op::Xori
                | Op::Ori
                | Op::Andi
                | Op::Slli
                | Op::Srli
                | Op::Srai
                | Op::CSrli
                | Op::CSrai
                | Op::CAndi
                | Op::CJr
                | Op::CJalr
                | Op::CLw
                | Op::CBeqz
                | Op::CBnez
                | Op::FusedLuiAdd
                | Op::FusedAbsStore
                | Op::FusedLoadInc
                | Op::FusedAddBranch => {
                    self.liveness[usize::from(ir.rs1)] = idx;
                }

                Op::Beq
                | Op::Bne
                | Op::Blt
                | Op::Bge
                | Op::Bltu
                | Op::Bgeu
                | Op::Sb
                | Op::Sh
                | Op::Sw
                | Op::Add
                | Op::Sub
                | Op::Sll
                | Op::Slt
                | Op::Sltu
                | Op::Xor
                | Op::Srl
                | Op::Sra
                | Op::Or
                | Op::And
                | Op::Mul
                | Op::Mulh
                | Op::Mulhsu
                | Op::Mulhu
                | Op::Div
                | Op::Divu
                | Op::Rem
                | Op::Remu
                | Op::CSub
                | Op::CXor
                | Op::COr
                | Op::CAnd
                | Op::CAdd => {
                    self.liveness[usize::from(ir.rs1)] = idx;
                    self.liveness[usize::from(ir.rs2)] = idx;
                }

                Op::CSw => {
                    self.liveness[usize::from(ir.rs1)] = idx;
                    self.liveness[usize::from(ir.rs2)] = idx;
                }

                Op::CAddi4spn | Op::CLwsp => {
                    self.liveness[usize::from(REG_SP)] = idx;
                }
                Op::CSwsp => {
                    self.liveness[usize::from(REG_SP)] = idx;
                    self.liveness[usize::from(ir.rs2)] = idx;
                }
                Op::CAddi | Op::CAddi16sp | Op::CSlli => {
                    self.liveness[usize::from(ir.rd)] = idx;
                }
                Op::CMv => {
                    self.liveness[usize::from(ir.rs2)] = idx;
                }

                Op::FusedStoreRun => {
                    for e in &ir.fuse {
                        self.liveness[usize::from(e.rs1)] = idx;
                        self.liveness[usize::from(e.rs2)] = idx;
                    }
                }
                Op::FusedLoadRun | Op::FusedShiftRun | Op::FusedAddiRun => {
                    for e in &ir.fuse {
                        self.liveness[usize::from(e.rs1)] = idx;
                    }
                }

                // Untranslatable tags never reach the translator; mark both
                // sources anyway so a stray block stays conservative.
                _ => {
                    self.liveness[usize::from(ir.rs1)] = idx;
                    self.liveness[usize::from(ir.rs2)] = idx;
                }
            }
        }

        for (i, c) in self.candidates.iter_mut().enumerate() {
            *c = i as u8;
        }
        let liveness = self.liveness;
        self.candidates.sort_by(|&a, &b| {
            liveness[usize::from(b)]
                .cmp(&liveness[usize::from(a)])
                .then(a.cmp(&b))
        });
    }
}
