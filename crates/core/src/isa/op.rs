//! Operation tags for the decoded IR.
//!
//! Every implemented instruction decodes to one `Op` variant. Compressed
//! instructions keep distinct tags (they carry a 2-byte length and their own
//! operand conventions); the twelve `Fused*` tags are synthesized by the
//! macro-op fusion pass and never produced by the decoder.

/// Operation tag over all base, M, A, F, C and fused operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Op {
    /// Canonical no-operation. The decoder rewrites hints and x0-targeted
    /// ALU operations to this tag.
    Nop,

    /// Undecodable encoding. The block builder inserts this tag when decode
    /// fails; executing it raises the illegal-instruction trap with the raw
    /// bits (carried in `imm`) as the trap value.
    Illegal,

    // RV32I base integer instruction set.
    Lui,
    Auipc,
    Jal,
    Jalr,
    Beq,
    Bne,
    Blt,
    Bge,
    Bltu,
    Bgeu,
    Lb,
    Lh,
    Lw,
    Lbu,
    Lhu,
    Sb,
    Sh,
    Sw,
    Addi,
    Slti,
    Sltiu,
    Xori,
    Ori,
    Andi,
    Slli,
    Srli,
    Srai,
    Add,
    Sub,
    Sll,
    Slt,
    Sltu,
    Xor,
    Srl,
    Sra,
    Or,
    And,
    Fence,
    Ecall,
    Ebreak,

    // Privileged operations reachable from user-mode test binaries.
    Wfi,
    Mret,

    // Zifencei standard extension.
    Fencei,

    // Zicsr standard extension.
    Csrrw,
    Csrrs,
    Csrrc,
    Csrrwi,
    Csrrsi,
    Csrrci,

    // M standard extension.
    Mul,
    Mulh,
    Mulhsu,
    Mulhu,
    Div,
    Divu,
    Rem,
    Remu,

    // A standard extension.
    LrW,
    ScW,
    AmoswapW,
    AmoaddW,
    AmoxorW,
    AmoandW,
    AmoorW,
    AmominW,
    AmomaxW,
    AmominuW,
    AmomaxuW,

    // F standard extension (single precision).
    Flw,
    Fsw,
    FmaddS,
    FmsubS,
    FnmsubS,
    FnmaddS,
    FaddS,
    FsubS,
    FmulS,
    FdivS,
    FsqrtS,
    FsgnjS,
    FsgnjnS,
    FsgnjxS,
    FminS,
    FmaxS,
    FcvtWS,
    FcvtWuS,
    FmvXW,
    FeqS,
    FltS,
    FleS,
    FclassS,
    FcvtSW,
    FcvtSWu,
    FmvWX,

    // C standard extension.
    CAddi4spn,
    CLw,
    CSw,
    CNop,
    CAddi,
    CJal,
    CLi,
    CAddi16sp,
    CLui,
    CSrli,
    CSrai,
    CAndi,
    CSub,
    CXor,
    COr,
    CAnd,
    CJ,
    CBeqz,
    CBnez,
    CSlli,
    CLwsp,
    CJr,
    CMv,
    CEbreak,
    CJalr,
    CAdd,
    CSwsp,

    // Synthetic fused operations produced by the macro-op fusion pass.
    /// Run of consecutive `LUI` immediate loads.
    FusedLuiRun,
    /// `LUI` followed by an `ADD` consuming the loaded constant.
    FusedLuiAdd,
    /// Run of consecutive `SW` stores off a common base register.
    FusedStoreRun,
    /// Run of consecutive `LW` loads off a common base register.
    FusedLoadRun,
    /// Run of consecutive immediate shifts.
    FusedShiftRun,
    /// `LI a7, n` followed by `ECALL` (syscall fast path).
    FusedSyscall,
    /// Run of consecutive `ADDI` operations.
    FusedAddiRun,
    /// `LUI` + `ADDI` building a full 32-bit constant.
    FusedLoadImm32,
    /// `LUI` + `LW` absolute-address load.
    FusedAbsLoad,
    /// `LUI` + `SW` absolute-address store.
    FusedAbsStore,
    /// `LW` + `ADDI` post-increment load.
    FusedLoadInc,
    /// `ADDI` + `BNE` decrement-and-branch.
    FusedAddBranch,
}

impl Default for Op {
    fn default() -> Self {
        Self::Nop
    }
}

impl Op {
    /// Returns whether this operation terminates a basic block.
    ///
    /// Any control-flow transfer ends the enclosing block, as do the
    /// environment operations and the fence instructions whose semantics
    /// require the translated code downstream of them to be rebuilt.
    #[inline]
    pub const fn is_terminator(self) -> bool {
        matches!(
            self,
            Self::Illegal
                | Self::Jal
                | Self::Jalr
                | Self::Beq
                | Self::Bne
                | Self::Blt
                | Self::Bge
                | Self::Bltu
                | Self::Bgeu
                | Self::Ecall
                | Self::Ebreak
                | Self::Mret
                | Self::Wfi
                | Self::Fencei
                | Self::CJ
                | Self::CJr
                | Self::CJal
                | Self::CJalr
                | Self::CBeqz
                | Self::CBnez
                | Self::CEbreak
                | Self::FusedSyscall
                | Self::FusedAddBranch
        )
    }

    /// Returns whether this operation is a conditional branch.
    #[inline]
    pub const fn is_cond_branch(self) -> bool {
        matches!(
            self,
            Self::Beq
                | Self::Bne
                | Self::Blt
                | Self::Bge
                | Self::Bltu
                | Self::Bgeu
                | Self::CBeqz
                | Self::CBnez
                | Self::FusedAddBranch
        )
    }

    /// Returns whether this operation is an indirect jump whose target is
    /// only known at run time. These are the operations that carry a
    /// branch-history table for the JIT.
    #[inline]
    pub const fn is_indirect(self) -> bool {
        matches!(self, Self::Jalr | Self::CJr | Self::CJalr)
    }

    /// Returns whether the tier-1 JIT can translate this operation.
    ///
    /// Atomic, floating-point, CSR and system operations stay on the
    /// interpreter; a block containing any of them is never compiled.
    #[inline]
    pub const fn is_translatable(self) -> bool {
        !matches!(
            self,
            Self::Illegal
                | Self::Fence
                | Self::Fencei
                | Self::Wfi
                | Self::Mret
                | Self::Csrrw
                | Self::Csrrs
                | Self::Csrrc
                | Self::Csrrwi
                | Self::Csrrsi
                | Self::Csrrci
                | Self::LrW
                | Self::ScW
                | Self::AmoswapW
                | Self::AmoaddW
                | Self::AmoxorW
                | Self::AmoandW
                | Self::AmoorW
                | Self::AmominW
                | Self::AmomaxW
                | Self::AmominuW
                | Self::AmomaxuW
                | Self::Flw
                | Self::Fsw
                | Self::FmaddS
                | Self::FmsubS
                | Self::FnmsubS
                | Self::FnmaddS
                | Self::FaddS
                | Self::FsubS
                | Self::FmulS
                | Self::FdivS
                | Self::FsqrtS
                | Self::FsgnjS
                | Self::FsgnjnS
                | Self::FsgnjxS
                | Self::FminS
                | Self::FmaxS
                | Self::FcvtWS
                | Self::FcvtWuS
                | Self::FmvXW
                | Self::FeqS
                | Self::FltS
                | Self::FleS
                | Self::FclassS
                | Self::FcvtSW
                | Self::FcvtSWu
                | Self::FmvWX
        )
    }

    /// Returns whether this tag is one of the synthetic fused operations.
    #[inline]
    pub const fn is_fused(self) -> bool {
        matches!(
            self,
            Self::FusedLuiRun
                | Self::FusedLuiAdd
                | Self::FusedStoreRun
                | Self::FusedLoadRun
                | Self::FusedShiftRun
                | Self::FusedSyscall
                | Self::FusedAddiRun
                | Self::FusedLoadImm32
                | Self::FusedAbsLoad
                | Self::FusedAbsStore
                | Self::FusedLoadInc
                | Self::FusedAddBranch
        )
    }
}
