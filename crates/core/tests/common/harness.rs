//! Test harness.
//!
//! `TestContext` wraps a `Machine` with helpers for placing guest code,
//! seeding registers, and running bounded cycle budgets. The JIT is off by
//! default so unit tests exercise the interpreter deterministically;
//! tier-sensitive tests opt in through `with_config`.

use rivet_core::{Config, Machine};

use super::builder::instruction as rv;

/// Where test code is placed, matching the scenario convention.
pub const CODE_BASE: u32 = 0x1000;

/// One unit of guest code: a full word or a compressed halfword.
#[derive(Clone, Copy, Debug)]
pub enum CodeUnit {
    /// 32-bit instruction.
    W(u32),
    /// 16-bit compressed instruction.
    H(u16),
}

/// A machine plus the bookkeeping tests need.
pub struct TestContext {
    pub machine: Machine,
}

impl TestContext {
    /// Interpreter-only context with default block pipeline settings.
    pub fn new() -> Self {
        let mut config = Config::default();
        config.jit.enabled = false;
        Self::with_config(config)
    }

    /// Context with an explicit configuration.
    pub fn with_config(config: Config) -> Self {
        #[allow(clippy::unwrap_used)]
        let machine = Machine::new(config).unwrap();
        let mut ctx = Self { machine };
        ctx.machine.cpu.pc = CODE_BASE;
        ctx
    }

    /// Places 32-bit instructions at [`CODE_BASE`] and points the PC there.
    pub fn write_code(&mut self, words: &[u32]) {
        let mut addr = CODE_BASE;
        for &w in words {
            self.machine.cpu.mem.write_w(addr, w);
            addr += 4;
        }
        self.machine.cpu.pc = CODE_BASE;
    }

    /// Places mixed-width code at [`CODE_BASE`] and points the PC there.
    pub fn write_units(&mut self, units: &[CodeUnit]) {
        let mut addr = CODE_BASE;
        for &u in units {
            match u {
                CodeUnit::W(w) => {
                    self.machine.cpu.mem.write_w(addr, w);
                    addr += 4;
                }
                CodeUnit::H(h) => {
                    self.machine.cpu.mem.write_s(addr, h);
                    addr += 2;
                }
            }
        }
        self.machine.cpu.pc = CODE_BASE;
    }

    /// Executes up to `budget` cycles.
    pub fn step(&mut self, budget: u64) {
        self.machine.step(budget);
    }

    /// Runs to guest exit and returns the exit code. Only for programs
    /// that end in an `exit` syscall.
    pub fn run(&mut self) -> Option<u32> {
        self.machine.run()
    }

    /// Reads an integer register.
    pub fn reg(&self, r: usize) -> u32 {
        self.machine.cpu.x[r]
    }

    /// Seeds an integer register.
    pub fn set_reg(&mut self, r: usize, v: u32) {
        self.machine.cpu.x[r] = v;
    }

    /// Current program counter.
    pub fn pc(&self) -> u32 {
        self.machine.cpu.pc
    }
}

/// Appends the newlib exit sequence (`li a7,93 ; li a0,code ; ecall`).
pub fn exit_seq(code: i32) -> Vec<u32> {
    vec![rv::addi(17, 0, 93), rv::addi(10, 0, code), rv::ecall()]
}

/// Builds a minimal ELF32 `EM_RISCV` executable with one `PT_LOAD` segment
/// holding `code` at `vaddr`, entered at `vaddr`. `bss` extra bytes extend
/// `p_memsz` past `p_filesz`.
pub fn mini_elf(code: &[u32], vaddr: u32, bss: u32) -> Vec<u8> {
    let mut body = Vec::new();
    for &w in code {
        body.extend_from_slice(&w.to_le_bytes());
    }
    let filesz = body.len() as u32;

    let mut out = Vec::new();
    // ELF header.
    out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 1, 1, 1, 0]);
    out.extend_from_slice(&[0; 8]);
    out.extend_from_slice(&2u16.to_le_bytes()); // e_type = EXEC
    out.extend_from_slice(&243u16.to_le_bytes()); // e_machine = EM_RISCV
    out.extend_from_slice(&1u32.to_le_bytes()); // e_version
    out.extend_from_slice(&vaddr.to_le_bytes()); // e_entry
    out.extend_from_slice(&52u32.to_le_bytes()); // e_phoff
    out.extend_from_slice(&0u32.to_le_bytes()); // e_shoff
    out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    out.extend_from_slice(&52u16.to_le_bytes()); // e_ehsize
    out.extend_from_slice(&32u16.to_le_bytes()); // e_phentsize
    out.extend_from_slice(&1u16.to_le_bytes()); // e_phnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shentsize
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
    // Program header.
    out.extend_from_slice(&1u32.to_le_bytes()); // p_type = PT_LOAD
    out.extend_from_slice(&84u32.to_le_bytes()); // p_offset
    out.extend_from_slice(&vaddr.to_le_bytes()); // p_vaddr
    out.extend_from_slice(&vaddr.to_le_bytes()); // p_paddr
    out.extend_from_slice(&filesz.to_le_bytes()); // p_filesz
    out.extend_from_slice(&(filesz + bss).to_le_bytes()); // p_memsz
    out.extend_from_slice(&7u32.to_le_bytes()); // p_flags = RWX
    out.extend_from_slice(&4u32.to_le_bytes()); // p_align
    out.extend_from_slice(&body);
    out
}
