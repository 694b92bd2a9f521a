//! ELF32 loader and initial stack layout.
//!
//! This module places a guest executable into the memory image and prepares
//! the hart for its first instruction. It performs:
//! 1. **Image loading:** Each `PT_LOAD` segment is copied verbatim to its
//!    virtual address; the BSS tail is zero-filled.
//! 2. **Validation:** The image must be ELF32, little-endian, `EM_RISCV`.
//! 3. **Stack setup:** `argc`/`argv`/`envp` follow the Linux/newlib layout,
//!    with `sp` starting below the top of the guest image.
//! 4. **Signature lookup:** The architectural-test symbols
//!    `begin_signature`/`end_signature` are resolved when present.

use object::{Architecture, Object, ObjectSegment, ObjectSymbol};
use tracing::debug;

use crate::common::CoreError;
use crate::core::cpu::Cpu;
use crate::isa::abi::{REG_A0, REG_A1, REG_SP};
use crate::sim::memory::Memory;

/// Initial stack pointer, a little below the top of the address space.
const STACK_TOP: u32 = 0xffff_e000;

/// Facts about a loaded guest image.
#[derive(Clone, Copy, Debug)]
pub struct LoadedImage {
    /// Entry program counter (`e_entry`).
    pub entry: u32,
    /// End of the highest loaded segment; initial program break.
    pub brk: u32,
    /// `begin_signature` symbol, when the image carries one.
    pub sig_begin: Option<u32>,
    /// `end_signature` symbol, when the image carries one.
    pub sig_end: Option<u32>,
}

/// Loads an ELF32 RISC-V executable into guest memory.
///
/// # Errors
///
/// Returns [`CoreError::Elf`] when the image is not a little-endian ELF32
/// RISC-V executable or a segment fails to parse.
pub fn load_elf(mem: &mut Memory, data: &[u8]) -> Result<LoadedImage, CoreError> {
    let file = object::File::parse(data).map_err(|e| CoreError::Elf(e.to_string()))?;

    if file.architecture() != Architecture::Riscv32 {
        return Err(CoreError::Elf(format!(
            "expected EM_RISCV (32-bit), found {:?}",
            file.architecture()
        )));
    }
    if !file.is_little_endian() {
        return Err(CoreError::Elf("expected little-endian image".into()));
    }

    let mut brk = 0u32;
    for segment in file.segments() {
        let addr = segment.address() as u32;
        let mem_size = segment.size() as u32;
        let bytes = segment
            .data()
            .map_err(|e| CoreError::Elf(e.to_string()))?;
        if addr.checked_add(mem_size).is_none() {
            return Err(CoreError::Elf(format!(
                "segment at {addr:#x} exceeds the 32-bit address space"
            )));
        }
        mem.write_slice(addr, bytes);
        // Zero the BSS tail (p_memsz beyond p_filesz).
        if mem_size as usize > bytes.len() {
            mem.zero(
                addr + bytes.len() as u32,
                mem_size as usize - bytes.len(),
            );
        }
        brk = brk.max(addr + mem_size);
        debug!(
            addr = format_args!("{addr:#x}"),
            file_size = bytes.len(),
            mem_size,
            "segment loaded"
        );
    }

    let mut sig_begin = None;
    let mut sig_end = None;
    for sym in file.symbols() {
        match sym.name() {
            Ok("begin_signature") => sig_begin = Some(sym.address() as u32),
            Ok("end_signature") => sig_end = Some(sym.address() as u32),
            _ => {}
        }
    }

    Ok(LoadedImage {
        entry: file.entry() as u32,
        brk,
        sig_begin,
        sig_end,
    })
}

/// Lays out `argc`/`argv`/`envp` on the guest stack and points the hart at
/// the image entry.
///
/// The layout follows the Linux/newlib convention: string bytes at the top,
/// then (descending) a null auxv terminator, a null `envp`, the `argv`
/// pointer array with its null terminator, and `argc` at the final `sp`.
pub fn setup_stack(cpu: &mut Cpu, image: &LoadedImage, args: &[String]) {
    cpu.pc = image.entry;
    cpu.brk = image.brk;

    let mut sp = STACK_TOP;

    // String area.
    let mut arg_ptrs = Vec::with_capacity(args.len());
    for arg in args.iter().rev() {
        let bytes = arg.as_bytes();
        sp -= bytes.len() as u32 + 1;
        cpu.mem.write_slice(sp, bytes);
        cpu.mem.write_b(sp + bytes.len() as u32, 0);
        arg_ptrs.push(sp);
    }
    arg_ptrs.reverse();
    sp &= !0xf;

    // Pointer area, built downwards: auxv terminator, envp terminator,
    // argv[argc] = NULL, argv pointers, argc.
    sp -= 4 * 2; // AT_NULL
    cpu.mem.write_w(sp, 0);
    cpu.mem.write_w(sp + 4, 0);
    sp -= 4; // envp = { NULL }
    cpu.mem.write_w(sp, 0);
    sp -= 4; // argv terminator
    cpu.mem.write_w(sp, 0);
    for &p in arg_ptrs.iter().rev() {
        sp -= 4;
        cpu.mem.write_w(sp, p);
    }
    sp -= 4;
    cpu.mem.write_w(sp, args.len() as u32);

    cpu.x[usize::from(REG_SP)] = sp;
    cpu.x[usize::from(REG_A0)] = args.len() as u32;
    cpu.x[usize::from(REG_A1)] = sp + 4;
}
