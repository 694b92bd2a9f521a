//! Trap vectoring unit tests.
//!
//! Context saving, direct and vectored dispatch, the no-handler default
//! path, and `MRET`.

use pretty_assertions::assert_eq;
use rivet_core::common::Trap;
use rivet_core::core::cpu::Cpu;
use rivet_core::sim::memory::Memory;
use rivet_core::Config;

fn cpu() -> Cpu {
    Cpu::new(Memory::new().unwrap(), &Config::default())
}

#[test]
fn trap_saves_context_and_vectors_direct() {
    let mut c = cpu();
    c.pc = 0x1004;
    c.csr_mtvec = 0x8000_0000;
    c.raise(Trap::StoreMisaligned(0x1001));
    assert_eq!(c.csr_mepc, 0x1004);
    assert_eq!(c.csr_mtval, 0x1001);
    assert_eq!(c.csr_mcause, 6);
    assert_eq!(c.pc, 0x8000_0000);
}

#[test]
fn vectored_mode_offsets_by_cause() {
    let mut c = cpu();
    c.pc = 0x2000;
    c.csr_mtvec = 0x8000_0001; // mode = vectored
    c.raise(Trap::LoadMisaligned(0x3));
    assert_eq!(c.pc, 0x8000_0000 + 4 * 4);
}

#[test]
fn no_handler_steps_over_faulting_word() {
    let mut c = cpu();
    c.pc = 0x1004;
    c.compressed = false;
    c.raise(Trap::IllegalInstruction(0xffff_ffff));
    assert_eq!(c.csr_mepc, 0x1008);
    assert_eq!(c.pc, 0x1008);
    assert_eq!(c.csr_mtval, 0xffff_ffff);
    assert_eq!(c.csr_mcause, 2);
}

#[test]
fn no_handler_steps_over_compressed_by_two() {
    let mut c = cpu();
    c.pc = 0x1002;
    c.compressed = true;
    c.raise(Trap::Breakpoint(0x1002));
    assert_eq!(c.pc, 0x1004);
    assert_eq!(c.csr_mcause, 3);
}

#[test]
fn cause_codes_follow_the_privileged_spec() {
    assert_eq!(Trap::InstructionMisaligned(0).cause(), 0);
    assert_eq!(Trap::IllegalInstruction(0).cause(), 2);
    assert_eq!(Trap::Breakpoint(0).cause(), 3);
    assert_eq!(Trap::LoadMisaligned(0).cause(), 4);
    assert_eq!(Trap::StoreMisaligned(0).cause(), 6);
    assert_eq!(Trap::EnvironmentCall.cause(), 11);
}

#[test]
fn mret_returns_to_mepc_with_low_bit_clear() {
    let mut c = cpu();
    c.csr_mepc = 0x2001;
    c.do_mret();
    assert_eq!(c.pc, 0x2000);
}

#[test]
fn environment_call_has_zero_tval() {
    let mut c = cpu();
    c.pc = 0x4000;
    c.csr_mtvec = 0x100;
    c.csr_mtval = 0x5555;
    c.raise(Trap::EnvironmentCall);
    assert_eq!(c.csr_mtval, 0);
    assert_eq!(c.csr_mcause, 11);
    assert_eq!(c.csr_mepc, 0x4000);
}
