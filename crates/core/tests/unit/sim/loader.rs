//! ELF loading and stack layout tests, driven by a hand-built minimal
//! ELF32 image.

use pretty_assertions::assert_eq;

use crate::common::builder::instruction as rv;
use crate::common::harness::{TestContext, exit_seq, mini_elf};
use rivet_core::isa::abi;

#[test]
fn image_loads_at_its_vaddr() {
    let code = [rv::addi(1, 0, 5), rv::jal(0, 0)];
    let elf = mini_elf(&code, 0x1_0000, 0);
    let mut ctx = TestContext::new();
    ctx.machine.load_elf(&elf, &[]).unwrap();
    assert_eq!(ctx.machine.cpu.pc, 0x1_0000);
    assert_eq!(ctx.machine.cpu.mem.read_w(0x1_0000), code[0]);
    assert_eq!(ctx.machine.cpu.mem.read_w(0x1_0004), code[1]);
}

#[test]
fn bss_tail_is_zero_filled() {
    let code = [rv::jal(0, 0)];
    let elf = mini_elf(&code, 0x2_0000, 64);
    let mut ctx = TestContext::new();
    // Dirty the region first; loading must clear it.
    ctx.machine.cpu.mem.write_w(0x2_0010, 0xdead_beef);
    ctx.machine.load_elf(&elf, &[]).unwrap();
    assert_eq!(ctx.machine.cpu.mem.read_w(0x2_0010), 0);
    assert_eq!(ctx.machine.image.unwrap().brk, 0x2_0000 + 4 + 64);
}

#[test]
fn stack_follows_the_linux_convention() {
    let elf = mini_elf(&[rv::jal(0, 0)], 0x1_0000, 0);
    let mut ctx = TestContext::new();
    let args = vec!["prog".to_string(), "alpha".to_string()];
    ctx.machine.load_elf(&elf, &args).unwrap();

    let cpu = &ctx.machine.cpu;
    let sp = cpu.x[usize::from(abi::REG_SP)];
    assert_eq!(sp % 4, 0);
    assert_eq!(cpu.mem.read_w(sp), 2); // argc
    assert_eq!(cpu.x[usize::from(abi::REG_A0)], 2);
    assert_eq!(cpu.x[usize::from(abi::REG_A1)], sp + 4);

    let argv0 = cpu.mem.read_w(sp + 4);
    let argv1 = cpu.mem.read_w(sp + 8);
    assert_eq!(cpu.mem.read_vec(argv0, 4), b"prog");
    assert_eq!(cpu.mem.read_vec(argv1, 5), b"alpha");
    assert_eq!(cpu.mem.read_b(argv1 + 5), 0); // NUL terminated
    assert_eq!(cpu.mem.read_w(sp + 12), 0); // argv terminator
}

#[test]
fn wrong_architecture_is_rejected() {
    let mut elf = mini_elf(&[rv::jal(0, 0)], 0x1_0000, 0);
    elf[18] = 62; // e_machine = EM_X86_64
    let mut ctx = TestContext::new();
    assert!(ctx.machine.load_elf(&elf, &[]).is_err());
}

#[test]
fn truncated_image_is_rejected() {
    let mut ctx = TestContext::new();
    assert!(ctx.machine.load_elf(&[0x7f, b'E', b'L', b'F'], &[]).is_err());
}

#[test]
fn signature_is_absent_without_symbols() {
    let elf = mini_elf(&[rv::jal(0, 0)], 0x1_0000, 0);
    let mut ctx = TestContext::new();
    ctx.machine.load_elf(&elf, &[]).unwrap();
    assert!(ctx.machine.signature().is_none());
}

#[test]
fn loaded_program_runs_to_exit() {
    let mut code = vec![rv::addi(10, 0, 0)];
    code.extend(exit_seq(7));
    let elf = mini_elf(&code, 0x1_0000, 0);
    let mut ctx = TestContext::new();
    ctx.machine.load_elf(&elf, &[]).unwrap();
    assert_eq!(ctx.run(), Some(7));
}
