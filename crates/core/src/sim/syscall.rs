//! Newlib-style syscall emulation.
//!
//! The guest signals an environment call with `ECALL`; after the trap unit
//! has vectored, the driver-installed `on_ecall` callback lands here with
//! the register file visible. Arguments follow the standard convention:
//! syscall number in `a7`, arguments in `a0..a5`, result in `a0`.
//!
//! Only the calls a newlib userland actually issues are implemented;
//! everything else returns `-ENOSYS`.

use std::io::{Read, Write};

use tracing::debug;

use crate::common::trap::Trap;
use crate::core::cpu::Cpu;
use crate::isa::abi::{REG_A0, REG_A1, REG_A2, REG_A7};

/// `close` syscall number.
const SYS_CLOSE: u32 = 57;
/// `lseek` syscall number.
const SYS_LSEEK: u32 = 62;
/// `read` syscall number.
const SYS_READ: u32 = 63;
/// `write` syscall number.
const SYS_WRITE: u32 = 64;
/// `fstat` syscall number.
const SYS_FSTAT: u32 = 80;
/// `exit` syscall number.
const SYS_EXIT: u32 = 93;
/// `gettimeofday` syscall number.
const SYS_GETTIMEOFDAY: u32 = 169;
/// `brk` syscall number.
const SYS_BRK: u32 = 214;

/// Linux `ENOSYS` as a negative return value.
const ENOSYS: u32 = (-38i32) as u32;
/// Linux `EBADF` as a negative return value.
const EBADF: u32 = (-9i32) as u32;

/// `ECALL` entry point installed into the hart: vector the environment
/// trap, then dispatch the syscall with the register file visible.
///
/// `extern "C"` so tier-1 generated code can call it directly; the program
/// counter of the `ECALL` has been stored before the call on either path.
pub extern "C" fn on_ecall(rv: *mut Cpu) {
    // SAFETY: the pointer is the live hart passed by the interpreter or by
    // generated code running under the driver; exclusive access holds for
    // the duration of the call (single-threaded cooperative model).
    let cpu = unsafe { &mut *rv };
    cpu.raise(Trap::EnvironmentCall);
    dispatch(cpu);
}

/// `EBREAK` entry point: vector the breakpoint trap. Nothing further to do
/// without a debugger attached.
pub extern "C" fn on_ebreak(rv: *mut Cpu) {
    // SAFETY: as for `on_ecall`.
    let cpu = unsafe { &mut *rv };
    cpu.raise(Trap::Breakpoint(cpu.pc));
}

fn dispatch(cpu: &mut Cpu) {
    let nr = cpu.x[usize::from(REG_A7)];
    let a0 = cpu.x[usize::from(REG_A0)];
    let a1 = cpu.x[usize::from(REG_A1)];
    let a2 = cpu.x[usize::from(REG_A2)];

    let ret = match nr {
        SYS_EXIT => {
            cpu.exit_code = Some(a0);
            cpu.halt = true;
            return;
        }
        SYS_WRITE => sys_write(cpu, a0, a1, a2),
        SYS_READ => sys_read(cpu, a0, a1, a2),
        SYS_CLOSE => 0,
        SYS_FSTAT => sys_fstat(cpu, a0, a1),
        SYS_LSEEK => 0,
        SYS_BRK => sys_brk(cpu, a0),
        SYS_GETTIMEOFDAY => sys_gettimeofday(cpu, a0),
        _ => {
            debug!(nr, "unimplemented syscall");
            ENOSYS
        }
    };
    cpu.x[usize::from(REG_A0)] = ret;
}

fn sys_write(cpu: &mut Cpu, fd: u32, buf: u32, count: u32) -> u32 {
    let data = cpu.mem.read_vec(buf, count as usize);
    let done = match fd {
        1 => std::io::stdout().write(&data),
        2 => std::io::stderr().write(&data),
        _ => return EBADF,
    };
    match done {
        Ok(n) => n as u32,
        Err(_) => EBADF,
    }
}

fn sys_read(cpu: &mut Cpu, fd: u32, buf: u32, count: u32) -> u32 {
    if fd != 0 {
        return EBADF;
    }
    let mut data = vec![0u8; count as usize];
    match std::io::stdin().read(&mut data) {
        Ok(n) => {
            cpu.mem.write_slice(buf, &data[..n]);
            n as u32
        }
        Err(_) => EBADF,
    }
}

/// Minimal `fstat`: report a character device so newlib treats the standard
/// streams as a terminal.
fn sys_fstat(cpu: &mut Cpu, fd: u32, stat_addr: u32) -> u32 {
    if fd > 2 {
        return EBADF;
    }
    cpu.mem.zero(stat_addr, 112);
    // st_mode at offset 16 in the RV32 newlib stat layout: S_IFCHR | 0666.
    cpu.mem.write_w(stat_addr + 16, 0o020666);
    0
}

/// Linux-style `brk`: zero queries the current break, anything else moves
/// it. The full guest space is mapped, so no host allocation is involved.
fn sys_brk(cpu: &mut Cpu, addr: u32) -> u32 {
    if addr != 0 {
        cpu.brk = addr;
    }
    cpu.brk
}

fn sys_gettimeofday(cpu: &mut Cpu, tv_addr: u32) -> u32 {
    if tv_addr == 0 {
        return 0;
    }
    let us = u64::try_from(cpu.boot.elapsed().as_micros()).unwrap_or(u64::MAX);
    cpu.mem.write_w(tv_addr, (us / 1_000_000) as u32);
    cpu.mem.write_w(tv_addr + 4, 0);
    cpu.mem.write_w(tv_addr + 8, (us % 1_000_000) as u32);
    cpu.mem.write_w(tv_addr + 12, 0);
    0
}
