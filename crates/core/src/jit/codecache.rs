//! Executable code cache.
//!
//! One `mmap` region holding the prologue/epilogue stubs followed by every
//! translated fragment of the current generation. The region is mapped
//! read+write+execute (`MAP_JIT` on Apple, where the effective protection is
//! toggled per thread around a whole translation pass rather than per emit).

use crate::common::CoreError;

/// Executable mapping for generated code.
pub struct CodeCache {
    base: *mut u8,
    size: usize,
}

// SAFETY: the mapping is anonymous memory private to the process; the
// single-threaded translate/run discipline is enforced by the driver.
unsafe impl Send for CodeCache {}

impl CodeCache {
    /// Maps an executable region of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Mmap`] when the host refuses an executable
    /// mapping.
    pub fn new(size: usize) -> Result<Self, CoreError> {
        #[cfg(target_os = "macos")]
        let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_JIT;
        #[cfg(not(target_os = "macos"))]
        let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

        // SAFETY: fresh anonymous mapping, no existing memory affected.
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                flags,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(CoreError::Mmap(format!(
                "code cache mapping failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(Self {
            base: base.cast(),
            size,
        })
    }

    /// Host address of the cache base (the prologue entry point).
    #[inline]
    pub const fn base(&self) -> *mut u8 {
        self.base
    }

    /// Size of the mapping in bytes.
    #[inline]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Copies `data` to `offset`. The caller guarantees the range fits.
    #[inline]
    pub fn write(&mut self, offset: u32, data: &[u8]) {
        debug_assert!(offset as usize + data.len() <= self.size);
        // SAFETY: in-bounds per the debug assertion, upheld by the emit
        // layer's overflow check; the region is writable.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.base.add(offset as usize), data.len());
        }
    }

    /// Reads back a 32-bit word at `offset` (branch patching).
    #[inline]
    pub fn read_u32(&self, offset: u32) -> u32 {
        debug_assert!(offset as usize + 4 <= self.size);
        // SAFETY: in-bounds; the region is readable.
        unsafe {
            self.base
                .add(offset as usize)
                .cast::<u32>()
                .read_unaligned()
        }
    }

    /// Enters the thread-local writable state. On Apple aarch64 this flips
    /// the JIT write protection once per translation pass; elsewhere the
    /// mapping is always writable.
    pub fn enter_write_mode(&self) {
        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        // SAFETY: toggling the calling thread's JIT write permission.
        unsafe {
            libc::pthread_jit_write_protect_np(0);
        }
    }

    /// Leaves the writable state and makes the region executable again for
    /// this thread.
    pub fn exit_write_mode(&self) {
        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        // SAFETY: toggling the calling thread's JIT write permission.
        unsafe {
            libc::pthread_jit_write_protect_np(1);
        }
    }

    /// Performs the instruction-cache maintenance sequence over
    /// `[start, end)` after patching. Required on aarch64; x86-64 caches
    /// are coherent.
    #[allow(unused_variables)]
    pub fn invalidate_icache(&self, start: u32, end: u32) {
        #[cfg(target_arch = "aarch64")]
        {
            let line = 64usize;
            let begin = self.base as usize + start as usize;
            let finish = self.base as usize + end as usize;
            let mut p = begin & !(line - 1);
            // DC CVAU over the range, then DSB, then IC IVAU, DSB, ISB.
            while p < finish {
                // SAFETY: cache-maintenance instructions over addresses
                // inside the live mapping.
                unsafe {
                    core::arch::asm!("dc cvau, {0}", in(reg) p);
                }
                p += line;
            }
            // SAFETY: barrier instructions with no memory operands.
            unsafe {
                core::arch::asm!("dsb ish");
            }
            p = begin & !(line - 1);
            while p < finish {
                // SAFETY: as above.
                unsafe {
                    core::arch::asm!("ic ivau, {0}", in(reg) p);
                }
                p += line;
            }
            // SAFETY: as above.
            unsafe {
                core::arch::asm!("dsb ish");
                core::arch::asm!("isb");
            }
        }
    }
}

impl Drop for CodeCache {
    fn drop(&mut self) {
        // SAFETY: `base` came from a successful `mmap` of `size` bytes.
        unsafe {
            let _ = libc::munmap(self.base.cast(), self.size);
        }
    }
}

impl std::fmt::Debug for CodeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeCache")
            .field("base", &self.base)
            .field("size", &self.size)
            .finish()
    }
}
