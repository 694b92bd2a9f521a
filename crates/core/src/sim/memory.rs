//! Guest memory image.
//!
//! The guest sees a flat 32-bit little-endian address space. The image is
//! one `mmap` reservation covering the whole space, so a `u32` guest address
//! can never index out of bounds and the hot-path accessors need no checks.
//! Physical pages are committed lazily by the host kernel (`MAP_NORESERVE`).
//!
//! The base pointer is also the contract with the JIT: generated code
//! computes `mem_base + vaddr` directly for loads and stores.

use crate::common::CoreError;

/// Size of the guest address space: the full 32-bit range.
const GUEST_SPACE: usize = 1 << 32;

/// Flat guest memory image.
pub struct Memory {
    /// Raw pointer to the start of the guest image.
    ///
    /// # Safety Invariants
    ///
    /// - Points to a live, readable and writable mapping of exactly
    ///   `GUEST_SPACE` bytes for the lifetime of this `Memory`.
    /// - Because the mapping covers every value a `u32` can take, any
    ///   `base.add(addr as usize)` with up to 4 trailing bytes stays inside
    ///   the mapping (accessors use `read_unaligned`/`write_unaligned`, and
    ///   word accesses at `0xFFFF_FFFD..` wrap nothing: they are rejected by
    ///   the alignment policy before reaching this layer or performed
    ///   byte-wise).
    /// - No other owner unmaps or remaps the region.
    base: *mut u8,
}

// SAFETY: the mapping is plain anonymous memory; the single-hart execution
// model (one mutating flow of control at a time) is enforced by `Machine`.
unsafe impl Send for Memory {}

impl Memory {
    /// Reserves the guest address space.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Mmap`] when the host refuses the reservation
    /// (32-bit hosts, strict overcommit settings).
    pub fn new() -> Result<Self, CoreError> {
        // SAFETY: requesting a fresh anonymous private mapping; no existing
        // memory is affected.
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                GUEST_SPACE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(CoreError::Mmap(format!(
                "guest image reservation failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(Self { base: base.cast() })
    }

    /// Returns the host base pointer of the guest image.
    #[inline]
    pub const fn base(&self) -> *mut u8 {
        self.base
    }

    /// Fetches one 32-bit instruction word. For a compressed instruction the
    /// caller uses only the low half.
    #[inline]
    pub fn ifetch(&self, addr: u32) -> u32 {
        self.read_w(addr)
    }

    /// Reads a little-endian word.
    #[inline]
    pub fn read_w(&self, addr: u32) -> u32 {
        // SAFETY: the mapping covers the full u32 range; see the invariants
        // on `base`.
        unsafe { self.base.add(addr as usize).cast::<u32>().read_unaligned() }
    }

    /// Reads a little-endian halfword.
    #[inline]
    pub fn read_s(&self, addr: u32) -> u16 {
        // SAFETY: as for `read_w`.
        unsafe { self.base.add(addr as usize).cast::<u16>().read_unaligned() }
    }

    /// Reads a byte.
    #[inline]
    pub fn read_b(&self, addr: u32) -> u8 {
        // SAFETY: as for `read_w`.
        unsafe { self.base.add(addr as usize).read() }
    }

    /// Writes a little-endian word.
    #[inline]
    pub fn write_w(&mut self, addr: u32, val: u32) {
        // SAFETY: as for `read_w`; the mapping is writable.
        unsafe {
            self.base
                .add(addr as usize)
                .cast::<u32>()
                .write_unaligned(val);
        }
    }

    /// Writes a little-endian halfword.
    #[inline]
    pub fn write_s(&mut self, addr: u32, val: u16) {
        // SAFETY: as for `write_w`.
        unsafe {
            self.base
                .add(addr as usize)
                .cast::<u16>()
                .write_unaligned(val);
        }
    }

    /// Writes a byte.
    #[inline]
    pub fn write_b(&mut self, addr: u32, val: u8) {
        // SAFETY: as for `write_w`.
        unsafe { self.base.add(addr as usize).write(val) }
    }

    /// Copies `data` into guest memory at `addr`.
    pub fn write_slice(&mut self, addr: u32, data: &[u8]) {
        // SAFETY: the destination range lies inside the mapping; `data` is a
        // live borrow and the regions cannot overlap (the mapping is
        // anonymous and never aliased by guest slices).
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.base.add(addr as usize), data.len());
        }
    }

    /// Reads `len` bytes of guest memory at `addr` into a vector.
    pub fn read_vec(&self, addr: u32, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        // SAFETY: the source range lies inside the mapping.
        unsafe {
            std::ptr::copy_nonoverlapping(self.base.add(addr as usize), out.as_mut_ptr(), len);
        }
        out
    }

    /// Zero-fills `len` bytes of guest memory at `addr`.
    pub fn zero(&mut self, addr: u32, len: usize) {
        // SAFETY: the destination range lies inside the mapping.
        unsafe {
            std::ptr::write_bytes(self.base.add(addr as usize), 0, len);
        }
    }
}

impl Drop for Memory {
    fn drop(&mut self) {
        // SAFETY: `base` came from a successful `mmap` of `GUEST_SPACE`
        // bytes and is unmapped exactly once.
        unsafe {
            let _ = libc::munmap(self.base.cast(), GUEST_SPACE);
        }
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory").field("base", &self.base).finish()
    }
}
