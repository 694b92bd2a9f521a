//! Simulation layer.
//!
//! Everything around the execution core that makes a guest actually run:
//! 1. **Memory:** The flat guest image (collaborator contract of the core).
//! 2. **Loader:** ELF32 image loading and initial stack layout.
//! 3. **Syscalls:** The newlib-style environment-call handlers.
//! 4. **Machine:** The driving step loop tying cache, interpreter and the
//!    JIT tiers together.

/// ELF32 loader and stack initialisation.
pub mod loader;
/// Top-level driver.
pub mod machine;
/// Guest memory image.
pub mod memory;
/// Newlib-style syscall emulation.
pub mod syscall;
