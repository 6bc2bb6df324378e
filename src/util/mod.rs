pub mod arch;

pub use arch::{cpuid, register};
#[cfg(all(feature = "xpv", target_arch = "x86_64", not(test)))]
pub use arch::hypercall;

/// Halt the processor forever.
#[cfg(not(test))]
pub fn halt_loop() -> ! {
    loop {
        // SAFETY: `hlt` only waits for the next interrupt, and none are enabled.
        unsafe { core::arch::asm!("hlt", options(nomem, nostack)) };
    }
}

#[cfg(test)]
pub fn halt_loop() -> ! {
    panic!("Halted.");
}

/// The length of the NUL-terminated string starting at `bytes`, or its full
/// length if it isn't terminated.
pub fn c_strlen(bytes: &[u8]) -> usize {
    bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len())
}
