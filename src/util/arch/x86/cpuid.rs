//! Raw `cpuid` access.

#[cfg(target_arch = "x86")]
use core::arch::x86::__cpuid;
#[cfg(target_arch = "x86_64")]
use core::arch::x86_64::__cpuid;

use spin::Once;

static HIGHEST_BASIC: Once<u32> = Once::new();
static HIGHEST_EXTENDED: Once<u32> = Once::new();

const EXTENDED_BASE: u32 = 0x8000_0000;

fn highest(base: u32) -> u32 {
    let cell = if base >= EXTENDED_BASE {
        &HIGHEST_EXTENDED
    } else {
        &HIGHEST_BASIC
    };
    // SAFETY: `cpuid` has no side effects.
    *cell.call_once(|| unsafe { __cpuid(base) }.eax)
}

/// Query `leaf`, returning `(eax, edx)`, or `None` if the processor doesn't
/// implement it.
pub fn cpuid(leaf: u32) -> Option<(u32, u32)> {
    let base = leaf & EXTENDED_BASE;
    if highest(base) < leaf {
        return None;
    }
    // SAFETY: `cpuid` has no side effects, and the leaf is supported.
    let r = unsafe { __cpuid(leaf) };
    Some((r.eax, r.edx))
}
