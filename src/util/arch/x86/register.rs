//! Control register access.

/// Reload `cr3`, flushing the TLB. Needed after rewriting a PAE top-level
/// table, whose entries the processor caches on load.
#[cfg(not(test))]
pub fn reload_cr3() {
    // SAFETY: Writing back the current value of cr3 only flushes the TLB.
    unsafe {
        core::arch::asm!(
            "mov {tmp}, cr3",
            "mov cr3, {tmp}",
            tmp = out(reg) _,
            options(nostack),
        );
    }
}

#[cfg(test)]
pub fn reload_cr3() {}
