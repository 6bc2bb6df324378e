//! Calls into the hypervisor through the hypercall page.

/// Each hypercall has a 32-byte stub in the page.
const STUB_SIZE: u64 = 32;

extern "C" {
    /// Filled in by the domain builder.
    #[allow(non_upper_case_globals)]
    static hypercall_page: u8;
}

/// Make hypercall `op` with up to four arguments.
///
/// # Safety
/// The arguments must be valid for `op`, including any pointers.
pub unsafe fn hypercall4(op: u64, a1: u64, a2: u64, a3: u64, a4: u64) -> i64 {
    let stub = (&hypercall_page as *const u8 as u64) + op * STUB_SIZE;
    let ret: i64;
    core::arch::asm!(
        "call {stub}",
        stub = in(reg) stub,
        inlateout("rdi") a1 => _,
        inlateout("rsi") a2 => _,
        inlateout("rdx") a3 => _,
        inlateout("r10") a4 => _,
        lateout("rax") ret,
        lateout("rcx") _,
        lateout("r11") _,
    );
    ret
}
