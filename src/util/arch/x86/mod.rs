pub mod cpuid;
#[cfg(all(feature = "xpv", target_arch = "x86_64", not(test)))]
pub mod hypercall;
pub mod register;
