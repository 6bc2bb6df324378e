#![cfg_attr(not(test), no_std)]
#![cfg_attr(test, allow(dead_code))]

#[macro_use]
mod arch;
pub mod io;

pub mod boot;
pub mod consts;
#[cfg(not(test))]
mod entry;
pub mod err;
pub mod mem;
pub mod util;
pub mod xen;

/// Stop for good. A paravirtualized guest asks to be powered off first.
pub fn halt() -> ! {
    #[cfg(all(feature = "xpv", target_arch = "x86_64", not(test)))]
    {
        // SAFETY: Only reached once the hypercall page is set up, which the
        // domain builder does before the first instruction runs.
        let mut hv = unsafe { xen::HostHypervisor::new() };
        xen::power_off(&mut hv);
    }
    util::halt_loop()
}
