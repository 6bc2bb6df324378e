// Global constants. Addresses here are fixed by the kernel's linker script.

use crate::mem::size::{KB, MB};

pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "+", env!("GIT_HASH"));

pub const ONE_MEG: u64 = MB;
pub const TWO_MEG: u64 = 2 * MB;
pub const FOUR_MEG: u64 = 4 * MB;
pub const ONE_GIG: u64 = 1024 * MB;
pub const FOUR_GIG: u64 = 4 * ONE_GIG;

/// Where an amd64 kernel expects its nucleus.
pub const KERNEL_TEXT_AMD64: u64 = 0xFFFF_FFFF_FB80_0000;
/// Where a 32-bit kernel expects its nucleus.
pub const KERNEL_TEXT_I386: u64 = 0xFE80_0000;
/// Where a 32-bit paravirtualized kernel expects its nucleus.
pub const KERNEL_TEXT_I386_XPV: u64 = 0xF4C0_0000;

/// Physical load address of the nucleus on bare metal.
pub const KTEXT_PHYS: u64 = FOUR_MEG;
/// Size of the nucleus mapping.
pub const NUCLEUS_SIZE: u64 = 2 * FOUR_MEG;
/// Size of the kernel segment reported to the kernel.
pub const KSEG_SIZE: u64 = FOUR_MEG;

/// Capacity of each memory list.
pub const MAX_MEMLIST: usize = 200;
/// Maximum number of boot modules.
pub const MAX_MODULES: usize = 10;
/// Capacity of the static buffer loader structures are relocated into.
pub const RELOC_BUFFER_SIZE: usize = 4 * KB as usize;

/// The range PCI devices may be placed in, before subtracting memory.
pub const PCI_LO: u64 = 0x10_0000;
pub const PCI_HI: u64 = 0xFFF0_0000;

/// The legacy region identity mapped on bare metal.
pub const LEGACY_END: u64 = ONE_MEG;

/// The kernel flavour being booted.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Target {
    Amd64,
    I386,
}

impl Target {
    /// The target selected at build time.
    pub const fn current() -> Target {
        if cfg!(feature = "i386") {
            Target::I386
        } else {
            Target::Amd64
        }
    }

    /// The virtual address the kernel nucleus is linked at.
    pub const fn kernel_text(self, paravirtualized: bool) -> u64 {
        match (self, paravirtualized) {
            (Target::Amd64, _) => KERNEL_TEXT_AMD64,
            (Target::I386, false) => KERNEL_TEXT_I386,
            (Target::I386, true) => KERNEL_TEXT_I386_XPV,
        }
    }

    pub const fn is_64bit(self) -> bool {
        matches!(self, Target::Amd64)
    }
}
