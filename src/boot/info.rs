//! The structures handed to the kernel.
//!
//! Pointers are stored as 64-bit values so the same layout serves both
//! kernel widths.

use core::mem::size_of;

use bitflags::bitflags;
use static_assertions::const_assert_eq;

use crate::consts::MAX_MODULES;
use crate::mem::map::MemoryLists;

/// `vesa_mode` when no VBE mode is known.
pub const VBE_MODE_INVALID: u32 = 0xffff;

/// `uefi_arch` values.
pub const UEFI_ARCH_NONE: u32 = 0;
pub const UEFI_ARCH_32: u32 = 1;
pub const UEFI_ARCH_64: u32 = 2;

/// A boot module's location.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub addr: u64,
    pub size: u64,
}

const_assert_eq!(size_of::<ModuleDescriptor>(), 16);

/// Framebuffer `fb_type` values.
pub const FB_TYPE_INDEXED: u8 = 0;
pub const FB_TYPE_RGB: u8 = 1;
pub const FB_TYPE_EGA_TEXT: u8 = 2;

/// A linear framebuffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramebufferInfo {
    pub addr: u64,
    pub pitch: u32,
    pub width: u32,
    pub height: u32,
    pub bpp: u8,
    pub fb_type: u8,
    pub reserved: u16,
}

const_assert_eq!(size_of::<FramebufferInfo>(), 24);

impl FramebufferInfo {
    /// The bytes the visible screen covers.
    pub fn extent(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * u64::from(self.bpp / 8)
    }
}

/// Everything the kernel learns from the bootstrap.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootInfo {
    pub next_paddr: u64,
    pub next_vaddr: u64,
    pub cmdline: u64,
    pub phys_install: u64,
    pub rsvdmem: u64,
    pub pcimem: u64,
    pub modules: u64,
    pub top_page_table: u64,
    pub pt_window: u64,
    pub pte_to_pt_window: u64,
    pub kseg_size: u64,
    pub mb_info: u64,
    pub framebuffer_info: u64,
    pub acpi_rsdp: u64,
    pub smbios: u64,
    pub uefi_systab: u64,
    pub xen_start_info: u64,
    pub shared_info: u64,
    pub module_cnt: u32,
    pub use_largepage: u32,
    pub use_pae: u32,
    pub use_pge: u32,
    pub use_nx: u32,
    pub vesa_mode: u32,
    pub mb_version: u32,
    pub uefi_arch: u32,
}

const_assert_eq!(size_of::<BootInfo>() % 8, 0);

bitflags! {
    /// Paging features the trampoline turns on before entering the kernel.
    #[derive(Default)]
    pub struct HandoffFlags: u32 {
        const USE_PAE = 1;
        const USE_NX = 1 << 1;
        const USE_GLOBAL = 1 << 2;
        const USE_LARGE_PAGE = 1 << 3;
    }
}

/// The kernel's entry point and how to set up paging for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelEntry {
    pub entry_addr_low: u32,
    pub flags: HandoffFlags,
}

/// All storage that outlives the bootstrap and is referenced from
/// [`BootInfo`].
pub struct BootState {
    pub info: BootInfo,
    pub lists: MemoryLists,
    pub modules: [ModuleDescriptor; MAX_MODULES],
    pub framebuffer: FramebufferInfo,
}

impl BootState {
    pub const fn new() -> BootState {
        BootState {
            info: BootInfo {
                next_paddr: 0,
                next_vaddr: 0,
                cmdline: 0,
                phys_install: 0,
                rsvdmem: 0,
                pcimem: 0,
                modules: 0,
                top_page_table: 0,
                pt_window: 0,
                pte_to_pt_window: 0,
                kseg_size: 0,
                mb_info: 0,
                framebuffer_info: 0,
                acpi_rsdp: 0,
                smbios: 0,
                uefi_systab: 0,
                xen_start_info: 0,
                shared_info: 0,
                module_cnt: 0,
                use_largepage: 0,
                use_pae: 0,
                use_pge: 0,
                use_nx: 0,
                vesa_mode: VBE_MODE_INVALID,
                mb_version: 0,
                uefi_arch: UEFI_ARCH_NONE,
            },
            lists: MemoryLists::new(),
            modules: [ModuleDescriptor { addr: 0, size: 0 }; MAX_MODULES],
            framebuffer: FramebufferInfo {
                addr: 0,
                pitch: 0,
                width: 0,
                height: 0,
                bpp: 0,
                fb_type: 0,
                reserved: 0,
            },
        }
    }

    /// The address of the handoff structure, as the kernel will see it.
    pub fn info_address(&self) -> u64 {
        &self.info as *const BootInfo as usize as u64
    }

    pub fn modules_address(&self) -> u64 {
        self.modules.as_ptr() as usize as u64
    }

    pub fn framebuffer_address(&self) -> u64 {
        &self.framebuffer as *const FramebufferInfo as usize as u64
    }
}
