//! What the boot loader handed over, behind one interface.
//!
//! The protocol is detected once; every query after that is a single
//! match over the variants.

use log_crate::debug;

use super::info::{FramebufferInfo, VBE_MODE_INVALID};
use super::reloc::RelocPlan;
use crate::consts::Target;
use crate::err::{BootError, Result};
use crate::mem::map::MmapEntry;
use crate::mem::phys::PhysicalMemory;
use crate::mem::size::PAGE;
use crate::mem::PhysicalAddress;
use crate::xen::start_info::StartInfo;

#[cfg(test)]
pub mod fixture;
pub mod multiboot;
pub mod multiboot2;
pub mod vbe;

pub use multiboot::Multiboot;
pub use multiboot2::Multiboot2;

/// Console hints for the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleInfo {
    pub vesa_mode: u32,
    pub framebuffer: Option<FramebufferInfo>,
}

/// Firmware table pointers. Zero means absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FirmwareTables {
    pub acpi_rsdp: u64,
    pub smbios: u64,
    pub uefi_systab: u64,
    pub uefi_arch: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loader {
    Multiboot(Multiboot),
    Multiboot2(Multiboot2),
    Xen(StartInfo),
}

impl Loader {
    /// Pick the protocol from the info pointers the trampoline saved. A v1
    /// pointer wins if both are set.
    pub fn detect<M: PhysicalMemory>(
        mem: &M,
        mb_info: Option<PhysicalAddress>,
        mb2_info: Option<PhysicalAddress>,
    ) -> Result<Loader> {
        let loader = match (mb_info, mb2_info) {
            (Some(info), _) => Loader::Multiboot(Multiboot::new(mem, info)?),
            (None, Some(info)) => Loader::Multiboot2(Multiboot2::new(mem, info)?),
            (None, None) => return Err(BootError::NoLoaderInfo),
        };
        debug!("Loader: {:?}", loader);
        Ok(loader)
    }

    /// A paravirtualized guest's start-info page.
    pub fn xen(start_info: PhysicalAddress, target: Target) -> Loader {
        Loader::Xen(StartInfo::new(start_info, target))
    }

    /// The multiboot version, zero under Xen.
    pub fn version(&self) -> u32 {
        match self {
            Loader::Multiboot(_) => 1,
            Loader::Multiboot2(_) => 2,
            Loader::Xen(_) => 0,
        }
    }

    /// The top-level structure.
    pub fn info_address(&self) -> PhysicalAddress {
        match self {
            Loader::Multiboot(mb) => mb.info(),
            Loader::Multiboot2(mb) => mb.info(),
            Loader::Xen(si) => si.address(),
        }
    }

    pub fn is_xen(&self) -> bool {
        matches!(self, Loader::Xen(_))
    }

    pub fn cmdline<M: PhysicalMemory>(&self, mem: &M) -> Result<Option<PhysicalAddress>> {
        match self {
            Loader::Multiboot(mb) => mb.cmdline(mem),
            Loader::Multiboot2(mb) => mb.cmdline(mem),
            Loader::Xen(si) => Ok(Some(si.cmdline())),
        }
    }

    pub fn module_count<M: PhysicalMemory>(&self, mem: &M) -> Result<usize> {
        match self {
            Loader::Multiboot(mb) => mb.module_count(mem),
            Loader::Multiboot2(mb) => mb.module_count(mem),
            Loader::Xen(si) => Ok(if si.mod_len(mem)? > 0 { 1 } else { 0 }),
        }
    }

    fn check_module<M: PhysicalMemory>(&self, mem: &M, index: usize) -> Result<()> {
        let count = self.module_count(mem)?;
        if index >= count {
            return Err(BootError::IndexOutOfRange {
                what: "module",
                index,
                count,
            });
        }
        Ok(())
    }

    pub fn module_start<M: PhysicalMemory>(&self, mem: &M, index: usize) -> Result<u64> {
        match self {
            Loader::Multiboot(mb) => mb.module_start(mem, index),
            Loader::Multiboot2(mb) => mb.module_start(mem, index),
            Loader::Xen(si) => {
                self.check_module(mem, index)?;
                si.mod_start(mem)
            }
        }
    }

    pub fn module_end<M: PhysicalMemory>(&self, mem: &M, index: usize) -> Result<u64> {
        match self {
            Loader::Multiboot(mb) => mb.module_end(mem, index),
            Loader::Multiboot2(mb) => mb.module_end(mem, index),
            Loader::Xen(si) => {
                self.check_module(mem, index)?;
                Ok(si.mod_start(mem)? + si.mod_len(mem)?)
            }
        }
    }

    pub fn module_cmdline<M: PhysicalMemory>(
        &self,
        mem: &M,
        index: usize,
    ) -> Result<Option<PhysicalAddress>> {
        match self {
            Loader::Multiboot(mb) => mb.module_cmdline(mem, index),
            Loader::Multiboot2(mb) => mb.module_cmdline(mem, index),
            Loader::Xen(_) => {
                self.check_module(mem, index)?;
                Ok(None)
            }
        }
    }

    /// Low and high memory sizes in KiB, for loaders without a full map.
    pub fn basic_meminfo<M: PhysicalMemory>(&self, mem: &M) -> Result<Option<(u32, u32)>> {
        match self {
            Loader::Multiboot(mb) => mb.basic_meminfo(mem),
            Loader::Multiboot2(mb) => mb.basic_meminfo(mem),
            Loader::Xen(_) => Ok(None),
        }
    }

    pub fn mmap_entries<M: PhysicalMemory>(&self, mem: &M) -> Result<usize> {
        match self {
            Loader::Multiboot(mb) => mb.mmap_entries(mem),
            Loader::Multiboot2(mb) => mb.mmap_entries(mem),
            Loader::Xen(_) => Ok(1),
        }
    }

    /// Entry `index` of the memory map. A guest sees its pages as one
    /// contiguous region starting at zero.
    pub fn mmap_entry<M: PhysicalMemory>(&self, mem: &M, index: usize) -> Result<MmapEntry> {
        match self {
            Loader::Multiboot(mb) => mb.mmap_entry(mem, index),
            Loader::Multiboot2(mb) => mb.mmap_entry(mem, index),
            Loader::Xen(si) => {
                if index != 0 {
                    return Err(BootError::IndexOutOfRange {
                        what: "memory map",
                        index,
                        count: 1,
                    });
                }
                Ok(MmapEntry::new(0, si.nr_pages(mem)? * PAGE, MmapEntry::USABLE))
            }
        }
    }

    pub fn mmap_get_base<M: PhysicalMemory>(&self, mem: &M, index: usize) -> Result<u64> {
        self.mmap_entry(mem, index).map(|e| e.base)
    }

    pub fn mmap_get_length<M: PhysicalMemory>(&self, mem: &M, index: usize) -> Result<u64> {
        self.mmap_entry(mem, index).map(|e| e.length)
    }

    pub fn mmap_get_type<M: PhysicalMemory>(&self, mem: &M, index: usize) -> Result<u32> {
        self.mmap_entry(mem, index).map(|e| e.entry_type)
    }

    /// The highest address the loader's own structures reach, if known.
    pub fn highest_addr<M: PhysicalMemory>(&self, mem: &M) -> Result<Option<u64>> {
        match self {
            Loader::Multiboot(mb) => mb.highest_addr(mem),
            Loader::Multiboot2(mb) => Ok(Some(mb.highest_addr())),
            Loader::Xen(_) => Ok(None),
        }
    }

    /// ACPI, SMBIOS and UEFI pointers. Only v2 carries them.
    pub fn firmware_tables<M: PhysicalMemory>(&self, mem: &M) -> Result<FirmwareTables> {
        match self {
            Loader::Multiboot2(mb) => mb.firmware_tables(mem),
            _ => Ok(FirmwareTables::default()),
        }
    }

    pub fn console_info<M: PhysicalMemory>(&self, mem: &M) -> Result<ConsoleInfo> {
        match self {
            Loader::Multiboot(mb) => mb.console_info(mem),
            Loader::Multiboot2(mb) => mb.console_info(mem),
            Loader::Xen(_) => Ok(ConsoleInfo {
                vesa_mode: VBE_MODE_INVALID,
                framebuffer: None,
            }),
        }
    }

    /// Add everything that should move to `plan`. Under Xen nothing does.
    pub fn plan_relocation<M: PhysicalMemory>(&self, mem: &M, plan: &mut RelocPlan) -> Result<()> {
        match self {
            Loader::Multiboot(mb) => mb.plan_relocation(mem, plan),
            Loader::Multiboot2(mb) => mb.plan_relocation(mem, plan),
            Loader::Xen(_) => Ok(()),
        }
    }

    /// The same loader, over info that now lives at `info`.
    pub fn relocated<M: PhysicalMemory>(&self, mem: &M, info: PhysicalAddress) -> Result<Loader> {
        Ok(match self {
            Loader::Multiboot(_) => Loader::Multiboot(Multiboot::new(mem, info)?),
            Loader::Multiboot2(_) => Loader::Multiboot2(Multiboot2::new(mem, info)?),
            Loader::Xen(si) => Loader::Xen(*si),
        })
    }
}
