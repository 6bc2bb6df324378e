//! Multiboot v1: one fixed info block pointing at side tables.

use bitflags::bitflags;
use log_crate::warn;

use super::{vbe, ConsoleInfo};
use crate::boot::info::VBE_MODE_INVALID;
use crate::boot::reloc::{Fixup, RelocPlan};
use crate::consts::MAX_MODULES;
use crate::err::{BootError, Result};
use crate::mem::map::MmapEntry;
use crate::mem::phys::PhysicalMemory;
use crate::mem::PhysicalAddress;

/// Boot loader magic in `eax` at entry.
pub const MAGIC: u32 = 0x2bad_b002;

/// Size of the info block.
pub const INFO_SIZE: u64 = 88;

/// Size of a module table entry.
pub const MODULE_SIZE: u64 = 16;

/// The largest drives blob worth keeping. Some loaders leave the length
/// uninitialized.
pub const DRIVES_LENGTH_MAX: u32 = 2128;

bitflags! {
    /// Which info block fields are valid.
    pub struct InfoFlags: u32 {
        const MEMORY = 1;
        const BOOT_DEVICE = 1 << 1;
        const CMDLINE = 1 << 2;
        const MODS = 1 << 3;
        const AOUT_SYMS = 1 << 4;
        const ELF_SHDR = 1 << 5;
        const MEM_MAP = 1 << 6;
        const DRIVE_INFO = 1 << 7;
        const CONFIG_TABLE = 1 << 8;
        const BOOT_LOADER_NAME = 1 << 9;
        const APM_TABLE = 1 << 10;
        const VIDEO_INFO = 1 << 11;
        const FRAMEBUFFER_INFO = 1 << 12;
    }
}

/// Field offsets in the info block.
pub mod offset {
    pub const FLAGS: u64 = 0;
    pub const MEM_LOWER: u64 = 4;
    pub const MEM_UPPER: u64 = 8;
    pub const CMDLINE: u64 = 16;
    pub const MODS_COUNT: u64 = 20;
    pub const MODS_ADDR: u64 = 24;
    pub const SHDR_NUM: u64 = 28;
    pub const SHDR_SIZE: u64 = 32;
    pub const SHDR_ADDR: u64 = 36;
    pub const MMAP_LENGTH: u64 = 44;
    pub const MMAP_ADDR: u64 = 48;
    pub const DRIVES_LENGTH: u64 = 52;
    pub const DRIVES_ADDR: u64 = 56;
    pub const CONFIG_TABLE: u64 = 60;
    pub const BOOT_LOADER_NAME: u64 = 64;
    pub const VBE_CONTROL_INFO: u64 = 72;
    pub const VBE_MODE_INFO: u64 = 76;
    pub const VBE_MODE: u64 = 80;

    // Module table entries.
    pub const MOD_START: u64 = 0;
    pub const MOD_END: u64 = 4;
    pub const MOD_CMDLINE: u64 = 8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Multiboot {
    info: PhysicalAddress,
    flags: InfoFlags,
}

impl Multiboot {
    pub fn new<M: PhysicalMemory>(mem: &M, info: PhysicalAddress) -> Result<Multiboot> {
        let flags = InfoFlags::from_bits_truncate(mem.read_u32(info + offset::FLAGS)?);
        Ok(Multiboot { info, flags })
    }

    pub fn info(&self) -> PhysicalAddress {
        self.info
    }

    pub fn flags(&self) -> InfoFlags {
        self.flags
    }

    fn field<M: PhysicalMemory>(&self, mem: &M, off: u64) -> Result<u32> {
        mem.read_u32(self.info + off)
    }

    fn pointer<M: PhysicalMemory>(&self, mem: &M, off: u64) -> Result<PhysicalAddress> {
        self.field(mem, off).map(|p| PhysicalAddress::new(u64::from(p)))
    }

    pub fn cmdline<M: PhysicalMemory>(&self, mem: &M) -> Result<Option<PhysicalAddress>> {
        if !self.flags.contains(InfoFlags::CMDLINE) {
            return Ok(None);
        }
        self.pointer(mem, offset::CMDLINE).map(Some)
    }

    pub fn module_count<M: PhysicalMemory>(&self, mem: &M) -> Result<usize> {
        if !self.flags.contains(InfoFlags::MODS) {
            return Ok(0);
        }
        self.field(mem, offset::MODS_COUNT).map(|n| n as usize)
    }

    fn module_field<M: PhysicalMemory>(&self, mem: &M, index: usize, off: u64) -> Result<u32> {
        let count = self.module_count(mem)?;
        if index >= count {
            return Err(BootError::IndexOutOfRange {
                what: "module",
                index,
                count,
            });
        }
        let table = self.pointer(mem, offset::MODS_ADDR)?;
        mem.read_u32(table + index as u64 * MODULE_SIZE + off)
    }

    pub fn module_start<M: PhysicalMemory>(&self, mem: &M, index: usize) -> Result<u64> {
        self.module_field(mem, index, offset::MOD_START).map(u64::from)
    }

    pub fn module_end<M: PhysicalMemory>(&self, mem: &M, index: usize) -> Result<u64> {
        self.module_field(mem, index, offset::MOD_END).map(u64::from)
    }

    pub fn module_cmdline<M: PhysicalMemory>(
        &self,
        mem: &M,
        index: usize,
    ) -> Result<Option<PhysicalAddress>> {
        let p = self.module_field(mem, index, offset::MOD_CMDLINE)?;
        Ok(if p == 0 {
            None
        } else {
            Some(PhysicalAddress::new(u64::from(p)))
        })
    }

    pub fn basic_meminfo<M: PhysicalMemory>(&self, mem: &M) -> Result<Option<(u32, u32)>> {
        if !self.flags.contains(InfoFlags::MEMORY) {
            return Ok(None);
        }
        Ok(Some((
            self.field(mem, offset::MEM_LOWER)?,
            self.field(mem, offset::MEM_UPPER)?,
        )))
    }

    /// The memory map as `(start, end)`, if there is one.
    fn mmap_bounds<M: PhysicalMemory>(&self, mem: &M) -> Result<Option<(u64, u64)>> {
        if !self.flags.contains(InfoFlags::MEM_MAP) {
            return Ok(None);
        }
        let start = u64::from(self.field(mem, offset::MMAP_ADDR)?);
        let len = u64::from(self.field(mem, offset::MMAP_LENGTH)?);
        Ok(Some((start, start + len)))
    }

    /// Map entries carry their own size, which doesn't count the size
    /// field itself.
    fn next_entry<M: PhysicalMemory>(mem: &M, entry: u64) -> Result<u64> {
        let size = mem.read_u32(PhysicalAddress::new(entry))?;
        Ok(entry + u64::from(size) + 4)
    }

    pub fn mmap_entries<M: PhysicalMemory>(&self, mem: &M) -> Result<usize> {
        let (mut p, end) = match self.mmap_bounds(mem)? {
            Some(bounds) => bounds,
            None => return Ok(0),
        };
        let mut count = 0;
        while p < end {
            count += 1;
            p = Self::next_entry(mem, p)?;
        }
        Ok(count)
    }

    pub fn mmap_entry<M: PhysicalMemory>(&self, mem: &M, index: usize) -> Result<MmapEntry> {
        let (mut p, end) = self.mmap_bounds(mem)?.unwrap_or((0, 0));
        let mut i = 0;
        while p < end && i != index {
            p = Self::next_entry(mem, p)?;
            i += 1;
        }
        if p >= end {
            return Err(BootError::IndexOutOfRange {
                what: "memory map",
                index,
                count: i,
            });
        }

        let entry = PhysicalAddress::new(p);
        Ok(MmapEntry::new(
            mem.read_u64(entry + 4)?,
            mem.read_u64(entry + 12)?,
            mem.read_u32(entry + 20)?,
        ))
    }

    /// The highest address the loader's structures are known to reach.
    pub fn highest_addr<M: PhysicalMemory>(&self, mem: &M) -> Result<Option<u64>> {
        if let Some(cmdline) = self.cmdline(mem)? {
            return Ok(Some(cmdline.raw() + mem.strlen(cmdline)? + 1));
        }
        Ok(self.mmap_bounds(mem)?.map(|(_, end)| end))
    }

    pub fn console_info<M: PhysicalMemory>(&self, mem: &M) -> Result<ConsoleInfo> {
        if !self.flags.contains(InfoFlags::VIDEO_INFO) {
            return Ok(ConsoleInfo {
                vesa_mode: VBE_MODE_INVALID,
                framebuffer: None,
            });
        }

        let controller = self.pointer(mem, offset::VBE_CONTROL_INFO)?;
        let mode = self.pointer(mem, offset::VBE_MODE_INFO)?;
        let framebuffer = if controller.raw() != 0 && mode.raw() != 0 {
            Some(vbe::framebuffer(mem, controller, mode)?)
        } else {
            None
        };
        Ok(ConsoleInfo {
            vesa_mode: u32::from(mem.read_u16(self.info + offset::VBE_MODE)?),
            framebuffer,
        })
    }

    /// Lay out the copy of the info block and everything it points at.
    /// Modules come last, names before bodies, since moving a body is the
    /// likeliest thing to overwrite something else.
    pub fn plan_relocation<M: PhysicalMemory>(&self, mem: &M, plan: &mut RelocPlan) -> Result<()> {
        let info = plan.structure("multiboot info", self.info.raw(), INFO_SIZE, None)?;
        let f = self.flags;

        if let Some(cmdline) = self.cmdline(mem)? {
            let len = mem.strlen(cmdline)? + 1;
            plan.structure("cmdline", cmdline.raw(), len, Some(Fixup::new(info, offset::CMDLINE)))?;
        }

        if f.contains(InfoFlags::ELF_SHDR) {
            let len = u64::from(self.field(mem, offset::SHDR_NUM)?)
                * u64::from(self.field(mem, offset::SHDR_SIZE)?);
            let addr = self.field(mem, offset::SHDR_ADDR)?;
            if len != 0 && addr != 0 {
                let at = Some(Fixup::new(info, offset::SHDR_ADDR));
                plan.structure("ELF section headers", u64::from(addr), len, at)?;
            }
        }

        if let Some((start, end)) = self.mmap_bounds(mem)? {
            let at = Some(Fixup::new(info, offset::MMAP_ADDR));
            plan.structure("mmap", start, end - start, at)?;
        }

        let drives = self.field(mem, offset::DRIVES_LENGTH)?;
        if drives > DRIVES_LENGTH_MAX {
            warn!("Drives length 0x{:x} is too large, leaving them in place.", drives);
        } else if drives > 0 {
            let addr = self.field(mem, offset::DRIVES_ADDR)?;
            let at = Some(Fixup::new(info, offset::DRIVES_ADDR));
            plan.structure("drives", u64::from(addr), u64::from(drives), at)?;
        }

        if f.contains(InfoFlags::VIDEO_INFO) {
            let controller = self.field(mem, offset::VBE_CONTROL_INFO)?;
            let mode = self.field(mem, offset::VBE_MODE_INFO)?;
            if controller != 0 && mode != 0 {
                plan.structure(
                    "VBE controller info",
                    u64::from(controller),
                    vbe::CONTROLLER_INFO_SIZE,
                    Some(Fixup::new(info, offset::VBE_CONTROL_INFO)),
                )?;
                plan.structure(
                    "VBE mode info",
                    u64::from(mode),
                    vbe::MODE_INFO_SIZE,
                    Some(Fixup::new(info, offset::VBE_MODE_INFO)),
                )?;
            }
        }

        if f.contains(InfoFlags::CONFIG_TABLE) {
            let table = self.pointer(mem, offset::CONFIG_TABLE)?;
            if table.raw() != 0 {
                // The table starts with its own length.
                let len = u64::from(mem.read_u16(table)?);
                let at = Some(Fixup::new(info, offset::CONFIG_TABLE));
                plan.structure("config table", table.raw(), len, at)?;
            }
        }

        if f.contains(InfoFlags::BOOT_LOADER_NAME) {
            let name = self.pointer(mem, offset::BOOT_LOADER_NAME)?;
            let len = mem.strlen(name)? + 1;
            let at = Some(Fixup::new(info, offset::BOOT_LOADER_NAME));
            plan.structure("boot loader name", name.raw(), len, at)?;
        }

        let count = self.module_count(mem)?;
        if count == 0 {
            return Ok(());
        }
        if count > MAX_MODULES {
            return Err(BootError::TooManyModules(count));
        }

        let table = plan.structure(
            "module table",
            u64::from(self.field(mem, offset::MODS_ADDR)?),
            count as u64 * MODULE_SIZE,
            Some(Fixup::new(info, offset::MODS_ADDR)),
        )?;
        for i in 0..count {
            if let Some(name) = self.module_cmdline(mem, i)? {
                let at = Some(Fixup::new(table, i as u64 * MODULE_SIZE + offset::MOD_CMDLINE));
                plan.structure("module name", name.raw(), mem.strlen(name)? + 1, at)?;
            }
        }
        for i in 0..count {
            let start = self.module_start(mem, i)?;
            let end = self.module_end(mem, i)?;
            if start > end {
                return Err(BootError::ModuleStartAfterEnd {
                    index: i,
                    start,
                    end,
                });
            }
            let entry = i as u64 * MODULE_SIZE;
            plan.module(
                start,
                end - start,
                Fixup::new(table, entry + offset::MOD_START),
                Fixup::new(table, entry + offset::MOD_END),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::super::fixture::Multiboot1Fixture;
    use super::{InfoFlags, Multiboot};
    use crate::boot::info::{FB_TYPE_RGB, VBE_MODE_INVALID};
    use crate::err::BootError;
    use crate::mem::fake::FakeMemory;
    use crate::mem::map::MmapEntry;
    use crate::mem::PhysicalAddress;

    fn loader(mem: &FakeMemory, fx: &Multiboot1Fixture) -> Multiboot {
        Multiboot::new(mem, PhysicalAddress::new(fx.info())).unwrap()
    }

    #[test]
    fn cmdline_and_highest_addr() {
        let mut mem = FakeMemory::new(0, 0x10_0000);
        let mut fx = Multiboot1Fixture::new(&mut mem, 0x9000);
        let cmdline = fx.cmdline(&mut mem, "/platform/kernel prom_debug");

        let mb = loader(&mem, &fx);
        assert!(mb.flags().contains(InfoFlags::CMDLINE));
        assert_eq!(mb.cmdline(&mem).unwrap(), Some(PhysicalAddress::new(cmdline)));
        assert_eq!(mb.highest_addr(&mem).unwrap(), Some(cmdline + 28));
    }

    #[test]
    fn no_cmdline_falls_back_to_mmap_end() {
        let mut mem = FakeMemory::new(0, 0x10_0000);
        let mut fx = Multiboot1Fixture::new(&mut mem, 0x9000);
        let map = fx.mmap(&mut mem, &[(0, 0x9fc00, 1), (0x10_0000, 0x7f0_0000, 1)]);

        let mb = loader(&mem, &fx);
        assert_eq!(mb.cmdline(&mem).unwrap(), None);
        assert_eq!(mb.highest_addr(&mem).unwrap(), Some(map + 48));
    }

    #[test]
    fn mmap_walk() {
        let mut mem = FakeMemory::new(0, 0x10_0000);
        let mut fx = Multiboot1Fixture::new(&mut mem, 0x9000);
        fx.mmap(
            &mut mem,
            &[(0, 0x9fc00, 1), (0x9fc00, 0x400, 2), (0x10_0000, 0x7f0_0000, 1)],
        );

        let mb = loader(&mem, &fx);
        assert_eq!(mb.mmap_entries(&mem).unwrap(), 3);
        assert_eq!(
            mb.mmap_entry(&mem, 1).unwrap(),
            MmapEntry::new(0x9fc00, 0x400, 2)
        );
        assert!(matches!(
            mb.mmap_entry(&mem, 3),
            Err(BootError::IndexOutOfRange { index: 3, .. })
        ));
    }

    #[test]
    fn modules() {
        let mut mem = FakeMemory::new(0, 0x10_0000);
        let mut fx = Multiboot1Fixture::new(&mut mem, 0x9000);
        fx.modules(
            &mut mem,
            &[(0x2_0000, 0x2_3000, Some("/boot_archive")), (0x3_0000, 0x3_0800, None)],
        );

        let mb = loader(&mem, &fx);
        assert_eq!(mb.module_count(&mem).unwrap(), 2);
        assert_eq!(mb.module_start(&mem, 0).unwrap(), 0x2_0000);
        assert_eq!(mb.module_end(&mem, 1).unwrap(), 0x3_0800);
        assert!(mb.module_cmdline(&mem, 0).unwrap().is_some());
        assert_eq!(mb.module_cmdline(&mem, 1).unwrap(), None);
        assert_eq!(
            mb.module_start(&mem, 2),
            Err(BootError::IndexOutOfRange {
                what: "module",
                index: 2,
                count: 2
            })
        );
    }

    #[test]
    fn meminfo_only_with_flag() {
        let mut mem = FakeMemory::new(0, 0x10_0000);
        let mut fx = Multiboot1Fixture::new(&mut mem, 0x9000);
        assert_eq!(loader(&mem, &fx).basic_meminfo(&mem).unwrap(), None);

        fx.meminfo(&mut mem, 639, 130_048);
        assert_eq!(loader(&mem, &fx).basic_meminfo(&mem).unwrap(), Some((639, 130_048)));
    }

    #[test]
    fn console_without_video_is_text() {
        let mut mem = FakeMemory::new(0, 0x10_0000);
        let fx = Multiboot1Fixture::new(&mut mem, 0x9000);
        let c = loader(&mem, &fx).console_info(&mem).unwrap();
        assert_eq!(c.vesa_mode, VBE_MODE_INVALID);
        assert_eq!(c.framebuffer, None);
    }

    #[test]
    fn console_from_vbe() {
        let mut mem = FakeMemory::new(0, 0x10_0000);
        let mut fx = Multiboot1Fixture::new(&mut mem, 0x9000);
        fx.vbe(&mut mem, 0x118, 0xfd00_0000, 1024, 768, 32);

        let c = loader(&mem, &fx).console_info(&mem).unwrap();
        assert_eq!(c.vesa_mode, 0x118);
        let fb = c.framebuffer.unwrap();
        assert_eq!(fb.addr, 0xfd00_0000);
        assert_eq!((fb.width, fb.height, fb.bpp, fb.pitch), (1024, 768, 32, 4096));
        assert_eq!(fb.fb_type, FB_TYPE_RGB);
    }
}
