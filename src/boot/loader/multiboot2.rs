//! Multiboot v2: a contiguous stream of tagged records.

use super::{vbe, ConsoleInfo, FirmwareTables};
use crate::boot::info::{FramebufferInfo, UEFI_ARCH_32, UEFI_ARCH_64, VBE_MODE_INVALID};
use crate::boot::reloc::{Fixup, RelocPlan};
use crate::consts::MAX_MODULES;
use crate::err::{BootError, Result};
use crate::mem::map::MmapEntry;
use crate::mem::phys::PhysicalMemory;
use crate::mem::{align_up, PhysicalAddress};

/// Boot loader magic in `eax` at entry.
pub const MAGIC: u32 = 0x36d7_6289;

/// Tags start after `total_size` and a reserved word.
const HEADER_SIZE: u64 = 8;
const TAG_ALIGN: u64 = 8;

pub mod tag {
    pub const END: u32 = 0;
    pub const CMDLINE: u32 = 1;
    pub const BOOT_LOADER_NAME: u32 = 2;
    pub const MODULE: u32 = 3;
    pub const BASIC_MEMINFO: u32 = 4;
    pub const MMAP: u32 = 6;
    pub const VBE: u32 = 7;
    pub const FRAMEBUFFER: u32 = 8;
    pub const EFI32: u32 = 11;
    pub const EFI64: u32 = 12;
    pub const SMBIOS: u32 = 13;
    pub const ACPI_OLD: u32 = 14;
    pub const ACPI_NEW: u32 = 15;
}

/// Payload offsets, from the start of a tag.
mod field {
    pub const SIZE: u64 = 4;
    pub const STRING: u64 = 8;

    pub const MOD_START: u64 = 8;
    pub const MOD_END: u64 = 12;
    pub const MOD_CMDLINE: u64 = 16;

    pub const MEM_LOWER: u64 = 8;
    pub const MEM_UPPER: u64 = 12;

    pub const MMAP_ENTRY_SIZE: u64 = 8;
    pub const MMAP_ENTRIES: u64 = 16;

    pub const VBE_MODE: u64 = 8;
    pub const VBE_CONTROL_INFO: u64 = 16;
    pub const VBE_MODE_INFO: u64 = 528;

    pub const FB_ADDR: u64 = 8;
    pub const FB_PITCH: u64 = 16;
    pub const FB_WIDTH: u64 = 20;
    pub const FB_HEIGHT: u64 = 24;
    pub const FB_BPP: u64 = 28;
    pub const FB_TYPE: u64 = 29;

    pub const EFI_POINTER: u64 = 8;
    pub const SMBIOS_TABLES: u64 = 16;
    pub const RSDP: u64 = 8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Multiboot2 {
    info: PhysicalAddress,
    total_size: u64,
    /// The memory map tag, looked up once.
    mmap: Option<PhysicalAddress>,
}

impl Multiboot2 {
    pub fn new<M: PhysicalMemory>(mem: &M, info: PhysicalAddress) -> Result<Multiboot2> {
        let total_size = u64::from(mem.read_u32(info)?);
        if total_size < HEADER_SIZE {
            return Err(BootError::MalformedInfo("multiboot2 total size"));
        }
        let mut mb = Multiboot2 {
            info,
            total_size,
            mmap: None,
        };
        mb.mmap = mb.find_tag(mem, tag::MMAP, 0)?;
        Ok(mb)
    }

    pub fn info(&self) -> PhysicalAddress {
        self.info
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Walk the tags, stopping when `f` returns something.
    fn scan<M, T, F>(&self, mem: &M, mut f: F) -> Result<Option<T>>
    where
        M: PhysicalMemory,
        F: FnMut(u32, PhysicalAddress) -> Option<T>,
    {
        let end = self.info + self.total_size;
        let mut t = self.info + HEADER_SIZE;
        while t + HEADER_SIZE <= end {
            let kind = mem.read_u32(t)?;
            if kind == tag::END {
                break;
            }
            let size = u64::from(mem.read_u32(t + field::SIZE)?);
            if size < HEADER_SIZE {
                return Err(BootError::MalformedInfo("multiboot2 tag size"));
            }
            if let Some(v) = f(kind, t) {
                return Ok(Some(v));
            }
            t = t + align_up(size, TAG_ALIGN);
        }
        Ok(None)
    }

    /// The `nth` tag of type `kind`.
    pub fn find_tag<M: PhysicalMemory>(
        &self,
        mem: &M,
        kind: u32,
        nth: usize,
    ) -> Result<Option<PhysicalAddress>> {
        let mut seen = 0;
        self.scan(mem, |k, t| {
            if k != kind {
                return None;
            }
            seen += 1;
            if seen > nth {
                Some(t)
            } else {
                None
            }
        })
    }

    pub fn count_tags<M: PhysicalMemory>(&self, mem: &M, kind: u32) -> Result<usize> {
        let mut count = 0;
        self.scan::<_, (), _>(mem, |k, _| {
            if k == kind {
                count += 1;
            }
            None
        })?;
        Ok(count)
    }

    pub fn cmdline<M: PhysicalMemory>(&self, mem: &M) -> Result<Option<PhysicalAddress>> {
        Ok(self
            .find_tag(mem, tag::CMDLINE, 0)?
            .map(|t| t + field::STRING))
    }

    pub fn module_count<M: PhysicalMemory>(&self, mem: &M) -> Result<usize> {
        self.count_tags(mem, tag::MODULE)
    }

    fn module_tag<M: PhysicalMemory>(&self, mem: &M, index: usize) -> Result<PhysicalAddress> {
        match self.find_tag(mem, tag::MODULE, index)? {
            Some(t) => Ok(t),
            None => Err(BootError::IndexOutOfRange {
                what: "module",
                index,
                count: self.module_count(mem)?,
            }),
        }
    }

    pub fn module_start<M: PhysicalMemory>(&self, mem: &M, index: usize) -> Result<u64> {
        let t = self.module_tag(mem, index)?;
        mem.read_u32(t + field::MOD_START).map(u64::from)
    }

    pub fn module_end<M: PhysicalMemory>(&self, mem: &M, index: usize) -> Result<u64> {
        let t = self.module_tag(mem, index)?;
        mem.read_u32(t + field::MOD_END).map(u64::from)
    }

    pub fn module_cmdline<M: PhysicalMemory>(
        &self,
        mem: &M,
        index: usize,
    ) -> Result<Option<PhysicalAddress>> {
        let t = self.module_tag(mem, index)?;
        Ok(Some(t + field::MOD_CMDLINE))
    }

    pub fn basic_meminfo<M: PhysicalMemory>(&self, mem: &M) -> Result<Option<(u32, u32)>> {
        match self.find_tag(mem, tag::BASIC_MEMINFO, 0)? {
            Some(t) => Ok(Some((
                mem.read_u32(t + field::MEM_LOWER)?,
                mem.read_u32(t + field::MEM_UPPER)?,
            ))),
            None => Ok(None),
        }
    }

    /// The map tag with its entry size.
    fn mmap_tag<M: PhysicalMemory>(&self, mem: &M) -> Result<Option<(PhysicalAddress, u64)>> {
        let t = match self.mmap {
            Some(t) => t,
            None => return Ok(None),
        };
        let entry_size = u64::from(mem.read_u32(t + field::MMAP_ENTRY_SIZE)?);
        if entry_size == 0 {
            return Err(BootError::MalformedInfo("multiboot2 memory map entry size"));
        }
        Ok(Some((t, entry_size)))
    }

    pub fn mmap_entries<M: PhysicalMemory>(&self, mem: &M) -> Result<usize> {
        let (t, entry_size) = match self.mmap_tag(mem)? {
            Some(found) => found,
            None => return Ok(0),
        };
        let size = u64::from(mem.read_u32(t + field::SIZE)?);
        Ok((size.saturating_sub(field::MMAP_ENTRIES) / entry_size) as usize)
    }

    pub fn mmap_entry<M: PhysicalMemory>(&self, mem: &M, index: usize) -> Result<MmapEntry> {
        let count = self.mmap_entries(mem)?;
        let (t, entry_size) = match self.mmap_tag(mem)? {
            Some(found) if index < count => found,
            _ => {
                return Err(BootError::IndexOutOfRange {
                    what: "memory map",
                    index,
                    count,
                })
            }
        };
        let e = t + field::MMAP_ENTRIES + index as u64 * entry_size;
        Ok(MmapEntry::new(
            mem.read_u64(e)?,
            mem.read_u64(e + 8)?,
            mem.read_u32(e + 16)?,
        ))
    }

    /// The tag stream is contiguous, so it ends at the highest address.
    pub fn highest_addr(&self) -> u64 {
        (self.info + self.total_size).raw()
    }

    pub fn firmware_tables<M: PhysicalMemory>(&self, mem: &M) -> Result<FirmwareTables> {
        let mut fw = FirmwareTables::default();

        if let Some(t) = self.find_tag(mem, tag::EFI64, 0)? {
            fw.uefi_systab = mem.read_u64(t + field::EFI_POINTER)?;
            fw.uefi_arch = UEFI_ARCH_64;
        } else if let Some(t) = self.find_tag(mem, tag::EFI32, 0)? {
            fw.uefi_systab = u64::from(mem.read_u32(t + field::EFI_POINTER)?);
            fw.uefi_arch = UEFI_ARCH_32;
        }

        // The loader hands over a copy of the RSDP, not a pointer to it.
        let acpi = match self.find_tag(mem, tag::ACPI_NEW, 0)? {
            Some(t) => Some(t),
            None => self.find_tag(mem, tag::ACPI_OLD, 0)?,
        };
        fw.acpi_rsdp = acpi.map_or(0, |t| (t + field::RSDP).raw());

        fw.smbios = self
            .find_tag(mem, tag::SMBIOS, 0)?
            .map_or(0, |t| (t + field::SMBIOS_TABLES).raw());

        Ok(fw)
    }

    pub fn console_info<M: PhysicalMemory>(&self, mem: &M) -> Result<ConsoleInfo> {
        let vbe_tag = self.find_tag(mem, tag::VBE, 0)?;
        let vesa_mode = match vbe_tag {
            Some(t) => u32::from(mem.read_u16(t + field::VBE_MODE)?),
            None => VBE_MODE_INVALID,
        };

        let framebuffer = if let Some(t) = self.find_tag(mem, tag::FRAMEBUFFER, 0)? {
            Some(FramebufferInfo {
                addr: mem.read_u64(t + field::FB_ADDR)?,
                pitch: mem.read_u32(t + field::FB_PITCH)?,
                width: mem.read_u32(t + field::FB_WIDTH)?,
                height: mem.read_u32(t + field::FB_HEIGHT)?,
                bpp: mem.read_u8(t + field::FB_BPP)?,
                fb_type: mem.read_u8(t + field::FB_TYPE)?,
                reserved: 0,
            })
        } else if let Some(t) = vbe_tag {
            Some(vbe::framebuffer(
                mem,
                t + field::VBE_CONTROL_INFO,
                t + field::VBE_MODE_INFO,
            )?)
        } else {
            None
        };

        Ok(ConsoleInfo {
            vesa_mode,
            framebuffer,
        })
    }

    /// The whole stream moves as one block; only module bodies live
    /// outside it.
    pub fn plan_relocation<M: PhysicalMemory>(&self, mem: &M, plan: &mut RelocPlan) -> Result<()> {
        let info = plan.structure("multiboot2 info", self.info.raw(), self.total_size, None)?;

        let count = self.module_count(mem)?;
        if count > MAX_MODULES {
            return Err(BootError::TooManyModules(count));
        }
        for i in 0..count {
            let t = self.module_tag(mem, i)?;
            let start = u64::from(mem.read_u32(t + field::MOD_START)?);
            let end = u64::from(mem.read_u32(t + field::MOD_END)?);
            if start > end {
                return Err(BootError::ModuleStartAfterEnd {
                    index: i,
                    start,
                    end,
                });
            }
            let off = t - self.info;
            plan.module(
                start,
                end - start,
                Fixup::new(info, off + field::MOD_START),
                Fixup::new(info, off + field::MOD_END),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::super::fixture::Multiboot2Fixture;
    use super::Multiboot2;
    use crate::boot::info::{FramebufferInfo, FB_TYPE_RGB, UEFI_ARCH_64, VBE_MODE_INVALID};
    use crate::err::BootError;
    use crate::mem::fake::FakeMemory;
    use crate::mem::map::MmapEntry;
    use crate::mem::phys::PhysicalMemory;
    use crate::mem::PhysicalAddress;

    const INFO: u64 = 0x1_0000;

    fn load(fx: &Multiboot2Fixture) -> (FakeMemory, Multiboot2) {
        let mut mem = FakeMemory::new(0, 0x10_0000);
        fx.write(&mut mem, INFO);
        let mb = Multiboot2::new(&mem, PhysicalAddress::new(INFO)).unwrap();
        (mem, mb)
    }

    #[test]
    fn cmdline_modules_and_size() {
        let mut fx = Multiboot2Fixture::new();
        fx.cmdline("/platform/kernel");
        fx.module(0x4_0000, 0x4_8000, "/boot_archive");
        fx.module(0x5_0000, 0x5_1000, "extra");
        let (mem, mb) = load(&fx);

        let cmdline = mb.cmdline(&mem).unwrap().unwrap();
        assert_eq!(mem.strlen(cmdline).unwrap(), 16);
        assert_eq!(mb.module_count(&mem).unwrap(), 2);
        assert_eq!(mb.module_start(&mem, 1).unwrap(), 0x5_0000);
        assert_eq!(mb.module_end(&mem, 0).unwrap(), 0x4_8000);
        let name = mb.module_cmdline(&mem, 0).unwrap().unwrap();
        assert_eq!(mem.strlen(name).unwrap(), 13);
        assert_eq!(mb.highest_addr(), INFO + fx.len());
        assert!(matches!(
            mb.module_end(&mem, 2),
            Err(BootError::IndexOutOfRange { index: 2, count: 2, .. })
        ));
    }

    #[test]
    fn mmap_entries() {
        let mut fx = Multiboot2Fixture::new();
        fx.mmap(&[(0, 0x9fc00, 1), (0x10_0000, 0x3ff0_0000, 1), (0xfec0_0000, 0x1000, 2)]);
        let (mem, mb) = load(&fx);

        assert_eq!(mb.mmap_entries(&mem).unwrap(), 3);
        assert_eq!(
            mb.mmap_entry(&mem, 2).unwrap(),
            MmapEntry::new(0xfec0_0000, 0x1000, 2)
        );
        assert!(mb.mmap_entry(&mem, 3).is_err());
    }

    #[test]
    fn no_mmap() {
        let mut fx = Multiboot2Fixture::new();
        fx.basic_meminfo(639, 261_120);
        let (mem, mb) = load(&fx);
        assert_eq!(mb.mmap_entries(&mem).unwrap(), 0);
        assert_eq!(mb.basic_meminfo(&mem).unwrap(), Some((639, 261_120)));
    }

    #[test]
    fn firmware_tables_prefer_newer() {
        let mut fx = Multiboot2Fixture::new();
        fx.efi32(0x7f00_0000);
        fx.efi64(0x7e00_0000);
        fx.acpi_old();
        let new = fx.acpi_new();
        let smbios = fx.smbios();
        let (mem, mb) = load(&fx);

        let fw = mb.firmware_tables(&mem).unwrap();
        assert_eq!(fw.uefi_systab, 0x7e00_0000);
        assert_eq!(fw.uefi_arch, UEFI_ARCH_64);
        assert_eq!(fw.acpi_rsdp, INFO + new + 8);
        assert_eq!(fw.smbios, INFO + smbios + 16);
    }

    #[test]
    fn framebuffer_tag_wins_over_vbe() {
        let fb = FramebufferInfo {
            addr: 0x8000_0000,
            pitch: 5120,
            width: 1280,
            height: 1024,
            bpp: 32,
            fb_type: FB_TYPE_RGB,
            reserved: 0,
        };
        let mut fx = Multiboot2Fixture::new();
        fx.vbe(0x11b, 0xfd00_0000, 800, 600, 16);
        fx.framebuffer(&fb);
        let (mem, mb) = load(&fx);

        let c = mb.console_info(&mem).unwrap();
        assert_eq!(c.vesa_mode, 0x11b);
        assert_eq!(c.framebuffer, Some(fb));
    }

    #[test]
    fn vbe_only() {
        let mut fx = Multiboot2Fixture::new();
        fx.vbe(0x114, 0xfd00_0000, 800, 600, 16);
        let (mem, mb) = load(&fx);

        let fb = mb.console_info(&mem).unwrap().framebuffer.unwrap();
        assert_eq!((fb.addr, fb.width, fb.height, fb.bpp), (0xfd00_0000, 800, 600, 16));
    }

    #[test]
    fn no_video() {
        let (mem, mb) = load(&Multiboot2Fixture::new());
        let c = mb.console_info(&mem).unwrap();
        assert_eq!(c.vesa_mode, VBE_MODE_INVALID);
        assert_eq!(c.framebuffer, None);
    }

    #[test]
    fn truncated_tag_is_malformed() {
        let mut mem = FakeMemory::new(0, 0x1000);
        mem.put_u32(0x100, 32);
        mem.put_u32(0x108, 1);
        mem.put_u32(0x10c, 4);
        assert!(matches!(
            Multiboot2::new(&mem, PhysicalAddress::new(0x100)),
            Err(BootError::MalformedInfo(_))
        ));
    }
}
