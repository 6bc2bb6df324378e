//! Loader info laid out in fake memory, the way boot loaders leave it.

use super::multiboot::{offset, InfoFlags, INFO_SIZE, MODULE_SIZE};
use super::multiboot2::tag;
use crate::boot::info::FramebufferInfo;
use crate::mem::align_up;
use crate::mem::fake::FakeMemory;
use crate::mem::phys::PhysicalMemory;
use crate::mem::PhysicalAddress;

/// VBE controller and mode blocks for a direct-color linear mode.
pub fn vbe_blocks(fb: u32, width: u16, height: u16, bpp: u8) -> (Vec<u8>, Vec<u8>) {
    let mut controller = vec![0; 512];
    controller[..4].copy_from_slice(b"VESA");
    controller[4..6].copy_from_slice(&0x300u16.to_le_bytes());

    let pitch = width * u16::from(bpp / 8);
    let mut mode = vec![0; 256];
    mode[0x10..0x12].copy_from_slice(&pitch.to_le_bytes());
    mode[0x12..0x14].copy_from_slice(&width.to_le_bytes());
    mode[0x14..0x16].copy_from_slice(&height.to_le_bytes());
    mode[0x19] = bpp;
    mode[0x1b] = 6;
    mode[0x28..0x2c].copy_from_slice(&fb.to_le_bytes());
    mode[0x32..0x34].copy_from_slice(&pitch.to_le_bytes());
    (controller, mode)
}

/// A multiboot v1 info block, with its side tables placed after it.
pub struct Multiboot1Fixture {
    info: u64,
    next: u64,
}

impl Multiboot1Fixture {
    pub fn new(mem: &mut FakeMemory, info: u64) -> Multiboot1Fixture {
        mem.fill(PhysicalAddress::new(info), 0, INFO_SIZE).unwrap();
        Multiboot1Fixture {
            info,
            next: info + 0x100,
        }
    }

    pub fn info(&self) -> u64 {
        self.info
    }

    /// Room for `len` more bytes of side tables.
    pub fn place(&mut self, len: u64) -> u64 {
        let at = align_up(self.next, 8);
        self.next = at + len;
        at
    }

    fn set(&self, mem: &mut FakeMemory, off: u64, value: u32) {
        mem.put_u32(self.info + off, value);
    }

    fn flag(&self, mem: &mut FakeMemory, flag: InfoFlags) {
        let flags = mem.get_u32(self.info + offset::FLAGS);
        self.set(mem, offset::FLAGS, flags | flag.bits());
    }

    fn string(&mut self, mem: &mut FakeMemory, s: &str) -> u64 {
        let at = self.place(s.len() as u64 + 1);
        mem.put_str(at, s);
        at
    }

    pub fn cmdline(&mut self, mem: &mut FakeMemory, s: &str) -> u64 {
        let at = self.string(mem, s);
        self.set(mem, offset::CMDLINE, at as u32);
        self.flag(mem, InfoFlags::CMDLINE);
        at
    }

    pub fn meminfo(&mut self, mem: &mut FakeMemory, lower_kb: u32, upper_kb: u32) {
        self.set(mem, offset::MEM_LOWER, lower_kb);
        self.set(mem, offset::MEM_UPPER, upper_kb);
        self.flag(mem, InfoFlags::MEMORY);
    }

    /// `(base, length, type)` entries.
    pub fn mmap(&mut self, mem: &mut FakeMemory, entries: &[(u64, u64, u32)]) -> u64 {
        let at = self.place(entries.len() as u64 * 24);
        for (i, &(base, length, kind)) in entries.iter().enumerate() {
            let e = at + i as u64 * 24;
            mem.put_u32(e, 20);
            mem.put_u64(e + 4, base);
            mem.put_u64(e + 12, length);
            mem.put_u32(e + 20, kind);
        }
        self.set(mem, offset::MMAP_ADDR, at as u32);
        self.set(mem, offset::MMAP_LENGTH, entries.len() as u32 * 24);
        self.flag(mem, InfoFlags::MEM_MAP);
        at
    }

    /// `(start, end, name)` modules. Bodies stay wherever the caller put
    /// them. Returns the module table.
    pub fn modules(&mut self, mem: &mut FakeMemory, mods: &[(u64, u64, Option<&str>)]) -> u64 {
        let table = self.place(mods.len() as u64 * MODULE_SIZE);
        for (i, &(start, end, name)) in mods.iter().enumerate() {
            let e = table + i as u64 * MODULE_SIZE;
            mem.put_u32(e + offset::MOD_START, start as u32);
            mem.put_u32(e + offset::MOD_END, end as u32);
            let name = name.map_or(0, |n| self.string(mem, n));
            mem.put_u32(e + offset::MOD_CMDLINE, name as u32);
        }
        self.set(mem, offset::MODS_COUNT, mods.len() as u32);
        self.set(mem, offset::MODS_ADDR, table as u32);
        self.flag(mem, InfoFlags::MODS);
        table
    }

    pub fn vbe(
        &mut self,
        mem: &mut FakeMemory,
        mode: u16,
        fb: u32,
        width: u16,
        height: u16,
        bpp: u8,
    ) {
        let (controller, mode_info) = vbe_blocks(fb, width, height, bpp);
        let c = self.place(512);
        let m = self.place(256);
        mem.write(PhysicalAddress::new(c), &controller).unwrap();
        mem.write(PhysicalAddress::new(m), &mode_info).unwrap();
        self.set(mem, offset::VBE_CONTROL_INFO, c as u32);
        self.set(mem, offset::VBE_MODE_INFO, m as u32);
        mem.put_u16(self.info + offset::VBE_MODE, mode);
        self.flag(mem, InfoFlags::VIDEO_INFO);
    }

    pub fn loader_name(&mut self, mem: &mut FakeMemory, s: &str) -> u64 {
        let at = self.string(mem, s);
        self.set(mem, offset::BOOT_LOADER_NAME, at as u32);
        self.flag(mem, InfoFlags::BOOT_LOADER_NAME);
        at
    }

    pub fn elf_shdr(&mut self, mem: &mut FakeMemory, num: u32, size: u32) -> u64 {
        let at = self.place(u64::from(num * size));
        for i in 0..u64::from(num * size) {
            mem.write(PhysicalAddress::new(at + i), &[i as u8]).unwrap();
        }
        self.set(mem, offset::SHDR_NUM, num);
        self.set(mem, offset::SHDR_SIZE, size);
        self.set(mem, offset::SHDR_ADDR, at as u32);
        self.flag(mem, InfoFlags::ELF_SHDR);
        at
    }

    pub fn drives(&mut self, mem: &mut FakeMemory, len: u32) -> u64 {
        let at = self.place(u64::from(len));
        self.set(mem, offset::DRIVES_LENGTH, len);
        self.set(mem, offset::DRIVES_ADDR, at as u32);
        self.flag(mem, InfoFlags::DRIVE_INFO);
        at
    }

    pub fn config_table(&mut self, mem: &mut FakeMemory, len: u16) -> u64 {
        let at = self.place(u64::from(len));
        mem.put_u16(at, len);
        self.set(mem, offset::CONFIG_TABLE, at as u32);
        self.flag(mem, InfoFlags::CONFIG_TABLE);
        at
    }
}

/// A multiboot v2 tag stream, built up in order and written in one go.
#[derive(Default)]
pub struct Multiboot2Fixture {
    tags: Vec<u8>,
}

impl Multiboot2Fixture {
    pub fn new() -> Multiboot2Fixture {
        Multiboot2Fixture::default()
    }

    /// Append a tag; returns its offset from the start of the info.
    fn tag(&mut self, kind: u32, payload: &[u8]) -> u64 {
        let off = 8 + self.tags.len() as u64;
        self.tags.extend_from_slice(&kind.to_le_bytes());
        self.tags.extend_from_slice(&(8 + payload.len() as u32).to_le_bytes());
        self.tags.extend_from_slice(payload);
        while self.tags.len() % 8 != 0 {
            self.tags.push(0);
        }
        off
    }

    /// Total size, end tag included.
    pub fn len(&self) -> u64 {
        8 + self.tags.len() as u64 + 8
    }

    pub fn write(&self, mem: &mut FakeMemory, at: u64) {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(self.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&self.tags);
        bytes.extend_from_slice(&tag::END.to_le_bytes());
        bytes.extend_from_slice(&8u32.to_le_bytes());
        mem.write(PhysicalAddress::new(at), &bytes).unwrap();
    }

    fn cstr(s: &str) -> Vec<u8> {
        let mut v = s.as_bytes().to_vec();
        v.push(0);
        v
    }

    pub fn cmdline(&mut self, s: &str) -> u64 {
        self.tag(tag::CMDLINE, &Self::cstr(s))
    }

    pub fn module(&mut self, start: u64, end: u64, name: &str) -> u64 {
        let mut p = Vec::new();
        p.extend_from_slice(&(start as u32).to_le_bytes());
        p.extend_from_slice(&(end as u32).to_le_bytes());
        p.extend_from_slice(&Self::cstr(name));
        self.tag(tag::MODULE, &p)
    }

    pub fn basic_meminfo(&mut self, lower_kb: u32, upper_kb: u32) -> u64 {
        let mut p = Vec::new();
        p.extend_from_slice(&lower_kb.to_le_bytes());
        p.extend_from_slice(&upper_kb.to_le_bytes());
        self.tag(tag::BASIC_MEMINFO, &p)
    }

    /// `(base, length, type)` entries.
    pub fn mmap(&mut self, entries: &[(u64, u64, u32)]) -> u64 {
        let mut p = Vec::new();
        p.extend_from_slice(&24u32.to_le_bytes());
        p.extend_from_slice(&0u32.to_le_bytes());
        for &(base, length, kind) in entries {
            p.extend_from_slice(&base.to_le_bytes());
            p.extend_from_slice(&length.to_le_bytes());
            p.extend_from_slice(&kind.to_le_bytes());
            p.extend_from_slice(&0u32.to_le_bytes());
        }
        self.tag(tag::MMAP, &p)
    }

    pub fn vbe(&mut self, mode: u16, fb: u32, width: u16, height: u16, bpp: u8) -> u64 {
        let (controller, mode_info) = vbe_blocks(fb, width, height, bpp);
        let mut p = Vec::new();
        p.extend_from_slice(&mode.to_le_bytes());
        p.extend_from_slice(&[0; 6]);
        p.extend_from_slice(&controller);
        p.extend_from_slice(&mode_info);
        self.tag(tag::VBE, &p)
    }

    pub fn framebuffer(&mut self, fb: &FramebufferInfo) -> u64 {
        let mut p = Vec::new();
        p.extend_from_slice(&fb.addr.to_le_bytes());
        p.extend_from_slice(&fb.pitch.to_le_bytes());
        p.extend_from_slice(&fb.width.to_le_bytes());
        p.extend_from_slice(&fb.height.to_le_bytes());
        p.push(fb.bpp);
        p.push(fb.fb_type);
        p.extend_from_slice(&[0; 2]);
        self.tag(tag::FRAMEBUFFER, &p)
    }

    pub fn efi32(&mut self, systab: u32) -> u64 {
        self.tag(tag::EFI32, &systab.to_le_bytes())
    }

    pub fn efi64(&mut self, systab: u64) -> u64 {
        self.tag(tag::EFI64, &systab.to_le_bytes())
    }

    pub fn acpi_old(&mut self) -> u64 {
        let mut rsdp = b"RSD PTR ".to_vec();
        rsdp.resize(20, 0);
        self.tag(tag::ACPI_OLD, &rsdp)
    }

    pub fn acpi_new(&mut self) -> u64 {
        let mut rsdp = b"RSD PTR ".to_vec();
        rsdp.resize(36, 0);
        rsdp[15] = 2;
        self.tag(tag::ACPI_NEW, &rsdp)
    }

    pub fn smbios(&mut self) -> u64 {
        let mut p = vec![2, 8, 0, 0, 0, 0, 0, 0];
        p.extend_from_slice(b"_SM_");
        p.resize(8 + 31, 0);
        self.tag(tag::SMBIOS, &p)
    }
}
