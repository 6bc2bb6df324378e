//! The start-info page the domain builder leaves for a paravirtualized
//! guest.
//!
//! Its fields are C `unsigned long`s, so the layout follows the guest's
//! word size.

use crate::consts::Target;
use crate::err::Result;
use crate::mem::phys::PhysicalMemory;
use crate::mem::PhysicalAddress;

/// Longest guest command line.
pub const MAX_GUEST_CMDLINE: u64 = 1024;

/// Field offsets for one word size.
struct Layout {
    word: u64,
    nr_pages: u64,
    shared_info: u64,
    pt_base: u64,
    nr_pt_frames: u64,
    mfn_list: u64,
    mod_start: u64,
    mod_len: u64,
    cmd_line: u64,
}

const LAYOUT_64: Layout = Layout {
    word: 8,
    nr_pages: 32,
    shared_info: 40,
    pt_base: 88,
    nr_pt_frames: 96,
    mfn_list: 104,
    mod_start: 112,
    mod_len: 120,
    cmd_line: 128,
};

const LAYOUT_32: Layout = Layout {
    word: 4,
    nr_pages: 32,
    shared_info: 36,
    pt_base: 60,
    nr_pt_frames: 64,
    mfn_list: 68,
    mod_start: 72,
    mod_len: 76,
    cmd_line: 80,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartInfo {
    addr: PhysicalAddress,
    wide: bool,
}

impl StartInfo {
    pub fn new(addr: PhysicalAddress, target: Target) -> StartInfo {
        StartInfo {
            addr,
            wide: target.is_64bit(),
        }
    }

    pub fn address(&self) -> PhysicalAddress {
        self.addr
    }

    fn layout(&self) -> &'static Layout {
        if self.wide {
            &LAYOUT_64
        } else {
            &LAYOUT_32
        }
    }

    /// The size of a word in the guest, and of a `mfn_list` entry.
    pub fn word_size(&self) -> u64 {
        self.layout().word
    }

    /// Read a guest word at `addr`.
    pub fn read_word<M: PhysicalMemory>(&self, mem: &M, addr: PhysicalAddress) -> Result<u64> {
        if self.wide {
            mem.read_u64(addr)
        } else {
            mem.read_u32(addr).map(u64::from)
        }
    }

    fn word<M: PhysicalMemory>(&self, mem: &M, off: u64) -> Result<u64> {
        self.read_word(mem, self.addr + off)
    }

    /// Pages the domain owns.
    pub fn nr_pages<M: PhysicalMemory>(&self, mem: &M) -> Result<u64> {
        self.word(mem, self.layout().nr_pages)
    }

    /// Machine address of the shared info page.
    pub fn shared_info<M: PhysicalMemory>(&self, mem: &M) -> Result<u64> {
        self.word(mem, self.layout().shared_info)
    }

    /// Virtual address of the top-level page table the builder made.
    pub fn pt_base<M: PhysicalMemory>(&self, mem: &M) -> Result<u64> {
        self.word(mem, self.layout().pt_base)
    }

    pub fn nr_pt_frames<M: PhysicalMemory>(&self, mem: &M) -> Result<u64> {
        self.word(mem, self.layout().nr_pt_frames)
    }

    /// Virtual address of the pseudo-physical to machine frame table.
    pub fn mfn_list<M: PhysicalMemory>(&self, mem: &M) -> Result<u64> {
        self.word(mem, self.layout().mfn_list)
    }

    /// Virtual address of the one boot module.
    pub fn mod_start<M: PhysicalMemory>(&self, mem: &M) -> Result<u64> {
        self.word(mem, self.layout().mod_start)
    }

    pub fn mod_len<M: PhysicalMemory>(&self, mem: &M) -> Result<u64> {
        self.word(mem, self.layout().mod_len)
    }

    pub fn cmdline(&self) -> PhysicalAddress {
        self.addr + self.layout().cmd_line
    }
}


#[cfg(test)]
mod test {
    use super::fixture::StartInfoFixture;
    use crate::consts::Target;
    use crate::mem::fake::FakeMemory;
    use crate::mem::phys::PhysicalMemory;

    fn fixture() -> StartInfoFixture {
        StartInfoFixture {
            nr_pages: 0x2_0000,
            shared_info: 0x7_f000,
            pt_base: 0x4060_0000,
            nr_pt_frames: 6,
            mfn_list: 0x4050_0000,
            mod_start: 0x4100_0000,
            mod_len: 0x2_2000,
            cmdline: "/platform/i86xpv/kernel/amd64/unix -k",
        }
    }

    #[test]
    fn wide_layout() {
        let mut mem = FakeMemory::new(0x4000_0000, 0x2000);
        let si = fixture().write(&mut mem, 0x4000_1000, Target::Amd64);
        assert_eq!(si.word_size(), 8);
        assert_eq!(si.nr_pages(&mem).unwrap(), 0x2_0000);
        assert_eq!(si.pt_base(&mem).unwrap(), 0x4060_0000);
        assert_eq!(si.mod_len(&mem).unwrap(), 0x2_2000);
        assert_eq!(mem.strlen(si.cmdline()).unwrap(), 37);
    }

    #[test]
    fn narrow_layout() {
        let mut mem = FakeMemory::new(0x4000_0000, 0x2000);
        let si = fixture().write(&mut mem, 0x4000_1000, Target::I386);
        assert_eq!(si.word_size(), 4);
        assert_eq!(si.shared_info(&mem).unwrap(), 0x7_f000);
        assert_eq!(si.mfn_list(&mem).unwrap(), 0x4050_0000);
        assert_eq!(si.mod_start(&mem).unwrap(), 0x4100_0000);
        assert_eq!(mem.strlen(si.cmdline()).unwrap(), 37);
    }
}
