//! Page table construction.
//!
//! The tables are built entry by entry through a [`PageTableBackend`]: on
//! bare metal a plain store, under Xen a hypercall.

use bitflags::bitflags;

use crate::err::Result;
use crate::mem::phys::PhysicalMemory;
use crate::mem::size::MB;
use crate::mem::PhysicalAddress;

mod builder;
mod direct;
mod table;

pub use builder::{NucleusLayout, TableSummary};
pub use direct::DirectBackend;
pub use table::PageTables;

bitflags! {
    pub struct EntryFlags: u64 {
        const PRESENT = 1;
        const WRITABLE = 1 << 1;
        const USER_ACCESSIBLE = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const CACHE_DISABLED = 1 << 4;
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
        const LARGE = 1 << 7;
        /// PAT index bit of a 4 KiB leaf. Shares its position with `LARGE`.
        const PAT_4K = 1 << 7;
        const GLOBAL = 1 << 8;
        /// Software bit: the kernel's hat layer skips consistency checks.
        const NO_CONSIST = 1 << 10;
        /// PAT index bit of a large leaf.
        const PAT_LARGE = 1 << 12;
        const NO_EXECUTE = 1 << 63;
    }
}

/// Paging parameters, fixed once CPU features are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagingConfig {
    pub pae: bool,
    pub top_level: usize,
    pub large_pages: bool,
    pub global_pages: bool,
    pub pat: bool,
    /// Mappings at or above this get the global bit.
    pub kernel_text: u64,
    /// The hypervisor decides cacheability of anything it maps for us.
    pub paravirtualized: bool,
}

impl PagingConfig {
    const PAE_SHIFTS: [u32; 4] = [12, 21, 30, 39];
    const LEGACY_SHIFTS: [u32; 3] = [12, 22, 32];

    /// Pick the table geometry for a kernel of the given width.
    pub fn new(
        pae: bool,
        amd64: bool,
        large_pages: bool,
        global_pages: bool,
        pat: bool,
        kernel_text: u64,
    ) -> PagingConfig {
        let top_level = match (amd64, pae) {
            (true, _) => 3,
            (false, true) => 2,
            (false, false) => 1,
        };
        PagingConfig {
            pae: pae || amd64,
            top_level,
            large_pages,
            global_pages,
            pat,
            kernel_text,
            paravirtualized: false,
        }
    }

    /// The same geometry, for a guest whose tables go through Xen.
    pub fn for_xen(self) -> PagingConfig {
        PagingConfig {
            paravirtualized: true,
            ..self
        }
    }

    /// The bit position indexing level `level`.
    pub fn shift(&self, level: usize) -> u32 {
        if self.pae {
            Self::PAE_SHIFTS[level]
        } else {
            Self::LEGACY_SHIFTS[level]
        }
    }

    /// The span of one entry at `level`.
    pub fn level_size(&self, level: usize) -> u64 {
        1 << self.shift(level)
    }

    pub fn entries_per_table(&self) -> usize {
        if self.pae {
            512
        } else {
            1024
        }
    }

    pub fn entry_size(&self) -> u64 {
        if self.pae {
            8
        } else {
            4
        }
    }

    pub fn large_page_size(&self) -> u64 {
        self.level_size(1)
    }

    /// The index of `va` in a level-`level` table.
    pub fn index(&self, va: u64, level: usize) -> usize {
        ((va >> self.shift(level)) as usize) & (self.entries_per_table() - 1)
    }

    /// The frame address held in an entry.
    pub fn entry_address(&self, entry: u64) -> u64 {
        if self.pae {
            entry & 0x000F_FFFF_FFFF_F000
        } else {
            entry & 0xFFFF_F000
        }
    }

    /// Bits for an entry pointing at a table, stored in a level-`level` table.
    pub fn table_bits(&self, level: usize) -> EntryFlags {
        // A 32-bit PAE top level only holds the present bit.
        if level == self.top_level && level == 2 {
            EntryFlags::PRESENT
        } else {
            EntryFlags::PRESENT
                | EntryFlags::ACCESSED
                | EntryFlags::WRITABLE
                | EntryFlags::USER_ACCESSIBLE
        }
    }

    /// Bits for a leaf mapping `va` at `level`.
    pub fn leaf_bits(&self, va: u64, level: usize) -> EntryFlags {
        let mut bits = EntryFlags::PRESENT
            | EntryFlags::ACCESSED
            | EntryFlags::WRITABLE
            | EntryFlags::DIRTY
            | EntryFlags::NO_CONSIST;
        if level > 0 {
            bits |= EntryFlags::LARGE;
        }
        if va >= self.kernel_text && self.global_pages {
            bits |= EntryFlags::GLOBAL;
        }
        // Video memory.
        if va < MB && !self.paravirtualized {
            bits |= EntryFlags::CACHE_DISABLED;
        }
        bits
    }

    /// Whether writing a level-`level` entry needs a TLB reload to take.
    pub fn reloads_on_write(&self, level: usize) -> bool {
        level == self.top_level && level == 2
    }

    /// Whether a present level-`level` entry maps memory rather than a table.
    pub fn is_leaf(&self, entry: u64, level: usize) -> bool {
        level == 0 || (entry & EntryFlags::LARGE.bits() != 0 && !self.reloads_on_write(level))
    }

    /// Sign-extend a virtual address built up from table indices.
    pub fn canonical(&self, va: u64) -> u64 {
        let bits = self.shift(self.top_level) + 9;
        if self.top_level == 3 && va & (1 << (bits - 1)) != 0 {
            va | !((1 << bits) - 1)
        } else {
            va
        }
    }
}

/// How page table entries get into memory.
pub trait PageTableBackend {
    /// The machine address backing `pa`.
    fn to_machine<M: PhysicalMemory>(&self, mem: &M, pa: PhysicalAddress) -> Result<u64>;

    /// The physical address of machine address `ma`.
    fn to_physical<M: PhysicalMemory>(&self, mem: &M, ma: u64) -> Result<PhysicalAddress>;

    /// Store `value` as entry `index` of the level-`level` table at `table`.
    fn set_entry<M: PhysicalMemory>(
        &mut self,
        mem: &mut M,
        config: &PagingConfig,
        table: PhysicalAddress,
        index: usize,
        level: usize,
        value: u64,
    ) -> Result<()>;

    /// Called once a new table page is zeroed, with the entry that will
    /// point at it.
    fn seal_table(&mut self, _table: PhysicalAddress, _entry: u64) -> Result<()> {
        Ok(())
    }

    /// Install a leaf for `va` without walking the tables. Returns whether
    /// the mapping was made.
    fn map_without_walk(&mut self, _va: u64, _entry: u64) -> Result<bool> {
        Ok(false)
    }

    /// Store leaf `value` for `va` at the entry `pte`.
    fn set_leaf<M: PhysicalMemory>(
        &mut self,
        mem: &mut M,
        config: &PagingConfig,
        pte: PhysicalAddress,
        va: u64,
        value: u64,
    ) -> Result<()>;

    /// Remove the mapping of `va`.
    fn unmap(&mut self, va: u64) -> Result<()>;
}
