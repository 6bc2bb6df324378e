//! Reading and writing page table entries.

use log_crate::trace;

use super::{EntryFlags, PageTableBackend, PagingConfig};
use crate::err::{BootError, Result};
use crate::mem::alloc::BumpAllocator;
use crate::mem::memlist::MemList;
use crate::mem::phys::PhysicalMemory;
use crate::mem::size::PAGE;
use crate::mem::PhysicalAddress;

/// A leaf mapping found in the tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Leaf {
    pub va: u64,
    pub pa: PhysicalAddress,
    pub level: usize,
    pub flags: EntryFlags,
}

/// A page table tree under construction.
pub struct PageTables<'a, M, B> {
    pub(super) mem: &'a mut M,
    pub(super) backend: &'a mut B,
    pub(super) alloc: &'a mut BumpAllocator,
    pub(super) installed: &'a MemList,
    pub(super) config: PagingConfig,
    pub(super) top: PhysicalAddress,
}

impl<'a, M: PhysicalMemory, B: PageTableBackend> PageTables<'a, M, B> {
    /// Start a new tree with a freshly allocated top-level table.
    pub fn create(
        mem: &'a mut M,
        backend: &'a mut B,
        alloc: &'a mut BumpAllocator,
        installed: &'a MemList,
        config: PagingConfig,
    ) -> Result<Self> {
        let top = alloc.alloc(mem, installed, PAGE, PAGE)?;
        trace!("Top level table at {}.", top);
        Ok(Self::adopt(mem, backend, alloc, installed, config, top))
    }

    /// Continue a tree whose top-level table already exists at `top`.
    pub fn adopt(
        mem: &'a mut M,
        backend: &'a mut B,
        alloc: &'a mut BumpAllocator,
        installed: &'a MemList,
        config: PagingConfig,
        top: PhysicalAddress,
    ) -> Self {
        PageTables {
            mem,
            backend,
            alloc,
            installed,
            config,
            top,
        }
    }

    pub fn top(&self) -> PhysicalAddress {
        self.top
    }

    pub fn config(&self) -> &PagingConfig {
        &self.config
    }

    fn entry_address(&self, table: PhysicalAddress, index: usize) -> PhysicalAddress {
        table + index as u64 * self.config.entry_size()
    }

    /// Read entry `index` of `table`.
    pub fn get_entry(&self, table: PhysicalAddress, index: usize) -> Result<u64> {
        let addr = self.entry_address(table, index);
        if self.config.pae {
            self.mem.read_u64(addr)
        } else {
            self.mem.read_u32(addr).map(u64::from)
        }
    }

    /// Allocate a zeroed table to hang off a level-`level` entry, returning
    /// it with the entry that links it in.
    fn make_table(&mut self, level: usize) -> Result<(PhysicalAddress, u64)> {
        let table = self.alloc.alloc(&mut *self.mem, self.installed, PAGE, PAGE)?;
        let ma = self.backend.to_machine(&*self.mem, table)?;
        let entry = ma | self.config.table_bits(level).bits();
        self.backend.seal_table(table, entry)?;
        trace!("New level {} table at {} (entry 0x{:x}).", level - 1, table, entry);
        Ok((table, entry))
    }

    /// Find the level-`level` entry that maps `va`, creating intermediate
    /// tables on the way unless `probe_only` is set. Returns the address of
    /// the entry.
    pub fn find_pte(
        &mut self,
        va: u64,
        level: usize,
        probe_only: bool,
    ) -> Result<Option<PhysicalAddress>> {
        let mut table = self.top;
        let mut l = self.config.top_level;
        while l != level {
            let index = self.config.index(va, l);
            let entry = self.get_entry(table, index)?;

            if entry & EntryFlags::PRESENT.bits() != 0 {
                if self.config.is_leaf(entry, l) {
                    return Err(BootError::CorruptPageTable { va, level: l });
                }
                table = self
                    .backend
                    .to_physical(&*self.mem, self.config.entry_address(entry))?;
            } else {
                if probe_only {
                    return Ok(None);
                }
                let (new, entry) = self.make_table(l)?;
                self.backend
                    .set_entry(&mut *self.mem, &self.config, table, index, l, entry)?;
                table = new;
            }
            l -= 1;
        }

        Ok(Some(self.entry_address(table, self.config.index(va, level))))
    }

    /// Map machine address `ma` at `va` with a level-`level` leaf.
    pub fn map_ma_at_va(
        &mut self,
        ma: u64,
        va: u64,
        level: usize,
        extra: EntryFlags,
    ) -> Result<()> {
        let entry = ma | (self.config.leaf_bits(va, level) | extra).bits();
        if !self.config.pae && entry > u64::from(u32::MAX) {
            return Err(BootError::BadTranslation(ma));
        }

        if self.backend.map_without_walk(va, entry)? {
            return Ok(());
        }

        let pte = self
            .find_pte(va, level, false)?
            .ok_or(BootError::CorruptPageTable { va, level })?;
        self.backend
            .set_leaf(&mut *self.mem, &self.config, pte, va, entry)
    }

    /// Map physical address `pa` at `va` with a level-`level` leaf.
    pub fn map_pa_at_va(
        &mut self,
        pa: PhysicalAddress,
        va: u64,
        level: usize,
        extra: EntryFlags,
    ) -> Result<()> {
        let ma = self.backend.to_machine(&*self.mem, pa)?;
        self.map_ma_at_va(ma, va, level, extra)
    }

    /// Look up the leaf mapping `va`, if there is one.
    pub fn translate(&self, va: u64) -> Result<Option<Leaf>> {
        let mut table = self.top;
        let mut l = self.config.top_level;
        loop {
            let entry = self.get_entry(table, self.config.index(va, l))?;
            if entry & EntryFlags::PRESENT.bits() == 0 {
                return Ok(None);
            }

            if self.config.is_leaf(entry, l) {
                let size = self.config.level_size(l);
                let frame = self.config.entry_address(entry) & !(size - 1);
                let pa = self.backend.to_physical(&*self.mem, frame)?;
                return Ok(Some(Leaf {
                    va,
                    pa: pa + (va & (size - 1)),
                    level: l,
                    flags: EntryFlags::from_bits_truncate(entry),
                }));
            }

            table = self
                .backend
                .to_physical(&*self.mem, self.config.entry_address(entry))?;
            l -= 1;
        }
    }

    /// Call `f` on every leaf in the tree, in address order.
    pub fn walk<F: FnMut(&Leaf)>(&self, mut f: F) -> Result<()> {
        self.walk_table(self.top, self.config.top_level, 0, &mut f)
    }

    fn walk_table<F: FnMut(&Leaf)>(
        &self,
        table: PhysicalAddress,
        level: usize,
        base: u64,
        f: &mut F,
    ) -> Result<()> {
        for i in 0..self.config.entries_per_table() {
            let entry = self.get_entry(table, i)?;
            if entry & EntryFlags::PRESENT.bits() == 0 {
                continue;
            }

            let va = self
                .config
                .canonical(base | (i as u64) << self.config.shift(level));
            if self.config.is_leaf(entry, level) {
                let size = self.config.level_size(level);
                let frame = self.config.entry_address(entry) & !(size - 1);
                f(&Leaf {
                    va,
                    pa: self.backend.to_physical(&*self.mem, frame)?,
                    level,
                    flags: EntryFlags::from_bits_truncate(entry),
                });
            } else {
                let child = self
                    .backend
                    .to_physical(&*self.mem, self.config.entry_address(entry))?;
                self.walk_table(child, level - 1, va, f)?;
            }
        }
        Ok(())
    }
}
