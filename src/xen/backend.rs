//! Page table writes through the hypervisor.
//!
//! The guest can read its page tables but not write them. Intermediate
//! entries are written with `mmu_update` at their machine address, leaves
//! with `update_va_mapping` by the address they map.

use log_crate::trace;

use super::p2m::P2m;
use super::{
    check, Hypervisor, MMU_NORMAL_PT_UPDATE, UVMF_INVLPG, UVMF_LOCAL,
};
use crate::err::Result;
use crate::mem::paging::{EntryFlags, PageTableBackend, PagingConfig};
use crate::mem::phys::PhysicalMemory;
use crate::mem::PhysicalAddress;

const FLUSH: u64 = UVMF_INVLPG | UVMF_LOCAL;

pub struct XenBackend<H> {
    hv: H,
    p2m: P2m,
}

impl<H: Hypervisor> XenBackend<H> {
    pub fn new(hv: H, p2m: P2m) -> XenBackend<H> {
        XenBackend { hv, p2m }
    }

    pub fn hypervisor(&mut self) -> &mut H {
        &mut self.hv
    }
}

impl<H: Hypervisor> PageTableBackend for XenBackend<H> {
    fn to_machine<M: PhysicalMemory>(&self, mem: &M, pa: PhysicalAddress) -> Result<u64> {
        self.p2m.pa_to_ma(mem, pa)
    }

    fn to_physical<M: PhysicalMemory>(&self, mem: &M, ma: u64) -> Result<PhysicalAddress> {
        self.p2m.ma_to_pa(mem, ma)
    }

    fn set_entry<M: PhysicalMemory>(
        &mut self,
        mem: &mut M,
        config: &PagingConfig,
        table: PhysicalAddress,
        index: usize,
        _level: usize,
        value: u64,
    ) -> Result<()> {
        let ptr = self.p2m.pa_to_ma(&*mem, table)? + index as u64 * config.entry_size();
        trace!("mmu_update 0x{:x} <- 0x{:x}", ptr, value);
        check("mmu_update", self.hv.mmu_update(ptr | MMU_NORMAL_PT_UPDATE, value))
    }

    /// The guest may not keep a writable mapping of a page table page.
    fn seal_table(&mut self, table: PhysicalAddress, entry: u64) -> Result<()> {
        let value = entry & !EntryFlags::WRITABLE.bits();
        check(
            "update_va_mapping(page table)",
            self.hv.update_va_mapping(table.raw(), value, FLUSH),
        )
    }

    /// Works whenever the tables above the leaf already exist.
    fn map_without_walk(&mut self, va: u64, entry: u64) -> Result<bool> {
        Ok(self.hv.update_va_mapping(va, entry, FLUSH) == 0)
    }

    fn set_leaf<M: PhysicalMemory>(
        &mut self,
        _mem: &mut M,
        _config: &PagingConfig,
        _pte: PhysicalAddress,
        va: u64,
        value: u64,
    ) -> Result<()> {
        check("update_va_mapping", self.hv.update_va_mapping(va, value, FLUSH))
    }

    fn unmap(&mut self, va: u64) -> Result<()> {
        // Pages the builder never mapped are fine to skip.
        let _ = self.hv.update_va_mapping(va, 0, FLUSH);
        Ok(())
    }
}
