//! Translation between the guest's pseudo-physical addresses and the
//! machine addresses page table entries hold.
//!
//! The bootstrap sees pseudo-physical memory at a fixed bias, so the
//! addresses it works with are `mfn_base` plus the pseudo-physical address.

use super::start_info::StartInfo;
use crate::err::{BootError, Result};
use crate::mem::phys::PhysicalMemory;
use crate::mem::size::{PAGE, PAGE_SHIFT};
use crate::mem::PhysicalAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct P2m {
    start_info: StartInfo,
    /// Guest frame to machine frame table.
    mfn_list: PhysicalAddress,
    /// Machine frame to guest frame table, mapped by the hypervisor.
    m2p: PhysicalAddress,
    nr_pages: u64,
    mfn_base: u64,
}

impl P2m {
    pub fn new<M: PhysicalMemory>(
        mem: &M,
        start_info: StartInfo,
        m2p: u64,
        mfn_base: u64,
    ) -> Result<P2m> {
        Ok(P2m {
            start_info,
            mfn_list: PhysicalAddress::new(start_info.mfn_list(mem)?),
            m2p: PhysicalAddress::new(m2p),
            nr_pages: start_info.nr_pages(mem)?,
            mfn_base,
        })
    }

    pub fn nr_pages(&self) -> u64 {
        self.nr_pages
    }

    fn entry<M: PhysicalMemory>(&self, mem: &M, table: PhysicalAddress, index: u64) -> Result<u64> {
        let word = self.start_info.word_size();
        self.start_info.read_word(mem, table + index * word)
    }

    pub fn pa_to_ma<M: PhysicalMemory>(&self, mem: &M, pa: PhysicalAddress) -> Result<u64> {
        let pa = pa.raw();
        if pa < self.mfn_base {
            return Err(BootError::BadTranslation(pa));
        }
        let pfn = (pa - self.mfn_base) >> PAGE_SHIFT;
        if pfn >= self.nr_pages {
            return Err(BootError::BadTranslation(pa));
        }
        let mfn = self.entry(mem, self.mfn_list, pfn)?;
        Ok((mfn << PAGE_SHIFT) | (pa & (PAGE - 1)))
    }

    pub fn ma_to_pa<M: PhysicalMemory>(&self, mem: &M, ma: u64) -> Result<PhysicalAddress> {
        let pfn = self.entry(mem, self.m2p, ma >> PAGE_SHIFT)?;
        if pfn >= self.nr_pages {
            return Err(BootError::BadTranslation(ma));
        }
        Ok(PhysicalAddress::new(
            self.mfn_base + (pfn << PAGE_SHIFT) + (ma & (PAGE - 1)),
        ))
    }
}
