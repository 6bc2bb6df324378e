//! Page table writes on bare metal: plain stores to identity-mapped memory.

use super::{PageTableBackend, PagingConfig};
use crate::err::Result;
use crate::mem::phys::PhysicalMemory;
use crate::mem::PhysicalAddress;
use crate::util::register;

/// Physical and machine addresses are the same, and entries are stored
/// directly.
#[derive(Debug, Default)]
pub struct DirectBackend;

impl DirectBackend {
    fn store<M: PhysicalMemory>(
        mem: &mut M,
        config: &PagingConfig,
        addr: PhysicalAddress,
        value: u64,
    ) -> Result<()> {
        if config.pae {
            mem.write_u64(addr, value)
        } else {
            mem.write_u32(addr, value as u32)
        }
    }
}

impl PageTableBackend for DirectBackend {
    fn to_machine<M: PhysicalMemory>(&self, _mem: &M, pa: PhysicalAddress) -> Result<u64> {
        Ok(pa.raw())
    }

    fn to_physical<M: PhysicalMemory>(&self, _mem: &M, ma: u64) -> Result<PhysicalAddress> {
        Ok(PhysicalAddress::new(ma))
    }

    fn set_entry<M: PhysicalMemory>(
        &mut self,
        mem: &mut M,
        config: &PagingConfig,
        table: PhysicalAddress,
        index: usize,
        level: usize,
        value: u64,
    ) -> Result<()> {
        Self::store(mem, config, table + index as u64 * config.entry_size(), value)?;
        if config.reloads_on_write(level) {
            register::reload_cr3();
        }
        Ok(())
    }

    fn set_leaf<M: PhysicalMemory>(
        &mut self,
        mem: &mut M,
        config: &PagingConfig,
        pte: PhysicalAddress,
        _va: u64,
        value: u64,
    ) -> Result<()> {
        Self::store(mem, config, pte, value)
    }

    fn unmap(&mut self, _va: u64) -> Result<()> {
        Ok(())
    }
}
