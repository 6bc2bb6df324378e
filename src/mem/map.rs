//! Building the memory lists from the loader's memory map.

use log_crate::{debug, trace};

use super::memlist::MemList;
use super::size::{KB, MB};
use super::Range;
use crate::consts::{PCI_HI, PCI_LO};
use crate::err::Result;

/// A raw memory map entry, as reported by the loader.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MmapEntry {
    pub base: u64,
    pub length: u64,
    pub entry_type: u32,
}

impl MmapEntry {
    /// The only type that is usable RAM.
    pub const USABLE: u32 = 1;

    pub const fn new(base: u64, length: u64, entry_type: u32) -> MmapEntry {
        MmapEntry {
            base,
            length,
            entry_type,
        }
    }
}

/// The installed, reserved and PCI-usable memory lists.
pub struct MemoryLists {
    pub installed: MemList,
    pub reserved: MemList,
    pub pci: MemList,
    /// The end of the highest usable region.
    max_mem: u64,
}

impl MemoryLists {
    pub const fn new() -> MemoryLists {
        MemoryLists {
            installed: MemList::new("installed"),
            reserved: MemList::new("reserved"),
            pci: MemList::new("pci"),
            max_mem: 0,
        }
    }

    pub fn max_mem(&self) -> u64 {
        self.max_mem
    }

    /// Sort one raw map entry into the installed or reserved list.
    pub fn classify(&mut self, entry: MmapEntry) -> Result<()> {
        trace!(
            "\tmmap: 0x{:x} - 0x{:x} type {}",
            entry.base,
            entry.base.saturating_add(entry.length),
            entry.entry_type
        );
        let range = match Range::pages_within(entry.base, entry.length) {
            Some(r) => r,
            None => return Ok(()),
        };

        if entry.entry_type == MmapEntry::USABLE {
            self.max_mem = self.max_mem.max(range.end);
            self.installed.push(range.start, range.len())
        } else {
            self.reserved.push(range.start, range.len())
        }
    }

    /// Finish a map-based build: normalize both lists and carve out PCI space.
    pub fn finish_map(&mut self) -> Result<()> {
        self.installed.sort_and_merge();
        self.reserved.sort_and_merge();

        self.pci.clear();
        self.pci.push(PCI_LO, PCI_HI - PCI_LO)?;
        for list in [&self.installed, &self.reserved].iter() {
            for e in list.entries() {
                self.pci.exclude(e.addr, e.end())?;
            }
        }
        self.dump();
        Ok(())
    }

    /// Build from the legacy low/high memory sizes, both in KiB. High memory
    /// starts at 1 MiB.
    pub fn from_basic_meminfo(&mut self, low_kb: u32, high_kb: u32) -> Result<()> {
        let low = u64::from(low_kb) * KB;
        let high = u64::from(high_kb) * KB;

        self.installed.clear();
        self.reserved.clear();
        self.pci.clear();

        self.installed.push(0, low)?;
        self.installed.push(MB, high)?;
        self.installed.sort_and_merge();
        self.max_mem = MB + high;

        let pci_start = high + MB;
        if pci_start < PCI_HI {
            self.pci.push(pci_start, PCI_HI - pci_start)?;
        }
        self.dump();
        Ok(())
    }

    /// A paravirtualized guest owns `size` bytes from zero and nothing else.
    pub fn guest(&mut self, size: u64) -> Result<()> {
        self.installed.clear();
        self.reserved.clear();
        self.pci.clear();
        self.installed.push(0, size)?;
        self.max_mem = size;
        self.dump();
        Ok(())
    }

    /// Link every list at its final address.
    pub fn link(&mut self) {
        self.installed.link_in_place();
        self.reserved.link_in_place();
        self.pci.link_in_place();
    }

    fn dump(&self) {
        debug!("Memory lists (max_mem 0x{:x}):", self.max_mem);
        self.installed.dump();
        self.reserved.dump();
        self.pci.dump();
    }
}

#[cfg(test)]
mod test;
