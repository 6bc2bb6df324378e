//! Fixed-capacity memory lists handed to the kernel.
//!
//! The kernel walks these through their `next`/`prev` links, which are
//! stored as 64-bit values so one layout serves both kernel widths.

use core::mem::size_of;

use log_crate::debug;
use static_assertions::const_assert_eq;

use crate::consts::MAX_MEMLIST;
use crate::err::{BootError, Result};

/// One region of a memory list.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemListEntry {
    pub addr: u64,
    pub size: u64,
    pub next: u64,
    pub prev: u64,
}

const_assert_eq!(size_of::<MemListEntry>(), 32);

impl MemListEntry {
    pub const fn new(addr: u64, size: u64) -> MemListEntry {
        MemListEntry {
            addr,
            size,
            next: 0,
            prev: 0,
        }
    }

    pub const fn end(&self) -> u64 {
        self.addr + self.size
    }

    pub const fn contains(&self, addr: u64) -> bool {
        self.addr <= addr && addr < self.end()
    }
}

/// A list of disjoint memory regions, in a static array.
pub struct MemList {
    name: &'static str,
    entries: [MemListEntry; MAX_MEMLIST],
    len: usize,
}

impl MemList {
    pub const fn new(name: &'static str) -> MemList {
        MemList {
            name,
            entries: [MemListEntry::new(0, 0); MAX_MEMLIST],
            len: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn entries(&self) -> &[MemListEntry] {
        &self.entries[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Append a region.
    pub fn push(&mut self, addr: u64, size: u64) -> Result<()> {
        self.insert(self.len, MemListEntry::new(addr, size))
    }

    fn insert(&mut self, index: usize, entry: MemListEntry) -> Result<()> {
        if self.len == MAX_MEMLIST {
            return Err(BootError::MemListFull(self.name));
        }
        self.entries.copy_within(index..self.len, index + 1);
        self.entries[index] = entry;
        self.len += 1;
        Ok(())
    }

    fn remove(&mut self, index: usize) {
        self.entries.copy_within(index + 1..self.len, index);
        self.len -= 1;
    }

    /// Sort by address and coalesce regions that overlap or touch.
    pub fn sort_and_merge(&mut self) {
        let list = &mut self.entries[..self.len];

        // Exchange sort; the lists are short.
        let mut sorted = false;
        while !sorted {
            sorted = true;
            for i in 1..list.len() {
                if list[i - 1].addr > list[i].addr {
                    list.swap(i - 1, i);
                    sorted = false;
                }
            }
        }

        let mut i = 0;
        while i + 1 < self.len {
            let (cur, next) = (self.entries[i], self.entries[i + 1]);
            if next.addr <= cur.end() {
                self.entries[i].size = cur.end().max(next.end()) - cur.addr;
                self.remove(i + 1);
            } else {
                i += 1;
            }
        }
    }

    /// Remove `[start, end)` from every region, splitting where needed.
    pub fn exclude(&mut self, start: u64, end: u64) -> Result<()> {
        let mut i = 0;
        while i < self.len {
            let ml = self.entries[i];
            if end <= ml.addr || start >= ml.end() {
                i += 1;
            } else if start <= ml.addr && end >= ml.end() {
                self.remove(i);
            } else if start > ml.addr && end < ml.end() {
                self.entries[i].size = start - ml.addr;
                self.insert(i + 1, MemListEntry::new(end, ml.end() - end))?;
                i += 2;
            } else if start <= ml.addr {
                self.entries[i] = MemListEntry::new(end, ml.end() - end);
                i += 1;
            } else {
                self.entries[i].size = start - ml.addr;
                i += 1;
            }
        }
        Ok(())
    }

    /// The address of the first entry, as the kernel will see it.
    pub fn address(&self) -> u64 {
        self.entries.as_ptr() as usize as u64
    }

    /// Chain the entries together, assuming the array lives at `base`.
    pub fn link(&mut self, base: u64) {
        let stride = size_of::<MemListEntry>() as u64;
        let len = self.len;
        for (i, e) in self.entries[..len].iter_mut().enumerate() {
            let i = i as u64;
            e.prev = if i == 0 { 0 } else { base + (i - 1) * stride };
            e.next = if i + 1 == len as u64 {
                0
            } else {
                base + (i + 1) * stride
            };
        }
    }

    /// Chain the entries at their own address.
    pub fn link_in_place(&mut self) {
        self.link(self.address());
    }

    pub fn dump(&self) {
        for e in self.entries() {
            debug!(
                "\t{}: 0x{:x} - 0x{:x} (0x{:x})",
                self.name,
                e.addr,
                e.end(),
                e.size
            );
        }
    }
}
