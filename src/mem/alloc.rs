//! The bump allocator.
//!
//! Everything below the cursor is in use: the kernel, this image, loader
//! data and every page handed out so far. The cursor only moves up.

use log_crate::trace;

use super::memlist::MemList;
use super::phys::PhysicalMemory;
use super::{align_up, size, PhysicalAddress};
use crate::err::{BootError, Result};

pub struct BumpAllocator {
    /// The next free address.
    next: u64,
    /// Added to memory list addresses to get allocatable addresses.
    offset: u64,
    /// Allocations may not pass this.
    limit: Option<u64>,
}

impl BumpAllocator {
    /// An allocator with nothing in use yet.
    pub const fn new() -> BumpAllocator {
        BumpAllocator {
            next: 0,
            offset: 0,
            limit: None,
        }
    }

    /// An allocator confined to `[next, limit)`, handing out addresses that
    /// sit `offset` above the memory lists' addresses.
    pub const fn bounded(next: u64, offset: u64, limit: u64) -> BumpAllocator {
        BumpAllocator {
            next,
            offset,
            limit: Some(limit),
        }
    }

    /// The first free address.
    pub fn cursor(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.next)
    }

    /// Mark everything up to and including `addr` as used.
    pub fn check_higher(&mut self, addr: u64) {
        if addr < self.next {
            return;
        }
        self.next = align_up(addr + 1, size::PAGE);
        trace!("Allocator cursor raised to 0x{:x}.", self.next);
    }

    /// Allocate `size` zeroed bytes aligned to `align` from installed memory.
    pub fn alloc<M: PhysicalMemory>(
        &mut self,
        mem: &mut M,
        installed: &MemList,
        size: u64,
        align: u64,
    ) -> Result<PhysicalAddress> {
        let size = align_up(size, size::PAGE);
        let align = align.max(size::PAGE);
        let cursor = align_up(self.next, align);

        let mut best = None;
        for e in installed.entries() {
            let start = e.addr + self.offset;
            let end = start + e.size;

            if start <= cursor && cursor + size <= end {
                best = Some(cursor);
                break;
            }

            let candidate = align_up(start, align);
            if start > cursor
                && candidate + size <= end
                && best.map_or(true, |b| candidate < b)
            {
                best = Some(candidate);
            }
        }

        let base = best.ok_or(BootError::OutOfMemory { size, align })?;
        self.next = base + size;
        if let Some(limit) = self.limit {
            if self.next > limit {
                return Err(BootError::ScratchExhausted {
                    cursor: self.next,
                    limit,
                });
            }
        }

        let base = PhysicalAddress::new(base);
        mem.fill(base, 0, size)?;
        trace!("Allocated 0x{:x} bytes at {}.", size, base);
        Ok(base)
    }
}
