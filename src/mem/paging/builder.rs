//! The boot page tables: nucleus, window, legacy region, allocated memory
//! and framebuffer.

use log_crate::{debug, info, trace};

use super::table::{Leaf, PageTables};
use super::{EntryFlags, PageTableBackend};
use crate::consts::LEGACY_END;
use crate::err::{BootError, Result};
use crate::mem::phys::PhysicalMemory;
use crate::mem::size::PAGE;
use crate::mem::{PhysicalAddress, Range};

/// Where the kernel nucleus is and where it must appear.
#[derive(Debug, Clone, Copy)]
pub struct NucleusLayout {
    pub phys: PhysicalAddress,
    pub virt: u64,
    pub size: u64,
}

/// What the kernel needs to know about the finished tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSummary {
    pub top: PhysicalAddress,
    /// A page the kernel remaps to reach arbitrary page table pages.
    pub pt_window: PhysicalAddress,
    /// The level 0 entry that maps `pt_window`.
    pub pte_to_pt_window: PhysicalAddress,
}

impl<'a, M: PhysicalMemory, B: PageTableBackend> PageTables<'a, M, B> {
    /// Build the whole tree. `identity` maps the legacy region and all
    /// allocated memory 1:1, which bare metal needs and a hypervisor
    /// provides itself.
    pub fn build(
        &mut self,
        nucleus: &NucleusLayout,
        identity: bool,
        framebuffer: Option<Range>,
    ) -> Result<TableSummary> {
        self.map_nucleus(nucleus)?;

        let pt_window = self.alloc.alloc(&mut *self.mem, self.installed, PAGE, PAGE)?;
        let pte_to_pt_window = self
            .find_pte(pt_window.raw(), 0, false)?
            .ok_or(BootError::CorruptPageTable {
                va: pt_window.raw(),
                level: 0,
            })?;
        debug!("pt_window {}, pte_to_pt_window {}.", pt_window, pte_to_pt_window);

        if identity {
            self.map_legacy()?;
            self.map_allocated()?;
            if let Some(fb) = framebuffer {
                self.map_framebuffer(fb)?;
            }
        }

        info!("DONE page tables (top {}).", self.top);
        Ok(TableSummary {
            top: self.top,
            pt_window,
            pte_to_pt_window,
        })
    }

    fn map_nucleus(&mut self, nucleus: &NucleusLayout) -> Result<()> {
        let (step, level) = if self.config.large_pages {
            (self.config.large_page_size(), 1)
        } else {
            (PAGE, 0)
        };
        debug!(
            "Mapping nucleus {} -> 0x{:x} (0x{:x} bytes, 0x{:x} pages).",
            nucleus.phys, nucleus.virt, nucleus.size, step
        );

        let mut off = 0;
        while off < nucleus.size {
            self.map_pa_at_va(nucleus.phys + off, nucleus.virt + off, level, EntryFlags::empty())?;
            off += step;
        }
        Ok(())
    }

    /// 1:1 map the low megabyte, where drivers still find BIOS tables.
    fn map_legacy(&mut self) -> Result<()> {
        trace!("1:1 map pa=0..0x{:x}", LEGACY_END);
        let mut pa = 0;
        while pa < LEGACY_END {
            self.map_pa_at_va(PhysicalAddress::new(pa), pa, 0, EntryFlags::empty())?;
            pa += PAGE;
        }
        Ok(())
    }

    /// 1:1 map every installed page below the allocator cursor. Mapping can
    /// allocate tables, which moves the cursor, so it's checked each page.
    fn map_allocated(&mut self) -> Result<()> {
        let installed = self.installed;
        for e in installed.entries() {
            trace!("1:1 map pa=0x{:x}..0x{:x}", e.addr, e.end());
            let mut pa = e.addr;
            while pa < e.end() && pa < self.alloc.cursor().raw() {
                self.map_pa_at_va(PhysicalAddress::new(pa), pa, 0, EntryFlags::empty())?;
                pa += PAGE;
            }
        }
        Ok(())
    }

    /// 1:1 map the framebuffer uncached, write-combining where PAT allows.
    fn map_framebuffer(&mut self, fb: Range) -> Result<()> {
        let mut extra = EntryFlags::CACHE_DISABLED;
        if self.config.pat {
            extra |= EntryFlags::PAT_4K;
        }
        trace!("1:1 map framebuffer 0x{:x}..0x{:x}", fb.start, fb.end);

        let mut pa = fb.start;
        while pa < fb.end {
            self.map_pa_at_va(PhysicalAddress::new(pa), pa, 0, extra)?;
            pa += PAGE;
        }
        Ok(())
    }

    /// Log the finished tree, merging runs of contiguous mappings.
    pub fn dump(&self) -> Result<()> {
        trace!("Page tables (top {}):", self.top);
        let mut run: Option<(Leaf, u64)> = None;
        self.walk(|leaf| {
            if let Some((first, count)) = run.as_mut() {
                let size = self.config.level_size(first.level);
                let span = *count * size;
                if leaf.level == first.level
                    && leaf.flags == first.flags
                    && leaf.va == first.va.wrapping_add(span)
                    && leaf.pa == first.pa + span
                {
                    *count += 1;
                    return;
                }
                dump_run(first, *count, size);
            }
            run = Some((*leaf, 1));
        })?;
        if let Some((first, count)) = run {
            dump_run(&first, count, self.config.level_size(first.level));
        }
        Ok(())
    }
}

fn dump_run(first: &Leaf, count: u64, size: u64) {
    trace!(
        "\tva=0x{:x} -> pa={} x 0x{:x} (level {}, {:?})",
        first.va,
        first.pa,
        count * size,
        first.level,
        first.flags
    );
}
