//! Moving loader data out of the kernel's way.
//!
//! The loader leaves its info structures and modules wherever it likes,
//! often right where the allocator wants to hand out pages. Relocation
//! runs in two passes over one list of copy tasks: the first only adds up
//! sizes, the second copies and patches the 32-bit pointers that referred
//! to the old locations. Structures go to a fixed buffer inside this
//! image, modules to page-aligned memory right after it.

use log_crate::{debug, info, warn};

use super::loader::Loader;
use crate::consts::MAX_MODULES;
use crate::err::{BootError, Result};
use crate::mem::memlist::MemList;
use crate::mem::phys::PhysicalMemory;
use crate::mem::{align_up, size, PhysicalAddress, Range};

/// Top-level info, its eight side tables, the module table, and a name and
/// body per module.
pub const MAX_TASKS: usize = 10 + 2 * MAX_MODULES;

/// Alignment of relocated structures.
const STRUCTURE_ALIGN: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Area {
    /// The static buffer.
    Structures,
    /// Page-aligned memory after the image.
    Modules,
}

/// A 32-bit pointer field `offset` bytes into the copy made by task `task`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixup {
    pub task: usize,
    pub offset: u64,
}

impl Fixup {
    pub const fn new(task: usize, offset: u64) -> Fixup {
        Fixup { task, offset }
    }
}

/// One object to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Task {
    pub label: &'static str,
    pub src: PhysicalAddress,
    pub len: u64,
    pub area: Area,
    /// Receives the new address.
    pub start: Option<Fixup>,
    /// Receives the new end address.
    pub end: Option<Fixup>,
}

const NO_TASK: Task = Task {
    label: "",
    src: PhysicalAddress::new(0),
    len: 0,
    area: Area::Structures,
    start: None,
    end: None,
};

/// Every copy a relocation performs, in the order they were added. Fixups
/// may only refer to earlier tasks, so by the time a pointer is patched
/// the structure holding it has already moved.
pub struct RelocPlan {
    tasks: [Task; MAX_TASKS],
    len: usize,
}

impl RelocPlan {
    pub const fn new() -> RelocPlan {
        RelocPlan {
            tasks: [NO_TASK; MAX_TASKS],
            len: 0,
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks[..self.len]
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn push(&mut self, task: Task) -> Result<usize> {
        if self.len == MAX_TASKS {
            return Err(BootError::RelocPlanFull(task.label));
        }
        self.tasks[self.len] = task;
        self.len += 1;
        Ok(self.len - 1)
    }

    /// Add a structure to move into the buffer. The first one added is the
    /// root the loader is rebuilt from afterwards.
    pub fn structure(
        &mut self,
        label: &'static str,
        src: u64,
        len: u64,
        pointer: Option<Fixup>,
    ) -> Result<usize> {
        self.push(Task {
            label,
            src: PhysicalAddress::new(src),
            len,
            area: Area::Structures,
            start: pointer,
            end: None,
        })
    }

    /// Add a module body, with the pointers to its start and end.
    pub fn module(&mut self, src: u64, len: u64, start: Fixup, end: Fixup) -> Result<usize> {
        self.push(Task {
            label: "module",
            src: PhysicalAddress::new(src),
            len,
            area: Area::Modules,
            start: Some(start),
            end: Some(end),
        })
    }

    /// The buffer space the structures need, worst case.
    pub fn structures_size(&self) -> u64 {
        let sum = self
            .tasks()
            .iter()
            .filter(|t| t.area == Area::Structures)
            .fold(0, |acc, t| align_up(acc, STRUCTURE_ALIGN) + t.len);
        sum + STRUCTURE_ALIGN
    }

    /// The contiguous memory the modules need, worst case.
    pub fn modules_size(&self) -> u64 {
        let sum = self
            .tasks()
            .iter()
            .filter(|t| t.area == Area::Modules)
            .fold(0, |acc, t| align_up(acc, size::PAGE) + t.len);
        sum + size::PAGE
    }

    /// Task indices in copy order: structures as added, then module bodies
    /// by ascending source address.
    fn order(&self) -> ([usize; MAX_TASKS], usize) {
        let mut order = [0; MAX_TASKS];
        let mut n = 0;
        for (i, t) in self.tasks().iter().enumerate() {
            if t.area == Area::Structures {
                order[n] = i;
                n += 1;
            }
        }
        let first_module = n;
        for (i, t) in self.tasks().iter().enumerate() {
            if t.area == Area::Modules {
                order[n] = i;
                n += 1;
            }
        }
        order[first_module..n].sort_unstable_by_key(|&i| self.tasks[i].src);
        (order, n)
    }

    /// Where each task lands, indexed like the tasks.
    fn destinations(&self, order: &[usize], buffer: u64, modules: u64) -> [u64; MAX_TASKS] {
        let mut dest = [0; MAX_TASKS];
        let mut next_structure = buffer;
        let mut next_module = modules;
        for &i in order {
            let t = &self.tasks[i];
            let cursor = match t.area {
                Area::Structures => &mut next_structure,
                Area::Modules => &mut next_module,
            };
            let align = match t.area {
                Area::Structures => STRUCTURE_ALIGN,
                Area::Modules => size::PAGE,
            };
            *cursor = align_up(*cursor, align);
            dest[i] = *cursor;
            *cursor += t.len;
        }
        dest
    }

    /// Whether copying in `order` to `dest` never clobbers a source that
    /// is still waiting to be copied, and every pointer stays 32-bit.
    fn is_safe(&self, order: &[usize], dest: &[u64; MAX_TASKS]) -> bool {
        for (p, &i) in order.iter().enumerate() {
            let t = &self.tasks[i];
            let to = Range::new(dest[i], dest[i] + t.len);
            if to.end > u64::from(u32::MAX) {
                warn!("Relocated {} would end above 4G (0x{:x}).", t.label, to.end);
                return false;
            }

            for &j in &order[p + 1..] {
                let later = &self.tasks[j];
                let from = Range::new(later.src.raw(), later.src.raw() + later.len);
                if t.len != 0 && later.len != 0 && to.overlaps(&from) {
                    warn!(
                        "Relocated {} at 0x{:x} would overwrite {} at {}.",
                        t.label, to.start, later.label, later.src
                    );
                    return false;
                }
            }
        }
        true
    }

    /// Copy everything and patch the pointers. Returns the new address of
    /// the root structure, or `None` if the plan would corrupt its own
    /// sources, in which case nothing was touched.
    pub fn execute<M: PhysicalMemory>(
        &self,
        mem: &mut M,
        buffer: PhysicalAddress,
        modules: PhysicalAddress,
    ) -> Result<Option<PhysicalAddress>> {
        if self.is_empty() {
            return Ok(None);
        }

        let (order, n) = self.order();
        let order = &order[..n];
        let dest = self.destinations(order, buffer.raw(), modules.raw());
        if !self.is_safe(order, &dest) {
            return Ok(None);
        }

        for &i in order {
            let t = &self.tasks[i];
            let to = PhysicalAddress::new(dest[i]);
            debug!("Relocating {}: {} -> {} (0x{:x} bytes).", t.label, t.src, to, t.len);
            mem.copy(t.src, to, t.len)?;

            if let Some(f) = t.start {
                mem.write_u32(PhysicalAddress::new(dest[f.task] + f.offset), dest[i] as u32)?;
            }
            if let Some(f) = t.end {
                let end = (dest[i] + t.len) as u32;
                mem.write_u32(PhysicalAddress::new(dest[f.task] + f.offset), end)?;
            }
        }

        Ok(Some(PhysicalAddress::new(dest[0])))
    }
}

/// Where loader data can go.
#[derive(Debug, Clone, Copy)]
pub struct RelocTarget {
    /// The static buffer for structures.
    pub buffer: PhysicalAddress,
    pub buffer_size: u64,
    /// The end of this image. Modules go here if there's room.
    pub image_end: u64,
}

/// Find `len` bytes of installed memory for modules: right at `image_end`
/// if the region holding it has room, otherwise the first region above it
/// that is big enough.
pub fn module_region(installed: &MemList, image_end: u64, len: u64) -> Option<u64> {
    let mut fallback = None;
    for e in installed.entries() {
        if e.addr <= image_end && (image_end - e.addr) + len <= e.size {
            return Some(image_end);
        }
        if fallback.is_none() && e.addr >= image_end && e.size >= len {
            fallback = Some(e.addr);
        }
    }
    fallback
}

/// Move the loader's structures and modules. Returns the loader over the
/// moved data, or `None` when relocation had to be skipped and everything
/// stays where the loader put it.
pub fn relocate<M: PhysicalMemory>(
    mem: &mut M,
    loader: &Loader,
    installed: &MemList,
    target: &RelocTarget,
) -> Result<Option<Loader>> {
    let mut plan = RelocPlan::new();
    loader.plan_relocation(mem, &mut plan)?;
    if plan.is_empty() {
        debug!("Nothing to relocate.");
        return Ok(None);
    }

    let structures = plan.structures_size();
    let modules = plan.modules_size();
    debug!(
        "Memory usage of loader data: 0x{:x}, modules 0x{:x}.",
        structures, modules
    );
    if structures > target.buffer_size {
        warn!(
            "Loader structures are too big for relocation (0x{:x} > 0x{:x}).",
            structures, target.buffer_size
        );
        return Ok(None);
    }

    let base = match module_region(installed, target.image_end, modules) {
        Some(base) => base,
        None => {
            warn!("Could not perform relocation: not enough contiguous available memory.");
            return Ok(None);
        }
    };

    let root = match plan.execute(mem, target.buffer, PhysicalAddress::new(base))? {
        Some(root) => root,
        None => return Ok(None),
    };
    info!("Relocated loader data to {}, modules to 0x{:x}.", root, base);
    loader.relocated(mem, root).map(Some)
}
