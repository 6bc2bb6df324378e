//! Boot errors and the fatal path.
//!
//! Nothing at this stage can recover from an error, so every failure
//! bubbles up to the entry point, gets reported once, and halts.

use core::fmt::{self, Display, Formatter};

use crate::consts::MAX_MODULES;

#[cfg(not(test))]
mod panic;

/// Everything that can stop the bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    /// Neither a multiboot v1 nor a v2 info pointer was handed over.
    NoLoaderInfo,
    /// The loader reported neither a memory map nor basic memory sizes.
    NoMemoryInfo,
    /// A memory list ran out of slots.
    MemListFull(&'static str),
    /// The loader handed over more modules than fit in the module table.
    TooManyModules(usize),
    /// The relocation plan has no room for another task.
    RelocPlanFull(&'static str),
    /// A module ends before it starts.
    ModuleStartAfterEnd { index: usize, start: u64, end: u64 },
    /// Index past the end of a loader table.
    IndexOutOfRange { what: &'static str, index: usize, count: usize },
    /// A memory access outside the backing store.
    BadAccess { address: u64, len: u64 },
    /// No installed memory left for an allocation.
    OutOfMemory { size: u64, align: u64 },
    /// A hypervisor-target allocation left the scratch region.
    ScratchExhausted { cursor: u64, limit: u64 },
    /// A pseudo-physical or machine address outside the guest's pages.
    BadTranslation(u64),
    /// The CPU lacks a feature the target kernel needs.
    MissingCpuFeature(&'static str),
    /// A hypercall returned an error code.
    Hypercall { op: &'static str, code: i64 },
    /// Booted through the obsolete `multiboot` shim.
    LegacyMultiboot,
    /// The page-table walk found something it never builds.
    CorruptPageTable { va: u64, level: usize },
    /// A loader structure that doesn't parse.
    MalformedInfo(&'static str),
    /// The kernel's ELF image couldn't be loaded.
    KernelImage,
}

impl Display for BootError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            BootError::NoLoaderInfo => write!(f, "No multiboot information from the boot loader"),
            BootError::NoMemoryInfo => write!(f, "No memory info from boot loader"),
            BootError::MemListFull(list) => write!(f, "Too many entries in the {} memlist", list),
            BootError::TooManyModules(n) => write!(
                f,
                "Too many modules ({}) -- the maximum is {}",
                n, MAX_MODULES
            ),
            BootError::RelocPlanFull(label) => {
                write!(f, "No room to plan relocation of the {}", label)
            }
            BootError::ModuleStartAfterEnd { index, start, end } => write!(
                f,
                "Module {}: start address 0x{:x} greater than end address 0x{:x}",
                index, start, end
            ),
            BootError::IndexOutOfRange { what, index, count } => {
                write!(f, "{} index {} out of range (count {})", what, index, count)
            }
            BootError::BadAccess { address, len } => {
                write!(f, "Access of 0x{:x} bytes at 0x{:x} is out of bounds", len, address)
            }
            BootError::OutOfMemory { size, align } => write!(
                f,
                "Couldn't find memory for 0x{:x} bytes aligned to 0x{:x}",
                size, align
            ),
            BootError::ScratchExhausted { cursor, limit } => write!(
                f,
                "Out of scratch memory (cursor 0x{:x}, limit 0x{:x})",
                cursor, limit
            ),
            BootError::BadTranslation(a) => write!(f, "Address 0x{:x} has no translation", a),
            BootError::MissingCpuFeature(what) => {
                write!(f, "The target kernel needs a CPU with {}", what)
            }
            BootError::Hypercall { op, code } => write!(f, "Hypercall {} failed: {}", op, code),
            BootError::LegacyMultiboot => write!(
                f,
                "The \"multiboot\" boot shim is obsolete; boot the kernel directly from the loader"
            ),
            BootError::CorruptPageTable { va, level } => {
                write!(f, "Unexpected page table entry for 0x{:x} at level {}", va, level)
            }
            BootError::MalformedInfo(what) => write!(f, "Malformed loader info: {}", what),
            BootError::KernelImage => write!(f, "Failed to parse kernel ELF image"),
        }
    }
}

pub type Result<T> = core::result::Result<T, BootError>;
