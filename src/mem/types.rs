//! Basic types and utilities for dealing with memory.

use core::fmt::{self, Debug, Display, Formatter};
use core::ops::{Add, Sub};

/// Convenience constants for dealing with memory sizes.
pub mod size {
    /// The number of bytes in 1 KiB.
    pub const KB: u64 = 1024;
    /// The number of bytes in 1 MiB.
    pub const MB: u64 = 1024 * KB;
    /// The size of a small page.
    pub const PAGE: u64 = 4 * KB;
    /// log2 of [`PAGE`].
    pub const PAGE_SHIFT: u32 = 12;
}

/// The previous number with the given alignment.
#[inline]
pub const fn align_down(n: u64, align: u64) -> u64 {
    n & !(align - 1)
}

/// The next number with the given alignment.
#[inline]
pub const fn align_up(n: u64, align: u64) -> u64 {
    align_down(n.wrapping_add(align - 1), align)
}

/// A physical address. Under a hypervisor this is pseudo-physical.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
#[repr(transparent)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    pub const fn new(address: u64) -> PhysicalAddress {
        PhysicalAddress(address)
    }

    /// The underlying address.
    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn align_up(self, align: u64) -> PhysicalAddress {
        PhysicalAddress(align_up(self.0, align))
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = PhysicalAddress;

    fn add(self, rhs: u64) -> PhysicalAddress {
        PhysicalAddress(self.0.wrapping_add(rhs))
    }
}

impl Sub<PhysicalAddress> for PhysicalAddress {
    type Output = u64;

    fn sub(self, rhs: PhysicalAddress) -> u64 {
        self.0.wrapping_sub(rhs.0)
    }
}

impl Debug for PhysicalAddress {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "PhysicalAddress(0x{:x})", self.0)
    }
}

impl Display for PhysicalAddress {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// A page-aligned range of memory.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Range {
    pub start: u64,
    pub end: u64,
}

impl Range {
    pub const fn new(start: u64, end: u64) -> Range {
        Range { start, end }
    }

    /// Shrink `[base, base + len)` to the pages it fully covers.
    pub fn pages_within(base: u64, len: u64) -> Option<Range> {
        let start = align_up(base, size::PAGE);
        let end = align_down(base.saturating_add(len), size::PAGE);
        if start < end && start >= base {
            Some(Range { start, end })
        } else {
            None
        }
    }

    pub const fn len(&self) -> u64 {
        self.end - self.start
    }

    pub const fn overlaps(&self, other: &Range) -> bool {
        self.start < other.end && other.start < self.end
    }
}
