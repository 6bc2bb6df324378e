//! Access to physical memory.
//!
//! Everything the bootstrap reads or writes outside its own image goes
//! through [`PhysicalMemory`], so the same code runs against real memory
//! and against a fake in tests.

use core::convert::TryFrom;
use core::ptr;

use crate::err::{BootError, Result};
use crate::mem::PhysicalAddress;

/// The longest string [`PhysicalMemory::strlen`] will scan.
const STRLEN_MAX: u64 = 64 * 1024;

/// Byte-addressed physical memory.
pub trait PhysicalMemory {
    /// Fill `buf` from memory at `addr`.
    fn read(&self, addr: PhysicalAddress, buf: &mut [u8]) -> Result<()>;

    /// Store `data` at `addr`.
    fn write(&mut self, addr: PhysicalAddress, data: &[u8]) -> Result<()>;

    /// Copy `len` bytes from `src` to `dst`. The ranges may overlap.
    fn copy(&mut self, src: PhysicalAddress, dst: PhysicalAddress, len: u64) -> Result<()>;

    /// Set `len` bytes at `addr` to `value`.
    fn fill(&mut self, addr: PhysicalAddress, value: u8, len: u64) -> Result<()>;

    fn read_u8(&self, addr: PhysicalAddress) -> Result<u8> {
        let mut b = [0; 1];
        self.read(addr, &mut b)?;
        Ok(b[0])
    }

    fn read_u16(&self, addr: PhysicalAddress) -> Result<u16> {
        let mut b = [0; 2];
        self.read(addr, &mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    fn read_u32(&self, addr: PhysicalAddress) -> Result<u32> {
        let mut b = [0; 4];
        self.read(addr, &mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn read_u64(&self, addr: PhysicalAddress) -> Result<u64> {
        let mut b = [0; 8];
        self.read(addr, &mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    fn write_u16(&mut self, addr: PhysicalAddress, value: u16) -> Result<()> {
        self.write(addr, &value.to_le_bytes())
    }

    fn write_u32(&mut self, addr: PhysicalAddress, value: u32) -> Result<()> {
        self.write(addr, &value.to_le_bytes())
    }

    fn write_u64(&mut self, addr: PhysicalAddress, value: u64) -> Result<()> {
        self.write(addr, &value.to_le_bytes())
    }

    /// The length of the NUL-terminated string at `addr`, terminator excluded.
    fn strlen(&self, addr: PhysicalAddress) -> Result<u64> {
        let mut len = 0;
        while self.read_u8(addr + len)? != 0 {
            len += 1;
            if len >= STRLEN_MAX {
                return Err(BootError::BadAccess {
                    address: addr.raw(),
                    len,
                });
            }
        }
        Ok(len)
    }
}

/// Physical memory as seen with paging off or identity mapped, which is how
/// the bootstrap runs on bare metal.
pub struct IdentityMemory(());

impl IdentityMemory {
    /// # Safety
    /// Every address handed to the returned value must be identity mapped
    /// (or paging must be off), and nothing else may own the memory touched.
    pub const unsafe fn new() -> IdentityMemory {
        IdentityMemory(())
    }

    fn ptr(addr: PhysicalAddress, len: u64) -> Result<*mut u8> {
        let bad = BootError::BadAccess {
            address: addr.raw(),
            len,
        };
        let end = addr.raw().checked_add(len).ok_or(bad)?;
        usize::try_from(end).map_err(|_| bad)?;
        Ok(addr.raw() as usize as *mut u8)
    }
}

impl PhysicalMemory for IdentityMemory {
    fn read(&self, addr: PhysicalAddress, buf: &mut [u8]) -> Result<()> {
        let src = Self::ptr(addr, buf.len() as u64)?;
        // SAFETY: The range is identity mapped, per `new`.
        unsafe { ptr::copy(src, buf.as_mut_ptr(), buf.len()) };
        Ok(())
    }

    fn write(&mut self, addr: PhysicalAddress, data: &[u8]) -> Result<()> {
        let dst = Self::ptr(addr, data.len() as u64)?;
        // SAFETY: As above.
        unsafe { ptr::copy(data.as_ptr(), dst, data.len()) };
        Ok(())
    }

    fn copy(&mut self, src: PhysicalAddress, dst: PhysicalAddress, len: u64) -> Result<()> {
        let from = Self::ptr(src, len)?;
        let to = Self::ptr(dst, len)?;
        // SAFETY: As above. `ptr::copy` handles overlap.
        unsafe { ptr::copy(from, to, len as usize) };
        Ok(())
    }

    fn fill(&mut self, addr: PhysicalAddress, value: u8, len: u64) -> Result<()> {
        let dst = Self::ptr(addr, len)?;
        // SAFETY: As above.
        unsafe { ptr::write_bytes(dst, value, len as usize) };
        Ok(())
    }
}
