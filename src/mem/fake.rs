//! Fake physical memory for tests.

use std::cell::RefCell;
use std::ops::Range;
use std::rc::Rc;

use crate::err::{BootError, Result};
use crate::mem::phys::PhysicalMemory;
use crate::mem::PhysicalAddress;

/// A window of zeroed memory starting at `base`. Clones share the same
/// bytes, the way a hypervisor and its guest see the same frames.
#[derive(Clone)]
pub struct FakeMemory {
    base: u64,
    bytes: Rc<RefCell<Vec<u8>>>,
}

impl FakeMemory {
    pub fn new(base: u64, size: u64) -> FakeMemory {
        FakeMemory {
            base,
            bytes: Rc::new(RefCell::new(vec![0; size as usize])),
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn end(&self) -> u64 {
        self.base + self.bytes.borrow().len() as u64
    }

    fn range(&self, addr: PhysicalAddress, len: u64) -> Result<Range<usize>> {
        let bad = BootError::BadAccess {
            address: addr.raw(),
            len,
        };
        let start = addr.raw().checked_sub(self.base).ok_or(bad)?;
        let end = start.checked_add(len).ok_or(bad)?;
        if end > self.bytes.borrow().len() as u64 {
            return Err(bad);
        }
        Ok(start as usize..end as usize)
    }

    /// Store a NUL-terminated copy of `s` at `addr`.
    pub fn put_str(&mut self, addr: u64, s: &str) {
        self.write(PhysicalAddress::new(addr), s.as_bytes()).unwrap();
        self.write(PhysicalAddress::new(addr + s.len() as u64), &[0]).unwrap();
    }

    pub fn put_u16(&mut self, addr: u64, v: u16) {
        self.write_u16(PhysicalAddress::new(addr), v).unwrap();
    }

    pub fn put_u32(&mut self, addr: u64, v: u32) {
        self.write_u32(PhysicalAddress::new(addr), v).unwrap();
    }

    pub fn put_u64(&mut self, addr: u64, v: u64) {
        self.write_u64(PhysicalAddress::new(addr), v).unwrap();
    }

    pub fn get_u32(&self, addr: u64) -> u32 {
        self.read_u32(PhysicalAddress::new(addr)).unwrap()
    }

    pub fn get_u64(&self, addr: u64) -> u64 {
        self.read_u64(PhysicalAddress::new(addr)).unwrap()
    }

    pub fn bytes(&self, addr: u64, len: u64) -> Vec<u8> {
        let mut v = vec![0; len as usize];
        self.read(PhysicalAddress::new(addr), &mut v).unwrap();
        v
    }
}

impl PhysicalMemory for FakeMemory {
    fn read(&self, addr: PhysicalAddress, buf: &mut [u8]) -> Result<()> {
        let r = self.range(addr, buf.len() as u64)?;
        buf.copy_from_slice(&self.bytes.borrow()[r]);
        Ok(())
    }

    fn write(&mut self, addr: PhysicalAddress, data: &[u8]) -> Result<()> {
        let r = self.range(addr, data.len() as u64)?;
        self.bytes.borrow_mut()[r].copy_from_slice(data);
        Ok(())
    }

    fn copy(&mut self, src: PhysicalAddress, dst: PhysicalAddress, len: u64) -> Result<()> {
        let from = self.range(src, len)?;
        let to = self.range(dst, len)?;
        self.bytes.borrow_mut().copy_within(from, to.start);
        Ok(())
    }

    fn fill(&mut self, addr: PhysicalAddress, value: u8, len: u64) -> Result<()> {
        let r = self.range(addr, len)?;
        self.bytes.borrow_mut()[r].iter_mut().for_each(|b| *b = value);
        Ok(())
    }
}
