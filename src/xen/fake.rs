//! A fake amd64 domain and the hypervisor underneath it.
//!
//! The domain's pseudo-physical pages appear at `ONE_GIG`, mapped 4 KiB at
//! a time by tables the fake domain builder leaves behind, just like a real
//! guest's first 4 MiB. Machine frames are the pseudo-physical frames with
//! the low bit flipped, so a translation that gets skipped shows up.

use super::start_info::fixture::StartInfoFixture;
use super::start_info::StartInfo;
use super::{Hypervisor, XENVER_CAPABILITIES, XENVER_PLATFORM_PARAMETERS};
use crate::consts::{Target, ONE_GIG};
use crate::mem::fake::FakeMemory;
use crate::mem::size::PAGE;

pub const NR_PAGES: u64 = 4096;
pub const START_INFO: u64 = ONE_GIG + 0x10_0000;
pub const MODULE: u64 = ONE_GIG + 0x11_0000;
pub const MODULE_LEN: u64 = 0x3000;
pub const PT_BASE: u64 = ONE_GIG + 0x18_0000;
/// Top of the bootstrap's stack.
pub const STACK_TOP: u64 = ONE_GIG + 0x20_0000;
pub const MFN_LIST: u64 = ONE_GIG + 0xe0_0000;
pub const M2P: u64 = ONE_GIG + 0xf0_0000;
/// The builder maps `[ONE_GIG, ONE_GIG + MAPPED)`.
pub const MAPPED: u64 = 0x40_0000;
pub const SHARED_INFO: u64 = 0x7_f000;

const PRESENT: u64 = 1;
const TABLE: u64 = 0x7;
const ADDRESS: u64 = 0x000f_ffff_ffff_f000;

pub struct Domain {
    pub mem: FakeMemory,
    pub start_info: StartInfo,
    /// Where the hypervisor mapped its machine-to-physical table.
    pub m2p: u64,
}

impl Domain {
    pub fn new(target: Target) -> Domain {
        let mut mem = FakeMemory::new(ONE_GIG, NR_PAGES * PAGE);
        for pfn in 0..NR_PAGES {
            let mfn = Self::mfn(pfn);
            mem.put_u64(MFN_LIST + pfn * 8, mfn);
            mem.put_u64(M2P + mfn * 8, pfn);
        }

        let start_info = StartInfoFixture {
            nr_pages: NR_PAGES,
            shared_info: SHARED_INFO,
            pt_base: PT_BASE,
            nr_pt_frames: 5,
            mfn_list: MFN_LIST,
            mod_start: MODULE,
            mod_len: MODULE_LEN,
            cmdline: "/platform/i86xpv/kernel/amd64/unix -B console=hypervisor",
        }
        .write(&mut mem, START_INFO, target);

        let dom = Domain {
            mem,
            start_info,
            m2p: M2P,
        };
        dom.build_tables();
        dom
    }

    fn mfn(pfn: u64) -> u64 {
        pfn ^ 1
    }

    /// The machine frame backing guest frame `pfn`.
    pub fn machine_frame(&self, pfn: u64) -> u64 {
        Self::mfn(pfn)
    }

    /// The machine address of guest virtual address `va`.
    pub fn machine_address(&self, va: u64) -> u64 {
        let pfn = (va - ONE_GIG) / PAGE;
        Self::mfn(pfn) * PAGE | (va & (PAGE - 1))
    }

    /// L4, L3, L2 and two L1s mapping the first 4 MiB.
    fn build_tables(&self) {
        let mut mem = self.mem.clone();
        let l3 = PT_BASE + PAGE;
        let l2 = PT_BASE + 2 * PAGE;
        let l1 = PT_BASE + 3 * PAGE;

        mem.put_u64(PT_BASE, self.machine_address(l3) | TABLE);
        mem.put_u64(l3 + 8, self.machine_address(l2) | TABLE);
        for i in 0..2 {
            let table = l1 + i * PAGE;
            mem.put_u64(l2 + i * 8, self.machine_address(table) | TABLE);
        }
        for page in 0..MAPPED / PAGE {
            let va = ONE_GIG + page * PAGE;
            mem.put_u64(l1 + page * 8, self.machine_address(va) | 0x3);
        }
    }

    pub fn hypervisor(&self) -> FakeXen {
        FakeXen {
            mem: self.mem.clone(),
            caps: "xen-3.0-x86_64 xen-3.0-x86_32p",
            virt_start: M2P,
            fail_assist: false,
            assists: Vec::new(),
            updates: 0,
            yields: 0,
            shutdown: None,
        }
    }
}

/// Emulates the hypercalls the bootstrap makes, against the domain's
/// memory.
pub struct FakeXen {
    mem: FakeMemory,
    pub caps: &'static str,
    /// What `platform_parameters` reports as the m2p base.
    pub virt_start: u64,
    pub fail_assist: bool,
    pub assists: Vec<(u32, u32)>,
    /// `mmu_update` calls seen.
    pub updates: usize,
    pub yields: usize,
    pub shutdown: Option<u32>,
}

impl FakeXen {
    fn machine_to_virtual(&self, ma: u64) -> Option<u64> {
        let mfn = ma / PAGE;
        if mfn >= NR_PAGES {
            return None;
        }
        let pfn = self.mem.get_u64(M2P + mfn * 8);
        Some(ONE_GIG + pfn * PAGE + (ma & (PAGE - 1)))
    }

    /// The address of the L1 entry for `va`, if the walk gets that far.
    fn l1_entry(&self, va: u64) -> Option<u64> {
        let mut table = PT_BASE;
        for level in (1..4).rev() {
            let index = (va >> (12 + 9 * level)) & 511;
            let entry = self.mem.get_u64(table + index * 8);
            if entry & PRESENT == 0 {
                return None;
            }
            table = self.machine_to_virtual(entry & ADDRESS)?;
        }
        Some(table + ((va >> 12) & 511) * 8)
    }

    /// The L1 entry currently mapping `va`.
    pub fn leaf(&self, va: u64) -> Option<u64> {
        self.l1_entry(va).map(|e| self.mem.get_u64(e))
    }
}

impl Hypervisor for FakeXen {
    fn mmu_update(&mut self, ptr: u64, val: u64) -> i64 {
        self.updates += 1;
        match self.machine_to_virtual(ptr & !7) {
            Some(va) => {
                self.mem.put_u64(va, val);
                0
            }
            None => -14,
        }
    }

    fn update_va_mapping(&mut self, va: u64, val: u64, _flags: u64) -> i64 {
        match self.l1_entry(va) {
            Some(entry) => {
                self.mem.put_u64(entry, val);
                0
            }
            None => -22,
        }
    }

    fn xen_version(&mut self, cmd: u32, buf: &mut [u8]) -> i64 {
        match cmd {
            XENVER_CAPABILITIES => {
                buf[..self.caps.len()].copy_from_slice(self.caps.as_bytes());
                buf[self.caps.len()] = 0;
                0
            }
            XENVER_PLATFORM_PARAMETERS => {
                buf[..8].copy_from_slice(&self.virt_start.to_le_bytes());
                0
            }
            _ => -38,
        }
    }

    fn vm_assist(&mut self, cmd: u32, kind: u32) -> i64 {
        if self.fail_assist {
            return -22;
        }
        self.assists.push((cmd, kind));
        0
    }

    fn sched_yield(&mut self) -> i64 {
        self.yields += 1;
        0
    }

    fn shutdown(&mut self, reason: u32) -> i64 {
        self.shutdown = Some(reason);
        0
    }
}
