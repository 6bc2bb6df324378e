//! Booting as a paravirtualized Xen guest.
//!
//! The guest starts with paging on, inside tables the domain builder made,
//! and owns pseudo-physical memory mapped at `ONE_GIG`. Page table pages
//! are read-only to the guest, so every change to them is a hypercall.
//! All of that goes through [`Hypervisor`], which tests replace with a fake.

use log_crate::{debug, info};

use crate::boot::cpu::{CpuFeatures, Cpuid};
use crate::consts::Target;
use crate::err::{BootError, Result};
use crate::mem::alloc::BumpAllocator;
use crate::mem::align_up;
use crate::mem::paging::{EntryFlags, PageTableBackend};
use crate::mem::size::{KB, MB, PAGE};
use crate::util::c_strlen;

pub mod backend;
#[cfg(test)]
pub mod fake;
pub mod p2m;
pub mod start_info;

pub use backend::XenBackend;
pub use p2m::P2m;
pub use start_info::StartInfo;

/// Hypercall numbers.
pub mod op {
    pub const MMU_UPDATE: u64 = 1;
    pub const UPDATE_VA_MAPPING: u64 = 14;
    pub const XEN_VERSION: u64 = 17;
    pub const VM_ASSIST: u64 = 21;
    pub const SCHED_OP: u64 = 29;
}

pub const DOMID_SELF: u64 = 0x7ff0;
pub const MMU_NORMAL_PT_UPDATE: u64 = 0;
pub const UVMF_INVLPG: u64 = 2;
pub const UVMF_LOCAL: u64 = 0;
pub const XENVER_CAPABILITIES: u32 = 3;
pub const XENVER_PLATFORM_PARAMETERS: u32 = 5;
pub const VMASST_CMD_ENABLE: u32 = 0;
pub const VMASST_TYPE_4GB_SEGMENTS: u32 = 0;
pub const VMASST_TYPE_WRITABLE_PAGETABLES: u32 = 2;
pub const SCHEDOP_YIELD: u32 = 0;
pub const SCHEDOP_SHUTDOWN: u32 = 2;
pub const SHUTDOWN_POWEROFF: u32 = 0;

/// Size of the `xen_capabilities_info_t` buffer.
const CAPABILITIES_LEN: usize = 1024;
/// Yields before powering off, so the console can drain.
const HALT_YIELDS: usize = 10_000;

const SCRATCH_SIZE: u64 = 512 * KB;
const SCRATCH_ALIGN: u64 = 2 * MB;
/// How far below the end of the scratch region allocation starts.
const SCRATCH_IN_USE: u64 = 500 * KB;

/// The hypercalls the bootstrap makes. Each returns Xen's status: zero on
/// success, a negative errno otherwise.
pub trait Hypervisor {
    /// Store `val` at machine address `ptr`, whose low bits select the
    /// update kind.
    fn mmu_update(&mut self, ptr: u64, val: u64) -> i64;

    /// Set the leaf entry mapping `va` to `val`.
    fn update_va_mapping(&mut self, va: u64, val: u64, flags: u64) -> i64;

    /// Query version information `cmd` into `buf`.
    fn xen_version(&mut self, cmd: u32, buf: &mut [u8]) -> i64;

    fn vm_assist(&mut self, cmd: u32, kind: u32) -> i64;

    fn sched_yield(&mut self) -> i64;

    /// Shut the domain down. Doesn't return on a real hypervisor.
    fn shutdown(&mut self, reason: u32) -> i64;
}

/// Turn a hypercall status into a result.
pub fn check(op: &'static str, code: i64) -> Result<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(BootError::Hypercall { op, code })
    }
}

/// What the hypervisor told us about the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub features: CpuFeatures,
    /// Where the machine-to-physical table is mapped.
    pub m2p: u64,
}

/// Ask the hypervisor which paging features the guest gets, and turn on
/// the assists the bootstrap relies on.
pub fn probe<H: Hypervisor, C: Cpuid>(hv: &mut H, cpu: &mut C, target: Target) -> Result<Platform> {
    let mut features = CpuFeatures::empty();
    if target.is_64bit() {
        features |= CpuFeatures::PAE | CpuFeatures::LONG_MODE;
    } else {
        let mut caps = [0; CAPABILITIES_LEN];
        check(
            "xen_version(capabilities)",
            hv.xen_version(XENVER_CAPABILITIES, &mut caps),
        )?;
        let caps = &caps[..c_strlen(&caps)];
        debug!(
            "Xen capabilities: {}",
            core::str::from_utf8(caps).unwrap_or("(garbled)")
        );
        if caps.windows(7).any(|w| w == b"x86_32p") {
            features |= CpuFeatures::PAE;
        }
    }

    let mut params = [0; 8];
    check(
        "xen_version(platform_parameters)",
        hv.xen_version(XENVER_PLATFORM_PARAMETERS, &mut params),
    )?;
    let m2p = if target.is_64bit() {
        u64::from_le_bytes(params)
    } else {
        u64::from(u32::from_le_bytes([params[0], params[1], params[2], params[3]]))
    };

    check(
        "vm_assist(writable_pagetables)",
        hv.vm_assist(VMASST_CMD_ENABLE, VMASST_TYPE_WRITABLE_PAGETABLES),
    )?;
    if !target.is_64bit() {
        check(
            "vm_assist(4gb_segments)",
            hv.vm_assist(VMASST_CMD_ENABLE, VMASST_TYPE_4GB_SEGMENTS),
        )?;
    }

    // No large or global pages for a guest.
    let host = CpuFeatures::probe(cpu);
    if features.contains(CpuFeatures::PAE) && host.contains(CpuFeatures::NX) {
        features |= CpuFeatures::NX;
    }
    if host.contains(CpuFeatures::PAT) {
        features |= CpuFeatures::PAT;
    }

    info!("INITIALIZED Xen platform (m2p at 0x{:x}, {:?}).", m2p, features);
    Ok(Platform { features, m2p })
}

/// Let the console drain, then ask to be powered off.
pub fn power_off<H: Hypervisor>(hv: &mut H) {
    for _ in 0..HALT_YIELDS {
        let _ = hv.sched_yield();
    }
    let _ = hv.shutdown(SHUTDOWN_POWEROFF);
}

/// Point the guest page at `va` to the shared info frame at machine
/// address `ma`. The kernel reaches the shared info through `va`.
pub fn map_shared_info<H: Hypervisor>(hv: &mut H, va: u64, ma: u64) -> Result<()> {
    let flags =
        EntryFlags::PRESENT | EntryFlags::WRITABLE | EntryFlags::ACCESSED | EntryFlags::DIRTY;
    let entry = (ma & !(PAGE - 1)) | flags.bits();
    debug!("Shared info 0x{:x} mapped at 0x{:x}.", ma, va);
    check(
        "update_va_mapping(shared info)",
        hv.update_va_mapping(va, entry, UVMF_INVLPG | UVMF_LOCAL),
    )
}

/// The region above the bootstrap's stack that page tables are allocated
/// from. The domain builder maps it, so it's usable with paging on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scratch {
    pub start: u64,
    /// Where allocation starts.
    pub cursor: u64,
    pub end: u64,
}

impl Scratch {
    pub fn above_stack(stack_top: u64) -> Scratch {
        let start = align_up(stack_top, PAGE);
        let end = align_up(start + SCRATCH_SIZE, SCRATCH_ALIGN);
        Scratch {
            start,
            cursor: end - SCRATCH_IN_USE,
            end,
        }
    }

    /// An allocator confined to the region. `mfn_base` is where
    /// pseudo-physical zero is mapped.
    pub fn allocator(&self, mfn_base: u64) -> BumpAllocator {
        BumpAllocator::bounded(self.cursor, mfn_base, self.end)
    }

    /// Unmap the unused part of the region, from `from` up, so the kernel
    /// finds it free.
    pub fn release<B: PageTableBackend>(&self, backend: &mut B, from: u64) -> Result<()> {
        let mut va = align_up(from, PAGE);
        debug!("Unmapping scratch 0x{:x}..0x{:x}.", va, self.end);
        while va < self.end {
            backend.unmap(va)?;
            va += PAGE;
        }
        Ok(())
    }
}

#[cfg(all(feature = "xpv", target_arch = "x86_64", not(test)))]
mod host {
    use super::{op, Hypervisor, DOMID_SELF, SCHEDOP_SHUTDOWN, SCHEDOP_YIELD};
    use crate::util::hypercall::hypercall4;

    /// The hypervisor we're running under, reached through the hypercall
    /// page.
    pub struct HostHypervisor(());

    impl HostHypervisor {
        /// # Safety
        /// Only valid in a paravirtualized guest whose hypercall page has
        /// been set up by the domain builder.
        pub const unsafe fn new() -> HostHypervisor {
            HostHypervisor(())
        }
    }

    impl Hypervisor for HostHypervisor {
        fn mmu_update(&mut self, ptr: u64, val: u64) -> i64 {
            let request = [ptr, val];
            let mut done = 0u32;
            // SAFETY: One request, both pointers live across the call.
            unsafe {
                hypercall4(
                    op::MMU_UPDATE,
                    request.as_ptr() as u64,
                    1,
                    &mut done as *mut u32 as u64,
                    DOMID_SELF,
                )
            }
        }

        fn update_va_mapping(&mut self, va: u64, val: u64, flags: u64) -> i64 {
            // SAFETY: Arguments are plain values.
            unsafe { hypercall4(op::UPDATE_VA_MAPPING, va, val, flags, 0) }
        }

        fn xen_version(&mut self, cmd: u32, buf: &mut [u8]) -> i64 {
            // SAFETY: Both queries we make fit the buffers they're given.
            unsafe {
                hypercall4(
                    op::XEN_VERSION,
                    u64::from(cmd),
                    buf.as_mut_ptr() as u64,
                    0,
                    0,
                )
            }
        }

        fn vm_assist(&mut self, cmd: u32, kind: u32) -> i64 {
            // SAFETY: Arguments are plain values.
            unsafe { hypercall4(op::VM_ASSIST, u64::from(cmd), u64::from(kind), 0, 0) }
        }

        fn sched_yield(&mut self) -> i64 {
            // SAFETY: Yield takes no argument.
            unsafe { hypercall4(op::SCHED_OP, u64::from(SCHEDOP_YIELD), 0, 0, 0) }
        }

        fn shutdown(&mut self, reason: u32) -> i64 {
            // SAFETY: `reason` is the whole `sched_shutdown` argument.
            unsafe {
                hypercall4(
                    op::SCHED_OP,
                    u64::from(SCHEDOP_SHUTDOWN),
                    &reason as *const u32 as u64,
                    0,
                    0,
                )
            }
        }
    }
}

#[cfg(all(feature = "xpv", target_arch = "x86_64", not(test)))]
pub use host::HostHypervisor;
