//! What the assembly trampoline calls and the symbols it shares with it.
//!
//! The trampoline saves the loader's registers into `mb_info` or
//! `mb2_info`, calls `startup_kernel` on the bootstrap stack, then reads
//! back `entry_addr_low`, `handoff_flags` and `boot_info` to switch paging
//! modes and jump to the kernel.

use core::ptr::{addr_of, addr_of_mut};

use log_crate::{error, info};
use spin::Mutex;

use crate::boot::cpu::HostCpuid;
use crate::boot::env::{Console, Environment};
use crate::boot::info::{BootInfo, BootState, KernelEntry};
use crate::boot::{Bootstrap, ImageLayout};
use crate::consts::{Target, NAME, RELOC_BUFFER_SIZE, VERSION};
use crate::err::{BootError, Result};
use crate::mem::phys::IdentityMemory;
use crate::mem::PhysicalAddress;

/// The head of the multiboot v1 header this image starts with.
#[repr(C)]
pub struct MultibootHeader {
    pub magic: u32,
    pub flags: u32,
    pub checksum: u32,
    pub header_addr: u32,
    pub load_addr: u32,
}

extern "C" {
    static mb_header: MultibootHeader;
    /// End of this image, from the linker script.
    static _end: u8;
    static stack_space_top: u8;
    /// The `CONS_*` code the console driver settled on.
    static console: i32;

    fn dboot_elfload64(load_addr: u64) -> i32;
    fn bcons_init(bi: *const BootInfo);
}

#[no_mangle]
pub static mut mb_info: u32 = 0;
#[no_mangle]
pub static mut mb2_info: u32 = 0;
#[no_mangle]
pub static mut entry_addr_low: u32 = 0;
#[no_mangle]
pub static mut handoff_flags: u32 = 0;
#[no_mangle]
pub static mut boot_info: u64 = 0;

static mut RELOC_BUFFER: [u8; RELOC_BUFFER_SIZE] = [0; RELOC_BUFFER_SIZE];

static BOOT: Mutex<BootState> = Mutex::new(BootState::new());

/// The kernel ELF loader and boot console, both linked in from outside.
struct Host;

impl Environment for Host {
    fn load_kernel(&mut self, load_addr: PhysicalAddress) -> Result<()> {
        // SAFETY: The ELF file is where the loader put this image, and the
        // nucleus it copies into is installed memory nothing else uses.
        match unsafe { dboot_elfload64(load_addr.raw()) } {
            0 => Ok(()),
            _ => Err(BootError::KernelImage),
        }
    }

    fn init_console(&mut self, info: &BootInfo) -> Console {
        // SAFETY: `info` outlives the call and its addresses are filled in.
        unsafe { bcons_init(info) };
        Console::from_code(unsafe { addr_of!(console).read_volatile() })
    }
}

fn layout() -> ImageLayout {
    // SAFETY: All linker provided and never written after the trampoline.
    unsafe {
        ImageLayout {
            load_addr: PhysicalAddress::new(u64::from(mb_header.load_addr)),
            image_end: addr_of!(_end) as usize as u64,
            reloc_buffer: PhysicalAddress::new(addr_of!(RELOC_BUFFER) as usize as u64),
            reloc_buffer_size: RELOC_BUFFER_SIZE as u64,
            stack_top: addr_of!(stack_space_top) as usize as u64,
        }
    }
}

fn publish(state: &BootState, entry: KernelEntry) {
    // SAFETY: Single threaded, and the trampoline only reads these after
    // `startup_kernel` returns.
    unsafe {
        addr_of_mut!(entry_addr_low).write_volatile(entry.entry_addr_low);
        addr_of_mut!(handoff_flags).write_volatile(entry.flags.bits());
        addr_of_mut!(boot_info).write_volatile(state.info_address());
    }
}

#[cfg(not(feature = "xpv"))]
/// # Safety
/// `info` must point at one of the trampoline's saved registers.
unsafe fn saved(info: *const u32) -> Option<PhysicalAddress> {
    match info.read_volatile() {
        0 => None,
        addr => Some(PhysicalAddress::new(u64::from(addr))),
    }
}

#[cfg(not(feature = "xpv"))]
#[no_mangle]
pub extern "C" fn startup_kernel() {
    crate::io::log::init();
    info!("This is {} v{}.", NAME, VERSION);

    // SAFETY: These hold the trampoline's saved registers.
    let (mb, mb2) = unsafe { (saved(addr_of!(mb_info)), saved(addr_of!(mb2_info))) };
    let mut state = BOOT.lock();
    // SAFETY: Paging is off, so every physical address is reachable.
    let mut mem = unsafe { IdentityMemory::new() };
    let result = Bootstrap::new(
        &mut mem,
        &mut Host,
        &mut HostCpuid,
        &mut state,
        layout(),
        Target::current(),
    )
    .metal(mb, mb2);

    match result {
        Ok(entry) => publish(&state, entry),
        Err(e) => {
            error!("{}.", e);
            crate::halt();
        }
    }
}

#[cfg(all(feature = "xpv", not(target_arch = "x86_64")))]
compile_error!("Paravirtualized boot is only supported for 64-bit guests.");

/// Entered with the start-info page's address, which the domain builder
/// leaves in `rsi`.
#[cfg(all(feature = "xpv", target_arch = "x86_64"))]
#[no_mangle]
pub extern "C" fn startup_kernel(start_info: u64) {
    crate::io::log::init();
    info!("This is {} v{}.", NAME, VERSION);

    let mut state = BOOT.lock();
    // SAFETY: The domain builder maps all of the guest's memory and the
    // start-info page, at the addresses the bootstrap uses.
    let (mut mem, hv) = unsafe { (IdentityMemory::new(), crate::xen::HostHypervisor::new()) };
    let result = Bootstrap::new(
        &mut mem,
        &mut Host,
        &mut HostCpuid,
        &mut state,
        layout(),
        Target::current(),
    )
    .xen(hv, PhysicalAddress::new(start_info));

    match result {
        Ok(entry) => publish(&state, entry),
        Err(e) => {
            error!("{}.", e);
            crate::halt();
        }
    }
}
