//! The bootstrap's collaborators outside this crate: the ELF loader and
//! the boot console.

use super::info::BootInfo;
use crate::err::Result;
use crate::mem::PhysicalAddress;

/// The console the boot console driver settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Console {
    Text,
    Serial,
    Hypervisor,
    /// A framebuffer driven through the VGA-compatible text path.
    Graphics,
    Framebuffer,
}

impl Console {
    /// From the console driver's `CONS_*` code. Anything unknown is
    /// treated as the text screen.
    pub fn from_code(code: i32) -> Console {
        match code {
            1 | 3 => Console::Serial,
            4 => Console::Hypervisor,
            5 => Console::Graphics,
            6 => Console::Framebuffer,
            _ => Console::Text,
        }
    }

    /// Whether the kernel will draw to a linear framebuffer.
    pub fn uses_framebuffer(self) -> bool {
        matches!(self, Console::Graphics | Console::Framebuffer)
    }
}

pub trait Environment {
    /// Copy the kernel's loadable segments out of the ELF file the loader
    /// placed at `load_addr`.
    fn load_kernel(&mut self, load_addr: PhysicalAddress) -> Result<()>;

    /// Bring up the boot console. Every console and firmware field of
    /// `info` is filled in by now.
    fn init_console(&mut self, info: &BootInfo) -> Console;
}
