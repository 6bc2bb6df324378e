//! Switches read from the boot command line.

use crate::err::{BootError, Result};
use crate::mem::phys::PhysicalMemory;
use crate::mem::PhysicalAddress;

/// How much of the command line is read at a time.
const CHUNK: usize = 256;

/// Bootstrap behavior selected on the command line. Switches are matched
/// anywhere in the line, the way the kernel's own option scan does it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootOptions {
    /// Debug-level diagnostics.
    pub prom_debug: bool,
    /// Trace page table construction and dump the result.
    pub map_debug: bool,
    /// Leave loader data where the loader put it.
    pub no_reloc: bool,
    /// Don't use PAE for a 32-bit kernel.
    pub disable_pae: bool,
}

impl BootOptions {
    pub fn parse<M: PhysicalMemory>(line: &CommandLine<M>) -> Result<BootOptions> {
        Ok(BootOptions {
            prom_debug: line.contains(b"prom_debug")?,
            map_debug: line.contains(b"map_debug")?,
            no_reloc: line.contains(b"no_mb_reloc")?,
            disable_pae: line.contains(b"disablePAE=true")?,
        })
    }

    /// Refuse command lines left over from the old `multiboot` boot shim.
    pub fn check_legacy<M: PhysicalMemory>(line: &CommandLine<M>) -> Result<()> {
        if line.contains(b"multiboot")? {
            Err(BootError::LegacyMultiboot)
        } else {
            Ok(())
        }
    }
}

/// The command line where the loader left it. It has no length limit, so
/// it's searched in place a chunk at a time.
pub struct CommandLine<'m, M> {
    mem: &'m M,
    addr: PhysicalAddress,
    len: u64,
}

impl<'m, M: PhysicalMemory> CommandLine<'m, M> {
    /// The string at `addr`. No command line reads as an empty one.
    pub fn read(mem: &'m M, addr: Option<PhysicalAddress>) -> Result<CommandLine<'m, M>> {
        let (addr, len) = match addr {
            Some(addr) => (addr, mem.strlen(addr)?),
            None => (PhysicalAddress::new(0), 0),
        };
        Ok(CommandLine { mem, addr, len })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether `needle` occurs anywhere in the line.
    pub fn contains(&self, needle: &[u8]) -> Result<bool> {
        if needle.is_empty() {
            return Ok(true);
        }
        // Consecutive chunks overlap so a match across a boundary is seen.
        let step = (CHUNK - (needle.len() - 1)) as u64;
        let mut buf = [0; CHUNK];
        let mut at = 0;
        while at < self.len {
            let n = (self.len - at).min(CHUNK as u64) as usize;
            self.mem.read(self.addr + at, &mut buf[..n])?;
            if find(&buf[..n], needle) {
                return Ok(true);
            }
            if at + n as u64 == self.len {
                break;
            }
            at += step;
        }
        Ok(false)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
