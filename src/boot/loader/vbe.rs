//! VESA BIOS extension blocks.

use crate::boot::info::{FramebufferInfo, FB_TYPE_EGA_TEXT, FB_TYPE_INDEXED, FB_TYPE_RGB};
use crate::err::Result;
use crate::mem::phys::PhysicalMemory;
use crate::mem::PhysicalAddress;

/// Size of the controller information block.
pub const CONTROLLER_INFO_SIZE: u64 = 512;
/// Size of the mode information block.
pub const MODE_INFO_SIZE: u64 = 256;

// Controller block.
const VBE_VERSION: u64 = 0x04;

// Mode block.
const BYTES_PER_SCAN_LINE: u64 = 0x10;
const X_RESOLUTION: u64 = 0x12;
const Y_RESOLUTION: u64 = 0x14;
const BITS_PER_PIXEL: u64 = 0x19;
const MEMORY_MODEL: u64 = 0x1b;
const PHYS_BASE_PTR: u64 = 0x28;
const LIN_BYTES_PER_SCAN_LINE: u64 = 0x32;

const MODEL_TEXT: u8 = 0;
const MODEL_DIRECT_COLOR: u8 = 6;

/// Describe the linear framebuffer of the mode at `mode`.
pub fn framebuffer<M: PhysicalMemory>(
    mem: &M,
    controller: PhysicalAddress,
    mode: PhysicalAddress,
) -> Result<FramebufferInfo> {
    // VBE 3.0 moved the pitch of linear modes.
    let pitch = if mem.read_u16(controller + VBE_VERSION)? >= 0x300 {
        mem.read_u16(mode + LIN_BYTES_PER_SCAN_LINE)?
    } else {
        mem.read_u16(mode + BYTES_PER_SCAN_LINE)?
    };

    let fb_type = match mem.read_u8(mode + MEMORY_MODEL)? {
        MODEL_TEXT => FB_TYPE_EGA_TEXT,
        MODEL_DIRECT_COLOR => FB_TYPE_RGB,
        _ => FB_TYPE_INDEXED,
    };

    Ok(FramebufferInfo {
        addr: u64::from(mem.read_u32(mode + PHYS_BASE_PTR)?),
        pitch: u32::from(pitch),
        width: u32::from(mem.read_u16(mode + X_RESOLUTION)?),
        height: u32::from(mem.read_u16(mode + Y_RESOLUTION)?),
        bpp: mem.read_u8(mode + BITS_PER_PIXEL)?,
        fb_type,
        reserved: 0,
    })
}
