//! Logging to the `e9` debug port.

use core::fmt::{self, Write};

use ansi_rgb::Foreground;
use rgb::RGB8;

use super::Color;

/// The `e9` debug port.
pub struct DebugPort;

impl DebugPort {
    /// The address: `0xE9`.
    const ADDRESS: u16 = 0xE9;

    fn write_byte(&mut self, byte: u8) {
        // SAFETY: The debug port only echoes bytes to the emulator's console.
        unsafe {
            core::arch::asm!(
                "out dx, al",
                in("dx") Self::ADDRESS,
                in("al") byte,
                options(nostack, nomem),
            );
        }
    }
}

impl fmt::Write for DebugPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        s.bytes().for_each(|b| self.write_byte(b));
        Ok(())
    }
}

impl From<Color> for RGB8 {
    fn from(c: Color) -> RGB8 {
        match c {
            Color::Red => RGB8::new(0xff, 0x00, 0x00),
            Color::Yellow => RGB8::new(0xff, 0xff, 0x00),
            Color::Green => RGB8::new(0x00, 0xff, 0x00),
            Color::Cyan => RGB8::new(0x00, 0xff, 0xff),
            Color::Gray => RGB8::new(0x80, 0x80, 0x80),
        }
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    // Nothing useful can be done if the port fails.
    let _ = DebugPort.write_fmt(args);
}

#[doc(hidden)]
pub fn _print_colored(color: Color, args: fmt::Arguments) {
    let _ = write!(DebugPort, "{}", args.fg(RGB8::from(color)));
}
