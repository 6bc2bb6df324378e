// Logging facilities. All log output is printed to all enabled logging sinks.

use core::fmt;

#[cfg(all(feature = "log_e9", any(target_arch = "x86", target_arch = "x86_64")))]
mod e9;
mod logger;

pub use logger::configure;

/// Colors for log prefixes.
#[derive(Debug, Clone, Copy)]
pub enum Color {
    Red,
    Yellow,
    Green,
    Cyan,
    Gray,
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    #[cfg(all(feature = "log_e9", any(target_arch = "x86", target_arch = "x86_64")))]
    e9::_print(args);
    #[cfg(not(all(feature = "log_e9", any(target_arch = "x86", target_arch = "x86_64"))))]
    let _ = args;
}

#[doc(hidden)]
pub fn _print_colored(color: Color, args: fmt::Arguments) {
    #[cfg(all(feature = "log_e9", any(target_arch = "x86", target_arch = "x86_64")))]
    e9::_print_colored(color, args);
    #[cfg(not(all(feature = "log_e9", any(target_arch = "x86", target_arch = "x86_64"))))]
    let _ = (color, args);
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::io::log::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

#[macro_export]
macro_rules! print_colored {
    ($color:expr, $($arg:tt)*) => ($crate::io::log::_print_colored($color, format_args!($($arg)*)));
}

pub fn init() {
    logger::init();
}
