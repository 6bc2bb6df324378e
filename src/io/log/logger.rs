//! Log formatting.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use log_crate::{Level, LevelFilter, Log, Metadata, Record};

use super::Color;

/// Per-module log level overrides, enabled by `map_debug`.
const MAP_DEBUG_LEVELS: [(&str, LevelFilter); 2] = [
    ("dboot::mem::paging", LevelFilter::Trace),
    ("dboot::xen", LevelFilter::Trace),
];

/// The global logger.
struct Logger {
    /// The current global level filter.
    level: AtomicUsize,
    /// Whether the page-table overrides apply.
    map_debug: AtomicBool,
}

fn filter_of(n: usize) -> LevelFilter {
    match n {
        0 => LevelFilter::Off,
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

impl Log for Logger {
    #[inline]
    fn enabled(&self, metadata: &Metadata) -> bool {
        let level = metadata.level();
        if level <= filter_of(self.level.load(Ordering::Relaxed)) {
            true
        } else if self.map_debug.load(Ordering::Relaxed) {
            for (target, filter) in MAP_DEBUG_LEVELS.iter() {
                if metadata.target().starts_with(target) {
                    return level <= *filter;
                }
            }

            false
        } else {
            false
        }
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let (prefix, color) = match record.level() {
            Level::Error => ('e', Color::Red),
            Level::Warn => ('w', Color::Yellow),
            Level::Info => ('i', Color::Green),
            Level::Debug => ('d', Color::Cyan),
            Level::Trace => ('t', Color::Gray),
        };

        const MAIN_LEN: usize = "dboot".len();
        let target = if record.target().len() > MAIN_LEN + 2 {
            &record.target()[MAIN_LEN + 2..]
        } else {
            "boot"
        };

        crate::print_colored!(color, "{} ", prefix);
        crate::println!("({}) --> {}", target, record.args());
    }

    fn flush(&self) {
        // no-op
    }
}

impl Logger {
    fn the() -> &'static Logger {
        static LOGGER: Logger = Logger {
            level: AtomicUsize::new(LevelFilter::Info as usize),
            map_debug: AtomicBool::new(false),
        };

        &LOGGER
    }
}

/// Initialize the logger.
pub fn init() {
    // A second call finds the logger already installed, which is fine.
    let _ = log_crate::set_logger(Logger::the());
    log_crate::set_max_level(LevelFilter::Trace);
}

/// Apply the command line's debugging switches.
pub fn configure(prom_debug: bool, map_debug: bool) {
    let logger = Logger::the();
    let level = if prom_debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    logger.level.store(level as usize, Ordering::Relaxed);
    logger.map_debug.store(map_debug, Ordering::Relaxed);
}
