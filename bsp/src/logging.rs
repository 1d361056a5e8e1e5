//! Console logger for the board UART.
//!
//! Records look like `[ 12.000345 INFO  CPU-1] message`: seconds since the
//! generic counter started, level, logical core. The level comes from the
//! `LOG` variable at build time (`error`..`trace`, `off`) and falls back to
//! [`board::LOG_LEVEL`](crate::board::LOG_LEVEL); [`set_level`] changes it
//! at run time.

use core::fmt::{self, Write};
use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Mutex;

use crate::arch::timer;

static LOG_LOCK: Mutex<()> = Mutex::new(());

/// Install the console logger. Later calls are ignored.
pub fn init() {
    static LOGGER: ConsoleLogger = ConsoleLogger;
    if log::set_logger(&LOGGER).is_err() {
        return;
    }
    log::set_max_level(build_level(option_env!("LOG")));
}

pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}

fn build_level(var: Option<&str>) -> LevelFilter {
    var.and_then(|s| s.parse().ok())
        .unwrap_or(crate::board::LOG_LEVEL)
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    let _guard = LOG_LOCK.lock();
    // the console has nowhere to report its own failures
    let _ = crate::arch::console::console().write_fmt(args);
}

/// Prints to the board console without a newline.
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => ($crate::logging::_print(format_args!($($arg)*)));
}

/// Prints to the board console with a newline.
#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($fmt:expr) => ($crate::kprint!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::kprint!(concat!($fmt, "\n"), $($arg)*));
}

/// Counter value split into whole seconds and microseconds.
fn uptime(ticks: u64, freq: u64) -> (u64, u64) {
    if freq == 0 {
        return (0, 0);
    }
    (ticks / freq, (ticks % freq) * 1_000_000 / freq)
}

/// ANSI colour per level.
fn color(level: Level) -> u8 {
    match level {
        Level::Error => 31, // Red
        Level::Warn => 93,  // BrightYellow
        Level::Info => 34,  // Blue
        Level::Debug => 32, // Green
        Level::Trace => 90, // BrightBlack
    }
}

fn write_record(
    out: &mut impl Write,
    (secs, micros): (u64, u64),
    level: Level,
    cpu: usize,
    args: fmt::Arguments,
) -> fmt::Result {
    writeln!(
        out,
        "\u{1B}[{}m[{:>4}.{:06} {:<5} CPU-{}] {}\u{1B}[0m",
        color(level),
        secs,
        micros,
        level,
        cpu,
        args
    )
}

struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let stamp = uptime(timer::ticks(), timer::freq());
        let _guard = LOG_LOCK.lock();
        let _ = write_record(
            &mut crate::arch::console::console(),
            stamp,
            record.level(),
            crate::arch::cpu::id(),
            *record.args(),
        );
    }

    fn flush(&self) {}
}
