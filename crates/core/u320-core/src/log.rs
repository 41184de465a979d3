//! Leveled log interface for the U320 driver crates.
//!
//! Drivers emit records through [`hlog!`] and the convenience macros
//! (`hinfo!`, `hwarn!`, ...). Each record is tagged with the adapter unit
//! number so a host with several adapters can tell them apart. Records
//! above the current maximum level are dropped before the sink is called.
//! Before [`set_log_fn`] is called, output is silently discarded.

use core::fmt;
use core::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

// ---------------------------------------------------------------------------
// Levels (lower = more severe)
// ---------------------------------------------------------------------------

/// Log severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    /// The adapter is unusable.
    Fatal = 0,
    /// A channel error: outstanding requests were or will be aborted.
    Error = 1,
    /// A per-request error or an unexpected but recoverable condition.
    Warn = 2,
    /// Attach/detach and recovery milestones.
    Info = 3,
    /// Per-exception handling detail.
    Debug = 4,
    /// Register-level tracing.
    Trace = 5,
}

impl Level {
    /// Returns the fixed-width level name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Fatal => "FATAL",
            Self::Error => "ERROR",
            Self::Warn => "WARN ",
            Self::Info => "INFO ",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    /// Converts a raw level value, clamping anything too large to `Trace`.
    #[must_use]
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Fatal,
            1 => Self::Error,
            2 => Self::Warn,
            3 => Self::Info,
            4 => Self::Debug,
            _ => Self::Trace,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Records and the global sink
// ---------------------------------------------------------------------------

/// A single log record handed to the registered sink.
#[derive(Clone, Copy)]
pub struct Record<'a> {
    /// Severity.
    pub level: Level,
    /// Adapter unit number the record belongs to.
    pub unit: u8,
    /// Preformatted message.
    pub args: fmt::Arguments<'a>,
}

impl fmt::Display for Record<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] u320:{}: {}", self.level, self.unit, self.args)
    }
}

/// The signature of the global log sink.
pub type LogFn = fn(&Record<'_>);

fn null_log(_record: &Record<'_>) {}

static LOG_FN: AtomicPtr<()> = AtomicPtr::new(null_log as *mut ());
static MAX_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

/// Registers the global log sink.
///
/// # Safety
///
/// The provided function must be safe to call from any context, including
/// interrupt context, and must not call back into the driver.
pub unsafe fn set_log_fn(f: LogFn) {
    LOG_FN.store(f as *mut (), Ordering::Release);
}

/// Sets the most verbose level that still reaches the sink.
pub fn set_max_level(level: Level) {
    MAX_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Returns the most verbose level that still reaches the sink.
#[must_use]
pub fn max_level() -> Level {
    Level::from_u8(MAX_LEVEL.load(Ordering::Relaxed))
}

/// Returns `true` if a record at `level` would be delivered.
#[must_use]
#[inline]
pub fn enabled(level: Level) -> bool {
    level <= max_level()
}

#[inline]
fn load_log_fn() -> LogFn {
    let ptr = LOG_FN.load(Ordering::Acquire);
    // SAFETY: Only valid `LogFn` pointers (or the initial `null_log`) are
    // ever stored into LOG_FN.
    unsafe { core::mem::transmute::<*mut (), LogFn>(ptr) }
}

/// Implementation detail for [`hlog!`]. Not public API.
#[doc(hidden)]
pub fn _log(level: Level, unit: u8, args: fmt::Arguments<'_>) {
    if enabled(level) {
        load_log_fn()(&Record { level, unit, args });
    }
}

/// Logs a message for adapter `unit` at the given level.
#[macro_export]
macro_rules! hlog {
    ($level:expr, $unit:expr, $($arg:tt)*) => {
        $crate::log::_log($level, $unit, format_args!($($arg)*))
    };
}

/// Logs a fatal-level message.
#[macro_export]
macro_rules! hfatal {
    ($unit:expr, $($arg:tt)*) => { $crate::hlog!($crate::log::Level::Fatal, $unit, $($arg)*) };
}

/// Logs an error-level message.
#[macro_export]
macro_rules! herr {
    ($unit:expr, $($arg:tt)*) => { $crate::hlog!($crate::log::Level::Error, $unit, $($arg)*) };
}

/// Logs a warning-level message.
#[macro_export]
macro_rules! hwarn {
    ($unit:expr, $($arg:tt)*) => { $crate::hlog!($crate::log::Level::Warn, $unit, $($arg)*) };
}

/// Logs an info-level message.
#[macro_export]
macro_rules! hinfo {
    ($unit:expr, $($arg:tt)*) => { $crate::hlog!($crate::log::Level::Info, $unit, $($arg)*) };
}

/// Logs a debug-level message.
#[macro_export]
macro_rules! hdebug {
    ($unit:expr, $($arg:tt)*) => { $crate::hlog!($crate::log::Level::Debug, $unit, $($arg)*) };
}

/// Logs a trace-level message.
#[macro_export]
macro_rules! htrace {
    ($unit:expr, $($arg:tt)*) => { $crate::hlog!($crate::log::Level::Trace, $unit, $($arg)*) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // The sink and level are process-global; serialize the tests touching them.
    static SERIAL: Mutex<()> = Mutex::new(());
    static LINES: Mutex<Vec<String>> = Mutex::new(Vec::new());

    fn capture(record: &Record<'_>) {
        LINES.lock().unwrap().push(record.to_string());
    }

    #[test]
    fn level_ordering() {
        assert!(Level::Fatal < Level::Error);
        assert!(Level::Debug < Level::Trace);
        assert_eq!(Level::from_u8(200), Level::Trace);
        assert_eq!(Level::from_u8(2), Level::Warn);
    }

    #[test]
    fn records_are_tagged_and_filtered() {
        let _serial = SERIAL.lock().unwrap();
        // SAFETY: `capture` only touches a test-local mutex.
        unsafe { set_log_fn(capture) };
        LINES.lock().unwrap().clear();
        set_max_level(Level::Warn);

        crate::herr!(2, "bus reset on channel {}", 0);
        crate::hdebug!(2, "dropped");
        crate::hwarn!(7, "selection timeout");

        let lines = LINES.lock().unwrap().clone();
        assert_eq!(
            lines,
            ["[ERROR] u320:2: bus reset on channel 0", "[WARN ] u320:7: selection timeout"]
        );
        set_max_level(Level::Info);
    }

    #[test]
    fn enabled_tracks_max_level() {
        let _serial = SERIAL.lock().unwrap();
        set_max_level(Level::Debug);
        assert!(enabled(Level::Debug));
        assert!(!enabled(Level::Trace));
        set_max_level(Level::Info);
        assert_eq!(max_level(), Level::Info);
    }
}
