//! Command-line interface definitions for u320-replay.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Replay a scripted exception scenario against a simulated adapter.
#[derive(Parser)]
#[command(name = "u320-replay", version, about)]
pub struct Cli {
    /// Scenario file (TOML).
    pub scenario: PathBuf,

    /// Most verbose driver log level printed to stderr.
    #[arg(long, short = 'l', value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Print every completion and event as it is delivered.
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Stop at the first failed expectation instead of reporting all.
    #[arg(long)]
    pub fail_fast: bool,
}

/// Log levels selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Only fatal records.
    Fatal,
    /// Errors and above.
    Error,
    /// Warnings and above.
    Warn,
    /// Recovery milestones and above.
    Info,
    /// Per-exception detail.
    Debug,
    /// Register-level tracing.
    Trace,
}

impl From<LogLevel> for u320_core::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Fatal => Self::Fatal,
            LogLevel::Error => Self::Error,
            LogLevel::Warn => Self::Warn,
            LogLevel::Info => Self::Info,
            LogLevel::Debug => Self::Debug,
            LogLevel::Trace => Self::Trace,
        }
    }
}
