//! Leveled logging to stderr. Every line carries a timestamp and the
//! source location of the logging statement.

use std::{
    io::{StderrLock, Write, stderr},
    sync::atomic::{AtomicU8, Ordering},
    time::SystemTime,
};

use anyhow::{Result, bail};

use crate::date_and_time::system_time_to_rfc3339;

pub fn write_time(file: &str, line: u32, column: u32) -> StderrLock<'static> {
    let t_str = system_time_to_rfc3339(SystemTime::now());
    let mut lock = stderr().lock();
    write!(&mut lock, "{t_str}\t{file}:{line}:{column}\t").expect("stderr must not fail");
    lock
}

// Do *not* make the fields public here to force going through
// `TryFrom`.
#[derive(Debug, Clone, clap::Args)]
pub struct LogLevelOpt {
    /// Show what is being done (the processing stages for every
    /// communicator instance)
    #[clap(short, long)]
    verbose: bool,

    /// Show information that helps debug this program (implies
    /// `--verbose`)
    #[clap(short, long)]
    debug: bool,

    /// Disable warnings. Conflicts with `--verbose` and `--debug`.
    #[clap(short, long)]
    quiet: bool,
}

impl TryFrom<LogLevelOpt> for LogLevel {
    type Error = anyhow::Error;

    fn try_from(value: LogLevelOpt) -> Result<Self> {
        let LogLevelOpt {
            verbose,
            debug,
            quiet,
        } = value;
        match (quiet, debug, verbose) {
            (true, false, false) => Ok(LogLevel::Quiet),
            (true, _, _) => {
                bail!("option `--quiet` conflicts with the options `--verbose` and `--debug`")
            }
            (false, true, _) => Ok(LogLevel::Debug),
            (false, false, true) => Ok(LogLevel::Info),
            (false, false, false) => Ok(LogLevel::Warn),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Do not log anything
    Quiet,
    /// The default, only `warn!` statements output anything
    Warn,
    /// Verbose execution, for giving the user information about what
    /// is going on
    Info,
    /// Highest amount of log statements, for debugging this program
    Debug,
}

impl LogLevel {
    fn level(self) -> u8 {
        self as u8
    }

    fn from_level(level: u8) -> Option<Self> {
        let slf = match level {
            0 => LogLevel::Quiet,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => return None,
        };
        assert_eq!(slf.level(), level);
        Some(slf)
    }
}

static LOGLEVEL: AtomicU8 = AtomicU8::new(1);

pub fn set_log_level(val: LogLevel) {
    LOGLEVEL.store(val.level(), Ordering::Relaxed);
}

#[inline]
pub fn log_level() -> LogLevel {
    let level = LOGLEVEL.load(Ordering::Relaxed);
    LogLevel::from_level(level).expect("no possibility to store invalid u8")
}

#[macro_export]
macro_rules! log_at {
    { $level:ident, $($arg:tt)* } => {
        if $crate::utillib::logging::log_level() >= $crate::utillib::logging::LogLevel::$level {
            use std::io::Write;
            let mut lock = $crate::utillib::logging::write_time(file!(), line!(), column!());
            writeln!(&mut lock, $($arg)*).expect("stderr must not fail");
        }
    }
}

#[macro_export]
macro_rules! warn {
    { $($arg:tt)* } => {
        $crate::log_at!(Warn, $($arg)*)
    }
}

#[macro_export]
macro_rules! info {
    { $($arg:tt)* } => {
        $crate::log_at!(Info, $($arg)*)
    }
}

#[macro_export]
macro_rules! debug {
    { $($arg:tt)* } => {
        $crate::log_at!(Debug, $($arg)*)
    }
}
