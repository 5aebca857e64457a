//! FFmpeg runtime setup.
//!
//! FFmpeg keeps its own console logger, separate from the Rust
//! [`log`](https://crates.io/crates/log) facade this crate reports through.
//! [`set_ffmpeg_log_level`] tunes that logger; route the crate's own
//! diagnostics with any `log` backend.
//!
//! # Example
//!
//! ```no_run
//! use framedecode::FfmpegLogLevel;
//!
//! // Keep FFmpeg quiet about recoverable bitstream damage.
//! framedecode::set_ffmpeg_log_level(FfmpegLogLevel::Fatal);
//! ```

use std::sync::OnceLock;

use ffmpeg_next::util::log::Level;

use crate::error::FrameDecodeError;

/// FFmpeg console verbosity, quietest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegLogLevel {
    /// Print nothing.
    Quiet,
    /// Only conditions that abort the process.
    Panic,
    /// Unrecoverable errors.
    Fatal,
    /// Recoverable errors.
    Error,
    /// Warnings. FFmpeg's default.
    Warning,
    /// Informational messages.
    Info,
    /// Verbose informational messages.
    Verbose,
    /// Debugging messages.
    Debug,
    /// Everything.
    Trace,
}

impl From<FfmpegLogLevel> for Level {
    fn from(level: FfmpegLogLevel) -> Self {
        match level {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Panic => Level::Panic,
            FfmpegLogLevel::Fatal => Level::Fatal,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Verbose => Level::Verbose,
            FfmpegLogLevel::Debug => Level::Debug,
            FfmpegLogLevel::Trace => Level::Trace,
        }
    }
}

impl From<Level> for FfmpegLogLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Quiet => FfmpegLogLevel::Quiet,
            Level::Panic => FfmpegLogLevel::Panic,
            Level::Fatal => FfmpegLogLevel::Fatal,
            Level::Error => FfmpegLogLevel::Error,
            Level::Warning => FfmpegLogLevel::Warning,
            Level::Info => FfmpegLogLevel::Info,
            Level::Verbose => FfmpegLogLevel::Verbose,
            Level::Debug => FfmpegLogLevel::Debug,
            Level::Trace => FfmpegLogLevel::Trace,
        }
    }
}

impl std::str::FromStr for FfmpegLogLevel {
    type Err = FrameDecodeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "quiet" => Ok(FfmpegLogLevel::Quiet),
            "panic" => Ok(FfmpegLogLevel::Panic),
            "fatal" => Ok(FfmpegLogLevel::Fatal),
            "error" => Ok(FfmpegLogLevel::Error),
            "warning" | "warn" => Ok(FfmpegLogLevel::Warning),
            "info" => Ok(FfmpegLogLevel::Info),
            "verbose" => Ok(FfmpegLogLevel::Verbose),
            "debug" => Ok(FfmpegLogLevel::Debug),
            "trace" => Ok(FfmpegLogLevel::Trace),
            other => Err(FrameDecodeError::InvalidArgument(format!(
                "unknown FFmpeg log level '{other}'"
            ))),
        }
    }
}

/// Set FFmpeg's console verbosity. Does not affect `log` output.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.into());
}

/// Current FFmpeg console verbosity, if it maps to a known level.
pub fn get_ffmpeg_log_level() -> Option<FfmpegLogLevel> {
    ffmpeg_next::util::log::get_level().ok().map(FfmpegLogLevel::from)
}

/// Initialise FFmpeg once per process.
///
/// Called by every constructor in this crate; calling it directly is only
/// needed before using `ffmpeg_next` types on their own.
pub fn initialize() -> Result<(), FrameDecodeError> {
    static INITIALIZED: OnceLock<Result<(), String>> = OnceLock::new();

    INITIALIZED
        .get_or_init(|| {
            ffmpeg_next::init().map_err(|error| {
                log::error!("FFmpeg initialisation failed: {error}");
                error.to_string()
            })
        })
        .clone()
        .map_err(FrameDecodeError::FfmpegError)
}
