//! Logging and verbosity control for the application.
//!
//! Provides a global logger with three verbosity levels:
//! - Quiet: Only errors and final results
//! - Normal: Progress and essential info (default)
//! - Verbose: Everything including debug details
//!
//! All diagnostics go to standard error as single-line writes, so output from
//! concurrent worker tasks interleaves at line granularity at worst. The only
//! stdout writer is [`output`], which reports produced file paths.

use std::sync::OnceLock;

/// Verbosity level for controlling output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbosityLevel {
    /// Only errors and final results
    Quiet,
    /// Progress and essential info (default)
    Normal,
    /// Everything including debug details
    Verbose,
}

/// Global logger instance.
static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Thread-safe logger for controlling application output.
#[derive(Debug)]
pub struct Logger {
    level: VerbosityLevel,
}

impl Logger {
    /// Initialize the global logger with the specified verbosity level.
    ///
    /// Later calls are ignored, which keeps test binaries (where several
    /// tests may race to initialize) from panicking.
    pub fn init(level: VerbosityLevel) {
        let _ = LOGGER.set(Logger { level });
    }

    /// Get the global logger instance, initializing to Normal if needed.
    pub fn instance() -> &'static Logger {
        LOGGER.get_or_init(|| Logger {
            level: VerbosityLevel::Normal,
        })
    }

    /// Check if the current level is at least the given level.
    fn is_at_least(&self, level: VerbosityLevel) -> bool {
        self.level as i32 >= level as i32
    }

    /// Returns true if verbose mode is enabled.
    pub fn is_verbose(&self) -> bool {
        self.level == VerbosityLevel::Verbose
    }

    /// Returns true if quiet mode is enabled.
    pub fn is_quiet(&self) -> bool {
        self.level == VerbosityLevel::Quiet
    }

    /// Log an error message (always displayed).
    pub fn error(&self, msg: &str) {
        eprintln!("Error: {}", msg);
    }

    /// Log a warning (displayed in normal mode and above).
    pub fn warn(&self, msg: &str) {
        if self.is_at_least(VerbosityLevel::Normal) {
            eprintln!("Warning: {}", msg);
        }
    }

    /// Log an info message (displayed in normal mode and above).
    pub fn info(&self, msg: &str) {
        if self.is_at_least(VerbosityLevel::Normal) {
            eprintln!("{}", msg);
        }
    }

    /// Log a debug message (displayed only in verbose mode).
    pub fn debug(&self, msg: &str) {
        if self.is_at_least(VerbosityLevel::Verbose) {
            eprintln!("[DEBUG] {}", msg);
        }
    }

    /// Report a produced output file on stdout (all modes).
    pub fn output(&self, msg: &str) {
        println!("{}", msg);
    }
}

/// Log an error message (always displayed).
pub fn error(msg: &str) {
    Logger::instance().error(msg);
}

/// Log a warning (displayed in normal mode and above).
pub fn warn(msg: &str) {
    Logger::instance().warn(msg);
}

/// Log an info message (displayed in normal mode and above).
pub fn info(msg: &str) {
    Logger::instance().info(msg);
}

/// Log a debug message (displayed only in verbose mode).
pub fn debug(msg: &str) {
    Logger::instance().debug(msg);
}

/// Report a produced output file on stdout (all modes).
pub fn output(msg: &str) {
    Logger::instance().output(msg);
}

/// Returns true if quiet mode is enabled.
pub fn is_quiet() -> bool {
    Logger::instance().is_quiet()
}
