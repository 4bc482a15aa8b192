//! # Logger
//!
//! Logs go to two places: the terminal, with coloured level tags, and the session log file in
//! plain text. The file is always at least as detailed as `DEBUG`, so a run started at `INFO` on
//! the terminal still keeps the per-tick control detail in the session directory.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use colored::Colorize;
use log::{self, info};
use thiserror::Error;

// Internal imports
use crate::session;

// Re-exports
pub use log::LevelFilter;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Targets which are too chatty below `INFO`.
const QUIET_TARGETS: [&str; 1] = ["tungstenite"];

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Levels for each log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogLevels {
    /// Level printed to the terminal
    pub terminal: LevelFilter,

    /// Level written to the session log file
    pub file: LevelFilter,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with initialising the logger.
#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error("The log level must include `INFO` messages, found `{0}`")]
    InvalidMinLogLevel(log::LevelFilter),

    #[error("Error initialising the log file: {0}")]
    LogFileInitError(std::io::Error),

    #[error("An error occured while setting up the logger: {0}")]
    FernInitError(log::SetLoggerError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl LogLevels {
    /// Use `terminal` for the terminal, and the more detailed of `terminal` and `DEBUG` for the
    /// log file.
    pub fn new(terminal: LevelFilter) -> Self {
        Self {
            terminal,
            file: terminal.max(LevelFilter::Debug),
        }
    }

    /// Both outputs must include `INFO`, so that lifecycle messages are never lost.
    pub fn validate(&self) -> Result<(), LoggerInitError> {
        for level in [self.terminal, self.file].iter() {
            if *level < log::Level::Info {
                return Err(LoggerInitError::InvalidMinLogLevel(*level));
            }
        }

        Ok(())
    }

    /// The most detailed of the two levels.
    pub fn max(&self) -> LevelFilter {
        self.terminal.max(self.file)
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Initialise the logger for this execution.
///
/// This function must only be called once per process.
pub fn logger_init(
    levels: LogLevels,
    session: &session::Session,
) -> Result<(), LoggerInitError> {
    levels.validate()?;

    let log_file = fern::log_file(session.log_file_path.clone())
        .map_err(LoggerInitError::LogFileInitError)?;

    fern::Dispatch::new()
        .level(levels.max())
        .chain(output(levels.terminal, true).chain(std::io::stdout()))
        .chain(output(levels.file, false).chain(log_file))
        .apply()
        .map_err(LoggerInitError::FernInitError)?;

    info!("Logging initialised");
    info!("    Session epoch: {:?}", session::get_epoch());
    info!("    Terminal log level: {:?}", levels.terminal);
    info!("    File log level: {:?}", levels.file);
    info!("    Log file path: {:?}", session.log_file_path);

    Ok(())
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Build one output of the logger.
fn output(level: LevelFilter, colour: bool) -> fern::Dispatch {
    let mut dispatch = fern::Dispatch::new()
        .format(move |out, message, record| {
            // Debug and trace lines include the target
            if record.level() > log::Level::Info {
                out.finish(format_args!(
                    "[{:10.6} {}] {}: {}",
                    session::get_elapsed_seconds(),
                    level_tag(record.level(), colour),
                    record.target(),
                    message
                ))
            }
            else {
                out.finish(format_args!(
                    "[{:10.6} {}] {}",
                    session::get_elapsed_seconds(),
                    level_tag(record.level(), colour),
                    message
                ))
            }
        })
        .level(level);

    for target in QUIET_TARGETS.iter() {
        dispatch = dispatch.level_for(*target, level.min(LevelFilter::Info));
    }

    dispatch
}

/// Three letter tag for a log level, coloured for the terminal.
fn level_tag(level: log::Level, colour: bool) -> String {
    let tag = match level {
        log::Level::Trace => "TRC",
        log::Level::Debug => "DBG",
        log::Level::Info => "INF",
        log::Level::Warn => "WRN",
        log::Level::Error => "ERR",
    };

    if !colour {
        return tag.to_string();
    }

    match level {
        log::Level::Trace => tag.dimmed().italic(),
        log::Level::Debug => tag.dimmed(),
        log::Level::Info => tag.normal(),
        log::Level::Warn => tag.yellow(),
        log::Level::Error => tag.red().bold(),
    }
    .to_string()
}
