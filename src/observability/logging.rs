//! Structured logging.
//!
//! # Responsibilities
//! - Create the log directory once at startup
//! - Write `error.log` (errors only) and `combined.log` (min level and up)
//! - Mirror records to a colorized console outside production
//! - Flush file writers on shutdown
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - Each `Logger` owns a private `Dispatch`; it is passed to components
//!   explicitly and only becomes the global subscriber when asked to
//! - Appenders are non-blocking but never drop records

use std::fmt;
use std::io;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::Dispatch;
use tracing_appender::non_blocking::{NonBlocking, NonBlockingBuilder, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{Layer, Registry};

use crate::config::validation::parse_level;
use crate::config::{LogRotation, LoggingConfig, RuntimeMode};
use crate::observability::format::LineFormat;
use crate::observability::sink::{emit_error, ErrorMeta, ErrorSink};

/// File receiving error records only.
pub const ERROR_LOG: &str = "error.log";
/// File receiving every record at or above the configured level.
pub const COMBINED_LOG: &str = "combined.log";

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to create log directory {}: {source}", .path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to open log file {name}: {source}")]
    File {
        name: &'static str,
        #[source]
        source: tracing_appender::rolling::InitError,
    },

    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("Failed to install global subscriber: {0}")]
    Install(#[from] tracing::dispatcher::SetGlobalDefaultError),
}

/// Shared structured logger.
///
/// Clones share the same destinations. Records written after
/// [`Logger::shutdown`] are discarded.
#[derive(Clone)]
pub struct Logger {
    dispatch: Dispatch,
    directory: PathBuf,
    guards: Arc<Mutex<Vec<WorkerGuard>>>,
}

impl Logger {
    /// Build the logger described by `config`.
    ///
    /// Fails if the log directory cannot be created or a file cannot be
    /// opened; callers treat that as fatal.
    pub fn init(config: &LoggingConfig, mode: RuntimeMode) -> Result<Self, LoggingError> {
        let level = parse_level(&config.level)
            .ok_or_else(|| LoggingError::InvalidLogLevel(config.level.clone()))?;

        let directory = config.directory.clone();
        std::fs::create_dir_all(&directory).map_err(|source| LoggingError::Directory {
            path: directory.clone(),
            source,
        })?;

        let mut guards = Vec::new();
        let error_writer = file_writer(&directory, ERROR_LOG, config.rotation, &mut guards)?;
        let combined_writer = file_writer(&directory, COMBINED_LOG, config.rotation, &mut guards)?;

        let console = if config.console_enabled(mode) {
            let (writer, guard) = NonBlockingBuilder::default().lossy(false).finish(io::stdout());
            guards.push(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .event_format(LineFormat)
                    .with_writer(writer)
                    .with_ansi(true)
                    .with_filter(level),
            )
        } else {
            None
        };

        let subscriber = Registry::default()
            .with(
                tracing_subscriber::fmt::layer()
                    .event_format(LineFormat)
                    .with_writer(error_writer)
                    .with_ansi(false)
                    .with_filter(LevelFilter::ERROR),
            )
            .with(
                tracing_subscriber::fmt::layer()
                    .event_format(LineFormat)
                    .with_writer(combined_writer)
                    .with_ansi(false)
                    .with_filter(level),
            )
            .with(console);

        Ok(Self {
            dispatch: Dispatch::new(subscriber),
            directory,
            guards: Arc::new(Mutex::new(guards)),
        })
    }

    /// Make this logger the process default so plain `tracing` macros reach it.
    pub fn install_global(&self) -> Result<(), LoggingError> {
        tracing::dispatcher::set_global_default(self.dispatch.clone())?;
        Ok(())
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Record an error with its metadata.
    pub fn error(&self, message: &str, meta: &ErrorMeta) {
        tracing::dispatcher::with_default(&self.dispatch, || emit_error(message, meta));
    }

    pub fn warn(&self, message: &str) {
        tracing::dispatcher::with_default(&self.dispatch, || tracing::warn!("{message}"));
    }

    pub fn info(&self, message: &str) {
        tracing::dispatcher::with_default(&self.dispatch, || tracing::info!("{message}"));
    }

    /// Flush pending records and close the file writers.
    pub fn shutdown(&self) {
        let guards = mem::take(&mut *self.guards.lock().unwrap_or_else(PoisonError::into_inner));
        drop(guards);
    }
}

impl ErrorSink for Logger {
    fn error(&self, message: &str, meta: &ErrorMeta) {
        Logger::error(self, message, meta)
    }

    fn warn(&self, message: &str) {
        Logger::warn(self, message)
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

fn file_writer(
    directory: &Path,
    name: &'static str,
    rotation: LogRotation,
    guards: &mut Vec<WorkerGuard>,
) -> Result<NonBlocking, LoggingError> {
    let appender = RollingFileAppender::builder()
        .rotation(to_rotation(rotation))
        .filename_prefix(name)
        .build(directory)
        .map_err(|source| LoggingError::File { name, source })?;

    let (writer, guard) = NonBlockingBuilder::default().lossy(false).finish(appender);
    guards.push(guard);
    Ok(writer)
}

fn to_rotation(rotation: LogRotation) -> Rotation {
    match rotation {
        LogRotation::Never => Rotation::NEVER,
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
    }
}
