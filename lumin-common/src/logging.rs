//! Logging initialisation for Lumin binaries.
//!
//! Output goes to stderr (pretty or JSON) and, when a log directory is
//! configured, to a daily-rotated JSON file through a non-blocking writer.

use crate::config::EnvParser;
use std::path::PathBuf;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Output format for the stderr layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Error)]
pub enum LogInitError {
    #[error("invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a global subscriber is already installed")]
    AlreadyInitialized,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl LogConfig {
    /// Build from `LUMIN_LOG_LEVEL`, `LUMIN_LOG_FORMAT` and `LUMIN_LOG_DIR`.
    ///
    /// Invalid values fall back to defaults and are reported as warnings once
    /// logging is up, since there is nowhere to log them yet.
    pub fn from_env(default_level: &str) -> (Self, Vec<String>) {
        let mut parser = EnvParser::new();
        let level = parser.get_log_level("LOG_LEVEL", default_level).value;
        let format = match parser.get_string("LOG_FORMAT", "pretty").value.as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
        let directory = parser
            .get_optional_string("LOG_DIR")
            .value
            .map(|dir| crate::config::expand_home(&dir));

        let warnings = parser
            .take_errors()
            .into_iter()
            .map(|e| e.to_string())
            .collect();

        (
            Self {
                level,
                format,
                directory,
                file_prefix: "lumind.log".to_string(),
            },
            warnings,
        )
    }

    pub fn with_level(mut self, level: &str) -> Self {
        self.level = level.to_string();
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            directory: None,
            file_prefix: "lumind.log".to_string(),
        }
    }
}

/// Guards that flush buffered log output when dropped.
///
/// Hold this for the lifetime of the process.
#[must_use = "dropping the guards stops file logging"]
pub struct LoggingGuards {
    _file: Option<WorkerGuard>,
}

/// Install the global tracing subscriber.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards, LogInitError> {
    // RUST_LOG wins over the configured level so per-module filters still work.
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| LogInitError::InvalidFilter {
            filter: config.level.clone(),
            message: e.to_string(),
        })?,
    };

    let stderr_layer = match config.format {
        LogFormat::Pretty => fmt::layer().with_writer(std::io::stderr).boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(false)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let (file_layer, file_guard) = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|source| LogInitError::CreateDir {
                path: dir.clone(),
                source,
            })?;
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|_| LogInitError::AlreadyInitialized)?;

    Ok(LoggingGuards { _file: file_guard })
}
