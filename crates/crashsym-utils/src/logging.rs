//! # Logging Utilities
//!
//! Logging infrastructure for crashsym using `tracing`.
//!
//! All console output goes to stderr: the annotated report is written to
//! stdout and must stay clean enough to pipe into other tools.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use crashsym_utils::{init_logging, LogConfig};
//!
//! // Keep the guard alive until exit so file output is flushed
//! let _guard = init_logging(&LogConfig::from_env()).expect("Failed to initialize logging");
//!
//! tracing::info!("Symbolication started");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Level filter (e.g., `RUST_LOG=debug`, `RUST_LOG=crashsym_core=trace`)
//! - `CRASHSYM_LOG_FORMAT`: Output format (`json` or `pretty`, default: `pretty`)
//! - `CRASHSYM_LOG_FILE`: Optional log file, or a directory to hold a dated log file

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

pub const LOG_FORMAT_ENV: &str = "CRASHSYM_LOG_FORMAT";
pub const LOG_FILE_ENV: &str = "CRASHSYM_LOG_FILE";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Pretty-printed, human-readable format (default)
    #[default]
    Pretty,
    /// JSON format, one event per line
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "text" => Ok(LogFormat::Pretty),
            "json" | "prod" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    Error,
    Warn,
    /// Default when neither a flag nor `RUST_LOG` is given
    Info,
    /// Per-image load results and frame cross-check mismatches
    Debug,
    /// Per-frame resolution detail
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// Where and how to log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogConfig
{
    /// Explicit level; overrides `RUST_LOG` when set.
    pub level: Option<LogLevel>,
    pub format: LogFormat,
    /// Log file, or a directory to create a dated log file in.
    pub file: Option<PathBuf>,
}

impl LogConfig
{
    /// Read `CRASHSYM_LOG_FORMAT` and `CRASHSYM_LOG_FILE`.
    ///
    /// An unknown format falls back to pretty output.
    pub fn from_env() -> Self
    {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`LogConfig::from_env`], reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            level: None,
            format: lookup(LOG_FORMAT_ENV)
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            file: lookup(LOG_FILE_ENV)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        }
    }

    #[must_use]
    pub fn with_level(mut self, level: Option<LogLevel>) -> Self
    {
        if level.is_some() {
            self.level = level;
        }
        self
    }
}

/// Keeps the background file writer alive; drop it to flush.
#[derive(Debug)]
pub struct LoggingGuard
{
    _file: Option<WorkerGuard>,
    /// Resolved log file path, if file logging is enabled.
    pub file: Option<PathBuf>,
}

/// Initialize the global subscriber.
///
/// Filter priority:
/// 1. `config.level`, usually from a `--log-level` flag
/// 2. `RUST_LOG`, which also accepts per-crate directives
/// 3. `info`
///
/// ## Errors
///
/// Returns an error if:
/// - Logging is already initialized
/// - The log file's directory cannot be created
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuard, LoggingError>
{
    let filter = match config.level {
        Some(level) => EnvFilter::new(Level::from(level).to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string())),
    };

    let mut layers: Vec<BoxedLayer> = vec![console_layer(config.format, filter.clone())];

    let mut guard = LoggingGuard { _file: None, file: None };
    if let Some(requested) = &config.file {
        let path = log_file_path(requested);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let appender = tracing_appender::rolling::never(
            path.parent().unwrap_or_else(|| Path::new(".")),
            path.file_name().unwrap_or_default(),
        );
        let (writer, worker) = tracing_appender::non_blocking(appender);
        layers.push(file_layer(config.format, writer, filter));
        guard = LoggingGuard {
            _file: Some(worker),
            file: Some(path),
        };
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;

    Ok(guard)
}

/// Initialize logging with explicit level and format, console only.
///
/// ## Errors
///
/// Returns an error if logging is already initialized.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    init_logging(&LogConfig {
        level: Some(level),
        format,
        file: None,
    })
}

/// A directory gets a `YYYY-MM-DD-crashsym.log` file inside it.
fn log_file_path(requested: &Path) -> PathBuf
{
    if requested.is_dir() {
        let today = Utc::now().format("%Y-%m-%d");
        requested.join(format!("{today}-crashsym.log"))
    } else {
        requested.to_path_buf()
    }
}

fn console_layer(format: LogFormat, filter: EnvFilter) -> BoxedLayer
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(true)
            .with_writer(io::stderr)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(io::stderr)
            .with_filter(filter)
            .boxed(),
    }
}

fn file_layer(format: LogFormat, writer: tracing_appender::non_blocking::NonBlocking, filter: EnvFilter) -> BoxedLayer
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(false) // No ANSI in files
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
    }
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Unknown log format: {0}. Use 'pretty' or 'json'")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Unknown log level: {0}. Use 'error', 'warn', 'info', 'debug', or 'trace'")]
    InvalidLevel(String),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}

#[cfg(test)]
mod tests
{
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_log_format_from_str()
    {
        assert_eq!(LogFormat::from_str("pretty").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("JSON").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str("text").unwrap(), LogFormat::Pretty);
        assert!(matches!(LogFormat::from_str("xml"), Err(LoggingError::InvalidFormat(_))));
    }

    #[test]
    fn test_log_level_from_str()
    {
        assert_eq!(LogLevel::from_str("error").unwrap(), LogLevel::Error);
        assert_eq!(LogLevel::from_str("warning").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::from_str("info").unwrap(), LogLevel::Info);
        assert_eq!(LogLevel::from_str("dbg").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("trace").unwrap(), LogLevel::Trace);
        assert!(matches!(LogLevel::from_str("loud"), Err(LoggingError::InvalidLevel(_))));
    }

    #[test]
    fn test_log_level_to_tracing_level()
    {
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
        assert_eq!(Level::from(LogLevel::Warn), Level::WARN);
        assert_eq!(Level::from(LogLevel::Info), Level::INFO);
        assert_eq!(Level::from(LogLevel::Debug), Level::DEBUG);
        assert_eq!(Level::from(LogLevel::Trace), Level::TRACE);
    }

    #[test]
    fn test_log_config_from_lookup()
    {
        let vars = HashMap::from([
            (LOG_FORMAT_ENV, "json".to_string()),
            (LOG_FILE_ENV, "/tmp/crashsym.log".to_string()),
        ]);
        let config = LogConfig::from_lookup(|key| vars.get(key).cloned());
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.file, Some(PathBuf::from("/tmp/crashsym.log")));
        assert_eq!(config.level, None);
    }

    #[test]
    fn test_log_config_defaults()
    {
        let config = LogConfig::from_lookup(|key| (key == LOG_FORMAT_ENV).then(|| "bogus".to_string()));
        assert_eq!(config, LogConfig::default());
    }

    #[test]
    fn test_explicit_level_overrides()
    {
        let config = LogConfig::default().with_level(Some(LogLevel::Debug));
        assert_eq!(config.level, Some(LogLevel::Debug));
        assert_eq!(config.with_level(None).level, Some(LogLevel::Debug));
    }

    #[test]
    fn test_directory_gets_dated_file()
    {
        let dir = env::temp_dir();
        let path = log_file_path(&dir);
        assert_eq!(path.parent(), Some(dir.as_path()));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("-crashsym.log"));

        let file = dir.join("explicit.log");
        assert_eq!(log_file_path(&file), file);
    }
}
