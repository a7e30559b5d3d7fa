//! # crashsym utilities
//!
//! Logging setup shared by the crashsym binaries.
//!
//! The core library only emits `tracing` events; this crate decides where they
//! go (stderr, optional log file) and in which format.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{init_logging, init_logging_with_level, LogConfig, LogFormat, LogLevel, LoggingError, LoggingGuard};
pub use tracing::{debug, error, info, trace, warn};
