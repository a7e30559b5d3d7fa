//! # crashsym-core
//!
//! Symbolication and blame attribution for Apple-style crash reports.
//!
//! This crate turns the raw addresses in a crash report's thread backtraces
//! into `symbol + offset (file:line)` annotations and decides which
//! third-party binary images the crash should be attributed to:
//! - Report framing (threads, frames, binary images)
//! - Mach-O header and symbol extraction, including fat archives, dSYM
//!   companions, and the dyld shared cache
//! - Nearest-symbol lookup with slide translation
//! - Fallback through external symbol maps and shared cache local symbols
//! - Blame policy over the crashed thread
//!
//! ## Failure model
//!
//! Only a report that cannot be split into sections is an error. An image
//! whose binary cannot be read is kept without symbols, and a frame nobody can
//! name is left as printed.

pub mod blame;
pub mod config;
pub mod error;
pub mod hex;
pub mod report;
pub mod resolver;
pub mod symbolicate;
pub mod symbols;
pub mod types;

pub use blame::{blame, BlamePolicy};
pub use config::SymbolicatorConfig;
// Re-export commonly used types
pub use error::{CrashsymError, Result};
pub use report::CrashReport;
pub use symbolicate::{symbolicate, Progress, Symbolicated, Symbolicator, SymbolicatorBuilder};
pub use types::{BacktraceFrame, SourceLocation, SymbolInfo};
