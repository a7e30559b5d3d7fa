//! # Error Types
//!
//! Error handling for the symbolication engine.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.
//!
//! Most failures inside the engine never reach the caller: an unreadable
//! binary degrades to an image without symbols, and an unresolvable frame is
//! left untouched in the output. Only conditions that affect the whole report
//! (or the loading of an input file) are surfaced through [`CrashsymError`].

use thiserror::Error;

/// Main error type for symbolication operations
///
/// ## Error Categories
///
/// 1. **Report errors**: MalformedReport
/// 2. **Input errors**: InvalidArgument, UnsupportedArchitecture
/// 3. **Binary errors**: Object (a Mach-O file or shared cache could not be parsed)
/// 4. **I/O errors**: Io
#[derive(Error, Debug)]
pub enum CrashsymError
{
    /// The crash report could not be split into its sections
    ///
    /// This happens when the text has no `Binary Images:` section.
    #[error("Malformed crash report: {0}")]
    MalformedReport(String),

    /// Invalid argument passed to an engine function
    ///
    /// Examples:
    /// - A `--map` argument without an `=` separator
    /// - A symbol map file without any symbol lines
    /// - A non-numeric `CRASHSYM_PROGRESS_STEP`
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The architecture named in the report has no Mach-O counterpart
    #[error("Unsupported architecture: {0}")]
    UnsupportedArchitecture(String),

    /// A binary (or the shared cache) could not be parsed
    #[error("Failed to read {path}: {details}")]
    Object
    {
        /// Path of the file that failed to parse
        path: String,
        /// Parser error details
        details: String,
    },

    /// I/O error (for file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, CrashsymError>`
///
/// ```rust
/// use crashsym_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, CrashsymError>;
