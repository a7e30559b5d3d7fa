//! Symbol and source location types.

use std::fmt;

use rustc_demangle::try_demangle;

/// Source code location for a resolved address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation
{
    /// Path as recorded in the debug info.
    pub file: String,
    /// Line number, if known.
    pub line: Option<u32>,
}

impl SourceLocation
{
    /// Helper to build a location when only a file is known.
    pub fn from_file(file: impl Into<String>) -> Self
    {
        Self {
            file: file.into(),
            line: None,
        }
    }
}

impl fmt::Display for SourceLocation
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self.line {
            Some(line) => write!(f, "{}:{line}", self.file),
            None => write!(f, "{}", self.file),
        }
    }
}

/// Result of resolving one address.
///
/// A `SymbolInfo` only exists when a name was found, so `offset` is always
/// meaningful and an unnamed result can never carry a source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo
{
    name: String,
    offset: u64,
    location: Option<SourceLocation>,
}

impl SymbolInfo
{
    /// Build a result for `name`, `offset` bytes past the symbol start.
    pub fn new(name: impl Into<String>, offset: u64) -> Self
    {
        Self {
            name: name.into(),
            offset,
            location: None,
        }
    }

    /// Attach a source location.
    #[must_use]
    pub fn with_location(mut self, location: Option<SourceLocation>) -> Self
    {
        self.location = location;
        self
    }

    /// Raw symbol name as reported by the owner or fallback.
    pub fn name(&self) -> &str
    {
        &self.name
    }

    /// Demangled name for Rust symbols, raw name otherwise.
    pub fn display_name(&self) -> String
    {
        try_demangle(&self.name).map_or_else(|_| self.name.clone(), |demangled| format!("{demangled:#}"))
    }

    /// Distance from the symbol start to the resolved address.
    pub fn offset(&self) -> u64
    {
        self.offset
    }

    /// Source location, if the binary carried line tables.
    pub fn location(&self) -> Option<&SourceLocation>
    {
        self.location.as_ref()
    }

    /// Source path, if known.
    pub fn source_path(&self) -> Option<&str>
    {
        self.location.as_ref().map(|loc| loc.file.as_str())
    }

    /// Source line, if known.
    pub fn source_line(&self) -> Option<u32>
    {
        self.location.as_ref().and_then(|loc| loc.line)
    }
}

impl fmt::Display for SymbolInfo
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{} + {}", self.display_name(), self.offset)?;
        if let Some(location) = &self.location {
            write!(f, " ({location})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_symbol_info_display_plain()
    {
        let info = SymbolInfo::new("foo", 0);
        assert_eq!(info.to_string(), "foo + 0");
        assert_eq!(info.source_path(), None);
        assert_eq!(info.source_line(), None);
    }

    #[test]
    fn test_symbol_info_display_with_location()
    {
        let info = SymbolInfo::new("-[AppDelegate crash]", 12).with_location(Some(SourceLocation {
            file: "AppDelegate.m".to_string(),
            line: Some(42),
        }));
        assert_eq!(info.to_string(), "-[AppDelegate crash] + 12 (AppDelegate.m:42)");
        assert_eq!(info.source_line(), Some(42));
    }

    #[test]
    fn test_symbol_info_demangles_rust()
    {
        let info = SymbolInfo::new("_ZN4core9panicking5panic17h0123456789abcdefE", 4);
        assert_eq!(info.display_name(), "core::panicking::panic");
    }
}
