//! Stack frame types.

use super::symbols::SymbolInfo;

/// One line of one thread's backtrace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacktraceFrame
{
    /// Frame index (0 = innermost/crashing frame).
    pub depth: usize,
    /// Base address of the owning image as printed on the frame line.
    ///
    /// Only used as a cross-check; the owning image is located by `address`.
    pub image_address: u64,
    /// Absolute runtime address being symbolicated.
    pub address: u64,
    /// Resolution result, `None` until resolved or if resolution failed.
    pub symbol_info: Option<SymbolInfo>,
}

impl BacktraceFrame
{
    /// Build an unresolved frame.
    pub const fn new(depth: usize, image_address: u64, address: u64) -> Self
    {
        Self {
            depth,
            image_address,
            address,
            symbol_info: None,
        }
    }

    /// Returns `true` if a symbol was found for this frame.
    pub const fn is_resolved(&self) -> bool
    {
        self.symbol_info.is_some()
    }
}
