//! # Types
//!
//! Plain data passed between the report parser, the resolver, and the blame
//! engine.
//!
//! These types carry no behavior of their own beyond small helpers; the
//! resolution logic lives in [`crate::symbols`] and [`crate::resolver`].

pub mod frame;
pub mod symbols;

// Re-export all public types
pub use frame::BacktraceFrame;
pub use symbols::{SourceLocation, SymbolInfo};
