//! Shared cache local symbols.
//!
//! Release builds of the dyld shared cache replace the names of non-exported
//! functions with `<redacted>` and ship the real names in a separate
//! local-symbols file. Entries are keyed by the dylib's offset inside the
//! cache and the symbol's start address.

use std::collections::HashMap;

/// Lookup surface over a local-symbols index.
pub trait LocalSymbolIndex
{
    /// Name of the symbol starting at `symbol_address` in the dylib at
    /// `dylib_offset`.
    fn name_for(&self, dylib_offset: u32, symbol_address: u32) -> Option<String>;
}

/// In-memory local-symbols index.
#[derive(Debug, Clone, Default)]
pub struct LocalSymbolCache
{
    names: HashMap<(u32, u32), String>,
}

impl LocalSymbolCache
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn insert(&mut self, dylib_offset: u32, symbol_address: u32, name: impl Into<String>)
    {
        self.names.insert((dylib_offset, symbol_address), name.into());
    }

    pub fn len(&self) -> usize
    {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.names.is_empty()
    }
}

impl LocalSymbolIndex for LocalSymbolCache
{
    fn name_for(&self, dylib_offset: u32, symbol_address: u32) -> Option<String>
    {
        self.names.get(&(dylib_offset, symbol_address)).cloned()
    }
}

impl<S: Into<String>> FromIterator<((u32, u32), S)> for LocalSymbolCache
{
    fn from_iter<I: IntoIterator<Item = ((u32, u32), S)>>(iter: I) -> Self
    {
        let mut cache = Self::new();
        for ((dylib_offset, symbol_address), name) in iter {
            cache.insert(dylib_offset, symbol_address, name);
        }
        cache
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_lookup_requires_both_keys()
    {
        let cache: LocalSymbolCache = vec![((0x4000, 0x1800_2000), "_objc_msgSend_uncached")]
            .into_iter()
            .collect();
        assert_eq!(
            cache.name_for(0x4000, 0x1800_2000).as_deref(),
            Some("_objc_msgSend_uncached")
        );
        assert_eq!(cache.name_for(0x4000, 0x1800_2004), None);
        assert_eq!(cache.name_for(0x8000, 0x1800_2000), None);
    }
}
