//! External symbol maps and the fallback chain for unnamed addresses.
//!
//! A symbol map names code inside one binary by image-relative offset. Maps
//! are usually produced by the linker (`ld -map`) at build time and shipped
//! alongside stripped release binaries.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, trace};

use super::image::BinaryImage;
use super::local::LocalSymbolIndex;
use crate::error::{CrashsymError, Result};
use crate::hex::parse_hex_str;
use crate::types::SymbolInfo;

/// Link-time base of 64-bit executables.
const DEFAULT_BASE_64: u64 = 0x1_0000_0000;

/// `0x100003F50  0x00000020  [  1] _main`
static SYMBOL_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^0x([0-9A-Fa-f]+)\s+0x([0-9A-Fa-f]+)\s+\[\s*\d+\]\s+(.+?)\s*$").expect("valid symbol line regex")
});

/// `0x100003F50  0x00000A20  __TEXT  __text`
static SECTION_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^0x([0-9A-Fa-f]+)\s+0x([0-9A-Fa-f]+)\s+(\S+)\s+(\S+)\s*$").expect("valid section line regex")
});

const CODE_SECTIONS: &[&str] = &["__text", "__stubs", "__stub_helper"];

#[derive(Clone, Copy, PartialEq, Eq)]
enum MapSection
{
    Preamble,
    Sections,
    Symbols,
    Done,
}

/// Names for one binary, keyed by offset from the image load address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolMap
{
    entries: BTreeMap<u64, String>,
}

impl SymbolMap
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Record `name` as starting at image offset `offset`.
    ///
    /// The first name recorded for an offset is kept.
    pub fn insert(&mut self, offset: u64, name: impl Into<String>)
    {
        self.entries.entry(offset).or_insert_with(|| name.into());
    }

    /// Parse the `# Symbols:` section of an `ld -map` file.
    ///
    /// Only symbols inside code sections are kept when the map lists its
    /// sections. Addresses are rebased onto `base`, which defaults to
    /// `0x100000000` for maps whose code lives above it and `0` otherwise.
    ///
    /// ## Errors
    ///
    /// Returns [`CrashsymError::InvalidArgument`] if the text contains no
    /// symbol lines at all.
    pub fn parse(text: &str, base: Option<u64>) -> Result<Self>
    {
        let mut state = MapSection::Preamble;
        let mut code_ranges: Vec<(u64, u64)> = Vec::new();
        let mut symbols: Vec<(u64, String)> = Vec::new();

        for line in text.lines() {
            let line = line.trim_end();
            if line.starts_with('#') {
                state = match line {
                    "# Sections:" => MapSection::Sections,
                    "# Symbols:" => MapSection::Symbols,
                    l if l.starts_with("# Dead Stripped Symbols:") => MapSection::Done,
                    _ => state,
                };
                continue;
            }

            match state {
                MapSection::Sections => {
                    if let Some(caps) = SECTION_LINE_RE.captures(line) {
                        if &caps[3] == "__TEXT" && CODE_SECTIONS.contains(&&caps[4]) {
                            let start = parse_hex_str(&caps[1]);
                            code_ranges.push((start, start.saturating_add(parse_hex_str(&caps[2]))));
                        }
                    }
                }
                MapSection::Symbols => {
                    if let Some(caps) = SYMBOL_LINE_RE.captures(line) {
                        let address = parse_hex_str(&caps[1]);
                        let name = caps[3].strip_prefix('_').unwrap_or(&caps[3]);
                        symbols.push((address, name.to_string()));
                    }
                }
                MapSection::Preamble | MapSection::Done => {}
            }
        }

        if symbols.is_empty() {
            return Err(CrashsymError::InvalidArgument("symbol map has no symbols".to_string()));
        }

        if !code_ranges.is_empty() {
            symbols.retain(|(address, _)| {
                code_ranges
                    .iter()
                    .any(|(start, end)| address >= start && address < end)
            });
        }

        let base = base.unwrap_or_else(|| {
            let lowest = symbols.iter().map(|(address, _)| *address).min().unwrap_or_default();
            if lowest >= DEFAULT_BASE_64 {
                DEFAULT_BASE_64
            } else {
                0
            }
        });

        let mut map = Self::new();
        for (address, name) in symbols {
            map.insert(address.saturating_sub(base), name);
        }
        debug!(symbols = map.len(), base, "parsed symbol map");
        Ok(map)
    }

    /// Read and parse a map file from disk.
    ///
    /// ## Errors
    ///
    /// Returns an error if the file cannot be read or has no symbols.
    pub fn from_file(path: &Path, base: Option<u64>) -> Result<Self>
    {
        let text = fs::read_to_string(path)?;
        Self::parse(&text, base)
    }

    /// Greatest entry at or below `offset`, as `(start, name)`.
    pub fn lookup(&self, offset: u64) -> Option<(u64, &str)>
    {
        self.entries
            .range(..=offset)
            .next_back()
            .map(|(start, name)| (*start, name.as_str()))
    }

    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(u64, S)> for SymbolMap
{
    fn from_iter<I: IntoIterator<Item = (u64, S)>>(iter: I) -> Self
    {
        let mut map = Self::new();
        for (offset, name) in iter {
            map.insert(offset, name);
        }
        map
    }
}

/// Symbol maps keyed by binary identifier.
#[derive(Debug, Clone, Default)]
pub struct SymbolMaps
{
    maps: HashMap<String, SymbolMap>,
}

impl SymbolMaps
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn insert(&mut self, identifier: impl Into<String>, map: SymbolMap)
    {
        self.maps.insert(identifier.into(), map);
    }

    pub fn get(&self, identifier: &str) -> Option<&SymbolMap>
    {
        self.maps.get(identifier)
    }

    pub fn len(&self) -> usize
    {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.maps.is_empty()
    }
}

/// Names addresses the image's own owner could not.
///
/// Sources are tried in order: the symbol map for the image's identifier,
/// then the shared cache local-symbol index.
#[derive(Clone, Copy)]
pub struct Fallback<'a>
{
    maps: &'a SymbolMaps,
    local_symbols: Option<&'a dyn LocalSymbolIndex>,
}

impl<'a> Fallback<'a>
{
    pub fn new(maps: &'a SymbolMaps, local_symbols: Option<&'a dyn LocalSymbolIndex>) -> Self
    {
        Self { maps, local_symbols }
    }

    /// Resolve `address` inside `image` without its owner.
    pub fn resolve(&self, image: &BinaryImage, address: u64) -> Option<SymbolInfo>
    {
        let image_offset = address.wrapping_sub(image.load_address());
        if let Some(info) = self.symbol_map_entry(image.identifier(), image_offset) {
            return Some(info);
        }

        let dylib_offset = image.shared_cache_offset()?;
        let translated = image.translate(address);
        let symbol_address = image.nearest_symbol(translated).unwrap_or(translated);
        let name = self.name_for_local_symbol(dylib_offset, symbol_address)?;
        Some(SymbolInfo::new(name, translated - symbol_address))
    }

    fn symbol_map_entry(&self, identifier: &str, image_offset: u64) -> Option<SymbolInfo>
    {
        let (start, name) = self.maps.get(identifier)?.lookup(image_offset)?;
        trace!(identifier, image_offset, name, "resolved through symbol map");
        Some(SymbolInfo::new(name, image_offset - start))
    }

    fn name_for_local_symbol(&self, dylib_offset: u32, symbol_address: u64) -> Option<String>
    {
        // Local-symbol entries are recorded as 32-bit cache offsets.
        let symbol_address = u32::try_from(symbol_address).ok()?;
        self.local_symbols?.name_for(dylib_offset, symbol_address)
    }
}
