//! Symbol owners: the per-image "give me a name for this address" surface.
//!
//! An owner answers three questions about the image's static address space:
//! which addresses start a symbol, what the symbol starting at an address is
//! called, and which source line an address belongs to. It performs no
//! nearest-symbol search of its own; that lives in [`super::image`].

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use addr2line::Context;
use gimli::{Dwarf, RunTimeEndian, SectionId};
use object::{Object, ObjectSection};
use once_cell::sync::OnceCell;
use tracing::debug;

use super::OwnedReader;
use crate::error::{CrashsymError, Result};
use crate::types::SourceLocation;

/// Name the shared cache gives symbols stripped into its local-symbols file.
pub const REDACTED: &str = "<redacted>";

/// Query surface over one binary's symbol and line tables.
pub trait SymbolOwner
{
    /// `false` for images whose symbol data could not be extracted.
    fn is_present(&self) -> bool
    {
        true
    }

    /// Start address of every symbol, in owner order.
    fn symbol_addresses(&self) -> Vec<u64>;

    /// Name of the first symbol (in owner order) starting at `start`.
    fn symbol_name(&self, start: u64) -> Option<&str>;

    /// Source file and line covering `address`.
    fn source_location(&self, address: u64) -> Option<SourceLocation>;
}

/// Owner for images without readable symbol data.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOwner;

impl SymbolOwner for NullOwner
{
    fn is_present(&self) -> bool
    {
        false
    }

    fn symbol_addresses(&self) -> Vec<u64>
    {
        Vec::new()
    }

    fn symbol_name(&self, _start: u64) -> Option<&str>
    {
        None
    }

    fn source_location(&self, _address: u64) -> Option<SourceLocation>
    {
        None
    }
}

/// In-memory symbol table, optionally paired with DWARF line tables.
pub struct SymbolTable
{
    symbols: Vec<(u64, String)>,
    first_by_address: HashMap<u64, usize>,
    lines: Option<SourceLines>,
}

impl SymbolTable
{
    /// Build a table from `(start address, name)` pairs in owner order.
    ///
    /// When several names share an address the first one is kept for lookups.
    /// [`REDACTED`] entries still mark a symbol start but never yield a name.
    pub fn new(symbols: impl IntoIterator<Item = (u64, String)>) -> Self
    {
        let symbols: Vec<(u64, String)> = symbols.into_iter().collect();
        let mut first_by_address = HashMap::with_capacity(symbols.len());
        for (index, (address, _)) in symbols.iter().enumerate() {
            first_by_address.entry(*address).or_insert(index);
        }

        Self {
            symbols,
            first_by_address,
            lines: None,
        }
    }

    /// Attach line tables used for source locations.
    #[must_use]
    pub fn with_source_lines(mut self, lines: Option<SourceLines>) -> Self
    {
        self.lines = lines;
        self
    }

    pub fn len(&self) -> usize
    {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.symbols.is_empty()
    }
}

impl std::fmt::Debug for SymbolTable
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("SymbolTable")
            .field("symbols", &self.symbols.len())
            .field("lines", &self.lines.is_some())
            .finish()
    }
}

impl SymbolOwner for SymbolTable
{
    fn symbol_addresses(&self) -> Vec<u64>
    {
        self.symbols.iter().map(|(address, _)| *address).collect()
    }

    fn symbol_name(&self, start: u64) -> Option<&str>
    {
        let index = *self.first_by_address.get(&start)?;
        let name = self.symbols[index].1.as_str();
        (name != REDACTED).then_some(name)
    }

    fn source_location(&self, address: u64) -> Option<SourceLocation>
    {
        self.lines.as_ref()?.location(address)
    }
}

const LINE_SECTIONS: &[SectionId] = &[
    SectionId::DebugAbbrev,
    SectionId::DebugAddr,
    SectionId::DebugAranges,
    SectionId::DebugInfo,
    SectionId::DebugLine,
    SectionId::DebugLineStr,
    SectionId::DebugRanges,
    SectionId::DebugRngLists,
    SectionId::DebugStr,
    SectionId::DebugStrOffsets,
];

/// DWARF line tables copied out of a binary or dSYM.
///
/// The `addr2line` context is built on first query and reused afterwards.
pub struct SourceLines
{
    endian: RunTimeEndian,
    sections: HashMap<&'static str, Arc<[u8]>>,
    context: OnceCell<Option<Context<OwnedReader>>>,
}

impl SourceLines
{
    /// Copy the DWARF sections of `file`.
    ///
    /// Returns `Ok(None)` when the file carries no `debug_info` section.
    pub fn from_object(file: &object::File<'_>) -> Result<Option<Self>>
    {
        let endian = if file.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };

        let mut sections = HashMap::new();
        for id in LINE_SECTIONS {
            if let Some(data) = load_section(file, id.name())? {
                sections.insert(id.name(), data);
            }
        }

        if !sections.contains_key(SectionId::DebugInfo.name()) {
            return Ok(None);
        }

        Ok(Some(Self {
            endian,
            sections,
            context: OnceCell::new(),
        }))
    }

    /// Source location for a static address.
    pub fn location(&self, address: u64) -> Option<SourceLocation>
    {
        let context = self.context.get_or_init(|| self.build_context()).as_ref()?;
        let location = context.find_location(address).ok()??;
        Some(SourceLocation {
            file: location.file?.to_string(),
            line: location.line,
        })
    }

    fn build_context(&self) -> Option<Context<OwnedReader>>
    {
        let dwarf = Dwarf::load(|id| Ok::<_, gimli::Error>(self.reader(id)));
        match dwarf.and_then(Context::from_dwarf) {
            Ok(context) => Some(context),
            Err(err) => {
                debug!("failed to build line table context: {err}");
                None
            }
        }
    }

    fn reader(&self, id: SectionId) -> OwnedReader
    {
        let data = self
            .sections
            .get(id.name())
            .cloned()
            .unwrap_or_else(|| Arc::<[u8]>::from(Vec::new()));
        OwnedReader::new(data, self.endian)
    }
}

fn load_section(file: &object::File<'_>, name: &str) -> Result<Option<Arc<[u8]>>>
{
    // Mach-O spells `.debug_info` as `__debug_info`.
    let macho_name = format!("__{}", name.trim_start_matches('.'));
    for candidate in [name, macho_name.as_str()] {
        if let Some(section) = file.section_by_name(candidate) {
            let data = section.uncompressed_data().map_err(|err| CrashsymError::Object {
                path: candidate.to_string(),
                details: err.to_string(),
            })?;
            return Ok(Some(match data {
                Cow::Borrowed(bytes) => Arc::<[u8]>::from(bytes),
                Cow::Owned(vec) => vec.into(),
            }));
        }
    }

    Ok(None)
}
