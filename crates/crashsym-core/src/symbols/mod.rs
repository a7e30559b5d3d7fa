//! # Symbols
//!
//! Binary images and the sources they draw names from.
//!
//! Each image named in a crash report is backed by a [`SymbolOwner`]: either a
//! real Mach-O symbol table (optionally with DWARF line tables) or a
//! [`NullOwner`] when the binary could not be read. Objective-C methods
//! recovered from the class list compete with the owner's symbols for the
//! nearest name. Addresses neither can name fall through to the [`Fallback`]
//! chain of external symbol maps and the shared cache local-symbol index.

use gimli::{EndianArcSlice, RunTimeEndian};

pub mod image;
pub mod local;
pub mod macho;
pub mod objc;
pub mod owner;
pub mod symbol_map;

pub use image::{build_images, build_symbol_index, BinaryImage, ImageDescriptor, ImageSet};
pub use local::{LocalSymbolCache, LocalSymbolIndex};
pub use macho::{ImageLoader, LoadedHeader, MachoLoader};
pub use owner::{NullOwner, SourceLines, SymbolOwner, SymbolTable};
pub use symbol_map::{Fallback, SymbolMap, SymbolMaps};

type OwnedReader = EndianArcSlice<RunTimeEndian>;
