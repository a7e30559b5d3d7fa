//! Mach-O header and symbol extraction.
//!
//! [`MachoLoader`] reads the binary named by a report line from disk (under an
//! optional sysroot), picks the matching slice out of fat archives, and
//! falls back to the dyld shared cache for system images that do not exist as
//! standalone files. A binary whose `LC_UUID` differs from the report's is
//! rejected. Anything it cannot read is reported as an error, which
//! [`super::build_images`] turns into an image without an owner.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use object::read::macho::{
    DyldCache, FatArch, LoadCommandVariant, MachHeader, MachOFatFile32, MachOFatFile64, MachOFile,
};
use object::{Architecture, Endianness, FileKind, Object, ObjectKind, ObjectSegment, ObjectSymbol, ReadRef, SymbolKind};
use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use super::image::ImageDescriptor;
use super::objc;
use super::owner::{SourceLines, SymbolOwner, SymbolTable};
use crate::error::{CrashsymError, Result};

/// Header facts and symbol owner extracted from one binary.
pub struct LoadedHeader
{
    /// `vmaddr` of the `__TEXT` segment.
    pub text_vmaddr: u64,
    /// `MH_EXECUTE` image.
    pub executable: bool,
    /// `LC_ENCRYPTION_INFO` with a non-zero `cryptid`.
    pub encrypted: bool,
    /// Offset of the image inside the dyld shared cache.
    pub shared_cache_offset: Option<u32>,
    pub owner: Box<dyn SymbolOwner>,
    /// Objective-C method implementations, empty for encrypted images.
    pub methods: Vec<(u64, String)>,
}

/// Source of image headers, keyed by report descriptor.
pub trait ImageLoader
{
    /// Load the header and symbols for `descriptor`.
    ///
    /// ## Errors
    ///
    /// Returns an error if the binary is missing, unparsable, or has no slice
    /// for the report architecture.
    fn load(&self, descriptor: &ImageDescriptor) -> Result<LoadedHeader>;
}

/// Loader backed by Mach-O files on disk and an optional dyld shared cache.
#[derive(Debug, Default)]
pub struct MachoLoader
{
    sysroot: Option<PathBuf>,
    shared_cache: Option<PathBuf>,
    shared_cache_data: OnceCell<Option<Arc<[u8]>>>,
}

impl MachoLoader
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Resolve report paths under `sysroot` instead of `/`.
    #[must_use]
    pub fn with_sysroot(mut self, sysroot: Option<PathBuf>) -> Self
    {
        self.sysroot = sysroot;
        self
    }

    /// Look up images missing from disk in this dyld shared cache file.
    #[must_use]
    pub fn with_shared_cache(mut self, shared_cache: Option<PathBuf>) -> Self
    {
        self.shared_cache = shared_cache;
        self
    }

    /// Host path for a path recorded on the crashing device.
    pub fn host_path(&self, device_path: &str) -> PathBuf
    {
        match &self.sysroot {
            Some(root) => root.join(device_path.trim_start_matches('/')),
            None => PathBuf::from(device_path),
        }
    }

    fn shared_cache_data(&self) -> Option<&Arc<[u8]>>
    {
        self.shared_cache_data
            .get_or_init(|| {
                let path = self.shared_cache.as_ref()?;
                match fs::read(path) {
                    Ok(bytes) => Some(Arc::<[u8]>::from(bytes)),
                    Err(err) => {
                        warn!("failed to read shared cache {}: {err}", path.display());
                        None
                    }
                }
            })
            .as_ref()
    }

    fn load_from_disk(&self, path: &Path, arch: Architecture, descriptor: &ImageDescriptor) -> Result<LoadedHeader>
    {
        let bytes = fs::read(path)?;
        let data = select_slice(&bytes, arch, path)?;
        let file = object::File::parse(data).map_err(|err| object_error(path, &err))?;
        if file.architecture() != arch {
            return Err(object_error(path, &format!("no slice for {arch:?}")));
        }
        check_uuid(&file, descriptor, path)?;

        let dsym_path = dsym_path(path);
        let dsym_bytes = dsym_path.as_ref().and_then(|dsym| fs::read(dsym).ok());
        let dsym = match (&dsym_bytes, &dsym_path) {
            (Some(bytes), Some(dsym)) => match select_slice(bytes, arch, dsym).and_then(|data| {
                let file = object::File::parse(data).map_err(|err| object_error(dsym, &err))?;
                check_uuid(&file, descriptor, dsym)?;
                Ok(file)
            }) {
                Ok(file) => Some(file),
                Err(err) => {
                    debug!("ignoring dSYM {}: {err}", dsym.display());
                    None
                }
            },
            _ => None,
        };

        header_from_object(&file, dsym.as_ref(), None)
    }

    fn load_from_shared_cache(&self, descriptor: &ImageDescriptor) -> Result<LoadedHeader>
    {
        let not_found = || io::Error::new(io::ErrorKind::NotFound, format!("{} not found", descriptor.path));
        let Some(data) = self.shared_cache_data() else {
            return Err(not_found().into());
        };
        let cache_path = self.shared_cache.clone().unwrap_or_default();

        let no_subcaches: &[&[u8]] = &[];
        let cache = DyldCache::<Endianness>::parse(&data[..], no_subcaches)
            .map_err(|err| object_error(&cache_path, &err))?;
        for image in cache.images() {
            if image.path().ok() != Some(descriptor.path.as_str()) {
                continue;
            }
            let (_, offset) = image
                .image_data_and_offset()
                .map_err(|err| object_error(&cache_path, &err))?;
            let file = image.parse_object().map_err(|err| object_error(&cache_path, &err))?;
            check_uuid(&file, descriptor, &cache_path)?;
            // Local symbols are keyed by 32-bit offsets; larger ones cannot match.
            return header_from_object(&file, None, u32::try_from(offset).ok());
        }

        Err(not_found().into())
    }
}

impl ImageLoader for MachoLoader
{
    fn load(&self, descriptor: &ImageDescriptor) -> Result<LoadedHeader>
    {
        let arch = architecture_from_name(&descriptor.arch)?;
        let path = self.host_path(&descriptor.path);
        match self.load_from_disk(&path, arch, descriptor) {
            Err(CrashsymError::Io(err)) if err.kind() == io::ErrorKind::NotFound && self.shared_cache.is_some() => {
                debug!("{} not on disk, trying shared cache", descriptor.path);
                self.load_from_shared_cache(descriptor)
            }
            other => other,
        }
    }
}

/// Map a report architecture name onto `object`'s architecture.
///
/// ## Errors
///
/// Returns [`CrashsymError::UnsupportedArchitecture`] for unknown names.
pub fn architecture_from_name(name: &str) -> Result<Architecture>
{
    let arch = match name {
        "arm64_32" => Architecture::Aarch64_Ilp32,
        name if name.starts_with("arm64") => Architecture::Aarch64,
        name if name.starts_with("armv") => Architecture::Arm,
        name if name.starts_with("x86_64") => Architecture::X86_64,
        "i386" => Architecture::I386,
        other => return Err(CrashsymError::UnsupportedArchitecture(other.to_string())),
    };
    Ok(arch)
}

fn object_error(path: &Path, err: &dyn std::fmt::Display) -> CrashsymError
{
    CrashsymError::Object {
        path: path.display().to_string(),
        details: err.to_string(),
    }
}

/// Reject a binary whose `LC_UUID` differs from the one printed in the report.
///
/// Either side missing a UUID is accepted.
fn check_uuid(file: &object::File<'_>, descriptor: &ImageDescriptor, path: &Path) -> Result<()>
{
    let (Some(expected), Ok(Some(actual))) = (descriptor.uuid.as_deref(), file.mach_uuid()) else {
        return Ok(());
    };
    let expected = expected.replace('-', "").to_ascii_lowercase();
    let actual = actual.iter().fold(String::with_capacity(32), |mut hex, byte| {
        let _ = write!(hex, "{byte:02x}");
        hex
    });
    if expected == actual {
        return Ok(());
    }

    warn!(identifier = %descriptor.identifier, report = %expected, binary = %actual, "image UUID mismatch");
    Err(object_error(path, &format!("UUID mismatch: report has {expected}, binary has {actual}")))
}

/// Pick the Mach-O slice for `arch` out of a thin or fat file.
fn select_slice<'data>(data: &'data [u8], arch: Architecture, path: &Path) -> Result<&'data [u8]>
{
    let kind = FileKind::parse(data).map_err(|err| object_error(path, &err))?;
    match kind {
        FileKind::MachO32 | FileKind::MachO64 => Ok(data),
        FileKind::MachOFat32 => {
            let fat = MachOFatFile32::parse(data).map_err(|err| object_error(path, &err))?;
            fat_member(fat.arches(), data, arch, path)
        }
        FileKind::MachOFat64 => {
            let fat = MachOFatFile64::parse(data).map_err(|err| object_error(path, &err))?;
            fat_member(fat.arches(), data, arch, path)
        }
        other => Err(object_error(path, &format!("not a Mach-O file ({other:?})"))),
    }
}

fn fat_member<'data, A: FatArch>(arches: &[A], data: &'data [u8], arch: Architecture, path: &Path) -> Result<&'data [u8]>
{
    let member = arches
        .iter()
        .find(|member| member.architecture() == arch)
        .ok_or_else(|| object_error(path, &format!("no slice for {arch:?}")))?;
    member.data(data).map_err(|err| object_error(path, &err))
}

/// `Foo.app/Foo` -> `Foo.app/Foo.dSYM/Contents/Resources/DWARF/Foo`, if it exists.
fn dsym_path(binary: &Path) -> Option<PathBuf>
{
    let name = binary.file_name()?;
    let mut bundle = binary.as_os_str().to_owned();
    bundle.push(".dSYM");
    let candidate = PathBuf::from(bundle)
        .join("Contents/Resources/DWARF")
        .join(name);
    candidate.is_file().then_some(candidate)
}

fn header_from_object(
    file: &object::File<'_>,
    debug_file: Option<&object::File<'_>>,
    shared_cache_offset: Option<u32>,
) -> Result<LoadedHeader>
{
    let text_vmaddr = file
        .segments()
        .find(|segment| matches!(segment.name(), Ok(Some("__TEXT"))))
        .map(|segment| segment.address())
        .ok_or_else(|| CrashsymError::Object {
            path: String::from("<image>"),
            details: "missing __TEXT segment".to_string(),
        })?;

    let mut symbols = text_symbols(file);
    if let Some(debug_file) = debug_file {
        symbols.extend(text_symbols(debug_file));
    }

    let lines = SourceLines::from_object(debug_file.unwrap_or(file)).unwrap_or_else(|err| {
        debug!("skipping line tables: {err}");
        None
    });

    let encrypted = is_encrypted(file);
    let methods = if encrypted {
        debug!("image is encrypted, skipping Objective-C methods");
        Vec::new()
    } else {
        objc::method_symbols(file, text_vmaddr)
    };

    Ok(LoadedHeader {
        text_vmaddr,
        executable: file.kind() == ObjectKind::Executable,
        encrypted,
        shared_cache_offset,
        owner: Box::new(SymbolTable::new(symbols).with_source_lines(lines)),
        methods,
    })
}

fn text_symbols(file: &object::File<'_>) -> Vec<(u64, String)>
{
    file.symbols()
        .filter(|symbol| symbol.kind() == SymbolKind::Text && symbol.is_definition())
        .filter_map(|symbol| {
            let name = symbol.name().ok()?;
            if name.is_empty() {
                return None;
            }
            // C linkage names carry a leading underscore in Mach-O.
            let name = name.strip_prefix('_').unwrap_or(name);
            Some((symbol.address(), name.to_string()))
        })
        .collect()
}

fn is_encrypted(file: &object::File<'_>) -> bool
{
    match file {
        object::File::MachO32(macho) => macho_is_encrypted(macho),
        object::File::MachO64(macho) => macho_is_encrypted(macho),
        _ => false,
    }
}

fn macho_is_encrypted<'data, Mach, R>(file: &MachOFile<'data, Mach, R>) -> bool
where
    Mach: MachHeader,
    R: ReadRef<'data>,
{
    let endian = file.endian();
    let Ok(mut commands) = file.macho_load_commands() else {
        return false;
    };
    while let Ok(Some(command)) = commands.next() {
        let cryptid = match command.variant() {
            Ok(LoadCommandVariant::EncryptionInfo32(info)) => info.cryptid.get(endian),
            Ok(LoadCommandVariant::EncryptionInfo64(info)) => info.cryptid.get(endian),
            _ => continue,
        };
        if cryptid != 0 {
            return true;
        }
    }
    false
}
