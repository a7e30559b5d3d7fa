//! Binary images named in a crash report.

use std::fmt;

use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use super::macho::{ImageLoader, LoadedHeader};
use super::owner::{NullOwner, SymbolOwner};
use crate::blame::BlamePolicy;
use crate::types::SymbolInfo;

/// One line of the report's binary-images section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor
{
    /// Runtime address of the Mach-O header.
    pub load_address: u64,
    /// Last byte of the image (inclusive, as printed in reports).
    pub end_address: u64,
    /// Short name, e.g. `MyApp` or `libsystem_c.dylib`.
    pub identifier: String,
    /// Architecture name, e.g. `arm64`.
    pub arch: String,
    /// Image UUID, if printed.
    pub uuid: Option<String>,
    /// Install path on the crashing device.
    pub path: String,
    /// Position in the binary-images section.
    pub report_order: usize,
}

impl ImageDescriptor
{
    /// Size of the mapped range in bytes.
    pub fn size(&self) -> u64
    {
        self.end_address.saturating_sub(self.load_address).saturating_add(1)
    }
}

/// A loaded binary with its symbol owner and classification flags.
pub struct BinaryImage
{
    descriptor: ImageDescriptor,
    // slide = static (__TEXT vmaddr) - runtime load address
    slide: i64,
    owner: Box<dyn SymbolOwner>,
    symbol_addresses: OnceCell<Vec<u64>>,
    // Objective-C methods, sorted by implementation address
    methods: Vec<(u64, String)>,
    shared_cache_offset: Option<u32>,
    encrypted: bool,
    executable: bool,
    blamable: bool,
}

impl BinaryImage
{
    /// Build an image from its report descriptor and, if it could be read,
    /// its Mach-O header.
    pub fn new(descriptor: ImageDescriptor, header: Option<LoadedHeader>, policy: &BlamePolicy) -> Self
    {
        let (slide, owner, mut methods, shared_cache_offset, encrypted, executable) = match header {
            Some(header) => (
                header.text_vmaddr.wrapping_sub(descriptor.load_address) as i64,
                header.owner,
                header.methods,
                header.shared_cache_offset,
                header.encrypted,
                header.executable,
            ),
            None => (0, Box::new(NullOwner) as Box<dyn SymbolOwner>, Vec::new(), None, false, false),
        };
        methods.sort_by_key(|(address, _)| *address);
        methods.dedup_by_key(|(address, _)| *address);
        let blamable = policy.is_blamable(&descriptor.path, shared_cache_offset.is_some());

        Self {
            descriptor,
            slide,
            owner,
            symbol_addresses: OnceCell::new(),
            methods,
            shared_cache_offset,
            encrypted,
            executable,
            blamable,
        }
    }

    pub fn descriptor(&self) -> &ImageDescriptor
    {
        &self.descriptor
    }

    pub fn identifier(&self) -> &str
    {
        &self.descriptor.identifier
    }

    pub fn path(&self) -> &str
    {
        &self.descriptor.path
    }

    pub fn load_address(&self) -> u64
    {
        self.descriptor.load_address
    }

    pub fn report_order(&self) -> usize
    {
        self.descriptor.report_order
    }

    pub fn slide(&self) -> i64
    {
        self.slide
    }

    /// Offset of this image inside the dyld shared cache, if it came from one.
    pub fn shared_cache_offset(&self) -> Option<u32>
    {
        self.shared_cache_offset
    }

    pub fn has_owner(&self) -> bool
    {
        self.owner.is_present()
    }

    pub fn is_encrypted(&self) -> bool
    {
        self.encrypted
    }

    pub fn is_blamable(&self) -> bool
    {
        self.blamable
    }

    /// Returns `true` if `address` lies inside the image's mapped range.
    pub fn contains(&self, address: u64) -> bool
    {
        address >= self.descriptor.load_address && address <= self.descriptor.end_address
    }

    /// Translate a runtime address into the owner's static address space.
    pub fn translate(&self, address: u64) -> u64
    {
        address.wrapping_add_signed(self.slide)
    }

    /// Sorted start addresses of every owner symbol, built on first use.
    pub fn symbol_addresses(&self) -> &[u64]
    {
        self.symbol_addresses
            .get_or_init(|| build_symbol_index(self.owner.as_ref()))
    }

    /// Greatest symbol start at or below `translated`.
    pub fn nearest_symbol(&self, translated: u64) -> Option<u64>
    {
        let index = self.symbol_addresses();
        let upper = index.partition_point(|&start| start <= translated);
        upper.checked_sub(1).map(|position| index[position])
    }

    /// Greatest Objective-C method implementation at or below `translated`.
    ///
    /// Encrypted images never answer.
    pub fn nearest_method(&self, translated: u64) -> Option<(u64, &str)>
    {
        if self.is_encrypted() {
            return None;
        }
        let upper = self.methods.partition_point(|(start, _)| *start <= translated);
        let (start, name) = &self.methods[upper.checked_sub(1)?];
        Some((*start, name.as_str()))
    }

    /// Resolve a runtime address through the owner and the method list.
    ///
    /// A method wins only when it starts strictly after the nearest symbol.
    /// Returns `None` when the translated address precedes every symbol and
    /// method, or the owner has no name for the covering symbol.
    pub fn resolve(&self, address: u64) -> Option<SymbolInfo>
    {
        let translated = self.translate(address);
        let symbol = self.nearest_symbol(translated);
        let (start, name) = match self.nearest_method(translated) {
            Some((start, name)) if symbol.is_none_or(|symbol| start > symbol) => (start, name),
            _ => {
                let start = symbol?;
                (start, self.owner.symbol_name(start)?)
            }
        };
        Some(SymbolInfo::new(name, translated - start).with_location(self.owner.source_location(translated)))
    }
}

impl fmt::Debug for BinaryImage
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("BinaryImage")
            .field("identifier", &self.descriptor.identifier)
            .field("load_address", &format_args!("{:#x}", self.descriptor.load_address))
            .field("slide", &self.slide)
            .field("owner", &self.owner.is_present())
            .field("methods", &self.methods.len())
            .field("encrypted", &self.encrypted)
            .field("executable", &self.executable)
            .field("blamable", &self.blamable)
            .finish()
    }
}

/// Collect and sort the owner's symbol start addresses.
///
/// The sort is stable and keeps duplicates, so aliases stay in owner order.
pub fn build_symbol_index(owner: &dyn SymbolOwner) -> Vec<u64>
{
    let mut addresses = owner.symbol_addresses();
    addresses.sort();
    addresses
}

/// All images of one report, ordered by load address.
#[derive(Debug, Default)]
pub struct ImageSet
{
    images: Vec<BinaryImage>,
}

impl ImageSet
{
    /// Sort images by load address, dropping any whose range overlaps an
    /// earlier-reported image.
    pub fn new(mut images: Vec<BinaryImage>) -> Self
    {
        images.sort_by_key(|image| (image.report_order(), image.load_address()));
        let mut accepted: Vec<BinaryImage> = Vec::with_capacity(images.len());
        for image in images {
            let overlaps = accepted.iter().any(|other| {
                image.load_address() <= other.descriptor.end_address
                    && other.load_address() <= image.descriptor.end_address
            });
            if overlaps {
                warn!(identifier = image.identifier(), "dropping image with overlapping address range");
                continue;
            }
            accepted.push(image);
        }
        accepted.sort_by_key(BinaryImage::load_address);

        Self { images: accepted }
    }

    /// Image whose range contains `address`.
    pub fn image_for_address(&self, address: u64) -> Option<&BinaryImage>
    {
        let upper = self.images.partition_point(|image| image.load_address() <= address);
        let candidate = &self.images[upper.checked_sub(1)?];
        candidate.contains(address).then_some(candidate)
    }

    /// Image with the given identifier.
    pub fn find(&self, identifier: &str) -> Option<&BinaryImage>
    {
        self.images.iter().find(|image| image.identifier() == identifier)
    }

    /// Images in load-address order.
    pub fn iter(&self) -> impl Iterator<Item = &BinaryImage>
    {
        self.images.iter()
    }

    /// Images in the order the report listed them.
    pub fn by_report_order(&self) -> Vec<&BinaryImage>
    {
        let mut ordered: Vec<&BinaryImage> = self.images.iter().collect();
        ordered.sort_by_key(|image| image.report_order());
        ordered
    }

    pub fn len(&self) -> usize
    {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.images.is_empty()
    }
}

/// Load every image's header through `loader` and build the image set.
///
/// A header that cannot be loaded leaves that image without an owner.
pub fn build_images(descriptors: Vec<ImageDescriptor>, loader: &dyn ImageLoader, policy: &BlamePolicy) -> ImageSet
{
    let images = descriptors
        .into_iter()
        .map(|descriptor| {
            let header = match loader.load(&descriptor) {
                Ok(header) => {
                    debug!(
                        identifier = %descriptor.identifier,
                        text_vmaddr = header.text_vmaddr,
                        encrypted = header.encrypted,
                        "loaded image header"
                    );
                    Some(header)
                }
                Err(err) => {
                    warn!(identifier = %descriptor.identifier, path = %descriptor.path, "no symbols for image: {err}");
                    None
                }
            };
            BinaryImage::new(descriptor, header, policy)
        })
        .collect();

    ImageSet::new(images)
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::symbols::owner::SymbolTable;

    fn descriptor(identifier: &str, load_address: u64, end_address: u64, order: usize) -> ImageDescriptor
    {
        ImageDescriptor {
            load_address,
            end_address,
            identifier: identifier.to_string(),
            arch: "arm64".to_string(),
            uuid: None,
            path: format!("/var/containers/Bundle/Application/{identifier}"),
            report_order: order,
        }
    }

    fn header(text_vmaddr: u64, symbols: Vec<(u64, &str)>) -> LoadedHeader
    {
        LoadedHeader {
            text_vmaddr,
            executable: true,
            encrypted: false,
            shared_cache_offset: None,
            owner: Box::new(SymbolTable::new(
                symbols.into_iter().map(|(address, name)| (address, name.to_string())),
            )),
            methods: Vec::new(),
        }
    }

    fn with_methods(mut header: LoadedHeader, methods: &[(u64, &str)]) -> LoadedHeader
    {
        header.methods = methods.iter().map(|(address, name)| (*address, (*name).to_string())).collect();
        header
    }

    #[test]
    fn test_slide_is_static_minus_runtime()
    {
        let image = BinaryImage::new(
            descriptor("App", 0x1000, 0x4fff, 0),
            Some(header(0x2000, vec![])),
            &BlamePolicy::default(),
        );
        assert_eq!(image.slide(), 0x1000);
        assert_eq!(image.translate(0x1010), 0x2010);
    }

    #[test]
    fn test_negative_slide()
    {
        let image = BinaryImage::new(
            descriptor("App", 0x1_0400_0000, 0x1_0400_ffff, 0),
            Some(header(0x1_0000_0000, vec![])),
            &BlamePolicy::default(),
        );
        assert_eq!(image.slide(), -0x400_0000);
        assert_eq!(image.translate(0x1_0400_0010), 0x1_0000_0010);
    }

    #[test]
    fn test_nearest_symbol_is_floor()
    {
        let image = BinaryImage::new(
            descriptor("App", 0x1000, 0x4fff, 0),
            Some(header(0x1000, vec![(0x3000, "bar"), (0x2000, "foo")])),
            &BlamePolicy::default(),
        );
        assert_eq!(image.nearest_symbol(0x1fff), None);
        assert_eq!(image.nearest_symbol(0x2000), Some(0x2000));
        assert_eq!(image.nearest_symbol(0x2fff), Some(0x2000));
        assert_eq!(image.nearest_symbol(0x3004), Some(0x3000));
    }

    #[test]
    fn test_resolve_reports_offset()
    {
        let image = BinaryImage::new(
            descriptor("App", 0x1000, 0x4fff, 0),
            Some(header(0x1000, vec![(0x2000, "foo")])),
            &BlamePolicy::default(),
        );
        let info = image.resolve(0x2010).unwrap();
        assert_eq!(info.name(), "foo");
        assert_eq!(info.offset(), 0x10);
        assert!(image.resolve(0x1ff0).is_none());
    }

    #[test]
    fn test_closer_method_wins()
    {
        let header = with_methods(header(0x1000, vec![(0x2000, "foo")]), &[
            (0x2100, "-[Widget draw]"),
            (0x1800, "+[Widget shared]"),
            (0x2000, "-[Widget shadowed]"),
        ]);
        let image = BinaryImage::new(descriptor("App", 0x1000, 0x4fff, 0), Some(header), &BlamePolicy::default());

        assert_eq!(image.resolve(0x1804).unwrap().to_string(), "+[Widget shared] + 4");
        assert_eq!(image.resolve(0x2010).unwrap().to_string(), "foo + 16");
        assert_eq!(image.resolve(0x2108).unwrap().to_string(), "-[Widget draw] + 8");
    }

    #[test]
    fn test_encrypted_image_ignores_methods()
    {
        let mut header = with_methods(header(0x1000, vec![(0x2000, "foo")]), &[(0x2100, "-[Widget draw]")]);
        header.encrypted = true;
        let image = BinaryImage::new(descriptor("App", 0x1000, 0x4fff, 0), Some(header), &BlamePolicy::default());

        assert!(image.is_encrypted());
        assert_eq!(image.nearest_method(0x2108), None);
        assert_eq!(image.resolve(0x2108).unwrap().to_string(), "foo + 264");
    }

    #[test]
    fn test_symbol_index_is_cached()
    {
        let image = BinaryImage::new(
            descriptor("App", 0x1000, 0x4fff, 0),
            Some(header(0x1000, vec![(0x3000, "bar"), (0x2000, "foo"), (0x2000, "foo_alias")])),
            &BlamePolicy::default(),
        );
        let first = image.symbol_addresses();
        let second = image.symbol_addresses();
        assert_eq!(first, &[0x2000, 0x2000, 0x3000]);
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn test_ownerless_image()
    {
        let image = BinaryImage::new(descriptor("App", 0x1000, 0x4fff, 0), None, &BlamePolicy::default());
        assert!(!image.has_owner());
        assert!(image.symbol_addresses().is_empty());
        assert_eq!(image.slide(), 0);
        assert!(image.resolve(0x1000).is_none());
    }

    #[test]
    fn test_image_set_lookup()
    {
        let policy = BlamePolicy::default();
        let set = ImageSet::new(vec![
            BinaryImage::new(descriptor("B", 0x8000, 0x8fff, 1), None, &policy),
            BinaryImage::new(descriptor("A", 0x1000, 0x1fff, 0), None, &policy),
        ]);
        assert_eq!(set.image_for_address(0x0fff).map(BinaryImage::identifier), None);
        assert_eq!(set.image_for_address(0x1000).map(BinaryImage::identifier), Some("A"));
        assert_eq!(set.image_for_address(0x1fff).map(BinaryImage::identifier), Some("A"));
        assert_eq!(set.image_for_address(0x2000).map(BinaryImage::identifier), None);
        assert_eq!(set.image_for_address(0x8800).map(BinaryImage::identifier), Some("B"));
        assert_eq!(set.image_for_address(0x9000).map(BinaryImage::identifier), None);
    }

    #[test]
    fn test_image_set_drops_overlaps()
    {
        let policy = BlamePolicy::default();
        let set = ImageSet::new(vec![
            BinaryImage::new(descriptor("A", 0x1000, 0x1fff, 0), None, &policy),
            BinaryImage::new(descriptor("B", 0x1800, 0x2fff, 1), None, &policy),
        ]);
        assert_eq!(set.len(), 1);
        assert!(set.find("B").is_none());
    }

    #[test]
    fn test_by_report_order()
    {
        let policy = BlamePolicy::default();
        let set = ImageSet::new(vec![
            BinaryImage::new(descriptor("B", 0x1000, 0x1fff, 1), None, &policy),
            BinaryImage::new(descriptor("A", 0x8000, 0x8fff, 0), None, &policy),
        ]);
        let order: Vec<&str> = set.by_report_order().into_iter().map(BinaryImage::identifier).collect();
        assert_eq!(order, vec!["A", "B"]);
    }
}
