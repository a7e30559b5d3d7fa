//! Objective-C method recovery.
//!
//! Stripped app binaries lose their symbol names but keep the runtime's class
//! metadata. Every class defined in an image is listed in `__objc_classlist`;
//! its read-only data names the class and points at the instance method list,
//! and its metaclass (the class's `isa`) carries the class methods. Each
//! method implementation becomes a `-[Class selector]` or `+[Class selector]`
//! symbol.
//!
//! ## Pointers
//!
//! Plain pointers are read as stored. Chained-fixup rebases are decoded from
//! their low 36 bits; targets below the image base are offsets from it. Binds
//! (pointers into other images) and anything unreadable are skipped.

use object::{I32Bytes, LittleEndian, Object, ObjectSection, ObjectSegment, ReadRef, U32Bytes, U64Bytes};
use tracing::debug;

const CLASS_LIST: &str = "__objc_classlist";

// method_list_t::entsizeAndFlags
const SMALL_METHOD_LIST: u32 = 0x8000_0000;
const ENTSIZE_MASK: u32 = 0x0000_fffc;

const CHAINED_TARGET_MASK: u64 = 0x0000_000f_ffff_ffff;
const CHAINED_BIND: u64 = 1 << 63;

/// Method implementations defined in `file`, as `(address, name)` pairs.
///
/// `base` is the image's `__TEXT` vmaddr. Big-endian images and images
/// without a class list yield nothing.
pub fn method_symbols(file: &object::File<'_>, base: u64) -> Vec<(u64, String)>
{
    if !file.is_little_endian() {
        return Vec::new();
    }
    let Some(class_list) = file.sections().find(|section| matches!(section.name(), Ok(CLASS_LIST))) else {
        return Vec::new();
    };

    let memory = Memory {
        segments: file
            .segments()
            .filter_map(|segment| Some((segment.address(), segment.data().ok()?)))
            .collect(),
        pointer_size: if file.is_64() { 8 } else { 4 },
        base,
    };
    let methods = memory.methods(class_list.address(), class_list.size());
    debug!(count = methods.len(), "recovered Objective-C methods");
    methods
}

/// Image memory as laid out by its segments' file contents.
struct Memory<'data>
{
    segments: Vec<(u64, &'data [u8])>,
    pointer_size: u64,
    base: u64,
}

impl<'data> Memory<'data>
{
    fn locate(&self, address: u64) -> Option<(&'data [u8], u64)>
    {
        self.segments.iter().find_map(|&(start, data)| {
            let offset = address.checked_sub(start)?;
            (offset < data.len() as u64).then_some((data, offset))
        })
    }

    fn u32(&self, address: u64) -> Option<u32>
    {
        let (data, offset) = self.locate(address)?;
        let value = data.read_at::<U32Bytes<LittleEndian>>(offset).ok()?;
        Some(value.get(LittleEndian))
    }

    fn i32(&self, address: u64) -> Option<i32>
    {
        let (data, offset) = self.locate(address)?;
        let value = data.read_at::<I32Bytes<LittleEndian>>(offset).ok()?;
        Some(value.get(LittleEndian))
    }

    /// Non-null pointer stored at `address`.
    fn pointer(&self, address: u64) -> Option<u64>
    {
        if self.pointer_size == 4 {
            return self.u32(address).filter(|&raw| raw != 0).map(u64::from);
        }

        let (data, offset) = self.locate(address)?;
        let raw = data.read_at::<U64Bytes<LittleEndian>>(offset).ok()?.get(LittleEndian);
        if raw == 0 || raw & CHAINED_BIND != 0 {
            return None;
        }
        let target = raw & CHAINED_TARGET_MASK;
        Some(if target < self.base { target + self.base } else { target })
    }

    fn c_string(&self, address: u64) -> Option<&'data str>
    {
        let (data, offset) = self.locate(address)?;
        let bytes = data.read_bytes_at_until(offset..data.len() as u64, 0).ok()?;
        std::str::from_utf8(bytes).ok()
    }

    fn methods(&self, class_list: u64, size: u64) -> Vec<(u64, String)>
    {
        let mut methods = Vec::new();
        let end = class_list.saturating_add(size);
        let mut entry = class_list;
        while entry + self.pointer_size <= end {
            if let Some(class) = self.pointer(entry) {
                self.class_methods(class, '-', &mut methods);
                if let Some(metaclass) = self.pointer(class) {
                    self.class_methods(metaclass, '+', &mut methods);
                }
            }
            entry += self.pointer_size;
        }
        methods
    }

    fn class_methods(&self, class: u64, kind: char, out: &mut Vec<(u64, String)>) -> Option<()>
    {
        let word = self.pointer_size;
        // class_t { isa, superclass, cache, vtable, data }; low bits of data are flags.
        let read_only = self.pointer(class + 4 * word)? & !(word - 1);
        // class_ro_t { flags, instanceStart, instanceSize, [reserved], ivarLayout, name, baseMethods, .. }
        let fields = if word == 8 { 16 } else { 12 };
        let name = self.c_string(self.pointer(read_only + fields + word)?)?;
        let list = self.pointer(read_only + fields + 2 * word)?;

        let entsize_and_flags = self.u32(list)?;
        let count = self.u32(list + 4)?;
        let small = entsize_and_flags & SMALL_METHOD_LIST != 0;
        let entsize = u64::from(entsize_and_flags & ENTSIZE_MASK);
        if entsize < if small { 12 } else { 3 * word } {
            return None;
        }

        for index in 0..u64::from(count) {
            let entry = list + 8 + index * entsize;
            self.locate(entry + entsize - 1)?;
            let method = if small { self.small_method(entry) } else { self.method(entry) };
            if let Some((imp, selector)) = method {
                out.push((imp, format!("{kind}[{name} {selector}]")));
            }
        }
        Some(())
    }

    /// `method_t { name, types, imp }` with absolute pointers.
    fn method(&self, entry: u64) -> Option<(u64, &'data str)>
    {
        let selector = self.c_string(self.pointer(entry)?)?;
        let imp = self.pointer(entry + 2 * self.pointer_size)?;
        // Thumb
        Some((imp & !1, selector))
    }

    /// Relative `method_t`: each field is an `i32` offset from itself, and the
    /// name offset leads to a selector reference.
    fn small_method(&self, entry: u64) -> Option<(u64, &'data str)>
    {
        let selector_ref = entry.checked_add_signed(i64::from(self.i32(entry)?))?;
        let selector = self.c_string(self.pointer(selector_ref)?)?;
        let imp = (entry + 8).checked_add_signed(i64::from(self.i32(entry + 8)?))?;
        Some((imp, selector))
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    const BASE: u64 = 0x1_0000_0000;

    /// Little-endian scratch memory mapped at `BASE`.
    struct Layout
    {
        bytes: Vec<u8>,
    }

    impl Layout
    {
        fn new() -> Self
        {
            Self { bytes: vec![0; 0x1000] }
        }

        fn put(&mut self, address: u64, value: &[u8])
        {
            let offset = usize::try_from(address - BASE).unwrap();
            self.bytes[offset..offset + value.len()].copy_from_slice(value);
        }

        fn u32(&mut self, address: u64, value: u32)
        {
            self.put(address, &value.to_le_bytes());
        }

        fn u64(&mut self, address: u64, value: u64)
        {
            self.put(address, &value.to_le_bytes());
        }

        fn i32(&mut self, address: u64, value: i64)
        {
            self.put(address, &i32::try_from(value).unwrap().to_le_bytes());
        }

        fn string(&mut self, address: u64, value: &str)
        {
            self.put(address, value.as_bytes());
            self.put(address + value.len() as u64, &[0]);
        }

        fn memory(&self) -> Memory<'_>
        {
            Memory {
                segments: vec![(BASE, self.bytes.as_slice())],
                pointer_size: 8,
                base: BASE,
            }
        }
    }

    /// `Widget` with two instance methods and one class method, using
    /// absolute pointers and classic 24-byte method entries.
    fn widget() -> Layout
    {
        let mut layout = Layout::new();
        layout.u64(BASE + 0x100, BASE + 0x200);

        // class and metaclass; FAST_IS_SWIFT_LEGACY set on the data pointer
        layout.u64(BASE + 0x200, BASE + 0x300);
        layout.u64(BASE + 0x220, BASE + 0x400 | 1);
        layout.u64(BASE + 0x320, BASE + 0x500);

        layout.u64(BASE + 0x400 + 24, BASE + 0x800);
        layout.u64(BASE + 0x400 + 32, BASE + 0x600);
        layout.u64(BASE + 0x500 + 24, BASE + 0x800);
        layout.u64(BASE + 0x500 + 32, BASE + 0x700);

        layout.u32(BASE + 0x600, 24);
        layout.u32(BASE + 0x604, 2);
        layout.u64(BASE + 0x608, BASE + 0x810);
        layout.u64(BASE + 0x618, BASE + 0xa00);
        layout.u64(BASE + 0x620, BASE + 0x820);
        layout.u64(BASE + 0x630, BASE + 0xa40);

        layout.u32(BASE + 0x700, 24);
        layout.u32(BASE + 0x704, 1);
        layout.u64(BASE + 0x708, BASE + 0x830);
        layout.u64(BASE + 0x718, BASE + 0xa80);

        layout.string(BASE + 0x800, "Widget");
        layout.string(BASE + 0x810, "draw");
        layout.string(BASE + 0x820, "resize:");
        layout.string(BASE + 0x830, "sharedWidget");
        layout
    }

    #[test]
    fn test_instance_and_class_methods()
    {
        let layout = widget();
        let methods = layout.memory().methods(BASE + 0x100, 8);
        assert_eq!(methods, vec![
            (BASE + 0xa00, "-[Widget draw]".to_string()),
            (BASE + 0xa40, "-[Widget resize:]".to_string()),
            (BASE + 0xa80, "+[Widget sharedWidget]".to_string()),
        ]);
    }

    #[test]
    fn test_relative_method_list_with_chained_pointers()
    {
        let mut layout = Layout::new();
        // DYLD_CHAINED_PTR_64_OFFSET: target relative to the base, `next` in the high bits
        let chained = |target: u64| target | (3 << 51);
        layout.u64(BASE + 0x100, chained(0x200));
        layout.u64(BASE + 0x220, chained(0x400));
        layout.u64(BASE + 0x400 + 24, chained(0x800));
        layout.u64(BASE + 0x400 + 32, chained(0x600));

        layout.u32(BASE + 0x600, SMALL_METHOD_LIST | 12);
        layout.u32(BASE + 0x604, 1);
        // name -> selector reference at 0x900, imp -> 0xc00
        layout.i32(BASE + 0x608, 0x900 - 0x608);
        layout.i32(BASE + 0x610, 0xc00 - 0x610);
        layout.u64(BASE + 0x900, chained(0x810));

        layout.string(BASE + 0x800, "Gadget");
        layout.string(BASE + 0x810, "spin");

        let methods = layout.memory().methods(BASE + 0x100, 8);
        assert_eq!(methods, vec![(BASE + 0xc00, "-[Gadget spin]".to_string())]);
    }

    #[test]
    fn test_unreadable_classes_are_skipped()
    {
        let mut layout = widget();
        // a bound class pointer, then a class whose data points outside the image
        layout.u64(BASE + 0x108, CHAINED_BIND | 7);
        layout.u64(BASE + 0x110, BASE + 0xf00);
        layout.u64(BASE + 0xf20, 0x9_0000_0000);

        let methods = layout.memory().methods(BASE + 0x100, 0x18);
        assert_eq!(methods.len(), 3);
    }

    #[test]
    fn test_class_without_methods()
    {
        let mut layout = widget();
        layout.u64(BASE + 0x400 + 32, 0);
        layout.u64(BASE + 0x500 + 32, 0);
        assert!(layout.memory().methods(BASE + 0x100, 8).is_empty());
    }
}
