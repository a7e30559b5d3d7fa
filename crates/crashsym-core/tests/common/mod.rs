//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;

use crashsym_core::error::{CrashsymError, Result};
use crashsym_core::symbols::{ImageDescriptor, ImageLoader, LoadedHeader, SymbolTable};

/// In-memory image headers keyed by report identifier.
#[derive(Default)]
pub struct FakeLoader
{
    images: HashMap<String, FakeImage>,
}

struct FakeImage
{
    text_vmaddr: u64,
    shared_cache_offset: Option<u32>,
    symbols: Vec<(u64, String)>,
    methods: Vec<(u64, String)>,
}

impl FakeLoader
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn with_image(mut self, identifier: &str, text_vmaddr: u64, symbols: &[(u64, &str)]) -> Self
    {
        self.images.insert(identifier.to_string(), FakeImage {
            text_vmaddr,
            shared_cache_offset: None,
            symbols: symbols.iter().map(|(address, name)| (*address, (*name).to_string())).collect(),
            methods: Vec::new(),
        });
        self
    }

    /// Attach Objective-C methods to an image added with [`Self::with_image`].
    pub fn with_methods(mut self, identifier: &str, methods: &[(u64, &str)]) -> Self
    {
        if let Some(image) = self.images.get_mut(identifier) {
            image.methods = methods.iter().map(|(address, name)| (*address, (*name).to_string())).collect();
        }
        self
    }

    pub fn with_cached_image(mut self, identifier: &str, text_vmaddr: u64, dylib_offset: u32, symbols: &[(u64, &str)]) -> Self
    {
        self.images.insert(identifier.to_string(), FakeImage {
            text_vmaddr,
            shared_cache_offset: Some(dylib_offset),
            symbols: symbols.iter().map(|(address, name)| (*address, (*name).to_string())).collect(),
            methods: Vec::new(),
        });
        self
    }
}

impl ImageLoader for FakeLoader
{
    fn load(&self, descriptor: &ImageDescriptor) -> Result<LoadedHeader>
    {
        let image = self
            .images
            .get(&descriptor.identifier)
            .ok_or_else(|| CrashsymError::Io(io::Error::new(io::ErrorKind::NotFound, descriptor.path.clone())))?;

        Ok(LoadedHeader {
            text_vmaddr: image.text_vmaddr,
            executable: image.shared_cache_offset.is_none(),
            encrypted: false,
            shared_cache_offset: image.shared_cache_offset,
            owner: Box::new(SymbolTable::new(image.symbols.clone())),
            methods: image.methods.clone(),
        })
    }
}

/// Build a minimal crash report around the given crashed-thread frame lines.
pub fn report(exception_type: &str, frames: &[&str], images: &[&str]) -> String
{
    let mut text = String::new();
    text.push_str("Process:         MyApp [412]\n");
    text.push_str(&format!("Exception Type:  {exception_type}\n"));
    text.push_str("Crashed Thread:  0\n\n");
    text.push_str("Thread 0 Crashed:\n");
    for frame in frames {
        text.push_str(frame);
        text.push('\n');
    }
    text.push_str("\nBinary Images:\n");
    for image in images {
        text.push_str(image);
        text.push('\n');
    }
    text
}

pub const USER_IMAGE: &str =
    "0x1000 - 0x4fff +MyApp arm64  <0123456789abcdef0123456789abcdef> /var/containers/Bundle/Application/X/MyApp.app/MyApp";
pub const TWEAK_IMAGE: &str =
    "0x8000 - 0x8fff +Tweak arm64  <aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa> /Library/MobileSubstrate/DynamicLibraries/Tweak.dylib";
pub const SYSTEM_IMAGE: &str =
    "0x30000000 - 0x3000ffff libsystem_kernel.dylib arm64  <fedcba9876543210fedcba9876543210> /usr/lib/system/libsystem_kernel.dylib";
