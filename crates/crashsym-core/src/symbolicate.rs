//! # Symbolicate
//!
//! The report-level entry points.
//!
//! A [`Symbolicator`] owns everything that outlives one report: the image
//! loader, external symbol maps, the shared cache local-symbol index, and the
//! blame policy. Each call parses one report, loads its images once, resolves
//! every backtrace frame, and returns the annotated text together with the
//! blame result.
//!
//! ```no_run
//! use crashsym_core::symbolicate::Symbolicator;
//!
//! let report = std::fs::read_to_string("crash.ips").unwrap();
//! let symbolicator = Symbolicator::builder().progress_stepping(100).build();
//! let output = symbolicator
//!     .symbolicate_with_progress(&report, |progress| eprintln!("{progress}"))
//!     .unwrap();
//! println!("{}", output.content);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use tracing::{debug, info};

pub use crate::blame::blame;
use crate::blame::BlamePolicy;
use crate::config::SymbolicatorConfig;
use crate::error::Result;
use crate::report::CrashReport;
use crate::resolver::resolve_frame;
use crate::symbols::{build_images, Fallback, ImageDescriptor, ImageLoader, ImageSet, LocalSymbolIndex, MachoLoader, SymbolMaps};
use crate::types::BacktraceFrame;

/// Frames processed so far, reported every `progress_stepping` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress
{
    pub processed: usize,
    pub total: usize,
}

impl fmt::Display for Progress
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}/{} frames", self.processed, self.total)
    }
}

/// Result of symbolicating one report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbolicated
{
    /// The report with resolved frame lines annotated.
    pub content: String,
    /// Identifiers of the blamed images, most likely first.
    pub blame: Vec<String>,
    pub resolved_frames: usize,
    pub total_frames: usize,
}

/// Symbolication engine shared across reports.
pub struct Symbolicator
{
    loader: Box<dyn ImageLoader>,
    symbol_maps: SymbolMaps,
    local_symbols: Option<Box<dyn LocalSymbolIndex>>,
    policy: BlamePolicy,
    progress_stepping: usize,
}

impl Symbolicator
{
    pub fn builder() -> SymbolicatorBuilder
    {
        SymbolicatorBuilder::default()
    }

    pub fn policy(&self) -> &BlamePolicy
    {
        &self.policy
    }

    /// Symbolicate `content` without progress reporting.
    ///
    /// ## Errors
    ///
    /// Returns an error only if the report cannot be split into sections.
    pub fn symbolicate(&self, content: &str) -> Result<Symbolicated>
    {
        self.symbolicate_with_progress(content, |_| {})
    }

    /// Symbolicate `content`, calling `progress` after every
    /// `progress_stepping` frames.
    ///
    /// ## Errors
    ///
    /// Returns an error only if the report cannot be split into sections.
    pub fn symbolicate_with_progress<F>(&self, content: &str, mut progress: F) -> Result<Symbolicated>
    where
        F: FnMut(Progress),
    {
        let report = CrashReport::parse(content)?;
        let images = build_images(report.images.clone(), self.loader.as_ref(), &self.policy);
        let fallback = self.fallback();

        let total = report.frame_count();
        let mut processed = 0;
        let mut resolved = HashMap::new();
        let mut crashed_frames = Vec::new();
        let crashed_index = report.crashed().map(|thread| thread.index);

        for thread in &report.threads {
            let is_crashed = Some(thread.index) == crashed_index;
            for line in &thread.frames {
                let frame = resolve_frame(line.frame.clone(), &images, &fallback);
                if let Some(info) = &frame.symbol_info {
                    resolved.insert(line.line, info.clone());
                }
                if is_crashed {
                    crashed_frames.push(frame);
                }

                processed += 1;
                if self.progress_stepping > 0 && processed % self.progress_stepping == 0 {
                    progress(Progress { processed, total });
                }
            }
        }

        let exception_type = report.exception_type.as_deref().unwrap_or_default();
        let blamed = blame(&self.policy, exception_type, &images, &crashed_frames);
        info!(
            resolved = resolved.len(),
            total,
            images = images.len(),
            blamed = blamed.len(),
            "symbolicated report"
        );

        Ok(Symbolicated {
            content: report.render(&resolved),
            blame: blamed,
            resolved_frames: resolved.len(),
            total_frames: total,
        })
    }

    /// Blame a report without resolving any symbols.
    ///
    /// ## Errors
    ///
    /// Returns an error only if the report cannot be split into sections.
    pub fn blame_report(&self, content: &str) -> Result<Vec<String>>
    {
        let report = CrashReport::parse(content)?;
        let frames: Vec<BacktraceFrame> = report
            .crashed()
            .map(|thread| thread.frames.iter().map(|line| line.frame.clone()).collect())
            .unwrap_or_default();
        let exception_type = report.exception_type.as_deref().unwrap_or_default();
        Ok(self.blame_images(exception_type, report.images, &frames))
    }

    /// Blame already-parsed image descriptors and crashed-thread frames.
    pub fn blame_images(&self, exception_type: &str, descriptors: Vec<ImageDescriptor>, crashed_frames: &[BacktraceFrame]) -> Vec<String>
    {
        let images = self.load_images(descriptors);
        blame(&self.policy, exception_type, &images, crashed_frames)
    }

    /// Load headers for `descriptors` through this symbolicator's loader.
    pub fn load_images(&self, descriptors: Vec<ImageDescriptor>) -> ImageSet
    {
        build_images(descriptors, self.loader.as_ref(), &self.policy)
    }

    fn fallback(&self) -> Fallback<'_>
    {
        Fallback::new(&self.symbol_maps, self.local_symbols.as_deref())
    }
}

impl fmt::Debug for Symbolicator
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Symbolicator")
            .field("symbol_maps", &self.symbol_maps.len())
            .field("local_symbols", &self.local_symbols.is_some())
            .field("policy", &self.policy)
            .field("progress_stepping", &self.progress_stepping)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Symbolicator`].
#[derive(Default)]
pub struct SymbolicatorBuilder
{
    loader: Option<Box<dyn ImageLoader>>,
    sysroot: Option<PathBuf>,
    shared_cache: Option<PathBuf>,
    symbol_maps: SymbolMaps,
    local_symbols: Option<Box<dyn LocalSymbolIndex>>,
    policy: BlamePolicy,
    progress_stepping: usize,
}

impl SymbolicatorBuilder
{
    /// Start from values read by [`SymbolicatorConfig`].
    pub fn from_config(config: &SymbolicatorConfig) -> Self
    {
        Self {
            sysroot: config.sysroot.clone(),
            shared_cache: config.shared_cache.clone(),
            policy: config.blame.clone(),
            progress_stepping: config.progress_stepping,
            ..Self::default()
        }
    }

    /// Replace the Mach-O loader, e.g. with an in-memory one.
    #[must_use]
    pub fn loader(mut self, loader: impl ImageLoader + 'static) -> Self
    {
        self.loader = Some(Box::new(loader));
        self
    }

    /// Directory device paths are resolved under.
    #[must_use]
    pub fn sysroot(mut self, sysroot: impl Into<PathBuf>) -> Self
    {
        self.sysroot = Some(sysroot.into());
        self
    }

    /// dyld shared cache matching the crashing device.
    #[must_use]
    pub fn shared_cache(mut self, path: impl Into<PathBuf>) -> Self
    {
        self.shared_cache = Some(path.into());
        self
    }

    #[must_use]
    pub fn symbol_maps(mut self, maps: SymbolMaps) -> Self
    {
        self.symbol_maps = maps;
        self
    }

    #[must_use]
    pub fn local_symbols(mut self, index: impl LocalSymbolIndex + 'static) -> Self
    {
        self.local_symbols = Some(Box::new(index));
        self
    }

    #[must_use]
    pub fn policy(mut self, policy: BlamePolicy) -> Self
    {
        self.policy = policy;
        self
    }

    /// Report progress every `stepping` frames; `0` disables reporting.
    #[must_use]
    pub fn progress_stepping(mut self, stepping: usize) -> Self
    {
        self.progress_stepping = stepping;
        self
    }

    pub fn build(self) -> Symbolicator
    {
        let loader = self.loader.unwrap_or_else(|| {
            Box::new(
                MachoLoader::new()
                    .with_sysroot(self.sysroot)
                    .with_shared_cache(self.shared_cache),
            )
        });
        debug!(maps = self.symbol_maps.len(), stepping = self.progress_stepping, "built symbolicator");

        Symbolicator {
            loader,
            symbol_maps: self.symbol_maps,
            local_symbols: self.local_symbols,
            policy: self.policy,
            progress_stepping: self.progress_stepping,
        }
    }
}

/// Symbolicate `content` with the default on-disk loader.
///
/// ## Errors
///
/// Returns an error only if the report cannot be split into sections.
pub fn symbolicate<F>(content: &str, symbol_maps: SymbolMaps, progress_stepping: usize, progress: F) -> Result<Symbolicated>
where
    F: FnMut(Progress),
{
    Symbolicator::builder()
        .symbol_maps(symbol_maps)
        .progress_stepping(progress_stepping)
        .build()
        .symbolicate_with_progress(content, progress)
}
