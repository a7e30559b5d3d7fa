//! # Blame
//!
//! Decide which binary images a crash should be attributed to.
//!
//! Only images the [`BlamePolicy`] marks as blamable (third-party code, as
//! opposed to OS libraries and the shared cache) are ever named. The crashed
//! thread is walked from the innermost frame outwards:
//!
//! - normally the first blamable image found is the whole answer;
//! - for exception types listed in [`BlamePolicy::widening_exceptions`]
//!   (memory corruption style faults, where the faulting frame says little
//!   about who corrupted the state) every blamable image on the crashed
//!   thread is returned, shallowest first.

use std::collections::HashSet;

use tracing::debug;

use crate::symbols::ImageSet;
use crate::types::BacktraceFrame;

/// Path prefixes of OS-provided code.
const SYSTEM_PREFIXES: &[&str] = &[
    "/System/",
    "/usr/lib/",
    "/usr/libexec/",
    "/bin/",
    "/sbin/",
    "/Developer/",
];

/// Exception types that widen blame to every blamable image on the crashed thread.
const WIDENING_EXCEPTIONS: &[&str] = &["EXC_BAD_ACCESS", "SIGSEGV", "SIGBUS", "EXC_BAD_INSTRUCTION", "SIGILL"];

/// Configurable blame tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlamePolicy
{
    /// Images whose path starts with one of these are never blamed.
    pub system_prefixes: Vec<String>,
    /// Case-insensitive substrings of the exception type that widen blame.
    pub widening_exceptions: Vec<String>,
}

impl Default for BlamePolicy
{
    fn default() -> Self
    {
        Self {
            system_prefixes: SYSTEM_PREFIXES.iter().map(|s| (*s).to_string()).collect(),
            widening_exceptions: WIDENING_EXCEPTIONS.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl BlamePolicy
{
    /// Whether an image at `path` may be named as the crash cause.
    pub fn is_blamable(&self, path: &str, in_shared_cache: bool) -> bool
    {
        !in_shared_cache && !self.system_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Whether `exception_type` widens blame beyond the first blamable frame.
    pub fn widens(&self, exception_type: &str) -> bool
    {
        let exception_type = exception_type.to_ascii_uppercase();
        self.widening_exceptions
            .iter()
            .any(|pattern| exception_type.contains(&pattern.to_ascii_uppercase()))
    }
}

/// Identifiers of the images blamed for a crash, most likely first.
///
/// `crashed_frames` are the frames of the crashed thread; their order does not
/// matter, they are walked by ascending depth.
pub fn blame(policy: &BlamePolicy, exception_type: &str, images: &ImageSet, crashed_frames: &[BacktraceFrame]) -> Vec<String>
{
    let widen = policy.widens(exception_type);
    let mut frames: Vec<&BacktraceFrame> = crashed_frames.iter().collect();
    frames.sort_by_key(|frame| frame.depth);

    let mut seen = HashSet::new();
    let mut blamed = Vec::new();
    for frame in frames {
        let Some(image) = images.image_for_address(frame.address) else {
            continue;
        };
        if !image.is_blamable() || !seen.insert(image.identifier()) {
            continue;
        }

        debug!(identifier = image.identifier(), depth = frame.depth, "blamable frame");
        blamed.push(image.identifier().to_string());
        if !widen {
            break;
        }
    }

    blamed
}
