//! Backtrace frame resolution.
//!
//! A frame is resolved by first locating its image by absolute address, then
//! asking the image's owner, then the [`Fallback`] chain. Resolution never
//! fails: a frame nobody can name is returned with `symbol_info == None`.

use tracing::{debug, trace};

use crate::symbols::{Fallback, ImageSet};
use crate::types::BacktraceFrame;

/// Resolve one frame against the report's images.
pub fn resolve_frame(frame: BacktraceFrame, images: &ImageSet, fallback: &Fallback<'_>) -> BacktraceFrame
{
    let Some(image) = images.image_for_address(frame.address) else {
        trace!(address = frame.address, "address outside every image");
        return frame;
    };

    if frame.image_address != 0 && frame.image_address != image.load_address() {
        debug!(
            identifier = image.identifier(),
            printed = frame.image_address,
            load_address = image.load_address(),
            "frame image address disagrees with binary images"
        );
    }

    let symbol_info = image
        .resolve(frame.address)
        .or_else(|| fallback.resolve(image, frame.address));

    BacktraceFrame { symbol_info, ..frame }
}

/// Resolve every frame of a backtrace in place.
pub fn resolve_frames(frames: &mut [BacktraceFrame], images: &ImageSet, fallback: &Fallback<'_>)
{
    for frame in frames {
        *frame = resolve_frame(frame.clone(), images, fallback);
    }
}
