use anyhow::Result;

use crate::detect::result::Detections;
use crate::frame::FrameRef;

/// Product detector adapter.
///
/// The forward pass itself is a black box: given a frame it returns the raw
/// detection records and, when the backend loaded pixels, the image those
/// records refer to (after any resize), so overlays line up with the boxes.
///
/// An `Err` means the frame could not be analysed (unreadable file, failed
/// forward pass). Callers treat that as zero detections for the frame.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &FrameRef) -> Result<Detections>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
