use anyhow::{anyhow, Result};
use image::RgbImage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::detect::backend::Detector;
use crate::detect::result::{DetectionRecord, Detections};
use crate::frame::FrameRef;

/// Frames passed to a `StubDetector`, in call order.
pub type DetectionHistory = Arc<Mutex<Vec<FrameRef>>>;

/// Stub backend for testing. Returns scripted records per frame.
///
/// Frames without a script fail detection, the same way an unreadable image
/// fails in a real backend.
pub struct StubDetector {
    scripts: HashMap<FrameRef, Vec<DetectionRecord>>,
    image_size: Option<(u32, u32)>,
    history: DetectionHistory,
}

impl StubDetector {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            image_size: None,
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Script the records returned for `frame`.
    pub fn with_frame(mut self, frame: FrameRef, records: Vec<DetectionRecord>) -> Self {
        self.scripts.insert(frame, records);
        self
    }

    /// Return a blank image of this size alongside every scripted result.
    pub fn with_image(mut self, width: u32, height: u32) -> Self {
        self.image_size = Some((width, height));
        self
    }

    /// Shared handle on the frames detected so far.
    pub fn history(&self) -> DetectionHistory {
        self.history.clone()
    }
}

impl Default for StubDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &FrameRef) -> Result<Detections> {
        if let Ok(mut history) = self.history.lock() {
            history.push(frame.clone());
        }
        let records = self
            .scripts
            .get(frame)
            .cloned()
            .ok_or_else(|| anyhow!("failed to read image from {}", frame))?;
        let image = self
            .image_size
            .map(|(width, height)| RgbImage::new(width, height));
        Ok(Detections::new(records, image))
    }
}
