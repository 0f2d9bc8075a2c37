use image::RgbImage;

/// Values per raw record: `[image_id, label, conf, x_min, y_min, x_max, y_max]`.
pub const RECORD_STRIDE: usize = 7;

/// One detection from the product detector.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionRecord {
    pub image_id: f32,
    /// Index into the label table. Kept as emitted by the network.
    pub label_id: f32,
    pub confidence: f32,
    /// Normalized `[x_min, y_min, x_max, y_max]` in 0..1.
    pub bbox: [f32; 4],
}

impl DetectionRecord {
    pub fn new(label_id: u32, confidence: f32, bbox: [f32; 4]) -> Self {
        Self {
            image_id: 0.0,
            label_id: label_id as f32,
            confidence,
            bbox,
        }
    }

    /// Split a flat `1x1xNx7` output blob into records.
    ///
    /// A trailing partial record is ignored.
    pub fn parse_flat(values: &[f32]) -> Vec<DetectionRecord> {
        values
            .chunks_exact(RECORD_STRIDE)
            .map(|chunk| DetectionRecord {
                image_id: chunk[0],
                label_id: chunk[1],
                confidence: chunk[2],
                bbox: [chunk[3], chunk[4], chunk[5], chunk[6]],
            })
            .collect()
    }
}

/// Detector output for a single frame.
#[derive(Clone, Debug, Default)]
pub struct Detections {
    pub records: Vec<DetectionRecord>,
    /// Image the records were computed on, if the backend loaded one.
    pub image: Option<RgbImage>,
}

impl Detections {
    pub fn new(records: Vec<DetectionRecord>, image: Option<RgbImage>) -> Self {
        Self { records, image }
    }
}
