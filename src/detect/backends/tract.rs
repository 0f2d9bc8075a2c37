#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::Detector;
use crate::detect::result::{DetectionRecord, Detections};
use crate::frame::FrameRef;

/// Tract-based backend for ONNX product detection models.
///
/// Frames are read from disk, resized to the model input and fed as an RGB
/// `1x3xHxW` tensor with raw 0..255 values. The model is expected to emit a
/// `1x1xNx7` detection blob.
pub struct TractDetector {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
}

impl TractDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
        })
    }

    fn load_frame(&self, frame: &FrameRef) -> Result<RgbImage> {
        let image = image::open(frame.path())
            .with_context(|| format!("failed to read image from {}", frame))?
            .to_rgb8();
        Ok(image::imageops::resize(
            &image,
            self.width,
            self.height,
            FilterType::CatmullRom,
        ))
    }

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| image.get_pixel(x as u32, y as u32)[channel] as f32,
        );
        input.into_tensor()
    }

    fn extract_records(&self, outputs: TVec<TValue>) -> Result<Vec<DetectionRecord>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let values = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let flat: Vec<f32> = values.iter().copied().collect();
        Ok(DetectionRecord::parse_flat(&flat))
    }
}

impl Detector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &FrameRef) -> Result<Detections> {
        let image = self.load_frame(frame)?;
        let input = self.build_input(&image);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let records = self.extract_records(outputs)?;
        Ok(Detections::new(records, Some(image)))
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.width, self.height);
        let input = self.build_input(&blank);
        self.model
            .run(tvec!(input.into()))
            .context("ONNX warm-up run failed")?;
        Ok(())
    }
}
