//! Vision layer
//!
//! Object detection (YOLOv8 via ONNX Runtime), class routing, the pin-hole
//! inspection routine, text recognition and frame annotation.

pub mod annotate;
pub mod classes;
pub mod detector;
pub mod inspection;
pub mod ocr;

pub use annotate::Annotator;
pub use classes::{Capability, ClassRegistry, FALLBACK_COLOR};
pub use detector::{DetectError, YoloDetector};
pub use inspection::{InspectionReport, PinInspector};
pub use ocr::{OcrEngine, OcrError};

use image::RgbImage;

/// Axis-aligned bounding box in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Copy the boxed region out of `image`, clamped to the image bounds.
    pub fn crop_from(&self, image: &RgbImage) -> RgbImage {
        let (img_w, img_h) = image.dimensions();
        let x = self.x.min(img_w.saturating_sub(1));
        let y = self.y.min(img_h.saturating_sub(1));
        let width = self.width.min(img_w - x).max(1);
        let height = self.height.min(img_h - y).max(1);
        image::imageops::crop_imm(image, x, y, width, height).to_image()
    }
}

/// One object found by the detector.
///
/// The per-cycle sequential id lives in [`crate::pipeline::CycleDetection`];
/// the detector itself only reports what the model saw.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bounds: BoundingBox,
    pub class_id: usize,
    pub label: String,
    pub confidence: f32,
}

/// Seam for the object detector so the pipeline can be exercised without an
/// ONNX model on disk.
pub trait Detect {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, DetectError>;
}

/// Seam for the text reader, mirroring [`Detect`].
pub trait ReadText {
    fn read(&mut self, crop: &RgbImage) -> Result<String, OcrError>;
}
