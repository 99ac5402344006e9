//! YOLOv8 PCB detection via ONNX Runtime
//!
//! The model is consumed opaquely: fixed 640x640 square input, output tensor
//! `[1, 4 + num_classes, anchors]` decoded with a confidence threshold and
//! greedy NMS. Whatever survives decoding is trusted as final.

use std::path::Path;
use std::sync::Arc;

use image::RgbImage;
use ort::execution_providers as ep;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use thiserror::Error;
use tracing::{debug, info};

use super::classes::ClassRegistry;
use super::{BoundingBox, Detect, Detection};

/// Model input resolution (square)
const INPUT_SIZE: u32 = 640;
/// Name of the image input in YOLOv8 ONNX exports
const INPUT_NAME: &str = "images";
/// Name of the prediction output in YOLOv8 ONNX exports
const OUTPUT_NAME: &str = "output0";

/// Errors raised by the detector
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("failed to load detection model {path}")]
    ModelLoad {
        path: String,
        #[source]
        source: ort::Error,
    },
    #[error("inference failed")]
    Inference(#[from] ort::Error),
    #[error("model output size {actual} is not a multiple of {attributes} attributes")]
    OutputShape { actual: usize, attributes: usize },
}

/// Wraps the YOLOv8 ONNX session and its decode parameters.
pub struct YoloDetector {
    session: Session,
    registry: Arc<ClassRegistry>,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl YoloDetector {
    /// Load the detection model. `use_gpu` registers the CUDA execution
    /// provider; ONNX Runtime falls back to CPU when it is unavailable.
    pub fn load(
        model_path: &Path,
        registry: Arc<ClassRegistry>,
        use_gpu: bool,
        confidence_threshold: f32,
        iou_threshold: f32,
    ) -> Result<Self, DetectError> {
        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?;

        if use_gpu {
            builder =
                builder.with_execution_providers([ep::CUDAExecutionProvider::default().build()])?;
        }

        let session = builder
            .commit_from_file(model_path)
            .map_err(|source| DetectError::ModelLoad {
                path: model_path.display().to_string(),
                source,
            })?;

        info!(
            model = %model_path.display(),
            classes = registry.len(),
            use_gpu,
            "loaded detection model"
        );

        Ok(Self {
            session,
            registry,
            confidence_threshold,
            iou_threshold,
        })
    }
}

impl Detect for YoloDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, DetectError> {
        let (frame_w, frame_h) = frame.dimensions();

        // Pad to square (top-left aligned) so a single scale factor maps the
        // model's 640-space back to frame coordinates.
        let side = frame_w.max(frame_h);
        let squared = pad_to_square(frame, side);
        let resized = image::imageops::resize(
            &squared,
            INPUT_SIZE,
            INPUT_SIZE,
            image::imageops::FilterType::Triangle,
        );

        let input = image_to_tensor(&resized)?;
        let outputs = self.session.run(ort::inputs![INPUT_NAME => input])?;
        let (_shape, data) = outputs[OUTPUT_NAME].try_extract_tensor::<f32>()?;

        let scale = side as f32 / INPUT_SIZE as f32;
        let candidates = decode_predictions(
            data,
            self.registry.len(),
            scale,
            frame_w,
            frame_h,
            self.confidence_threshold,
        )?;
        let kept = nms(candidates, self.iou_threshold);

        debug!(detections = kept.len(), frame_w, frame_h, "detector pass");

        Ok(kept
            .into_iter()
            .map(|c| Detection {
                bounds: c.to_bounding_box(),
                label: self
                    .registry
                    .label_of(c.class_id)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("class_{}", c.class_id)),
                class_id: c.class_id,
                confidence: c.confidence,
            })
            .collect())
    }
}

/// Decoded box candidate, still in f32 frame coordinates
#[derive(Debug, Clone, Copy)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    class_id: usize,
    confidence: f32,
}

impl Candidate {
    fn to_bounding_box(self) -> BoundingBox {
        BoundingBox::new(
            self.x1 as u32,
            self.y1 as u32,
            (self.x2 - self.x1).max(1.0) as u32,
            (self.y2 - self.y1).max(1.0) as u32,
        )
    }

    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Candidate) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        inter / (self.area() + other.area() - inter)
    }
}

/// Copy `image` into the top-left corner of a black square canvas.
fn pad_to_square(image: &RgbImage, side: u32) -> RgbImage {
    if image.width() == side && image.height() == side {
        return image.clone();
    }
    let mut canvas = RgbImage::new(side, side);
    image::imageops::replace(&mut canvas, image, 0, 0);
    canvas
}

/// Convert an RGB image to a `[1, 3, H, W]` f32 tensor normalised to [0, 1].
fn image_to_tensor(image: &RgbImage) -> Result<ort::value::DynValue, ort::Error> {
    let (w, h) = image.dimensions();
    let plane = (w * h) as usize;
    let raw = image.as_raw();

    let mut data = vec![0f32; 3 * plane];
    for idx in 0..plane {
        data[idx] = raw[idx * 3] as f32 / 255.0;
        data[plane + idx] = raw[idx * 3 + 1] as f32 / 255.0;
        data[2 * plane + idx] = raw[idx * 3 + 2] as f32 / 255.0;
    }

    let shape = [1usize, 3, h as usize, w as usize];
    Ok(Tensor::from_array((shape, data.into_boxed_slice()))?.into_dyn())
}

/// Decode the raw YOLOv8 output into thresholded candidates.
///
/// Layout is `[4 + num_classes, anchors]` stored row-major: the first four
/// rows are (cx, cy, w, h) in 640-space, the rest are per-class scores.
fn decode_predictions(
    data: &[f32],
    class_count: usize,
    scale: f32,
    frame_w: u32,
    frame_h: u32,
    confidence_threshold: f32,
) -> Result<Vec<Candidate>, DetectError> {
    let attributes = 4 + class_count;
    if attributes == 4 || data.len() % attributes != 0 {
        return Err(DetectError::OutputShape {
            actual: data.len(),
            attributes,
        });
    }
    let anchors = data.len() / attributes;

    let mut candidates = Vec::new();
    for i in 0..anchors {
        let mut best_class = 0usize;
        let mut best_score = 0f32;
        for c in 0..class_count {
            let score = data[(4 + c) * anchors + i];
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }
        if best_score < confidence_threshold {
            continue;
        }

        let cx = data[i];
        let cy = data[anchors + i];
        let w = data[2 * anchors + i];
        let h = data[3 * anchors + i];

        candidates.push(Candidate {
            x1: ((cx - w / 2.0) * scale).clamp(0.0, frame_w as f32),
            y1: ((cy - h / 2.0) * scale).clamp(0.0, frame_h as f32),
            x2: ((cx + w / 2.0) * scale).clamp(0.0, frame_w as f32),
            y2: ((cy + h / 2.0) * scale).clamp(0.0, frame_h as f32),
            class_id: best_class,
            confidence: best_score,
        });
    }

    Ok(candidates)
}

/// Greedy class-aware NMS: keep the highest-confidence box, suppress
/// same-class overlaps above the IoU threshold.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && k.iou(&candidate) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build an output buffer for `anchors` anchors and 2 classes, all zeros.
    fn empty_output(anchors: usize) -> Vec<f32> {
        vec![0f32; (4 + 2) * anchors]
    }

    fn set_anchor(
        data: &mut [f32],
        anchors: usize,
        i: usize,
        bbox: [f32; 4],
        scores: [f32; 2],
    ) {
        for (row, v) in bbox.iter().enumerate() {
            data[row * anchors + i] = *v;
        }
        data[4 * anchors + i] = scores[0];
        data[5 * anchors + i] = scores[1];
    }

    #[test]
    fn test_decode_filters_by_confidence() {
        let anchors = 3;
        let mut data = empty_output(anchors);
        set_anchor(&mut data, anchors, 0, [320.0, 320.0, 100.0, 80.0], [0.9, 0.1]);
        set_anchor(&mut data, anchors, 1, [100.0, 100.0, 50.0, 50.0], [0.2, 0.3]);

        let out = decode_predictions(&data, 2, 1.0, 640, 640, 0.5).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class_id, 0);
        assert!((out[0].confidence - 0.9).abs() < 1e-6);
        assert!((out[0].x1 - 270.0).abs() < 1e-3);
        assert!((out[0].y1 - 280.0).abs() < 1e-3);
    }

    #[test]
    fn test_decode_scales_back_to_frame_coordinates() {
        let anchors = 1;
        let mut data = empty_output(anchors);
        set_anchor(&mut data, anchors, 0, [320.0, 320.0, 320.0, 320.0], [0.8, 0.0]);

        // A 1280x960 frame is padded to 1280x1280, so scale = 2.
        let out = decode_predictions(&data, 2, 2.0, 1280, 960, 0.5).unwrap();
        assert_eq!(out.len(), 1);
        assert!((out[0].x1 - 320.0).abs() < 1e-3);
        assert!((out[0].x2 - 960.0).abs() < 1e-3);
        // y is clamped to the real frame height, not the padded square
        assert!((out[0].y2 - 960.0).abs() < 1e-3);
    }

    #[test]
    fn test_decode_rejects_bad_output_size() {
        let data = vec![0f32; 13]; // not a multiple of 6
        assert!(matches!(
            decode_predictions(&data, 2, 1.0, 640, 640, 0.5),
            Err(DetectError::OutputShape { .. })
        ));
    }

    #[test]
    fn test_nms_suppresses_same_class_overlap() {
        let a = Candidate {
            x1: 0.0,
            y1: 0.0,
            x2: 100.0,
            y2: 100.0,
            class_id: 0,
            confidence: 0.9,
        };
        let b = Candidate {
            x1: 10.0,
            y1: 10.0,
            x2: 110.0,
            y2: 110.0,
            class_id: 0,
            confidence: 0.7,
        };
        let c = Candidate {
            x1: 10.0,
            y1: 10.0,
            x2: 110.0,
            y2: 110.0,
            class_id: 1,
            confidence: 0.6,
        };

        let kept = nms(vec![a, b, c], 0.5);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].class_id, 0);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        // Different class survives the same overlap
        assert_eq!(kept[1].class_id, 1);
    }

    #[test]
    fn test_pad_to_square_keeps_pixels_top_left() {
        let img = RgbImage::from_pixel(4, 2, image::Rgb([9, 9, 9]));
        let squared = pad_to_square(&img, 4);
        assert_eq!(squared.dimensions(), (4, 4));
        assert_eq!(squared.get_pixel(3, 1).0, [9, 9, 9]);
        assert_eq!(squared.get_pixel(3, 3).0, [0, 0, 0]);
    }
}
