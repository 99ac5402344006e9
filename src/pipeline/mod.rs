//! Capture pipeline
//!
//! One capture intent runs exactly one detect → route → inspect/read →
//! annotate sequence and produces a [`CaptureReport`]. Failures local to a
//! single detection are recorded as notes and never abort the rest of the
//! cycle; only video source faults are fatal, and those live in
//! [`worker`].

pub mod worker;

use std::sync::Arc;

use image::RgbImage;
use tracing::{info, warn};

use crate::camera::Frame;
use crate::vision::{
    Annotator, Capability, ClassRegistry, Detect, Detection, InspectionReport, PinInspector,
    ReadText,
};

/// OCR display crops larger than this in either dimension are halved
const OCR_DISPLAY_MAX_DIM: u32 = 100;
/// Text shown when the reader fails on a crop
const UNREADABLE_PLACEHOLDER: &str = "<unreadable>";

/// A detection tagged with its per-cycle sequential id.
///
/// Ids are assigned in encounter order, contiguous from 0, so two instances
/// of the same class within one frame stay distinguishable.
#[derive(Debug, Clone)]
pub struct CycleDetection {
    pub id: usize,
    pub detection: Detection,
}

/// One OCR readout: the recognized text plus a (possibly downscaled) crop
/// for display. Recognition always ran on the full-resolution crop.
#[derive(Debug, Clone)]
pub struct OcrReadout {
    pub image: RgbImage,
    pub text: String,
    pub label: String,
}

/// Everything one capture cycle produced. Owned values only; nothing in the
/// report refers back to the cycle that made it.
#[derive(Debug)]
pub struct CaptureReport {
    /// Full-resolution annotated frame
    pub annotated: RgbImage,
    /// Annotated frame scaled down for display
    pub display: RgbImage,
    pub detections: Vec<CycleDetection>,
    pub inspections: Vec<InspectionReport>,
    pub ocr_reads: Vec<OcrReadout>,
    /// Per-detection analysis failures, surfaced in the GUI status area
    pub notes: Vec<String>,
}

/// Runs the capture cycle. Generic over the detector and text reader so the
/// routing logic is testable without models on disk.
pub struct Orchestrator<D: Detect, R: ReadText> {
    detector: D,
    reader: R,
    inspector: PinInspector,
    registry: Arc<ClassRegistry>,
    annotator: Annotator,
    capture_divisor: u32,
}

impl<D: Detect, R: ReadText> Orchestrator<D, R> {
    pub fn new(
        detector: D,
        reader: R,
        inspector: PinInspector,
        registry: Arc<ClassRegistry>,
        capture_divisor: u32,
    ) -> Self {
        Self {
            detector,
            reader,
            inspector,
            registry,
            annotator: Annotator::new(),
            capture_divisor: capture_divisor.max(1),
        }
    }

    /// Run one full capture cycle over `frame`.
    pub fn run_capture(&mut self, frame: Frame) -> CaptureReport {
        let (frame_w, frame_h) = frame.dimensions();
        let mut image = frame.image;
        let mut notes = Vec::new();

        let raw = match self.detector.detect(&image) {
            Ok(detections) => detections,
            Err(e) => {
                warn!(error = %e, "detector failed, reporting empty cycle");
                notes.push(format!("detection failed: {e}"));
                Vec::new()
            }
        };

        let mut inspections = Vec::new();
        let mut ocr_reads = Vec::new();

        for (id, detection) in raw.iter().enumerate() {
            // Crops come from the clean frame; annotation happens last.
            let crop = detection.bounds.crop_from(&image);

            match self.registry.capability_for(&detection.label) {
                Capability::Inspect => {
                    match self.inspector.inspect(&crop, &detection.label) {
                        Ok(report) => inspections.push(report),
                        Err(e) => {
                            warn!(id, label = %detection.label, error = %e, "inspection degraded");
                            notes.push(format!("inspection #{id} ({}): {e}", detection.label));
                            inspections.push(InspectionReport {
                                annotated: crop,
                                count: 0,
                                label: detection.label.clone(),
                                degraded: true,
                            });
                        }
                    }
                }
                Capability::ReadText => {
                    // Recognition first, on the full-resolution crop; the
                    // display copy is shrunk afterwards.
                    let text = match self.reader.read(&crop) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(id, label = %detection.label, error = %e, "ocr failed, using placeholder");
                            notes.push(format!("ocr #{id} ({}): {e}", detection.label));
                            UNREADABLE_PLACEHOLDER.to_string()
                        }
                    };
                    ocr_reads.push(OcrReadout {
                        image: shrink_for_display(crop),
                        text,
                        label: detection.label.clone(),
                    });
                }
                Capability::AnnotateOnly => {}
            }
        }

        self.annotator.annotate(&mut image, &raw, &self.registry);

        let display = downscale(&image, self.capture_divisor);
        let detections: Vec<CycleDetection> = raw
            .into_iter()
            .enumerate()
            .map(|(id, detection)| CycleDetection { id, detection })
            .collect();

        info!(
            frame = frame.index,
            frame_w,
            frame_h,
            detections = detections.len(),
            inspections = inspections.len(),
            ocr_reads = ocr_reads.len(),
            notes = notes.len(),
            "capture cycle complete"
        );

        CaptureReport {
            annotated: image,
            display,
            detections,
            inspections,
            ocr_reads,
            notes,
        }
    }
}

/// Halve OCR crops that are too large for the side panel.
fn shrink_for_display(crop: RgbImage) -> RgbImage {
    let (w, h) = crop.dimensions();
    if w <= OCR_DISPLAY_MAX_DIM && h <= OCR_DISPLAY_MAX_DIM {
        return crop;
    }
    image::imageops::resize(
        &crop,
        (w / 2).max(1),
        (h / 2).max(1),
        image::imageops::FilterType::Triangle,
    )
}

/// Integer-divisor downscale for display copies.
pub(crate) fn downscale(image: &RgbImage, divisor: u32) -> RgbImage {
    let divisor = divisor.max(1);
    if divisor == 1 {
        return image.clone();
    }
    let (w, h) = image.dimensions();
    image::imageops::resize(
        image,
        (w / divisor).max(1),
        (h / divisor).max(1),
        image::imageops::FilterType::Triangle,
    )
}
