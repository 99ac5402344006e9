//! Frame annotation: bounding boxes and class labels
//!
//! Draws each detection's box in its class color with a filled label box
//! directly above it. Unknown labels fall back to a fixed gray instead of
//! failing the cycle.

use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::warn;

use super::classes::{ClassRegistry, FALLBACK_COLOR};
use super::Detection;

/// Embedded label font
const FONT_BYTES: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

/// Bounding box stroke width in pixels
const STROKE_WIDTH: i32 = 2;
/// Height of the filled label box above each bounding box
const LABEL_BOX_HEIGHT: i32 = 30;
/// Label font size
const LABEL_FONT_SIZE: f32 = 22.0;
/// Rough per-character width for sizing the label box
const LABEL_CHAR_WIDTH: f32 = 12.0;
/// Horizontal padding inside the label box
const LABEL_PADDING: i32 = 5;
/// Label text color
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

/// Draws detection overlays onto captured frames.
pub struct Annotator {
    font: FontRef<'static>,
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new()
    }
}

impl Annotator {
    pub fn new() -> Self {
        let font = FontRef::try_from_slice(FONT_BYTES).expect("embedded font is valid");
        Self { font }
    }

    /// Draw every detection's box and label onto `frame` in place.
    ///
    /// With no detections the frame is left byte-identical.
    pub fn annotate(
        &self,
        frame: &mut RgbImage,
        detections: &[Detection],
        registry: &ClassRegistry,
    ) {
        for detection in detections {
            let color = registry.color_for(&detection.label).unwrap_or_else(|| {
                warn!(label = %detection.label, "label missing from class registry, using fallback color");
                FALLBACK_COLOR
            });

            self.draw_box(frame, detection, color);
            self.draw_label(frame, detection, color);
        }
    }

    fn draw_box(&self, frame: &mut RgbImage, detection: &Detection, color: Rgb<u8>) {
        let b = detection.bounds;
        for t in 0..STROKE_WIDTH {
            let w = b.width as i32 - 2 * t;
            let h = b.height as i32 - 2 * t;
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(b.x as i32 + t, b.y as i32 + t).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(frame, rect, color);
        }
    }

    fn draw_label(&self, frame: &mut RgbImage, detection: &Detection, color: Rgb<u8>) {
        let (frame_w, _frame_h) = frame.dimensions();
        let b = detection.bounds;

        let text_width = (detection.label.len() as f32 * LABEL_CHAR_WIDTH) as i32;
        let label_x = b.x as i32;
        // Directly above the box; clamped so the label stays on the frame.
        let label_y = (b.y as i32 - LABEL_BOX_HEIGHT).max(0);

        let label_w = (text_width + 2 * LABEL_PADDING).min(frame_w as i32 - label_x);
        if label_w <= 0 {
            return;
        }

        let rect = Rect::at(label_x, label_y).of_size(label_w as u32, LABEL_BOX_HEIGHT as u32);
        draw_filled_rect_mut(frame, rect, color);

        draw_text_mut(
            frame,
            LABEL_TEXT_COLOR,
            label_x + LABEL_PADDING,
            label_y + (LABEL_BOX_HEIGHT - LABEL_FONT_SIZE as i32) / 2,
            PxScale::from(LABEL_FONT_SIZE),
            &self.font,
            &detection.label,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::BoundingBox;

    fn detection(label: &str, x: u32, y: u32, w: u32, h: u32) -> Detection {
        Detection {
            bounds: BoundingBox::new(x, y, w, h),
            class_id: 0,
            label: label.to_string(),
            confidence: 0.9,
        }
    }

    fn registry(names: &[&str]) -> ClassRegistry {
        ClassRegistry::from_names(names.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_no_detections_leaves_frame_unchanged() {
        let annotator = Annotator::new();
        let reg = registry(&["CN7"]);
        let mut frame = RgbImage::from_pixel(64, 64, Rgb([50, 60, 70]));
        let before = frame.clone();

        annotator.annotate(&mut frame, &[], &reg);
        assert_eq!(frame.as_raw(), before.as_raw());
    }

    #[test]
    fn test_box_drawn_in_class_color() {
        let annotator = Annotator::new();
        let reg = registry(&["CN7"]);
        let expected = reg.color_for("CN7").unwrap();

        let mut frame = RgbImage::from_pixel(128, 128, Rgb([0, 0, 0]));
        annotator.annotate(&mut frame, &[detection("CN7", 40, 60, 30, 20)], &reg);

        assert_eq!(*frame.get_pixel(40, 60), expected);
        assert_eq!(*frame.get_pixel(69, 60), expected);
        assert_eq!(*frame.get_pixel(40, 79), expected);
    }

    #[test]
    fn test_unknown_label_uses_fallback_color() {
        let annotator = Annotator::new();
        let reg = registry(&["CN7"]);

        let mut frame = RgbImage::from_pixel(128, 128, Rgb([0, 0, 0]));
        annotator.annotate(&mut frame, &[detection("mystery", 40, 60, 30, 20)], &reg);

        assert_eq!(*frame.get_pixel(40, 60), FALLBACK_COLOR);
    }

    #[test]
    fn test_label_box_clamped_to_frame_top() {
        let annotator = Annotator::new();
        let reg = registry(&["CN7"]);
        let expected = reg.color_for("CN7").unwrap();

        // A box near the top would push the label off-frame; it must clamp.
        let mut frame = RgbImage::from_pixel(128, 128, Rgb([0, 0, 0]));
        annotator.annotate(&mut frame, &[detection("CN7", 10, 5, 30, 20)], &reg);

        assert_eq!(*frame.get_pixel(12, 0), expected);
    }

    #[test]
    fn test_two_detections_two_colors() {
        let annotator = Annotator::new();
        let reg = registry(&["CN7", "ARDUINO"]);
        let cn7 = reg.color_for("CN7").unwrap();
        let arduino = reg.color_for("ARDUINO").unwrap();
        assert_ne!(cn7, arduino);

        let mut frame = RgbImage::from_pixel(256, 256, Rgb([0, 0, 0]));
        annotator.annotate(
            &mut frame,
            &[
                detection("CN7", 20, 60, 40, 30),
                detection("ARDUINO", 120, 160, 60, 40),
            ],
            &reg,
        );

        assert_eq!(*frame.get_pixel(20, 60), cn7);
        assert_eq!(*frame.get_pixel(120, 160), arduino);
    }
}
