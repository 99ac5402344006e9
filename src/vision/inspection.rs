//! Pin-hole inspection for connector crops
//!
//! Counts the repeating sub-feature of an inspectable detection (pin holes in
//! a header, pads in a check pattern) with a plain image-processing pass:
//! Otsu threshold, connected components, then an area/aspect filter. The
//! result depends only on the crop and nothing else; the input image is never
//! touched.

use image::{GrayImage, Rgb, RgbImage};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use imageproc::region_labelling::{connected_components, Connectivity};
use thiserror::Error;
use tracing::debug;

/// Outline color for counted features on the annotated copy
const MARKER_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
/// Crops smaller than this in either dimension cannot be thresholded sensibly
const MIN_CROP_DIM: u32 = 8;

/// Errors raised by the inspector. The orchestrator converts these into a
/// degraded zero-count report; they never abort a capture cycle.
#[derive(Debug, Error)]
pub enum InspectionError {
    #[error("crop {width}x{height} too small to inspect")]
    CropTooSmall { width: u32, height: u32 },
}

/// Tuning for the component filter
#[derive(Debug, Clone)]
pub struct InspectorConfig {
    /// Smallest feature area, as a fraction of the crop area
    pub min_area_fraction: f32,
    /// Largest feature area, as a fraction of the crop area
    pub max_area_fraction: f32,
    /// Widest accepted bounding-box aspect ratio (long side / short side)
    pub max_aspect_ratio: f32,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            min_area_fraction: 0.0005,
            max_area_fraction: 0.05,
            max_aspect_ratio: 4.0,
        }
    }
}

/// Result of inspecting one crop
#[derive(Debug, Clone)]
pub struct InspectionReport {
    /// Copy of the crop with every counted feature outlined
    pub annotated: RgbImage,
    /// Number of features found; always >= 0, 0 when degraded
    pub count: usize,
    /// Class label of the source detection
    pub label: String,
    /// True when the crop could not be analyzed and the count is a stand-in
    pub degraded: bool,
}

/// Counts pin holes in connector crops.
#[derive(Debug, Clone, Default)]
pub struct PinInspector {
    config: InspectorConfig,
}

impl PinInspector {
    pub fn new(config: InspectorConfig) -> Self {
        Self { config }
    }

    /// Count the class-specific sub-features in `crop`.
    ///
    /// Deterministic: the same crop and label always produce the same count.
    pub fn inspect(&self, crop: &RgbImage, label: &str) -> Result<InspectionReport, InspectionError> {
        let (width, height) = crop.dimensions();
        if width < MIN_CROP_DIM || height < MIN_CROP_DIM {
            return Err(InspectionError::CropTooSmall { width, height });
        }

        let gray = image::imageops::grayscale(crop);
        let binary = binarize_features(&gray);

        let labelled = connected_components(&binary, Connectivity::Eight, image::Luma([0u8]));
        let components = collect_components(&labelled);

        let crop_area = (width * height) as f32;
        let min_area = (crop_area * self.config.min_area_fraction).max(1.0);
        let max_area = crop_area * self.config.max_area_fraction;

        let mut annotated = crop.clone();
        let mut count = 0usize;

        for comp in components {
            let area = comp.area as f32;
            if area < min_area || area > max_area {
                continue;
            }
            if comp.touches_border(width, height) {
                continue;
            }
            let (bw, bh) = comp.extent();
            let aspect = bw.max(bh) as f32 / bw.min(bh).max(1) as f32;
            if aspect > self.config.max_aspect_ratio {
                continue;
            }

            count += 1;
            let rect = Rect::at(comp.min_x as i32, comp.min_y as i32).of_size(bw, bh);
            draw_hollow_rect_mut(&mut annotated, rect, MARKER_COLOR);
        }

        debug!(label, count, width, height, "inspection pass");

        Ok(InspectionReport {
            annotated,
            count,
            label: label.to_string(),
            degraded: false,
        })
    }
}

/// Otsu-threshold the crop and flip polarity so the features of interest
/// (the minority pixels, e.g. dark pin holes on a bright connector body)
/// end up as foreground.
fn binarize_features(gray: &GrayImage) -> GrayImage {
    let level = otsu_level(gray);
    let mut binary = threshold(gray, level, ThresholdType::Binary);

    let total = (binary.width() * binary.height()) as usize;
    let white = binary.pixels().filter(|p| p.0[0] > 0).count();
    if white * 2 > total {
        image::imageops::invert(&mut binary);
    }
    binary
}

/// Bounding box and area of one labelled component
#[derive(Debug, Clone, Copy)]
struct Component {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    area: u32,
}

impl Component {
    fn extent(&self) -> (u32, u32) {
        (self.max_x - self.min_x + 1, self.max_y - self.min_y + 1)
    }

    fn touches_border(&self, width: u32, height: u32) -> bool {
        self.min_x == 0 || self.min_y == 0 || self.max_x + 1 >= width || self.max_y + 1 >= height
    }
}

/// Fold the labelled image into per-component stats (label 0 is background).
fn collect_components(labelled: &image::ImageBuffer<image::Luma<u32>, Vec<u32>>) -> Vec<Component> {
    let mut by_label: std::collections::HashMap<u32, Component> = std::collections::HashMap::new();

    for (x, y, pixel) in labelled.enumerate_pixels() {
        let label = pixel.0[0];
        if label == 0 {
            continue;
        }
        by_label
            .entry(label)
            .and_modify(|c| {
                c.min_x = c.min_x.min(x);
                c.min_y = c.min_y.min(y);
                c.max_x = c.max_x.max(x);
                c.max_y = c.max_y.max(y);
                c.area += 1;
            })
            .or_insert(Component {
                min_x: x,
                min_y: y,
                max_x: x,
                max_y: y,
                area: 1,
            });
    }

    let mut components: Vec<Component> = by_label.into_values().collect();
    // HashMap iteration order is arbitrary; sort for a deterministic pass.
    components.sort_by_key(|c| (c.min_y, c.min_x));
    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// White connector body with `n` dark square "pin holes" in a row.
    fn synthetic_header(n: u32) -> RgbImage {
        let mut img = RgbImage::from_pixel(20 + n * 12, 40, Rgb([230, 230, 230]));
        for i in 0..n {
            let x0 = 10 + i * 12;
            for dx in 0..4 {
                for dy in 0..4 {
                    img.put_pixel(x0 + dx, 18 + dy, Rgb([15, 15, 15]));
                }
            }
        }
        img
    }

    #[test]
    fn test_counts_pin_holes() {
        let inspector = PinInspector::default();
        let crop = synthetic_header(5);
        let report = inspector.inspect(&crop, "CN7").unwrap();
        assert_eq!(report.count, 5);
        assert_eq!(report.label, "CN7");
        assert!(!report.degraded);
    }

    #[test]
    fn test_inspection_is_deterministic() {
        let inspector = PinInspector::default();
        let crop = synthetic_header(3);
        let first = inspector.inspect(&crop, "CN8").unwrap();
        let second = inspector.inspect(&crop, "CN8").unwrap();
        assert_eq!(first.count, second.count);
        assert_eq!(first.annotated.as_raw(), second.annotated.as_raw());
    }

    #[test]
    fn test_input_crop_is_not_mutated() {
        let inspector = PinInspector::default();
        let crop = synthetic_header(4);
        let before = crop.clone();
        inspector.inspect(&crop, "CN9").unwrap();
        assert_eq!(crop.as_raw(), before.as_raw());
    }

    #[test]
    fn test_annotated_copy_is_marked() {
        let inspector = PinInspector::default();
        let crop = synthetic_header(2);
        let report = inspector.inspect(&crop, "6_pins").unwrap();
        assert_ne!(report.annotated.as_raw(), crop.as_raw());
    }

    #[test]
    fn test_light_features_on_dark_body() {
        // Polarity flip: bright pads on a dark crop still count.
        let mut crop = RgbImage::from_pixel(44, 40, Rgb([20, 20, 20]));
        for i in 0..2u32 {
            for dx in 0..4 {
                for dy in 0..4 {
                    crop.put_pixel(10 + i * 14 + dx, 18 + dy, Rgb([240, 240, 240]));
                }
            }
        }
        let inspector = PinInspector::default();
        let report = inspector.inspect(&crop, "Check_pattern_1").unwrap();
        assert_eq!(report.count, 2);
    }

    #[test]
    fn test_border_touching_components_excluded() {
        let mut crop = RgbImage::from_pixel(40, 40, Rgb([230, 230, 230]));
        // One feature in the middle, one glued to the left edge.
        for dy in 0..4 {
            for dx in 0..4 {
                crop.put_pixel(18 + dx, 18 + dy, Rgb([15, 15, 15]));
                crop.put_pixel(dx, 10 + dy, Rgb([15, 15, 15]));
            }
        }
        let inspector = PinInspector::default();
        let report = inspector.inspect(&crop, "CN10").unwrap();
        assert_eq!(report.count, 1);
    }

    #[test]
    fn test_tiny_crop_rejected() {
        let inspector = PinInspector::default();
        let crop = RgbImage::from_pixel(4, 4, Rgb([0, 0, 0]));
        assert!(matches!(
            inspector.inspect(&crop, "CN7"),
            Err(InspectionError::CropTooSmall { .. })
        ));
    }
}
