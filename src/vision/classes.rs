//! Class registry: label vocabulary, display colors and routing capability
//!
//! The class list file defines the detector's label vocabulary, one name per
//! line, in the order the model was trained with. Each class is tagged once at
//! load time with what the pipeline should do with it, so the capture cycle
//! never branches on string literals.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use image::Rgb;
use tracing::info;

/// Connector / pin-header classes routed to the pin inspector
pub const INSPECTABLE_CLASSES: &[&str] = &[
    "40_pins",
    "6_pins",
    "Check_pattern_1",
    "Check_pattern_2",
    "Check_pattern_3",
    "Check_pattern_4",
    "CN7",
    "CN8",
    "CN9",
    "CN10",
];

/// Printed board-model classes routed to the text reader
pub const OCR_CLASSES: &[&str] = &[
    "ARDUINO",
    "UNO_white",
    "NVIDIA.",
    "Arduino_UNO_model",
    "RaspberryPi_model",
    "STM32_model",
];

/// Color used when a detection carries a label missing from the registry
pub const FALLBACK_COLOR: Rgb<u8> = Rgb([128, 128, 128]);

/// Fixed palette assigned positionally to the first classes in the list
const PALETTE: [[u8; 3]; 12] = [
    [230, 57, 70],
    [46, 196, 182],
    [255, 183, 3],
    [76, 149, 108],
    [69, 123, 157],
    [214, 122, 177],
    [244, 162, 97],
    [38, 70, 83],
    [142, 202, 230],
    [188, 108, 37],
    [106, 76, 147],
    [132, 169, 140],
];

/// What the capture cycle does with a detection of a given class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Crop is handed to the pin inspector
    Inspect,
    /// Crop is handed to the text reader
    ReadText,
    /// Bounding box and label only
    AnnotateOnly,
}

/// Per-class metadata resolved once at startup
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    pub color: Rgb<u8>,
    pub capability: Capability,
}

/// Closed registry of every class the detector can produce
#[derive(Debug, Clone)]
pub struct ClassRegistry {
    classes: Vec<ClassInfo>,
    by_name: HashMap<String, usize>,
}

impl ClassRegistry {
    /// Load the registry from a class list file (one name per line; blank
    /// lines and `#` comments are skipped).
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read class list {:?}", path))?;

        let names: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect();

        if names.is_empty() {
            anyhow::bail!("class list {:?} contains no class names", path);
        }

        let registry = Self::from_names(names);
        info!(
            classes = registry.len(),
            inspectable = registry
                .classes
                .iter()
                .filter(|c| c.capability == Capability::Inspect)
                .count(),
            ocr_targets = registry
                .classes
                .iter()
                .filter(|c| c.capability == Capability::ReadText)
                .count(),
            "loaded class registry"
        );
        Ok(registry)
    }

    /// Build the registry from an ordered list of class names.
    pub fn from_names(names: Vec<String>) -> Self {
        let mut classes = Vec::with_capacity(names.len());
        let mut by_name = HashMap::with_capacity(names.len());

        for (index, name) in names.into_iter().enumerate() {
            by_name.entry(name.clone()).or_insert(index);
            classes.push(ClassInfo {
                capability: capability_of(&name),
                color: color_for_index(index),
                name,
            });
        }

        Self { classes, by_name }
    }

    /// Number of classes in the vocabulary
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Look up class metadata by label
    pub fn get(&self, label: &str) -> Option<&ClassInfo> {
        self.by_name.get(label).map(|&i| &self.classes[i])
    }

    /// Look up class metadata by model class id
    pub fn by_id(&self, class_id: usize) -> Option<&ClassInfo> {
        self.classes.get(class_id)
    }

    /// Label for a model class id
    pub fn label_of(&self, class_id: usize) -> Option<&str> {
        self.classes.get(class_id).map(|c| c.name.as_str())
    }

    /// Display color for a label; `None` for labels outside the vocabulary.
    /// Callers fall back to [`FALLBACK_COLOR`] rather than crashing.
    pub fn color_for(&self, label: &str) -> Option<Rgb<u8>> {
        self.get(label).map(|c| c.color)
    }

    /// Routing capability for a label; unknown labels are annotate-only.
    pub fn capability_for(&self, label: &str) -> Capability {
        self.get(label)
            .map(|c| c.capability)
            .unwrap_or(Capability::AnnotateOnly)
    }
}

/// Decide the routing capability for a class name.
///
/// The two allow-lists are disjoint; `test_allow_lists_disjoint` keeps it
/// that way.
fn capability_of(name: &str) -> Capability {
    if INSPECTABLE_CLASSES.contains(&name) {
        Capability::Inspect
    } else if OCR_CLASSES.contains(&name) {
        Capability::ReadText
    } else {
        Capability::AnnotateOnly
    }
}

/// Positional palette color, with a deterministic golden-ratio hue walk once
/// the palette is exhausted.
fn color_for_index(index: usize) -> Rgb<u8> {
    if let Some(rgb) = PALETTE.get(index) {
        return Rgb(*rgb);
    }

    let step = (index - PALETTE.len()) as f32;
    let hue = (step * 0.618_034).fract() * 360.0;
    hsv_to_rgb(hue, 0.65, 0.90)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match h as u32 {
        0..=59 => (c, x, 0.0),
        60..=119 => (x, c, 0.0),
        120..=179 => (0.0, c, x),
        180..=239 => (0.0, x, c),
        240..=299 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    Rgb([
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn registry(names: &[&str]) -> ClassRegistry {
        ClassRegistry::from_names(names.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_allow_lists_disjoint() {
        for name in INSPECTABLE_CLASSES {
            assert!(
                !OCR_CLASSES.contains(name),
                "{} appears in both allow-lists",
                name
            );
        }
    }

    #[test]
    fn test_positional_palette_assignment() {
        let reg = registry(&["CN7", "ARDUINO", "capacitor"]);
        assert_eq!(reg.color_for("CN7"), Some(Rgb(PALETTE[0])));
        assert_eq!(reg.color_for("ARDUINO"), Some(Rgb(PALETTE[1])));
        assert_eq!(reg.color_for("capacitor"), Some(Rgb(PALETTE[2])));
    }

    #[test]
    fn test_generated_colors_beyond_palette_are_deterministic() {
        let names: Vec<String> = (0..20).map(|i| format!("class_{}", i)).collect();
        let a = ClassRegistry::from_names(names.clone());
        let b = ClassRegistry::from_names(names);

        for i in PALETTE.len()..20 {
            let label = format!("class_{}", i);
            assert_eq!(a.color_for(&label), b.color_for(&label));
            assert!(a.color_for(&label).is_some());
        }
    }

    #[test]
    fn test_unknown_label_has_no_color() {
        let reg = registry(&["CN7"]);
        assert_eq!(reg.color_for("not_a_class"), None);
        assert_eq!(
            reg.capability_for("not_a_class"),
            Capability::AnnotateOnly
        );
    }

    #[test]
    fn test_capability_tagging() {
        let reg = registry(&["CN7", "ARDUINO", "capacitor", "40_pins", "STM32_model"]);
        assert_eq!(reg.capability_for("CN7"), Capability::Inspect);
        assert_eq!(reg.capability_for("40_pins"), Capability::Inspect);
        assert_eq!(reg.capability_for("ARDUINO"), Capability::ReadText);
        assert_eq!(reg.capability_for("STM32_model"), Capability::ReadText);
        assert_eq!(reg.capability_for("capacitor"), Capability::AnnotateOnly);
    }

    #[test]
    fn test_from_file_skips_comments_and_blanks() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# PCB classes").unwrap();
        writeln!(file, "CN7").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  ARDUINO  ").unwrap();

        let reg = ClassRegistry::from_file(file.path()).unwrap();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.label_of(0), Some("CN7"));
        assert_eq!(reg.label_of(1), Some("ARDUINO"));
    }

    #[test]
    fn test_from_file_rejects_empty_list() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# nothing here").unwrap();
        assert!(ClassRegistry::from_file(file.path()).is_err());
    }

    #[test]
    fn test_lookup_by_id() {
        let reg = registry(&["CN7", "ARDUINO"]);
        assert_eq!(reg.by_id(1).unwrap().name, "ARDUINO");
        assert!(reg.by_id(2).is_none());
    }
}
