//! Application configuration
//!
//! Startup settings (stream address, model artifacts, inference options)
//! stored in TOML format, with CLI overrides applied on top.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Camera stream settings
    pub stream: StreamConfig,
    /// Model artifact and inference settings
    pub model: ModelConfig,
}

/// Camera stream settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// MJPEG-over-HTTP stream address
    pub url: String,
    /// Live frames are shrunk by this divisor for display
    pub live_scale_divisor: u32,
    /// Captured frames are shrunk by this divisor for display
    pub capture_scale_divisor: u32,
    /// Transient read faults tolerated before the stream is declared dead
    pub read_retries: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: "http://192.168.8.101:8080/video".to_string(),
            live_scale_divisor: 8,
            capture_scale_divisor: 3,
            read_retries: 3,
        }
    }
}

/// Model artifact and inference settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// YOLOv8 detection model (ONNX export)
    pub detector_path: PathBuf,
    /// Ordered class-name list, one per line
    pub classes_path: PathBuf,
    /// Text recognition model (ONNX export)
    pub recognizer_path: PathBuf,
    /// Character dictionary for the recognition model
    pub dictionary_path: PathBuf,
    /// Register the CUDA execution provider
    pub use_gpu: bool,
    /// Minimum detection confidence
    pub confidence_threshold: f32,
    /// IoU threshold for NMS
    pub iou_threshold: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            detector_path: PathBuf::from("models/yolov8_pcb.onnx"),
            classes_path: PathBuf::from("models/pcb_classes.txt"),
            recognizer_path: PathBuf::from("models/rec.onnx"),
            dictionary_path: PathBuf::from("models/dict.txt"),
            use_gpu: false,
            confidence_threshold: 0.45,
            iou_threshold: 0.50,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Load configuration from `path`, or write the defaults there for the next
/// run when the file does not exist yet. A broken file is left untouched and
/// the defaults are used for this run.
pub fn load_or_init(path: &Path) -> AppConfig {
    if path.exists() {
        match load_config(path) {
            Ok(config) => {
                info!(path = %path.display(), "loaded configuration");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "bad configuration file, using defaults");
                AppConfig::default()
            }
        }
    } else {
        let config = AppConfig::default();
        match save_config(&config, path) {
            Ok(()) => info!(path = %path.display(), "wrote default configuration"),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not write default configuration")
            }
        }
        config
    }
}
