//! PCB Inspector - Camera-based component inspection
//!
//! Streams MJPEG video from an IP camera, detects PCB components with a
//! YOLOv8 model, counts pin holes on connector headers, reads board markings
//! with a text recognition model and shows everything in a desktop window.

mod camera;
mod config;
mod gui;
mod pipeline;
mod vision;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::camera::VideoSource;
use crate::config::AppConfig;
use crate::pipeline::worker::{self, WorkerConfig};
use crate::pipeline::Orchestrator;
use crate::vision::{ClassRegistry, OcrEngine, PinInspector, YoloDetector};

/// PCB Inspector - camera-based component inspection
#[derive(Parser, Debug)]
#[command(name = "pcb-inspector")]
#[command(about = "Detects, inspects and reads PCB components from a camera stream")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "pcb-inspector.toml")]
    config: PathBuf,

    /// Camera stream URL (overrides the configuration file)
    #[arg(long)]
    stream_url: Option<String>,

    /// Detection model path (overrides the configuration file)
    #[arg(long)]
    model: Option<PathBuf>,

    /// Class list path (overrides the configuration file)
    #[arg(long)]
    classes: Option<PathBuf>,

    /// Register the CUDA execution provider
    #[arg(long)]
    gpu: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = load_or_default_config(&args);

    info!(url = %config.stream.url, "pcb inspector starting");

    let registry = Arc::new(
        ClassRegistry::from_file(&config.model.classes_path).with_context(|| {
            format!(
                "failed to load class list from {}",
                config.model.classes_path.display()
            )
        })?,
    );
    info!(classes = registry.len(), "class registry loaded");

    let detector = YoloDetector::load(
        &config.model.detector_path,
        registry.clone(),
        config.model.use_gpu,
        config.model.confidence_threshold,
        config.model.iou_threshold,
    )
    .context("failed to load detection model")?;

    let reader = OcrEngine::load(
        &config.model.recognizer_path,
        &config.model.dictionary_path,
        config.model.use_gpu,
    )
    .context("failed to load text recognition model")?;

    // No camera, no application. Connecting late would leave the window
    // showing nothing with no way to recover.
    let source = VideoSource::open(&config.stream.url)
        .with_context(|| format!("failed to open camera stream at {}", config.stream.url))?;

    let orchestrator = Orchestrator::new(
        detector,
        reader,
        PinInspector::default(),
        registry,
        config.stream.capture_scale_divisor,
    );

    let handle = worker::spawn(
        source,
        orchestrator,
        WorkerConfig {
            live_divisor: config.stream.live_scale_divisor,
            read_retries: config.stream.read_retries,
        },
    );

    gui::run(handle).map_err(|e| anyhow::anyhow!("window error: {e}"))?;

    info!("pcb inspector shutdown complete");
    Ok(())
}

/// Load configuration (writing the defaults on first run), then apply CLI
/// overrides on top.
fn load_or_default_config(args: &Args) -> AppConfig {
    let mut config = config::load_or_init(&args.config);

    if let Some(url) = &args.stream_url {
        config.stream.url = url.clone();
    }
    if let Some(model) = &args.model {
        config.model.detector_path = model.clone();
    }
    if let Some(classes) = &args.classes {
        config.model.classes_path = classes.clone();
    }
    if args.gpu {
        config.model.use_gpu = true;
    }

    config
}
