//! Text recognition for printed board labels
//!
//! Thin wrapper over a CRNN-style recognition model (PaddleOCR ONNX export)
//! with greedy CTC decoding. Recognition always runs on the full-resolution
//! crop; display downscaling is the orchestrator's business.

use std::path::Path;

use image::RgbImage;
use ort::execution_providers as ep;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use thiserror::Error;
use tracing::{debug, info};

use super::ReadText;

/// Recognition model input height
const REC_HEIGHT: u32 = 48;
/// Recognition model input width bounds
const REC_MIN_WIDTH: u32 = 16;
const REC_MAX_WIDTH: u32 = 320;
/// Input name in PaddleOCR recognition exports
const INPUT_NAME: &str = "x";

/// Errors raised by the text reader. The orchestrator substitutes a
/// placeholder read; these never abort a capture cycle.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("failed to load recognition model {path}")]
    ModelLoad {
        path: String,
        #[source]
        source: ort::Error,
    },
    #[error("failed to load character dictionary {path}")]
    DictionaryLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("dictionary {path} contains no characters")]
    EmptyDictionary { path: String },
    #[error("recognition inference failed")]
    Inference(#[from] ort::Error),
    #[error("recognition produced no output")]
    MissingOutput,
    #[error("recognition output size {actual} is not a multiple of {classes} classes")]
    OutputShape { actual: usize, classes: usize },
}

/// Wraps the recognition ONNX session and its character dictionary.
pub struct OcrEngine {
    session: Session,
    dictionary: Vec<String>,
}

impl OcrEngine {
    /// Load the recognition model and its dictionary (one glyph per line,
    /// CTC blank at index 0 of the model output).
    pub fn load(model_path: &Path, dict_path: &Path, use_gpu: bool) -> Result<Self, OcrError> {
        let dict_content =
            std::fs::read_to_string(dict_path).map_err(|source| OcrError::DictionaryLoad {
                path: dict_path.display().to_string(),
                source,
            })?;
        let dictionary: Vec<String> = dict_content
            .lines()
            .map(|l| l.trim_end_matches(['\r', '\n']).to_string())
            .filter(|l| !l.is_empty())
            .collect();
        if dictionary.is_empty() {
            return Err(OcrError::EmptyDictionary {
                path: dict_path.display().to_string(),
            });
        }

        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?;
        if use_gpu {
            builder =
                builder.with_execution_providers([ep::CUDAExecutionProvider::default().build()])?;
        }
        let session = builder
            .commit_from_file(model_path)
            .map_err(|source| OcrError::ModelLoad {
                path: model_path.display().to_string(),
                source,
            })?;

        info!(
            model = %model_path.display(),
            glyphs = dictionary.len(),
            use_gpu,
            "loaded recognition model"
        );

        Ok(Self {
            session,
            dictionary,
        })
    }
}

impl ReadText for OcrEngine {
    fn read(&mut self, crop: &RgbImage) -> Result<String, OcrError> {
        let input = crop_to_tensor(crop)?;
        let outputs = self.session.run(ort::inputs![INPUT_NAME => input])?;

        // Recognition exports name their single output inconsistently; take
        // the first one.
        let (_, value) = outputs.iter().next().ok_or(OcrError::MissingOutput)?;
        let (_shape, data) = value.try_extract_tensor::<f32>()?;

        let classes = self.dictionary.len() + 1; // +1 for the CTC blank
        if data.is_empty() || data.len() % classes != 0 {
            return Err(OcrError::OutputShape {
                actual: data.len(),
                classes,
            });
        }

        let text = ctc_greedy_decode(data, classes, &self.dictionary);
        debug!(
            crop_w = crop.width(),
            crop_h = crop.height(),
            text = %text,
            "ocr pass"
        );
        Ok(text)
    }
}

/// Resize the crop to the model's input height and convert to a `[-1, 1]`
/// normalised `[1, 3, H, W]` tensor.
fn crop_to_tensor(crop: &RgbImage) -> Result<ort::value::DynValue, ort::Error> {
    let (w, h) = crop.dimensions();
    let target_w = ((w as f32 * REC_HEIGHT as f32 / h.max(1) as f32) as u32)
        .clamp(REC_MIN_WIDTH, REC_MAX_WIDTH);
    let resized = image::imageops::resize(
        crop,
        target_w,
        REC_HEIGHT,
        image::imageops::FilterType::Triangle,
    );

    let plane = (target_w * REC_HEIGHT) as usize;
    let raw = resized.as_raw();
    let mut data = vec![0f32; 3 * plane];
    for idx in 0..plane {
        data[idx] = (raw[idx * 3] as f32 / 255.0 - 0.5) / 0.5;
        data[plane + idx] = (raw[idx * 3 + 1] as f32 / 255.0 - 0.5) / 0.5;
        data[2 * plane + idx] = (raw[idx * 3 + 2] as f32 / 255.0 - 0.5) / 0.5;
    }

    let shape = [1usize, 3, REC_HEIGHT as usize, target_w as usize];
    Ok(Tensor::from_array((shape, data.into_boxed_slice()))?.into_dyn())
}

/// Greedy CTC decode: argmax per timestep, drop blanks (index 0), collapse
/// consecutive repeats.
fn ctc_greedy_decode(data: &[f32], classes: usize, dictionary: &[String]) -> String {
    let timesteps = data.len() / classes;
    let mut text = String::new();
    let mut previous = 0usize;

    for t in 0..timesteps {
        let row = &data[t * classes..(t + 1) * classes];
        let best = row
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0);

        if best != 0 && best != previous {
            if let Some(glyph) = dictionary.get(best - 1) {
                text.push_str(glyph);
            }
        }
        previous = best;
    }

    text
}
