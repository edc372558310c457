// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printed-text engine adapter backed by the `ocrs` crate, a pure-Rust OCR
// engine whose neural network models run on `rten`.
//
// Only available with the `ocr` feature:
//
// ```toml
// lectern-engine = { path = "crates/lectern-engine", features = ["ocr"] }
// ```
//
// Two model files are needed, `text-detection.rten` and
// `text-recognition.rten`. Running `ocrs-cli` once downloads them to
// `$XDG_CACHE_HOME/ocrs` (typically `~/.cache/ocrs`), which is where
// `OcrsConfig::default()` looks.
//
// `ocrs` reports no per-line scores, so the adapter reports a fixed assumed
// confidence for non-empty output. Fusion still rewards agreement with other
// engines on top of it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use image::DynamicImage;
use lectern_core::error::LecternError;
use lectern_core::types::BoundingBox;
use lectern_document::PageImage;
use ocrs::{ImageSource, OcrEngine, OcrEngineParams, TextItem};
use rten::Model;
use tracing::{debug, info, instrument};

use crate::adapter::{EngineAdapter, EngineFailure, Recognition};

const DETECTION_MODEL_FILENAME: &str = "text-detection.rten";
const RECOGNITION_MODEL_FILENAME: &str = "text-recognition.rten";

/// Confidence reported for non-empty output.
pub const DEFAULT_ASSUMED_CONFIDENCE: f64 = 0.85;

fn default_model_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg).join("ocrs")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".cache").join("ocrs")
    } else {
        PathBuf::from("ocrs-models")
    }
}

#[derive(Debug, Clone)]
pub struct OcrsConfig {
    pub detection_model_path: PathBuf,
    pub recognition_model_path: PathBuf,
    pub assumed_confidence: f64,
}

impl Default for OcrsConfig {
    fn default() -> Self {
        Self::from_dir(default_model_dir())
    }
}

impl OcrsConfig {
    /// Models named `text-detection.rten` and `text-recognition.rten` in `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            detection_model_path: dir.join(DETECTION_MODEL_FILENAME),
            recognition_model_path: dir.join(RECOGNITION_MODEL_FILENAME),
            assumed_confidence: DEFAULT_ASSUMED_CONFIDENCE,
        }
    }

    pub fn validate(&self) -> Result<(), LecternError> {
        for (kind, path) in [
            ("detection", &self.detection_model_path),
            ("recognition", &self.recognition_model_path),
        ] {
            if !path.exists() {
                return Err(LecternError::Config(format!(
                    "{kind} model not found at {}; run `ocrs-cli` once to download models",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// `ocrs` wrapped as a printed-text engine. Model loading is the expensive
/// step, so build one adapter and share it.
pub struct OcrsAdapter {
    engine: Arc<OcrEngine>,
    assumed_confidence: f64,
}

impl OcrsAdapter {
    #[instrument(skip_all, fields(
        detection = %config.detection_model_path.display(),
        recognition = %config.recognition_model_path.display(),
    ))]
    pub fn new(config: OcrsConfig) -> Result<Self, LecternError> {
        config.validate()?;

        let detection_model = Model::load_file(&config.detection_model_path).map_err(|err| {
            LecternError::Config(format!(
                "failed to load detection model from {}: {err}",
                config.detection_model_path.display()
            ))
        })?;
        let recognition_model = Model::load_file(&config.recognition_model_path).map_err(|err| {
            LecternError::Config(format!(
                "failed to load recognition model from {}: {err}",
                config.recognition_model_path.display()
            ))
        })?;

        let engine = OcrEngine::new(OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            ..Default::default()
        })
        .map_err(|err| LecternError::Config(format!("failed to initialise ocrs: {err}")))?;

        info!("ocrs engine loaded");
        Ok(Self {
            engine: Arc::new(engine),
            assumed_confidence: config.assumed_confidence.clamp(0.0, 1.0),
        })
    }

    pub fn from_model_dir(dir: impl AsRef<Path>) -> Result<Self, LecternError> {
        Self::new(OcrsConfig::from_dir(dir))
    }
}

/// Detect, group and recognise lines, each with its box in image
/// coordinates. Runs on a blocking thread.
fn recognize_lines(engine: &OcrEngine, image: &DynamicImage) -> Result<Vec<BoundingBox>, LecternError> {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();

    let source = ImageSource::from_bytes(rgb.as_raw(), (width, height)).map_err(|err| {
        LecternError::Input(format!("failed to create image source ({width}x{height}): {err}"))
    })?;
    let input = engine
        .prepare_input(source)
        .map_err(|err| LecternError::Ocr(format!("ocrs preprocessing failed: {err}")))?;

    let words = engine
        .detect_words(&input)
        .map_err(|err| LecternError::Ocr(format!("word detection failed: {err}")))?;
    let line_rects = engine.find_text_lines(&input, &words);
    let lines = engine
        .recognize_text(&input, &line_rects)
        .map_err(|err| LecternError::Ocr(format!("line recognition failed: {err}")))?;

    Ok(lines
        .iter()
        .flatten()
        .filter_map(|line| {
            let text = line.to_string();
            if text.trim().is_empty() {
                return None;
            }
            let rect = line.bounding_rect();
            Some(BoundingBox {
                text,
                confidence: None,
                x_min: rect.left() as f32,
                y_min: rect.top() as f32,
                x_max: rect.right() as f32,
                y_max: rect.bottom() as f32,
            })
        })
        .collect())
}

/// Page text is the lines in reading order, one per row.
fn line_recognition(lines: Vec<BoundingBox>, assumed_confidence: f64) -> Recognition {
    let confidence = if lines.is_empty() {
        0.0
    } else {
        assumed_confidence
    };
    let text = lines
        .iter()
        .map(|line| line.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    Recognition::new(text, confidence).with_boxes(lines)
}

#[async_trait]
impl EngineAdapter for OcrsAdapter {
    async fn invoke(&self, image: &PageImage) -> Result<Recognition, EngineFailure> {
        let engine = Arc::clone(&self.engine);
        let page = image.clone();
        let lines = tokio::task::spawn_blocking(move || recognize_lines(&engine, page.image()))
            .await
            .map_err(|err| EngineFailure::transient(format!("ocrs task failed: {err}")))??;

        debug!(lines = lines.len(), "ocrs recognition complete");
        Ok(line_recognition(lines, self.assumed_confidence))
    }
}
