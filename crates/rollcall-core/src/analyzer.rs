//! SCRFD + ArcFace pipeline behind the [`Detector`] capability.
//!
//! Equivalent to the InsightFace `buffalo_l` pack: `det_10g.onnx` for
//! detection and landmarks, `w600k_r50.onnx` for embeddings.

use crate::detector::{DetectorError, FaceDetector, SCRFD_DEFAULT_INPUT_SIZE};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{DetectError, Detector, Face};
use image::RgbImage;
use std::path::PathBuf;
use thiserror::Error;

pub const MODEL_PACK: &str = "buffalo_l";
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

impl From<DetectorError> for DetectError {
    fn from(e: DetectorError) -> Self {
        DetectError::Inference(e.to_string())
    }
}

/// Default model directory: `$XDG_DATA_HOME/rollcall/models`.
pub fn default_model_dir() -> PathBuf {
    data_dir().join("models")
}

/// Base data directory: `$XDG_DATA_HOME/rollcall` (or `~/.local/share/rollcall`).
pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

#[derive(Debug, Clone)]
pub struct AnalyzerOptions {
    pub model_dir: PathBuf,
    /// Square detector input size in pixels.
    pub det_size: usize,
    pub intra_threads: usize,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            det_size: SCRFD_DEFAULT_INPUT_SIZE,
            intra_threads: 2,
        }
    }
}

impl AnalyzerOptions {
    pub fn detector_path(&self) -> PathBuf {
        self.model_dir.join(DETECTOR_MODEL_FILE)
    }

    pub fn recognizer_path(&self) -> PathBuf {
        self.model_dir.join(RECOGNIZER_MODEL_FILE)
    }
}

pub struct FaceAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl FaceAnalyzer {
    /// Load both models. Any failure here means the service cannot run.
    pub fn load(options: &AnalyzerOptions) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(
            &options.detector_path(),
            options.det_size,
            options.intra_threads,
        )?;
        let recognizer = FaceRecognizer::load(&options.recognizer_path(), options.intra_threads)?;
        tracing::info!(
            pack = MODEL_PACK,
            dir = %options.model_dir.display(),
            "face analyzer ready"
        );
        Ok(Self { detector, recognizer })
    }
}

impl Detector for FaceAnalyzer {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Face>, DetectError> {
        let detections = self.detector.detect(image)?;

        let faces = detections
            .into_iter()
            .map(|det| {
                let embedding = match &det.landmarks {
                    Some(landmarks) => match self.recognizer.extract(image, landmarks) {
                        Ok(embedding) => Some(embedding),
                        Err(e) => {
                            tracing::warn!(
                                error = %e,
                                confidence = det.confidence,
                                "embedding extraction failed"
                            );
                            None
                        }
                    },
                    None => None,
                };
                Face {
                    bbox: det.bbox,
                    confidence: det.confidence,
                    embedding,
                }
            })
            .collect();

        Ok(faces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_paths() {
        let options = AnalyzerOptions {
            model_dir: PathBuf::from("/opt/models"),
            ..AnalyzerOptions::default()
        };
        assert_eq!(options.detector_path(), PathBuf::from("/opt/models/det_10g.onnx"));
        assert_eq!(options.recognizer_path(), PathBuf::from("/opt/models/w600k_r50.onnx"));
        assert_eq!(options.det_size, 416);
    }

    #[test]
    fn test_load_missing_models_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let options = AnalyzerOptions {
            model_dir: tmp.path().to_path_buf(),
            ..AnalyzerOptions::default()
        };
        let err = FaceAnalyzer::load(&options).err().unwrap();
        assert!(matches!(err, AnalyzerError::Detector(DetectorError::ModelNotFound(_))));
    }
}
