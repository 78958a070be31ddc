//! SCRFD + ArcFace face analysis on ONNX Runtime (CPU).
//!
//! [`OnnxFaceAnalyzer`] is the production [`FaceDetector`]: it locates
//! faces with SCRFD, aligns each one on its five landmarks, and embeds the
//! crop with ArcFace.

mod alignment;
mod arcface;
mod scrfd;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use image::RgbImage;

use crate::detector::{DetectorError, FaceDetector};
use crate::types::RawFace;

use arcface::ArcFaceRecognizer;
use scrfd::ScrfdDetector;

/// InsightFace buffalo_l detection model.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// InsightFace buffalo_l recognition model.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

/// Locations of the two ONNX model files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
}

impl ModelPaths {
    /// Standard file names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join(DETECTOR_MODEL_FILE),
            recognizer: dir.join(RECOGNIZER_MODEL_FILE),
        }
    }

    /// Model files that do not exist on disk.
    pub fn missing(&self) -> Vec<&Path> {
        [self.detector.as_path(), self.recognizer.as_path()]
            .into_iter()
            .filter(|p| !p.exists())
            .collect()
    }
}

/// Detector + recognizer pair behind a [`FaceDetector`].
///
/// ONNX sessions need `&mut` to run, so each sits behind its own mutex.
pub struct OnnxFaceAnalyzer {
    detector: Mutex<ScrfdDetector>,
    recognizer: Mutex<ArcFaceRecognizer>,
}

impl OnnxFaceAnalyzer {
    /// Load both models. Fails fast if either file is missing.
    pub fn load(paths: &ModelPaths, intra_threads: usize) -> Result<Self, DetectorError> {
        let detector = ScrfdDetector::load(&paths.detector, intra_threads)?;
        let recognizer = ArcFaceRecognizer::load(&paths.recognizer, intra_threads)?;
        Ok(Self {
            detector: Mutex::new(detector),
            recognizer: Mutex::new(recognizer),
        })
    }
}

impl FaceDetector for OnnxFaceAnalyzer {
    fn detect(&self, image: &RgbImage) -> Result<Vec<RawFace>, DetectorError> {
        let located = self
            .detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .detect(image)?;

        let mut recognizer = self.recognizer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut faces = Vec::with_capacity(located.len());

        for face in located {
            let Some(landmarks) = face.landmarks else {
                tracing::debug!(bbox = ?face.bbox, "face without landmarks; cannot align");
                continue;
            };
            let Some(aligned) = alignment::align_face(image, &landmarks) else {
                tracing::debug!(bbox = ?face.bbox, "degenerate landmarks; skipping face");
                continue;
            };
            faces.push(RawFace {
                bbox: face.bbox,
                vector: recognizer.embed(&aligned)?,
            });
        }

        tracing::debug!(faces = faces.len(), "image analyzed");
        Ok(faces)
    }
}
