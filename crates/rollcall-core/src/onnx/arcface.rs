//! ArcFace recognizer via ONNX Runtime.
//!
//! Embeds an aligned 112×112 RGB crop into a 512-dimensional vector using
//! the w600k_r50 model.

use std::path::Path;

use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;

use super::alignment::ALIGNED_SIZE;
use crate::detector::DetectorError;
use crate::types::{l2_normalize, FaceVector, EMBEDDING_DIM};

const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric, unlike SCRFD's 128.0

pub(crate) struct ArcFaceRecognizer {
    session: Session,
}

impl ArcFaceRecognizer {
    pub(crate) fn load(model_path: &Path, intra_threads: usize) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Embed an aligned face crop. The result is unit length.
    pub(crate) fn embed(&mut self, aligned: &RgbImage) -> Result<FaceVector, DetectorError> {
        let input = preprocess(aligned);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(DetectorError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(FaceVector::Normalized(l2_normalize(raw)))
    }
}

/// Aligned RGB crop to a normalized NCHW tensor. Missing pixels read as 0.
fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let size = ALIGNED_SIZE as usize;
    Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
        let value = aligned
            .get_pixel_checked(x as u32, y as u32)
            .map_or(0.0, |p| f32::from(p.0[c]));
        (value - ARCFACE_MEAN) / ARCFACE_STD
    })
}
