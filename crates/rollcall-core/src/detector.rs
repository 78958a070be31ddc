//! Face detector collaborator interface.

use image::RgbImage;
use thiserror::Error;

use crate::types::RawFace;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download the insightface buffalo_l pack and place it in the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Finds faces in a decoded image and embeds each one.
///
/// Implementations are shared across callers through
/// [`SharedDetector`](crate::SharedDetector), hence `&self` and `Sync`.
/// Faces should come back in a stable order for a given image.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<RawFace>, DetectorError>;
}
