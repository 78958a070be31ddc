//! Scene mode: every face in every photo, no identity resolution.

use crate::detector::FaceDetector;
use crate::error::CoreError;
use crate::source::ImageSource;
use crate::types::{Detection, Embedding};

/// Detect all faces across a batch of scene photos.
///
/// Order follows the detector within an image and the input across images.
/// Undecodable images contribute nothing.
pub fn detect_all<D>(detector: &D, images: &[ImageSource]) -> Result<Vec<Detection>, CoreError>
where
    D: FaceDetector + ?Sized,
{
    let mut detections = Vec::new();

    for source in images {
        let Some(image) = source.decode() else {
            continue;
        };

        let faces = detector.detect(&image)?;
        tracing::debug!(source = %source, faces = faces.len(), "scene image processed");

        for face in faces {
            detections.push(Detection {
                embedding: Embedding::from_face_vector(face.vector)?,
                bbox: face.bbox,
            });
        }
    }

    Ok(detections)
}
