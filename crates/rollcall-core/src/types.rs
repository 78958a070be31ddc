use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::CoreError;

/// Width of every face embedding (ArcFace w600k_r50 output).
pub const EMBEDDING_DIM: usize = 512;

/// Added to the norm so a degenerate all-zero vector never divides by zero.
const NORM_EPSILON: f32 = 1e-12;

/// L2-normalize a vector: `v / (||v|| + eps)`.
pub fn l2_normalize(values: &[f32]) -> Vec<f32> {
    let norm = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    values.iter().map(|x| x / (norm + NORM_EPSILON)).collect()
}

/// Axis-aligned face box in image pixel coordinates.
///
/// `x1 < x2` and `y1 < y2` are expected but not enforced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    /// Detector score in [0, 1].
    pub confidence: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2, confidence: 1.0 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Box area in square pixels. Used to pick the dominant face in an image.
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// `[x1, y1, x2, y2]`.
    pub fn corners(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// Embedding as handed back by a detector, before the core takes ownership.
#[derive(Debug, Clone, PartialEq)]
pub enum FaceVector {
    /// Already unit length; used as-is.
    Normalized(Vec<f32>),
    /// Unnormalized model output; the core normalizes it.
    Raw(Vec<f32>),
}

/// One face reported by a [`FaceDetector`](crate::FaceDetector).
#[derive(Debug, Clone, PartialEq)]
pub struct RawFace {
    pub bbox: BoundingBox,
    pub vector: FaceVector,
}

/// A 512-dimensional, L2-normalized face embedding.
///
/// Only produced from a detector's [`FaceVector`] or by averaging other
/// embeddings, so every instance has the right width and unit norm.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    /// Take ownership of a detector vector, normalizing it unless the
    /// detector already did. NaN or infinite components are rejected.
    pub fn from_face_vector(vector: FaceVector) -> Result<Self, CoreError> {
        let values = match vector {
            FaceVector::Normalized(values) => values,
            FaceVector::Raw(values) => l2_normalize(&values),
        };

        if values.len() != EMBEDDING_DIM {
            return Err(CoreError::Dimension {
                expected: EMBEDDING_DIM,
                actual: values.len(),
            });
        }

        if let Some(index) = values.iter().position(|x| !x.is_finite()) {
            return Err(CoreError::NonFinite { index });
        }

        Ok(Self { values })
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.values
    }

    /// Euclidean norm; ≈ 1.0 for anything but a degenerate zero vector.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|x| x * x).sum::<f32>().sqrt()
    }
}

/// One located face from a scene photo. No identity attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub embedding: Embedding,
    /// Serialized as `[x1, y1, x2, y2]`.
    #[serde(serialize_with = "serialize_corners")]
    pub bbox: BoundingBox,
}

fn serialize_corners<S: Serializer>(bbox: &BoundingBox, serializer: S) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(4))?;
    for corner in bbox.corners() {
        seq.serialize_element(&corner)?;
    }
    seq.end()
}
