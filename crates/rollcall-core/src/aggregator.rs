//! Enrollment: many reference photos in, one consensus embedding out.
//!
//! Each image contributes at most one embedding (its largest face). Images
//! that fail to decode or show no face are dropped silently; the number of
//! survivors is always reported so the caller can judge the result.

use image::RgbImage;
use ndarray::{Array1, ArrayView1};

use crate::detector::FaceDetector;
use crate::error::CoreError;
use crate::source::ImageSource;
use crate::types::{Embedding, FaceVector, RawFace, EMBEDDING_DIM};

/// Hard floor below which the mean of the survivors is not trusted.
pub const MIN_VALID_IMAGES: usize = 3;

/// Minimum advertised to callers of the enrollment surface.
pub const REQUIRED_IMAGES: usize = 5;

/// The two usable-image thresholds. Both are enforced; the larger one wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrollmentPolicy {
    /// Aggregation floor.
    pub min_valid: usize,
    /// Caller-facing minimum.
    pub required: usize,
}

impl Default for EnrollmentPolicy {
    fn default() -> Self {
        Self {
            min_valid: MIN_VALID_IMAGES,
            required: REQUIRED_IMAGES,
        }
    }
}

impl EnrollmentPolicy {
    /// Only the aggregation floor, no extra caller-facing minimum.
    pub fn floor_only() -> Self {
        Self {
            min_valid: MIN_VALID_IMAGES,
            required: MIN_VALID_IMAGES,
        }
    }

    /// Larger of the two thresholds, never below one image.
    pub fn effective_minimum(&self) -> usize {
        self.min_valid.max(self.required).max(1)
    }
}

/// Outcome of aggregating one identity's reference photos.
#[derive(Debug, Clone, PartialEq)]
pub enum Enrollment {
    Accepted {
        embedding: Embedding,
        images_used: usize,
    },
    /// Not enough usable images. A client-input problem, not a fault.
    Rejected { images_used: usize, required: usize },
}

impl Enrollment {
    pub fn images_used(&self) -> usize {
        match self {
            Self::Accepted { images_used, .. } | Self::Rejected { images_used, .. } => *images_used,
        }
    }

    pub fn embedding(&self) -> Option<&Embedding> {
        match self {
            Self::Accepted { embedding, .. } => Some(embedding),
            Self::Rejected { .. } => None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Embed the largest face in a single decoded image.
///
/// Returns `Ok(None)` when the detector finds no face.
pub fn embed_from_image<D>(detector: &D, image: &RgbImage) -> Result<Option<Embedding>, CoreError>
where
    D: FaceDetector + ?Sized,
{
    let faces = detector.detect(image)?;
    match largest_face(faces) {
        Some(face) => Ok(Some(Embedding::from_face_vector(face.vector)?)),
        None => Ok(None),
    }
}

/// Largest bbox area; on a tie the earlier face in detector order wins.
fn largest_face(faces: Vec<RawFace>) -> Option<RawFace> {
    faces.into_iter().fold(None, |best, face| match best {
        Some(best) if best.bbox.area() >= face.bbox.area() => Some(best),
        _ => Some(face),
    })
}

/// Element-wise mean, re-normalized.
fn mean_embedding(embeddings: &[Embedding]) -> Result<Embedding, CoreError> {
    let mut sum = Array1::<f32>::zeros(EMBEDDING_DIM);
    for embedding in embeddings {
        sum += &ArrayView1::from(embedding.as_slice());
    }
    let mean = sum / embeddings.len() as f32;
    Embedding::from_face_vector(FaceVector::Raw(mean.to_vec()))
}

/// Builds consensus embeddings with a borrowed detector.
pub struct Aggregator<'a, D: ?Sized> {
    detector: &'a D,
    policy: EnrollmentPolicy,
}

impl<'a, D: FaceDetector + ?Sized> Aggregator<'a, D> {
    pub fn new(detector: &'a D, policy: EnrollmentPolicy) -> Self {
        Self { detector, policy }
    }

    pub fn policy(&self) -> EnrollmentPolicy {
        self.policy
    }

    /// Aggregate an ordered batch of reference images into one embedding.
    ///
    /// Decode failures and faceless images are skipped. Detector failures
    /// propagate.
    pub fn aggregate(&self, images: &[ImageSource]) -> Result<Enrollment, CoreError> {
        let mut embeddings = Vec::with_capacity(images.len());

        for source in images {
            let Some(image) = source.decode() else {
                continue;
            };
            match embed_from_image(self.detector, &image)? {
                Some(embedding) => embeddings.push(embedding),
                None => tracing::debug!(source = %source, "no face detected; skipping"),
            }
        }

        let images_used = embeddings.len();
        let required = self.policy.effective_minimum();

        if images_used < required {
            tracing::warn!(
                images = images.len(),
                images_used,
                required,
                "enrollment rejected: too few usable images"
            );
            return Ok(Enrollment::Rejected { images_used, required });
        }

        let embedding = mean_embedding(&embeddings)?;
        tracing::info!(images = images.len(), images_used, "consensus embedding computed");

        Ok(Enrollment::Accepted { embedding, images_used })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorError;
    use crate::testing::{axis_vector, image_keyed, raw_face, ScriptedDetector};
    use crate::types::BoundingBox;

    /// One image per width, each face pointing along a distinct axis.
    fn detector_with_axes(widths: &[u32]) -> ScriptedDetector {
        widths.iter().enumerate().fold(ScriptedDetector::default(), |d, (axis, &w)| {
            d.with(w, vec![raw_face(50.0, axis_vector(axis, 3.0))])
        })
    }

    #[test]
    fn test_policy_effective_minimum() {
        assert_eq!(EnrollmentPolicy::default().effective_minimum(), 5);
        assert_eq!(EnrollmentPolicy::floor_only().effective_minimum(), 3);
        let loose = EnrollmentPolicy { min_valid: 3, required: 1 };
        assert_eq!(loose.effective_minimum(), 3);
        let zero = EnrollmentPolicy { min_valid: 0, required: 0 };
        assert_eq!(zero.effective_minimum(), 1);
    }

    #[test]
    fn test_largest_face_selected() {
        let detector = ScriptedDetector::default().with(
            10,
            vec![raw_face(10.0, axis_vector(0, 1.0)), raw_face(20.0, axis_vector(1, 1.0))],
        );
        let image = image_keyed(10).decode().unwrap();
        let emb = embed_from_image(&detector, &image).unwrap().unwrap();
        // Area 400 beats area 100.
        assert!((emb.as_slice()[1] - 1.0).abs() < 1e-6);
        assert!(emb.as_slice()[0].abs() < 1e-6);
    }

    #[test]
    fn test_largest_face_tie_keeps_first() {
        let faces = vec![
            RawFace {
                bbox: BoundingBox::new(0.0, 0.0, 10.0, 20.0),
                vector: FaceVector::Raw(axis_vector(0, 1.0)),
            },
            RawFace {
                bbox: BoundingBox::new(5.0, 5.0, 25.0, 15.0),
                vector: FaceVector::Raw(axis_vector(1, 1.0)),
            },
        ];
        let picked = largest_face(faces).unwrap();
        assert_eq!(picked.vector, FaceVector::Raw(axis_vector(0, 1.0)));
    }

    #[test]
    fn test_embed_from_image_no_face() {
        let detector = ScriptedDetector::default();
        let image = image_keyed(10).decode().unwrap();
        assert!(embed_from_image(&detector, &image).unwrap().is_none());
    }

    #[test]
    fn test_embed_from_image_keeps_prenormalized() {
        let mut values = axis_vector(0, 0.6);
        values[1] = 0.8;
        let detector = ScriptedDetector::default().with(
            10,
            vec![RawFace {
                bbox: BoundingBox::new(0.0, 0.0, 5.0, 5.0),
                vector: FaceVector::Normalized(values.clone()),
            }],
        );
        let image = image_keyed(10).decode().unwrap();
        let emb = embed_from_image(&detector, &image).unwrap().unwrap();
        assert_eq!(emb.as_slice(), values.as_slice());
    }

    #[test]
    fn test_aggregate_below_floor_rejected() {
        let detector = detector_with_axes(&[10, 11]);
        let aggregator = Aggregator::new(&detector, EnrollmentPolicy::floor_only());
        let result = aggregator.aggregate(&[image_keyed(10), image_keyed(11)]).unwrap();
        assert_eq!(result, Enrollment::Rejected { images_used: 2, required: 3 });
        assert!(result.embedding().is_none());
    }

    #[test]
    fn test_aggregate_at_floor_returns_normalized_mean() {
        let detector = detector_with_axes(&[10, 11, 12]);
        let aggregator = Aggregator::new(&detector, EnrollmentPolicy::floor_only());
        let result = aggregator
            .aggregate(&[image_keyed(10), image_keyed(11), image_keyed(12)])
            .unwrap();

        assert!(result.is_accepted());
        assert_eq!(result.images_used(), 3);
        let emb = result.embedding().unwrap();
        let expected = 1.0 / 3.0f32.sqrt();
        for axis in 0..3 {
            assert!((emb.as_slice()[axis] - expected).abs() < 1e-5);
        }
        assert!(emb.as_slice()[3..].iter().all(|x| x.abs() < 1e-6));
        assert!((emb.norm() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_aggregate_default_policy_needs_five() {
        let widths = [10, 11, 12, 13];
        let detector = detector_with_axes(&widths);
        let aggregator = Aggregator::new(&detector, EnrollmentPolicy::default());
        let images: Vec<_> = widths.iter().map(|&w| image_keyed(w)).collect();
        let result = aggregator.aggregate(&images).unwrap();
        assert_eq!(result, Enrollment::Rejected { images_used: 4, required: 5 });
    }

    #[test]
    fn test_aggregate_corrupt_image_is_transparent() {
        let widths = [10, 11, 12, 13];
        let detector = detector_with_axes(&widths);
        let aggregator = Aggregator::new(&detector, EnrollmentPolicy::floor_only());

        let good: Vec<_> = widths.iter().map(|&w| image_keyed(w)).collect();
        let mut with_corrupt = good.clone();
        with_corrupt.insert(2, ImageSource::Bytes(b"\x89PNG truncated".to_vec()));

        let clean = aggregator.aggregate(&good).unwrap();
        let noisy = aggregator.aggregate(&with_corrupt).unwrap();
        assert_eq!(clean.images_used(), 4);
        assert_eq!(clean, noisy);
    }

    #[test]
    fn test_aggregate_skips_faceless_images() {
        // Width 20 has no scripted faces.
        let detector = detector_with_axes(&[10, 11, 12]);
        let aggregator = Aggregator::new(&detector, EnrollmentPolicy::floor_only());
        let result = aggregator
            .aggregate(&[image_keyed(10), image_keyed(20), image_keyed(11), image_keyed(12)])
            .unwrap();
        assert_eq!(result.images_used(), 3);
        assert_eq!(detector.calls.load(std::sync::atomic::Ordering::SeqCst), 4);
    }

    #[test]
    fn test_aggregate_mean_direction_of_unequal_inputs() {
        // Two faces along axis 0, one along axis 1 → direction (2, 1) / sqrt(5).
        let detector = ScriptedDetector::default()
            .with(10, vec![raw_face(5.0, axis_vector(0, 1.0))])
            .with(11, vec![raw_face(5.0, axis_vector(0, 7.0))])
            .with(12, vec![raw_face(5.0, axis_vector(1, 0.5))]);
        let aggregator = Aggregator::new(&detector, EnrollmentPolicy::floor_only());
        let result = aggregator
            .aggregate(&[image_keyed(10), image_keyed(11), image_keyed(12)])
            .unwrap();
        let emb = result.embedding().unwrap();
        let s5 = 5.0f32.sqrt();
        assert!((emb.as_slice()[0] - 2.0 / s5).abs() < 1e-5);
        assert!((emb.as_slice()[1] - 1.0 / s5).abs() < 1e-5);
    }

    #[test]
    fn test_aggregate_propagates_detector_failure() {
        let detector = detector_with_axes(&[10, 11, 12]).failing_on(11);
        let aggregator = Aggregator::new(&detector, EnrollmentPolicy::floor_only());
        let err = aggregator
            .aggregate(&[image_keyed(10), image_keyed(11), image_keyed(12)])
            .unwrap_err();
        assert!(matches!(err, CoreError::Detector(DetectorError::InferenceFailed(_))));
    }

    #[test]
    fn test_aggregate_empty_batch() {
        let detector = ScriptedDetector::default();
        let aggregator = Aggregator::new(&detector, EnrollmentPolicy::floor_only());
        let result = aggregator.aggregate(&[]).unwrap();
        assert_eq!(result, Enrollment::Rejected { images_used: 0, required: 3 });
    }

    #[test]
    fn test_aggregate_zero_policy_never_accepts_nothing() {
        let detector = ScriptedDetector::default();
        let aggregator = Aggregator::new(&detector, EnrollmentPolicy { min_valid: 0, required: 0 });

        let empty = aggregator.aggregate(&[]).unwrap();
        assert_eq!(empty, Enrollment::Rejected { images_used: 0, required: 1 });

        // Decodable but faceless.
        let faceless = aggregator.aggregate(&[image_keyed(10), image_keyed(11)]).unwrap();
        assert_eq!(faceless, Enrollment::Rejected { images_used: 0, required: 1 });
    }

    #[test]
    fn test_aggregate_opposite_faces_stay_finite() {
        let detector = ScriptedDetector::default()
            .with(10, vec![raw_face(5.0, axis_vector(0, 3.0))])
            .with(11, vec![raw_face(5.0, axis_vector(0, -3.0))]);
        let aggregator = Aggregator::new(&detector, EnrollmentPolicy { min_valid: 2, required: 2 });
        let result = aggregator.aggregate(&[image_keyed(10), image_keyed(11)]).unwrap();

        assert_eq!(result.images_used(), 2);
        let emb = result.embedding().unwrap();
        assert!(emb.as_slice().iter().all(|x| x.is_finite()));
        assert_eq!(emb.norm(), 0.0);
    }

    #[test]
    fn test_aggregate_rejects_non_finite_detector_output() {
        let mut poisoned = axis_vector(1, 1.0);
        poisoned[5] = f32::NAN;
        let detector = detector_with_axes(&[10, 11]).with(12, vec![raw_face(5.0, poisoned)]);
        let aggregator = Aggregator::new(&detector, EnrollmentPolicy::floor_only());
        let err = aggregator
            .aggregate(&[image_keyed(10), image_keyed(11), image_keyed(12)])
            .unwrap_err();
        assert!(matches!(err, CoreError::NonFinite { .. }));
    }
}
