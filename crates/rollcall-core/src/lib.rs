//! rollcall-core — Face embedding aggregation and scene detection.
//!
//! Turns per-image face detections into a single consensus identity vector
//! (enrollment) or a flat list of located faces (scene mode). Detection and
//! embedding inference sit behind [`FaceDetector`]; the [`onnx`] module
//! provides the SCRFD + ArcFace implementation.

pub mod aggregator;
pub mod detector;
pub mod error;
pub mod onnx;
pub mod scene;
pub mod shared;
pub mod source;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregator::{embed_from_image, Aggregator, Enrollment, EnrollmentPolicy};
pub use detector::{DetectorError, FaceDetector};
pub use error::CoreError;
pub use scene::detect_all;
pub use shared::SharedDetector;
pub use source::ImageSource;
pub use types::{l2_normalize, BoundingBox, Detection, Embedding, FaceVector, RawFace, EMBEDDING_DIM};
