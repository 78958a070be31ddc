//! Test doubles shared by the aggregator and scene tests.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{DynamicImage, ImageFormat, RgbImage};

use crate::detector::{DetectorError, FaceDetector};
use crate::source::ImageSource;
use crate::types::{BoundingBox, FaceVector, RawFace, EMBEDDING_DIM};

/// Encode a blank RGB image of the given size as PNG.
pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::new(width, height))
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

/// PNG source whose width keys the scripted detector.
pub(crate) fn image_keyed(width: u32) -> ImageSource {
    ImageSource::Bytes(png_bytes(width, 4))
}

/// Raw vector with `value` at `axis` and zeros elsewhere.
pub(crate) fn axis_vector(axis: usize, value: f32) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[axis] = value;
    v
}

pub(crate) fn raw_face(side: f32, vector: Vec<f32>) -> RawFace {
    RawFace {
        bbox: BoundingBox::new(0.0, 0.0, side, side),
        vector: FaceVector::Raw(vector),
    }
}

/// Detector that returns canned faces keyed by image width.
#[derive(Default)]
pub(crate) struct ScriptedDetector {
    faces: HashMap<u32, Vec<RawFace>>,
    failing: Option<u32>,
    pub(crate) calls: AtomicUsize,
}

impl ScriptedDetector {
    pub(crate) fn with(mut self, width: u32, faces: Vec<RawFace>) -> Self {
        self.faces.insert(width, faces);
        self
    }

    /// Fail inference for images of this width.
    pub(crate) fn failing_on(mut self, width: u32) -> Self {
        self.failing = Some(width);
        self
    }
}

impl FaceDetector for ScriptedDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<RawFace>, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing == Some(image.width()) {
            return Err(DetectorError::InferenceFailed("scripted failure".into()));
        }
        Ok(self.faces.get(&image.width()).cloned().unwrap_or_default())
    }
}
