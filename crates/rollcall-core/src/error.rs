use std::path::PathBuf;

use thiserror::Error;

use crate::detector::DetectorError;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("expected {expected}-dim embedding, got {actual}")]
    Dimension { expected: usize, actual: usize },
    #[error("embedding has a non-finite value at index {index}")]
    NonFinite { index: usize },
    #[error("failed to list images in {}: {source}", path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
