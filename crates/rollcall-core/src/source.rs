//! Image inputs and decoding.

use std::fmt;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageReader, RgbImage};

use crate::error::CoreError;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Where an image comes from: a file on disk or an in-memory upload.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl ImageSource {
    /// Decode into 8-bit RGB. Returns `None` for anything unreadable so the
    /// caller can skip it.
    pub fn decode(&self) -> Option<RgbImage> {
        let decoded = match self {
            Self::Path(path) => decode_path(path),
            Self::Bytes(bytes) => image::load_from_memory(bytes),
        };

        match decoded {
            Ok(image) => Some(image.to_rgb8()),
            Err(e) => {
                tracing::debug!(source = %self, error = %e, "skipping undecodable image");
                None
            }
        }
    }

    /// List `.jpg`, `.jpeg` and `.png` files in `dir`, sorted by path.
    pub fn from_dir(dir: &Path) -> Result<Vec<Self>, CoreError> {
        let read_err = |source| CoreError::ReadDir {
            path: dir.to_path_buf(),
            source,
        };

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(read_err)? {
            let path = entry.map_err(read_err)?.path();
            if path.is_file() && has_image_extension(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        Ok(paths.into_iter().map(Self::Path).collect())
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<Vec<u8>> for ImageSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

/// Content sniffing first, so a mislabelled extension still decodes.
fn decode_path(path: &Path) -> image::ImageResult<DynamicImage> {
    ImageReader::open(path)?.with_guessed_format()?.decode()
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::png_bytes;

    #[test]
    fn test_decode_png_bytes() {
        let image = ImageSource::Bytes(png_bytes(12, 7)).decode().unwrap();
        assert_eq!(image.dimensions(), (12, 7));
    }

    #[test]
    fn test_decode_garbage_is_none() {
        assert!(ImageSource::Bytes(b"definitely not an image".to_vec()).decode().is_none());
    }

    #[test]
    fn test_decode_missing_file_is_none() {
        let source = ImageSource::Path(PathBuf::from("/nonexistent/rollcall/face.jpg"));
        assert!(source.decode().is_none());
    }

    #[test]
    fn test_image_extension_filter() {
        assert!(has_image_extension(Path::new("a/b/face.JPG")));
        assert!(has_image_extension(Path::new("face.jpeg")));
        assert!(has_image_extension(Path::new("face.png")));
        assert!(!has_image_extension(Path::new("face.gif")));
        assert!(!has_image_extension(Path::new("README")));
    }

    #[test]
    fn test_display() {
        assert_eq!(ImageSource::Bytes(vec![0; 5]).to_string(), "<5 bytes>");
        assert_eq!(ImageSource::Path(PathBuf::from("x.png")).to_string(), "x.png");
    }
}
