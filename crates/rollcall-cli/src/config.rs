use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use rollcall_core::aggregator::{MIN_VALID_IMAGES, REQUIRED_IMAGES};
use rollcall_core::onnx::ModelPaths;
use rollcall_core::EnrollmentPolicy;
use serde::Deserialize;

/// CLI configuration: defaults, then an optional TOML file, then
/// `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory containing `det_10g.onnx` and `w600k_r50.onnx`.
    pub model_dir: PathBuf,
    /// Path to the enrolled-identity snapshot file.
    pub store_path: PathBuf,
    /// Aggregation floor for usable enrollment images.
    pub min_valid_images: usize,
    /// Minimum usable images promised to callers.
    pub required_images: usize,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
    /// Serialize store writes per file within this process.
    pub lock_writes: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            model_dir: data_dir.join("models"),
            store_path: data_dir.join("faces.json"),
            min_valid_images: MIN_VALID_IMAGES,
            required_images: REQUIRED_IMAGES,
            intra_threads: 2,
            lock_writes: true,
        }
    }
}

impl Config {
    /// Load from `file` (or `ROLLCALL_CONFIG`) if given, then apply env overrides.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let file = file
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("ROLLCALL_CONFIG").map(PathBuf::from));

        let mut config = match file {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                Self::from_toml(&text).with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };

        config.apply_env();
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    fn apply_env(&mut self) {
        if let Some(dir) = std::env::var_os("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(path) = std::env::var_os("ROLLCALL_STORE_PATH") {
            self.store_path = PathBuf::from(path);
        }
        override_from_env(&mut self.min_valid_images, "ROLLCALL_MIN_VALID_IMAGES");
        override_from_env(&mut self.required_images, "ROLLCALL_REQUIRED_IMAGES");
        override_from_env(&mut self.intra_threads, "ROLLCALL_INTRA_THREADS");
        if let Ok(v) = std::env::var("ROLLCALL_LOCK_WRITES") {
            self.lock_writes = v != "0";
        }
    }

    pub fn policy(&self) -> EnrollmentPolicy {
        EnrollmentPolicy {
            min_valid: self.min_valid_images,
            required: self.required_images,
        }
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths::in_dir(&self.model_dir)
    }
}

/// `$XDG_DATA_HOME/rollcall`, falling back to `~/.local/share/rollcall`.
fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

/// Unparseable values are ignored with a warning.
fn override_from_env<T: FromStr>(slot: &mut T, key: &str) {
    let Ok(raw) = std::env::var(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable environment override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.min_valid_images, 3);
        assert_eq!(config.required_images, 5);
        assert!(config.lock_writes);
        assert!(config.store_path.ends_with("rollcall/faces.json"));
        assert_eq!(config.policy().effective_minimum(), 5);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = Config::from_toml(
            r#"
            store_path = "/srv/rollcall/faces.json"
            required_images = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.store_path, PathBuf::from("/srv/rollcall/faces.json"));
        assert_eq!(config.policy(), EnrollmentPolicy::floor_only());
        assert_eq!(config.intra_threads, 2);
    }

    #[test]
    fn test_zero_thresholds_still_need_one_image() {
        let config = Config::from_toml("min_valid_images = 0\nrequired_images = 0").unwrap();
        assert_eq!(config.policy().effective_minimum(), 1);
    }

    #[test]
    fn test_from_toml_rejects_unknown_keys() {
        assert!(Config::from_toml("similarity_threshold = 0.4").is_err());
    }

    #[test]
    fn test_model_paths() {
        let config = Config::from_toml(r#"model_dir = "/opt/insightface""#).unwrap();
        assert_eq!(
            config.model_paths().detector,
            PathBuf::from("/opt/insightface/det_10g.onnx")
        );
    }
}
