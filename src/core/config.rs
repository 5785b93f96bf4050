//! Configuration for a comparison run.
//!
//! A [`ComparisonConfig`] describes which images are compared, what the model
//! is asked, which answers are scored, and where the table goes. It can be
//! built from defaults or loaded from a JSON file; unspecified fields fall
//! back to the values in [`crate::core::constants`].

use super::constants::{
    CANDIDATE_TOKEN_STRINGS, DEFAULT_IMAGE_DIR, DEFAULT_NUM_IMAGES, DEFAULT_OUTPUT_PATH,
    DEFAULT_PROMPT,
};
use super::errors::PreferenceError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonConfig {
    /// Directory holding the numbered images.
    pub image_dir: PathBuf,
    /// Images are indexed `1..=num_images`.
    pub num_images: u32,
    /// Instruction shown with every composite.
    pub prompt: String,
    /// Answers whose logits are recorded, left answer first.
    pub candidate_tokens: [String; 2],
    /// Destination of the results table.
    pub output: PathBuf,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from(DEFAULT_IMAGE_DIR),
            num_images: DEFAULT_NUM_IMAGES,
            prompt: DEFAULT_PROMPT.to_string(),
            candidate_tokens: CANDIDATE_TOKEN_STRINGS.map(str::to_string),
            output: PathBuf::from(DEFAULT_OUTPUT_PATH),
        }
    }
}

impl ComparisonConfig {
    /// Loads a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PreferenceError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&contents).map_err(|e| {
            PreferenceError::config_error(format!(
                "failed to parse comparison config {}: {e}",
                path.display()
            ))
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), PreferenceError> {
        if self.num_images < 2 {
            return Err(PreferenceError::config_error_with_context(
                "num_images",
                &self.num_images.to_string(),
                "at least two images are needed to form a pair",
            ));
        }
        if self.num_images > 99 {
            return Err(PreferenceError::config_error_with_context(
                "num_images",
                &self.num_images.to_string(),
                "image file names are two digits wide",
            ));
        }
        if self.prompt.trim().is_empty() {
            return Err(PreferenceError::config_error("prompt must not be empty"));
        }
        let [left, right] = &self.candidate_tokens;
        if left.is_empty() || right.is_empty() || left == right {
            return Err(PreferenceError::config_error(format!(
                "candidate_tokens must be two distinct non-empty strings, got {:?}",
                self.candidate_tokens
            )));
        }
        Ok(())
    }

    /// Number of unordered pairs the run will compare.
    pub fn num_pairs(&self) -> usize {
        let n = self.num_images as usize;
        n * n.saturating_sub(1) / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = ComparisonConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.num_images, 64);
        assert_eq!(cfg.num_pairs(), 2016);
        assert_eq!(cfg.candidate_tokens, [" L".to_string(), " R".to_string()]);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"num_images": 3, "output": "out.arrow"}}"#).unwrap();

        let cfg = ComparisonConfig::from_path(file.path()).unwrap();
        assert_eq!(cfg.num_images, 3);
        assert_eq!(cfg.num_pairs(), 3);
        assert_eq!(cfg.output, PathBuf::from("out.arrow"));
        assert_eq!(cfg.image_dir, PathBuf::from("img"));
        assert_eq!(cfg.prompt, DEFAULT_PROMPT);
    }

    #[test]
    fn test_rejects_single_image() {
        let cfg = ComparisonConfig {
            num_images: 1,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(PreferenceError::ConfigError { .. })
        ));
    }

    #[test]
    fn test_rejects_identical_candidates() {
        let cfg = ComparisonConfig {
            candidate_tokens: [" L".to_string(), " L".to_string()],
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        assert!(matches!(
            ComparisonConfig::from_path(file.path()),
            Err(PreferenceError::ConfigError { .. })
        ));
    }
}
