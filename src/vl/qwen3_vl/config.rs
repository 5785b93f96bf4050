use crate::core::PreferenceError;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Qwen3VlImageSize {
    /// Minimum pixel count after resizing.
    pub shortest_edge: u32,
    /// Maximum pixel count after resizing.
    pub longest_edge: u32,
}

/// Image processor settings, as found in `preprocessor_config.json`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Qwen3VlPreprocessorConfig {
    pub size: Qwen3VlImageSize,
    pub patch_size: usize,
    pub temporal_patch_size: usize,
    pub merge_size: usize,
    pub do_rescale: bool,
    pub rescale_factor: f32,
    pub do_normalize: bool,
    pub image_mean: Vec<f32>,
    pub image_std: Vec<f32>,
}

impl Default for Qwen3VlPreprocessorConfig {
    fn default() -> Self {
        Self {
            size: Qwen3VlImageSize {
                shortest_edge: 256 * 16 * 16,
                longest_edge: 1280 * 32 * 32,
            },
            patch_size: 16,
            temporal_patch_size: 2,
            merge_size: 2,
            do_rescale: true,
            rescale_factor: 1.0 / 255.0,
            do_normalize: true,
            image_mean: vec![0.5, 0.5, 0.5],
            image_std: vec![0.5, 0.5, 0.5],
        }
    }
}

impl Qwen3VlPreprocessorConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PreferenceError> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| {
            PreferenceError::config_error(format!(
                "failed to parse Qwen3-VL preprocessor_config.json: {e}"
            ))
        })
    }

    pub fn validate(&self) -> Result<(), PreferenceError> {
        if self.image_mean.len() != 3 || self.image_std.len() != 3 {
            return Err(PreferenceError::config_error(format!(
                "Qwen3-VL image_mean/std must have length 3, got mean={} std={}",
                self.image_mean.len(),
                self.image_std.len()
            )));
        }
        if self.image_std.iter().any(|&s| s == 0.0) {
            return Err(PreferenceError::config_error(
                "Qwen3-VL image_std must not contain zeros",
            ));
        }
        if self.patch_size == 0 || self.merge_size == 0 || self.temporal_patch_size == 0 {
            return Err(PreferenceError::config_error(format!(
                "Qwen3-VL patch_size/merge_size/temporal_patch_size must be > 0, got {}/{}/{}",
                self.patch_size, self.merge_size, self.temporal_patch_size
            )));
        }
        if self.size.shortest_edge > self.size.longest_edge {
            return Err(PreferenceError::config_error(format!(
                "Qwen3-VL pixel budget is empty: min {} > max {}",
                self.size.shortest_edge, self.size.longest_edge
            )));
        }
        Ok(())
    }

    /// Side length, in pixels, that resized images must be divisible by.
    pub fn factor(&self) -> u32 {
        (self.patch_size * self.merge_size) as u32
    }

    /// Lowers the pixel budget so a resized image yields at most `max_tokens`
    /// image placeholder tokens. Each token covers `factor() x factor()` pixels.
    pub fn limit_image_tokens(&mut self, max_tokens: usize) {
        let pixels_per_token = u64::from(self.factor()).pow(2);
        let max_pixels = (max_tokens as u64 * pixels_per_token).min(u64::from(u32::MAX)) as u32;
        if self.size.longest_edge > max_pixels {
            tracing::debug!(
                from = self.size.longest_edge,
                to = max_pixels,
                max_tokens,
                "capping Qwen3-VL image pixel budget"
            );
            self.size.longest_edge = max_pixels;
        }
        self.size.shortest_edge = self.size.shortest_edge.min(self.size.longest_edge);
    }
}

/// Special token ids used to build the chat prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Qwen3VlSpecialTokens {
    pub im_start: u32,
    pub im_end: u32,
    pub vision_start: u32,
    pub vision_end: u32,
    pub image_pad: u32,
}
