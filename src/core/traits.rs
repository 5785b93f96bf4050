//! Traits separating the model backend from the comparison logic.
//!
//! A backend provides two components, mirroring how pretrained checkpoints
//! ship a processor next to the weights:
//!
//! ```text
//! ┌──────────────┐   ProcessedInputs   ┌─────────────┐   BatchInputs   ┌─────────────────┐
//! │InputProcessor│────────────────────▶│ build_batch │───────────────▶│ PreferenceModel │──▶ logits
//! │• process     │   (one per image)   │ (stacking)  │                │• forward        │
//! │• encode_cand.│                     └─────────────┘                └─────────────────┘
//! └──────────────┘
//! ```
//!
//! The comparator and driver only see these traits, so they can be exercised
//! with lightweight CPU mocks.

use crate::core::PreferenceError;
use crate::processors::{BatchInputs, ProcessedInputs};
use candle_core::{DType, Device, Tensor};
use image::RgbImage;

/// Turns an image and a prompt into model-ready tensors.
pub trait InputProcessor {
    /// Processes a single image with the prompt.
    ///
    /// Tensors may live on any device; [`crate::processors::build_batch`]
    /// moves them to the model's device after stacking.
    fn process(&self, image: &RgbImage, prompt: &str) -> Result<ProcessedInputs, PreferenceError>;

    /// Maps each candidate answer to its token id.
    ///
    /// Every string must correspond to exactly one token; an answer that
    /// tokenizes into several pieces has no single logit to read.
    fn encode_candidates(&self, candidates: &[&str]) -> Result<Vec<u32>, PreferenceError>;
}

/// A pretrained multimodal language model.
pub trait PreferenceModel {
    /// Device holding the weights. Batches are assembled here.
    fn device(&self) -> &Device;

    /// Precision of the weights. The image field is cast to this.
    fn dtype(&self) -> DType;

    /// Runs one forward pass over the batch.
    ///
    /// Returns vocabulary logits either for every position, shape
    /// `[B, S, V]`, or for the final position only, shape `[B, V]`.
    fn forward(&self, batch: &BatchInputs) -> Result<Tensor, PreferenceError>;

    /// Short human-readable description used in logs.
    fn model_info(&self) -> String;
}
