//! Utility functions for the scoring pipeline.
//!
//! This module provides image loading and compositing, Candle device and
//! dtype parsing, and helpers for turning Candle errors into
//! [`PreferenceError`]s with context.

pub mod device;
pub mod image;

use crate::core::{PreferenceError, ProcessingStage};

pub use device::{parse_device, parse_dtype};
pub use image::{
    concatenate_horizontally, concatenate_images_horizontally, dynamic_to_rgb, load_rgb_image,
};

/// Convert Candle error to PreferenceError for model operations.
pub fn candle_to_inference(
    model_name: &str,
    context: impl Into<String>,
    err: candle_core::Error,
) -> PreferenceError {
    PreferenceError::inference(model_name, context, err)
}

/// Convert Candle error to PreferenceError for processing operations.
pub fn candle_to_processing(
    kind: ProcessingStage,
    context: impl Into<String>,
    err: candle_core::Error,
) -> PreferenceError {
    PreferenceError::Processing {
        kind,
        context: context.into(),
        source: Box::new(err),
    }
}
