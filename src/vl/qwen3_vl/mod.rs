//! Qwen3-VL backend.
//!
//! The model architecture comes from `candle-transformers`; this module
//! provides checkpoint resolution, the image and chat-template preprocessing
//! that turns a composite into model inputs, and the glue implementing
//! [`InputProcessor`](crate::core::traits::InputProcessor) and
//! [`PreferenceModel`](crate::core::traits::PreferenceModel).

mod config;
mod model;
mod processing;

pub use config::{Qwen3VlImageSize, Qwen3VlPreprocessorConfig, Qwen3VlSpecialTokens};
pub use model::{
    ModelFiles, ModelSource, Qwen3VlPreferenceModel, Qwen3VlProcessor, load_qwen3_vl,
};
pub use processing::{
    ChatTemplateIds, Qwen3VlImageInputs, assemble_input_ids, find_image_spans, image_to_patches,
    preprocess_image, smart_resize,
};
