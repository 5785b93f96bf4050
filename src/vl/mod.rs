//! Vision-language model backends.

pub mod qwen3_vl;

pub use qwen3_vl::{ModelSource, Qwen3VlPreferenceModel, Qwen3VlProcessor, load_qwen3_vl};
