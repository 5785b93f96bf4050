//! # OAR Pairwise
//!
//! Pairwise visual preference scoring with a Vision-Language model.
//!
//! For every unordered pair of images in a set, the pair is composited side
//! by side in both orders (A|B and B|A), both composites go through one
//! batched forward pass, and the next-token logits of the two candidate
//! answers (`" L"` and `" R"` by default) are read off the final position.
//! The four numbers `[L, R, iL, iR]` per pair end up in a results table that
//! is written once, after the whole run succeeds.
//!
//! ## Modules
//!
//! * [`core`] - Configuration, constants, error handling, and backend traits
//! * [`pipeline`] - Pair enumeration, the comparison driver, and the results table
//! * [`predictor`] - Per-pair comparison and candidate logit extraction
//! * [`processors`] - Batching of per-composite model inputs
//! * [`utils`] - Image loading and compositing, device and dtype parsing
//! * [`vl`] - Vision-Language model backends (Qwen3-VL)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use oar_pairwise::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source = ModelSource::Hub {
//!     model_id: DEFAULT_MODEL_ID.to_string(),
//!     revision: DEFAULT_MODEL_REVISION.to_string(),
//! };
//! let (processor, model) = load_qwen3_vl(&source, parse_device("cpu")?, parse_dtype("f32")?)?;
//! let ctx = PreferenceContext::new(model, processor, CANDIDATE_TOKEN_STRINGS)?;
//!
//! let config = ComparisonConfig::default();
//! let table = run_comparisons(&ctx, &config)?;
//! table.write_ipc(&config.output)?;
//! # Ok(())
//! # }
//! ```

// Core modules
pub mod core;
pub mod pipeline;
pub mod predictor;
pub mod processors;
pub mod utils;
pub mod vl;

#[cfg(test)]
mod test_support;

/// Prelude module for convenient imports.
///
/// ```rust
/// use oar_pairwise::prelude::*;
/// ```
///
/// For backend internals (preprocessing, chat template layout), import
/// directly from [`vl::qwen3_vl`].
pub mod prelude {
    // Configuration and errors
    pub use crate::core::{
        CANDIDATE_TOKEN_STRINGS, ComparisonConfig, DEFAULT_MODEL_ID, DEFAULT_MODEL_REVISION,
        PreferenceError, PreferenceResult,
    };

    // Comparison run
    pub use crate::pipeline::{ComparisonTable, image_pairs, run_comparisons};
    pub use crate::predictor::{PreferenceContext, PreferenceScores};

    // Backend
    pub use crate::utils::{parse_device, parse_dtype};
    pub use crate::vl::{ModelSource, load_qwen3_vl};
}
