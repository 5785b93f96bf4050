//! Constants used throughout the scoring pipeline.
//!
//! This module defines the defaults for a comparison run: the instruction
//! shown to the model, the two candidate answers whose logits are recorded,
//! the image set layout, and the model checkpoint.

/// The default instruction shown alongside every composite image.
///
/// The model is expected to answer with a single `L` or `R`; only the logits
/// of those two answers are recorded.
pub const DEFAULT_PROMPT: &str = "This image contains two pictures: one in the left half (L), and one on the right half (R). You must indicate which picture you prefer by simply stating \"L\" or \"R\" followed by a newline.

The image I prefer is:";

/// The candidate answers, in column order. The leading space matters: it is
/// how the tokenizer sees the first word of a continuation.
pub const CANDIDATE_TOKEN_STRINGS: [&str; 2] = [" L", " R"];

/// Number of images in the default set, indexed `1..=DEFAULT_NUM_IMAGES`.
pub const DEFAULT_NUM_IMAGES: u32 = 64;

/// Directory holding `01.png`, `02.png`, ...
pub const DEFAULT_IMAGE_DIR: &str = "img";

/// Where the results table is written.
pub const DEFAULT_OUTPUT_PATH: &str = "data.arrow";

/// Hugging Face Hub checkpoint used when no local model directory is given.
pub const DEFAULT_MODEL_ID: &str = "Qwen/Qwen3-VL-2B-Instruct";

/// Hub revision used for [`DEFAULT_MODEL_ID`].
pub const DEFAULT_MODEL_REVISION: &str = "main";

/// Numeric precision of the image tensor and model weights.
pub const DEFAULT_DTYPE: &str = "bf16";

/// Column names of the results table, matching the score vector layout.
pub const SCORE_COLUMNS: [&str; 4] = ["L", "R", "iL", "iR"];

/// Names of the two-level row key.
pub const INDEX_COLUMNS: [&str; 2] = ["img_a", "img_b"];
