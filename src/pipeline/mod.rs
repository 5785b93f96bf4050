//! Comparison run orchestration and its results table.

pub mod driver;
pub mod table;

pub use driver::{image_pairs, image_path, run_comparisons};
pub use table::{ComparisonRow, ComparisonTable};
