//! The core module of the scoring pipeline.
//!
//! This module contains the pieces every other module builds on:
//! - Constants describing the default comparison run
//! - Run configuration
//! - Error handling
//! - Traits separating model backends from the comparison logic

pub mod config;
pub mod constants;
pub mod errors;
pub mod traits;

pub use config::ComparisonConfig;
pub use constants::*;
pub use errors::{PreferenceError, PreferenceResult, ProcessingStage};
pub use traits::{InputProcessor, PreferenceModel};

/// Initializes the tracing subscriber for logging.
///
/// Honors `RUST_LOG`; falls back to `info` when it is unset so that per-pair
/// progress is visible by default.
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
