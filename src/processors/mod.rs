//! Input processing shared by every model backend.

pub mod batch;

pub use batch::{BatchInputs, ProcessedInputs, build_batch};
