//! Error types for pairwise preference scoring.
//!
//! This module defines the errors that can occur while compositing images,
//! building batched model inputs, running inference, and persisting the
//! results table. It also provides helper constructors for attaching context
//! to underlying errors.

use std::path::PathBuf;
use thiserror::Error;

/// Enum representing different stages of processing in the scoring pipeline.
///
/// This enum is used to identify which stage an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Error occurred during tensor operations.
    TensorOperation,
    /// Error occurred while preparing an image for the model.
    ImagePreprocessing,
    /// Error occurred while tokenizing text.
    Tokenization,
    /// Error occurred while stacking per-sample inputs into a batch.
    BatchProcessing,
    /// Generic processing error.
    Generic,
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStage::TensorOperation => write!(f, "tensor operation"),
            ProcessingStage::ImagePreprocessing => write!(f, "image preprocessing"),
            ProcessingStage::Tokenization => write!(f, "tokenization"),
            ProcessingStage::BatchProcessing => write!(f, "batch processing"),
            ProcessingStage::Generic => write!(f, "processing"),
        }
    }
}

/// Enum representing the errors that can occur while scoring image pairs.
#[derive(Error, Debug)]
pub enum PreferenceError {
    /// An input image path did not resolve to a file.
    #[error("could not find image file: {}", path.display())]
    ImageNotFound {
        /// The path that was requested.
        path: PathBuf,
    },

    /// An input image exists but could not be read or decoded.
    #[error("error processing image {}: {source}", path.display())]
    ImageIo {
        /// The path of the offending image.
        path: PathBuf,
        /// The underlying decode or read error.
        #[source]
        source: image::ImageError,
    },

    /// Error occurred during processing.
    #[error("{kind} failed: {context}")]
    Processing {
        /// The stage of processing where the error occurred.
        kind: ProcessingStage,
        /// Additional context about the error.
        context: String,
        /// The underlying error that caused this error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Error occurred while loading or running the model.
    #[error("{model_name} inference failed: {context}")]
    Inference {
        /// Name of the model backend.
        model_name: String,
        /// What the backend was doing when it failed.
        context: String,
        /// The underlying error that caused this error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Error indicating invalid input.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// A message describing the invalid input.
        message: String,
    },

    /// Error indicating a configuration problem.
    #[error("configuration: {message}")]
    ConfigError {
        /// A message describing the configuration error.
        message: String,
    },

    /// Error while encoding or decoding the results table.
    #[error("results table")]
    Table(#[from] arrow::error::ArrowError),

    /// IO error.
    #[error("io")]
    Io(#[from] std::io::Error),
}

/// Convenient result alias for scoring operations.
pub type PreferenceResult<T> = Result<T, PreferenceError>;

impl PreferenceError {
    /// Creates an error for tensor operations.
    ///
    /// # Arguments
    ///
    /// * `context` - Additional context about the error.
    /// * `error` - The underlying error that caused this error.
    pub fn tensor_operation(
        context: &str,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Processing {
            kind: ProcessingStage::TensorOperation,
            context: context.to_string(),
            source: Box::new(error),
        }
    }

    /// Creates an error for batch assembly.
    ///
    /// # Arguments
    ///
    /// * `context` - Additional context about the error.
    /// * `error` - The underlying error that caused this error.
    pub fn batch_processing(
        context: &str,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Processing {
            kind: ProcessingStage::BatchProcessing,
            context: context.to_string(),
            source: Box::new(error),
        }
    }

    /// Creates an error for a failed model operation.
    pub fn inference(
        model_name: &str,
        context: impl Into<String>,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Inference {
            model_name: model_name.to_string(),
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Creates an error for invalid input.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates an error for configuration problems.
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Creates a configuration error naming the offending field and value.
    pub fn config_error_with_context(field: &str, value: &str, reason: &str) -> Self {
        Self::ConfigError {
            message: format!(
                "Configuration error in field '{}' with value '{}': {}",
                field, value, reason
            ),
        }
    }

    /// Returns true if this error reports a missing input image.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ImageNotFound { .. })
    }
}
