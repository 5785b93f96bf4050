//! Predictors built on top of a model backend.

pub mod comparator;

pub use comparator::{CandidateTokens, PreferenceContext, PreferenceScores, last_position_logits};
