//! Pairwise preference comparator.
//!
//! For a pair of images the comparator builds both side-by-side composites,
//! runs them through the model as one batch of two, and reads the logits of
//! the two candidate answers at the final position. Showing both orderings
//! lets downstream analysis separate a genuine preference from a bias toward
//! one side of the canvas.

use crate::core::traits::{InputProcessor, PreferenceModel};
use crate::core::PreferenceError;
use crate::processors::build_batch;
use crate::utils::{candle_to_inference, concatenate_horizontally, load_rgb_image};
use candle_core::{DType, IndexOp, Tensor};
use std::path::Path;

/// Token ids of the two candidate answers, left answer first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateTokens {
    pub left: u32,
    pub right: u32,
}

impl CandidateTokens {
    /// Encodes the two candidate strings with the processor's tokenizer.
    pub fn encode<P: InputProcessor + ?Sized>(
        processor: &P,
        candidates: [&str; 2],
    ) -> Result<Self, PreferenceError> {
        let ids = processor.encode_candidates(&candidates)?;
        match ids.as_slice() {
            [left, right] if left != right => Ok(Self {
                left: *left,
                right: *right,
            }),
            [_, _] => Err(PreferenceError::config_error(format!(
                "candidate answers {candidates:?} map to the same token id {}",
                ids[0]
            ))),
            _ => Err(PreferenceError::config_error(format!(
                "expected 2 candidate token ids, got {}",
                ids.len()
            ))),
        }
    }

    pub fn ids(&self) -> [u32; 2] {
        [self.left, self.right]
    }
}

/// Candidate logits for both orderings of one pair.
///
/// Layout: `[L | a-left, R | a-left, L | b-left, R | b-left]`, matching the
/// table columns `L`, `R`, `iL`, `iR`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreferenceScores(pub [f32; 4]);

impl PreferenceScores {
    /// Logit of the left answer with `a` on the left.
    pub fn left(&self) -> f32 {
        self.0[0]
    }

    /// Logit of the right answer with `a` on the left.
    pub fn right(&self) -> f32 {
        self.0[1]
    }

    /// Logit of the left answer with `b` on the left.
    pub fn inverted_left(&self) -> f32 {
        self.0[2]
    }

    /// Logit of the right answer with `b` on the left.
    pub fn inverted_right(&self) -> f32 {
        self.0[3]
    }

    pub fn as_array(&self) -> [f32; 4] {
        self.0
    }
}

/// Everything a comparison needs, loaded once and shared by every pair.
#[derive(Debug)]
pub struct PreferenceContext<M, P> {
    model: M,
    processor: P,
    candidates: CandidateTokens,
}

impl<M: PreferenceModel, P: InputProcessor> PreferenceContext<M, P> {
    /// Builds the context, encoding the candidate answers once.
    pub fn new(model: M, processor: P, candidates: [&str; 2]) -> Result<Self, PreferenceError> {
        let candidates = CandidateTokens::encode(&processor, candidates)?;
        tracing::info!(
            model = %model.model_info(),
            left_id = candidates.left,
            right_id = candidates.right,
            "preference context ready"
        );
        Ok(Self {
            model,
            processor,
            candidates,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn candidates(&self) -> CandidateTokens {
        self.candidates
    }

    /// Scores one pair: `path_a | path_b` and `path_b | path_a` in a single
    /// forward pass.
    ///
    /// # Errors
    ///
    /// Image loading errors as in [`load_rgb_image`]; any processor or model
    /// failure is returned unchanged.
    pub fn compare_images(
        &self,
        path_a: &Path,
        path_b: &Path,
        prompt: &str,
    ) -> Result<PreferenceScores, PreferenceError> {
        let img_a = load_rgb_image(path_a)?;
        let img_b = load_rgb_image(path_b)?;
        let composites = [
            concatenate_horizontally(&img_a, &img_b),
            concatenate_horizontally(&img_b, &img_a),
        ];

        let batch = build_batch(
            &self.processor,
            &composites,
            prompt,
            self.model.dtype(),
            self.model.device(),
        )?;
        let logits = self.model.forward(&batch)?;
        let last = last_position_logits(&logits)?;

        select_candidate_logits(&last, self.candidates, composites.len())
    }
}

/// Reduces model output to `[B, V]` logits at the final sequence position.
pub fn last_position_logits(logits: &Tensor) -> Result<Tensor, PreferenceError> {
    let wrap = |e| candle_to_inference("comparator", "select final position", e);
    match logits.dims() {
        [_, seq_len, _] if *seq_len > 0 => logits.i((.., seq_len - 1, ..)).map_err(wrap),
        [_, _] => Ok(logits.clone()),
        dims => Err(PreferenceError::invalid_input(format!(
            "expected logits of shape [B, S, V] or [B, V], got {dims:?}"
        ))),
    }
}

/// Picks the candidate logits from `[B, V]` final-position logits and
/// flattens them sample by sample.
fn select_candidate_logits(
    last: &Tensor,
    candidates: CandidateTokens,
    expected_batch: usize,
) -> Result<PreferenceScores, PreferenceError> {
    let wrap = |e| candle_to_inference("comparator", "select candidate logits", e);
    let (batch, vocab) = last.dims2().map_err(wrap)?;
    if batch != expected_batch {
        return Err(wrap(candle_core::Error::Msg(format!(
            "model returned logits for {batch} samples, expected {expected_batch}"
        ))));
    }
    if let Some(id) = candidates.ids().into_iter().find(|&id| id as usize >= vocab) {
        return Err(PreferenceError::invalid_input(format!(
            "candidate token id {id} is outside the vocabulary of size {vocab}"
        )));
    }

    let ids = Tensor::new(&candidates.ids(), last.device()).map_err(wrap)?;
    let values = last
        .contiguous()
        .and_then(|t| t.index_select(&ids, 1))
        .and_then(|t| t.to_dtype(DType::F32))
        .and_then(|t| t.flatten_all())
        .and_then(|t| t.to_vec1::<f32>())
        .map_err(wrap)?;

    let len = values.len();
    let scores: [f32; 4] = values.try_into().map_err(|_| {
        wrap(candle_core::Error::Msg(format!(
            "expected 4 candidate logits, got {len}"
        )))
    })?;
    tracing::debug!(?scores, "candidate logits");
    Ok(PreferenceScores(scores))
}
