//! CPU mocks of the model backend for unit tests.

use crate::core::traits::{InputProcessor, PreferenceModel};
use crate::core::PreferenceError;
use crate::processors::{BatchInputs, ProcessedInputs};
use crate::utils::candle_to_inference;
use candle_core::{DType, Device, Tensor};
use image::RgbImage;
use std::collections::HashMap;

pub const MOCK_VOCAB_SIZE: usize = 10;
pub const MOCK_LEFT_ID: u32 = 3;
pub const MOCK_RIGHT_ID: u32 = 7;

/// Emits five prompt tokens and one patch per pixel (`D = 3`).
#[derive(Debug)]
pub struct MockProcessor {
    vocab: HashMap<String, Vec<u32>>,
}

impl Default for MockProcessor {
    fn default() -> Self {
        let vocab = HashMap::from([
            (" L".to_string(), vec![MOCK_LEFT_ID]),
            (" R".to_string(), vec![MOCK_RIGHT_ID]),
            (" Left".to_string(), vec![MOCK_LEFT_ID, 1]),
        ]);
        Self { vocab }
    }
}

impl InputProcessor for MockProcessor {
    fn process(&self, image: &RgbImage, _prompt: &str) -> Result<ProcessedInputs, PreferenceError> {
        let (w, h) = image.dimensions();
        let wrap = |e| candle_to_inference("mock", "process", e);

        let input_ids = Tensor::new(&[1u32, 2, 3, w, h], &Device::Cpu).map_err(wrap)?;
        let pixels: Vec<f32> = image.as_raw().iter().map(|&v| f32::from(v)).collect();
        let images =
            Tensor::from_vec(pixels, ((w * h) as usize, 3), &Device::Cpu).map_err(wrap)?;
        let image_grid_thw = Tensor::new(&[1u32, h, w], &Device::Cpu).map_err(wrap)?;

        Ok(ProcessedInputs {
            input_ids,
            images,
            image_grid_thw,
        })
    }

    fn encode_candidates(&self, candidates: &[&str]) -> Result<Vec<u32>, PreferenceError> {
        candidates
            .iter()
            .map(|c| match self.vocab.get(*c).map(Vec::as_slice) {
                Some([id]) => Ok(*id),
                _ => Err(PreferenceError::config_error(format!(
                    "'{c}' is not a single token"
                ))),
            })
            .collect()
    }
}

/// Scores every token at the final position as `0.5 * id + top_left_pixel`.
///
/// The top-left pixel of a composite belongs to its left image, so the two
/// orderings of a pair produce distinguishable logits. Earlier positions are
/// filled with `-100`.
#[derive(Debug)]
pub struct MockModel {
    pub device: Device,
    pub last_position_only: bool,
    pub drop_last_sample: bool,
}

impl Default for MockModel {
    fn default() -> Self {
        Self {
            device: Device::Cpu,
            last_position_only: false,
            drop_last_sample: false,
        }
    }
}

impl MockModel {
    pub fn expected_logit(token: u32, top_left: f32) -> f32 {
        0.5 * token as f32 + top_left
    }
}

impl PreferenceModel for MockModel {
    fn device(&self) -> &Device {
        &self.device
    }

    fn dtype(&self) -> DType {
        DType::F32
    }

    fn forward(&self, batch: &BatchInputs) -> Result<Tensor, PreferenceError> {
        let wrap = |e| candle_to_inference("mock", "forward", e);
        let (b, s) = batch.input_ids.dims2().map_err(wrap)?;
        let images = batch
            .images
            .to_dtype(DType::F32)
            .and_then(|t| t.to_vec3::<f32>())
            .map_err(wrap)?;

        let b_out = if self.drop_last_sample { b - 1 } else { b };
        let mut data = vec![-100f32; b_out * s * MOCK_VOCAB_SIZE];
        for (i, sample) in images.iter().take(b_out).enumerate() {
            let top_left = sample[0][0];
            let base = i * s * MOCK_VOCAB_SIZE + (s - 1) * MOCK_VOCAB_SIZE;
            for v in 0..MOCK_VOCAB_SIZE {
                data[base + v] = Self::expected_logit(v as u32, top_left);
            }
        }

        let logits =
            Tensor::from_vec(data, (b_out, s, MOCK_VOCAB_SIZE), &self.device).map_err(wrap)?;
        if self.last_position_only {
            logits.narrow(1, s - 1, 1).and_then(|t| t.squeeze(1)).map_err(wrap)
        } else {
            Ok(logits)
        }
    }

    fn model_info(&self) -> String {
        "mock".to_string()
    }
}
