use super::config::{Qwen3VlPreprocessorConfig, Qwen3VlSpecialTokens};
use super::processing::{ChatTemplateIds, assemble_input_ids, find_image_spans, preprocess_image};
use crate::core::traits::{InputProcessor, PreferenceModel};
use crate::core::{PreferenceError, ProcessingStage};
use crate::processors::{BatchInputs, ProcessedInputs};
use crate::utils::{candle_to_inference, candle_to_processing};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::qwen3_vl::{Config, Qwen3VLModel};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use image::RgbImage;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokenizers::Tokenizer;

const MODEL_NAME: &str = "Qwen3-VL";

/// Upper bound on the rotary table and KV cache. A comparison prompt is one
/// composite plus a short instruction, far below the checkpoint's native
/// context length.
const MAX_SEQ_LEN: usize = 8192;

/// Positions kept free for the chat template and the prompt when sizing the
/// image token budget.
const TEXT_TOKEN_RESERVE: usize = 512;

/// Where to find the checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// Download (or reuse the cached copy of) a Hugging Face Hub repository.
    Hub { model_id: String, revision: String },
    /// A directory with `config.json`, `tokenizer.json`, and safetensors weights.
    Local(PathBuf),
}

/// Resolved paths of the files a checkpoint consists of.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub preprocessor: Option<PathBuf>,
    pub weights: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct SafetensorsIndex {
    weight_map: HashMap<String, String>,
}

/// Shard file names listed in a `model.safetensors.index.json`, deduplicated and sorted.
fn shard_names(index_path: &Path) -> Result<Vec<String>, PreferenceError> {
    let contents = std::fs::read_to_string(index_path)?;
    let index: SafetensorsIndex = serde_json::from_str(&contents).map_err(|e| {
        PreferenceError::config_error(format!(
            "failed to parse {}: {e}",
            index_path.display()
        ))
    })?;
    let names: BTreeSet<String> = index.weight_map.into_values().collect();
    Ok(names.into_iter().collect())
}

impl ModelSource {
    pub fn resolve(&self) -> Result<ModelFiles, PreferenceError> {
        match self {
            ModelSource::Local(dir) => resolve_local(dir),
            ModelSource::Hub { model_id, revision } => resolve_hub(model_id, revision),
        }
    }
}

fn resolve_local(dir: &Path) -> Result<ModelFiles, PreferenceError> {
    if !dir.is_dir() {
        return Err(PreferenceError::config_error(format!(
            "model directory not found: {}",
            dir.display()
        )));
    }
    let require = |name: &str| -> Result<PathBuf, PreferenceError> {
        let path = dir.join(name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(PreferenceError::config_error(format!(
                "{name} not found in model directory {}",
                dir.display()
            )))
        }
    };

    let index = dir.join("model.safetensors.index.json");
    let weights = if index.is_file() {
        shard_names(&index)?
            .iter()
            .map(|name| require(name.as_str()))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        vec![require("model.safetensors")?]
    };
    let preprocessor = Some(dir.join("preprocessor_config.json")).filter(|p| p.is_file());

    Ok(ModelFiles {
        config: require("config.json")?,
        tokenizer: require("tokenizer.json")?,
        preprocessor,
        weights,
    })
}

fn resolve_hub(model_id: &str, revision: &str) -> Result<ModelFiles, PreferenceError> {
    let hub_err = |what: &str, e: hf_hub::api::sync::ApiError| {
        PreferenceError::inference(MODEL_NAME, format!("fetch {what} from {model_id}"), e)
    };

    let api = Api::new().map_err(|e| hub_err("api client", e))?;
    let repo = api.repo(Repo::with_revision(
        model_id.to_string(),
        RepoType::Model,
        revision.to_string(),
    ));

    let config = repo.get("config.json").map_err(|e| hub_err("config.json", e))?;
    let tokenizer = repo
        .get("tokenizer.json")
        .map_err(|e| hub_err("tokenizer.json", e))?;
    let preprocessor = repo.get("preprocessor_config.json").ok();

    let weights = match repo.get("model.safetensors.index.json") {
        Ok(index) => shard_names(&index)?
            .iter()
            .map(|name| repo.get(name).map_err(|e| hub_err(name.as_str(), e)))
            .collect::<Result<Vec<_>, _>>()?,
        Err(_) => vec![
            repo.get("model.safetensors")
                .map_err(|e| hub_err("model.safetensors", e))?,
        ],
    };

    Ok(ModelFiles {
        config,
        tokenizer,
        preprocessor,
        weights,
    })
}

/// Turns composites into Qwen3-VL chat inputs.
pub struct Qwen3VlProcessor {
    tokenizer: Tokenizer,
    image_cfg: Qwen3VlPreprocessorConfig,
    special: Qwen3VlSpecialTokens,
    template: ChatTemplateIds,
    max_seq_len: usize,
}

impl std::fmt::Debug for Qwen3VlProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Qwen3VlProcessor")
            .field("image_cfg", &self.image_cfg)
            .field("special", &self.special)
            .field("max_seq_len", &self.max_seq_len)
            .finish_non_exhaustive()
    }
}

impl Qwen3VlProcessor {
    /// Builds the processor for a checkpoint.
    ///
    /// The image pixel budget is lowered so that a composite's placeholder
    /// span, plus a reserve of text positions, fits the model's
    /// `max_position_embeddings`.
    pub fn new(
        tokenizer: Tokenizer,
        mut image_cfg: Qwen3VlPreprocessorConfig,
        config: &Config,
    ) -> Result<Self, PreferenceError> {
        image_cfg.validate()?;
        let max_seq_len = config.text_config.max_position_embeddings;
        let max_image_tokens = max_seq_len.saturating_sub(TEXT_TOKEN_RESERVE);
        if max_image_tokens == 0 {
            return Err(PreferenceError::config_error(format!(
                "Qwen3-VL max_position_embeddings {max_seq_len} leaves no room for image tokens"
            )));
        }
        image_cfg.limit_image_tokens(max_image_tokens);
        let vision = &config.vision_config;
        if image_cfg.patch_size != vision.patch_size
            || image_cfg.merge_size != vision.spatial_merge_size
            || image_cfg.temporal_patch_size != vision.temporal_patch_size
        {
            return Err(PreferenceError::config_error(format!(
                "Qwen3-VL preprocessor geometry (patch {}, merge {}, temporal {}) does not match \
                 vision config (patch {}, merge {}, temporal {})",
                image_cfg.patch_size,
                image_cfg.merge_size,
                image_cfg.temporal_patch_size,
                vision.patch_size,
                vision.spatial_merge_size,
                vision.temporal_patch_size
            )));
        }

        let token = |name: &str| {
            tokenizer.token_to_id(name).ok_or_else(|| {
                PreferenceError::config_error(format!("Qwen3-VL tokenizer is missing {name}"))
            })
        };
        let special = Qwen3VlSpecialTokens {
            im_start: token("<|im_start|>")?,
            im_end: token("<|im_end|>")?,
            vision_start: config.vision_start_token_id,
            vision_end: config.vision_end_token_id,
            image_pad: config.image_token_id,
        };
        let tok_image_pad = token("<|image_pad|>")?;
        if tok_image_pad != special.image_pad {
            return Err(PreferenceError::config_error(format!(
                "Qwen3-VL image_token_id mismatch: tokenizer {tok_image_pad} != config {}",
                special.image_pad
            )));
        }

        let template = ChatTemplateIds {
            user_header: encode(&tokenizer, "user\n")?,
            assistant_header: encode(&tokenizer, "assistant\n")?,
            newline: encode(&tokenizer, "\n")?,
        };

        Ok(Self {
            tokenizer,
            image_cfg,
            special,
            template,
            max_seq_len,
        })
    }
}

fn encode(tokenizer: &Tokenizer, text: &str) -> Result<Vec<u32>, PreferenceError> {
    tokenizer
        .encode(text, false)
        .map(|enc| enc.get_ids().to_vec())
        .map_err(|source| PreferenceError::Processing {
            kind: ProcessingStage::Tokenization,
            context: format!("Qwen3-VL: failed to encode {text:?}"),
            source,
        })
}

impl InputProcessor for Qwen3VlProcessor {
    fn process(&self, image: &RgbImage, prompt: &str) -> Result<ProcessedInputs, PreferenceError> {
        let image_inputs = preprocess_image(image, &self.image_cfg)?;
        let num_image_tokens = image_inputs.num_image_tokens(self.image_cfg.merge_size);

        let prompt_ids = encode(&self.tokenizer, prompt)?;
        let ids = assemble_input_ids(&self.special, &self.template, &prompt_ids, num_image_tokens);
        if ids.len() > self.max_seq_len {
            return Err(PreferenceError::invalid_input(format!(
                "Qwen3-VL input has {} tokens ({num_image_tokens} image, {} prompt), \
                 more than the {} supported positions",
                ids.len(),
                prompt_ids.len(),
                self.max_seq_len
            )));
        }

        let wrap = |e| {
            candle_to_processing(
                ProcessingStage::TensorOperation,
                "Qwen3-VL: failed to build input tensors",
                e,
            )
        };
        let input_ids = Tensor::new(ids.as_slice(), &Device::Cpu).map_err(wrap)?;
        let image_grid_thw = Tensor::new(
            &[1u32, image_inputs.grid_h as u32, image_inputs.grid_w as u32],
            &Device::Cpu,
        )
        .map_err(wrap)?;

        tracing::debug!(
            seq_len = ids.len(),
            num_image_tokens,
            grid_h = image_inputs.grid_h,
            grid_w = image_inputs.grid_w,
            "processed composite"
        );

        Ok(ProcessedInputs {
            input_ids,
            images: image_inputs.patches,
            image_grid_thw,
        })
    }

    fn encode_candidates(&self, candidates: &[&str]) -> Result<Vec<u32>, PreferenceError> {
        candidates
            .iter()
            .map(|candidate| match encode(&self.tokenizer, candidate)?.as_slice() {
                [id] => Ok(*id),
                ids => Err(PreferenceError::config_error(format!(
                    "candidate {candidate:?} must be a single token, got ids {ids:?}"
                ))),
            })
            .collect()
    }
}

/// Qwen3-VL weights from `candle-transformers` behind [`PreferenceModel`].
///
/// The text layers of [`Qwen3VLModel`] append every forward pass to their KV
/// cache and offer no way to reset it. Each call to
/// [`PreferenceModel::forward`] therefore builds a fresh model over the
/// loaded weights, so one pair never attends to another pair's keys.
pub struct Qwen3VlPreferenceModel {
    config: Config,
    weights: VarBuilder<'static>,
    device: Device,
    dtype: DType,
    image_token_id: u32,
    model_id: String,
}

impl std::fmt::Debug for Qwen3VlPreferenceModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Qwen3VlPreferenceModel")
            .field("model_id", &self.model_id)
            .field("device", &self.device)
            .field("dtype", &self.dtype)
            .finish_non_exhaustive()
    }
}

impl Qwen3VlPreferenceModel {
    /// Wraps already loaded weights. Builds the model once to check that every
    /// tensor the architecture needs is present.
    pub fn new(
        config: Config,
        weights: VarBuilder<'static>,
        model_id: impl Into<String>,
    ) -> Result<Self, PreferenceError> {
        let model = Self {
            device: weights.device().clone(),
            dtype: weights.dtype(),
            image_token_id: config.image_token_id,
            model_id: model_id.into(),
            config,
            weights,
        };
        model.build()?;
        Ok(model)
    }

    fn build(&self) -> Result<Qwen3VLModel, PreferenceError> {
        Qwen3VLModel::new(&self.config, self.weights.clone())
            .map_err(|e| candle_to_inference(MODEL_NAME, "build model", e))
    }
}

impl PreferenceModel for Qwen3VlPreferenceModel {
    fn device(&self) -> &Device {
        &self.device
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn forward(&self, batch: &BatchInputs) -> Result<Tensor, PreferenceError> {
        let batch_size = batch.batch_size();
        let seq_len = batch.seq_len();

        let rows = batch
            .input_ids
            .to_vec2::<u32>()
            .map_err(|e| candle_to_inference(MODEL_NAME, "read input_ids", e))?;
        let image_spans: Vec<Vec<(usize, usize)>> = rows
            .iter()
            .map(|row| find_image_spans(row, self.image_token_id))
            .collect();

        // The vision tower takes every sample's patches as one sequence.
        let pixel_values = batch
            .images
            .flatten(0, 1)
            .map_err(|e| candle_to_inference(MODEL_NAME, "flatten image patches", e))?;

        self.build()?
            .forward(
                &batch.input_ids,
                Some(pixel_values),
                None,
                Some(batch.image_grid_thw.clone()),
                None,
                vec![seq_len; batch_size],
                image_spans,
                vec![vec![]; batch_size],
                &vec![0; batch_size],
            )
            .map_err(|e| candle_to_inference(MODEL_NAME, "forward", e))
    }

    fn model_info(&self) -> String {
        format!("{MODEL_NAME} {} on {:?} ({:?})", self.model_id, self.device, self.dtype)
    }
}

/// Loads the processor and model of a Qwen3-VL checkpoint.
///
/// Everything heavy happens here, once per run: weight download and loading,
/// tokenizer parsing, and model construction.
pub fn load_qwen3_vl(
    source: &ModelSource,
    device: Device,
    dtype: DType,
) -> Result<(Qwen3VlProcessor, Qwen3VlPreferenceModel), PreferenceError> {
    let start = Instant::now();
    let files = source.resolve()?;
    let model_id = match source {
        ModelSource::Hub { model_id, .. } => model_id.clone(),
        ModelSource::Local(dir) => dir.display().to_string(),
    };

    let contents = std::fs::read_to_string(&files.config)?;
    let mut config: Config = serde_json::from_str(&contents).map_err(|e| {
        PreferenceError::config_error(format!("failed to parse Qwen3-VL config.json: {e}"))
    })?;
    if config.text_config.max_position_embeddings > MAX_SEQ_LEN {
        tracing::debug!(
            from = config.text_config.max_position_embeddings,
            to = MAX_SEQ_LEN,
            "capping max_position_embeddings"
        );
        config.text_config.max_position_embeddings = MAX_SEQ_LEN;
    }

    let tokenizer = Tokenizer::from_file(&files.tokenizer).map_err(|source| {
        PreferenceError::Inference {
            model_name: MODEL_NAME.to_string(),
            context: "load tokenizer.json".to_string(),
            source,
        }
    })?;
    let image_cfg = match &files.preprocessor {
        Some(path) => Qwen3VlPreprocessorConfig::from_path(path)?,
        None => Qwen3VlPreprocessorConfig::default(),
    };
    let processor = Qwen3VlProcessor::new(tokenizer, image_cfg, &config)?;

    tracing::info!(
        model = %model_id,
        shards = files.weights.len(),
        ?device,
        ?dtype,
        "loading {MODEL_NAME} weights"
    );
    let tensors = load_weights(&files.weights, dtype, &device)?;
    let weights = VarBuilder::from_tensors(tensors, dtype, &device);
    let model = Qwen3VlPreferenceModel::new(config, weights, model_id)?;

    tracing::info!(
        "{MODEL_NAME} loaded in {:.2}s",
        start.elapsed().as_secs_f64()
    );

    Ok((processor, model))
}

/// Reads every shard onto `device` once, casting floating point tensors to `dtype`.
fn load_weights(
    paths: &[PathBuf],
    dtype: DType,
    device: &Device,
) -> Result<HashMap<String, Tensor>, PreferenceError> {
    let mut tensors = HashMap::new();
    for path in paths {
        let context = || format!("load {}", path.display());
        let shard = candle_core::safetensors::load(path, device)
            .map_err(|e| candle_to_inference(MODEL_NAME, context(), e))?;
        for (name, tensor) in shard {
            let tensor = if tensor.dtype().is_float() {
                tensor
                    .to_dtype(dtype)
                    .map_err(|e| candle_to_inference(MODEL_NAME, context(), e))?
            } else {
                tensor
            };
            tensors.insert(name, tensor);
        }
    }
    Ok(tensors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;
    use tempfile::TempDir;

    const TINY_IMAGE_TOKEN: u32 = 5;

    fn tiny_config() -> Config {
        serde_json::from_str(
            r#"{
            "text_config": {"head_dim": 8, "vocab_size": 32, "hidden_size": 16,
                "intermediate_size": 32, "num_hidden_layers": 2, "num_attention_heads": 2,
                "num_key_value_heads": 1, "hidden_act": "silu", "max_position_embeddings": 64,
                "rms_norm_eps": 1e-6, "tie_word_embeddings": false, "rope_theta": 10000.0,
                "sliding_window": null},
            "vision_config": {"depth": 1, "hidden_size": 16, "out_hidden_size": 16,
                "intermediate_size": 32, "num_heads": 2, "patch_size": 2,
                "spatial_merge_size": 2, "temporal_patch_size": 2,
                "num_position_embeddings": 16, "deepstack_visual_indexes": []},
            "image_token_id": 5, "video_token_id": 6,
            "vision_start_token_id": 3, "vision_end_token_id": 4
        }"#,
        )
        .unwrap()
    }

    /// Two-layer model with random weights held in `varmap`.
    fn tiny_model(varmap: &VarMap) -> Qwen3VlPreferenceModel {
        let weights = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        Qwen3VlPreferenceModel::new(tiny_config(), weights, "tiny").unwrap()
    }

    /// Batch of two samples, each one 2x2 patch grid merged into a single image token.
    fn tiny_batch(phase: f32) -> BatchInputs {
        let ids = [1u32, 3, TINY_IMAGE_TOKEN, 4, 7, 8, 9, 2];
        let input_ids = Tensor::new(&[ids, ids], &Device::Cpu).unwrap();
        let data: Vec<f32> = (0..2 * 4 * 24)
            .map(|i| (i as f32 * 0.37 + phase).sin())
            .collect();
        let images = Tensor::from_vec(data, (2, 4, 24), &Device::Cpu).unwrap();
        let image_grid_thw = Tensor::new(&[[1u32, 2, 2], [1, 2, 2]], &Device::Cpu).unwrap();
        BatchInputs {
            input_ids,
            images,
            image_grid_thw,
        }
    }

    fn final_logits(model: &Qwen3VlPreferenceModel, batch: &BatchInputs) -> Vec<Vec<f32>> {
        crate::predictor::last_position_logits(&model.forward(batch).unwrap())
            .unwrap()
            .to_vec2::<f32>()
            .unwrap()
    }

    #[test]
    fn test_forward_scores_each_batch_independently() {
        let varmap = VarMap::new();
        let model = tiny_model(&varmap);
        let batch = tiny_batch(0.0);

        let first = final_logits(&model, &batch);
        let _ = final_logits(&model, &tiny_batch(1.5));
        let again = final_logits(&model, &batch);

        assert_eq!(first.len(), 2);
        assert_eq!(first[0].len(), 32);
        assert_eq!(first, again);
    }

    #[test]
    fn test_forward_matches_freshly_built_model() {
        let varmap = VarMap::new();
        let model = tiny_model(&varmap);
        for phase in [0.3, 0.7, 1.1] {
            let _ = final_logits(&model, &tiny_batch(phase));
        }

        let fresh = tiny_model(&varmap);
        let batch = tiny_batch(2.0);
        assert_eq!(final_logits(&model, &batch), final_logits(&fresh, &batch));
    }

    #[test]
    fn test_shard_names_deduplicated() {
        let dir = TempDir::new().unwrap();
        let index = dir.path().join("model.safetensors.index.json");
        std::fs::write(
            &index,
            r#"{"metadata": {"total_size": 1}, "weight_map": {
                "a.weight": "model-00002-of-00002.safetensors",
                "b.weight": "model-00001-of-00002.safetensors",
                "c.weight": "model-00002-of-00002.safetensors"
            }}"#,
        )
        .unwrap();

        assert_eq!(
            shard_names(&index).unwrap(),
            [
                "model-00001-of-00002.safetensors",
                "model-00002-of-00002.safetensors"
            ]
        );
    }

    #[test]
    fn test_local_source_requires_directory() {
        let err = ModelSource::Local(PathBuf::from("/nonexistent/qwen3-vl"))
            .resolve()
            .unwrap_err();
        assert!(matches!(err, PreferenceError::ConfigError { .. }));
    }

    #[test]
    fn test_local_source_reports_missing_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("model.safetensors"), b"").unwrap();
        std::fs::write(dir.path().join("config.json"), b"{}").unwrap();

        let err = ModelSource::Local(dir.path().to_path_buf())
            .resolve()
            .unwrap_err();
        assert!(err.to_string().contains("tokenizer.json"));
    }

    #[test]
    fn test_local_source_resolves_single_file_checkpoint() {
        let dir = TempDir::new().unwrap();
        for name in ["model.safetensors", "config.json", "tokenizer.json"] {
            std::fs::write(dir.path().join(name), b"{}").unwrap();
        }

        let files = ModelSource::Local(dir.path().to_path_buf())
            .resolve()
            .unwrap();
        assert_eq!(files.weights, [dir.path().join("model.safetensors")]);
        assert!(files.preprocessor.is_none());
    }
}
