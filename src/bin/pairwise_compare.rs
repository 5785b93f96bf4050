//! Pairwise preference scoring over a numbered image set.
//!
//! # Usage
//!
//! ```bash
//! cargo run --release --bin pairwise_compare -- \
//!   --image-dir img \
//!   --num-images 64 \
//!   --output data.arrow
//! ```
//!
//! With no arguments, images `img/01.png` to `img/64.png` are compared with
//! the default Qwen3-VL checkpoint and the table is written to `data.arrow`.

use clap::Parser;
use oar_pairwise::core::{
    ComparisonConfig, DEFAULT_DTYPE, DEFAULT_MODEL_ID, DEFAULT_MODEL_REVISION, init_tracing,
};
use oar_pairwise::pipeline::run_comparisons;
use oar_pairwise::predictor::PreferenceContext;
use oar_pairwise::utils::{parse_device, parse_dtype};
use oar_pairwise::vl::{ModelSource, load_qwen3_vl};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pairwise_compare")]
#[command(about = "Score every pair of images with a Vision-Language model")]
struct Args {
    /// JSON run configuration; command-line flags override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the images named 01.png, 02.png, ...
    #[arg(long)]
    image_dir: Option<PathBuf>,

    /// Number of images in the set
    #[arg(long)]
    num_images: Option<u32>,

    /// Destination of the results table (Arrow IPC)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Hugging Face Hub model id
    #[arg(long, default_value = DEFAULT_MODEL_ID)]
    model: String,

    /// Hub revision (branch, tag, or commit)
    #[arg(long, default_value = DEFAULT_MODEL_REVISION)]
    revision: String,

    /// Local model directory; takes precedence over --model
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Device: cpu | cuda | cuda:N
    #[arg(long, default_value = "cpu")]
    device: String,

    /// Weight and image precision: bf16 | f16 | f32
    #[arg(long, default_value = DEFAULT_DTYPE)]
    dtype: String,
}

impl Args {
    fn comparison_config(&self) -> Result<ComparisonConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => ComparisonConfig::from_path(path)?,
            None => ComparisonConfig::default(),
        };
        if let Some(dir) = &self.image_dir {
            config.image_dir = dir.clone();
        }
        if let Some(n) = self.num_images {
            config.num_images = n;
        }
        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        config.validate()?;
        Ok(config)
    }

    fn model_source(&self) -> ModelSource {
        match &self.model_dir {
            Some(dir) => ModelSource::Local(dir.clone()),
            None => ModelSource::Hub {
                model_id: self.model.clone(),
                revision: self.revision.clone(),
            },
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let config = args.comparison_config()?;
    let device = parse_device(&args.device)?;
    let dtype = parse_dtype(&args.dtype)?;

    let (processor, model) = load_qwen3_vl(&args.model_source(), device, dtype)?;
    let [left, right] = &config.candidate_tokens;
    let ctx = PreferenceContext::new(model, processor, [left.as_str(), right.as_str()])?;

    let table = run_comparisons(&ctx, &config)?;
    table.write_ipc(&config.output)?;
    Ok(())
}
