//! Batched model inputs.
//!
//! A processor turns one (image, prompt) pair into a [`ProcessedInputs`]. The
//! comparator needs both orderings of a pair in a single forward pass, so
//! [`build_batch`] processes each composite on its own and stacks the results
//! field by field into a [`BatchInputs`].

use crate::core::traits::InputProcessor;
use crate::core::{PreferenceError, ProcessingStage};
use crate::utils::candle_to_processing;
use candle_core::{DType, Device, Tensor};
use image::RgbImage;

/// Model inputs for a single image and prompt.
#[derive(Debug, Clone)]
pub struct ProcessedInputs {
    /// Prompt token ids including the image placeholder span, shape `[S]`, u32.
    pub input_ids: Tensor,
    /// Flattened image patches, shape `[P, D]`.
    pub images: Tensor,
    /// Patch grid as `(temporal, height, width)`, shape `[3]`, u32.
    pub image_grid_thw: Tensor,
}

/// Model inputs for `K` samples with a leading batch dimension on every field.
#[derive(Debug, Clone)]
pub struct BatchInputs {
    /// Shape `[K, S]`, u32.
    pub input_ids: Tensor,
    /// Shape `[K, P, D]`, cast to the requested precision.
    pub images: Tensor,
    /// Shape `[K, 3]`, u32.
    pub image_grid_thw: Tensor,
}

impl BatchInputs {
    /// Number of samples in the batch.
    pub fn batch_size(&self) -> usize {
        self.input_ids.dims().first().copied().unwrap_or(0)
    }

    /// Sequence length shared by every sample.
    pub fn seq_len(&self) -> usize {
        self.input_ids.dims().get(1).copied().unwrap_or(0)
    }
}

fn stack_field(
    field: &str,
    tensors: &[&Tensor],
    device: &Device,
) -> Result<Tensor, PreferenceError> {
    if let Some(first) = tensors.first()
        && let Some((idx, other)) = tensors
            .iter()
            .enumerate()
            .find(|(_, t)| t.dims() != first.dims())
    {
        return Err(PreferenceError::batch_processing(
            &format!("cannot batch field '{field}'"),
            candle_core::Error::Msg(format!(
                "sample 0 has shape {:?} but sample {idx} has shape {:?}",
                first.dims(),
                other.dims()
            )),
        ));
    }

    Tensor::stack(tensors, 0)
        .and_then(|t| t.to_device(device))
        .map_err(|e| {
            candle_to_processing(
                ProcessingStage::BatchProcessing,
                format!("failed to stack field '{field}'"),
                e,
            )
        })
}

/// Processes every image with the same prompt and stacks the results.
///
/// Each image goes through the processor as a single-image call. The three
/// fields are then stacked along a new leading dimension and moved to
/// `device`; `images` is cast to `dtype` after stacking.
///
/// # Errors
///
/// * [`PreferenceError::InvalidInput`] if `images` is empty.
/// * [`PreferenceError::Processing`] with [`ProcessingStage::BatchProcessing`]
///   if the processed samples do not share a shape.
/// * Any error reported by the processor.
pub fn build_batch<P: InputProcessor + ?Sized>(
    processor: &P,
    images: &[RgbImage],
    prompt: &str,
    dtype: DType,
    device: &Device,
) -> Result<BatchInputs, PreferenceError> {
    if images.is_empty() {
        return Err(PreferenceError::invalid_input(
            "build_batch requires at least one image",
        ));
    }

    let processed = images
        .iter()
        .map(|image| processor.process(image, prompt))
        .collect::<Result<Vec<_>, _>>()?;

    let input_ids: Vec<&Tensor> = processed.iter().map(|p| &p.input_ids).collect();
    let pixel_values: Vec<&Tensor> = processed.iter().map(|p| &p.images).collect();
    let grids: Vec<&Tensor> = processed.iter().map(|p| &p.image_grid_thw).collect();

    let input_ids = stack_field("input_ids", &input_ids, device)?;
    let image_grid_thw = stack_field("image_grid_thw", &grids, device)?;
    let images = stack_field("images", &pixel_values, device)?
        .to_dtype(dtype)
        .map_err(|e| {
            candle_to_processing(
                ProcessingStage::TensorOperation,
                format!("failed to cast images to {dtype:?}"),
                e,
            )
        })?;

    tracing::debug!(
        batch = processed.len(),
        input_ids = ?input_ids.dims(),
        images = ?images.dims(),
        "built batch"
    );

    Ok(BatchInputs {
        input_ids,
        images,
        image_grid_thw,
    })
}
