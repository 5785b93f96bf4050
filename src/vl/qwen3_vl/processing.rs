use super::config::{Qwen3VlPreprocessorConfig, Qwen3VlSpecialTokens};
use crate::core::{PreferenceError, ProcessingStage};
use crate::utils::candle_to_processing;
use candle_core::{Device, Tensor};
use image::RgbImage;
use image::imageops::FilterType;

#[derive(Debug)]
pub struct Qwen3VlImageInputs {
    /// Flattened patches, shape `[grid_h * grid_w, 3 * temporal * patch * patch]`, f32.
    pub patches: Tensor,
    pub grid_h: usize,
    pub grid_w: usize,
}

impl Qwen3VlImageInputs {
    /// Number of `<|image_pad|>` tokens after spatial merging.
    pub fn num_image_tokens(&self, merge_size: usize) -> usize {
        (self.grid_h / merge_size) * (self.grid_w / merge_size)
    }
}

/// Smart resize calculating new dimensions based on pixel constraints and factor alignment.
///
/// Both output sides are multiples of `factor` and the area lands within
/// `[min_pixels, max_pixels]` while keeping the aspect ratio close to the input.
pub fn smart_resize(
    height: u32,
    width: u32,
    factor: u32,
    min_pixels: u32,
    max_pixels: u32,
) -> Result<(u32, u32), PreferenceError> {
    if factor == 0 {
        return Err(PreferenceError::invalid_input(
            "smart_resize: factor must be > 0",
        ));
    }
    if height == 0 || width == 0 {
        return Err(PreferenceError::invalid_input(format!(
            "smart_resize: empty image {width}x{height}"
        )));
    }

    let height = height as f64;
    let width = width as f64;
    let factor_f = factor as f64;

    let max_dim = height.max(width);
    let min_dim = height.min(width);
    if max_dim / min_dim > 200.0 {
        return Err(PreferenceError::invalid_input(format!(
            "smart_resize: absolute aspect ratio must be <= 200, got {:.3}",
            max_dim / min_dim
        )));
    }

    let mut h_bar = (height / factor_f).round() * factor_f;
    let mut w_bar = (width / factor_f).round() * factor_f;

    let area = h_bar * w_bar;
    if area > max_pixels as f64 {
        let beta = ((height * width) / max_pixels as f64).sqrt();
        h_bar = ((height / beta) / factor_f).floor() * factor_f;
        w_bar = ((width / beta) / factor_f).floor() * factor_f;
    } else if area < min_pixels as f64 {
        let beta = (min_pixels as f64 / (height * width)).sqrt();
        h_bar = ((height * beta) / factor_f).ceil() * factor_f;
        w_bar = ((width * beta) / factor_f).ceil() * factor_f;
    }

    let h_out = h_bar.max(factor_f) as u32;
    let w_out = w_bar.max(factor_f) as u32;
    Ok((h_out, w_out))
}

/// Cuts a patch-aligned image into flattened patches.
///
/// Patches are emitted block by block: each `merge x merge` block of
/// neighbouring patches is contiguous, so the vision tower can merge them
/// without reordering. Inside a patch the layout is channel, then temporal
/// frame (the still image is repeated), then row, then column.
pub fn image_to_patches(
    image: &RgbImage,
    cfg: &Qwen3VlPreprocessorConfig,
) -> (Vec<f32>, usize, usize) {
    let width = image.width() as usize;
    let patch = cfg.patch_size;
    let merge = cfg.merge_size;
    let temporal = cfg.temporal_patch_size;
    let grid_h = image.height() as usize / patch;
    let grid_w = width / patch;

    let scale = if cfg.do_rescale {
        cfg.rescale_factor
    } else {
        1.0
    };
    let (mean, std) = if cfg.do_normalize {
        (cfg.image_mean.as_slice(), cfg.image_std.as_slice())
    } else {
        (&[0.0f32; 3][..], &[1.0f32; 3][..])
    };

    let raw = image.as_raw();
    let patch_dim = 3 * temporal * patch * patch;
    let mut out = Vec::with_capacity(grid_h * grid_w * patch_dim);

    for mh in 0..grid_h / merge {
        for mw in 0..grid_w / merge {
            for sh in 0..merge {
                for sw in 0..merge {
                    let y0 = (mh * merge + sh) * patch;
                    let x0 = (mw * merge + sw) * patch;
                    for c in 0..3 {
                        for _ in 0..temporal {
                            for py in 0..patch {
                                for px in 0..patch {
                                    let idx = 3 * ((y0 + py) * width + x0 + px) + c;
                                    let v = raw[idx] as f32 * scale;
                                    out.push((v - mean[c]) / std[c]);
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    (out, grid_h, grid_w)
}

/// Resizes, normalizes, and patchifies one image on the CPU.
pub fn preprocess_image(
    image: &RgbImage,
    cfg: &Qwen3VlPreprocessorConfig,
) -> Result<Qwen3VlImageInputs, PreferenceError> {
    cfg.validate()?;

    let (target_h, target_w) = smart_resize(
        image.height(),
        image.width(),
        cfg.factor(),
        cfg.size.shortest_edge,
        cfg.size.longest_edge,
    )?;
    let resized = if (target_w, target_h) != image.dimensions() {
        image::imageops::resize(image, target_w, target_h, FilterType::CatmullRom)
    } else {
        image.clone()
    };

    let (data, grid_h, grid_w) = image_to_patches(&resized, cfg);
    let patch_dim = 3 * cfg.temporal_patch_size * cfg.patch_size * cfg.patch_size;
    let patches = Tensor::from_vec(data, (grid_h * grid_w, patch_dim), &Device::Cpu).map_err(
        |e| {
            candle_to_processing(
                ProcessingStage::ImagePreprocessing,
                "Qwen3-VL: failed to create patch tensor",
                e,
            )
        },
    )?;

    Ok(Qwen3VlImageInputs {
        patches,
        grid_h,
        grid_w,
    })
}

/// Pre-tokenized pieces of the chat template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTemplateIds {
    pub user_header: Vec<u32>,
    pub assistant_header: Vec<u32>,
    pub newline: Vec<u32>,
}

/// Lays out a single-turn chat with the image before the prompt:
///
/// ```text
/// <|im_start|>user\n<|vision_start|><|image_pad|>...<|vision_end|>{prompt}<|im_end|>\n<|im_start|>assistant\n
/// ```
pub fn assemble_input_ids(
    special: &Qwen3VlSpecialTokens,
    template: &ChatTemplateIds,
    prompt_ids: &[u32],
    num_image_tokens: usize,
) -> Vec<u32> {
    let mut ids = Vec::with_capacity(
        num_image_tokens
            + prompt_ids.len()
            + template.user_header.len()
            + template.assistant_header.len()
            + template.newline.len()
            + 5,
    );
    ids.push(special.im_start);
    ids.extend_from_slice(&template.user_header);
    ids.push(special.vision_start);
    ids.extend(std::iter::repeat_n(special.image_pad, num_image_tokens));
    ids.push(special.vision_end);
    ids.extend_from_slice(prompt_ids);
    ids.push(special.im_end);
    ids.extend_from_slice(&template.newline);
    ids.push(special.im_start);
    ids.extend_from_slice(&template.assistant_header);
    ids
}

/// Half-open index ranges of contiguous `image_token_id` runs.
pub fn find_image_spans(input_ids: &[u32], image_token_id: u32) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (idx, &token) in input_ids.iter().enumerate() {
        if token == image_token_id {
            if start.is_none() {
                start = Some(idx);
            }
        } else if let Some(s) = start.take() {
            spans.push((s, idx));
        }
    }
    if let Some(s) = start {
        spans.push((s, input_ids.len()));
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vl::qwen3_vl::config::Qwen3VlImageSize;
    use image::Rgb;

    fn raw_config(patch_size: usize, merge_size: usize, temporal: usize) -> Qwen3VlPreprocessorConfig {
        Qwen3VlPreprocessorConfig {
            patch_size,
            merge_size,
            temporal_patch_size: temporal,
            do_rescale: false,
            do_normalize: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_smart_resize_factor_divisibility() -> Result<(), PreferenceError> {
        let (h, w) = smart_resize(100, 200, 32, 65_536, 1_310_720)?;
        assert_eq!(h % 32, 0);
        assert_eq!(w % 32, 0);
        assert!(h * w >= 65_536);
        Ok(())
    }

    #[test]
    fn test_smart_resize_respects_max_pixels() -> Result<(), PreferenceError> {
        let (h, w) = smart_resize(2000, 4000, 32, 1024, 262_144)?;
        assert!(h * w <= 262_144);
        assert_eq!(h % 32, 0);
        assert_eq!(w % 32, 0);
        Ok(())
    }

    #[test]
    fn test_smart_resize_rejects_extreme_aspect_ratio() {
        assert!(smart_resize(1, 500, 32, 1024, 1_000_000).is_err());
        assert!(smart_resize(10, 10, 0, 1, 100).is_err());
    }

    #[test]
    fn test_patches_follow_merge_blocks() {
        // 4 wide, 2 tall, one pixel per patch: two 2x2 merge blocks.
        let image = RgbImage::from_fn(4, 2, |x, y| Rgb([(x + 10 * y) as u8, 0, 0]));
        let (data, grid_h, grid_w) = image_to_patches(&image, &raw_config(1, 2, 1));
        assert_eq!((grid_h, grid_w), (2, 4));

        let red: Vec<f32> = data.chunks(3).map(|p| p[0]).collect();
        assert_eq!(red, [0.0, 1.0, 10.0, 11.0, 2.0, 3.0, 12.0, 13.0]);
    }

    #[test]
    fn test_patch_repeats_temporal_frames() {
        let image = RgbImage::from_pixel(2, 2, Rgb([255, 0, 0]));
        let cfg = Qwen3VlPreprocessorConfig {
            patch_size: 1,
            merge_size: 2,
            temporal_patch_size: 2,
            do_rescale: false,
            image_mean: vec![127.5; 3],
            image_std: vec![127.5; 3],
            ..Default::default()
        };
        let (data, _, _) = image_to_patches(&image, &cfg);
        // 4 patches x (3 channels x 2 frames).
        assert_eq!(data.len(), 24);
        assert_eq!(&data[..6], &[1.0, 1.0, -1.0, -1.0, -1.0, -1.0]);
    }

    #[test]
    fn test_preprocess_image_shapes() {
        let image = RgbImage::from_pixel(100, 50, Rgb([128, 128, 128]));
        let cfg = Qwen3VlPreprocessorConfig::default();
        let inputs = preprocess_image(&image, &cfg).unwrap();

        assert_eq!(inputs.grid_h % cfg.merge_size, 0);
        assert_eq!(inputs.grid_w % cfg.merge_size, 0);
        assert_eq!(
            inputs.patches.dims(),
            &[inputs.grid_h * inputs.grid_w, 3 * 2 * 16 * 16]
        );
        assert_eq!(
            inputs.num_image_tokens(cfg.merge_size),
            inputs.grid_h * inputs.grid_w / 4
        );
    }

    #[test]
    fn test_large_composite_stays_within_token_limit() {
        let max_tokens = 256;
        let mut cfg = Qwen3VlPreprocessorConfig {
            size: Qwen3VlImageSize {
                shortest_edge: 65_536,
                longest_edge: 16_777_216,
            },
            ..Default::default()
        };
        // Without a limit this composite resizes to 1920x544: 1020 image tokens.
        let composite = RgbImage::from_pixel(1920, 540, Rgb([90, 120, 30]));
        let (h, w) = smart_resize(540, 1920, cfg.factor(), 65_536, 16_777_216).unwrap();
        assert!((h / 32 * (w / 32)) as usize > max_tokens);

        cfg.limit_image_tokens(max_tokens);
        let inputs = preprocess_image(&composite, &cfg).unwrap();
        let tokens = inputs.num_image_tokens(cfg.merge_size);
        assert!(tokens <= max_tokens, "{tokens} image tokens");
        assert!(tokens > 0);
    }

    #[test]
    fn test_assemble_input_ids_layout() {
        let special = Qwen3VlSpecialTokens {
            im_start: 100,
            im_end: 101,
            vision_start: 102,
            vision_end: 103,
            image_pad: 104,
        };
        let template = ChatTemplateIds {
            user_header: vec![1],
            assistant_header: vec![2],
            newline: vec![3],
        };
        let ids = assemble_input_ids(&special, &template, &[7, 8], 3);
        assert_eq!(
            ids,
            [100, 1, 102, 104, 104, 104, 103, 7, 8, 101, 3, 100, 2]
        );
        assert_eq!(find_image_spans(&ids, 104), vec![(3, 6)]);
    }

    #[test]
    fn test_find_image_spans() {
        assert_eq!(find_image_spans(&[1, 2, 99, 99, 99, 3], 99), vec![(2, 5)]);
        assert_eq!(find_image_spans(&[99, 1, 99, 99], 99), vec![(0, 1), (2, 4)]);
        assert!(find_image_spans(&[1, 2, 3], 99).is_empty());
    }
}
