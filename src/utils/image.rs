//! Utility functions for loading and compositing images.
//!
//! Every comparison shows the model one picture made of two: the first image
//! on the left, the second on the right. This module loads the inputs,
//! normalizes them to 8-bit RGB, and builds that side-by-side composite.

use crate::core::PreferenceError;
use image::{DynamicImage, ImageError, RgbImage};
use std::io::ErrorKind;
use std::path::Path;

/// Converts a DynamicImage to an RgbImage.
///
/// Grayscale, alpha, and 16-bit inputs all end up as 3-channel 8-bit RGB.
pub fn dynamic_to_rgb(img: DynamicImage) -> RgbImage {
    img.to_rgb8()
}

/// Loads an image from a file path and converts it to RgbImage.
///
/// # Errors
///
/// * [`PreferenceError::ImageNotFound`] if the path does not resolve to a file.
/// * [`PreferenceError::ImageIo`] for any other read or decode failure; the
///   original [`ImageError`] is kept as the error source.
pub fn load_rgb_image(path: &Path) -> Result<RgbImage, PreferenceError> {
    match image::open(path) {
        Ok(img) => Ok(dynamic_to_rgb(img)),
        Err(ImageError::IoError(e)) if e.kind() == ErrorKind::NotFound => {
            Err(PreferenceError::ImageNotFound {
                path: path.to_path_buf(),
            })
        }
        Err(source) => Err(PreferenceError::ImageIo {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Places `left` and `right` side by side on a new canvas.
///
/// The canvas is `left.width() + right.width()` wide and as tall as the taller
/// input. Both images are anchored at the top edge; the area below the shorter
/// image stays black.
pub fn concatenate_horizontally(left: &RgbImage, right: &RgbImage) -> RgbImage {
    let width = left.width() + right.width();
    let height = left.height().max(right.height());

    let mut canvas = RgbImage::new(width, height);
    image::imageops::replace(&mut canvas, left, 0, 0);
    image::imageops::replace(&mut canvas, right, i64::from(left.width()), 0);
    canvas
}

/// Loads two images and concatenates them with `path_a` on the left and
/// `path_b` on the right.
pub fn concatenate_images_horizontally(
    path_a: &Path,
    path_b: &Path,
) -> Result<RgbImage, PreferenceError> {
    let img_a = load_rgb_image(path_a)?;
    let img_b = load_rgb_image(path_b)?;
    Ok(concatenate_horizontally(&img_a, &img_b))
}
