use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};

use crate::error::ProcessError;

use super::{open_image, save_png};

/// Widest composite that will be allocated.
pub const MAX_COMPARISON_WIDTH: u32 = 8192;

/// Writes a side-by-side image of `original` and `restored`, each resized to
/// `height` pixels tall with aspect ratio preserved. Returns the composite's
/// dimensions.
///
/// Inputs so wide that the composite would exceed [`MAX_COMPARISON_WIDTH`]
/// are rejected before any resizing.
pub fn build_comparison(
    original: &Path,
    restored: &Path,
    destination: &Path,
    height: u32,
) -> Result<(u32, u32), ProcessError> {
    if height == 0 {
        return Err(ProcessError::InvalidInput(
            "comparison height must be positive".to_string(),
        ));
    }

    let original = open_image(original)?;
    let restored = open_image(restored)?;
    let left_width = fitted_width(&original, height);
    let right_width = fitted_width(&restored, height);
    let width = left_width.saturating_add(right_width);
    if width > u64::from(MAX_COMPARISON_WIDTH) {
        return Err(ProcessError::InvalidInput(format!(
            "comparison would be {}px wide, limit is {}px",
            width, MAX_COMPARISON_WIDTH
        )));
    }

    let left = imageops::resize(&original.to_rgb8(), left_width as u32, height, FilterType::Triangle);
    let right = imageops::resize(&restored.to_rgb8(), right_width as u32, height, FilterType::Triangle);

    let width = left.width() + right.width();
    let mut canvas = RgbImage::new(width, height);
    imageops::replace(&mut canvas, &left, 0, 0);
    imageops::replace(&mut canvas, &right, i64::from(left.width()), 0);

    save_png(&DynamicImage::ImageRgb8(canvas), destination)?;
    Ok((width, height))
}

// Width after scaling to `height` with the aspect ratio kept.
fn fitted_width(image: &DynamicImage, height: u32) -> u64 {
    let (w, h) = (image.width().max(1), image.height().max(1));
    ((u64::from(w) * u64::from(height)) / u64::from(h)).max(1)
}
