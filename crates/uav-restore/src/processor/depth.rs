use image::{DynamicImage, GrayImage, Luma};

use crate::error::ProcessError;
use crate::pipeline::{DepthField, StageFunction, StageInput, StageOutput};

use super::{open_image, save_png};

/// Edge-strength depth estimate.
///
/// Sobel gradient magnitude of the grayscale image, min-max normalised and
/// smoothed with a Gaussian of `blur_sigma`. The resulting field is saved as
/// an 8-bit depth map and handed to the next stage.
pub struct SobelDepth {
    blur_sigma: f32,
}

impl SobelDepth {
    pub fn new(blur_sigma: f32) -> Self {
        Self { blur_sigma }
    }
}

impl StageFunction for SobelDepth {
    fn run(&self, input: &StageInput) -> Result<StageOutput, ProcessError> {
        let _span = tracing::info_span!("processor.depth").entered();

        let gray = open_image(&input.artifact)?.to_luma8();
        let field = estimate_depth(&gray, self.blur_sigma);
        save_png(&DynamicImage::ImageLuma8(field.to_gray()), &input.destination)?;

        Ok(StageOutput::new(input.destination.clone()).with_depth(field))
    }
}

pub fn estimate_depth(gray: &GrayImage, blur_sigma: f32) -> DepthField {
    let (width, height) = gray.dimensions();
    let magnitudes = sobel_magnitude(gray);

    let (min, max) = magnitudes
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    let range = max - min;

    let normalized = GrayImage::from_fn(width, height, |x, y| {
        let v = magnitudes[(y * width + x) as usize];
        let scaled = if range > f32::EPSILON {
            (v - min) / range
        } else {
            0.0
        };
        Luma([(scaled * 255.0).round() as u8])
    });

    let smoothed = if blur_sigma > 0.0 {
        image::imageops::blur(&normalized, blur_sigma)
    } else {
        normalized
    };

    DepthField::from_gray(&smoothed)
}

fn sobel_magnitude(gray: &GrayImage) -> Vec<f32> {
    const GX: [[f32; 3]; 3] = [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]];
    const GY: [[f32; 3]; 3] = [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]];

    let (width, height) = gray.dimensions();
    let at = |x: i64, y: i64| {
        let x = x.clamp(0, i64::from(width) - 1) as u32;
        let y = y.clamp(0, i64::from(height) - 1) as u32;
        f32::from(gray.get_pixel(x, y).0[0])
    };

    let mut out = Vec::with_capacity((width * height) as usize);
    for y in 0..i64::from(height) {
        for x in 0..i64::from(width) {
            let mut gx = 0.0;
            let mut gy = 0.0;
            for (j, (row_x, row_y)) in GX.iter().zip(GY.iter()).enumerate() {
                for i in 0..3 {
                    let p = at(x + i as i64 - 1, y + j as i64 - 1);
                    gx += row_x[i] * p;
                    gy += row_y[i] * p;
                }
            }
            out.push((gx * gx + gy * gy).sqrt());
        }
    }
    out
}
