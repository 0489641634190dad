use image::{DynamicImage, Rgb, RgbImage};

use crate::error::ProcessError;
use crate::pipeline::{StageFunction, StageInput, StageOutput};

use super::{open_image, save_png};

/// Box-filter restoration: averages each pixel over a `kernel`×`kernel`
/// window. Edges are handled by clamping.
pub struct BoxDeblur {
    kernel: u32,
}

impl BoxDeblur {
    pub fn new(kernel: u32) -> Self {
        Self {
            kernel: kernel.max(1),
        }
    }
}

impl StageFunction for BoxDeblur {
    fn run(&self, input: &StageInput) -> Result<StageOutput, ProcessError> {
        let _span = tracing::info_span!("processor.deblur", kernel = self.kernel).entered();

        let source = open_image(&input.artifact)?.to_rgb8();
        let restored = box_filter(&source, self.kernel);
        save_png(&DynamicImage::ImageRgb8(restored), &input.destination)?;

        Ok(StageOutput::new(input.destination.clone()))
    }
}

/// Separable box filter: one horizontal and one vertical pass.
pub fn box_filter(image: &RgbImage, kernel: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || kernel <= 1 {
        return image.clone();
    }
    let radius = (kernel / 2) as i64;
    let taps = (2 * radius + 1) as f32;

    let clamp = |v: i64, max: u32| v.clamp(0, i64::from(max) - 1) as u32;

    let mut horizontal = vec![[0f32; 3]; (width * height) as usize];
    for y in 0..height {
        for x in 0..width {
            let mut acc = [0f32; 3];
            for dx in -radius..=radius {
                let p = image.get_pixel(clamp(i64::from(x) + dx, width), y);
                for c in 0..3 {
                    acc[c] += f32::from(p.0[c]);
                }
            }
            horizontal[(y * width + x) as usize] = acc;
        }
    }

    RgbImage::from_fn(width, height, |x, y| {
        let mut acc = [0f32; 3];
        for dy in -radius..=radius {
            let row = clamp(i64::from(y) + dy, height);
            let h = horizontal[(row * width + x) as usize];
            for c in 0..3 {
                acc[c] += h[c];
            }
        }
        let scale = taps * taps;
        Rgb([
            (acc[0] / scale).round() as u8,
            (acc[1] / scale).round() as u8,
            (acc[2] / scale).round() as u8,
        ])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Stage;
    use crate::processor::test_support::write_test_image;
    use tempfile::TempDir;

    #[test]
    fn test_box_filter_keeps_flat_image() {
        let flat = RgbImage::from_pixel(6, 4, Rgb([90, 120, 30]));
        assert_eq!(box_filter(&flat, 5), flat);
    }

    #[test]
    fn test_box_filter_spreads_a_spike() {
        let mut img = RgbImage::from_pixel(9, 9, Rgb([0, 0, 0]));
        img.put_pixel(4, 4, Rgb([225, 225, 225]));

        let out = box_filter(&img, 3);
        assert_eq!(out.get_pixel(4, 4).0[0], 25);
        assert_eq!(out.get_pixel(3, 3).0[0], 25);
        assert_eq!(out.get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn test_kernel_one_is_identity() {
        let mut img = RgbImage::from_pixel(3, 3, Rgb([0, 0, 0]));
        img.put_pixel(1, 1, Rgb([255, 0, 0]));
        assert_eq!(box_filter(&img, 1), img);
    }

    #[test]
    fn test_stage_writes_destination() {
        let temp_dir = TempDir::new().unwrap();
        let source = write_test_image(temp_dir.path(), "in.png", 16, 12);
        let destination = temp_dir.path().join("out.png");

        let input = StageInput {
            job_id: "job-1".to_string(),
            stage: Stage::Deblur,
            source: source.clone(),
            artifact: source,
            destination: destination.clone(),
            depth: None,
        };
        let output = BoxDeblur::new(5).run(&input).unwrap();

        assert_eq!(output.artifact, destination);
        assert_eq!(image::image_dimensions(&destination).unwrap(), (16, 12));
    }

    #[test]
    fn test_stage_fails_on_unreadable_input() {
        let temp_dir = TempDir::new().unwrap();
        let bogus = temp_dir.path().join("bogus.png");
        std::fs::write(&bogus, b"not an image").unwrap();

        let input = StageInput {
            job_id: "job-1".to_string(),
            stage: Stage::Deblur,
            source: bogus.clone(),
            artifact: bogus,
            destination: temp_dir.path().join("out.png"),
            depth: None,
        };
        assert!(matches!(
            BoxDeblur::new(5).run(&input),
            Err(ProcessError::ReadImage { .. })
        ));
    }
}
