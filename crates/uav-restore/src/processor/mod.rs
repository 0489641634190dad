//! Built-in stage implementations.

use std::path::Path;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, ImageReader};

use crate::config::ProcessingConfig;
use crate::error::ProcessError;
use crate::pipeline::StageSet;

pub mod comparison;
pub mod deblur;
pub mod depth;
pub mod mesh;

pub use comparison::build_comparison;
pub use deblur::BoxDeblur;
pub use depth::SobelDepth;
pub use mesh::{GridMesher, Mesh, MeshRefiner};

/// The default deblur → depth → mesh → refinement chain.
pub fn default_stages(config: &ProcessingConfig) -> StageSet {
    StageSet::new(
        Arc::new(BoxDeblur::new(config.deblur_kernel)),
        Arc::new(SobelDepth::new(config.depth_blur_sigma)),
        Arc::new(GridMesher::new(config.mesh_grid, config.depth_scale)),
        Arc::new(MeshRefiner::new(config.hallucination_scale)),
    )
}

/// Decodes an image by its content, not its file extension.
pub(crate) fn open_image(path: &Path) -> Result<DynamicImage, ProcessError> {
    let read_error = |e: image::ImageError| ProcessError::ReadImage {
        path: path.to_path_buf(),
        source: e,
    };
    ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| read_error(image::ImageError::IoError(e)))?
        .decode()
        .map_err(read_error)
}

pub(crate) fn save_png(image: &DynamicImage, path: &Path) -> Result<(), ProcessError> {
    image
        .save_with_format(path, ImageFormat::Png)
        .map_err(|e| ProcessError::WriteImage {
            path: path.to_path_buf(),
            source: e,
        })
}

#[cfg(test)]
pub(crate) mod test_support {
    use image::{DynamicImage, Rgb, RgbImage};
    use std::path::{Path, PathBuf};

    /// Writes a small gradient image with a bright square in the middle.
    pub fn write_test_image(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let img = RgbImage::from_fn(width, height, |x, y| {
            let in_square =
                x > width / 4 && x < 3 * width / 4 && y > height / 4 && y < 3 * height / 4;
            if in_square {
                Rgb([240, 240, 240])
            } else {
                let v = ((x * 255) / width.max(1)) as u8;
                Rgb([v, v / 2, 40])
            }
        });
        let path = dir.join(name);
        DynamicImage::ImageRgb8(img).save(&path).unwrap();
        path
    }
}
