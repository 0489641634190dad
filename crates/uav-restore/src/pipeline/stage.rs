//! The contract between the engine and stage implementations.

use std::path::PathBuf;
use std::sync::Arc;

use image::GrayImage;

use crate::error::ProcessError;
use crate::job::Stage;

/// Dense depth estimate, row-major, values in `0.0..=1.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthField {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl DepthField {
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> Result<Self, ProcessError> {
        if width == 0 || height == 0 {
            return Err(ProcessError::InvalidInput(
                "depth field must not be empty".to_string(),
            ));
        }
        if values.len() != (width as usize) * (height as usize) {
            return Err(ProcessError::InvalidInput(format!(
                "depth field of {}x{} needs {} values, got {}",
                width,
                height,
                (width as usize) * (height as usize),
                values.len()
            )));
        }
        Ok(Self {
            width,
            height,
            values,
        })
    }

    pub fn from_gray(image: &GrayImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            values: image.pixels().map(|p| f32::from(p.0[0]) / 255.0).collect(),
        }
    }

    pub fn to_gray(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let v = (self.at(x, y).clamp(0.0, 1.0) * 255.0).round() as u8;
            image::Luma([v])
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn at(&self, x: u32, y: u32) -> f32 {
        let x = x.min(self.width - 1) as usize;
        let y = y.min(self.height - 1) as usize;
        self.values[y * self.width as usize + x]
    }

    /// Nearest sample at normalized coordinates `u, v` in `0.0..=1.0`.
    pub fn sample(&self, u: f64, v: f64) -> f32 {
        let x = (u.clamp(0.0, 1.0) * f64::from(self.width - 1)).round() as u32;
        let y = (v.clamp(0.0, 1.0) * f64::from(self.height - 1)).round() as u32;
        self.at(x, y)
    }
}

/// What a stage is given.
#[derive(Debug, Clone)]
pub struct StageInput {
    pub job_id: String,
    pub stage: Stage,
    /// The original upload.
    pub source: PathBuf,
    /// Output of the previous stage, or the upload for the first stage.
    pub artifact: PathBuf,
    /// Where the engine expects this stage to write its artifact.
    pub destination: PathBuf,
    /// Depth estimate handed from the depth stage to the mesh stage.
    pub depth: Option<Arc<DepthField>>,
}

/// What a stage hands back.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub artifact: PathBuf,
    pub depth: Option<Arc<DepthField>>,
}

impl StageOutput {
    pub fn new(artifact: impl Into<PathBuf>) -> Self {
        Self {
            artifact: artifact.into(),
            depth: None,
        }
    }

    pub fn with_depth(mut self, depth: DepthField) -> Self {
        self.depth = Some(Arc::new(depth));
        self
    }
}

/// One pipeline stage. Implementations must not touch the job store.
pub trait StageFunction: Send + Sync {
    fn run(&self, input: &StageInput) -> Result<StageOutput, ProcessError>;
}

impl<F> StageFunction for F
where
    F: Fn(&StageInput) -> Result<StageOutput, ProcessError> + Send + Sync,
{
    fn run(&self, input: &StageInput) -> Result<StageOutput, ProcessError> {
        self(input)
    }
}

/// The four stage implementations, indexed by [`Stage`].
#[derive(Clone)]
pub struct StageSet {
    functions: [Arc<dyn StageFunction>; 4],
}

impl StageSet {
    pub fn new(
        deblur: Arc<dyn StageFunction>,
        depth: Arc<dyn StageFunction>,
        mesh: Arc<dyn StageFunction>,
        hallucination: Arc<dyn StageFunction>,
    ) -> Self {
        Self {
            functions: [deblur, depth, mesh, hallucination],
        }
    }

    pub fn get(&self, stage: Stage) -> Arc<dyn StageFunction> {
        Arc::clone(&self.functions[stage.index()])
    }

    /// Replaces the implementation of one stage.
    pub fn with(mut self, stage: Stage, function: Arc<dyn StageFunction>) -> Self {
        self.functions[stage.index()] = function;
        self
    }
}

impl std::fmt::Debug for StageSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSet").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(stage: Stage) -> StageInput {
        StageInput {
            job_id: "job-1".to_string(),
            stage,
            source: PathBuf::from("/u/a.png"),
            artifact: PathBuf::from("/u/a.png"),
            destination: PathBuf::from("/p/out"),
            depth: None,
        }
    }

    fn echo(name: &'static str) -> Arc<dyn StageFunction> {
        Arc::new(
            move |input: &StageInput| -> Result<StageOutput, ProcessError> {
                Ok(StageOutput::new(input.destination.join(name)))
            },
        )
    }

    #[test]
    fn test_stage_set_dispatches_by_stage() {
        let set = StageSet::new(echo("a"), echo("b"), echo("c"), echo("d"));

        let out = set.get(Stage::Mesh).run(&input(Stage::Mesh)).unwrap();
        assert_eq!(out.artifact, PathBuf::from("/p/out/c"));
    }

    #[test]
    fn test_stage_set_with_replaces_one() {
        let set = StageSet::new(echo("a"), echo("b"), echo("c"), echo("d"))
            .with(Stage::Depth, echo("z"));

        assert_eq!(
            set.get(Stage::Depth).run(&input(Stage::Depth)).unwrap().artifact,
            PathBuf::from("/p/out/z")
        );
        assert_eq!(
            set.get(Stage::Deblur).run(&input(Stage::Deblur)).unwrap().artifact,
            PathBuf::from("/p/out/a")
        );
    }

    #[test]
    fn test_depth_field_validates_size() {
        assert!(DepthField::new(2, 2, vec![0.0; 4]).is_ok());
        assert!(DepthField::new(2, 2, vec![0.0; 3]).is_err());
        assert!(DepthField::new(0, 2, vec![]).is_err());
    }

    #[test]
    fn test_depth_field_gray_round_trip() {
        let field = DepthField::new(2, 1, vec![0.0, 1.0]).unwrap();
        let gray = field.to_gray();
        assert_eq!(gray.get_pixel(0, 0).0[0], 0);
        assert_eq!(gray.get_pixel(1, 0).0[0], 255);
        assert_eq!(DepthField::from_gray(&gray), field);
    }

    #[test]
    fn test_depth_field_sample() {
        let field = DepthField::new(3, 1, vec![0.0, 0.5, 1.0]).unwrap();
        assert_eq!(field.sample(0.0, 0.0), 0.0);
        assert_eq!(field.sample(0.5, 0.0), 0.5);
        assert_eq!(field.sample(1.0, 1.0), 1.0);
        assert_eq!(field.sample(7.0, -3.0), 1.0);
    }
}
