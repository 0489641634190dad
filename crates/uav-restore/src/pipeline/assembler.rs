use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info_span, warn};

use crate::job::{ImageStats, JobStats, MeshStats, OutputKind, Stage};
use crate::processor::{build_comparison, Mesh};
use crate::storage::ArtifactStorage;

use super::error::{AssemblyError, PipelineWarning};

/// What the assembler adds to a job before it is marked completed.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub outputs: Vec<(OutputKind, PathBuf)>,
    pub stats: JobStats,
    pub warnings: Vec<PipelineWarning>,
}

/// Collects stage outputs into the final result set.
pub struct ResultAssembler {
    storage: Arc<ArtifactStorage>,
    comparison_height: u32,
    hallucination_scale: f64,
}

impl ResultAssembler {
    pub fn new(storage: Arc<ArtifactStorage>, comparison_height: u32, hallucination_scale: f64) -> Self {
        Self {
            storage,
            comparison_height,
            hallucination_scale,
        }
    }

    /// Builds the comparison image and stats for a job whose four stages are
    /// done. Only missing stage outputs are fatal.
    pub fn assemble(
        &self,
        job_id: &str,
        source: &Path,
        stage_outputs: &BTreeMap<OutputKind, PathBuf>,
    ) -> Result<Assembly, AssemblyError> {
        let _span = info_span!("assemble").entered();

        let mut outputs = Vec::with_capacity(Stage::ALL.len() + 1);
        for stage in Stage::ALL {
            let kind = stage.output_kind();
            match stage_outputs.get(&kind) {
                Some(path) if self.storage.exists(path) => outputs.push((kind, path.clone())),
                _ => return Err(AssemblyError::MissingOutput(kind)),
            }
        }

        let restored = outputs[Stage::Deblur.index()].1.clone();
        let raw_mesh = outputs[Stage::Mesh.index()].1.clone();
        let full_mesh = outputs[Stage::Hallucination.index()].1.clone();

        let mut warnings = Vec::new();

        let comparison = self.storage.artifact_path(job_id, OutputKind::Comparison);
        match build_comparison(source, &restored, &comparison, self.comparison_height) {
            Ok((width, height)) => {
                debug!(width, height, "Comparison image written");
                outputs.push((OutputKind::Comparison, comparison));
            }
            Err(e) => {
                warn!(error = %e, "Comparison image failed");
                warnings.push(PipelineWarning::ComparisonFailed {
                    error: e.to_string(),
                });
            }
        }

        let mut stats = JobStats::default();
        match self.mesh_stats(&raw_mesh, 1.0) {
            Ok(s) => stats.mesh = Some(s),
            Err(error) => warnings.push(PipelineWarning::StatsUnavailable { what: "mesh", error }),
        }
        match self.mesh_stats(&full_mesh, self.hallucination_scale) {
            Ok(s) => stats.enhanced_mesh = Some(s),
            Err(error) => warnings.push(PipelineWarning::StatsUnavailable {
                what: "enhanced mesh",
                error,
            }),
        }
        match self.image_stats(&restored) {
            Ok(s) => stats.restored_image = Some(s),
            Err(error) => warnings.push(PipelineWarning::StatsUnavailable {
                what: "restored image",
                error,
            }),
        }

        for warning in &warnings {
            warn!(%warning, "Assembly warning");
        }

        Ok(Assembly {
            outputs,
            stats,
            warnings,
        })
    }

    fn mesh_stats(&self, path: &Path, scale_factor: f64) -> Result<MeshStats, String> {
        let mesh = Mesh::read_obj(path).map_err(|e| e.to_string())?;
        let size_mb = self.storage.size_mb(path).map_err(|e| e.to_string())?;
        Ok(MeshStats {
            vertices: mesh.vertices.len(),
            faces: mesh.faces.len(),
            scale_factor,
            size_mb,
        })
    }

    fn image_stats(&self, path: &Path) -> Result<ImageStats, String> {
        let (width, height) = image::image_dimensions(path).map_err(|e| e.to_string())?;
        let size_mb = self.storage.size_mb(path).map_err(|e| e.to_string())?;
        Ok(ImageStats {
            width,
            height,
            size_mb,
        })
    }
}
