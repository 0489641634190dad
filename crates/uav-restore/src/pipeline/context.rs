use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::job::{Job, OutputKind, Stage};

use super::stage::{DepthField, StageInput, StageOutput};

/// Shared cancellation flag for one job run. Checked between stages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// State carried from one stage to the next within a single run.
pub struct PipelineContext {
    pub job_id: String,
    pub source: PathBuf,

    // Artifact the next stage consumes
    pub artifact: PathBuf,

    // Set by the depth stage, consumed by the mesh stage
    pub depth: Option<Arc<DepthField>>,

    pub outputs: BTreeMap<OutputKind, PathBuf>,
    pub completed: usize,
}

impl PipelineContext {
    pub fn new(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            source: job.input_reference.clone(),
            artifact: job.input_reference.clone(),
            depth: None,
            outputs: BTreeMap::new(),
            completed: 0,
        }
    }

    pub fn input_for(&self, stage: Stage, destination: PathBuf) -> StageInput {
        StageInput {
            job_id: self.job_id.clone(),
            stage,
            source: self.source.clone(),
            artifact: self.artifact.clone(),
            destination,
            depth: self.depth.clone(),
        }
    }

    /// Records a finished stage and makes its artifact the next input.
    pub fn advance(&mut self, stage: Stage, output: StageOutput) {
        self.outputs
            .insert(stage.output_kind(), output.artifact.clone());
        self.artifact = output.artifact;
        if output.depth.is_some() {
            self.depth = output.depth;
        }
        self.completed += 1;
    }
}
