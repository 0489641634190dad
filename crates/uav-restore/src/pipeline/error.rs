use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::job::{ErrorDetail, ErrorKind, OutputKind, Stage};

/// Why a stage did not produce its artifact.
#[derive(Error, Debug, Clone)]
pub enum StageError {
    #[error("Stage {stage} failed: {cause}")]
    Failed { stage: Stage, cause: String },

    #[error("Stage {stage} timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },

    #[error("Stage {stage} panicked: {message}")]
    Panicked { stage: Stage, message: String },

    #[error("Stage {stage} reported artifact '{}' which does not exist", .path.display())]
    MissingArtifact { stage: Stage, path: PathBuf },

    #[error("Job cancelled before stage {stage}")]
    Cancelled { stage: Stage },
}

impl StageError {
    pub fn stage(&self) -> Stage {
        match self {
            StageError::Failed { stage, .. }
            | StageError::Timeout { stage, .. }
            | StageError::Panicked { stage, .. }
            | StageError::MissingArtifact { stage, .. }
            | StageError::Cancelled { stage } => *stage,
        }
    }

    /// The record written to the job when this error ends it.
    pub fn to_detail(&self) -> ErrorDetail {
        let kind = match self {
            StageError::Timeout { .. } => ErrorKind::Timeout,
            StageError::Cancelled { .. } => ErrorKind::Cancelled,
            StageError::Failed { .. }
            | StageError::Panicked { .. }
            | StageError::MissingArtifact { .. } => ErrorKind::StageFailure,
        };
        ErrorDetail::new(kind, Some(self.stage()), self.to_string())
    }
}

/// Result assembly could not find what the stages should have produced.
#[derive(Error, Debug, Clone)]
pub enum AssemblyError {
    #[error("Stage output {0:?} is missing")]
    MissingOutput(OutputKind),
}

/// Non-fatal problems found while assembling results.
#[derive(Debug, Clone)]
pub enum PipelineWarning {
    ComparisonFailed { error: String },
    StatsUnavailable { what: &'static str, error: String },
}

impl fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineWarning::ComparisonFailed { error } => {
                write!(f, "comparison image not generated: {}", error)
            }
            PipelineWarning::StatsUnavailable { what, error } => {
                write!(f, "{} stats unavailable: {}", what, error)
            }
        }
    }
}
