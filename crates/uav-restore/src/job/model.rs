//! The job record and its value types.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Stage ──────────────────────────────────────────────────────────────────

/// One of the four fixed pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Deblur,
    Depth,
    Mesh,
    Hallucination,
}

impl Stage {
    /// All stages in the order the engine runs them.
    pub const ALL: [Stage; 4] = [Stage::Deblur, Stage::Depth, Stage::Mesh, Stage::Hallucination];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Deblur => "deblur",
            Stage::Depth => "depth",
            Stage::Mesh => "mesh",
            Stage::Hallucination => "hallucination",
        }
    }

    pub fn parse(s: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|stage| stage.as_str() == s)
    }

    /// Position in the pipeline, starting at 0.
    pub fn index(&self) -> usize {
        match self {
            Stage::Deblur => 0,
            Stage::Depth => 1,
            Stage::Mesh => 2,
            Stage::Hallucination => 3,
        }
    }

    /// The named output this stage produces.
    pub fn output_kind(&self) -> OutputKind {
        match self {
            Stage::Deblur => OutputKind::RestoredImage,
            Stage::Depth => OutputKind::DepthMap,
            Stage::Mesh => OutputKind::MeshRaw,
            Stage::Hallucination => OutputKind::MeshHallucinated,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Status ─────────────────────────────────────────────────────────────────

/// Overall job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Uploaded => "uploaded",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "uploaded" => Some(JobStatus::Uploaded),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub(crate) fn rank(&self) -> u8 {
        match self {
            JobStatus::Uploaded => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageState {
    #[default]
    Pending,
    Running,
    Done,
    Failed,
}

impl StageState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageState::Done | StageState::Failed)
    }

    /// Whether moving from `self` to `next` follows
    /// `Pending -> Running -> {Done, Failed}`.
    pub fn can_advance_to(&self, next: StageState) -> bool {
        match (self, next) {
            (a, b) if *a == b => true,
            (StageState::Pending, StageState::Running) => true,
            (StageState::Running, StageState::Done | StageState::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageState::Pending => "pending",
            StageState::Running => "running",
            StageState::Done => "done",
            StageState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Stage states in fixed pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StageStates {
    pub deblur: StageState,
    pub depth: StageState,
    pub mesh: StageState,
    pub hallucination: StageState,
}

impl StageStates {
    pub fn get(&self, stage: Stage) -> StageState {
        match stage {
            Stage::Deblur => self.deblur,
            Stage::Depth => self.depth,
            Stage::Mesh => self.mesh,
            Stage::Hallucination => self.hallucination,
        }
    }

    pub fn set(&mut self, stage: Stage, state: StageState) {
        match stage {
            Stage::Deblur => self.deblur = state,
            Stage::Depth => self.depth = state,
            Stage::Mesh => self.mesh = state,
            Stage::Hallucination => self.hallucination = state,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Stage, StageState)> + '_ {
        Stage::ALL.into_iter().map(move |stage| (stage, self.get(stage)))
    }

    pub fn count(&self, state: StageState) -> usize {
        self.iter().filter(|(_, s)| *s == state).count()
    }

    pub fn all_done(&self) -> bool {
        self.count(StageState::Done) == Stage::ALL.len()
    }

    /// The first stage found in `Running`, if any.
    pub fn running(&self) -> Option<Stage> {
        self.iter()
            .find(|(_, s)| *s == StageState::Running)
            .map(|(stage, _)| stage)
    }
}

// ─── Outputs ────────────────────────────────────────────────────────────────

/// Named artifacts a job can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputKind {
    RestoredImage,
    DepthMap,
    MeshRaw,
    MeshHallucinated,
    Comparison,
}

impl OutputKind {
    /// File name suffix used under the processed directory.
    pub fn file_suffix(&self) -> &'static str {
        match self {
            OutputKind::RestoredImage => "restored.png",
            OutputKind::DepthMap => "depth.png",
            OutputKind::MeshRaw => "mesh.obj",
            OutputKind::MeshHallucinated => "mesh_full.obj",
            OutputKind::Comparison => "comparison.png",
        }
    }
}

// ─── Error detail ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    StageFailure,
    Timeout,
    AssemblyFailure,
    Cancelled,
    Interrupted,
}

/// Why a job ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(kind: ErrorKind, stage: Option<Stage>, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            message: message.into(),
        }
    }
}

// ─── Stats ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshStats {
    pub vertices: usize,
    pub faces: usize,
    pub scale_factor: f64,
    pub size_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStats {
    pub width: u32,
    pub height: u32,
    pub size_mb: f64,
}

/// Summary statistics computed when a job finishes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mesh: Option<MeshStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enhanced_mesh: Option<MeshStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restored_image: Option<ImageStats>,
}

impl JobStats {
    pub fn is_empty(&self) -> bool {
        self.mesh.is_none() && self.enhanced_mesh.is_none() && self.restored_image.is_none()
    }
}

// ─── Job ────────────────────────────────────────────────────────────────────

/// A single restoration request and everything known about its progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job identifier.
    pub id: String,
    /// Location of the uploaded source image.
    pub input_reference: PathBuf,
    /// Client-supplied filename.
    pub original_filename: String,
    /// MIME type guessed from the filename.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub status: JobStatus,
    pub stage_states: StageStates,
    /// 25 per completed stage.
    pub progress: u8,
    #[serde(default)]
    pub outputs: BTreeMap<OutputKind, PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<JobStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<ErrorDetail>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a freshly uploaded job with every stage pending.
    pub fn new(id: impl Into<String>, input_reference: &Path, original_filename: &str) -> Self {
        let now = Utc::now();
        let mime_type = mime_guess::from_path(original_filename)
            .first()
            .map(|m| m.to_string());

        Self {
            id: id.into(),
            input_reference: input_reference.to_path_buf(),
            original_filename: original_filename.to_string(),
            mime_type,
            status: JobStatus::Uploaded,
            stage_states: StageStates::default(),
            progress: 0,
            outputs: BTreeMap::new(),
            stats: None,
            error_detail: None,
            warnings: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Generates a new random job id.
    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn completed_stages(&self) -> usize {
        self.stage_states.count(StageState::Done)
    }

    pub fn output(&self, kind: OutputKind) -> Option<&Path> {
        self.outputs.get(&kind).map(PathBuf::as_path)
    }
}

/// Progress value after `done` stages have completed.
pub fn progress_for(done: usize) -> u8 {
    (done.min(Stage::ALL.len()) * 25) as u8
}
