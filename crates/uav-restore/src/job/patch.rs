//! Partial, validated updates to a [`Job`].

use std::path::PathBuf;

use chrono::Utc;

use super::model::{ErrorDetail, Job, JobStats, JobStatus, OutputKind, Stage, StageState};

/// A field-level update. Unset fields are left untouched when applied.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub stages: Vec<(Stage, StageState)>,
    pub progress: Option<u8>,
    pub outputs: Vec<(OutputKind, PathBuf)>,
    pub stats: Option<JobStats>,
    pub error_detail: Option<ErrorDetail>,
    pub warnings: Vec<String>,
}

impl JobPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn stage(mut self, stage: Stage, state: StageState) -> Self {
        self.stages.push((stage, state));
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn output(mut self, kind: OutputKind, path: impl Into<PathBuf>) -> Self {
        self.outputs.push((kind, path.into()));
        self
    }

    pub fn stats(mut self, stats: JobStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn error(mut self, detail: ErrorDetail) -> Self {
        self.error_detail = Some(detail);
        self
    }

    pub fn warning(mut self, message: impl Into<String>) -> Self {
        self.warnings.push(message.into());
        self
    }

    /// Marks the job failed with `detail`, failing `stage` when given.
    pub fn failed(stage: Option<Stage>, detail: ErrorDetail) -> Self {
        let patch = Self::new().status(JobStatus::Failed).error(detail);
        match stage {
            Some(stage) => patch.stage(stage, StageState::Failed),
            None => patch,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.stages.is_empty()
            && self.progress.is_none()
            && self.outputs.is_empty()
            && self.stats.is_none()
            && self.error_detail.is_none()
            && self.warnings.is_empty()
    }
}

impl Job {
    /// Merges `patch` into this job.
    ///
    /// The patch is checked as a whole before anything is written, so a
    /// rejected patch leaves the job untouched. Returns the reason on
    /// rejection.
    pub fn apply(&mut self, patch: &JobPatch) -> Result<(), String> {
        let mut next_stages = self.stage_states;
        for (stage, state) in &patch.stages {
            let current = next_stages.get(*stage);
            if !current.can_advance_to(*state) {
                return Err(format!(
                    "stage {} cannot move from {} to {}",
                    stage, current, state
                ));
            }
            next_stages.set(*stage, *state);
        }

        let next_status = patch.status.unwrap_or(self.status);
        if self.status.is_terminal() && next_status != self.status {
            return Err(format!(
                "status {} is final, cannot become {}",
                self.status, next_status
            ));
        }
        if self.status.is_terminal() && next_stages != self.stage_states {
            return Err(format!("stages of a {} job are final", self.status));
        }
        if self.status == JobStatus::Uploaded && next_status.is_terminal() {
            return Err(format!(
                "status {} must pass through processing before {}",
                self.status, next_status
            ));
        }
        if next_status.rank() < self.status.rank() {
            return Err(format!(
                "status cannot move back from {} to {}",
                self.status, next_status
            ));
        }
        if next_status == JobStatus::Completed && !next_stages.all_done() {
            return Err("completed requires every stage to be done".to_string());
        }
        if patch.error_detail.is_some() && next_status != JobStatus::Failed {
            return Err("error detail is only recorded on failed jobs".to_string());
        }

        if let Some(progress) = patch.progress {
            if progress > 100 {
                return Err(format!("progress {} is above 100", progress));
            }
            if progress < self.progress {
                return Err(format!(
                    "progress cannot decrease from {} to {}",
                    self.progress, progress
                ));
            }
        }

        let now = Utc::now();
        if next_status.is_terminal() && !self.status.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = next_status;
        self.stage_states = next_stages;
        if let Some(progress) = patch.progress {
            self.progress = progress;
        }
        for (kind, path) in &patch.outputs {
            self.outputs.insert(*kind, path.clone());
        }
        if let Some(ref stats) = patch.stats {
            self.stats = Some(stats.clone());
        }
        if let Some(ref detail) = patch.error_detail {
            self.error_detail = Some(detail.clone());
        }
        self.warnings.extend(patch.warnings.iter().cloned());
        self.updated_at = now;

        Ok(())
    }
}
