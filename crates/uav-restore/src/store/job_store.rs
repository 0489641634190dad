//! Job store: in-memory records with optional SQLite write-through.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::job_repo::{self, JobRow};
use crate::db::{Database, DatabaseError};
use crate::error::StoreError;
use crate::job::{ErrorDetail, ErrorKind, Job, JobPatch, JobStatus, StageState};

// ─── Row conversion ─────────────────────────────────────────────────────────

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("parse_timestamp: failed to parse '{}': {}", s, e);
            Utc::now()
        })
}

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn to_json<T: Serialize>(
    value: &T,
    job_id: &str,
    column: &'static str,
) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Json {
        job_id: job_id.to_string(),
        column,
        source: e,
    })
}

fn from_json<T: serde::de::DeserializeOwned>(
    text: &str,
    job_id: &str,
    column: &'static str,
) -> Result<T, DatabaseError> {
    serde_json::from_str(text).map_err(|e| DatabaseError::Json {
        job_id: job_id.to_string(),
        column,
        source: e,
    })
}

/// Flattens a job into its database row.
pub fn job_to_row(job: &Job) -> Result<JobRow, DatabaseError> {
    let stats = match job.stats {
        Some(ref stats) => Some(to_json(stats, &job.id, "stats")?),
        None => None,
    };
    let error_detail = match job.error_detail {
        Some(ref detail) => Some(to_json(detail, &job.id, "error_detail")?),
        None => None,
    };

    Ok(JobRow {
        id: job.id.clone(),
        original_filename: job.original_filename.clone(),
        input_reference: job.input_reference.to_string_lossy().to_string(),
        mime_type: job.mime_type.clone(),
        status: job.status.as_str().to_string(),
        stage_states: to_json(&job.stage_states, &job.id, "stage_states")?,
        progress: i64::from(job.progress),
        outputs: to_json(&job.outputs, &job.id, "outputs")?,
        stats,
        error_detail,
        warnings: to_json(&job.warnings, &job.id, "warnings")?,
        created_at: format_timestamp(job.created_at),
        updated_at: format_timestamp(job.updated_at),
        completed_at: job.completed_at.map(format_timestamp),
    })
}

/// Rebuilds a job from its database row.
pub fn job_from_row(row: &JobRow) -> Result<Job, DatabaseError> {
    let status = JobStatus::parse(&row.status).ok_or_else(|| DatabaseError::InvalidValue {
        job_id: row.id.clone(),
        column: "status",
        value: row.status.clone(),
    })?;
    let progress = u8::try_from(row.progress)
        .ok()
        .filter(|p| *p <= 100)
        .ok_or_else(|| DatabaseError::InvalidValue {
            job_id: row.id.clone(),
            column: "progress",
            value: row.progress.to_string(),
        })?;
    let stats = match row.stats {
        Some(ref text) => Some(from_json(text, &row.id, "stats")?),
        None => None,
    };
    let error_detail = match row.error_detail {
        Some(ref text) => Some(from_json(text, &row.id, "error_detail")?),
        None => None,
    };

    Ok(Job {
        id: row.id.clone(),
        input_reference: row.input_reference.clone().into(),
        original_filename: row.original_filename.clone(),
        mime_type: row.mime_type.clone(),
        status,
        stage_states: from_json(&row.stage_states, &row.id, "stage_states")?,
        progress,
        outputs: from_json(&row.outputs, &row.id, "outputs")?,
        stats,
        error_detail,
        warnings: from_json(&row.warnings, &row.id, "warnings")?,
        created_at: parse_timestamp(&row.created_at),
        updated_at: parse_timestamp(&row.updated_at),
        completed_at: row.completed_at.as_deref().map(parse_timestamp),
    })
}

// ─── Counts ─────────────────────────────────────────────────────────────────

/// Number of jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCounts {
    pub uploaded: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl JobCounts {
    pub fn total(&self) -> usize {
        self.uploaded + self.processing + self.completed + self.failed
    }
}

// ─── JobStore ───────────────────────────────────────────────────────────────

/// Owner of every job record.
///
/// Reads and merges go through an `RwLock`ed map, so lookups never wait on a
/// running stage. When a database is attached, each change is written to it
/// after the map lock has been released. Writes for one job are expected to
/// come from one thread at a time (the engine run that owns it).
pub struct JobStore {
    db: RwLock<Option<Database>>,
    jobs: RwLock<HashMap<String, Job>>,
}

impl JobStore {
    /// Creates an empty, memory-only store.
    pub fn new() -> Self {
        Self {
            db: RwLock::new(None),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a store that writes through to `db`.
    pub fn with_database(db: Database) -> Self {
        let store = Self::new();
        store.set_database(db);
        store
    }

    /// Sets the database connection.
    pub fn set_database(&self, db: Database) {
        let mut guard = match self.db.write() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job store DB lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        *guard = Some(db);
    }

    /// Gets a cloned database handle if available.
    pub fn get_database(&self) -> Option<Database> {
        let guard = match self.db.read() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job store DB lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.clone()
    }

    /// Detaches the database. Later changes stay in memory only.
    pub fn close(&self) {
        let mut guard = match self.db.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.take().is_some() {
            log::debug!("Job store detached from database");
        }
    }

    fn read_jobs(&self) -> RwLockReadGuard<'_, HashMap<String, Job>> {
        match self.jobs.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store cache lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_jobs(&self) -> RwLockWriteGuard<'_, HashMap<String, Job>> {
        match self.jobs.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store cache lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Adds a new job. Fails if the id is already taken.
    pub fn create(&self, job: Job) -> Result<Job, StoreError> {
        {
            let mut jobs = self.write_jobs();
            if jobs.contains_key(&job.id) {
                return Err(StoreError::DuplicateId(job.id));
            }
            jobs.insert(job.id.clone(), job.clone());
        }

        if let Some(db) = self.get_database() {
            if let Err(e) = job_to_row(&job).and_then(|row| job_repo::insert(&db, &row)) {
                log::error!("Failed to persist new job {}: {}", job.id, e);
            }
        }

        Ok(job)
    }

    /// Returns a snapshot of the job.
    pub fn get(&self, job_id: &str) -> Result<Job, StoreError> {
        self.read_jobs()
            .get(job_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.read_jobs().contains_key(job_id)
    }

    /// Merges `patch` into the job and returns the merged snapshot.
    pub fn update(&self, job_id: &str, patch: &JobPatch) -> Result<Job, StoreError> {
        let snapshot = {
            let mut jobs = self.write_jobs();
            let job = jobs
                .get_mut(job_id)
                .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
            job.apply(patch)
                .map_err(|reason| StoreError::InvalidTransition {
                    id: job_id.to_string(),
                    reason,
                })?;
            job.clone()
        };

        if let Some(db) = self.get_database() {
            self.persist_update(&db, &snapshot);
        }

        Ok(snapshot)
    }

    fn persist_update(&self, db: &Database, job: &Job) {
        match job_to_row(job).and_then(|row| job_repo::update(db, &row)) {
            Ok(true) => {}
            Ok(false) => log::debug!("Job {} has no database row, skipping update", job.id),
            Err(e) => log::error!("Failed to persist job {}: {}", job.id, e),
        }
    }

    /// Returns all jobs, newest first.
    pub fn list(&self) -> Vec<Job> {
        let mut result: Vec<Job> = self.read_jobs().values().cloned().collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result
    }

    /// Returns jobs with the given status, newest first.
    pub fn list_by_status(&self, status: JobStatus) -> Vec<Job> {
        let mut result: Vec<Job> = self
            .read_jobs()
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result
    }

    /// Removes a job. Deleting an unknown id is a no-op that returns `None`.
    pub fn delete(&self, job_id: &str) -> Option<Job> {
        let removed = self.write_jobs().remove(job_id);

        if let Some(db) = self.get_database() {
            if let Err(e) = job_repo::delete(&db, job_id) {
                log::error!("Failed to delete job {} from database: {}", job_id, e);
            }
        }

        removed
    }

    /// Returns the count of jobs by status.
    pub fn counts(&self) -> JobCounts {
        let mut counts = JobCounts::default();
        for job in self.read_jobs().values() {
            match job.status {
                JobStatus::Uploaded => counts.uploaded += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Loads persisted jobs into memory. Jobs already in memory win.
    ///
    /// Returns the number of jobs loaded.
    pub fn load_from_database(&self) -> Result<usize, DatabaseError> {
        let db = match self.get_database() {
            Some(db) => db,
            None => return Ok(0),
        };

        let rows = job_repo::load_all(&db)?;

        let mut loaded = 0;
        let mut jobs = self.write_jobs();
        for row in &rows {
            if jobs.contains_key(&row.id) {
                continue;
            }
            match job_from_row(row) {
                Ok(job) => {
                    jobs.insert(job.id.clone(), job);
                    loaded += 1;
                }
                Err(e) => log::warn!("Skipping unreadable job row {}: {}", row.id, e),
            }
        }

        log::info!("Loaded {} jobs from database", loaded);
        Ok(loaded)
    }

    /// Fails every job left in `Processing` by a previous process.
    ///
    /// Call only before any work is dispatched in this process.
    pub fn recover_interrupted(&self) -> usize {
        let stale: Vec<Job> = self.list_by_status(JobStatus::Processing);
        let mut recovered = 0;

        for job in stale {
            match self.fail_in_progress(
                &job.id,
                ErrorKind::Interrupted,
                "processing was interrupted by a restart",
            ) {
                Ok(_) => recovered += 1,
                Err(e) => log::warn!("Could not recover job {}: {}", job.id, e),
            }
        }

        if recovered > 0 {
            log::warn!("Marked {} interrupted jobs as failed", recovered);
        }
        recovered
    }

    /// Fails a `Processing` job that will not run any further.
    ///
    /// The running stage is marked failed. A job that never got to start a
    /// stage has its first pending stage started and then failed, so every
    /// stage keeps to `Pending -> Running -> Failed`.
    pub fn fail_in_progress(
        &self,
        job_id: &str,
        kind: ErrorKind,
        message: &str,
    ) -> Result<Job, StoreError> {
        let job = self.get(job_id)?;
        let stage = match job.stage_states.running() {
            Some(stage) => Some(stage),
            None => {
                let next = job
                    .stage_states
                    .iter()
                    .find(|(_, state)| *state == StageState::Pending)
                    .map(|(stage, _)| stage);
                if let Some(stage) = next {
                    self.update(job_id, &JobPatch::new().stage(stage, StageState::Running))?;
                }
                next
            }
        };

        let detail = ErrorDetail::new(kind, stage, message);
        self.update(job_id, &JobPatch::failed(stage, detail))
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}
