//! Entry point for callers: upload, dispatch, query and administer jobs.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::{validate_config, RestoreConfig};
use crate::db::Database;
use crate::error::Result;
use crate::job::{ErrorDetail, Job, JobStats, JobStatus, OutputKind, StageStates};
use crate::pipeline::{PipelineConfig, PipelineEngine, StageSet};
use crate::processor::default_stages;
use crate::storage::ArtifactStorage;
use crate::store::{JobCounts, JobStore};
use crate::worker::Dispatcher;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Answer to a results request for a job that has not completed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotReadyView {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub stage_states: StageStates,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<ErrorDetail>,
}

/// Outputs and stats of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyView {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub outputs: BTreeMap<OutputKind, PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<JobStats>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResultsView {
    NotReady(NotReadyView),
    Ready(ReadyView),
}

impl ResultsView {
    fn from_job(job: Job) -> Self {
        if job.status == JobStatus::Completed {
            ResultsView::Ready(ReadyView {
                job_id: job.id,
                status: job.status,
                progress: job.progress,
                outputs: job.outputs,
                stats: job.stats,
                warnings: job.warnings,
            })
        } else {
            ResultsView::NotReady(NotReadyView {
                job_id: job.id,
                status: job.status,
                progress: job.progress,
                stage_states: job.stage_states,
                message: "Job not completed yet".to_string(),
                error_detail: job.error_detail,
            })
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ResultsView::Ready(_))
    }
}

/// Owns the store, artifact storage and worker pool for one data directory.
pub struct RestorationService {
    store: Arc<JobStore>,
    storage: Arc<ArtifactStorage>,
    dispatcher: Dispatcher,
}

impl RestorationService {
    /// Opens the data directory (and database, when enabled) and starts the
    /// worker pool with the given stage implementations.
    pub fn new(config: &RestoreConfig, stages: StageSet) -> Result<Self> {
        validate_config(config)?;

        let storage = Arc::new(ArtifactStorage::new(config.data_dir()));
        storage.ensure_layout()?;

        let store = match config.database_path() {
            Some(path) => {
                let store = JobStore::with_database(Database::open(&path)?);
                store.load_from_database()?;
                store
            }
            None => JobStore::new(),
        };
        let store = Arc::new(store);

        let engine = Arc::new(PipelineEngine::new(
            Arc::new(PipelineConfig::from_config(config)),
            stages,
            Arc::clone(&store),
            Arc::clone(&storage),
        ));
        let dispatcher = Dispatcher::new(
            engine,
            Arc::clone(&store),
            config.worker_count,
            config.queue_capacity,
        );

        log::info!(
            "Restoration service ready at {}",
            storage.root().display()
        );

        Ok(Self {
            store,
            storage,
            dispatcher,
        })
    }

    /// Same as [`new`](Self::new) with the built-in image stages.
    pub fn with_default_stages(config: &RestoreConfig) -> Result<Self> {
        Self::new(config, default_stages(&config.processing))
    }

    /// Stores the image and creates an `Uploaded` job for it.
    pub fn upload(&self, filename: &str, content: &[u8]) -> Result<Job> {
        let id = Job::generate_id();
        let path = self.storage.save_upload(&id, filename, content)?;
        let job = self.store.create(Job::new(id, &path, filename))?;
        log::info!("Uploaded {} as job {}", job.original_filename, job.id);
        Ok(job)
    }

    /// Starts processing in the background.
    pub fn process(&self, job_id: &str) -> Result<()> {
        self.dispatcher.submit(job_id)?;
        Ok(())
    }

    pub fn status(&self, job_id: &str) -> Result<Job> {
        Ok(self.store.get(job_id)?)
    }

    pub fn results(&self, job_id: &str) -> Result<ResultsView> {
        Ok(ResultsView::from_job(self.store.get(job_id)?))
    }

    /// All jobs, or only those with `status`, newest first.
    pub fn list(&self, status: Option<JobStatus>) -> Vec<Job> {
        match status {
            Some(status) => self.store.list_by_status(status),
            None => self.store.list(),
        }
    }

    pub fn counts(&self) -> JobCounts {
        self.store.counts()
    }

    /// Removes a job, cancelling it first if it is active. With `purge` the
    /// upload and artifacts are deleted too. Unknown ids return `None`.
    pub fn delete(&self, job_id: &str, purge: bool) -> Result<Option<Job>> {
        if self.dispatcher.is_active(job_id) {
            // Inactive by now is fine: the job finished on its own.
            let _ = self.dispatcher.cancel(job_id);
        }

        let removed = match self.store.delete(job_id) {
            Some(job) => job,
            None => return Ok(None),
        };

        if purge {
            let count = self
                .storage
                .remove_job_files(job_id, &removed.input_reference)?;
            log::info!("Deleted job {} and {} files", job_id, count);
        } else {
            log::info!("Deleted job {}", job_id);
        }
        Ok(Some(removed))
    }

    pub fn cancel(&self, job_id: &str) -> Result<()> {
        self.dispatcher.cancel(job_id)?;
        Ok(())
    }

    pub fn cancel_all(&self) -> usize {
        self.dispatcher.cancel_all()
    }

    pub fn active_jobs(&self) -> Vec<String> {
        self.dispatcher.active_jobs()
    }

    /// Fails jobs left `Processing` by an earlier process. Call before
    /// dispatching anything.
    pub fn recover_interrupted(&self) -> usize {
        self.store.recover_interrupted()
    }

    /// Polls until the job is terminal or `timeout` elapses, and returns the
    /// last snapshot either way.
    pub fn wait_for(&self, job_id: &str, timeout: Option<Duration>) -> Result<Job> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let job = self.store.get(job_id)?;
            if job.is_terminal() || deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(job);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Stops the workers, cancelling running jobs, and detaches the database.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
        self.dispatcher.wait();
        self.store.close();
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn storage(&self) -> &Arc<ArtifactStorage> {
        &self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RestoreError, StorageError, StoreError};
    use crate::job::Stage;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 20) as u8, (y * 20) as u8, 90])
        });
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn test_config(dir: &std::path::Path) -> RestoreConfig {
        let mut config = RestoreConfig::default();
        config.data_directory = dir.to_string_lossy().to_string();
        config.worker_count = 2;
        config.queue_capacity = 8;
        config.processing.mesh_grid = 8;
        config.processing.comparison_height = 16;
        config
    }

    #[test]
    fn test_upload_creates_uploaded_job() {
        let temp_dir = TempDir::new().unwrap();
        let service = RestorationService::with_default_stages(&test_config(temp_dir.path())).unwrap();

        let job = service.upload("site photo.png", &png_bytes(8, 8)).unwrap();

        assert_eq!(job.status, JobStatus::Uploaded);
        assert_eq!(job.original_filename, "site photo.png");
        assert!(job.input_reference.is_file());
        let name = job.input_reference.file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(name, format!("{}_site_photo.png", job.id));
        service.shutdown();
    }

    #[test]
    fn test_upload_rejects_bad_content() {
        let temp_dir = TempDir::new().unwrap();
        let service = RestorationService::with_default_stages(&test_config(temp_dir.path())).unwrap();

        assert!(matches!(
            service.upload("a.png", b""),
            Err(RestoreError::Storage(StorageError::EmptyUpload))
        ));
        assert!(matches!(
            service.upload("a.png", b"plain text"),
            Err(RestoreError::Storage(StorageError::UnsupportedImage { .. }))
        ));
        assert!(service.list(None).is_empty());
        service.shutdown();
    }

    #[test]
    fn test_results_before_processing() {
        let temp_dir = TempDir::new().unwrap();
        let service = RestorationService::with_default_stages(&test_config(temp_dir.path())).unwrap();
        let job = service.upload("a.png", &png_bytes(8, 8)).unwrap();

        let view = service.results(&job.id).unwrap();
        assert!(!view.is_ready());
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["status"], "uploaded");
        assert_eq!(json["progress"], 0);
        assert_eq!(json["message"], "Job not completed yet");
        assert_eq!(json["stageStates"]["deblur"], "pending");
        assert!(json.get("outputs").is_none());
        service.shutdown();
    }

    #[test]
    fn test_process_to_completion() {
        let temp_dir = TempDir::new().unwrap();
        let service = RestorationService::with_default_stages(&test_config(temp_dir.path())).unwrap();
        let job = service.upload("a.png", &png_bytes(12, 10)).unwrap();

        service.process(&job.id).unwrap();
        let done = service.wait_for(&job.id, Some(Duration::from_secs(30))).unwrap();
        assert_eq!(done.status, JobStatus::Completed);

        match service.results(&job.id).unwrap() {
            ResultsView::Ready(ready) => {
                assert_eq!(ready.status, JobStatus::Completed);
                assert_eq!(ready.progress, 100);
                assert_eq!(ready.outputs.len(), 5);
                assert!(ready.outputs.values().all(|p| p.is_file()));
                assert!(ready.stats.unwrap().restored_image.is_some());
            }
            other => panic!("expected ready results, got {:?}", other),
        }
        service.shutdown();
    }

    #[test]
    fn test_unknown_ids() {
        let temp_dir = TempDir::new().unwrap();
        let service = RestorationService::with_default_stages(&test_config(temp_dir.path())).unwrap();

        assert!(matches!(
            service.status("nope"),
            Err(RestoreError::Store(StoreError::NotFound(_)))
        ));
        assert!(matches!(service.results("nope"), Err(RestoreError::Store(_))));
        assert!(matches!(service.process("nope"), Err(RestoreError::Dispatch(_))));
        assert!(service.delete("nope", true).unwrap().is_none());
        service.shutdown();
    }

    #[test]
    fn test_delete_with_purge() {
        let temp_dir = TempDir::new().unwrap();
        let service = RestorationService::with_default_stages(&test_config(temp_dir.path())).unwrap();
        let job = service.upload("a.png", &png_bytes(8, 8)).unwrap();
        service.process(&job.id).unwrap();
        service.wait_for(&job.id, Some(Duration::from_secs(30))).unwrap();
        let restored = service
            .storage()
            .artifact_path(&job.id, OutputKind::RestoredImage);
        assert!(restored.is_file());

        let removed = service.delete(&job.id, true).unwrap().unwrap();

        assert_eq!(removed.id, job.id);
        assert!(!job.input_reference.exists());
        assert!(!restored.exists());
        assert!(service.list(None).is_empty());
        service.shutdown();
    }

    #[test]
    fn test_list_filters_by_status() {
        let temp_dir = TempDir::new().unwrap();
        let service = RestorationService::with_default_stages(&test_config(temp_dir.path())).unwrap();
        let first = service.upload("a.png", &png_bytes(8, 8)).unwrap();
        service.upload("b.png", &png_bytes(8, 8)).unwrap();

        service.process(&first.id).unwrap();
        service.wait_for(&first.id, Some(Duration::from_secs(30))).unwrap();

        assert_eq!(service.list(None).len(), 2);
        assert_eq!(service.list(Some(JobStatus::Uploaded)).len(), 1);
        let completed = service.list(Some(JobStatus::Completed));
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].stage_states.get(Stage::Hallucination), crate::job::StageState::Done);
        assert_eq!(service.counts().total(), 2);
        service.shutdown();
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(temp_dir.path());
        config.worker_count = 0;

        assert!(matches!(
            RestorationService::with_default_stages(&config),
            Err(RestoreError::Config(_))
        ));
    }
}
