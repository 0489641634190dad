//! Test harness for isolated service instances.
//!
//! Each `TestHarness` owns a temporary data directory (uploads, processed
//! artifacts and the SQLite file) and a `RestorationService` over it.

#![allow(dead_code)]

use std::io::Cursor;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use uav_restore::{Job, RestorationService, RestoreConfig, StageSet};

use super::builders::{ConfigBuilder, StageSetBuilder};

/// How long helpers wait for a job before failing the test.
pub const WAIT_LIMIT: Duration = Duration::from_secs(30);

/// Encodes a small gradient image with a bright block as PNG.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        let block = x > width / 3 && x < 2 * width / 3 && y > height / 3 && y < 2 * height / 3;
        if block {
            image::Rgb([230, 230, 230])
        } else {
            image::Rgb([((x * 255) / width.max(1)) as u8, ((y * 255) / height.max(1)) as u8, 60])
        }
    });
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("encode test image");
    bytes
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub config: RestoreConfig,
    pub service: RestorationService,
}

impl TestHarness {
    /// Stub stages and the default test config.
    pub fn new() -> Self {
        Self::with_stages(StageSetBuilder::new().build())
    }

    pub fn with_stages(stages: StageSet) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = ConfigBuilder::new(temp_dir.path()).build();
        Self::from_parts(temp_dir, config, stages)
    }

    /// Builds the config from a builder seeded with the harness directory.
    pub fn with_config(
        configure: impl FnOnce(ConfigBuilder) -> ConfigBuilder,
        stages: StageSet,
    ) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = configure(ConfigBuilder::new(temp_dir.path())).build();
        Self::from_parts(temp_dir, config, stages)
    }

    /// The built-in image stages.
    pub fn with_default_stages() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = ConfigBuilder::new(temp_dir.path()).build();
        let service =
            RestorationService::with_default_stages(&config).expect("Failed to start service");
        Self {
            temp_dir,
            config,
            service,
        }
    }

    fn from_parts(temp_dir: TempDir, config: RestoreConfig, stages: StageSet) -> Self {
        let service = RestorationService::new(&config, stages).expect("Failed to start service");
        Self {
            temp_dir,
            config,
            service,
        }
    }

    /// Shuts the service down and starts a fresh one over the same data
    /// directory, as a process restart would.
    pub fn restart(&mut self, stages: StageSet) {
        self.service.shutdown();
        self.service =
            RestorationService::new(&self.config, stages).expect("Failed to restart service");
    }

    pub fn data_dir(&self) -> PathBuf {
        self.temp_dir.path().to_path_buf()
    }

    /// Uploads a 24×16 PNG under `filename`.
    pub fn upload(&self, filename: &str) -> Job {
        self.service
            .upload(filename, &png_bytes(24, 16))
            .expect("upload failed")
    }

    /// Uploads and dispatches, returning the job id.
    pub fn submit(&self, filename: &str) -> String {
        let job = self.upload(filename);
        self.service.process(&job.id).expect("dispatch failed");
        job.id
    }

    /// Polls until `predicate` holds for the job.
    pub fn wait_until(&self, job_id: &str, predicate: impl Fn(&Job) -> bool) -> Job {
        let deadline = Instant::now() + WAIT_LIMIT;
        loop {
            let job = self.service.status(job_id).expect("job vanished");
            if predicate(&job) {
                return job;
            }
            assert!(
                Instant::now() < deadline,
                "condition not reached for job {}: {:?}",
                job_id,
                job
            );
            thread::sleep(Duration::from_millis(5));
        }
    }

    pub fn wait_terminal(&self, job_id: &str) -> Job {
        self.wait_until(job_id, |job| job.is_terminal())
    }

    /// Waits until no job is queued or running.
    pub fn wait_idle(&self) {
        let deadline = Instant::now() + WAIT_LIMIT;
        while !self.service.active_jobs().is_empty() {
            assert!(Instant::now() < deadline, "dispatcher never became idle");
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.service.shutdown();
    }
}
