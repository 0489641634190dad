//! Builders for configurations and stage sets.
//!
//! Stub stages copy their input to the expected destination (the mesh stub
//! writes a single triangle, the refinement stub subdivides it), so jobs run
//! in milliseconds and the result assembler still finds real files.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};

use uav_restore::processor::Mesh;
use uav_restore::{ProcessError, RestoreConfig, Stage, StageFunction, StageInput, StageOutput, StageSet};

/// Builder for creating `RestoreConfig` instances rooted in a test directory.
pub struct ConfigBuilder {
    config: RestoreConfig,
}

impl ConfigBuilder {
    /// Small pool, small queue, database on, tiny meshes and comparisons.
    pub fn new(data_dir: &Path) -> Self {
        let mut config = RestoreConfig::default();
        config.data_directory = data_dir.to_string_lossy().to_string();
        config.worker_count = 2;
        config.queue_capacity = 16;
        config.processing.mesh_grid = 8;
        config.processing.comparison_height = 16;
        Self { config }
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn stage_timeout_secs(mut self, secs: u64) -> Self {
        self.config.stage_timeout_secs = Some(secs);
        self
    }

    pub fn database_enabled(mut self, enabled: bool) -> Self {
        self.config.database.enabled = enabled;
        self
    }

    pub fn mesh_grid(mut self, grid: u32) -> Self {
        self.config.processing.mesh_grid = grid;
        self
    }

    pub fn build(self) -> RestoreConfig {
        self.config
    }
}

// ── Stub stages ──

/// Copies the incoming artifact to the destination.
pub fn copy_stage() -> Arc<dyn StageFunction> {
    Arc::new(|input: &StageInput| -> Result<StageOutput, ProcessError> {
        std::fs::copy(&input.artifact, &input.destination).map_err(|e| ProcessError::Io {
            path: input.destination.clone(),
            source: e,
        })?;
        Ok(StageOutput::new(input.destination.clone()))
    })
}

/// Writes a one-triangle OBJ to the destination.
pub fn triangle_stage() -> Arc<dyn StageFunction> {
    Arc::new(|input: &StageInput| -> Result<StageOutput, ProcessError> {
        let mesh = Mesh {
            vertices: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            faces: vec![[0, 1, 2]],
        };
        mesh.write_obj(&input.destination)?;
        Ok(StageOutput::new(input.destination.clone()))
    })
}

/// Subdivides the incoming OBJ once.
pub fn subdivide_stage() -> Arc<dyn StageFunction> {
    Arc::new(|input: &StageInput| -> Result<StageOutput, ProcessError> {
        Mesh::read_obj(&input.artifact)?
            .subdivide()
            .write_obj(&input.destination)?;
        Ok(StageOutput::new(input.destination.clone()))
    })
}

/// Releases blocked stages, one per token.
pub struct Gate {
    sender: Sender<()>,
}

impl Gate {
    pub fn open(&self) {
        let _ = self.sender.send(());
    }

    pub fn open_many(&self, count: usize) {
        for _ in 0..count {
            self.open();
        }
    }
}

/// Builder for `StageSet`s made of stubs, with individual stages replaced.
pub struct StageSetBuilder {
    stages: StageSet,
}

impl StageSetBuilder {
    pub fn new() -> Self {
        Self {
            stages: StageSet::new(copy_stage(), copy_stage(), triangle_stage(), subdivide_stage()),
        }
    }

    pub fn with(mut self, stage: Stage, function: Arc<dyn StageFunction>) -> Self {
        self.stages = self.stages.with(stage, function);
        self
    }

    /// `stage` fails with `message`.
    pub fn failing(self, stage: Stage, message: &'static str) -> Self {
        self.with(
            stage,
            Arc::new(
                move |_: &StageInput| -> Result<StageOutput, ProcessError> {
                    Err(ProcessError::Failed(message.to_string()))
                },
            ),
        )
    }

    /// `stage` panics with `message`.
    pub fn panicking(self, stage: Stage, message: &'static str) -> Self {
        self.with(
            stage,
            Arc::new(
                move |_: &StageInput| -> Result<StageOutput, ProcessError> { panic!("{}", message) },
            ),
        )
    }

    /// `stage` sleeps for `delay` before doing its stub work.
    pub fn slow(self, stage: Stage, delay: Duration) -> Self {
        let inner = self.stages.get(stage);
        self.with(
            stage,
            Arc::new(
                move |input: &StageInput| -> Result<StageOutput, ProcessError> {
                    std::thread::sleep(delay);
                    inner.run(input)
                },
            ),
        )
    }

    /// `stage` blocks until the returned gate is opened (or ten seconds pass).
    pub fn gated(self, stage: Stage) -> (Self, Gate) {
        let (sender, receiver) = bounded::<()>(64);
        let inner = self.stages.get(stage);
        let builder = self.with(
            stage,
            Arc::new(
                move |input: &StageInput| -> Result<StageOutput, ProcessError> {
                    let _ = receiver.recv_timeout(Duration::from_secs(10));
                    inner.run(input)
                },
            ),
        );
        (builder, Gate { sender })
    }

    /// Counts invocations of `stage`.
    pub fn counted(self, stage: Stage) -> (Self, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        let inner = self.stages.get(stage);
        let builder = self.with(
            stage,
            Arc::new(
                move |input: &StageInput| -> Result<StageOutput, ProcessError> {
                    seen.fetch_add(1, Ordering::SeqCst);
                    inner.run(input)
                },
            ),
        );
        (builder, counter)
    }

    pub fn build(self) -> StageSet {
        self.stages
    }
}

impl Default for StageSetBuilder {
    fn default() -> Self {
        Self::new()
    }
}
