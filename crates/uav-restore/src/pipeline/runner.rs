use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{bounded, RecvTimeoutError};
use tracing::{debug, info, info_span, warn, Span};

use crate::error::StoreError;
use crate::job::{
    progress_for, ErrorDetail, ErrorKind, Job, JobPatch, JobStatus, Stage, StageState,
};
use crate::sanitize;
use crate::storage::ArtifactStorage;
use crate::store::JobStore;

use super::assembler::ResultAssembler;
use super::config::PipelineConfig;
use super::context::{CancelFlag, PipelineContext};
use super::error::StageError;
use super::stage::{StageFunction, StageInput, StageOutput, StageSet};

/// How a single run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    Failed(ErrorDetail),
    /// The job vanished or was closed by someone else mid-run.
    Abandoned,
}

// Stops the run without writing anything further to the job.
struct Abandoned;

enum Halt {
    Stage(StageError),
    Abandoned,
}

impl From<Abandoned> for Halt {
    fn from(_: Abandoned) -> Self {
        Halt::Abandoned
    }
}

/// Runs the four stages of one job and records every transition in the store.
pub struct PipelineEngine {
    config: Arc<PipelineConfig>,
    stages: StageSet,
    store: Arc<JobStore>,
    storage: Arc<ArtifactStorage>,
    assembler: ResultAssembler,
}

impl PipelineEngine {
    pub fn new(
        config: Arc<PipelineConfig>,
        stages: StageSet,
        store: Arc<JobStore>,
        storage: Arc<ArtifactStorage>,
    ) -> Self {
        let assembler = ResultAssembler::new(
            Arc::clone(&storage),
            config.processing.comparison_height,
            config.processing.hallucination_scale,
        );
        Self {
            config,
            stages,
            store,
            storage,
            assembler,
        }
    }

    /// Runs the job to a terminal state. Errors end up on the job record,
    /// never with the caller.
    pub fn run(&self, job_id: &str, cancel: &CancelFlag) -> RunOutcome {
        let job = match self.store.get(job_id) {
            Ok(job) => job,
            Err(e) => {
                warn!(job_id, error = %e, "Job disappeared before processing");
                return RunOutcome::Abandoned;
            }
        };

        let filename = sanitize::redact_path(&job.input_reference);
        let _pipeline_span = info_span!("pipeline",
            job_id = %job.id,
            filename = %filename,
        )
        .entered();
        let started = Instant::now();

        let mut ctx = PipelineContext::new(&job);
        for stage in Stage::ALL {
            let _stage_span = info_span!("stage", stage = %stage).entered();
            match self.run_stage(&mut ctx, stage, cancel) {
                Ok(()) => {}
                Err(Halt::Stage(e)) => {
                    warn!(error = %e, "Stage did not complete");
                    return self.fail(job_id, Some(stage), e.to_detail());
                }
                Err(Halt::Abandoned) => return RunOutcome::Abandoned,
            }
        }

        let outcome = self.finish(&ctx);
        if outcome == RunOutcome::Completed {
            info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Job completed"
            );
        }
        outcome
    }

    fn run_stage(
        &self,
        ctx: &mut PipelineContext,
        stage: Stage,
        cancel: &CancelFlag,
    ) -> Result<(), Halt> {
        self.commit(
            &ctx.job_id,
            &JobPatch::new()
                .status(JobStatus::Processing)
                .stage(stage, StageState::Running),
        )?;

        // A stage only fails from Running.
        if cancel.is_cancelled() {
            return Err(Halt::Stage(StageError::Cancelled { stage }));
        }

        let kind = stage.output_kind();
        let input = ctx.input_for(stage, self.storage.artifact_path(&ctx.job_id, kind));
        let started = Instant::now();
        let output = self.invoke(stage, input).map_err(Halt::Stage)?;

        if !self.storage.exists(&output.artifact) {
            return Err(Halt::Stage(StageError::MissingArtifact {
                stage,
                path: output.artifact,
            }));
        }

        let artifact = output.artifact.clone();
        ctx.advance(stage, output);
        self.commit(
            &ctx.job_id,
            &JobPatch::new()
                .stage(stage, StageState::Done)
                .output(kind, artifact)
                .progress(progress_for(ctx.completed)),
        )?;

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Stage done"
        );
        Ok(())
    }

    /// Calls the stage function, on a helper thread when a timeout is set.
    fn invoke(&self, stage: Stage, input: StageInput) -> Result<StageOutput, StageError> {
        let function = self.stages.get(stage);

        let limit = match self.config.stage_timeout {
            Some(limit) => limit,
            None => return call_guarded(stage, function.as_ref(), &input),
        };

        let (tx, rx) = bounded(1);
        let span = Span::current();
        let spawned = thread::Builder::new()
            .name(format!("stage-{}", stage))
            .spawn(move || {
                let _entered = span.enter();
                // The receiver is gone once the engine has given up waiting.
                let _ = tx.send(call_guarded(stage, function.as_ref(), &input));
            });
        if let Err(e) = spawned {
            return Err(StageError::Failed {
                stage,
                cause: format!("could not start stage thread: {}", e),
            });
        }

        match rx.recv_timeout(limit) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(StageError::Timeout {
                stage,
                after: limit,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(StageError::Panicked {
                stage,
                message: "stage thread exited without a result".to_string(),
            }),
        }
    }

    fn finish(&self, ctx: &PipelineContext) -> RunOutcome {
        let assembly = match self
            .assembler
            .assemble(&ctx.job_id, &ctx.source, &ctx.outputs)
        {
            Ok(assembly) => assembly,
            Err(e) => {
                warn!(error = %e, "Result assembly failed");
                let detail = ErrorDetail::new(ErrorKind::AssemblyFailure, None, e.to_string());
                return self.fail(&ctx.job_id, None, detail);
            }
        };

        let mut patch = JobPatch::new().status(JobStatus::Completed).progress(100);
        if !assembly.stats.is_empty() {
            patch = patch.stats(assembly.stats);
        }
        for (kind, path) in assembly.outputs {
            patch = patch.output(kind, path);
        }
        for warning in &assembly.warnings {
            patch = patch.warning(warning.to_string());
        }

        match self.commit(&ctx.job_id, &patch) {
            Ok(_) => RunOutcome::Completed,
            Err(Abandoned) => RunOutcome::Abandoned,
        }
    }

    fn fail(&self, job_id: &str, stage: Option<Stage>, detail: ErrorDetail) -> RunOutcome {
        match self.commit(job_id, &JobPatch::failed(stage, detail.clone())) {
            Ok(_) => RunOutcome::Failed(detail),
            Err(Abandoned) => RunOutcome::Abandoned,
        }
    }

    fn commit(&self, job_id: &str, patch: &JobPatch) -> Result<Job, Abandoned> {
        self.store.update(job_id, patch).map_err(|e| {
            match e {
                StoreError::NotFound(_) => info!("Job was deleted during processing, stopping"),
                other => warn!(error = %other, "Job update rejected, stopping"),
            }
            Abandoned
        })
    }
}

fn call_guarded(
    stage: Stage,
    function: &dyn StageFunction,
    input: &StageInput,
) -> Result<StageOutput, StageError> {
    match panic::catch_unwind(AssertUnwindSafe(|| function.run(input))) {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(StageError::Failed {
            stage,
            cause: e.to_string(),
        }),
        Err(payload) => Err(StageError::Panicked {
            stage,
            message: panic_message(&*payload),
        }),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
