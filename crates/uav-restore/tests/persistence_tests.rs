//! Persistence tests: jobs survive a restart through the SQLite database.

mod common;

use common::{StageSetBuilder, TestHarness};
use uav_restore::job::ErrorKind;
use uav_restore::{JobPatch, JobStatus, OutputKind, Stage, StageState};

#[test]
fn test_completed_job_survives_restart() {
    let mut harness = TestHarness::new();
    let job_id = harness.submit("site.png");
    let before = harness.wait_terminal(&job_id);
    harness.wait_idle();

    harness.restart(StageSetBuilder::new().build());

    let after = harness.service.status(&job_id).expect("job should be reloaded");
    assert_eq!(after.status, JobStatus::Completed);
    assert_eq!(after.progress, 100);
    assert!(after.stage_states.all_done());
    assert_eq!(after.original_filename, "site.png");
    assert_eq!(after.outputs, before.outputs);
    assert_eq!(after.stats, before.stats);
    assert!(after.output(OutputKind::Comparison).is_some());
    assert!(harness.service.results(&job_id).unwrap().is_ready());
}

#[test]
fn test_failed_job_keeps_error_detail_across_restart() {
    let mut harness = TestHarness::with_stages(
        StageSetBuilder::new()
            .failing(Stage::Mesh, "not enough texture")
            .build(),
    );
    let job_id = harness.submit("a.png");
    harness.wait_terminal(&job_id);
    harness.wait_idle();

    harness.restart(StageSetBuilder::new().build());

    let job = harness.service.status(&job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.stage_states.get(Stage::Mesh), StageState::Failed);
    let detail = job.error_detail.unwrap();
    assert_eq!(detail.kind, ErrorKind::StageFailure);
    assert_eq!(detail.stage, Some(Stage::Mesh));
    assert!(detail.message.contains("not enough texture"));
}

#[test]
fn test_uploaded_job_can_be_processed_after_restart() {
    let mut harness = TestHarness::new();
    let job = harness.upload("later.png");

    harness.restart(StageSetBuilder::new().build());
    harness.service.process(&job.id).unwrap();

    assert_eq!(harness.wait_terminal(&job.id).status, JobStatus::Completed);
}

#[test]
fn test_interrupted_job_is_failed_on_recovery() {
    let mut harness = TestHarness::new();
    let job = harness.upload("a.png");

    // Leave the job as a crash mid-depth would.
    harness
        .service
        .store()
        .update(
            &job.id,
            &JobPatch::new()
                .status(JobStatus::Processing)
                .stage(Stage::Deblur, StageState::Running),
        )
        .unwrap();
    harness
        .service
        .store()
        .update(
            &job.id,
            &JobPatch::new()
                .stage(Stage::Deblur, StageState::Done)
                .progress(25)
                .stage(Stage::Depth, StageState::Running),
        )
        .unwrap();

    harness.restart(StageSetBuilder::new().build());
    assert_eq!(harness.service.recover_interrupted(), 1);

    let job = harness.service.status(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.progress, 25);
    assert_eq!(job.stage_states.get(Stage::Deblur), StageState::Done);
    assert_eq!(job.stage_states.get(Stage::Depth), StageState::Failed);
    assert_eq!(job.stage_states.get(Stage::Mesh), StageState::Pending);
    let detail = job.error_detail.unwrap();
    assert_eq!(detail.kind, ErrorKind::Interrupted);
    assert_eq!(detail.stage, Some(Stage::Depth));

    // Nothing left to recover the second time.
    assert_eq!(harness.service.recover_interrupted(), 0);
}

#[test]
fn test_deleted_job_stays_deleted() {
    let mut harness = TestHarness::new();
    let kept = harness.upload("kept.png");
    let removed = harness.upload("removed.png");

    harness.service.delete(&removed.id, true).unwrap();
    assert!(!removed.input_reference.exists());

    harness.restart(StageSetBuilder::new().build());

    assert!(harness.service.status(&kept.id).is_ok());
    assert!(harness.service.status(&removed.id).is_err());
    assert_eq!(harness.service.list(None).len(), 1);
}

#[test]
fn test_database_disabled_keeps_jobs_in_memory() {
    let mut harness =
        TestHarness::with_config(|c| c.database_enabled(false), StageSetBuilder::new().build());
    let job_id = harness.submit("a.png");
    harness.wait_terminal(&job_id);
    harness.wait_idle();

    assert!(harness.config.database_path().is_none());
    assert!(!harness.data_dir().join("uav-restore.db").exists());

    harness.restart(StageSetBuilder::new().build());
    assert!(harness.service.list(None).is_empty());
}
