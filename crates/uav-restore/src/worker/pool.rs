use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, error, info, warn};

use crate::error::{DispatchError, StoreError};
use crate::job::{ErrorKind, JobPatch, JobStatus};
use crate::pipeline::runner::panic_message;
use crate::pipeline::{CancelFlag, PipelineEngine, RunOutcome};
use crate::store::JobStore;

use super::job::QueuedJob;

type ActiveJobs = Arc<Mutex<HashMap<String, CancelFlag>>>;

/// Runs jobs on a fixed set of worker threads fed by a bounded queue.
///
/// A job id is "active" from the moment it is queued until its run returns,
/// and an active id cannot be submitted again. An accepted job is moved to
/// `Processing` before it is queued.
pub struct Dispatcher {
    queue: Sender<QueuedJob>,
    // Kept to drain jobs that never started when shutting down.
    backlog: Receiver<QueuedJob>,
    store: Arc<JobStore>,
    active: ActiveJobs,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    capacity: usize,
}

impl Dispatcher {
    /// Starts `worker_count` workers (at least one) behind a queue holding
    /// up to `queue_capacity` waiting jobs.
    pub fn new(
        engine: Arc<PipelineEngine>,
        store: Arc<JobStore>,
        worker_count: usize,
        queue_capacity: usize,
    ) -> Self {
        let worker_count = worker_count.max(1);
        let capacity = queue_capacity.max(1);
        let (queue, backlog) = bounded::<QueuedJob>(capacity);
        let shutdown = Arc::new(AtomicBool::new(false));
        let active: ActiveJobs = Arc::new(Mutex::new(HashMap::new()));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let rx = backlog.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_engine = Arc::clone(&engine);
            let worker_active = Arc::clone(&active);
            let worker_store = Arc::clone(&store);

            let spawned = thread::Builder::new()
                .name(format!("uav-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(
                        worker_id,
                        rx,
                        shutdown_flag,
                        worker_engine,
                        worker_store,
                        worker_active,
                    );
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => error!("Failed to start worker {}: {}", worker_id, e),
            }
        }

        info!(
            "Started {} workers (queue capacity {})",
            workers.len(),
            capacity
        );

        Self {
            queue,
            backlog,
            store,
            active,
            workers: Mutex::new(workers),
            shutdown,
            capacity,
        }
    }

    /// Queues one execution of the job and returns without waiting for it.
    pub fn submit(&self, job_id: &str) -> Result<(), DispatchError> {
        if self.is_shutdown() {
            return Err(DispatchError::ShutDown);
        }

        // Checks and enqueue happen under the active lock so two submitters
        // cannot both pass.
        let mut active = lock_active(&self.active);

        let job = self
            .store
            .get(job_id)
            .map_err(|_| DispatchError::NotFound(job_id.to_string()))?;
        if active.contains_key(job_id) || job.status == JobStatus::Processing {
            return Err(DispatchError::AlreadyRunning(job_id.to_string()));
        }
        if job.is_terminal() {
            return Err(DispatchError::AlreadyFinished {
                id: job_id.to_string(),
                status: job.status,
            });
        }

        // Only lock holders push, so a free slot seen here stays free.
        if self.queue.is_full() {
            return Err(DispatchError::QueueFull {
                capacity: self.capacity,
            });
        }

        self.store
            .update(job_id, &JobPatch::new().status(JobStatus::Processing))
            .map_err(|e| match e {
                StoreError::NotFound(_) => DispatchError::NotFound(job_id.to_string()),
                _ => DispatchError::AlreadyRunning(job_id.to_string()),
            })?;

        let cancel = CancelFlag::new();
        match self.queue.try_send(QueuedJob::new(job_id, cancel.clone())) {
            Ok(()) => {
                active.insert(job_id.to_string(), cancel);
                debug!("Queued job {}", job_id);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.fail_unstarted(job_id, "job could not be queued");
                Err(DispatchError::QueueFull {
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Disconnected(_)) => {
                self.fail_unstarted(job_id, "job could not be queued");
                Err(DispatchError::ShutDown)
            }
        }
    }

    fn fail_unstarted(&self, job_id: &str, reason: &str) {
        if let Err(e) = self
            .store
            .fail_in_progress(job_id, ErrorKind::Cancelled, reason)
        {
            warn!("Could not fail unstarted job {}: {}", job_id, e);
        }
    }

    /// Asks a queued or running job to stop before its next stage.
    pub fn cancel(&self, job_id: &str) -> Result<(), DispatchError> {
        match lock_active(&self.active).get(job_id) {
            Some(flag) => {
                flag.cancel();
                info!("Cancellation requested for job {}", job_id);
                Ok(())
            }
            None => Err(DispatchError::NotActive(job_id.to_string())),
        }
    }

    /// Cancels every active job. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let active = lock_active(&self.active);
        for flag in active.values() {
            flag.cancel();
        }
        active.len()
    }

    /// Ids of jobs queued or running, sorted.
    pub fn active_jobs(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock_active(&self.active).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_active(&self, job_id: &str) -> bool {
        lock_active(&self.active).contains_key(job_id)
    }

    /// Stops accepting work and cancels running jobs. Jobs still in the
    /// queue are failed as cancelled.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down dispatcher...");

        let mut active = lock_active(&self.active);
        let mut drained = 0;
        while let Ok(queued) = self.backlog.try_recv() {
            active.remove(&queued.job_id);
            self.fail_unstarted(&queued.job_id, "dispatcher shut down before the job started");
            drained += 1;
        }
        for flag in active.values() {
            flag.cancel();
        }
        if drained > 0 {
            warn!("Cancelled {} queued jobs that had not started", drained);
        }
    }

    /// Joins every worker. Call after [`shutdown`](Self::shutdown).
    pub fn wait(&self) {
        let workers: Vec<JoinHandle<()>> = {
            let mut guard = match self.workers.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.drain(..).collect()
        };

        for (i, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn lock_active(active: &Mutex<HashMap<String, CancelFlag>>) -> MutexGuard<'_, HashMap<String, CancelFlag>> {
    match active.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Active job lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

fn run_worker(
    worker_id: usize,
    queue: Receiver<QueuedJob>,
    shutdown: Arc<AtomicBool>,
    engine: Arc<PipelineEngine>,
    store: Arc<JobStore>,
    active: ActiveJobs,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::SeqCst) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match queue.recv_timeout(Duration::from_millis(100)) {
            // A job taken during shutdown still runs; its cancel flag stops
            // it at the first stage boundary.
            Ok(queued) => {
                debug!("Worker {} processing job {}", worker_id, queued.job_id);
                execute(&queued, &store, &active, |id, cancel| engine.run(id, cancel));
            }
            Err(RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

/// Runs one dequeued job and releases its id.
///
/// A panic that escapes `run` fails the job instead of taking the worker
/// down with it.
fn execute<F>(queued: &QueuedJob, store: &JobStore, active: &Mutex<HashMap<String, CancelFlag>>, run: F)
where
    F: FnOnce(&str, &CancelFlag) -> RunOutcome,
{
    let result = panic::catch_unwind(AssertUnwindSafe(|| run(&queued.job_id, &queued.cancel)));

    match result {
        Ok(RunOutcome::Completed) => info!("Job {} completed", queued.job_id),
        Ok(RunOutcome::Failed(detail)) => {
            warn!("Job {} failed: {}", queued.job_id, detail.message)
        }
        Ok(RunOutcome::Abandoned) => debug!("Job {} abandoned", queued.job_id),
        Err(payload) => {
            let message = panic_message(&*payload);
            error!("Pipeline panicked on job {}: {}", queued.job_id, message);
            fail_after_panic(store, &queued.job_id, &message);
        }
    }

    lock_active(active).remove(&queued.job_id);
}

fn fail_after_panic(store: &JobStore, job_id: &str, message: &str) {
    let job = match store.get(job_id) {
        Ok(job) if !job.is_terminal() => job,
        _ => return,
    };
    let kind = if job.stage_states.all_done() {
        ErrorKind::AssemblyFailure
    } else {
        ErrorKind::StageFailure
    };
    let message = format!("pipeline panicked: {}", message);
    if let Err(e) = store.fail_in_progress(job_id, kind, &message) {
        warn!("Could not fail job {} after panic: {}", job_id, e);
    }
}
