use crate::pipeline::CancelFlag;

/// A job waiting in, or taken from, the submission queue.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job_id: String,
    pub cancel: CancelFlag,
}

impl QueuedJob {
    pub fn new(job_id: impl Into<String>, cancel: CancelFlag) -> Self {
        Self {
            job_id: job_id.into(),
            cancel,
        }
    }
}
