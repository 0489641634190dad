pub mod model;
pub mod patch;

pub use model::{
    progress_for, ErrorDetail, ErrorKind, ImageStats, Job, JobStats, JobStatus, MeshStats,
    OutputKind, Stage, StageState, StageStates,
};
pub use patch::JobPatch;
