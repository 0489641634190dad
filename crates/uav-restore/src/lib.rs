pub mod config;
pub mod db;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod processor;
pub mod sanitize;
pub mod service;
pub mod storage;
pub mod store;
pub mod worker;

pub use config::{load_config, RestoreConfig};
pub use error::{
    ConfigError, DispatchError, ProcessError, RestoreError, Result, StorageError, StoreError,
};
pub use job::{Job, JobPatch, JobStatus, OutputKind, Stage, StageState};
pub use pipeline::{CancelFlag, PipelineEngine, StageFunction, StageInput, StageOutput, StageSet};
pub use service::{RestorationService, ResultsView};
pub use store::JobStore;
pub use worker::Dispatcher;
