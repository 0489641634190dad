pub mod assembler;
pub mod config;
pub mod context;
pub mod error;
pub mod runner;
pub mod stage;

pub use assembler::{Assembly, ResultAssembler};
pub use config::PipelineConfig;
pub use context::{CancelFlag, PipelineContext};
pub use error::{AssemblyError, PipelineWarning, StageError};
pub use runner::{PipelineEngine, RunOutcome};
pub use stage::{DepthField, StageFunction, StageInput, StageOutput, StageSet};
