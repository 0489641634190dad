pub mod job;
pub mod pool;

pub use job::QueuedJob;
pub use pool::Dispatcher;
