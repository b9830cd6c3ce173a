pub mod controller;
pub mod job;

pub use controller::JobScheduler;
pub use job::{CompletionCallback, ExecuteStrategy, Job, JobResult, JobStatus};
