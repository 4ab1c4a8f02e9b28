pub mod queue;
pub mod timer;

pub use queue::{job, JobFn, RetryPolicy, RetryScheduler, SchedulerStats};
pub use timer::{run_checkpoints, PollTimer};
