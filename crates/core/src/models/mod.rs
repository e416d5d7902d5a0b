pub mod job;

pub use job::{Job, JobMetrics, JobOutput, JobState};
