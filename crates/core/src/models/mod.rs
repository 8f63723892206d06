pub mod job;
pub mod recurring;

pub use job::{Job, JobKind, JobSnapshot, JobState};
pub use recurring::RecurringJob;
