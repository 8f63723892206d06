pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::{SchedulerError, SchedulerResult};
pub use models::{Job, JobKind, JobSnapshot, JobState, RecurringJob};
pub use traits::{CleanupService, JobHandler, JobStore, MetadataProvider, SummaryCalculator};
