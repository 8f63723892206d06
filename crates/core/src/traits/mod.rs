pub mod collaborators;
pub mod job_handler;
pub mod job_store;

pub use collaborators::{CleanupService, MetadataProvider, SummaryCalculator};
pub use job_handler::JobHandler;
pub use job_store::JobStore;
