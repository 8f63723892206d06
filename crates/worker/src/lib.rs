pub mod handlers;
pub mod pool;

pub use handlers::{CalculateSummaryHandler, RefreshMetadataHandler, UserCleanupHandler};
pub use pool::{WorkerPool, WorkerPoolBuilder};
