pub mod app;
pub mod shutdown;

pub use app::Scheduler;
pub use shutdown::ShutdownManager;
