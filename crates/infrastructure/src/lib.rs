pub mod database;
pub mod rate_limiter;

pub use database::{connect, SqliteJobStore};
pub use rate_limiter::RateLimiter;
