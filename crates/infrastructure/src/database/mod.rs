use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use media_jobs_core::config::DatabaseConfig;
use media_jobs_core::SchedulerResult;

pub mod sqlite_job_store;

pub use sqlite_job_store::SqliteJobStore;

/// 创建SQLite连接池
///
/// 内存库强制单连接：每个SQLite内存连接各自是独立数据库，
/// 多连接池会让不同的调用方看到不同的数据
pub async fn connect(config: &DatabaseConfig) -> SchedulerResult<SqlitePool> {
    let connect_options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(std::time::Duration::from_secs(5));

    let pool = if config.is_in_memory() {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await?
    } else {
        let connect_options = connect_options.journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_with(connect_options)
            .await?
    };

    info!("数据库连接池创建完成: {}", config.url);
    Ok(pool)
}
