use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::{SchedulerError, SchedulerResult};

/// 配置校验接口，每个配置段各自实现
pub trait ConfigValidator {
    fn validate(&self) -> SchedulerResult<()>;
}

fn validation_error(message: impl Into<String>) -> SchedulerError {
    SchedulerError::Configuration(message.into())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl DatabaseConfig {
    /// SQLite 内存库下每个连接各自是一个独立数据库，
    /// 必须退化为单连接池
    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

impl ConfigValidator for DatabaseConfig {
    fn validate(&self) -> SchedulerResult<()> {
        if self.url.is_empty() {
            return Err(validation_error("database.url 不能为空"));
        }
        if !self.url.starts_with("sqlite:") {
            return Err(validation_error("database.url 必须以 sqlite: 开头"));
        }
        if self.max_connections == 0 {
            return Err(validation_error("database.max_connections 必须大于0"));
        }
        if self.min_connections > self.max_connections {
            return Err(validation_error(
                "database.min_connections 不能大于 max_connections",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// 限流窗口内每个任务类别允许的执行次数
    pub rate_limit_num: u32,
    /// 限流窗口大小（秒），固定窗口
    pub rate_limit_window_seconds: u64,
    /// 用户清理周期任务的节奏（小时）
    pub user_cleanup_every: i64,
    /// 汇总重算周期任务的节奏（小时）
    pub recalculate_summary_every: i64,
    /// 周期任务检查间隔（秒）
    pub poll_interval_seconds: u64,
    /// 终态任务记录的保留天数
    pub retention_days: i64,
}

impl ConfigValidator for SchedulerConfig {
    fn validate(&self) -> SchedulerResult<()> {
        if self.rate_limit_num == 0 {
            return Err(validation_error("scheduler.rate_limit_num 必须大于0"));
        }
        if self.rate_limit_window_seconds == 0 {
            return Err(validation_error(
                "scheduler.rate_limit_window_seconds 必须大于0",
            ));
        }
        if self.user_cleanup_every <= 0 {
            return Err(validation_error("scheduler.user_cleanup_every 必须大于0"));
        }
        if self.recalculate_summary_every <= 0 {
            return Err(validation_error(
                "scheduler.recalculate_summary_every 必须大于0",
            ));
        }
        if self.poll_interval_seconds == 0 {
            return Err(validation_error("scheduler.poll_interval_seconds 必须大于0"));
        }
        if self.retention_days <= 0 {
            return Err(validation_error("scheduler.retention_days 必须大于0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationConfig {
    /// 外部集成数据拉取的节奏（小时）
    pub pull_every: i64,
}

impl ConfigValidator for IntegrationConfig {
    fn validate(&self) -> SchedulerResult<()> {
        if self.pull_every <= 0 {
            return Err(validation_error("integration.pull_every 必须大于0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub enabled: bool,
    /// 并发执行槽数量
    pub concurrency: usize,
    /// 无任务可认领时的轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 单次任务执行的超时时间（秒），超时按失败处理
    pub handler_timeout_seconds: u64,
    /// 单个任务的最大执行次数
    pub max_attempts: i32,
    /// 关闭时等待在途任务完成的宽限期（秒）
    pub shutdown_grace_seconds: u64,
}

impl ConfigValidator for WorkerConfig {
    fn validate(&self) -> SchedulerResult<()> {
        if self.concurrency == 0 || self.concurrency > 1000 {
            return Err(validation_error("worker.concurrency 必须在1到1000之间"));
        }
        if self.poll_interval_ms == 0 {
            return Err(validation_error("worker.poll_interval_ms 必须大于0"));
        }
        if self.handler_timeout_seconds == 0 {
            return Err(validation_error("worker.handler_timeout_seconds 必须大于0"));
        }
        if self.max_attempts <= 0 {
            return Err(validation_error("worker.max_attempts 必须大于0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
}

impl ConfigValidator for ObservabilityConfig {
    fn validate(&self) -> SchedulerResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(validation_error(format!(
                "observability.log_level 非法: {}，可选值: {:?}",
                self.log_level, valid_levels
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub integration: IntegrationConfig,
    pub worker: WorkerConfig,
    pub observability: ObservabilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 5,
                min_connections: 1,
            },
            scheduler: SchedulerConfig {
                rate_limit_num: 5,
                rate_limit_window_seconds: 5,
                user_cleanup_every: 24,
                recalculate_summary_every: 12,
                poll_interval_seconds: 5,
                retention_days: 30,
            },
            integration: IntegrationConfig { pull_every: 2 },
            worker: WorkerConfig {
                enabled: true,
                concurrency: 4,
                poll_interval_ms: 500,
                handler_timeout_seconds: 300,
                max_attempts: 3,
                shutdown_grace_seconds: 30,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// 加载配置：默认值 → TOML 文件（显式路径或默认路径）→ 环境变量
    /// （MEDIA_JOBS 前缀，双下划线分隔层级）
    pub fn load(config_path: Option<&str>) -> SchedulerResult<Self> {
        let defaults = AppConfig::default();
        let mut builder = ConfigBuilder::builder()
            .add_source(config::Config::try_from(&defaults).map_err(|e| {
                SchedulerError::Configuration(format!("构建默认配置失败: {e}"))
            })?);

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(SchedulerError::Configuration(format!(
                    "配置文件不存在: {path}"
                )));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            let default_paths = ["config/media-jobs.toml", "media-jobs.toml"];
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        builder = builder.add_source(Environment::with_prefix("MEDIA_JOBS").separator("__"));

        let config: AppConfig = builder
            .build()
            .map_err(|e| SchedulerError::Configuration(format!("加载配置失败: {e}")))?
            .try_deserialize()
            .map_err(|e| SchedulerError::Configuration(format!("解析配置失败: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// 嵌入式默认配置：内存库、快轮询，主要用于测试
    pub fn embedded_default() -> Self {
        let mut config = Self::default();
        config.database.url = "sqlite::memory:".to_string();
        config.database.max_connections = 1;
        config.worker.poll_interval_ms = 20;
        config.worker.shutdown_grace_seconds = 2;
        config
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> SchedulerResult<()> {
        self.database.validate()?;
        self.scheduler.validate()?;
        self.integration.validate()?;
        self.worker.validate()?;
        self.observability.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
        assert!(AppConfig::embedded_default().validate().is_ok());
    }

    #[test]
    fn test_database_config_validation() {
        let mut config = AppConfig::default().database;
        assert!(config.validate().is_ok());

        config.url = "".to_string();
        assert!(config.validate().is_err());

        config.url = "postgresql://localhost/media".to_string();
        assert!(config.validate().is_err());

        config.url = "sqlite:media.db".to_string();
        config.min_connections = 10;
        config.max_connections = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_in_memory_detection() {
        let mut config = AppConfig::default().database;
        assert!(config.is_in_memory());
        config.url = "sqlite:data/media-jobs.db".to_string();
        assert!(!config.is_in_memory());
    }

    #[test]
    fn test_scheduler_config_rejects_zero_cadence() {
        let mut config = AppConfig::default().scheduler;
        config.user_cleanup_every = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_worker_config_validation() {
        let mut config = AppConfig::default().worker;
        config.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default().worker;
        config.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[database]
url = "sqlite:custom.db"

[scheduler]
rate_limit_num = 9

[worker]
concurrency = 2
"#
        )
        .unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.database.url, "sqlite:custom.db");
        assert_eq!(config.scheduler.rate_limit_num, 9);
        assert_eq!(config.worker.concurrency, 2);
        // 未覆盖的字段保持默认值
        assert_eq!(config.scheduler.rate_limit_window_seconds, 5);
        assert_eq!(config.integration.pull_every, 2);
    }

    #[test]
    fn test_load_missing_file_is_error() {
        assert!(AppConfig::load(Some("/nonexistent/media-jobs.toml")).is_err());
    }
}
