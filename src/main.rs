use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Arg, Command};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use media_jobs::Scheduler;
use media_jobs_core::{
    AppConfig, CleanupService, MetadataProvider, SchedulerResult, SummaryCalculator,
};
use media_jobs_worker::{CalculateSummaryHandler, RefreshMetadataHandler, UserCleanupHandler};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("media-jobs")
        .version("1.0.0")
        .about("媒体追踪系统的后台任务调度器")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"])
                .default_value("pretty"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let log_level = matches.get_one::<String>("log-level").unwrap();
    let log_format = matches.get_one::<String>("log-format").unwrap();

    // 初始化日志系统
    init_logging(log_level, log_format)?;

    info!("启动后台任务调度器");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    // 加载配置
    let config = AppConfig::load(config_path.map(String::as_str)).context("加载配置失败")?;
    let retention_days = config.scheduler.retention_days;

    let mut scheduler = Scheduler::new(config).await.context("初始化调度器失败")?;

    // 独立运行时接入日志占位协作方，宿主应用嵌入时替换为真实实现
    scheduler.register_handler(Arc::new(RefreshMetadataHandler::new(Arc::new(
        LoggingMetadataProvider,
    ))));
    scheduler.register_handler(Arc::new(UserCleanupHandler::new(
        Arc::new(LoggingCleanupService),
        scheduler.store(),
        retention_days,
    )));
    scheduler.register_handler(Arc::new(CalculateSummaryHandler::new(Arc::new(
        LoggingSummaryCalculator,
    ))));

    scheduler.start().await.context("启动调度器失败")?;

    // 等待关闭信号
    wait_for_shutdown_signal().await;

    info!("收到关闭信号，开始优雅关闭...");
    scheduler.shutdown().await.context("关闭调度器失败")?;
    scheduler.close().await;

    info!("后台任务调度器已退出");
    Ok(())
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("安装Ctrl+C信号处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("安装SIGTERM信号处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

struct LoggingMetadataProvider;

#[async_trait]
impl MetadataProvider for LoggingMetadataProvider {
    async fn refresh_metadata(&self, metadata_id: i64) -> SchedulerResult<()> {
        info!("[占位] 刷新媒体条目 {} 的元数据", metadata_id);
        Ok(())
    }

    async fn refresh_outdated(&self) -> SchedulerResult<u64> {
        info!("[占位] 拉取过期元数据");
        Ok(0)
    }
}

struct LoggingCleanupService;

#[async_trait]
impl CleanupService for LoggingCleanupService {
    async fn cleanup_users(&self) -> SchedulerResult<u64> {
        info!("[占位] 清理失效用户数据");
        Ok(0)
    }
}

struct LoggingSummaryCalculator;

#[async_trait]
impl SummaryCalculator for LoggingSummaryCalculator {
    async fn recalculate(&self, user_id: Option<i64>) -> SchedulerResult<()> {
        info!("[占位] 重算用户汇总: {:?}", user_id);
        Ok(())
    }
}
