use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use media_jobs_core::{
    AppConfig, Job, JobHandler, JobKind, JobSnapshot, JobStore, RecurringJob, SchedulerError,
    SchedulerResult,
};
use media_jobs_dispatcher::CronTrigger;
use media_jobs_infrastructure::{database, RateLimiter, SqliteJobStore};
use media_jobs_worker::WorkerPool;

use crate::shutdown::ShutdownManager;

/// 调度器门面
///
/// 对宿主应用的唯一入口：创建时建立数据库连接并迁移表结构，
/// 注册处理器后调用 start 拉起周期任务触发器和Worker池，
/// 之后通过 schedule_on_demand / status 与任务交互，
/// shutdown 在宽限期内等待在途任务后退出
pub struct Scheduler {
    config: AppConfig,
    pool: SqlitePool,
    store: Arc<dyn JobStore>,
    rate_limiter: Arc<RateLimiter>,
    trigger: Arc<CronTrigger>,
    shutdown: ShutdownManager,
    pending_handlers: Vec<Arc<dyn JobHandler>>,
    handles: Vec<JoinHandle<()>>,
    started: bool,
}

impl Scheduler {
    /// 创建调度器实例，完成数据库连接与表结构迁移
    pub async fn new(config: AppConfig) -> SchedulerResult<Self> {
        info!("初始化任务调度器");

        let pool = database::connect(&config.database).await?;
        SqliteJobStore::migrate(&pool).await?;

        let store: Arc<dyn JobStore> =
            Arc::new(SqliteJobStore::new(pool.clone(), config.worker.max_attempts));
        let rate_limiter = Arc::new(RateLimiter::new(
            config.scheduler.rate_limit_num,
            config.scheduler.rate_limit_window_seconds,
        ));
        let trigger = Arc::new(CronTrigger::new(Arc::clone(&store)));

        Ok(Self {
            config,
            pool,
            store,
            rate_limiter,
            trigger,
            shutdown: ShutdownManager::new(),
            pending_handlers: Vec::new(),
            handles: Vec::new(),
            started: false,
        })
    }

    /// 注册任务处理器，必须在 start 之前调用
    pub fn register_handler(&mut self, handler: Arc<dyn JobHandler>) {
        self.pending_handlers.push(handler);
    }

    /// 任务存储的共享句柄，供需要操作任务历史的处理器使用
    pub fn store(&self) -> Arc<dyn JobStore> {
        Arc::clone(&self.store)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 启动调度器
    ///
    /// 先把上次运行遗留的 Running 任务放回队列，然后注册内置的
    /// 周期任务节奏，最后拉起触发器循环和Worker池
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.started {
            return Err(SchedulerError::Internal("调度器已经启动".to_string()));
        }
        self.started = true;

        let requeued = self.store.requeue_interrupted().await?;
        if requeued > 0 {
            warn!("上次运行中断的 {} 个任务已放回队列", requeued);
        }

        let now = Utc::now();
        self.trigger
            .register(RecurringJob::new(
                JobKind::UserCleanup,
                self.config.scheduler.user_cleanup_every,
                now,
            ))
            .await;
        self.trigger
            .register(RecurringJob::new(
                JobKind::RefreshMetadata,
                self.config.integration.pull_every,
                now,
            ))
            .await;
        self.trigger
            .register(RecurringJob::new(
                JobKind::CalculateSummary,
                self.config.scheduler.recalculate_summary_every,
                now,
            ))
            .await;

        let trigger = Arc::clone(&self.trigger);
        let trigger_shutdown = self.shutdown.subscribe();
        let poll_interval = Duration::from_secs(self.config.scheduler.poll_interval_seconds);
        self.handles.push(tokio::spawn(async move {
            trigger.run(poll_interval, trigger_shutdown).await;
        }));

        if self.config.worker.enabled {
            let mut builder =
                WorkerPool::builder(Arc::clone(&self.store), Arc::clone(&self.rate_limiter))
                    .concurrency(self.config.worker.concurrency)
                    .poll_interval_ms(self.config.worker.poll_interval_ms)
                    .handler_timeout_seconds(self.config.worker.handler_timeout_seconds);

            for handler in self.pending_handlers.drain(..) {
                builder = builder.register_handler(handler);
            }

            let worker_pool = Arc::new(builder.build());
            self.handles
                .extend(worker_pool.start(self.shutdown.sender()));
        } else {
            info!("Worker池被禁用，仅运行周期任务触发器");
        }

        info!("任务调度器启动完成");
        Ok(())
    }

    /// 按需入队一个任务，延迟 delay 后可被认领
    pub async fn schedule_on_demand(
        &self,
        kind: JobKind,
        payload: Value,
        delay: Duration,
    ) -> SchedulerResult<Job> {
        let scheduled_for = Utc::now()
            + chrono::Duration::from_std(delay)
                .map_err(|e| SchedulerError::Internal(format!("延迟时间非法: {}", e)))?;
        self.store.enqueue(kind, payload, scheduled_for).await
    }

    /// 查询任务状态
    pub async fn status(&self, id: i64) -> SchedulerResult<JobSnapshot> {
        match self.store.get(id).await? {
            Some(job) => Ok(job.snapshot()),
            None => Err(SchedulerError::JobNotFound { id }),
        }
    }

    /// 取消一个尚未开始执行的任务
    pub async fn cancel(&self, id: i64) -> SchedulerResult<()> {
        self.store.cancel(id).await
    }

    /// 某个周期任务类别的下次触发时间
    pub async fn next_fire_at(&self, kind: JobKind) -> Option<chrono::DateTime<Utc>> {
        self.trigger.next_fire_at(kind).await
    }

    /// 优雅关闭
    ///
    /// 广播关闭信号后在宽限期内等待所有后台任务退出，超时的
    /// 任务被强制中止，其未完成的工作放回队列等待下次启动
    pub async fn shutdown(&mut self) -> SchedulerResult<()> {
        info!("开始关闭任务调度器");
        self.shutdown.shutdown().await;

        let grace = Duration::from_secs(self.config.worker.shutdown_grace_seconds);
        for mut handle in self.handles.drain(..) {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("后台任务异常退出: {}", e),
                Err(_) => {
                    warn!(
                        "后台任务在宽限期（{}秒）内未退出，强制中止",
                        grace.as_secs()
                    );
                    handle.abort();
                }
            }
        }

        let requeued = self.store.requeue_interrupted().await?;
        if requeued > 0 {
            info!("{} 个未完成的任务已放回队列", requeued);
        }

        info!("任务调度器已关闭");
        Ok(())
    }

    /// 关闭数据库连接池，shutdown 之后调用
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
