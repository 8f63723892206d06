use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use media_jobs_core::{Job, JobHandler, JobKind, JobStore, SchedulerResult};
use media_jobs_infrastructure::RateLimiter;

/// Worker池构建器
pub struct WorkerPoolBuilder {
    store: Arc<dyn JobStore>,
    rate_limiter: Arc<RateLimiter>,
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
    concurrency: usize,
    poll_interval_ms: u64,
    handler_timeout_seconds: u64,
}

impl WorkerPoolBuilder {
    pub fn new(store: Arc<dyn JobStore>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            store,
            rate_limiter,
            handlers: HashMap::new(),
            concurrency: 4,
            poll_interval_ms: 500,
            handler_timeout_seconds: 300,
        }
    }

    /// 设置并发执行槽数量
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// 设置空闲轮询间隔
    pub fn poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// 设置单次执行超时
    pub fn handler_timeout_seconds(mut self, handler_timeout_seconds: u64) -> Self {
        self.handler_timeout_seconds = handler_timeout_seconds;
        self
    }

    /// 注册任务处理器，同类别重复注册时后注册的生效
    pub fn register_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        let kind = handler.kind();
        if self.handlers.insert(kind, handler).is_some() {
            warn!("任务类别 {} 的处理器被替换", kind);
        }
        self
    }

    pub fn build(self) -> WorkerPool {
        WorkerPool {
            store: self.store,
            rate_limiter: self.rate_limiter,
            handlers: Arc::new(self.handlers),
            concurrency: self.concurrency,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            handler_timeout: Duration::from_secs(self.handler_timeout_seconds),
        }
    }
}

/// Worker池
///
/// 固定数量的独立执行槽，每个槽循环：认领 → 限流判定 → 带超时
/// 执行 → 记录结果。任务体的失败被吸收进重试簿记，存储层的意外
/// 错误记日志后继续循环，单个任务的故障不会终止整个池
pub struct WorkerPool {
    store: Arc<dyn JobStore>,
    rate_limiter: Arc<RateLimiter>,
    handlers: Arc<HashMap<JobKind, Arc<dyn JobHandler>>>,
    concurrency: usize,
    poll_interval: Duration,
    handler_timeout: Duration,
}

impl WorkerPool {
    pub fn builder(store: Arc<dyn JobStore>, rate_limiter: Arc<RateLimiter>) -> WorkerPoolBuilder {
        WorkerPoolBuilder::new(store, rate_limiter)
    }

    /// 本池感兴趣的任务类别，即已注册处理器的类别
    pub fn interested_kinds(&self) -> Vec<JobKind> {
        self.handlers.keys().copied().collect()
    }

    /// 启动所有执行槽，返回槽任务句柄
    pub fn start(self: &Arc<Self>, shutdown_tx: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        info!("启动Worker池，执行槽数量: {}", self.concurrency);

        (0..self.concurrency)
            .map(|slot_id| {
                let pool = Arc::clone(self);
                let shutdown_rx = shutdown_tx.subscribe();
                tokio::spawn(async move {
                    pool.run_slot(slot_id, shutdown_rx).await;
                })
            })
            .collect()
    }

    /// 单次轮询：认领并处理最多一个任务，返回是否处理了任务。
    /// 供执行槽循环调用，也用于测试中确定性地驱动池
    pub async fn poll_once(&self) -> SchedulerResult<bool> {
        let kinds = self.interested_kinds();
        match self.store.claim_next(&kinds, Utc::now()).await? {
            Some(job) => {
                self.execute_claimed(job).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn run_slot(&self, slot_id: usize, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!("执行槽 {} 启动", slot_id);

        loop {
            // 只在两次轮询之间响应关闭，认领到的任务执行到结束
            // 为止（超过宽限期的由门面强制中止并放回队列）
            match shutdown_rx.try_recv() {
                Err(broadcast::error::TryRecvError::Empty) => {}
                _ => {
                    info!("执行槽 {} 收到关闭信号", slot_id);
                    break;
                }
            }

            match self.poll_once().await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = shutdown_rx.recv() => {
                            info!("执行槽 {} 收到关闭信号", slot_id);
                            break;
                        }
                    }
                }
                Err(e) => {
                    // 存储层故障只影响这一轮，稍后重试
                    error!("执行槽 {} 处理任务出错: {}", slot_id, e);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        debug!("执行槽 {} 退出", slot_id);
    }

    /// 处理一个已认领的任务。限流拒绝时不执行直接放回队列；
    /// 执行超时按失败处理并计入 attempts
    async fn execute_claimed(&self, job: Job) -> SchedulerResult<()> {
        if !self.rate_limiter.try_consume(job.kind, Utc::now()) {
            debug!("任务 {} 被限流，放回队列等待容量", job.id);
            return self.store.fail(job.id, true).await;
        }

        let handler = match self.handlers.get(&job.kind) {
            Some(handler) => Arc::clone(handler),
            None => {
                error!("任务类别 {} 没有注册处理器，任务 {} 转为失败", job.kind, job.id);
                return self.store.fail(job.id, false).await;
            }
        };

        let started = std::time::Instant::now();
        match tokio::time::timeout(self.handler_timeout, handler.execute(&job.payload)).await {
            Ok(Ok(())) => {
                info!(
                    "任务 {} ({}) 执行成功，耗时{}ms",
                    job.id,
                    job.kind,
                    started.elapsed().as_millis()
                );
                self.store.complete(job.id).await
            }
            Ok(Err(e)) => {
                warn!(
                    "任务 {} ({}) 第{}次执行失败: {}",
                    job.id, job.kind, job.attempts, e
                );
                self.store.fail(job.id, true).await
            }
            Err(_) => {
                warn!(
                    "任务 {} ({}) 执行超时（{}秒），按失败处理",
                    job.id,
                    job.kind,
                    self.handler_timeout.as_secs()
                );
                self.store.fail(job.id, true).await
            }
        }
    }
}
