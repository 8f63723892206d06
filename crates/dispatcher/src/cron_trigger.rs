use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info};

use media_jobs_core::{JobKind, JobStore, RecurringJob, SchedulerResult};

/// 周期任务触发器
///
/// 持有周期任务定义的注册表，按固定间隔检查并把到期的定义派生为
/// 普通任务入队。注册表按任务类别去重，重复注册替换节奏而不是
/// 追加定义
pub struct CronTrigger {
    store: Arc<dyn JobStore>,
    definitions: RwLock<HashMap<JobKind, RecurringJob>>,
}

impl CronTrigger {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            definitions: RwLock::new(HashMap::new()),
        }
    }

    /// 注册周期任务定义，按 kind 幂等
    pub async fn register(&self, recurring: RecurringJob) {
        let mut definitions = self.definitions.write().await;
        match definitions.insert(recurring.kind, recurring.clone()) {
            Some(previous) => info!(
                "周期任务 {} 重新注册: 节奏 {}小时 → {}小时",
                recurring.kind, previous.every_hours, recurring.every_hours
            ),
            None => info!(
                "周期任务 {} 注册成功，节奏 {}小时",
                recurring.kind, recurring.every_hours
            ),
        }
    }

    /// 下一次触发时间，供状态查询和测试使用
    pub async fn next_fire_at(&self, kind: JobKind) -> Option<DateTime<Utc>> {
        self.definitions
            .read()
            .await
            .get(&kind)
            .map(|d| d.next_fire_at)
    }

    /// 检查所有定义，为每个到期定义入队最多一个任务，随后把
    /// next_fire_at 跳到未来（停机积压不补发）。入队失败的定义
    /// 不推进触发时间，留给下一轮重试。返回本轮入队的任务数
    pub async fn run_due(&self, now: DateTime<Utc>) -> SchedulerResult<usize> {
        let mut definitions = self.definitions.write().await;
        let mut enqueued = 0;

        for recurring in definitions.values_mut() {
            if !recurring.is_due(now) {
                continue;
            }
            match self.store.enqueue(recurring.kind, json!({}), now).await {
                Ok(job) => {
                    debug!(
                        "周期任务 {} 已派生: job_id={}",
                        recurring.kind, job.id
                    );
                    recurring.advance_past(now);
                    enqueued += 1;
                }
                Err(e) => {
                    error!("周期任务 {} 入队失败: {}", recurring.kind, e);
                }
            }
        }

        Ok(enqueued)
    }

    /// 触发器主循环，收到关闭信号后退出
    pub async fn run(
        self: Arc<Self>,
        poll_interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_due(Utc::now()).await {
                        error!("周期任务检查失败: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("周期任务触发器收到关闭信号");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use media_jobs_core::{Job, SchedulerError};
    use serde_json::Value;
    use std::sync::Mutex;

    /// 只记录入队调用的测试桩
    #[derive(Default)]
    struct RecordingStore {
        enqueued: Mutex<Vec<(JobKind, DateTime<Utc>)>>,
        fail_enqueue: std::sync::atomic::AtomicBool,
    }

    impl RecordingStore {
        fn enqueued(&self) -> Vec<(JobKind, DateTime<Utc>)> {
            self.enqueued.lock().unwrap().clone()
        }

        fn set_failing(&self, failing: bool) {
            self.fail_enqueue
                .store(failing, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl JobStore for RecordingStore {
        async fn enqueue(
            &self,
            kind: JobKind,
            payload: Value,
            scheduled_for: DateTime<Utc>,
        ) -> SchedulerResult<Job> {
            if self.fail_enqueue.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(SchedulerError::StorageOperation("存储不可用".to_string()));
            }
            let mut enqueued = self.enqueued.lock().unwrap();
            enqueued.push((kind, scheduled_for));
            let mut job = Job::new(kind, payload, scheduled_for, 3);
            job.id = enqueued.len() as i64;
            Ok(job)
        }

        async fn claim_next(
            &self,
            _kinds: &[JobKind],
            _now: DateTime<Utc>,
        ) -> SchedulerResult<Option<Job>> {
            Ok(None)
        }

        async fn complete(&self, _id: i64) -> SchedulerResult<()> {
            Ok(())
        }

        async fn fail(&self, _id: i64, _retry: bool) -> SchedulerResult<()> {
            Ok(())
        }

        async fn cancel(&self, _id: i64) -> SchedulerResult<()> {
            Ok(())
        }

        async fn get(&self, _id: i64) -> SchedulerResult<Option<Job>> {
            Ok(None)
        }

        async fn requeue_interrupted(&self) -> SchedulerResult<u64> {
            Ok(0)
        }

        async fn purge_finished(&self, _retention_days: i64) -> SchedulerResult<u64> {
            Ok(0)
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_fires_exactly_once_per_boundary() {
        let store = Arc::new(RecordingStore::default());
        let trigger = CronTrigger::new(store.clone() as Arc<dyn JobStore>);
        trigger
            .register(RecurringJob::new(JobKind::UserCleanup, 1, at(0)))
            .await;

        // 每15分钟检查一次，跨4小时
        let mut now = at(0);
        while now <= at(4) {
            trigger.run_due(now).await.unwrap();
            now += chrono::Duration::minutes(15);
        }

        assert_eq!(store.enqueued().len(), 4);
    }

    #[tokio::test]
    async fn test_downtime_gap_enqueues_single_job() {
        let store = Arc::new(RecordingStore::default());
        let trigger = CronTrigger::new(store.clone() as Arc<dyn JobStore>);
        trigger
            .register(RecurringJob::new(JobKind::RefreshMetadata, 1, at(0)))
            .await;

        // 模拟停机10小时后的第一次检查
        let resume = at(10);
        let enqueued = trigger.run_due(resume).await.unwrap();
        assert_eq!(enqueued, 1);
        assert_eq!(store.enqueued().len(), 1);

        let next = trigger.next_fire_at(JobKind::RefreshMetadata).await.unwrap();
        assert!(next > resume);

        // 紧接着的下一轮检查不再触发
        assert_eq!(trigger.run_due(resume).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reregister_replaces_cadence() {
        let store = Arc::new(RecordingStore::default());
        let trigger = CronTrigger::new(store.clone() as Arc<dyn JobStore>);
        trigger
            .register(RecurringJob::new(JobKind::UserCleanup, 24, at(0)))
            .await;
        trigger
            .register(RecurringJob::new(JobKind::UserCleanup, 1, at(0)))
            .await;

        assert_eq!(
            trigger.next_fire_at(JobKind::UserCleanup).await.unwrap(),
            at(1)
        );
        // 注册表内仍然只有一个定义
        assert_eq!(trigger.run_due(at(1)).await.unwrap(), 1);
        assert_eq!(store.enqueued().len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_failure_does_not_advance() {
        let store = Arc::new(RecordingStore::default());
        let trigger = CronTrigger::new(store.clone() as Arc<dyn JobStore>);
        trigger
            .register(RecurringJob::new(JobKind::CalculateSummary, 1, at(0)))
            .await;

        store.set_failing(true);
        assert_eq!(trigger.run_due(at(1)).await.unwrap(), 0);

        // 存储恢复后同一个触发点被重试
        store.set_failing(false);
        assert_eq!(trigger.run_due(at(1)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_independent_kinds_fire_together() {
        let store = Arc::new(RecordingStore::default());
        let trigger = CronTrigger::new(store.clone() as Arc<dyn JobStore>);
        trigger
            .register(RecurringJob::new(JobKind::UserCleanup, 1, at(0)))
            .await;
        trigger
            .register(RecurringJob::new(JobKind::RefreshMetadata, 2, at(0)))
            .await;

        assert_eq!(trigger.run_due(at(2)).await.unwrap(), 2);
        let kinds: Vec<JobKind> = store.enqueued().iter().map(|(k, _)| *k).collect();
        assert!(kinds.contains(&JobKind::UserCleanup));
        assert!(kinds.contains(&JobKind::RefreshMetadata));
    }
}
