use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::errors::SchedulerResult;
use crate::models::{Job, JobKind};

/// 任务存储接口
///
/// 持久化待执行/执行中/已完成的任务记录，是调度器内唯一的任务
/// 所有权方。Worker 在 Running 期间只持有租约，所有状态转换都
/// 必须经过这里并保持原子性。
#[async_trait]
pub trait JobStore: Send + Sync {
    /// 创建一个 Pending 任务，返回落库后的完整记录
    async fn enqueue(
        &self,
        kind: JobKind,
        payload: Value,
        scheduled_for: DateTime<Utc>,
    ) -> SchedulerResult<Job>;

    /// 原子地认领一个可执行任务：挑选 scheduled_for 最早（同时间按
    /// created_at）且 kind 在 kinds 内的 Pending 任务，转为 Running
    /// 并递增 attempts。无可执行任务时返回 None，不视为错误。
    ///
    /// 并发调用下同一个任务最多被一个调用方认领成功
    async fn claim_next(
        &self,
        kinds: &[JobKind],
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<Job>>;

    /// Running → Completed
    async fn complete(&self, id: i64) -> SchedulerResult<()>;

    /// 执行失败的兜底转换：retry 为真且 attempts < max_attempts 时
    /// 回到 Pending，否则转为终态 Failed
    async fn fail(&self, id: i64, retry: bool) -> SchedulerResult<()>;

    /// 只允许取消 Pending 任务，Running 和终态任务会返回
    /// InvalidState
    async fn cancel(&self, id: i64) -> SchedulerResult<()>;

    /// 按 id 读取任务记录
    async fn get(&self, id: i64) -> SchedulerResult<Option<Job>>;

    /// 把遗留的 Running 任务重新置回 Pending，返回受影响的数量。
    /// 用于启动恢复和关闭宽限期结束后的善后
    async fn requeue_interrupted(&self) -> SchedulerResult<u64>;

    /// 清理超过保留期的终态任务记录，返回删除的数量
    async fn purge_finished(&self, retention_days: i64) -> SchedulerResult<u64>;
}
