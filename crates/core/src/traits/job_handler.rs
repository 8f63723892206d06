use async_trait::async_trait;
use serde_json::Value;

use crate::errors::SchedulerResult;
use crate::models::JobKind;

/// 任务处理器接口
///
/// 每个任务类别对应一个处理器，启动时注册到 Worker 池，按 kind
/// 静态分发。处理器内部的失败通过 Err 返回，由 Worker 池记入
/// 重试簿记，不会向上传播
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// 本处理器负责的任务类别
    fn kind(&self) -> JobKind;

    /// 执行任务体，payload 是入队时携带的结构化数据
    async fn execute(&self, payload: &Value) -> SchedulerResult<()>;
}
