use thiserror::Error;

use crate::models::JobState;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("存储错误: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("存储操作错误: {0}")]
    StorageOperation(String),

    #[error("任务未找到: {id}")]
    JobNotFound { id: i64 },

    #[error("非法状态转换: 任务 {id} 不能从 {from:?} 转换到 {to:?}")]
    InvalidState {
        id: i64,
        from: JobState,
        to: JobState,
    },

    #[error("任务执行失败: {0}")]
    HandlerFailed(String),

    #[error("任务执行超时")]
    HandlerTimeout,

    #[error("外部数据源错误: {0}")]
    Provider(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
