use async_trait::async_trait;

use crate::errors::SchedulerResult;

/// 元数据提供方能力接口，由外部的集成层实现（TMDB、IGDB 等的
/// 客户端封装不在本系统范围内）
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// 刷新单个媒体条目的元数据
    async fn refresh_metadata(&self, metadata_id: i64) -> SchedulerResult<()>;

    /// 拉取所有过期条目的元数据，返回刷新的条目数。
    /// 周期性 pull 任务走这条路径
    async fn refresh_outdated(&self) -> SchedulerResult<u64>;
}

/// 用户数据清理能力接口，由持久层协作方实现
#[async_trait]
pub trait CleanupService: Send + Sync {
    /// 清理失效的用户数据（过期令牌、孤儿记录等），返回清理的数量
    async fn cleanup_users(&self) -> SchedulerResult<u64>;
}

/// 汇总重算能力接口
#[async_trait]
pub trait SummaryCalculator: Send + Sync {
    /// 重算用户汇总；user_id 为 None 时重算全量
    async fn recalculate(&self, user_id: Option<i64>) -> SchedulerResult<()>;
}
