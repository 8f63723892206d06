use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use media_jobs_core::{
    CleanupService, JobHandler, JobKind, JobStore, MetadataProvider, SchedulerError,
    SchedulerResult, SummaryCalculator,
};

/// 元数据刷新处理器
///
/// 负载中带 `{"id": N}` 时刷新单个条目，空负载时走周期性的
/// 过期条目全量拉取
pub struct RefreshMetadataHandler {
    provider: Arc<dyn MetadataProvider>,
}

impl RefreshMetadataHandler {
    pub fn new(provider: Arc<dyn MetadataProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl JobHandler for RefreshMetadataHandler {
    fn kind(&self) -> JobKind {
        JobKind::RefreshMetadata
    }

    async fn execute(&self, payload: &Value) -> SchedulerResult<()> {
        match payload.get("id") {
            Some(id) => {
                let metadata_id = id.as_i64().ok_or_else(|| {
                    SchedulerError::HandlerFailed(format!("负载中的 id 不是整数: {}", id))
                })?;
                debug!("刷新媒体条目 {} 的元数据", metadata_id);
                self.provider.refresh_metadata(metadata_id).await
            }
            None => {
                let refreshed = self.provider.refresh_outdated().await?;
                info!("过期元数据拉取完成，刷新了 {} 个条目", refreshed);
                Ok(())
            }
        }
    }
}

/// 用户数据清理处理器
///
/// 清理失效用户数据，顺带清除已结束的历史任务记录
pub struct UserCleanupHandler {
    cleanup: Arc<dyn CleanupService>,
    store: Arc<dyn JobStore>,
    retention_days: i64,
}

impl UserCleanupHandler {
    pub fn new(cleanup: Arc<dyn CleanupService>, store: Arc<dyn JobStore>, retention_days: i64) -> Self {
        Self {
            cleanup,
            store,
            retention_days,
        }
    }
}

#[async_trait]
impl JobHandler for UserCleanupHandler {
    fn kind(&self) -> JobKind {
        JobKind::UserCleanup
    }

    async fn execute(&self, _payload: &Value) -> SchedulerResult<()> {
        let cleaned = self.cleanup.cleanup_users().await?;
        let purged = self.store.purge_finished(self.retention_days).await?;
        info!("用户清理完成，清理 {} 条用户数据，移除 {} 条历史任务", cleaned, purged);
        Ok(())
    }
}

/// 汇总重算处理器
///
/// 负载中带 `{"user_id": N}` 时重算单个用户，空负载时重算全量
pub struct CalculateSummaryHandler {
    calculator: Arc<dyn SummaryCalculator>,
}

impl CalculateSummaryHandler {
    pub fn new(calculator: Arc<dyn SummaryCalculator>) -> Self {
        Self { calculator }
    }
}

#[async_trait]
impl JobHandler for CalculateSummaryHandler {
    fn kind(&self) -> JobKind {
        JobKind::CalculateSummary
    }

    async fn execute(&self, payload: &Value) -> SchedulerResult<()> {
        let user_id = match payload.get("user_id") {
            Some(id) => Some(id.as_i64().ok_or_else(|| {
                SchedulerError::HandlerFailed(format!("负载中的 user_id 不是整数: {}", id))
            })?),
            None => None,
        };
        debug!("重算汇总，user_id: {:?}", user_id);
        self.calculator.recalculate(user_id).await
    }
}
