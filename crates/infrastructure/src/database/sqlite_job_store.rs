use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use media_jobs_core::{
    Job, JobKind, JobState, JobStore, SchedulerError, SchedulerResult,
};

const JOB_COLUMNS: &str =
    "id, kind, payload, state, attempts, max_attempts, scheduled_for, created_at, last_updated_at";

/// SQLite任务存储实现
///
/// 所有状态转换都带状态前置条件（WHERE state = ...），认领用单条
/// UPDATE ... RETURNING 完成，依赖SQLite的串行写保证至多一次分发
pub struct SqliteJobStore {
    pool: SqlitePool,
    max_attempts: i32,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool, max_attempts: i32) -> Self {
        Self { pool, max_attempts }
    }

    /// 建表和索引，重复执行安全
    pub async fn migrate(pool: &SqlitePool) -> SchedulerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL DEFAULT '{}',
                state TEXT NOT NULL DEFAULT 'PENDING',
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 3,
                scheduled_for TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_jobs_state_scheduled ON jobs(state, scheduled_for)",
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_kind ON jobs(kind)")
            .execute(pool)
            .await?;

        debug!("任务表迁移完成");
        Ok(())
    }

    fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> SchedulerResult<Job> {
        let payload_raw: String = row.try_get("payload")?;
        let payload: Value = serde_json::from_str(&payload_raw)
            .map_err(|e| SchedulerError::Serialization(format!("解析任务payload失败: {e}")))?;

        Ok(Job {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            payload,
            state: row.try_get("state")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            scheduled_for: row.try_get("scheduled_for")?,
            created_at: row.try_get("created_at")?,
            last_updated_at: row.try_get("last_updated_at")?,
        })
    }

    /// 带状态前置条件的转换没有命中时，区分任务不存在和状态非法
    async fn transition_conflict(&self, id: i64, to: JobState) -> SchedulerError {
        match self.get(id).await {
            Ok(Some(job)) => SchedulerError::InvalidState {
                id,
                from: job.state,
                to,
            },
            Ok(None) => SchedulerError::JobNotFound { id },
            Err(e) => e,
        }
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn enqueue(
        &self,
        kind: JobKind,
        payload: Value,
        scheduled_for: DateTime<Utc>,
    ) -> SchedulerResult<Job> {
        let payload_raw = serde_json::to_string(&payload)
            .map_err(|e| SchedulerError::Serialization(format!("序列化任务payload失败: {e}")))?;
        let now = Utc::now();

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO jobs (kind, payload, state, attempts, max_attempts,
                              scheduled_for, created_at, last_updated_at)
            VALUES ($1, $2, 'PENDING', 0, $3, $4, $5, $5)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(kind)
        .bind(&payload_raw)
        .bind(self.max_attempts)
        .bind(scheduled_for)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let job = Self::row_to_job(&row)?;
        debug!("任务入队成功: id={} kind={}", job.id, job.kind);
        Ok(job)
    }

    async fn claim_next(
        &self,
        kinds: &[JobKind],
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<Job>> {
        if kinds.is_empty() {
            return Ok(None);
        }

        let placeholders: Vec<String> = (0..kinds.len()).map(|i| format!("${}", i + 3)).collect();
        let query = format!(
            r#"
            UPDATE jobs
            SET state = 'RUNNING', attempts = attempts + 1, last_updated_at = $1
            WHERE id = (
                SELECT id FROM jobs
                WHERE state = 'PENDING' AND scheduled_for <= $2
                  AND attempts < max_attempts AND kind IN ({})
                ORDER BY scheduled_for ASC, created_at ASC, id ASC
                LIMIT 1
            )
            RETURNING {JOB_COLUMNS}
            "#,
            placeholders.join(", ")
        );

        let mut sqlx_query = sqlx::query(&query).bind(now).bind(now);
        for &kind in kinds {
            sqlx_query = sqlx_query.bind(kind);
        }

        let row = sqlx_query.fetch_optional(&self.pool).await?;
        match row {
            Some(row) => {
                let job = Self::row_to_job(&row)?;
                debug!(
                    "认领任务成功: id={} kind={} attempts={}",
                    job.id, job.kind, job.attempts
                );
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn complete(&self, id: i64) -> SchedulerResult<()> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'COMPLETED', last_updated_at = $1
             WHERE id = $2 AND state = 'RUNNING'",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_conflict(id, JobState::Completed).await);
        }

        debug!("任务执行完成: id={}", id);
        Ok(())
    }

    async fn fail(&self, id: i64, retry: bool) -> SchedulerResult<()> {
        let result = sqlx::query(
            "UPDATE jobs
             SET state = CASE WHEN $1 AND attempts < max_attempts
                              THEN 'PENDING' ELSE 'FAILED' END,
                 last_updated_at = $2
             WHERE id = $3 AND state = 'RUNNING'",
        )
        .bind(retry)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_conflict(id, JobState::Failed).await);
        }

        debug!("任务执行失败已记录: id={} retry={}", id, retry);
        Ok(())
    }

    async fn cancel(&self, id: i64) -> SchedulerResult<()> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'CANCELLED', last_updated_at = $1
             WHERE id = $2 AND state = 'PENDING'",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_conflict(id, JobState::Cancelled).await);
        }

        debug!("任务已取消: id={}", id);
        Ok(())
    }

    async fn get(&self, id: i64) -> SchedulerResult<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    async fn requeue_interrupted(&self) -> SchedulerResult<u64> {
        // 被中断时执行机会已耗尽的任务直接终态化，不再回队列
        let result = sqlx::query(
            "UPDATE jobs
             SET state = CASE WHEN attempts < max_attempts
                              THEN 'PENDING' ELSE 'FAILED' END,
                 last_updated_at = $1
             WHERE state = 'RUNNING'",
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let requeued = result.rows_affected();
        if requeued > 0 {
            debug!("重新入队了 {} 个中断的任务", requeued);
        }
        Ok(requeued)
    }

    async fn purge_finished(&self, retention_days: i64) -> SchedulerResult<u64> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let result = sqlx::query(
            "DELETE FROM jobs
             WHERE state IN ('COMPLETED', 'FAILED', 'CANCELLED') AND last_updated_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let purged = result.rows_affected();
        debug!("清理了 {} 条过期任务记录", purged);
        Ok(purged)
    }
}
