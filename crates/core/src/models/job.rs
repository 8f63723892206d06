use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务类别，封闭枚举，启动时绑定到对应的处理器
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobKind {
    #[serde(rename = "REFRESH_METADATA")]
    RefreshMetadata,
    #[serde(rename = "USER_CLEANUP")]
    UserCleanup,
    #[serde(rename = "CALCULATE_SUMMARY")]
    CalculateSummary,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::RefreshMetadata => "REFRESH_METADATA",
            JobKind::UserCleanup => "USER_CLEANUP",
            JobKind::CalculateSummary => "CALCULATE_SUMMARY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "REFRESH_METADATA" => Some(JobKind::RefreshMetadata),
            "USER_CLEANUP" => Some(JobKind::UserCleanup),
            "CALCULATE_SUMMARY" => Some(JobKind::CalculateSummary),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务状态机：Pending → Running → {Completed, Failed, Cancelled}，
/// 失败且允许重试时回到 Pending
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobState {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

impl sqlx::Type<sqlx::Sqlite> for JobKind {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for JobKind {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        JobKind::parse(s).ok_or_else(|| format!("Invalid job kind: {s}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for JobKind {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

impl sqlx::Type<sqlx::Sqlite> for JobState {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for JobState {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "PENDING" => Ok(JobState::Pending),
            "RUNNING" => Ok(JobState::Running),
            "COMPLETED" => Ok(JobState::Completed),
            "FAILED" => Ok(JobState::Failed),
            "CANCELLED" => Ok(JobState::Cancelled),
            _ => Err(format!("Invalid job state: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for JobState {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 一个延迟执行的工作单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub state: JobState,
    pub attempts: i32,
    pub max_attempts: i32,
    pub scheduled_for: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        kind: JobKind,
        payload: serde_json::Value,
        scheduled_for: DateTime<Utc>,
        max_attempts: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由数据库生成
            kind,
            payload,
            state: JobState::Pending,
            attempts: 0,
            max_attempts,
            scheduled_for,
            created_at: now,
            last_updated_at: now,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, JobState::Running)
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_successful(&self) -> bool {
        matches!(self.state, JobState::Completed)
    }

    /// 是否还有剩余的执行机会
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            kind: self.kind,
            state: self.state,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            scheduled_for: self.scheduled_for,
            created_at: self.created_at,
            last_updated_at: self.last_updated_at,
        }
    }
}

/// 任务的只读视图，供外部调用方查询状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: i64,
    pub kind: JobKind,
    pub state: JobState,
    pub attempts: i32,
    pub max_attempts: i32,
    pub scheduled_for: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_kind_round_trip() {
        for kind in [
            JobKind::RefreshMetadata,
            JobKind::UserCleanup,
            JobKind::CalculateSummary,
        ] {
            assert_eq!(JobKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(JobKind::parse("UNKNOWN"), None);
    }

    #[test]
    fn test_job_state_terminal() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
    }

    #[test]
    fn test_new_job_defaults() {
        let job = Job::new(JobKind::RefreshMetadata, json!({"id": 42}), Utc::now(), 3);
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
        assert!(job.has_attempts_left());
        assert!(!job.is_finished());
    }

    #[test]
    fn test_snapshot_mirrors_job() {
        let job = Job::new(JobKind::UserCleanup, json!({}), Utc::now(), 1);
        let snapshot = job.snapshot();
        assert_eq!(snapshot.kind, job.kind);
        assert_eq!(snapshot.state, job.state);
        assert_eq!(snapshot.attempts, job.attempts);
    }
}
