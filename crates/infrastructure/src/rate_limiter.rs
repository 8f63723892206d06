use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::trace;

use media_jobs_core::JobKind;

/// 每个任务类别的限流窗口状态
#[derive(Debug, Clone, Copy)]
struct WindowState {
    index: i64,
    count: u32,
}

/// 固定窗口限流器
///
/// 窗口边界对齐到限流器创建时刻，不是滑动窗口。now 落在当前窗口
/// 之外时先开新窗口（count 归零）再判定消费。try_consume 被拒绝
/// 时没有任何副作用
pub struct RateLimiter {
    limit: u32,
    window_ms: i64,
    origin: DateTime<Utc>,
    windows: Mutex<HashMap<JobKind, WindowState>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window_seconds: u64) -> Self {
        Self::with_origin(limit, window_seconds, Utc::now())
    }

    /// 指定窗口原点，便于用模拟时钟测试
    pub fn with_origin(limit: u32, window_seconds: u64, origin: DateTime<Utc>) -> Self {
        Self {
            limit,
            window_ms: (window_seconds as i64) * 1000,
            origin,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// 尝试消耗一次执行配额。当前窗口内 count < limit 时递增并
    /// 返回 true，否则返回 false
    pub fn try_consume(&self, kind: JobKind, now: DateTime<Utc>) -> bool {
        let index = (now - self.origin)
            .num_milliseconds()
            .div_euclid(self.window_ms);

        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let window = windows
            .entry(kind)
            .or_insert(WindowState { index, count: 0 });

        if window.index != index {
            window.index = index;
            window.count = 0;
        }

        if window.count < self.limit {
            window.count += 1;
            true
        } else {
            trace!("任务类别 {} 在当前窗口已达限流上限 {}", kind, self.limit);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn origin() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_limit_plus_one_yields_limit_grants() {
        let limiter = RateLimiter::with_origin(5, 5, origin());
        let now = origin() + Duration::seconds(1);

        let granted = (0..6)
            .filter(|_| limiter.try_consume(JobKind::RefreshMetadata, now))
            .count();
        assert_eq!(granted, 5);
    }

    #[test]
    fn test_window_reset() {
        let limiter = RateLimiter::with_origin(1, 5, origin());

        assert!(limiter.try_consume(JobKind::UserCleanup, origin()));
        assert!(!limiter.try_consume(JobKind::UserCleanup, origin() + Duration::seconds(4)));
        // 下一个窗口从零开始计数
        assert!(limiter.try_consume(JobKind::UserCleanup, origin() + Duration::seconds(5)));
        assert!(!limiter.try_consume(JobKind::UserCleanup, origin() + Duration::seconds(6)));
    }

    #[test]
    fn test_kinds_are_limited_independently() {
        let limiter = RateLimiter::with_origin(1, 5, origin());
        let now = origin() + Duration::seconds(1);

        assert!(limiter.try_consume(JobKind::RefreshMetadata, now));
        assert!(limiter.try_consume(JobKind::UserCleanup, now));
        assert!(!limiter.try_consume(JobKind::RefreshMetadata, now));
        assert!(!limiter.try_consume(JobKind::UserCleanup, now));
    }

    #[test]
    fn test_denial_has_no_side_effect() {
        let limiter = RateLimiter::with_origin(2, 5, origin());
        let now = origin() + Duration::seconds(1);

        assert!(limiter.try_consume(JobKind::CalculateSummary, now));
        assert!(limiter.try_consume(JobKind::CalculateSummary, now));
        // 多次被拒不影响下一个窗口的配额
        for _ in 0..10 {
            assert!(!limiter.try_consume(JobKind::CalculateSummary, now));
        }
        assert!(limiter.try_consume(JobKind::CalculateSummary, now + Duration::seconds(5)));
    }
}
