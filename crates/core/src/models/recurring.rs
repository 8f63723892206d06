use chrono::{DateTime, Duration, Utc};

use crate::models::JobKind;

/// 周期任务定义，按固定小时数的节奏派生新任务。
/// 只存在于进程生命周期内，触发前不会落库
#[derive(Debug, Clone)]
pub struct RecurringJob {
    pub kind: JobKind,
    pub every_hours: i64,
    pub next_fire_at: DateTime<Utc>,
}

impl RecurringJob {
    pub fn new(kind: JobKind, every_hours: i64, now: DateTime<Utc>) -> Self {
        Self {
            kind,
            every_hours,
            next_fire_at: now + Duration::hours(every_hours),
        }
    }

    /// 到达触发时间
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_fire_at <= now
    }

    /// 把 next_fire_at 向前推进到严格晚于 now 的时间点。
    /// 进程停机期间错过的触发不补发，每次检查最多派生一个任务
    pub fn advance_past(&mut self, now: DateTime<Utc>) {
        let step = Duration::hours(self.every_hours);
        while self.next_fire_at <= now {
            self.next_fire_at += step;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_not_due_before_first_boundary() {
        let recurring = RecurringJob::new(JobKind::UserCleanup, 1, at(0));
        assert!(!recurring.is_due(at(0)));
        assert!(!recurring.is_due(at(0) + Duration::minutes(59)));
        assert!(recurring.is_due(at(1)));
    }

    #[test]
    fn test_fires_once_per_hour_boundary() {
        let mut recurring = RecurringJob::new(JobKind::UserCleanup, 1, at(0));
        let mut fired = 0;

        // 模拟时钟每10分钟检查一次，跨越3个小时
        let mut now = at(0);
        while now <= at(3) {
            if recurring.is_due(now) {
                fired += 1;
                recurring.advance_past(now);
            }
            now += Duration::minutes(10);
        }
        assert_eq!(fired, 3);
    }

    #[test]
    fn test_long_gap_is_not_backfilled() {
        let mut recurring = RecurringJob::new(JobKind::RefreshMetadata, 1, at(0));

        // 停机12小时后恢复，只触发一次，且下一次触发回到未来
        let resume = at(12) + Duration::minutes(30);
        assert!(recurring.is_due(resume));
        recurring.advance_past(resume);
        assert!(recurring.next_fire_at > resume);
        assert!(!recurring.is_due(resume));
        assert_eq!(recurring.next_fire_at, at(13));
    }
}
