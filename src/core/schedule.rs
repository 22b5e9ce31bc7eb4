//! 调度判定 - 纯函数，不依赖计时器

use crate::db::{DayOfWeek, Schedule};
use chrono::{DateTime, Datelike, TimeZone, Utc};

/// 判断在 `now` 时刻是否应当运行一次同步
///
/// 星期按 `now` 所在时区计算；从未运行过的连接只受星期限制。
pub fn is_due<Tz: TimeZone>(
    schedule: &Schedule,
    last_run_at: Option<DateTime<Utc>>,
    now: &DateTime<Tz>,
) -> bool {
    if !schedule.daysOfWeek.is_empty() {
        let today = DayOfWeek::from(now.weekday());
        if !schedule.daysOfWeek.contains(&today) {
            return false;
        }
    }

    match last_run_at {
        None => true,
        Some(last) => {
            let elapsed = now.with_timezone(&Utc) - last;
            elapsed.num_milliseconds() >= schedule.interval_ms()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TimeUnit;
    use chrono::{Duration, FixedOffset};

    fn every_30s() -> Schedule {
        Schedule::new(30, TimeUnit::Seconds).unwrap()
    }

    // 2024-01-02 是星期二
    fn tuesday_noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_due_after_interval() {
        let now = tuesday_noon();
        assert!(is_due(&every_30s(), Some(now - Duration::seconds(31)), &now));
        assert!(is_due(&every_30s(), Some(now - Duration::seconds(30)), &now));
        assert!(!is_due(&every_30s(), Some(now - Duration::seconds(10)), &now));
    }

    #[test]
    fn test_first_run_is_due() {
        assert!(is_due(&every_30s(), None, &tuesday_noon()));
    }

    #[test]
    fn test_day_gate_blocks_other_days() {
        let now = tuesday_noon();
        let monday_only = every_30s().on_days([DayOfWeek::Mon]);

        assert!(!is_due(&monday_only, None, &now));
        assert!(!is_due(&monday_only, Some(now - Duration::days(30)), &now));

        let tuesday = every_30s().on_days([DayOfWeek::Mon, DayOfWeek::Tue]);
        assert!(is_due(&tuesday, None, &now));
    }

    #[test]
    fn test_units() {
        let now = tuesday_noon();
        let hourly = Schedule::new(1, TimeUnit::Hours).unwrap();
        assert!(!is_due(&hourly, Some(now - Duration::minutes(59)), &now));
        assert!(is_due(&hourly, Some(now - Duration::minutes(60)), &now));

        let five_min = Schedule::new(5, TimeUnit::Minutes).unwrap();
        assert!(!is_due(&five_min, Some(now - Duration::seconds(299)), &now));
        assert!(is_due(&five_min, Some(now - Duration::seconds(300)), &now));
    }

    #[test]
    fn test_weekday_uses_local_offset() {
        // UTC 周二 02:00 在 UTC-5 仍是周一
        let utc = Utc.with_ymd_and_hms(2024, 1, 2, 2, 0, 0).unwrap();
        let local = utc.with_timezone(&FixedOffset::west_opt(5 * 3600).unwrap());
        let monday_only = every_30s().on_days([DayOfWeek::Mon]);

        assert!(is_due(&monday_only, None, &local));
        assert!(!is_due(&monday_only, None, &utc));
    }
}
