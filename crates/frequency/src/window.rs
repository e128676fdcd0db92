//! Fixed calendar buckets in UTC. A bucket is `[start, end)`; counters reset
//! when `now` crosses `end`, independent of when the first delivery happened.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use engage_core::types::Period;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodBucket {
    pub period: Period,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl PeriodBucket {
    pub fn containing(period: Period, now: DateTime<Utc>) -> Self {
        let start = bucket_start(period, now);
        let end = bucket_end(period, start);
        Self { period, start, end }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default())
}

fn bucket_start(period: Period, now: DateTime<Utc>) -> DateTime<Utc> {
    match period {
        Period::Hour => {
            let truncated = now.naive_utc().date().and_hms_opt(now.hour(), 0, 0);
            truncated.map_or(now, |t| Utc.from_utc_datetime(&t))
        }
        Period::Day => midnight(now.date_naive()),
        Period::Week => {
            let days_from_monday = i64::from(now.weekday().num_days_from_monday());
            midnight(now.date_naive() - Duration::days(days_from_monday))
        }
        Period::Month => NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
            .map_or(now, midnight),
    }
}

fn bucket_end(period: Period, start: DateTime<Utc>) -> DateTime<Utc> {
    match period {
        Period::Hour => start + Duration::hours(1),
        Period::Day => start + Duration::days(1),
        Period::Week => start + Duration::weeks(1),
        Period::Month => {
            let (year, month) = if start.month() == 12 {
                (start.year() + 1, 1)
            } else {
                (start.year(), start.month() + 1)
            };
            NaiveDate::from_ymd_opt(year, month, 1).map_or(start + Duration::days(31), midnight)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_hour_bucket() {
        let bucket = PeriodBucket::containing(Period::Hour, at(2026, 5, 4, 13, 47));
        assert_eq!(bucket.start, at(2026, 5, 4, 13, 0));
        assert_eq!(bucket.end, at(2026, 5, 4, 14, 0));
    }

    #[test]
    fn test_day_bucket_resets_at_midnight() {
        let late = PeriodBucket::containing(Period::Day, at(2026, 5, 4, 23, 59));
        let early = PeriodBucket::containing(Period::Day, at(2026, 5, 5, 0, 1));
        assert_eq!(late.end, early.start);
        assert!(late.contains(at(2026, 5, 4, 0, 0)));
        assert!(!late.contains(at(2026, 5, 5, 0, 0)));
    }

    #[test]
    fn test_week_bucket_starts_monday() {
        // 2026-05-07 is a Thursday.
        let bucket = PeriodBucket::containing(Period::Week, at(2026, 5, 7, 9, 0));
        assert_eq!(bucket.start, at(2026, 5, 4, 0, 0));
        assert_eq!(bucket.end, at(2026, 5, 11, 0, 0));
    }

    #[test]
    fn test_month_bucket_handles_year_end() {
        let bucket = PeriodBucket::containing(Period::Month, at(2026, 12, 31, 23, 0));
        assert_eq!(bucket.start, at(2026, 12, 1, 0, 0));
        assert_eq!(bucket.end, at(2027, 1, 1, 0, 0));

        let feb = PeriodBucket::containing(Period::Month, at(2028, 2, 29, 10, 0));
        assert_eq!(feb.end, at(2028, 3, 1, 0, 0));
    }
}
