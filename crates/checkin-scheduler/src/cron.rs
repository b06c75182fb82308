//! Five-field cron expressions: "MIN HOUR DOM MON DOW".
//!
//! Each field is a comma list of `*`, `N`, `A-B`, `*/S`, `A-B/S` or `N/S`.
//! Months and weekdays also take three-letter names; weekday 7 is Sunday.
//! When both day fields are restricted a day matches if either does.
//! Example: "0 8 * * mon-fri" = weekdays at 8:00.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, TimeZone, Timelike};
use thiserror::Error;

/// How far ahead `next_after` searches. Long enough for Feb 29 schedules.
const SEARCH_DAYS: i64 = 366 * 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("expected 5 fields (minute hour day-of-month month day-of-week), got {0}")]
    FieldCount(usize),

    #[error("invalid {field} field '{value}': {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    /// Names for `min`, `min + 1`, ...
    names: &'static [&'static str],
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59, names: &[] };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23, names: &[] };
const DAY_OF_MONTH: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31, names: &[] };
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &["jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec"],
};
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: &["sun", "mon", "tue", "wed", "thu", "fri", "sat"],
};

/// A parsed cron expression. Fields are bitmasks indexed by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: u64,
    hours: u64,
    days: u64,
    months: u64,
    weekdays: u64,
    any_day: bool,
    any_weekday: bool,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(CronError::FieldCount(parts.len()));
        }

        let mut weekdays = parse_field(parts[4], &DAY_OF_WEEK)?;
        if weekdays & (1 << 7) != 0 {
            weekdays = (weekdays & !(1 << 7)) | 1;
        }

        Ok(Self {
            expression: parts.join(" "),
            minutes: parse_field(parts[0], &MINUTE)?,
            hours: parse_field(parts[1], &HOUR)?,
            days: parse_field(parts[2], &DAY_OF_MONTH)?,
            months: parse_field(parts[3], &MONTH)?,
            weekdays,
            any_day: parts[2].starts_with('*'),
            any_weekday: parts[4].starts_with('*'),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First whole minute strictly after `after`, in `after`'s timezone.
    ///
    /// Local times skipped by a DST jump never fire; repeated ones fire once,
    /// at the earliest instant still after `after`.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let local = after.naive_local();
        let start = local.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let start_date = start.date();

        for offset in 0..SEARCH_DAYS {
            let date = start_date + Duration::days(offset);
            if !self.matches_date(date) {
                continue;
            }
            let first_day = offset == 0;

            for hour in (0..24).filter(|h| has(self.hours, *h)) {
                if first_day && hour < start.hour() {
                    continue;
                }
                for minute in (0..60).filter(|m| has(self.minutes, *m)) {
                    if first_day && hour == start.hour() && minute < start.minute() {
                        continue;
                    }
                    let Some(naive) = date.and_hms_opt(hour, minute, 0) else {
                        continue;
                    };
                    let candidate = match tz.from_local_datetime(&naive) {
                        LocalResult::Single(dt) => Some(dt),
                        LocalResult::Ambiguous(early, late) => {
                            if early > *after { Some(early) } else { Some(late) }
                        }
                        LocalResult::None => None,
                    };
                    if let Some(dt) = candidate
                        && dt > *after
                    {
                        return Some(dt);
                    }
                }
            }
        }

        None
    }

    fn matches_date(&self, date: NaiveDate) -> bool {
        if !has(self.months, date.month()) {
            return false;
        }
        let day = has(self.days, date.day());
        let weekday = has(self.weekdays, date.weekday().num_days_from_sunday());
        if self.any_day || self.any_weekday {
            day && weekday
        } else {
            day || weekday
        }
    }
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

fn has(mask: u64, value: u32) -> bool {
    mask & (1u64 << value) != 0
}

/// Parse a cron field into a bitmask of matching values.
fn parse_field(field: &str, spec: &FieldSpec) -> Result<u64, CronError> {
    let invalid = |reason: String| CronError::InvalidField {
        field: spec.name,
        value: field.to_string(),
        reason,
    };

    let mut mask = 0u64;
    for item in field.split(',') {
        if item.is_empty() {
            return Err(invalid("empty list item".into()));
        }

        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let n: u32 = step
                    .parse()
                    .map_err(|_| invalid(format!("bad step '{step}'")))?;
                if n == 0 {
                    return Err(invalid("step must be positive".into()));
                }
                (range, Some(n))
            }
            None => (item, None),
        };

        let (lo, hi) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((a, b)) = range.split_once('-') {
            (field_value(a, spec).map_err(&invalid)?, field_value(b, spec).map_err(&invalid)?)
        } else {
            let v = field_value(range, spec).map_err(&invalid)?;
            // "N/S" means "from N to the end, every S"
            if step.is_some() { (v, spec.max) } else { (v, v) }
        };

        if lo > hi {
            return Err(invalid(format!("range {lo}-{hi} is reversed")));
        }

        for v in (lo..=hi).step_by(step.unwrap_or(1) as usize) {
            mask |= 1u64 << v;
        }
    }

    Ok(mask)
}

fn field_value(text: &str, spec: &FieldSpec) -> Result<u32, String> {
    let value = match text.parse::<u32>() {
        Ok(n) => n,
        Err(_) => spec
            .names
            .iter()
            .position(|name| name.eq_ignore_ascii_case(text))
            .map(|i| spec.min + i as u32)
            .ok_or_else(|| format!("'{text}' is not a number"))?,
    };
    if value < spec.min || value > spec.max {
        return Err(format!("{value} is outside {}-{}", spec.min, spec.max));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn next(expr: &str, after: DateTime<Utc>) -> DateTime<Utc> {
        CronSchedule::parse(expr).unwrap().next_after(&after).unwrap()
    }

    #[test]
    fn test_every_hour() {
        let after = at(2026, 2, 22, 10, 30);
        assert_eq!(next("0 * * * *", after), at(2026, 2, 22, 11, 0));
    }

    #[test]
    fn test_specific_time() {
        let after = at(2026, 2, 22, 7, 0);
        assert_eq!(next("0 8 * * *", after), at(2026, 2, 22, 8, 0));
        // already past today → tomorrow
        let after = at(2026, 2, 22, 9, 0);
        assert_eq!(next("0 8 * * *", after), at(2026, 2, 23, 8, 0));
    }

    #[test]
    fn test_every_15_minutes() {
        let after = at(2026, 2, 22, 10, 2);
        assert_eq!(next("*/15 * * * *", after), at(2026, 2, 22, 10, 15));
    }

    #[test]
    fn test_strictly_after() {
        let after = at(2026, 2, 22, 10, 15);
        assert_eq!(next("*/15 * * * *", after), at(2026, 2, 22, 10, 30));
        let mid_minute = after + Duration::seconds(30);
        assert_eq!(next("* * * * *", mid_minute), at(2026, 2, 22, 10, 16));
    }

    #[test]
    fn test_ranges_lists_and_steps() {
        let after = at(2026, 2, 22, 12, 10);
        assert_eq!(next("5,40 9-17/2 * * *", after), at(2026, 2, 22, 13, 5));
        assert_eq!(next("30/10 * * * *", after), at(2026, 2, 22, 12, 30));
    }

    #[test]
    fn test_weekday_names() {
        // 2026-02-21 is a Saturday
        let after = at(2026, 2, 21, 9, 0);
        assert_eq!(next("0 8 * * mon-fri", after), at(2026, 2, 23, 8, 0));
        assert_eq!(next("0 8 * * 7", after), at(2026, 2, 22, 8, 0));
        assert_eq!(next("0 8 * * SUN", after), at(2026, 2, 22, 8, 0));
    }

    #[test]
    fn test_month_names() {
        let after = at(2026, 2, 22, 0, 0);
        assert_eq!(next("0 0 1 jun *", after), at(2026, 6, 1, 0, 0));
    }

    #[test]
    fn test_day_of_month_or_weekday() {
        // restricted both: the 1st OR any Monday, whichever comes first
        let after = at(2026, 2, 21, 0, 0);
        assert_eq!(next("0 0 1 * 1", after), at(2026, 2, 23, 0, 0));
        // day-of-month unrestricted: only Mondays
        assert_eq!(next("0 0 * * 1", at(2026, 2, 24, 0, 0)), at(2026, 3, 2, 0, 0));
    }

    #[test]
    fn test_leap_day() {
        let after = at(2026, 3, 1, 0, 0);
        assert_eq!(next("0 0 29 2 *", after), at(2028, 2, 29, 0, 0));
    }

    #[test]
    fn test_impossible_date_never_fires() {
        let cron = CronSchedule::parse("0 0 31 2 *").unwrap();
        assert!(cron.next_after(&at(2026, 1, 1, 0, 0)).is_none());
    }

    #[test]
    fn test_fixed_offset_timezone() {
        let tz = FixedOffset::east_opt(8 * 3600).unwrap();
        let after = tz.with_ymd_and_hms(2026, 2, 22, 7, 30, 0).unwrap();
        let fire = CronSchedule::parse("0 8 * * *").unwrap().next_after(&after).unwrap();
        assert_eq!(fire.with_timezone(&Utc), at(2026, 2, 22, 0, 0));
    }

    #[test]
    fn test_invalid_expression() {
        assert_eq!(CronSchedule::parse("bad"), Err(CronError::FieldCount(1)));
        assert_eq!(CronSchedule::parse("* * *"), Err(CronError::FieldCount(3)));
        assert!(CronSchedule::parse("* * * * * *").is_err());
        assert!(CronSchedule::parse("60 * * * *").is_err());
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
        assert!(CronSchedule::parse("0 17-9 * * *").is_err());
        assert!(CronSchedule::parse("0 8 0 * *").is_err());
        assert!(CronSchedule::parse("0 8 * * funday").is_err());
        assert!(CronSchedule::parse("0,,5 8 * * *").is_err());
    }

    #[test]
    fn test_expression_is_normalized() {
        let cron: CronSchedule = "0   8 *\t* *".parse().unwrap();
        assert_eq!(cron.to_string(), "0 8 * * *");
    }
}
