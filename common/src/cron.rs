use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("invalid schedule expression '{expr}': {reason}")]
    InvalidExpression { expr: String, reason: String },
    #[error("no alarms scheduled")]
    Empty,
}

/// Expressions that never match (e.g. `0 0 30 2 *`) give up after this
/// many days instead of scanning forever.
const SEARCH_HORIZON_DAYS: i64 = 366 * 4;

/// One of the five cron fields, stored as a bitmask of matching values.
/// `any` records whether the field was written as a bare `*`, which the
/// day-of-month/day-of-week OR rule needs to know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CronField {
    mask: u64,
    any: bool,
}

impl CronField {
    fn contains(self, value: u32) -> bool {
        value < 64 && self.mask >> value & 1 == 1
    }
}

/// A parsed 5-field cron expression: minute, hour, day-of-month, month,
/// day-of-week. Fields accept literals, `*`, comma lists, ranges, and
/// steps; values are numeric only. Day-of-week 7 is folded into 0
/// (Sunday).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(
                expr,
                format!("expected 5 fields, got {}", fields.len()),
            ));
        }

        let minute = parse_field(fields[0], 0, 59).map_err(|reason| invalid(expr, reason))?;
        let hour = parse_field(fields[1], 0, 23).map_err(|reason| invalid(expr, reason))?;
        let day_of_month = parse_field(fields[2], 1, 31).map_err(|reason| invalid(expr, reason))?;
        let month = parse_field(fields[3], 1, 12).map_err(|reason| invalid(expr, reason))?;
        let mut day_of_week =
            parse_field(fields[4], 0, 7).map_err(|reason| invalid(expr, reason))?;
        if day_of_week.mask >> 7 & 1 == 1 {
            day_of_week.mask = (day_of_week.mask | 1) & !(1 << 7);
        }

        Ok(Self {
            minute,
            hour,
            day_of_month,
            month,
            day_of_week,
        })
    }

    /// The earliest minute-granularity instant strictly after `after` at
    /// which every field matches, or `None` if no such instant exists
    /// within the search horizon. An `after` that matches exactly
    /// advances to the next distinct match.
    pub fn next_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let horizon = after + Duration::days(SEARCH_HORIZON_DAYS);
        let mut candidate =
            after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);

        while candidate <= horizon {
            if !self.month.contains(candidate.month()) {
                candidate = first_of_next_month(candidate.date())?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.day_matches(candidate.date()) {
                candidate = (candidate.date() + Duration::days(1)).and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.hour.contains(candidate.hour()) {
                candidate =
                    candidate.date().and_hms_opt(candidate.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if !self.minute.contains(candidate.minute()) {
                candidate += Duration::minutes(1);
                continue;
            }
            return Some(candidate);
        }

        None
    }

    /// Standard cron day rule: when both day fields are restricted the
    /// date matches if either does; a bare `*` defers to the other field.
    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.day_of_month.contains(date.day());
        let dow = self
            .day_of_week
            .contains(date.weekday().num_days_from_sunday());
        match (self.day_of_month.any, self.day_of_week.any) {
            (false, false) => dom || dow,
            (false, true) => dom,
            (true, false) => dow,
            (true, true) => true,
        }
    }
}

fn invalid(expr: &str, reason: String) -> ScheduleError {
    ScheduleError::InvalidExpression {
        expr: expr.to_string(),
        reason,
    }
}

fn parse_field(text: &str, min: u32, max: u32) -> Result<CronField, String> {
    if text.is_empty() {
        return Err("empty field".to_string());
    }

    let mut mask = 0u64;
    for part in text.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step_text)) => {
                let step: u32 = step_text
                    .parse()
                    .map_err(|_| format!("bad step '{step_text}'"))?;
                if step == 0 {
                    return Err(format!("zero step in '{part}'"));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, min, max)?, parse_value(b, min, max)?)
        } else {
            let value = parse_value(range, min, max)?;
            (value, value)
        };
        if lo > hi {
            return Err(format!("inverted range '{part}'"));
        }

        let mut value = lo;
        while value <= hi {
            mask |= 1 << value;
            value += step;
        }
    }

    Ok(CronField {
        mask,
        any: text == "*",
    })
}

fn parse_value(text: &str, min: u32, max: u32) -> Result<u32, String> {
    let value: u32 = text.parse().map_err(|_| format!("bad value '{text}'"))?;
    if value < min || value > max {
        return Err(format!("value {value} out of range {min}-{max}"));
    }
    Ok(value)
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn every_minute_advances_to_next_boundary() {
        let expr = CronExpr::parse("* * * * *").unwrap();
        assert_eq!(
            expr.next_after(at(2026, 8, 25, 10, 30, 30)),
            Some(at(2026, 8, 25, 10, 31, 0))
        );
    }

    #[test]
    fn exact_match_advances_to_next_distinct_match() {
        let expr = CronExpr::parse("31 10 * * *").unwrap();
        assert_eq!(
            expr.next_after(at(2026, 8, 25, 10, 31, 0)),
            Some(at(2026, 8, 26, 10, 31, 0))
        );
    }

    #[test]
    fn delta_is_strictly_positive_and_keeps_advancing() {
        let expr = CronExpr::parse("*/5 * * * *").unwrap();
        let mut cursor = at(2026, 1, 1, 0, 0, 0);
        for _ in 0..10 {
            let next = expr.next_after(cursor).unwrap();
            assert!(next > cursor);
            assert_eq!(next.minute() % 5, 0);
            cursor = next;
        }
        assert_eq!(cursor, at(2026, 1, 1, 0, 50, 0));
    }

    #[test]
    fn lists_ranges_and_steps() {
        let expr = CronExpr::parse("0,30 6-8 * * *").unwrap();
        assert_eq!(
            expr.next_after(at(2026, 3, 10, 5, 45, 0)),
            Some(at(2026, 3, 10, 6, 0, 0))
        );
        assert_eq!(
            expr.next_after(at(2026, 3, 10, 6, 10, 0)),
            Some(at(2026, 3, 10, 6, 30, 0))
        );
        assert_eq!(
            expr.next_after(at(2026, 3, 10, 8, 31, 0)),
            Some(at(2026, 3, 11, 6, 0, 0))
        );
    }

    #[test]
    fn day_of_month_and_day_of_week_are_ored_when_both_restricted() {
        // The 13th of any month, or any Friday.
        let expr = CronExpr::parse("0 0 13 * 5").unwrap();
        // 2026-02-06 is the first Friday after Feb 1 (a Sunday).
        assert_eq!(
            expr.next_after(at(2026, 2, 1, 12, 0, 0)),
            Some(at(2026, 2, 6, 0, 0, 0))
        );
        // Next match after that Friday is the 13th (also a Friday).
        assert_eq!(
            expr.next_after(at(2026, 2, 6, 0, 0, 0)),
            Some(at(2026, 2, 13, 0, 0, 0))
        );
    }

    #[test]
    fn bare_star_day_field_defers_to_the_other() {
        let expr = CronExpr::parse("0 0 13 * *").unwrap();
        assert_eq!(
            expr.next_after(at(2026, 2, 1, 0, 0, 0)),
            Some(at(2026, 2, 13, 0, 0, 0))
        );

        let expr = CronExpr::parse("0 9 * * 7").unwrap();
        // Day-of-week 7 is Sunday; 2026-01-04 is the first Sunday.
        assert_eq!(
            expr.next_after(at(2026, 1, 3, 0, 0, 0)),
            Some(at(2026, 1, 4, 9, 0, 0))
        );
    }

    #[test]
    fn month_restriction_skips_whole_months() {
        let expr = CronExpr::parse("0 8 1 6 *").unwrap();
        assert_eq!(
            expr.next_after(at(2026, 8, 25, 0, 0, 0)),
            Some(at(2027, 6, 1, 8, 0, 0))
        );
    }

    #[test]
    fn impossible_date_yields_none() {
        let expr = CronExpr::parse("0 0 30 2 *").unwrap();
        assert_eq!(expr.next_after(at(2026, 1, 1, 0, 0, 0)), None);
    }

    #[test]
    fn rejects_malformed_expressions() {
        for expr in [
            "* * * *",
            "* * * * * *",
            "60 * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "* * 32 * *",
            "* * * 13 *",
            "* * * * 8",
            "a * * * *",
            "*/0 * * * *",
            "5-1 * * * *",
            "mon * * * *",
            "",
        ] {
            assert!(
                matches!(
                    CronExpr::parse(expr),
                    Err(ScheduleError::InvalidExpression { .. })
                ),
                "expected '{expr}' to be rejected"
            );
        }
    }
}
