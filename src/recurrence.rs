//! Cron recurrence evaluation.
//!
//! Stateless: given an expression, an IANA time zone name, and a reference
//! instant, computes the next occurrence. Evaluation happens in the named
//! local zone so "every day at 08:00" stays at local 08:00 across
//! daylight-saving transitions; the result is always a UTC instant.
//!
//! Malformed expressions and unknown zones are rejected here, at
//! registration time, never at fire time.

use crate::error::{Result, SchedulerError};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;

/// Parse a cron expression.
///
/// Classic five-field expressions (`min hour dom mon dow`) are accepted by
/// assuming a seconds field of `0`; six- and seven-field expressions pass
/// through unchanged.
pub fn parse_expression(expr: &str) -> Result<Schedule> {
    let normalized = normalize(expr);
    Schedule::from_str(&normalized)
        .map_err(|e| SchedulerError::InvalidCron(format!("{expr}: {e}")))
}

/// Resolve an IANA time zone name.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| SchedulerError::InvalidTimezone(name.to_owned()))
}

/// Next occurrence of `expr` in zone `timezone` strictly after `after`,
/// as a UTC instant.
///
/// `cron::Schedule` never yields an occurrence at the reference instant
/// itself, so chaining `after := result` walks a strictly increasing
/// sequence.
pub fn next_occurrence(expr: &str, timezone: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let schedule = parse_expression(expr)?;
    let tz = parse_timezone(timezone)?;
    let reference = after.with_timezone(&tz);
    schedule
        .after(&reference)
        .next()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| {
            SchedulerError::InvalidCron(format!("{expr}: no future occurrence after {after}"))
        })
}

fn normalize(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {expr}")
    } else {
        expr.to_owned()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::TimeZone;

    #[test]
    fn five_field_expression_is_accepted() {
        assert!(parse_expression("0 8 * * *").is_ok());
        assert!(parse_expression("* * * * *").is_ok());
    }

    #[test]
    fn six_field_expression_passes_through() {
        assert!(parse_expression("30 0 8 * * *").is_ok());
    }

    #[test]
    fn malformed_expression_is_rejected() {
        assert!(matches!(
            parse_expression("not a cron"),
            Err(SchedulerError::InvalidCron(_))
        ));
        assert!(matches!(
            parse_expression("61 * * * *"),
            Err(SchedulerError::InvalidCron(_))
        ));
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        assert!(parse_timezone("UTC").is_ok());
        assert!(parse_timezone("America/New_York").is_ok());
        assert!(matches!(
            parse_timezone("Bogus/Zone"),
            Err(SchedulerError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn next_occurrence_is_strictly_future() {
        let after = Utc::now();
        let next = next_occurrence("* * * * *", "UTC", after).expect("next");
        assert!(next > after);
    }

    #[test]
    fn chained_occurrences_strictly_increase() {
        let mut after = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        let mut seen = Vec::new();
        for _ in 0..5 {
            let next = next_occurrence("0 8 * * *", "UTC", after).expect("next");
            assert!(next > after);
            seen.push(next);
            after = next;
        }
        // Daily at 08:00 UTC: consecutive occurrences are 24h apart.
        for pair in seen.windows(2) {
            assert_eq!(pair[1] - pair[0], chrono::Duration::hours(24));
        }
    }

    #[test]
    fn daily_expression_holds_local_time_across_dst() {
        // US spring-forward: 2026-03-08. 08:00 in New York is 13:00 UTC
        // before the transition and 12:00 UTC after.
        let before = Utc.with_ymd_and_hms(2026, 3, 7, 0, 0, 0).unwrap();
        let first = next_occurrence("0 8 * * *", "America/New_York", before).expect("first");
        assert_eq!(first, Utc.with_ymd_and_hms(2026, 3, 7, 13, 0, 0).unwrap());

        let second = next_occurrence("0 8 * * *", "America/New_York", first).expect("second");
        assert_eq!(second, Utc.with_ymd_and_hms(2026, 3, 8, 12, 0, 0).unwrap());

        // Local wall-clock time stays 08:00 on both sides.
        let tz: Tz = "America/New_York".parse().unwrap();
        use chrono::Timelike;
        assert_eq!(first.with_timezone(&tz).hour(), 8);
        assert_eq!(second.with_timezone(&tz).hour(), 8);
    }

    #[test]
    fn every_minute_lands_on_minute_boundary() {
        use chrono::Timelike;
        let after = Utc.with_ymd_and_hms(2026, 6, 1, 10, 30, 12).unwrap();
        let next = next_occurrence("* * * * *", "UTC", after).expect("next");
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 6, 1, 10, 31, 0).unwrap());
        assert_eq!(next.second(), 0);
    }
}
