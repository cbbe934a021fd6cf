use crate::error::CoreError;
use chrono::{Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use chrono_tz::Tz;
use std::str::FromStr;

/// Time assumed for patterns that carry no explicit time.
pub fn default_pattern_time() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).unwrap()
}

/// Validate an IANA timezone name.
pub fn validate_timezone(timezone: &str) -> Result<Tz, CoreError> {
    Tz::from_str(timezone).map_err(|_| CoreError::InvalidTimezone(timezone.to_string()))
}

/// Parse a `YYYY-MM-DD` date string.
pub fn parse_date(s: &str) -> Result<NaiveDate, CoreError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| CoreError::Validation(format!("Invalid date: '{}'", s)))
}

/// Parse an `HH:MM:SS` time string. `HH:MM` inputs are normalized by
/// appending `:00`; single-digit components are zero-padded.
pub fn parse_time(s: &str) -> Result<NaiveTime, CoreError> {
    let mut parts: Vec<String> = s.split(':').map(str::to_string).collect();
    if parts.len() == 2 {
        parts.push("00".to_string());
    }
    if parts.len() != 3 {
        return Err(CoreError::Validation(format!("Invalid time: '{}'", s)));
    }
    for part in &mut parts {
        if part.len() == 1 {
            *part = format!("0{}", part);
        }
    }
    NaiveTime::parse_from_str(&parts.join(":"), "%H:%M:%S")
        .map_err(|_| CoreError::Validation(format!("Invalid time: '{}'", s)))
}

pub fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    date + Duration::days(days)
}

pub fn add_minutes(at: NaiveDateTime, minutes: i64) -> NaiveDateTime {
    at + Duration::minutes(minutes)
}

/// Day-of-week number with Sunday = 0 through Saturday = 6.
pub fn weekday_number(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// The Monday on or before `date`.
pub fn week_monday(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    match (next, NaiveDate::from_ymd_opt(year, month, 1)) {
        (Some(next), Some(first)) => (next - first).num_days() as u32,
        _ => 0,
    }
}

pub fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_opt(0, 0, 0).unwrap()
}

/// Minute offset of `at` from midnight of `date`. Negative for times before
/// the date, beyond 1440 for times that spill into the following day.
pub fn minutes_from_midnight(date: NaiveDate, at: NaiveDateTime) -> i64 {
    (at - midnight(date)).num_minutes()
}

/// Resolve a local wall-clock time on `date` within `tz`.
///
/// A time that does not exist locally (spring-forward gap) resolves to the
/// first valid wall minute after the gap; an ambiguous time (fall-back)
/// resolves to its own wall value, which both instants share.
pub fn resolve_local_time(tz: Tz, date: NaiveDate, time: NaiveTime) -> NaiveTime {
    match tz.from_local_datetime(&date.and_time(time)) {
        LocalResult::Single(_) | LocalResult::Ambiguous(_, _) => time,
        LocalResult::None => {
            let mut probe = date.and_time(time);
            // DST gaps are at most a few hours; 240 minutes covers every zone.
            for _ in 0..240 {
                probe += Duration::minutes(1);
                if !matches!(tz.from_local_datetime(&probe), LocalResult::None) {
                    return probe.time();
                }
            }
            time
        }
    }
}

/// Map a weekday name ("sunday", "Mon", ...) to its 0 = Sunday number.
pub fn weekday_from_name(name: &str) -> Result<u8, CoreError> {
    match name.to_lowercase().as_str() {
        "sunday" | "sun" => Ok(0),
        "monday" | "mon" => Ok(1),
        "tuesday" | "tue" => Ok(2),
        "wednesday" | "wed" => Ok(3),
        "thursday" | "thu" => Ok(4),
        "friday" | "fri" => Ok(5),
        "saturday" | "sat" => Ok(6),
        other => Err(CoreError::Validation(format!("Invalid weekday: '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[rstest::rstest]
    #[case("09:30", (9, 30, 0))]
    #[case("9:5", (9, 5, 0))]
    #[case("23:59:59", (23, 59, 59))]
    #[case("7:03:9", (7, 3, 9))]
    fn test_parse_time_normalizes(#[case] input: &str, #[case] expected: (u32, u32, u32)) {
        let (h, m, s) = expected;
        assert_eq!(parse_time(input).unwrap(), NaiveTime::from_hms_opt(h, m, s).unwrap());
    }

    #[test]
    fn test_parse_time_rejects_garbage() {
        assert!(parse_time("25:00").is_err());
        assert!(parse_time("morning").is_err());
        assert!(parse_time("1:2:3:4").is_err());
    }

    #[test]
    fn test_weekday_number_sunday_is_zero() {
        assert_eq!(weekday_number(date("2025-01-19")), 0); // Sunday
        assert_eq!(weekday_number(date("2025-01-20")), 1); // Monday
        assert_eq!(weekday_number(date("2025-01-25")), 6); // Saturday
    }

    #[test]
    fn test_week_monday() {
        assert_eq!(week_monday(date("2025-01-19")), date("2025-01-13"));
        assert_eq!(week_monday(date("2025-01-13")), date("2025-01-13"));
        assert_eq!(week_monday(date("2025-01-15")), date("2025-01-13"));
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2023, 2), 28);
        assert_eq!(days_in_month(2025, 12), 31);
        assert_eq!(days_in_month(2025, 4), 30);
    }

    #[test]
    fn test_resolve_local_time_spring_forward_gap() {
        let tz: Tz = "America/New_York".parse().unwrap();
        // 2025-03-09 02:30 does not exist; first valid wall minute is 03:00.
        let resolved = resolve_local_time(tz, date("2025-03-09"), parse_time("02:30").unwrap());
        assert_eq!(resolved, parse_time("03:00").unwrap());
    }

    #[test]
    fn test_resolve_local_time_plain_day_is_identity() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let t = parse_time("02:30").unwrap();
        assert_eq!(resolve_local_time(tz, date("2025-03-10"), t), t);
    }

    #[test]
    fn test_resolve_local_time_fall_back_keeps_wall_time() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let t = parse_time("01:30").unwrap();
        assert_eq!(resolve_local_time(tz, date("2025-11-02"), t), t);
    }

    #[test]
    fn test_validate_timezone() {
        assert!(validate_timezone("America/New_York").is_ok());
        assert!(validate_timezone("Invalid/Zone").is_err());
    }
}
