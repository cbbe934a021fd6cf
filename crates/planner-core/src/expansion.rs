//! Pure expansion of pattern rules to concrete dates.

use chrono::{Datelike, Duration, NaiveDate};
use std::collections::BTreeSet;

use crate::models::PatternRule;
use crate::time::{days_in_month, week_monday};

/// Expand `rule` over the half-open window `[start, end)`, clipped to the
/// series start. Output is sorted, duplicate-free, and totally determined by
/// its inputs.
pub fn expand(
    rule: &PatternRule,
    start: NaiveDate,
    end: NaiveDate,
    series_start: Option<NaiveDate>,
) -> BTreeSet<NaiveDate> {
    let effective_start = match series_start {
        Some(s) => start.max(s),
        None => start,
    };
    let mut dates = BTreeSet::new();
    if end <= effective_start {
        return dates;
    }

    match rule {
        PatternRule::Daily => {
            let mut day = effective_start;
            while day < end {
                dates.insert(day);
                day += Duration::days(1);
            }
        }
        PatternRule::EveryNDays { n } => {
            let step = i64::from((*n).max(1));
            // Align to the series start by modular offset.
            let align = series_start.unwrap_or(start);
            let offset = (effective_start - align).num_days().rem_euclid(step);
            let mut day = effective_start + Duration::days((step - offset) % step);
            while day < end {
                dates.insert(day);
                day += Duration::days(step);
            }
        }
        PatternRule::Weekly { days_of_week } => {
            let mut monday = week_monday(effective_start);
            while monday < end {
                for &dow in days_of_week {
                    // Week runs Monday through Sunday; Sunday (0) lands last.
                    let day = monday + Duration::days(i64::from((dow + 6) % 7));
                    if day >= start && day >= effective_start && day < end {
                        dates.insert(day);
                    }
                }
                monday += Duration::days(7);
            }
        }
        PatternRule::Monthly { day } => {
            let mut year = effective_start.year();
            let mut month = effective_start.month();
            loop {
                let first = match NaiveDate::from_ymd_opt(year, month, 1) {
                    Some(d) => d,
                    None => break,
                };
                if first >= end {
                    break;
                }
                // Months too short for the requested day are skipped.
                if *day >= 1 && *day <= days_in_month(year, month) {
                    if let Some(date) = NaiveDate::from_ymd_opt(year, month, *day) {
                        if date >= effective_start && date < end {
                            dates.insert(date);
                        }
                    }
                }
                if month == 12 {
                    year += 1;
                    month = 1;
                } else {
                    month += 1;
                }
            }
        }
        PatternRule::Yearly { month, day } => {
            for year in effective_start.year()..=end.year() {
                // from_ymd_opt rejects Feb-29 on non-leap years.
                if let Some(date) = NaiveDate::from_ymd_opt(year, *month, *day) {
                    if date >= effective_start && date < end {
                        dates.insert(date);
                    }
                }
            }
        }
    }

    dates
}
