//! Adaptive duration: average the last N observed completion durations.

use crate::models::{AdaptiveDurationConfig, Completion};

/// Learned duration in minutes, or `None` when no completion carries a usable
/// start/end pair and no fallback is configured (the pattern's own duration
/// then applies).
pub fn adaptive_duration(
    config: &AdaptiveDurationConfig,
    completions: &[Completion],
) -> Option<i64> {
    let durations: Vec<i64> = completions
        .iter()
        .filter_map(|c| {
            let start = c.start_time?;
            let end = c.end_time?;
            let minutes = (end - start).num_minutes();
            (minutes > 0).then_some(minutes)
        })
        .collect();
    if durations.is_empty() {
        return config.fallback_minutes;
    }
    let last_n = config.last_n.max(1);
    let recent: Vec<i64> = durations.iter().rev().take(last_n).copied().collect();
    let average = recent.iter().sum::<i64>() as f64 / recent.len() as f64;
    let scaled = (average * config.multiplier).ceil() as i64;
    Some(scaled.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{parse_date, parse_time};
    use uuid::Uuid;

    fn completion(date: &str, start: &str, end: &str) -> Completion {
        Completion {
            id: Uuid::new_v4(),
            series_id: Uuid::new_v4(),
            date: parse_date(date).unwrap(),
            start_time: Some(parse_time(start).unwrap()),
            end_time: Some(parse_time(end).unwrap()),
        }
    }

    #[test]
    fn test_no_history_returns_fallback() {
        let config = AdaptiveDurationConfig {
            fallback_minutes: Some(30),
            ..Default::default()
        };
        assert_eq!(adaptive_duration(&config, &[]), Some(30));
        let bare = AdaptiveDurationConfig::default();
        assert_eq!(adaptive_duration(&bare, &[]), None);
    }

    #[test]
    fn test_average_of_recorded_durations() {
        let config = AdaptiveDurationConfig {
            fallback_minutes: Some(30),
            ..Default::default()
        };
        let completions = vec![
            completion("2025-01-01", "10:00", "10:40"),
            completion("2025-01-02", "10:00", "10:50"),
            completion("2025-01-03", "10:00", "11:00"),
        ];
        // ceil(avg(40, 50, 60)) = 50.
        assert_eq!(adaptive_duration(&config, &completions), Some(50));
    }

    #[test]
    fn test_last_n_and_multiplier() {
        let config = AdaptiveDurationConfig {
            fallback_minutes: None,
            last_n: 2,
            multiplier: 1.5,
        };
        let completions = vec![
            completion("2025-01-01", "10:00", "12:00"), // dropped by lastN
            completion("2025-01-02", "10:00", "10:10"),
            completion("2025-01-03", "10:00", "10:20"),
        ];
        // ceil(avg(10, 20) * 1.5) = 23.
        assert_eq!(adaptive_duration(&config, &completions), Some(23));
    }

    #[test]
    fn test_invalid_spans_are_ignored() {
        let config = AdaptiveDurationConfig {
            fallback_minutes: Some(15),
            ..Default::default()
        };
        let backwards = completion("2025-01-01", "11:00", "10:00");
        let missing_end = Completion {
            end_time: None,
            ..completion("2025-01-02", "10:00", "10:30")
        };
        assert_eq!(adaptive_duration(&config, &[backwards, missing_end]), Some(15));
    }
}
