//! SQLite adapter round trips: everything written through the orchestrator
//! must come back intact in a fresh process hydrating from the same file.

use planner_core::adapter::sqlite::SqliteAdapter;
use planner_core::condition::{Comparison, ConditionNode, SeriesRef};
use planner_core::db::establish_connection;
use planner_core::models::{
    CyclingConfig, CyclingMode, LinkOptions, NewSeriesData, Pattern, PatternRule,
};
use planner_core::planner::Planner;
use planner_core::time::{parse_date, parse_time};
use std::sync::Arc;
use tempfile::TempDir;

async fn planner_on(dir: &TempDir) -> Planner {
    let db_path = dir.path().join("planner.db");
    let pool = establish_connection(&db_path.to_string_lossy())
        .await
        .expect("failed to open test database");
    let adapter = SqliteAdapter::new(pool).await.expect("schema bootstrap failed");
    Planner::new(Arc::new(adapter), "UTC").expect("planner construction failed")
}

#[tokio::test]
async fn test_full_state_survives_restart() {
    let dir = tempfile::tempdir().expect("failed to create temp directory");

    let first = planner_on(&dir).await;
    let mut gated = Pattern::new(PatternRule::Weekly {
        days_of_week: [0, 3].into_iter().collect(),
    });
    gated.time = Some(parse_time("09:00").unwrap());
    gated.duration_minutes = Some(45);
    gated.condition = Some(ConditionNode::Weekday {
        days: [0, 3].into_iter().collect(),
    });
    let parent = first
        .create_series(NewSeriesData {
            title: "Long run".to_string(),
            tags: vec!["outside".to_string()],
            start_date: Some(parse_date("2025-01-01").unwrap()),
            patterns: vec![gated],
            cycling: Some(CyclingConfig {
                mode: CyclingMode::Sequential,
                items: vec!["tempo".to_string(), "easy".to_string()],
                gap_leap: true,
                current_index: 0,
            }),
            ..Default::default()
        })
        .await
        .unwrap()
        .id;
    let child = first
        .create_series(NewSeriesData {
            title: "Stretching".to_string(),
            patterns: vec![Pattern::new(PatternRule::Weekly {
                days_of_week: [0, 3].into_iter().collect(),
            })],
            ..Default::default()
        })
        .await
        .unwrap()
        .id;
    first
        .link_series(
            parent,
            child,
            LinkOptions {
                distance_minutes: 10,
                early_wobble_minutes: 0,
                late_wobble_minutes: 20,
            },
        )
        .await
        .unwrap();
    first
        .log_completion(
            parent,
            parse_date("2025-06-01").unwrap(),
            Some(parse_time("09:00").unwrap()),
            Some(parse_time("09:50").unwrap()),
        )
        .await
        .unwrap();
    first
        .cancel_instance(parent, parse_date("2025-06-04").unwrap())
        .await
        .unwrap();
    let reminder = first
        .create_reminder(parent, "shoes by the door".to_string(), 60)
        .await
        .unwrap();
    first
        .acknowledge_reminder(
            reminder.id,
            parse_date("2025-06-01").unwrap().and_time(parse_time("08:30").unwrap()),
        )
        .await
        .unwrap();

    let window = (parse_date("2025-06-01").unwrap(), parse_date("2025-06-08").unwrap());
    let before = first.get_schedule(window.0, window.1).unwrap();
    drop(first);

    let second = planner_on(&dir).await;
    second.hydrate().await.unwrap();

    assert_eq!(second.get_all_series().len(), 2);
    assert_eq!(second.get_series_by_tag("outside").len(), 1);
    assert_eq!(second.get_completions(parent).len(), 1);
    assert_eq!(second.get_chain_depth(child).unwrap(), 1);

    let after = second.get_schedule(window.0, window.1).unwrap();
    assert_eq!(before, after);

    // The acknowledgement came back too: nothing pending on the acked date.
    let as_of = parse_date("2025-06-01").unwrap().and_time(parse_time("08:30").unwrap());
    assert!(second
        .get_pending_reminders(as_of)
        .iter()
        .all(|p| p.date != parse_date("2025-06-01").unwrap()));
}

#[tokio::test]
async fn test_condition_trees_round_trip_as_json() {
    let dir = tempfile::tempdir().expect("failed to create temp directory");

    let first = planner_on(&dir).await;
    let mut pattern = Pattern::new(PatternRule::Daily);
    pattern.condition = Some(ConditionNode::And {
        children: vec![
            ConditionNode::Weekday {
                days: [1, 2, 3, 4, 5].into_iter().collect(),
            },
            ConditionNode::Not {
                child: Box::new(ConditionNode::CompletionCount {
                    series_ref: SeriesRef::SelfSeries,
                    window_days: 7,
                    comparison: Comparison::Ge,
                    value: 5,
                }),
            },
        ],
    });
    let condition = pattern.condition.clone().unwrap();
    let series = first
        .create_series(NewSeriesData {
            title: "Weekday habit".to_string(),
            patterns: vec![pattern],
            ..Default::default()
        })
        .await
        .unwrap()
        .id;
    drop(first);

    let second = planner_on(&dir).await;
    second.hydrate().await.unwrap();
    let restored = second.get_series(series).unwrap();
    assert_eq!(restored.patterns[0].condition, Some(condition));
}
