//! Boolean condition trees gating pattern occurrences per date, and the
//! reverse-dependency index used to find series affected by another series'
//! completions.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;
use uuid::Uuid;

use crate::store::completions::CompletionReader;
use crate::store::series::SeriesReader;
use crate::time::weekday_number;

fn default_window_days() -> u32 {
    14
}

/// Which series a `completionCount` node counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SeriesRef {
    /// The series owning the pattern the condition is attached to.
    #[default]
    SelfSeries,
    Other(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = ">")]
    Gt,
}

impl Comparison {
    pub fn holds(self, lhs: u32, rhs: u32) -> bool {
        match self {
            Comparison::Lt => lhs < rhs,
            Comparison::Le => lhs <= rhs,
            Comparison::Eq => lhs == rhs,
            Comparison::Ge => lhs >= rhs,
            Comparison::Gt => lhs > rhs,
        }
    }
}

/// A node of a condition tree. Evaluation is per-date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ConditionNode {
    CompletionCount {
        #[serde(default)]
        series_ref: SeriesRef,
        #[serde(default = "default_window_days")]
        window_days: u32,
        comparison: Comparison,
        value: u32,
    },
    Weekday {
        /// Day-of-week numbers, Sunday = 0 through Saturday = 6.
        days: BTreeSet<u8>,
    },
    And {
        children: Vec<ConditionNode>,
    },
    Or {
        children: Vec<ConditionNode>,
    },
    Not {
        child: Box<ConditionNode>,
    },
    /// Forward-compatibility knob: unrecognized node kinds deserialize here
    /// and evaluate to true. Documented behavior; not something callers
    /// should rely on.
    #[serde(other)]
    Unknown,
}

/// Evaluates condition trees against completion state and maintains the
/// series → dependents reverse index.
pub struct ConditionEvaluator {
    series: SeriesReader,
    completions: CompletionReader,
    /// referenced series → series whose patterns reference it.
    deps: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
}

impl ConditionEvaluator {
    pub fn new(series: SeriesReader, completions: CompletionReader) -> Self {
        Self {
            series,
            completions,
            deps: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild the reverse dependency map from scratch. Called on any series
    /// create, update, or delete.
    pub fn rebuild_index(&self) {
        let mut deps: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();
        for series in self.series.all() {
            for pattern in &series.patterns {
                if let Some(condition) = &pattern.condition {
                    collect_refs(condition, series.id, &mut deps);
                }
            }
        }
        *self.deps.write().unwrap_or_else(|e| e.into_inner()) = deps;
    }

    /// Series whose conditions reference `series_id`.
    pub fn dependents_of(&self, series_id: Uuid) -> HashSet<Uuid> {
        self.deps
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&series_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn dependency_index(&self) -> HashMap<Uuid, HashSet<Uuid>> {
        self.deps.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Evaluate `node` for `series_id` at `as_of`.
    ///
    /// For `completionCount` nodes referencing another series: when that
    /// series has a last completion within 2·windowDays of `as_of`, the
    /// whole count window translates to end at that last-completion date.
    /// This is the only form of cross-series evaluation-point translation.
    pub fn evaluate(&self, node: &ConditionNode, series_id: Uuid, as_of: NaiveDate) -> bool {
        match node {
            ConditionNode::CompletionCount {
                series_ref,
                window_days,
                comparison,
                value,
            } => {
                let target = match series_ref {
                    SeriesRef::SelfSeries => series_id,
                    SeriesRef::Other(id) => *id,
                };
                let window = i64::from((*window_days).max(1));
                let mut anchor = as_of;
                if matches!(series_ref, SeriesRef::Other(_)) {
                    if let Some(last) = self.completions.last_completion_date(target) {
                        if (as_of - last).num_days().abs() <= 2 * window {
                            anchor = last;
                        }
                    }
                }
                let window_start = anchor - Duration::days(window - 1);
                let count = self.completions.count_in_range(target, window_start, anchor);
                comparison.holds(count as u32, *value)
            }
            ConditionNode::Weekday { days } => days.contains(&weekday_number(as_of)),
            ConditionNode::And { children } => children
                .iter()
                .all(|child| self.evaluate(child, series_id, as_of)),
            ConditionNode::Or { children } => children
                .iter()
                .any(|child| self.evaluate(child, series_id, as_of)),
            ConditionNode::Not { child } => !self.evaluate(child, series_id, as_of),
            ConditionNode::Unknown => true,
        }
    }
}

fn collect_refs(node: &ConditionNode, owner: Uuid, deps: &mut HashMap<Uuid, HashSet<Uuid>>) {
    match node {
        ConditionNode::CompletionCount {
            series_ref: SeriesRef::Other(target),
            ..
        } => {
            deps.entry(*target).or_default().insert(owner);
        }
        ConditionNode::And { children } | ConditionNode::Or { children } => {
            for child in children {
                collect_refs(child, owner, deps);
            }
        }
        ConditionNode::Not { child } => collect_refs(child, owner, deps),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::memory::MemoryAdapter;
    use crate::models::{NewSeriesData, Pattern, PatternRule};
    use crate::store::completions::CompletionTracker;
    use crate::store::series::SeriesStore;
    use std::sync::Arc;

    fn date(s: &str) -> NaiveDate {
        crate::time::parse_date(s).unwrap()
    }

    async fn setup() -> (SeriesStore, CompletionTracker, ConditionEvaluator) {
        let adapter = Arc::new(MemoryAdapter::new());
        let series = SeriesStore::new(adapter.clone());
        let completions = CompletionTracker::new(adapter);
        let evaluator = ConditionEvaluator::new(series.reader(), completions.reader());
        (series, completions, evaluator)
    }

    async fn add_series(store: &SeriesStore, title: &str) -> Uuid {
        store
            .create(NewSeriesData {
                title: title.to_string(),
                patterns: vec![Pattern::new(PatternRule::Daily)],
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_completion_count_self_window() {
        let (series, completions, evaluator) = setup().await;
        let id = add_series(&series, "run").await;
        for day in ["2025-06-01", "2025-06-03", "2025-06-05"] {
            completions.log(id, date(day), None, None).await.unwrap();
        }

        let node = ConditionNode::CompletionCount {
            series_ref: SeriesRef::SelfSeries,
            window_days: 7,
            comparison: Comparison::Ge,
            value: 3,
        };
        // Window [2025-05-30, 2025-06-05] holds all three.
        assert!(evaluator.evaluate(&node, id, date("2025-06-05")));
        // Window [2025-06-06, 2025-06-12] holds none.
        assert!(!evaluator.evaluate(&node, id, date("2025-06-12")));
    }

    #[tokio::test]
    async fn test_cross_series_anchor_shift() {
        let (series, completions, evaluator) = setup().await;
        let watcher = add_series(&series, "watcher").await;
        let target = add_series(&series, "target").await;
        completions.log(target, date("2025-06-01"), None, None).await.unwrap();

        let node = ConditionNode::CompletionCount {
            series_ref: SeriesRef::Other(target),
            window_days: 3,
            comparison: Comparison::Ge,
            value: 1,
        };
        // 2025-06-06 is 5 days after the last completion, within 2·3 = 6, so
        // the window translates to end at 2025-06-01 and sees the completion.
        assert!(evaluator.evaluate(&node, watcher, date("2025-06-06")));
        // 2025-06-10 is 9 days out; the window stays at the schedule date and
        // sees nothing.
        assert!(!evaluator.evaluate(&node, watcher, date("2025-06-10")));
    }

    #[tokio::test]
    async fn test_weekday_and_boolean_nodes() {
        let (series, _completions, evaluator) = setup().await;
        let id = add_series(&series, "gym").await;

        let weekdays = ConditionNode::Weekday {
            days: [1, 3, 5].into_iter().collect(),
        };
        assert!(evaluator.evaluate(&weekdays, id, date("2025-01-20"))); // Monday
        assert!(!evaluator.evaluate(&weekdays, id, date("2025-01-19"))); // Sunday

        let negated = ConditionNode::Not {
            child: Box::new(weekdays.clone()),
        };
        assert!(evaluator.evaluate(&negated, id, date("2025-01-19")));

        let both = ConditionNode::And {
            children: vec![weekdays.clone(), negated.clone()],
        };
        assert!(!evaluator.evaluate(&both, id, date("2025-01-20")));

        let either = ConditionNode::Or {
            children: vec![weekdays, negated],
        };
        assert!(evaluator.evaluate(&either, id, date("2025-01-20")));
    }

    #[tokio::test]
    async fn test_unknown_node_is_permissive() {
        let (series, _completions, evaluator) = setup().await;
        let id = add_series(&series, "misc").await;
        let node: ConditionNode =
            serde_json::from_str(r#"{"kind": "moonPhase", "phase": "full"}"#).unwrap();
        assert_eq!(node, ConditionNode::Unknown);
        assert!(evaluator.evaluate(&node, id, date("2025-01-01")));
    }

    #[tokio::test]
    async fn test_rebuild_index_collects_nested_refs() {
        let (series, _completions, evaluator) = setup().await;
        let target = add_series(&series, "target").await;
        let mut pattern = Pattern::new(PatternRule::Daily);
        pattern.condition = Some(ConditionNode::And {
            children: vec![ConditionNode::Not {
                child: Box::new(ConditionNode::CompletionCount {
                    series_ref: SeriesRef::Other(target),
                    window_days: 14,
                    comparison: Comparison::Gt,
                    value: 0,
                }),
            }],
        });
        let watcher = series
            .create(NewSeriesData {
                title: "watcher".to_string(),
                patterns: vec![pattern],
                ..Default::default()
            })
            .await
            .unwrap()
            .id;

        evaluator.rebuild_index();
        assert!(evaluator.dependents_of(target).contains(&watcher));
        assert!(evaluator.dependents_of(watcher).is_empty());
    }

    #[test]
    fn test_comparisons() {
        assert!(Comparison::Lt.holds(1, 2));
        assert!(Comparison::Le.holds(2, 2));
        assert!(Comparison::Eq.holds(2, 2));
        assert!(Comparison::Ge.holds(2, 2));
        assert!(Comparison::Gt.holds(3, 2));
        assert!(!Comparison::Gt.holds(2, 2));
    }
}
