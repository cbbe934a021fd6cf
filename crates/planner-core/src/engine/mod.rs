//! The schedule engine: expands patterns over a window, gates them through
//! conditions and exceptions, places chain children, reflows each day, and
//! detects conflicts. Works exclusively through readers; never mutates store
//! state.

pub mod cache;
pub mod conflicts;
pub mod cycling;
pub mod duration;
pub mod reflow;

use chrono::{Duration, NaiveDate};
use chrono_tz::Tz;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::chain::{ChainEnds, LinkManager};
use crate::condition::ConditionEvaluator;
use crate::engine::cache::{EngineCaches, PatternKey};
use crate::engine::conflicts::{detect_conflicts, resolve_target};
use crate::engine::cycling::cycling_title;
use crate::engine::duration::adaptive_duration;
use crate::engine::reflow::reflow;
use crate::error::CoreError;
use crate::expansion::expand;
use crate::models::{
    CacheStats, Conflict, ConstraintKind, ExceptionType, InvalidationScope, Link, Pattern,
    PatternRule, Schedule, ScheduleInstance, Series,
};
use crate::store::completions::CompletionReader;
use crate::store::constraints::ConstraintReader;
use crate::store::exceptions::ExceptionReader;
use crate::store::series::SeriesReader;
use crate::time::{default_pattern_time, midnight, resolve_local_time};

pub struct ScheduleEngine {
    series: SeriesReader,
    completions: CompletionReader,
    exceptions: ExceptionReader,
    constraints: ConstraintReader,
    links: Arc<LinkManager>,
    conditions: Arc<ConditionEvaluator>,
    tz: Tz,
    caches: EngineCaches,
    cached_conflicts: Vec<Conflict>,
}

impl ScheduleEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        series: SeriesReader,
        completions: CompletionReader,
        exceptions: ExceptionReader,
        constraints: ConstraintReader,
        links: Arc<LinkManager>,
        conditions: Arc<ConditionEvaluator>,
        tz: Tz,
    ) -> Self {
        Self {
            series,
            completions,
            exceptions,
            constraints,
            links,
            conditions,
            tz,
            caches: EngineCaches::new(),
            cached_conflicts: Vec::new(),
        }
    }

    /// Materialize the schedule over `[start, end)`. An empty window returns
    /// an empty schedule without building; an inverted one is a validation
    /// error. Cache hits return a deep copy.
    pub fn get_schedule(
        &mut self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Schedule, CoreError> {
        if end < start {
            return Err(CoreError::Validation(format!(
                "Schedule window end {} precedes start {}",
                end, start
            )));
        }
        if end == start {
            return Ok(Schedule::empty(start, end));
        }
        if let Some(schedule) = self.caches.schedule_get(start, end) {
            return Ok(schedule);
        }
        let schedule = self.build(start, end);
        self.cached_conflicts = schedule.conflicts.clone();
        self.caches.schedule_put(start, end, schedule.clone());
        Ok(schedule)
    }

    pub fn invalidate(&mut self, scope: InvalidationScope) {
        self.caches.invalidate(scope);
    }

    /// Conflicts from the most recent build.
    pub fn conflicts(&self) -> Vec<Conflict> {
        self.cached_conflicts.clone()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.caches.stats()
    }

    fn build(&mut self, start: NaiveDate, end: NaiveDate) -> Schedule {
        let all = self.series.all();
        let series_by_id: HashMap<Uuid, Series> =
            all.iter().map(|s| (s.id, s.clone())).collect();
        let constraints = self.constraints.all();
        let link_by_child = self.links.snapshot();

        // First pass: candidate date sets per (series, pattern), cached by
        // structural identity.
        let mut candidates: HashMap<Uuid, Vec<BTreeSet<NaiveDate>>> = HashMap::new();
        let mut dates_by_series: HashMap<Uuid, BTreeSet<NaiveDate>> = HashMap::new();
        for series in &all {
            let mut sets = Vec::with_capacity(series.patterns.len());
            for (idx, pattern) in series.patterns.iter().enumerate() {
                let key = PatternKey {
                    series_id: series.id,
                    pattern_idx: idx,
                    start,
                    end,
                    anchor: self.effective_anchor(series, pattern),
                };
                let rule = pattern.rule.clone();
                let series_start = series.start_date;
                let end_date = series.end_date;
                let dates = self.caches.pattern_dates(key, || {
                    let mut dates = expand(&rule, start, end, series_start);
                    if let Some(limit) = end_date {
                        dates.retain(|d| *d < limit);
                    }
                    dates
                });
                dates_by_series
                    .entry(series.id)
                    .or_default()
                    .extend(dates.iter().copied());
                sets.push(dates);
            }
            candidates.insert(series.id, sets);
        }

        // Same-day restriction sets; multiple constraints on one series
        // intersect.
        let mut same_day_allowed: HashMap<Uuid, BTreeSet<NaiveDate>> = HashMap::new();
        for constraint in &constraints {
            if let ConstraintKind::MustBeOnSameDay {
                first_series,
                second_target,
            } = &constraint.kind
            {
                let mut union = BTreeSet::new();
                for id in resolve_target(second_target, &self.series) {
                    if let Some(dates) = dates_by_series.get(&id) {
                        union.extend(dates.iter().copied());
                    }
                }
                same_day_allowed
                    .entry(*first_series)
                    .and_modify(|current| {
                        *current = current.intersection(&union).copied().collect()
                    })
                    .or_insert(union);
            }
        }

        let order = topo_order(&all, &link_by_child);

        // Second pass: per-date instance generation in topo order, so a
        // child always sees its parent's per-date end times.
        let mut instances: Vec<ScheduleInstance> = Vec::new();
        let mut chain_ends = ChainEnds::new();
        for series in &order {
            let completion_count = self.completions.count_for_series(series.id);
            let series_completions = self.completions.for_series(series.id);
            let mut offset: usize = 0;
            let sets = &candidates[&series.id];
            for (idx, pattern) in series.patterns.iter().enumerate() {
                for &day in &sets[idx] {
                    if let Some(limit) = series.end_date {
                        if day >= limit {
                            continue;
                        }
                    }
                    if let Some(condition) = &pattern.condition {
                        if !self.conditions.evaluate(condition, series.id, day) {
                            continue;
                        }
                    }
                    if let Some(allowed) = same_day_allowed.get(&series.id) {
                        if !allowed.contains(&day) {
                            continue;
                        }
                    }

                    let exception = self.exceptions.get(series.id, day);
                    if exception
                        .as_ref()
                        .is_some_and(|e| e.exception_type == ExceptionType::Cancelled)
                    {
                        // Without gapLeap, a cancelled slot still advances
                        // cycling.
                        if series
                            .cycling
                            .as_ref()
                            .is_some_and(|c| !c.gap_leap && !c.items.is_empty())
                        {
                            offset += 1;
                        }
                        continue;
                    }

                    let mut date = day;
                    let mut pattern_supplied = pattern.time.is_some();
                    let rescheduled = exception
                        .as_ref()
                        .filter(|e| e.exception_type == ExceptionType::Rescheduled)
                        .and_then(|e| e.new_time);
                    let (mut time, mut explicit) = if let Some(new_time) = rescheduled {
                        if new_time.date() != day {
                            date = new_time.date();
                        }
                        pattern_supplied = true;
                        (new_time, true)
                    } else if pattern.all_day {
                        (midnight(day), true)
                    } else {
                        let local = resolve_local_time(
                            self.tz,
                            day,
                            pattern.time.unwrap_or_else(default_pattern_time),
                        );
                        (day.and_time(local), pattern.time.is_some())
                    };

                    let mut pattern_time = time;
                    if !pattern.all_day {
                        if let Some(link) = link_by_child.get(&series.id) {
                            if let Some(parent) = series_by_id.get(&link.parent_id) {
                                if let Some(parent_end) =
                                    self.links.parent_end_time(parent, day, &chain_ends)
                                {
                                    time = parent_end + Duration::minutes(link.distance_minutes);
                                    explicit = true;
                                    if !pattern_supplied {
                                        // The chain target becomes the
                                        // declared time; an author-supplied
                                        // time is retained so conflict
                                        // detection can flag the mismatch.
                                        pattern_time = time;
                                    }
                                }
                            }
                        }
                    }

                    let mut duration_minutes = pattern.duration_minutes.unwrap_or(0);
                    if let Some(config) = &series.adaptive_duration {
                        if let Some(learned) = adaptive_duration(config, &series_completions) {
                            duration_minutes = learned;
                        }
                    }

                    let title = series
                        .cycling
                        .as_ref()
                        .and_then(|c| cycling_title(c, series.id, completion_count, offset))
                        .unwrap_or_else(|| series.title.clone());
                    offset += 1;

                    chain_ends.insert(
                        (series.id, date),
                        time + Duration::minutes(duration_minutes),
                    );
                    instances.push(ScheduleInstance {
                        series_id: series.id,
                        title,
                        date,
                        time,
                        duration_minutes,
                        all_day: pattern.all_day,
                        fixed: pattern.fixed,
                        explicit_time: explicit,
                        pattern_time,
                        pattern_supplied_time: pattern_supplied,
                        pattern_idx: idx,
                    });
                }
            }
        }

        let mut conflicts = reflow(
            &mut instances,
            &link_by_child,
            &self.completions,
            &mut self.caches,
        );

        // Conflict checks run against the repositioned instances.
        let mut post_ends = ChainEnds::new();
        for instance in &instances {
            post_ends.insert(
                (instance.series_id, instance.date),
                instance.end_time(),
            );
        }
        conflicts.extend(detect_conflicts(
            &instances,
            &constraints,
            &link_by_child,
            &series_by_id,
            &self.links,
            &post_ends,
            &self.series,
            start,
        ));

        instances.sort_by(|a, b| {
            (a.time, a.series_id, a.pattern_idx).cmp(&(b.time, b.series_id, b.pattern_idx))
        });
        tracing::debug!(
            window = %format!("[{}, {})", start, end),
            instances = instances.len(),
            conflicts = conflicts.len(),
            "schedule built"
        );
        Schedule {
            start,
            end,
            instances,
            conflicts,
        }
    }

    /// The anchor participating in pattern cache identity: an explicit
    /// pattern anchor, or the series' first-completion date for weekly
    /// patterns once any completion exists.
    fn effective_anchor(&self, series: &Series, pattern: &Pattern) -> Option<NaiveDate> {
        if pattern.anchor.is_some() {
            return pattern.anchor;
        }
        if let PatternRule::Weekly { days_of_week } = &pattern.rule {
            if !days_of_week.is_empty() && self.completions.has_any(series.id) {
                return self.completions.first_completion_date(series.id);
            }
        }
        None
    }
}

/// Iterative frontier expansion: roots first, then any series whose parent
/// is already placed. Whatever remains (orphans, corrupt cycles) is appended
/// so it still gets evaluated.
fn topo_order(all: &[Series], link_by_child: &HashMap<Uuid, Link>) -> Vec<Series> {
    let mut placed: HashSet<Uuid> = HashSet::new();
    let mut order: Vec<Series> = Vec::with_capacity(all.len());
    let mut remaining: Vec<Series> = Vec::new();
    for series in all {
        if link_by_child.contains_key(&series.id) {
            remaining.push(series.clone());
        } else {
            placed.insert(series.id);
            order.push(series.clone());
        }
    }
    loop {
        let mut progressed = false;
        let mut still: Vec<Series> = Vec::new();
        for series in remaining {
            let parent = link_by_child[&series.id].parent_id;
            if placed.contains(&parent) {
                placed.insert(series.id);
                order.push(series);
                progressed = true;
            } else {
                still.push(series);
            }
        }
        remaining = still;
        if !progressed {
            break;
        }
    }
    order.extend(remaining);
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series_named(title: &str) -> Series {
        Series {
            title: title.to_string(),
            patterns: vec![Pattern::new(PatternRule::Daily)],
            ..Default::default()
        }
    }

    #[test]
    fn test_topo_order_places_parents_first() {
        let a = series_named("a");
        let b = series_named("b");
        let c = series_named("c");
        let links: HashMap<Uuid, Link> = [
            (
                b.id,
                Link {
                    parent_id: a.id,
                    child_id: b.id,
                    distance_minutes: 0,
                    early_wobble_minutes: 0,
                    late_wobble_minutes: 0,
                },
            ),
            (
                c.id,
                Link {
                    parent_id: b.id,
                    child_id: c.id,
                    distance_minutes: 0,
                    early_wobble_minutes: 0,
                    late_wobble_minutes: 0,
                },
            ),
        ]
        .into_iter()
        .collect();
        let order = topo_order(&[c.clone(), b.clone(), a.clone()], &links);
        let position = |id: Uuid| order.iter().position(|s| s.id == id).unwrap();
        assert!(position(a.id) < position(b.id));
        assert!(position(b.id) < position(c.id));
    }

    #[test]
    fn test_topo_order_appends_orphans() {
        let a = series_named("a");
        let orphan_parent = Uuid::new_v4();
        let links: HashMap<Uuid, Link> = [(
            a.id,
            Link {
                parent_id: orphan_parent,
                child_id: a.id,
                distance_minutes: 0,
                early_wobble_minutes: 0,
                late_wobble_minutes: 0,
            },
        )]
        .into_iter()
        .collect();
        let order = topo_order(&[a.clone()], &links);
        assert_eq!(order.len(), 1);
        assert_eq!(order[0].id, a.id);
    }
}
