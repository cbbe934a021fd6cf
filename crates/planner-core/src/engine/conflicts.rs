//! Conflict detection over the repositioned schedule.

use chrono::{Duration, NaiveDate};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use uuid::Uuid;

use crate::chain::{ChainEnds, LinkManager};
use crate::models::{
    Conflict, ConflictKind, Constraint, ConstraintKind, ConstraintTarget, Link, PatternRule,
    ScheduleInstance, Series,
};
use crate::store::series::SeriesReader;

/// Resolve a constraint target to concrete series ids. Tag targets resolve
/// at query time against the current tag index.
pub(crate) fn resolve_target(target: &ConstraintTarget, series: &SeriesReader) -> BTreeSet<Uuid> {
    match target {
        ConstraintTarget::Series(id) => [*id].into_iter().collect(),
        ConstraintTarget::Tag(tag) => series.ids_with_tag(tag).into_iter().collect(),
    }
}

pub fn detect_conflicts(
    instances: &[ScheduleInstance],
    constraints: &[Constraint],
    link_by_child: &HashMap<Uuid, Link>,
    series_by_id: &HashMap<Uuid, Series>,
    links: &LinkManager,
    chain_ends: &ChainEnds,
    series_reader: &SeriesReader,
    window_start: NaiveDate,
) -> Vec<Conflict> {
    let mut by_date: BTreeMap<NaiveDate, Vec<&ScheduleInstance>> = BTreeMap::new();
    for instance in instances {
        by_date.entry(instance.date).or_default().push(instance);
    }

    let mut conflicts = Vec::new();
    detect_overlaps(&by_date, &mut conflicts);
    for constraint in constraints {
        match &constraint.kind {
            ConstraintKind::MustBeBefore {
                first_series,
                second_series,
            } => {
                detect_must_be_before(&by_date, *first_series, *second_series, &mut conflicts);
            }
            ConstraintKind::CantBeNextTo { target } => {
                let ids = resolve_target(target, series_reader);
                detect_cant_be_next_to(
                    &by_date,
                    &ids,
                    series_by_id,
                    window_start,
                    &mut conflicts,
                );
            }
            ConstraintKind::MustBeOnSameDay { .. } => {
                // Enforced during instance generation via the allowed-date
                // restriction; nothing left to flag here.
            }
        }
    }
    detect_chain_misfits(
        instances,
        link_by_child,
        series_by_id,
        links,
        chain_ends,
        &mut conflicts,
    );
    conflicts
}

/// Fixed instances that share a date and intersect in time. Each unordered
/// series pair is reported once across the window, at its earliest date.
fn detect_overlaps(
    by_date: &BTreeMap<NaiveDate, Vec<&ScheduleInstance>>,
    conflicts: &mut Vec<Conflict>,
) {
    let mut flagged: HashSet<(Uuid, Uuid)> = HashSet::new();
    for (date, day) in by_date {
        for (i, a) in day.iter().enumerate() {
            for b in day.iter().skip(i + 1) {
                if !a.fixed || !b.fixed || a.all_day || b.all_day || a.series_id == b.series_id {
                    continue;
                }
                let intersects = a.time < b.end_time() && b.time < a.end_time();
                if intersects && flagged.insert(ordered_pair(a.series_id, b.series_id)) {
                    conflicts.push(Conflict {
                        kind: ConflictKind::Overlap,
                        date: *date,
                        series: vec![a.series_id, b.series_id],
                        message: format!(
                            "\"{}\" and \"{}\" overlap on {}",
                            a.title, b.title, date
                        ),
                    });
                }
            }
        }
    }
}

fn detect_must_be_before(
    by_date: &BTreeMap<NaiveDate, Vec<&ScheduleInstance>>,
    first_series: Uuid,
    second_series: Uuid,
    conflicts: &mut Vec<Conflict>,
) {
    for (date, day) in by_date {
        let violated = day
            .iter()
            .filter(|i| i.series_id == first_series)
            .any(|first| {
                day.iter()
                    .filter(|i| i.series_id == second_series)
                    .any(|second| first.time >= second.time)
            });
        if violated {
            conflicts.push(Conflict {
                kind: ConflictKind::ConstraintViolation,
                date: *date,
                series: vec![first_series, second_series],
                message: format!(
                    "Series {} must come before series {} on {}",
                    first_series, second_series, date
                ),
            });
        }
    }
}

/// Adjacency violations among the target set, both as materialized instances
/// on consecutive dates and as weekly grids that can never avoid adjacency.
/// A pair is reported once per window.
fn detect_cant_be_next_to(
    by_date: &BTreeMap<NaiveDate, Vec<&ScheduleInstance>>,
    target_ids: &BTreeSet<Uuid>,
    series_by_id: &HashMap<Uuid, Series>,
    window_start: NaiveDate,
    conflicts: &mut Vec<Conflict>,
) {
    let mut flagged: HashSet<(Uuid, Uuid)> = HashSet::new();

    let mut target_dates: BTreeMap<NaiveDate, Vec<Uuid>> = BTreeMap::new();
    for (date, day) in by_date {
        for instance in day {
            if target_ids.contains(&instance.series_id) {
                target_dates.entry(*date).or_default().push(instance.series_id);
            }
        }
    }
    let dates: Vec<NaiveDate> = target_dates.keys().copied().collect();
    for pair in dates.windows(2) {
        if pair[1] - pair[0] != Duration::days(1) {
            continue;
        }
        for a in &target_dates[&pair[0]] {
            for b in &target_dates[&pair[1]] {
                if a != b && flagged.insert(ordered_pair(*a, *b)) {
                    conflicts.push(Conflict {
                        kind: ConflictKind::ConstraintViolation,
                        date: pair[0],
                        series: vec![*a, *b],
                        message: format!(
                            "Series {} and {} land on consecutive days {} and {}",
                            a, b, pair[0], pair[1]
                        ),
                    });
                }
            }
        }
    }

    // Weekly grids: two members whose recurring weekdays sit next to each
    // other (including the Saturday/Sunday wrap) will always collide.
    let ids: Vec<Uuid> = target_ids.iter().copied().collect();
    for (i, a) in ids.iter().enumerate() {
        for b in ids.iter().skip(i + 1) {
            let days_a = recurring_weekdays(series_by_id.get(a));
            let days_b = recurring_weekdays(series_by_id.get(b));
            let adjacent = days_a.iter().any(|da| {
                days_b.iter().any(|db| {
                    let delta = i16::from(*da) - i16::from(*db);
                    delta.abs() == 1 || delta.abs() == 6
                })
            });
            if adjacent && flagged.insert(ordered_pair(*a, *b)) {
                conflicts.push(Conflict {
                    kind: ConflictKind::ConstraintViolation,
                    date: window_start,
                    series: vec![*a, *b],
                    message: format!("Series {} and {} recur on adjacent weekdays", a, b),
                });
            }
        }
    }
}

fn recurring_weekdays(series: Option<&Series>) -> BTreeSet<u8> {
    let mut days = BTreeSet::new();
    let Some(series) = series else {
        return days;
    };
    for pattern in &series.patterns {
        match &pattern.rule {
            PatternRule::Daily => days.extend(0..=6),
            PatternRule::Weekly { days_of_week } => days.extend(days_of_week.iter().copied()),
            _ => {}
        }
    }
    days
}

/// Chain children whose effective check time falls outside the wobble
/// bounds. When the author supplied an explicit pattern time, that original
/// is checked, surfacing configuration mismatches that reflow would
/// otherwise paper over.
fn detect_chain_misfits(
    instances: &[ScheduleInstance],
    link_by_child: &HashMap<Uuid, Link>,
    series_by_id: &HashMap<Uuid, Series>,
    links: &LinkManager,
    chain_ends: &ChainEnds,
    conflicts: &mut Vec<Conflict>,
) {
    let mut sorted_links: Vec<&Link> = link_by_child.values().collect();
    sorted_links.sort_by_key(|l| l.child_id);
    for link in sorted_links {
        let Some(parent) = series_by_id.get(&link.parent_id) else {
            continue;
        };
        for instance in instances.iter().filter(|i| i.series_id == link.child_id) {
            let Some(parent_end) = links.parent_end_time(parent, instance.date, chain_ends) else {
                continue;
            };
            let target = parent_end + Duration::minutes(link.distance_minutes);
            let earliest = target - Duration::minutes(link.early_wobble_minutes);
            let latest = target + Duration::minutes(link.late_wobble_minutes);
            let check_time = if instance.pattern_supplied_time {
                instance.pattern_time
            } else {
                instance.time
            };
            if check_time < earliest || check_time > latest {
                conflicts.push(Conflict {
                    kind: ConflictKind::ChainCannotFit,
                    date: instance.date,
                    series: vec![link.parent_id, link.child_id],
                    message: format!(
                        "\"{}\" at {} cannot fit its chain window [{}, {}]",
                        instance.title, check_time, earliest, latest
                    ),
                });
            }
        }
    }
}

fn ordered_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
