//! Per-day constraint-satisfaction pass: derive solver inputs from the
//! day's instances, consult the content-addressed result cache, and fold the
//! solver's placement back into the schedule.

use chrono::{Duration, NaiveDate};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::engine::cache::EngineCaches;
use crate::models::{Conflict, ConflictKind, Link, ScheduleInstance};
use crate::solver::{solve_day, ChainInput, DaySolution, SeriesInput};
use crate::store::completions::CompletionReader;
use crate::time::{midnight, minutes_from_midnight};

pub const WAKING_START_MINUTES: i64 = 7 * 60;
pub const WAKING_END_MINUTES: i64 = 23 * 60;

/// Reposition flexible instances day by day. Mutates instance times and
/// fixedness in place; returns conflicts for days the solver could not fully
/// satisfy.
pub fn reflow(
    instances: &mut [ScheduleInstance],
    link_by_child: &HashMap<Uuid, Link>,
    completions: &CompletionReader,
    caches: &mut EngineCaches,
) -> Vec<Conflict> {
    let mut by_date: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
    for (index, instance) in instances.iter().enumerate() {
        by_date.entry(instance.date).or_default().push(index);
    }

    let mut conflicts = Vec::new();
    for (date, day_indices) in by_date {
        // Fixedness widens for explicit times outside the waking window:
        // DST-adjusted, chain-placed, and rescheduled times that land there
        // did so intentionally and must not be pulled back in.
        for &index in &day_indices {
            let instance = &mut instances[index];
            let start = minutes_from_midnight(date, instance.time);
            if instance.explicit_time && !(WAKING_START_MINUTES..=WAKING_END_MINUTES).contains(&start)
            {
                instance.fixed = true;
            }
        }

        let mut inputs = Vec::with_capacity(day_indices.len());
        let mut id_to_index: HashMap<String, usize> = HashMap::new();
        let mut first_input_for_series: HashMap<Uuid, usize> = HashMap::new();
        for (position, &index) in day_indices.iter().enumerate() {
            let instance = &instances[index];
            let id = format!("{}::{}", instance.series_id, position);
            id_to_index.insert(id.clone(), index);
            first_input_for_series
                .entry(instance.series_id)
                .or_insert(inputs.len());
            let fixed = instance.fixed;
            inputs.push(SeriesInput {
                id,
                fixed,
                ideal_minutes: minutes_from_midnight(date, instance.time),
                duration_minutes: instance.duration_minutes,
                window: (!instance.all_day && !fixed)
                    .then_some((WAKING_START_MINUTES, WAKING_END_MINUTES)),
            });
        }

        let mut chains = Vec::new();
        for (position, &index) in day_indices.iter().enumerate() {
            let child = &instances[index];
            let Some(link) = link_by_child.get(&child.series_id) else {
                continue;
            };
            let Some(&parent_input) = first_input_for_series.get(&link.parent_id) else {
                continue;
            };
            let parent_completed = completions
                .get_for_date(link.parent_id, date)
                .is_some_and(|c| c.end_time.is_some());
            if parent_completed {
                // The child is already positioned from the completion end
                // time; pin it instead of submitting the chain.
                inputs[position].fixed = true;
                inputs[position].window = None;
                continue;
            }
            chains.push(ChainInput {
                parent: inputs[parent_input].id.clone(),
                child: inputs[position].id.clone(),
                distance_minutes: link.distance_minutes,
                early_wobble_minutes: link.early_wobble_minutes,
                late_wobble_minutes: link.late_wobble_minutes,
            });
        }

        let print = fingerprint(&inputs, &chains);
        let solution = match caches.csp_get(&print) {
            Some(solution) => solution,
            None => {
                let solution = solve_day(&inputs, &chains);
                caches.csp_put(print, solution.clone());
                solution
            }
        };
        apply_solution(&solution, date, &id_to_index, instances);
        conflicts.extend(translate_conflicts(&solution, date));
    }
    conflicts
}

fn apply_solution(
    solution: &DaySolution,
    date: NaiveDate,
    id_to_index: &HashMap<String, usize>,
    instances: &mut [ScheduleInstance],
) {
    for assignment in &solution.assignments {
        if let Some(&index) = id_to_index.get(&assignment.id) {
            instances[index].time = midnight(date) + Duration::minutes(assignment.minutes);
        }
    }
}

fn translate_conflicts(solution: &DaySolution, date: NaiveDate) -> Vec<Conflict> {
    solution
        .conflicts
        .iter()
        .map(|conflict| Conflict {
            kind: ConflictKind::OverConstrained,
            date,
            series: conflict
                .ids
                .iter()
                .filter_map(|id| series_of_synthetic_id(id))
                .collect(),
            message: conflict.message.clone(),
        })
        .collect()
}

fn series_of_synthetic_id(id: &str) -> Option<Uuid> {
    id.split("::").next().and_then(|s| Uuid::parse_str(s).ok())
}

/// Stable textual identity of one day's solver inputs. Two days with the
/// same shape share an entry regardless of their calendar dates.
fn fingerprint(inputs: &[SeriesInput], chains: &[ChainInput]) -> String {
    let mut series: Vec<String> = inputs
        .iter()
        .map(|input| {
            let window = match input.window {
                Some((start, end)) => format!("{}-{}", start, end),
                None => "-".to_string(),
            };
            format!(
                "{}|f{}|i{}|d{}|w{}",
                input.id, input.fixed as u8, input.ideal_minutes, input.duration_minutes, window
            )
        })
        .collect();
    series.sort();
    let mut chain_parts: Vec<String> = chains
        .iter()
        .map(|chain| {
            format!(
                "{}>{}|d{}|e{}|l{}",
                chain.parent,
                chain.child,
                chain.distance_minutes,
                chain.early_wobble_minutes,
                chain.late_wobble_minutes
            )
        })
        .collect();
    chain_parts.sort();
    format!("S[{}]C[{}]", series.join(";"), chain_parts.join(";"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_order_insensitive() {
        let a = SeriesInput {
            id: "a::0".to_string(),
            fixed: false,
            ideal_minutes: 600,
            duration_minutes: 30,
            window: Some((420, 1380)),
        };
        let b = SeriesInput {
            id: "b::1".to_string(),
            fixed: true,
            ideal_minutes: 540,
            duration_minutes: 14,
            window: None,
        };
        let forward = fingerprint(&[a.clone(), b.clone()], &[]);
        let backward = fingerprint(&[b, a], &[]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_fingerprint_changes_with_inputs() {
        let base = SeriesInput {
            id: "a::0".to_string(),
            fixed: false,
            ideal_minutes: 600,
            duration_minutes: 30,
            window: Some((420, 1380)),
        };
        let mut moved = base.clone();
        moved.ideal_minutes = 605;
        assert_ne!(fingerprint(&[base], &[]), fingerprint(&[moved], &[]));
    }

    #[test]
    fn test_synthetic_id_parsing() {
        let id = Uuid::new_v4();
        assert_eq!(series_of_synthetic_id(&format!("{}::3", id)), Some(id));
        assert_eq!(series_of_synthetic_id("garbage"), None);
    }
}
