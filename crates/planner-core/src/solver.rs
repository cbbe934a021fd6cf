//! Deterministic best-effort day solver.
//!
//! Fixed items are pinned at their ideal minute. Flexible items are placed at
//! or near their ideal minute inside their window and chain bounds, scanning
//! in five-minute steps. No item is ever dropped: when nothing fits, the item
//! lands at its clamped ideal and a conflict describes the violation.
//! Identical inputs always yield identical outputs.

use std::collections::{BTreeMap, HashMap};

/// One schedulable item. `id` is a synthetic per-position identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesInput {
    pub id: String,
    pub fixed: bool,
    /// Minute offset from the day's midnight. May run past 1440 for chain
    /// targets that spill into the next day.
    pub ideal_minutes: i64,
    pub duration_minutes: i64,
    /// Permitted start window, inclusive of the start minute; the item must
    /// also end by the window end.
    pub window: Option<(i64, i64)>,
}

/// A chain bound between two items present on the same day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainInput {
    pub parent: String,
    pub child: String,
    pub distance_minutes: i64,
    pub early_wobble_minutes: i64,
    pub late_wobble_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub id: String,
    pub minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverConflict {
    pub ids: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaySolution {
    pub assignments: Vec<Assignment>,
    pub conflicts: Vec<SolverConflict>,
}

const SCAN_STEP: i64 = 5;

pub fn solve_day(inputs: &[SeriesInput], chains: &[ChainInput]) -> DaySolution {
    let mut assigned: BTreeMap<String, i64> = BTreeMap::new();
    let mut occupied: Vec<(i64, i64)> = Vec::new();
    let mut conflicts: Vec<SolverConflict> = Vec::new();

    let durations: HashMap<&str, i64> = inputs
        .iter()
        .map(|i| (i.id.as_str(), i.duration_minutes))
        .collect();
    let chain_by_child: HashMap<&str, &ChainInput> =
        chains.iter().map(|c| (c.child.as_str(), c)).collect();

    for input in inputs.iter().filter(|i| i.fixed) {
        assigned.insert(input.id.clone(), input.ideal_minutes);
        push_interval(&mut occupied, input.ideal_minutes, input.duration_minutes);
    }

    // Flexible items go ideal-first; chain children wait for their parents.
    let mut pending: Vec<&SeriesInput> = inputs.iter().filter(|i| !i.fixed).collect();
    pending.sort_by(|a, b| (a.ideal_minutes, &a.id).cmp(&(b.ideal_minutes, &b.id)));
    while !pending.is_empty() {
        let ready_at = pending.iter().position(|input| {
            match chain_by_child.get(input.id.as_str()) {
                Some(chain) => {
                    assigned.contains_key(&chain.parent)
                        || !inputs.iter().any(|i| i.id == chain.parent)
                }
                None => true,
            }
        });
        // A child whose parent never resolves (absent or mutually blocked)
        // still gets placed, just without its chain bound.
        let position = ready_at.unwrap_or(0);
        let input = pending.remove(position);
        let minutes = place(
            input,
            ready_at.is_some(),
            &assigned,
            &durations,
            &chain_by_child,
            &mut occupied,
            &mut conflicts,
        );
        assigned.insert(input.id.clone(), minutes);
    }

    DaySolution {
        assignments: assigned
            .into_iter()
            .map(|(id, minutes)| Assignment { id, minutes })
            .collect(),
        conflicts,
    }
}

fn place(
    input: &SeriesInput,
    chain_applies: bool,
    assigned: &BTreeMap<String, i64>,
    durations: &HashMap<&str, i64>,
    chain_by_child: &HashMap<&str, &ChainInput>,
    occupied: &mut Vec<(i64, i64)>,
    conflicts: &mut Vec<SolverConflict>,
) -> i64 {
    let duration = input.duration_minutes.max(0);
    let (window_start, window_end) = input.window.unwrap_or((0, 24 * 60));
    let mut lo = window_start;
    let mut hi = window_end - duration;

    if chain_applies {
        if let Some(chain) = chain_by_child.get(input.id.as_str()) {
            if let Some(parent_start) = assigned.get(&chain.parent) {
                let parent_end = parent_start + durations.get(chain.parent.as_str()).copied().unwrap_or(0);
                let target = parent_end + chain.distance_minutes;
                lo = lo.max(target - chain.early_wobble_minutes);
                hi = hi.min(target + chain.late_wobble_minutes);
            }
        }
    }

    if lo > hi {
        let fallback_hi = (window_end - duration).max(window_start);
        let fallback = input.ideal_minutes.clamp(window_start, fallback_hi);
        conflicts.push(SolverConflict {
            ids: vec![input.id.clone()],
            message: format!(
                "No feasible slot for {}: window and chain bounds do not intersect",
                input.id
            ),
        });
        push_interval(occupied, fallback, duration);
        return fallback;
    }

    let start = input.ideal_minutes.clamp(lo, hi);
    if let Some(minutes) = scan(start, lo, hi, duration, occupied) {
        push_interval(occupied, minutes, duration);
        return minutes;
    }

    conflicts.push(SolverConflict {
        ids: vec![input.id.clone()],
        message: format!("Could not place {} without overlap", input.id),
    });
    push_interval(occupied, start, duration);
    start
}

/// First free start minute at or after `start`, then at or before it,
/// scanning in fixed steps. Bounded by the window, so always terminates.
fn scan(start: i64, lo: i64, hi: i64, duration: i64, occupied: &[(i64, i64)]) -> Option<i64> {
    let mut minute = start;
    while minute <= hi {
        if is_free(minute, duration, occupied) {
            return Some(minute);
        }
        minute += SCAN_STEP;
    }
    minute = start - SCAN_STEP;
    while minute >= lo {
        if is_free(minute, duration, occupied) {
            return Some(minute);
        }
        minute -= SCAN_STEP;
    }
    None
}

fn is_free(start: i64, duration: i64, occupied: &[(i64, i64)]) -> bool {
    if duration <= 0 {
        return true;
    }
    let end = start + duration;
    occupied
        .iter()
        .all(|&(busy_start, busy_end)| end <= busy_start || start >= busy_end)
}

fn push_interval(occupied: &mut Vec<(i64, i64)>, start: i64, duration: i64) {
    if duration > 0 {
        occupied.push((start, start + duration));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flexible(id: &str, ideal: i64, duration: i64) -> SeriesInput {
        SeriesInput {
            id: id.to_string(),
            fixed: false,
            ideal_minutes: ideal,
            duration_minutes: duration,
            window: Some((7 * 60, 23 * 60)),
        }
    }

    fn fixed(id: &str, ideal: i64, duration: i64) -> SeriesInput {
        SeriesInput {
            id: id.to_string(),
            fixed: true,
            ideal_minutes: ideal,
            duration_minutes: duration,
            window: None,
        }
    }

    fn minutes_of(solution: &DaySolution, id: &str) -> i64 {
        solution
            .assignments
            .iter()
            .find(|a| a.id == id)
            .map(|a| a.minutes)
            .unwrap()
    }

    #[test]
    fn test_fixed_items_never_move() {
        let inputs = vec![fixed("a::0", 9 * 60, 30), flexible("b::0", 9 * 60, 30)];
        let solution = solve_day(&inputs, &[]);
        assert_eq!(minutes_of(&solution, "a::0"), 9 * 60);
        // The flexible item is pushed off the fixed block.
        let b = minutes_of(&solution, "b::0");
        assert!(b >= 9 * 60 + 30 || b + 30 <= 9 * 60);
        assert!(solution.conflicts.is_empty());
    }

    #[test]
    fn test_flexible_items_do_not_overlap() {
        let inputs = vec![
            flexible("a::0", 10 * 60, 60),
            flexible("b::0", 10 * 60, 60),
            flexible("c::0", 10 * 60, 60),
        ];
        let solution = solve_day(&inputs, &[]);
        let mut placed: Vec<(i64, i64)> = solution
            .assignments
            .iter()
            .map(|a| (a.minutes, a.minutes + 60))
            .collect();
        placed.sort();
        for pair in placed.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "items overlap: {:?}", placed);
        }
        assert!(solution.conflicts.is_empty());
    }

    #[test]
    fn test_chain_child_follows_parent() {
        let inputs = vec![fixed("p::0", 9 * 60, 14), flexible("c::0", 9 * 60, 5)];
        let chains = vec![ChainInput {
            parent: "p::0".to_string(),
            child: "c::0".to_string(),
            distance_minutes: 80,
            early_wobble_minutes: 0,
            late_wobble_minutes: 10,
        }];
        let solution = solve_day(&inputs, &chains);
        // Parent ends 09:14; child belongs in [10:34, 10:44].
        let child = minutes_of(&solution, "c::0");
        assert!(child >= 9 * 60 + 14 + 80);
        assert!(child <= 9 * 60 + 14 + 80 + 10);
    }

    #[test]
    fn test_unsatisfiable_day_reports_conflict_but_places_everything() {
        // Ten two-hour items cannot fit the 16-hour waking window.
        let inputs: Vec<SeriesInput> = (0..10)
            .map(|i| flexible(&format!("s{}::0", i), 8 * 60, 120))
            .collect();
        let solution = solve_day(&inputs, &[]);
        assert_eq!(solution.assignments.len(), 10);
        assert!(!solution.conflicts.is_empty());
    }

    #[test]
    fn test_determinism() {
        let inputs = vec![
            flexible("a::0", 10 * 60, 45),
            flexible("b::0", 10 * 60, 45),
            fixed("c::0", 11 * 60, 30),
        ];
        let first = solve_day(&inputs, &[]);
        let second = solve_day(&inputs, &[]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_chain_bounds_fall_back_to_clamped_ideal() {
        // Chain target far outside the waking window: bounds do not intersect.
        let inputs = vec![fixed("p::0", 22 * 60, 90), flexible("c::0", 9 * 60, 30)];
        let chains = vec![ChainInput {
            parent: "p::0".to_string(),
            child: "c::0".to_string(),
            distance_minutes: 120,
            early_wobble_minutes: 0,
            late_wobble_minutes: 0,
        }];
        let solution = solve_day(&inputs, &chains);
        assert_eq!(solution.assignments.len(), 2);
        assert!(!solution.conflicts.is_empty());
    }
}
