//! The engine's three caches and the invalidation rules tying them to
//! mutation scopes.

use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::models::{CacheStats, InvalidationScope, Schedule};
use crate::solver::DaySolution;

/// Identity of one pattern expansion. The anchor participates so that a
/// series gaining its first completion changes the key rather than serving
/// stale dates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatternKey {
    pub series_id: Uuid,
    pub pattern_idx: usize,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub anchor: Option<NaiveDate>,
}

#[derive(Default)]
pub struct EngineCaches {
    pattern: HashMap<PatternKey, BTreeSet<NaiveDate>>,
    pattern_hits: u64,
    pattern_misses: u64,
    schedule: HashMap<(NaiveDate, NaiveDate), (u64, Schedule)>,
    /// Content-addressed by the solver-input fingerprint; never invalidated.
    csp: HashMap<String, DaySolution>,
    csp_hits: u64,
    csp_misses: u64,
    generation: u64,
}

impl EngineCaches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump the generation, drop cached schedules, and evict pattern dates
    /// according to scope. Link, constraint, exception, and completion
    /// mutations leave the pattern cache alone: pattern dates are independent
    /// of those inputs.
    pub fn invalidate(&mut self, scope: InvalidationScope) {
        self.generation += 1;
        self.schedule.clear();
        match scope {
            InvalidationScope::Series(id) => {
                self.pattern.retain(|key, _| key.series_id != id);
            }
            InvalidationScope::Global => {
                self.pattern.clear();
            }
            InvalidationScope::Link
            | InvalidationScope::Constraint
            | InvalidationScope::Exception
            | InvalidationScope::Completion => {}
        }
        tracing::debug!(?scope, generation = self.generation, "caches invalidated");
    }

    pub fn pattern_dates(
        &mut self,
        key: PatternKey,
        compute: impl FnOnce() -> BTreeSet<NaiveDate>,
    ) -> BTreeSet<NaiveDate> {
        if let Some(dates) = self.pattern.get(&key) {
            self.pattern_hits += 1;
            return dates.clone();
        }
        self.pattern_misses += 1;
        let dates = compute();
        self.pattern.insert(key, dates.clone());
        dates
    }

    pub fn schedule_get(&self, start: NaiveDate, end: NaiveDate) -> Option<Schedule> {
        let (generation, schedule) = self.schedule.get(&(start, end))?;
        if *generation == self.generation {
            // Deep copy at the cache boundary: callers never alias the cache.
            Some(schedule.clone())
        } else {
            None
        }
    }

    pub fn schedule_put(&mut self, start: NaiveDate, end: NaiveDate, schedule: Schedule) {
        self.schedule.insert((start, end), (self.generation, schedule));
    }

    pub fn csp_get(&mut self, fingerprint: &str) -> Option<DaySolution> {
        if let Some(solution) = self.csp.get(fingerprint) {
            self.csp_hits += 1;
            return Some(solution.clone());
        }
        self.csp_misses += 1;
        None
    }

    pub fn csp_put(&mut self, fingerprint: String, solution: DaySolution) {
        self.csp.insert(fingerprint, solution);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            pattern_hits: self.pattern_hits,
            pattern_misses: self.pattern_misses,
            csp_hits: self.csp_hits,
            csp_misses: self.csp_misses,
            generation: self.generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::parse_date;

    fn key(series_id: Uuid, idx: usize) -> PatternKey {
        PatternKey {
            series_id,
            pattern_idx: idx,
            start: parse_date("2025-01-01").unwrap(),
            end: parse_date("2025-02-01").unwrap(),
            anchor: None,
        }
    }

    #[test]
    fn test_pattern_cache_counts_hits() {
        let mut caches = EngineCaches::new();
        let id = Uuid::new_v4();
        let dates: BTreeSet<NaiveDate> = [parse_date("2025-01-05").unwrap()].into_iter().collect();
        let computed = caches.pattern_dates(key(id, 0), || dates.clone());
        assert_eq!(computed, dates);
        let again = caches.pattern_dates(key(id, 0), || panic!("must hit the cache"));
        assert_eq!(again, dates);
        assert_eq!(caches.stats().pattern_hits, 1);
        assert_eq!(caches.stats().pattern_misses, 1);
    }

    #[test]
    fn test_series_scope_evicts_selectively() {
        let mut caches = EngineCaches::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        caches.pattern_dates(key(a, 0), BTreeSet::new);
        caches.pattern_dates(key(b, 0), BTreeSet::new);
        caches.invalidate(InvalidationScope::Series(a));
        caches.pattern_dates(key(b, 0), || panic!("series b must stay cached"));
        caches.pattern_dates(key(a, 0), BTreeSet::new); // recomputed
        assert_eq!(caches.stats().pattern_misses, 3);
        assert_eq!(caches.stats().pattern_hits, 1);
    }

    #[test]
    fn test_completion_scope_keeps_pattern_cache() {
        let mut caches = EngineCaches::new();
        let a = Uuid::new_v4();
        caches.pattern_dates(key(a, 0), BTreeSet::new);
        caches.invalidate(InvalidationScope::Completion);
        caches.pattern_dates(key(a, 0), || panic!("completion scope must not evict"));
        assert_eq!(caches.stats().pattern_hits, 1);
    }

    #[test]
    fn test_schedule_cache_respects_generation() {
        let mut caches = EngineCaches::new();
        let start = parse_date("2025-01-01").unwrap();
        let end = parse_date("2025-01-08").unwrap();
        caches.schedule_put(start, end, Schedule::empty(start, end));
        assert!(caches.schedule_get(start, end).is_some());
        caches.invalidate(InvalidationScope::Link);
        assert!(caches.schedule_get(start, end).is_none());
    }
}
