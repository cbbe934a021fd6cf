use chrono::{NaiveDate, NaiveTime};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::adapter::Adapter;
use crate::error::CoreError;
use crate::models::Completion;

#[derive(Default)]
struct CompletionState {
    by_id: HashMap<Uuid, Completion>,
    /// series → date → completion id. Enforces the one-per-(series, date)
    /// uniqueness and keeps per-series lookups ordered.
    by_series: HashMap<Uuid, BTreeMap<NaiveDate, Uuid>>,
}

/// Owns completion records.
pub struct CompletionTracker {
    adapter: Arc<dyn Adapter>,
    inner: Arc<RwLock<CompletionState>>,
}

/// Read-only capability view over completions. Returns copies.
#[derive(Clone)]
pub struct CompletionReader {
    inner: Arc<RwLock<CompletionState>>,
}

impl CompletionTracker {
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        Self {
            adapter,
            inner: Arc::new(RwLock::new(CompletionState::default())),
        }
    }

    pub fn reader(&self) -> CompletionReader {
        CompletionReader {
            inner: Arc::clone(&self.inner),
        }
    }

    pub async fn log(
        &self,
        series_id: Uuid,
        date: NaiveDate,
        start_time: Option<NaiveTime>,
        end_time: Option<NaiveTime>,
    ) -> Result<Completion, CoreError> {
        if self.reader().get_for_date(series_id, date).is_some() {
            return Err(CoreError::DuplicateCompletion { series_id, date });
        }
        let completion = Completion {
            id: Uuid::new_v4(),
            series_id,
            date,
            start_time,
            end_time,
        };
        self.adapter.create_completion(&completion).await?;
        let mut state = self.write();
        state.by_id.insert(completion.id, completion.clone());
        state
            .by_series
            .entry(series_id)
            .or_default()
            .insert(date, completion.id);
        Ok(completion)
    }

    pub async fn delete(&self, id: Uuid) -> Result<Completion, CoreError> {
        let completion = self
            .reader()
            .get(id)
            .ok_or_else(|| CoreError::NotFound(format!("Completion {} not found", id)))?;
        self.adapter.delete_completion(id).await?;
        let mut state = self.write();
        state.by_id.remove(&id);
        if let Some(dates) = state.by_series.get_mut(&completion.series_id) {
            dates.remove(&completion.date);
        }
        Ok(completion)
    }

    pub async fn hydrate(&self) -> Result<(), CoreError> {
        for completion in self.adapter.get_all_completions().await? {
            let mut state = self.write();
            if state.by_id.contains_key(&completion.id) {
                continue;
            }
            let dates = state.by_series.entry(completion.series_id).or_default();
            if dates.contains_key(&completion.date) {
                continue;
            }
            dates.insert(completion.date, completion.id);
            state.by_id.insert(completion.id, completion);
        }
        Ok(())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, CompletionState> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl CompletionReader {
    pub fn get(&self, id: Uuid) -> Option<Completion> {
        self.read().by_id.get(&id).cloned()
    }

    pub fn get_for_date(&self, series_id: Uuid, date: NaiveDate) -> Option<Completion> {
        let state = self.read();
        let id = state.by_series.get(&series_id)?.get(&date)?;
        state.by_id.get(id).cloned()
    }

    pub fn has(&self, series_id: Uuid, date: NaiveDate) -> bool {
        self.read()
            .by_series
            .get(&series_id)
            .is_some_and(|dates| dates.contains_key(&date))
    }

    /// All completions of a series, ordered by date.
    pub fn for_series(&self, series_id: Uuid) -> Vec<Completion> {
        let state = self.read();
        state
            .by_series
            .get(&series_id)
            .map(|dates| {
                dates
                    .values()
                    .filter_map(|id| state.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn count_for_series(&self, series_id: Uuid) -> usize {
        self.read()
            .by_series
            .get(&series_id)
            .map_or(0, |dates| dates.len())
    }

    pub fn has_any(&self, series_id: Uuid) -> bool {
        self.count_for_series(series_id) > 0
    }

    pub fn first_completion_date(&self, series_id: Uuid) -> Option<NaiveDate> {
        self.read()
            .by_series
            .get(&series_id)
            .and_then(|dates| dates.keys().next().copied())
    }

    pub fn last_completion_date(&self, series_id: Uuid) -> Option<NaiveDate> {
        self.read()
            .by_series
            .get(&series_id)
            .and_then(|dates| dates.keys().next_back().copied())
    }

    /// Completions of `series_id` within `[start, end]`, both ends inclusive.
    pub fn count_in_range(&self, series_id: Uuid, start: NaiveDate, end: NaiveDate) -> usize {
        self.read()
            .by_series
            .get(&series_id)
            .map_or(0, |dates| dates.range(start..=end).count())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, CompletionState> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::memory::MemoryAdapter;
    use crate::time::parse_date;

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn tracker() -> CompletionTracker {
        CompletionTracker::new(Arc::new(MemoryAdapter::new()))
    }

    #[tokio::test]
    async fn test_duplicate_completion_rejected() {
        let tracker = tracker();
        let series = Uuid::new_v4();
        tracker.log(series, date("2025-01-01"), None, None).await.unwrap();
        let result = tracker.log(series, date("2025-01-01"), None, None).await;
        assert!(matches!(result, Err(CoreError::DuplicateCompletion { .. })));
    }

    #[tokio::test]
    async fn test_range_count_is_inclusive() {
        let tracker = tracker();
        let series = Uuid::new_v4();
        for day in ["2025-01-01", "2025-01-03", "2025-01-05"] {
            tracker.log(series, date(day), None, None).await.unwrap();
        }
        let reader = tracker.reader();
        assert_eq!(reader.count_in_range(series, date("2025-01-01"), date("2025-01-05")), 3);
        assert_eq!(reader.count_in_range(series, date("2025-01-02"), date("2025-01-04")), 1);
        assert_eq!(reader.first_completion_date(series), Some(date("2025-01-01")));
        assert_eq!(reader.last_completion_date(series), Some(date("2025-01-05")));
    }

    #[tokio::test]
    async fn test_delete_clears_date_index() {
        let tracker = tracker();
        let series = Uuid::new_v4();
        let completion = tracker.log(series, date("2025-01-01"), None, None).await.unwrap();
        tracker.delete(completion.id).await.unwrap();
        assert!(!tracker.reader().has(series, date("2025-01-01")));
        // And logging the same date again works.
        assert!(tracker.log(series, date("2025-01-01"), None, None).await.is_ok());
    }
}
