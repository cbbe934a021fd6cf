use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::adapter::{Adapter, ConditionRecord, PatternRecord, SeriesRecord};
use crate::condition::ConditionNode;
use crate::error::CoreError;
use crate::models::{NewSeriesData, Pattern, PatternRule, Series, UpdateSeriesData};

#[derive(Default)]
struct SeriesState {
    series: HashMap<Uuid, Series>,
    tag_index: HashMap<String, HashSet<Uuid>>,
}

impl SeriesState {
    fn index_tags(&mut self, series: &Series) {
        for tag in &series.tags {
            self.tag_index.entry(tag.clone()).or_default().insert(series.id);
        }
    }

    fn unindex_tags(&mut self, series: &Series) {
        for tag in &series.tags {
            if let Some(ids) = self.tag_index.get_mut(tag) {
                ids.remove(&series.id);
                if ids.is_empty() {
                    self.tag_index.remove(tag);
                }
            }
        }
    }
}

/// Owns the series collection and the tag → ids index.
pub struct SeriesStore {
    adapter: Arc<dyn Adapter>,
    inner: Arc<RwLock<SeriesState>>,
}

/// Read-only capability view over the series store. Returns copies.
#[derive(Clone)]
pub struct SeriesReader {
    inner: Arc<RwLock<SeriesState>>,
}

impl SeriesStore {
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        Self {
            adapter,
            inner: Arc::new(RwLock::new(SeriesState::default())),
        }
    }

    pub fn reader(&self) -> SeriesReader {
        SeriesReader {
            inner: Arc::clone(&self.inner),
        }
    }

    pub async fn create(&self, data: NewSeriesData) -> Result<Series, CoreError> {
        let now = Utc::now();
        let series = Series {
            id: Uuid::new_v4(),
            title: data.title,
            start_date: data.start_date,
            end_date: data.end_date,
            locked: false,
            tags: data.tags,
            patterns: data.patterns,
            cycling: data.cycling,
            adaptive_duration: data.adaptive_duration,
            created_at: now,
            updated_at: now,
        };
        validate_series(&series)?;

        self.adapter.create_series(&to_record(&series)).await?;
        for pattern in pattern_records(&series) {
            self.adapter.create_pattern(&pattern).await?;
        }
        for condition in condition_records(&series) {
            self.adapter.create_condition(&condition).await?;
        }

        let mut state = self.write();
        state.series.insert(series.id, series.clone());
        state.index_tags(&series);
        Ok(series)
    }

    pub async fn update(&self, id: Uuid, data: UpdateSeriesData) -> Result<Series, CoreError> {
        let current = self
            .reader()
            .get(id)
            .ok_or_else(|| CoreError::NotFound(format!("Series {} not found", id)))?;
        if current.locked {
            return Err(CoreError::Locked(id));
        }

        let mut updated = current.clone();
        if let Some(title) = data.title {
            updated.title = title;
        }
        if let Some(start_date) = data.start_date {
            updated.start_date = start_date;
        }
        if let Some(end_date) = data.end_date {
            updated.end_date = end_date;
        }
        let replace_patterns = data.patterns.is_some();
        if let Some(patterns) = data.patterns {
            updated.patterns = patterns;
        }
        if let Some(add) = &data.add_tags {
            for tag in add {
                if !updated.tags.iter().any(|t| t == tag) {
                    updated.tags.push(tag.clone());
                }
            }
        }
        if let Some(remove) = &data.remove_tags {
            updated.tags.retain(|t| !remove.iter().any(|r| r == t));
        }
        if let Some(cycling) = data.cycling {
            updated.cycling = cycling;
        }
        if let Some(adaptive) = data.adaptive_duration {
            updated.adaptive_duration = adaptive;
        }
        updated.updated_at = Utc::now();
        validate_series(&updated)?;

        self.adapter.update_series(id, &to_record(&updated)).await?;
        if replace_patterns {
            // Replacing the pattern list replaces the condition subtrees
            // transactionally: old conditions go before anything new lands.
            for condition in self.adapter.get_conditions_by_series(id).await? {
                self.adapter.delete_condition(condition.id).await?;
            }
            for pattern in self.adapter.get_patterns_by_series(id).await? {
                self.adapter.delete_pattern(pattern.id).await?;
            }
            for pattern in pattern_records(&updated) {
                self.adapter.create_pattern(&pattern).await?;
            }
            for condition in condition_records(&updated) {
                self.adapter.create_condition(&condition).await?;
            }
        }
        if let Some(add) = &data.add_tags {
            for tag in add {
                self.adapter.add_tag_to_series(id, tag).await?;
            }
        }
        if let Some(remove) = &data.remove_tags {
            for tag in remove {
                self.adapter.remove_tag_from_series(id, tag).await?;
            }
        }

        self.commit(updated.clone(), Some(&current));
        Ok(updated)
    }

    /// Lock or unlock a series. Unlike `update`, this works on locked series:
    /// unlocking must always be possible.
    pub async fn set_locked(&self, id: Uuid, locked: bool) -> Result<Series, CoreError> {
        let mut series = self
            .reader()
            .get(id)
            .ok_or_else(|| CoreError::NotFound(format!("Series {} not found", id)))?;
        let previous = series.clone();
        series.locked = locked;
        series.updated_at = Utc::now();
        self.adapter.update_series(id, &to_record(&series)).await?;
        self.commit(series.clone(), Some(&previous));
        Ok(series)
    }

    /// Insert a fully-formed series, used by split. Caller validates.
    pub async fn insert_clone(&self, series: Series) -> Result<Series, CoreError> {
        validate_series(&series)?;
        self.adapter.create_series(&to_record(&series)).await?;
        for pattern in pattern_records(&series) {
            self.adapter.create_pattern(&pattern).await?;
        }
        for condition in condition_records(&series) {
            self.adapter.create_condition(&condition).await?;
        }
        let mut state = self.write();
        state.series.insert(series.id, series.clone());
        state.index_tags(&series);
        Ok(series)
    }

    /// Overwrite series fields directly, used by split to truncate the
    /// original. Bypasses the lock check.
    pub async fn replace(&self, series: Series) -> Result<Series, CoreError> {
        let previous = self
            .reader()
            .get(series.id)
            .ok_or_else(|| CoreError::NotFound(format!("Series {} not found", series.id)))?;
        validate_series(&series)?;
        self.adapter.update_series(series.id, &to_record(&series)).await?;
        self.commit(series.clone(), Some(&previous));
        Ok(series)
    }

    /// Delete a series. Referential preconditions (completions, links) are
    /// the orchestrator's responsibility.
    pub async fn delete(&self, id: Uuid) -> Result<(), CoreError> {
        let current = self
            .reader()
            .get(id)
            .ok_or_else(|| CoreError::NotFound(format!("Series {} not found", id)))?;
        self.adapter.delete_series(id).await?;
        let mut state = self.write();
        state.unindex_tags(&current);
        state.series.remove(&id);
        Ok(())
    }

    /// Cache-aware fetch: a miss falls back to the adapter and fills the
    /// in-memory map.
    pub async fn full_series(&self, id: Uuid) -> Result<Option<Series>, CoreError> {
        if let Some(series) = self.reader().get(id) {
            return Ok(Some(series));
        }
        let Some(record) = self.adapter.get_series_by_id(id).await? else {
            return Ok(None);
        };
        let patterns = self.adapter.get_patterns_by_series(id).await?;
        let conditions = self.adapter.get_conditions_by_series(id).await?;
        let series = compose(record, patterns, conditions);
        let mut state = self.write();
        let entry = state.series.entry(id).or_insert_with(|| series.clone());
        let result = entry.clone();
        state.index_tags(&result);
        Ok(Some(result))
    }

    /// Additive hydration: entities already in memory win over the adapter.
    pub async fn hydrate(&self) -> Result<(), CoreError> {
        let records = self.adapter.get_all_series().await?;
        for record in records {
            if self.reader().get(record.id).is_some() {
                continue;
            }
            let patterns = self.adapter.get_patterns_by_series(record.id).await?;
            let conditions = self.adapter.get_conditions_by_series(record.id).await?;
            let series = compose(record, patterns, conditions);
            let mut state = self.write();
            if !state.series.contains_key(&series.id) {
                state.index_tags(&series);
                state.series.insert(series.id, series);
            }
        }
        Ok(())
    }

    fn commit(&self, series: Series, previous: Option<&Series>) {
        let mut state = self.write();
        if let Some(previous) = previous {
            state.unindex_tags(previous);
        }
        state.index_tags(&series);
        state.series.insert(series.id, series);
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SeriesState> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl SeriesReader {
    pub fn get(&self, id: Uuid) -> Option<Series> {
        self.read().series.get(&id).cloned()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.read().series.contains_key(&id)
    }

    /// All series, sorted by id for deterministic iteration.
    pub fn all(&self) -> Vec<Series> {
        let mut series: Vec<Series> = self.read().series.values().cloned().collect();
        series.sort_by_key(|s| s.id);
        series
    }

    pub fn ids_with_tag(&self, tag: &str) -> HashSet<Uuid> {
        self.read().tag_index.get(tag).cloned().unwrap_or_default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SeriesState> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }
}

fn to_record(series: &Series) -> SeriesRecord {
    SeriesRecord {
        id: series.id,
        title: series.title.clone(),
        start_date: series.start_date,
        end_date: series.end_date,
        locked: series.locked,
        tags: series.tags.clone(),
        cycling: series.cycling.clone(),
        adaptive_duration: series.adaptive_duration.clone(),
        created_at: series.created_at,
        updated_at: series.updated_at,
    }
}

fn pattern_records(series: &Series) -> Vec<PatternRecord> {
    series
        .patterns
        .iter()
        .enumerate()
        .map(|(idx, pattern)| PatternRecord {
            id: pattern.id,
            series_id: series.id,
            idx,
            rule: pattern.rule.clone(),
            time: pattern.time,
            duration_minutes: pattern.duration_minutes,
            all_day: pattern.all_day,
            fixed: pattern.fixed,
            anchor: pattern.anchor,
        })
        .collect()
}

fn condition_records(series: &Series) -> Vec<ConditionRecord> {
    series
        .patterns
        .iter()
        .filter_map(|pattern| {
            pattern.condition.as_ref().map(|node| ConditionRecord {
                id: Uuid::new_v4(),
                series_id: series.id,
                pattern_id: pattern.id,
                node: node.clone(),
            })
        })
        .collect()
}

fn compose(
    record: SeriesRecord,
    mut patterns: Vec<PatternRecord>,
    conditions: Vec<ConditionRecord>,
) -> Series {
    patterns.sort_by_key(|p| p.idx);
    let conditions_by_pattern: HashMap<Uuid, ConditionNode> = conditions
        .into_iter()
        .map(|c| (c.pattern_id, c.node))
        .collect();
    let patterns = patterns
        .into_iter()
        .map(|p| Pattern {
            id: p.id,
            rule: p.rule,
            time: p.time,
            duration_minutes: p.duration_minutes,
            all_day: p.all_day,
            fixed: p.fixed,
            condition: conditions_by_pattern.get(&p.id).cloned(),
            anchor: p.anchor,
        })
        .collect();
    Series {
        id: record.id,
        title: record.title,
        start_date: record.start_date,
        end_date: record.end_date,
        locked: record.locked,
        tags: record.tags,
        patterns,
        cycling: record.cycling,
        adaptive_duration: record.adaptive_duration,
        created_at: record.created_at,
        updated_at: record.updated_at,
    }
}

fn validate_series(series: &Series) -> Result<(), CoreError> {
    if series.title.trim().is_empty() {
        return Err(CoreError::Validation("Series title must not be empty".to_string()));
    }
    if let (Some(start), Some(end)) = (series.start_date, series.end_date) {
        if end <= start {
            return Err(CoreError::Validation(format!(
                "Series end date {} must be after start date {}",
                end, start
            )));
        }
    }
    for pattern in &series.patterns {
        validate_pattern(pattern)?;
    }
    Ok(())
}

fn validate_pattern(pattern: &Pattern) -> Result<(), CoreError> {
    match &pattern.rule {
        PatternRule::Daily => {}
        PatternRule::EveryNDays { n } => {
            if *n < 1 {
                return Err(CoreError::Validation("everyNDays interval must be at least 1".to_string()));
            }
        }
        PatternRule::Weekly { days_of_week } => {
            if days_of_week.is_empty() {
                return Err(CoreError::Validation("Weekly pattern needs at least one weekday".to_string()));
            }
            if days_of_week.iter().any(|d| *d > 6) {
                return Err(CoreError::Validation("Weekday numbers run 0 through 6".to_string()));
            }
        }
        PatternRule::Monthly { day } => {
            if !(1..=31).contains(day) {
                return Err(CoreError::Validation("Monthly day must be 1 through 31".to_string()));
            }
        }
        PatternRule::Yearly { month, day } => {
            if !(1..=12).contains(month) || !(1..=31).contains(day) {
                return Err(CoreError::Validation("Yearly pattern needs month 1-12 and day 1-31".to_string()));
            }
        }
    }
    if pattern.duration_minutes.is_some_and(|d| d < 0) {
        return Err(CoreError::Validation("Pattern duration must not be negative".to_string()));
    }
    if let Some(condition) = &pattern.condition {
        validate_condition(condition)?;
    }
    Ok(())
}

fn validate_condition(node: &ConditionNode) -> Result<(), CoreError> {
    match node {
        ConditionNode::CompletionCount { window_days, .. } => {
            if *window_days < 1 {
                return Err(CoreError::Validation("completionCount window must be at least one day".to_string()));
            }
        }
        ConditionNode::Weekday { days } => {
            if days.iter().any(|d| *d > 6) {
                return Err(CoreError::Validation("Weekday numbers run 0 through 6".to_string()));
            }
        }
        ConditionNode::And { children } | ConditionNode::Or { children } => {
            for child in children {
                validate_condition(child)?;
            }
        }
        ConditionNode::Not { child } => validate_condition(child)?,
        ConditionNode::Unknown => {}
    }
    Ok(())
}
