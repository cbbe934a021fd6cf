//! The orchestrator: composes stores, managers, and the schedule engine
//! behind one public surface. Stateless over its own data; every mutation
//! writes through the adapter, invalidates the engine, and rebuilds the
//! default window so conflicts and events stay warm.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::adapter::Adapter;
use crate::chain::{ChainEnds, LinkManager};
use crate::condition::{ConditionEvaluator, ConditionNode};
use crate::engine::ScheduleEngine;
use crate::error::CoreError;
use crate::events::{Event, EventBus, EventHandler, EventKind};
use crate::models::{
    ActiveCondition, CacheStats, Completion, Conflict, Constraint, ConstraintKind, ExceptionType,
    InstanceException, InvalidationScope, Link, LinkOptions, NewSeriesData, Pattern,
    PendingReminder, Reminder, Schedule, ScheduleInstance, Series, UpdateSeriesData,
};
use crate::reminder::ReminderManager;
use crate::store::{
    CompletionTracker, ConstraintStore, ExceptionStore, SeriesStore,
};
use crate::time::validate_timezone;

/// Window rebuilt after every mutation to keep conflicts warm.
const DEFAULT_REFLOW_WINDOW_DAYS: i64 = 7;

pub struct Planner {
    tz: Tz,
    series: SeriesStore,
    completions: CompletionTracker,
    exceptions: ExceptionStore,
    links: Arc<LinkManager>,
    constraints: ConstraintStore,
    conditions: Arc<ConditionEvaluator>,
    reminders: ReminderManager,
    engine: Mutex<ScheduleEngine>,
    events: EventBus,
}

impl Planner {
    /// Construction order matters: stores first, then the managers reading
    /// them, then the engine over all their readers.
    pub fn new(adapter: Arc<dyn Adapter>, timezone: &str) -> Result<Self, CoreError> {
        let tz = validate_timezone(timezone)?;
        let exceptions = ExceptionStore::new(adapter.clone());
        let series = SeriesStore::new(adapter.clone());
        let completions = CompletionTracker::new(adapter.clone());
        let links = Arc::new(LinkManager::new(
            adapter.clone(),
            series.reader(),
            completions.reader(),
            exceptions.reader(),
            tz,
        ));
        let constraints = ConstraintStore::new(adapter.clone());
        let conditions = Arc::new(ConditionEvaluator::new(
            series.reader(),
            completions.reader(),
        ));
        let reminders = ReminderManager::new(
            adapter,
            series.reader(),
            completions.reader(),
            exceptions.reader(),
            tz,
        );
        let engine = Mutex::new(ScheduleEngine::new(
            series.reader(),
            completions.reader(),
            exceptions.reader(),
            constraints.reader(),
            Arc::clone(&links),
            Arc::clone(&conditions),
            tz,
        ));
        Ok(Self {
            tz,
            series,
            completions,
            exceptions,
            links,
            constraints,
            conditions,
            reminders,
            engine,
            events: EventBus::new(),
        })
    }

    /// Load stores from the adapter in an order that keeps cross-store
    /// lookups consistent, then rebuild the condition index.
    pub async fn hydrate(&self) -> Result<(), CoreError> {
        self.links.hydrate().await?;
        self.completions.hydrate().await?;
        self.exceptions.hydrate().await?;
        self.constraints.hydrate().await?;
        self.reminders.hydrate(self.today()).await?;
        self.series.hydrate().await?;
        self.conditions.rebuild_index();
        Ok(())
    }

    pub fn on(&self, kind: EventKind, handler: EventHandler) {
        self.events.on(kind, handler);
    }

    // ------------------------------------------------------------------
    // Series CRUD
    // ------------------------------------------------------------------

    pub async fn create_series(&self, data: NewSeriesData) -> Result<Series, CoreError> {
        let series = self.series.create(data).await?;
        self.conditions.rebuild_index();
        self.trigger_reflow(InvalidationScope::Series(series.id))?;
        Ok(series)
    }

    pub fn get_series(&self, id: Uuid) -> Option<Series> {
        self.series.reader().get(id)
    }

    /// Cache-aware fetch backing a lazy load on miss.
    pub async fn get_full_series(&self, id: Uuid) -> Result<Option<Series>, CoreError> {
        self.series.full_series(id).await
    }

    pub fn get_all_series(&self) -> Vec<Series> {
        self.series.reader().all()
    }

    pub fn get_series_by_tag(&self, tag: &str) -> Vec<Series> {
        let ids = self.series.reader().ids_with_tag(tag);
        let mut matched: Vec<Series> = ids
            .into_iter()
            .filter_map(|id| self.series.reader().get(id))
            .collect();
        matched.sort_by_key(|s| s.id);
        matched
    }

    pub async fn update_series(
        &self,
        id: Uuid,
        data: UpdateSeriesData,
    ) -> Result<Series, CoreError> {
        let series = self.series.update(id, data).await?;
        self.conditions.rebuild_index();
        self.trigger_reflow(InvalidationScope::Series(id))?;
        Ok(series)
    }

    pub async fn lock(&self, id: Uuid) -> Result<Series, CoreError> {
        let series = self.series.set_locked(id, true).await?;
        self.trigger_reflow(InvalidationScope::Series(id))?;
        Ok(series)
    }

    pub async fn unlock(&self, id: Uuid) -> Result<Series, CoreError> {
        let series = self.series.set_locked(id, false).await?;
        self.trigger_reflow(InvalidationScope::Series(id))?;
        Ok(series)
    }

    /// Deletion requires that nothing references the series: no completion
    /// and no link naming it as parent.
    pub async fn delete_series(&self, id: Uuid) -> Result<(), CoreError> {
        if !self.series.reader().contains(id) {
            return Err(CoreError::NotFound(format!("Series {} not found", id)));
        }
        if self.completions.reader().has_any(id) {
            return Err(CoreError::CompletionsExist(id));
        }
        if self.links.has_children(id) {
            return Err(CoreError::LinkedChildrenExist(id));
        }
        // The series' own incoming link goes with it.
        self.links.unlink(id).await?;
        self.series.delete(id).await?;
        self.conditions.rebuild_index();
        self.trigger_reflow(InvalidationScope::Global)?;
        Ok(())
    }

    /// Split a series at `split_date`: the original is truncated to end
    /// there and a clone (preserving cycling position, constraints, and any
    /// incoming link) continues from it.
    pub async fn split_series(
        &self,
        id: Uuid,
        split_date: NaiveDate,
    ) -> Result<Uuid, CoreError> {
        let original = self
            .series
            .reader()
            .get(id)
            .ok_or_else(|| CoreError::NotFound(format!("Series {} not found", id)))?;
        if original.locked {
            return Err(CoreError::Locked(id));
        }
        if original.start_date.is_some_and(|start| split_date <= start) {
            return Err(CoreError::Validation(format!(
                "Split date {} must fall after the series start",
                split_date
            )));
        }
        if original.end_date.is_some_and(|end| split_date >= end) {
            return Err(CoreError::Validation(format!(
                "Split date {} must fall before the series end",
                split_date
            )));
        }

        let now = Utc::now();
        let mut clone = original.clone();
        clone.id = Uuid::new_v4();
        clone.start_date = Some(split_date);
        clone.created_at = now;
        clone.updated_at = now;
        clone.patterns = original
            .patterns
            .iter()
            .map(|pattern| Pattern {
                id: Uuid::new_v4(),
                ..pattern.clone()
            })
            .collect();
        let clone_id = clone.id;
        self.series.insert_clone(clone).await?;

        let mut truncated = original;
        truncated.end_date = Some(split_date);
        truncated.updated_at = now;
        self.series.replace(truncated).await?;

        self.constraints.copy_for_split(id, clone_id).await?;
        self.links.copy_for_split(id, clone_id).await?;
        self.conditions.rebuild_index();
        self.trigger_reflow(InvalidationScope::Global)?;
        Ok(clone_id)
    }

    // ------------------------------------------------------------------
    // Links and constraints
    // ------------------------------------------------------------------

    pub async fn link_series(
        &self,
        parent_id: Uuid,
        child_id: Uuid,
        options: LinkOptions,
    ) -> Result<Link, CoreError> {
        let link = self.links.link(parent_id, child_id, options).await?;
        self.trigger_reflow(InvalidationScope::Link)?;
        Ok(link)
    }

    pub async fn unlink_series(&self, child_id: Uuid) -> Result<(), CoreError> {
        self.links.unlink(child_id).await?;
        self.trigger_reflow(InvalidationScope::Link)?;
        Ok(())
    }

    pub fn get_chain_depth(&self, id: Uuid) -> Result<usize, CoreError> {
        self.links.chain_depth(id)
    }

    pub async fn add_constraint(&self, kind: ConstraintKind) -> Result<Uuid, CoreError> {
        self.validate_constraint_refs(&kind)?;
        let constraint = self.constraints.add(kind).await?;
        self.trigger_reflow(InvalidationScope::Constraint)?;
        Ok(constraint.id)
    }

    pub async fn remove_constraint(&self, id: Uuid) -> Result<(), CoreError> {
        self.constraints.remove(id).await?;
        self.trigger_reflow(InvalidationScope::Constraint)?;
        Ok(())
    }

    pub fn get_constraints(&self) -> Vec<Constraint> {
        self.constraints.reader().all()
    }

    // ------------------------------------------------------------------
    // Instance operations
    // ------------------------------------------------------------------

    pub fn get_instance(
        &self,
        series_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<ScheduleInstance>, CoreError> {
        let schedule = self
            .engine()
            .get_schedule(date, date + Duration::days(1))?;
        Ok(schedule
            .instances
            .into_iter()
            .find(|i| i.series_id == series_id))
    }

    pub async fn cancel_instance(
        &self,
        series_id: Uuid,
        date: NaiveDate,
    ) -> Result<(), CoreError> {
        if let Some(existing) = self.exceptions.reader().get(series_id, date) {
            if existing.exception_type == ExceptionType::Cancelled {
                return Err(CoreError::AlreadyCancelled { series_id, date });
            }
        }
        if self.get_instance(series_id, date)?.is_none() {
            return Err(CoreError::NonExistentInstance { series_id, date });
        }
        self.exceptions
            .set(InstanceException {
                series_id,
                date,
                exception_type: ExceptionType::Cancelled,
                new_time: None,
                created_at: Utc::now(),
            })
            .await?;
        self.trigger_reflow(InvalidationScope::Exception)?;
        Ok(())
    }

    pub async fn reschedule_instance(
        &self,
        series_id: Uuid,
        date: NaiveDate,
        new_time: NaiveDateTime,
    ) -> Result<(), CoreError> {
        if let Some(existing) = self.exceptions.reader().get(series_id, date) {
            if existing.exception_type == ExceptionType::Cancelled {
                return Err(CoreError::CancelledInstance { series_id, date });
            }
        }
        if self.get_instance(series_id, date)?.is_none() {
            return Err(CoreError::NonExistentInstance { series_id, date });
        }
        // A chain child cannot be rescheduled outside its wobble bounds.
        if let Some(link) = self.links.link_for_child(series_id) {
            if let Some(parent) = self.series.reader().get(link.parent_id) {
                if let Some(parent_end) =
                    self.links.parent_end_time(&parent, date, &ChainEnds::new())
                {
                    let target = parent_end + Duration::minutes(link.distance_minutes);
                    let earliest = target - Duration::minutes(link.early_wobble_minutes);
                    let latest = target + Duration::minutes(link.late_wobble_minutes);
                    if new_time < earliest || new_time > latest {
                        return Err(CoreError::Validation(format!(
                            "Reschedule to {} falls outside the chain window [{}, {}]",
                            new_time, earliest, latest
                        )));
                    }
                }
            }
        }
        self.exceptions
            .set(InstanceException {
                series_id,
                date,
                exception_type: ExceptionType::Rescheduled,
                new_time: Some(new_time),
                created_at: Utc::now(),
            })
            .await?;
        self.trigger_reflow(InvalidationScope::Exception)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Completions
    // ------------------------------------------------------------------

    pub async fn log_completion(
        &self,
        series_id: Uuid,
        date: NaiveDate,
        start_time: Option<NaiveTime>,
        end_time: Option<NaiveTime>,
    ) -> Result<Completion, CoreError> {
        if !self.series.reader().contains(series_id) {
            return Err(CoreError::NotFound(format!("Series {} not found", series_id)));
        }
        let completion = self
            .completions
            .log(series_id, date, start_time, end_time)
            .await?;
        self.trigger_reflow(InvalidationScope::Completion)?;
        Ok(completion)
    }

    pub fn get_completions(&self, series_id: Uuid) -> Vec<Completion> {
        self.completions.reader().for_series(series_id)
    }

    pub async fn delete_completion(&self, id: Uuid) -> Result<(), CoreError> {
        self.completions.delete(id).await?;
        self.trigger_reflow(InvalidationScope::Completion)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Schedule and conflicts
    // ------------------------------------------------------------------

    pub fn get_schedule(&self, start: NaiveDate, end: NaiveDate) -> Result<Schedule, CoreError> {
        self.engine().get_schedule(start, end)
    }

    pub fn get_conflicts(&self) -> Vec<Conflict> {
        self.engine().conflicts()
    }

    pub fn get_cache_stats(&self) -> CacheStats {
        self.engine().cache_stats()
    }

    // ------------------------------------------------------------------
    // Reminders
    // ------------------------------------------------------------------

    pub async fn create_reminder(
        &self,
        series_id: Uuid,
        label: String,
        offset_minutes: i64,
    ) -> Result<Reminder, CoreError> {
        self.reminders.create(series_id, label, offset_minutes).await
    }

    pub fn get_pending_reminders(&self, as_of: NaiveDateTime) -> Vec<PendingReminder> {
        self.reminders.pending(as_of)
    }

    /// Compute pending reminders and emit a `reminderDue` event for each.
    pub fn check_reminders(&self, as_of: NaiveDateTime) -> Vec<PendingReminder> {
        let pending = self.reminders.pending(as_of);
        for reminder in &pending {
            self.events.emit(&Event::ReminderDue(reminder.clone()));
        }
        pending
    }

    pub async fn acknowledge_reminder(
        &self,
        id: Uuid,
        as_of: NaiveDateTime,
    ) -> Result<(), CoreError> {
        self.reminders.acknowledge(id, as_of).await
    }

    // ------------------------------------------------------------------
    // Conditions
    // ------------------------------------------------------------------

    /// Evaluate a free-standing condition tree at a date. Self-references
    /// have no owning series here and count as zero completions.
    pub fn evaluate_condition(&self, node: &ConditionNode, date: NaiveDate) -> bool {
        self.conditions.evaluate(node, Uuid::nil(), date)
    }

    pub fn get_active_conditions(&self, series_id: Uuid, date: NaiveDate) -> Vec<ActiveCondition> {
        let Some(series) = self.series.reader().get(series_id) else {
            return Vec::new();
        };
        series
            .patterns
            .iter()
            .filter_map(|pattern| {
                pattern.condition.as_ref().map(|node| ActiveCondition {
                    pattern_id: pattern.id,
                    node: node.clone(),
                    satisfied: self.conditions.evaluate(node, series_id, date),
                })
            })
            .collect()
    }

    pub fn get_condition_deps(&self) -> HashMap<Uuid, HashSet<Uuid>> {
        self.conditions.dependency_index()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.tz).date_naive()
    }

    /// Invalidate with `scope`, rebuild the default window to warm cached
    /// conflicts, and emit `reflow` plus per-conflict events.
    fn trigger_reflow(&self, scope: InvalidationScope) -> Result<(), CoreError> {
        let schedule = {
            let mut engine = self.engine();
            engine.invalidate(scope);
            let today = self.today();
            engine.get_schedule(today, today + Duration::days(DEFAULT_REFLOW_WINDOW_DAYS))?
        };
        let conflicts = schedule.conflicts.clone();
        self.events.emit(&Event::Reflow(schedule));
        for conflict in conflicts {
            self.events.emit(&Event::Conflict(conflict));
        }
        Ok(())
    }

    fn validate_constraint_refs(&self, kind: &ConstraintKind) -> Result<(), CoreError> {
        let check = |id: Uuid| {
            if self.series.reader().contains(id) {
                Ok(())
            } else {
                Err(CoreError::NotFound(format!("Series {} not found", id)))
            }
        };
        match kind {
            ConstraintKind::MustBeBefore {
                first_series,
                second_series,
            } => {
                check(*first_series)?;
                check(*second_series)?;
            }
            ConstraintKind::CantBeNextTo { target } => {
                if let crate::models::ConstraintTarget::Series(id) = target {
                    check(*id)?;
                }
            }
            ConstraintKind::MustBeOnSameDay {
                first_series,
                second_target,
            } => {
                check(*first_series)?;
                if let crate::models::ConstraintTarget::Series(id) = second_target {
                    check(*id)?;
                }
            }
        }
        Ok(())
    }

    fn engine(&self) -> std::sync::MutexGuard<'_, ScheduleEngine> {
        self.engine.lock().unwrap_or_else(|e| e.into_inner())
    }
}
