//! Reminders: per-instance firing times over a today-plus-tomorrow window,
//! with per-date acknowledgement.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::adapter::Adapter;
use crate::error::CoreError;
use crate::expansion::expand;
use crate::models::{ExceptionType, PendingReminder, Reminder, Series};
use crate::store::completions::CompletionReader;
use crate::store::exceptions::ExceptionReader;
use crate::store::series::SeriesReader;
use crate::time::{default_pattern_time, midnight, resolve_local_time};

/// Days of acknowledgement history pulled in around today at hydrate time.
const ACK_HYDRATE_MARGIN_DAYS: i64 = 7;

#[derive(Default)]
struct ReminderState {
    reminders: HashMap<Uuid, Reminder>,
    acks: HashSet<(NaiveDate, Uuid)>,
}

pub struct ReminderManager {
    adapter: Arc<dyn Adapter>,
    inner: Arc<RwLock<ReminderState>>,
    series: SeriesReader,
    completions: CompletionReader,
    exceptions: ExceptionReader,
    tz: Tz,
}

impl ReminderManager {
    pub fn new(
        adapter: Arc<dyn Adapter>,
        series: SeriesReader,
        completions: CompletionReader,
        exceptions: ExceptionReader,
        tz: Tz,
    ) -> Self {
        Self {
            adapter,
            inner: Arc::new(RwLock::new(ReminderState::default())),
            series,
            completions,
            exceptions,
            tz,
        }
    }

    pub async fn create(
        &self,
        series_id: Uuid,
        label: String,
        offset_minutes: i64,
    ) -> Result<Reminder, CoreError> {
        if !self.series.contains(series_id) {
            return Err(CoreError::NotFound(format!("Series {} not found", series_id)));
        }
        if offset_minutes < 0 {
            return Err(CoreError::Validation(
                "Reminder offset must not be negative".to_string(),
            ));
        }
        let reminder = Reminder {
            id: Uuid::new_v4(),
            series_id,
            label,
            offset_minutes,
        };
        self.adapter.create_reminder(&reminder).await?;
        self.write().reminders.insert(reminder.id, reminder.clone());
        Ok(reminder)
    }

    pub fn all(&self) -> Vec<Reminder> {
        let mut reminders: Vec<Reminder> =
            self.read().reminders.values().cloned().collect();
        reminders.sort_by_key(|r| r.id);
        reminders
    }

    /// Reminders due at `as_of`: the instance's fire time has passed and the
    /// (date, reminder) pair is unacknowledged. Candidates come from today
    /// and tomorrow; yesterday's reminders are expired.
    pub fn pending(&self, as_of: NaiveDateTime) -> Vec<PendingReminder> {
        let today = as_of.date();
        let mut pending = Vec::new();
        for reminder in self.all() {
            let Some(series) = self.series.get(reminder.series_id) else {
                continue;
            };
            for date in [today, today + Duration::days(1)] {
                if !self.occurs_on(&series, date) {
                    continue;
                }
                let exception = self.exceptions.get(series.id, date);
                if exception
                    .as_ref()
                    .is_some_and(|e| e.exception_type == ExceptionType::Cancelled)
                {
                    continue;
                }
                if self.completions.has(series.id, date) {
                    continue;
                }
                let instance_time = self.instance_time(&series, date);
                let fire_time = instance_time - Duration::minutes(reminder.offset_minutes);
                if fire_time <= as_of && !self.is_acknowledged(date, reminder.id) {
                    pending.push(PendingReminder {
                        reminder_id: reminder.id,
                        series_id: series.id,
                        label: reminder.label.clone(),
                        date,
                        instance_time,
                        fire_time,
                    });
                }
            }
        }
        pending.sort_by(|a, b| (a.fire_time, a.reminder_id).cmp(&(b.fire_time, b.reminder_id)));
        pending
    }

    /// Acknowledge a reminder for every candidate date around `as_of`. The
    /// same reminder can then no longer fire for those dates.
    pub async fn acknowledge(&self, id: Uuid, as_of: NaiveDateTime) -> Result<(), CoreError> {
        let reminder = self
            .read()
            .reminders
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("Reminder {} not found", id)))?;
        let Some(series) = self.series.get(reminder.series_id) else {
            return Err(CoreError::NotFound(format!(
                "Series {} not found",
                reminder.series_id
            )));
        };
        let today = as_of.date();
        for offset in -1..=1 {
            let date = today + Duration::days(offset);
            if !self.occurs_on(&series, date) {
                continue;
            }
            self.adapter.acknowledge_reminder(id, date, as_of).await?;
            self.write().acks.insert((date, id));
        }
        Ok(())
    }

    pub async fn hydrate(&self, today: NaiveDate) -> Result<(), CoreError> {
        for reminder in self.adapter.get_all_reminders().await? {
            self.write().reminders.entry(reminder.id).or_insert(reminder);
        }
        let start = today - Duration::days(ACK_HYDRATE_MARGIN_DAYS);
        let end = today + Duration::days(ACK_HYDRATE_MARGIN_DAYS);
        for ack in self.adapter.get_reminder_acks_in_range(start, end).await? {
            self.write().acks.insert((ack.date, ack.reminder_id));
        }
        Ok(())
    }

    fn is_acknowledged(&self, date: NaiveDate, id: Uuid) -> bool {
        self.read().acks.contains(&(date, id))
    }

    fn occurs_on(&self, series: &Series, date: NaiveDate) -> bool {
        if series.end_date.is_some_and(|end| date >= end) {
            return false;
        }
        series.patterns.iter().any(|pattern| {
            expand(
                &pattern.rule,
                date,
                date + Duration::days(1),
                series.start_date,
            )
            .contains(&date)
        })
    }

    /// The instance time reminders count back from: a rescheduled exception,
    /// midnight for all-day patterns, or the resolved pattern time.
    fn instance_time(&self, series: &Series, date: NaiveDate) -> NaiveDateTime {
        if let Some(exception) = self.exceptions.get(series.id, date) {
            if exception.exception_type == ExceptionType::Rescheduled {
                if let Some(new_time) = exception.new_time {
                    return new_time;
                }
            }
        }
        let pattern = series.patterns.iter().find(|pattern| {
            expand(
                &pattern.rule,
                date,
                date + Duration::days(1),
                series.start_date,
            )
            .contains(&date)
        });
        match pattern {
            Some(pattern) if pattern.all_day => midnight(date),
            Some(pattern) => {
                let local = resolve_local_time(
                    self.tz,
                    date,
                    pattern.time.unwrap_or_else(default_pattern_time),
                );
                date.and_time(local)
            }
            None => midnight(date),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ReminderState> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ReminderState> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::memory::MemoryAdapter;
    use crate::models::{NewSeriesData, Pattern, PatternRule};
    use crate::store::completions::CompletionTracker;
    use crate::store::exceptions::ExceptionStore;
    use crate::store::series::SeriesStore;
    use crate::time::{parse_date, parse_time};

    struct Fixture {
        series: SeriesStore,
        completions: CompletionTracker,
        exceptions: ExceptionStore,
        reminders: ReminderManager,
    }

    fn fixture() -> Fixture {
        let adapter = Arc::new(MemoryAdapter::new());
        let series = SeriesStore::new(adapter.clone());
        let completions = CompletionTracker::new(adapter.clone());
        let exceptions = ExceptionStore::new(adapter.clone());
        let reminders = ReminderManager::new(
            adapter,
            series.reader(),
            completions.reader(),
            exceptions.reader(),
            "UTC".parse().unwrap(),
        );
        Fixture {
            series,
            completions,
            exceptions,
            reminders,
        }
    }

    async fn daily_at_ten(fixture: &Fixture) -> Uuid {
        let mut pattern = Pattern::new(PatternRule::Daily);
        pattern.time = Some(parse_time("10:00").unwrap());
        fixture
            .series
            .create(NewSeriesData {
                title: "meds".to_string(),
                patterns: vec![pattern],
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_pending_respects_fire_time() {
        let f = fixture();
        let series = daily_at_ten(&f).await;
        let reminder = f.reminders.create(series, "take meds".to_string(), 30).await.unwrap();

        let before = parse_date("2025-06-01").unwrap().and_time(parse_time("09:00").unwrap());
        assert!(f.reminders.pending(before).is_empty());

        let after = parse_date("2025-06-01").unwrap().and_time(parse_time("09:45").unwrap());
        let pending = f.reminders.pending(after);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].reminder_id, reminder.id);
        assert_eq!(
            pending[0].fire_time,
            parse_date("2025-06-01").unwrap().and_time(parse_time("09:30").unwrap())
        );
    }

    #[tokio::test]
    async fn test_completion_suppresses_reminder() {
        let f = fixture();
        let series = daily_at_ten(&f).await;
        f.reminders.create(series, "take meds".to_string(), 30).await.unwrap();
        f.completions
            .log(series, parse_date("2025-06-01").unwrap(), None, None)
            .await
            .unwrap();
        let as_of = parse_date("2025-06-01").unwrap().and_time(parse_time("11:00").unwrap());
        // Tomorrow's instance has not fired yet, so nothing is pending.
        assert!(f.reminders.pending(as_of).is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_instance_suppresses_reminder() {
        let f = fixture();
        let series = daily_at_ten(&f).await;
        f.reminders.create(series, "take meds".to_string(), 0).await.unwrap();
        f.exceptions
            .set(crate::models::InstanceException {
                series_id: series,
                date: parse_date("2025-06-01").unwrap(),
                exception_type: ExceptionType::Cancelled,
                new_time: None,
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        let as_of = parse_date("2025-06-01").unwrap().and_time(parse_time("12:00").unwrap());
        assert!(f.reminders.pending(as_of).is_empty());
    }

    #[tokio::test]
    async fn test_acknowledge_blocks_refire() {
        let f = fixture();
        let series = daily_at_ten(&f).await;
        let reminder = f.reminders.create(series, "take meds".to_string(), 30).await.unwrap();
        let as_of = parse_date("2025-06-01").unwrap().and_time(parse_time("10:00").unwrap());
        assert_eq!(f.reminders.pending(as_of).len(), 1);
        f.reminders.acknowledge(reminder.id, as_of).await.unwrap();
        assert!(f.reminders.pending(as_of).is_empty());
    }

    #[tokio::test]
    async fn test_acks_survive_hydration() {
        let adapter = Arc::new(MemoryAdapter::new());
        let series_store = SeriesStore::new(adapter.clone());
        let completions = CompletionTracker::new(adapter.clone());
        let exceptions = ExceptionStore::new(adapter.clone());
        let manager = ReminderManager::new(
            adapter.clone(),
            series_store.reader(),
            completions.reader(),
            exceptions.reader(),
            "UTC".parse().unwrap(),
        );
        let mut pattern = Pattern::new(PatternRule::Daily);
        pattern.time = Some(parse_time("10:00").unwrap());
        let series = series_store
            .create(NewSeriesData {
                title: "meds".to_string(),
                patterns: vec![pattern],
                ..Default::default()
            })
            .await
            .unwrap()
            .id;
        let reminder = manager.create(series, "take meds".to_string(), 0).await.unwrap();
        let as_of = parse_date("2025-06-01").unwrap().and_time(parse_time("10:30").unwrap());
        manager.acknowledge(reminder.id, as_of).await.unwrap();

        let fresh = ReminderManager::new(
            adapter,
            series_store.reader(),
            completions.reader(),
            exceptions.reader(),
            "UTC".parse().unwrap(),
        );
        fresh.hydrate(parse_date("2025-06-01").unwrap()).await.unwrap();
        assert!(fresh.pending(as_of).is_empty());
    }
}
