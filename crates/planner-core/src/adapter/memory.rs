//! In-memory adapter: the reference test double, also usable as an
//! ephemeral backend.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::adapter::{
    Adapter, ConditionRecord, ConstraintRecord, PatternRecord, ReminderAck, SeriesRecord,
};
use crate::error::CoreError;
use crate::models::{
    AdaptiveDurationConfig, Completion, CyclingConfig, InstanceException, Link, PatternRule,
    Reminder,
};
use crate::time::weekday_from_name;

#[derive(Default)]
struct MemoryState {
    series: HashMap<Uuid, SeriesRecord>,
    patterns: HashMap<Uuid, PatternRecord>,
    conditions: HashMap<Uuid, ConditionRecord>,
    completions: HashMap<Uuid, Completion>,
    exceptions: HashMap<(Uuid, NaiveDate), InstanceException>,
    links: HashMap<Uuid, Link>,
    constraints: HashMap<Uuid, ConstraintRecord>,
    reminders: HashMap<Uuid, Reminder>,
    reminder_acks: HashMap<(Uuid, NaiveDate), ReminderAck>,
}

#[derive(Default)]
pub struct MemoryAdapter {
    state: Mutex<MemoryState>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    async fn create_series(&self, series: &SeriesRecord) -> Result<(), CoreError> {
        self.with_state(|s| {
            s.series.insert(series.id, series.clone());
        });
        Ok(())
    }

    async fn update_series(&self, id: Uuid, series: &SeriesRecord) -> Result<(), CoreError> {
        self.with_state(|s| {
            if !s.series.contains_key(&id) {
                return Err(CoreError::NotFound(format!("Series {} not found", id)));
            }
            s.series.insert(id, series.clone());
            Ok(())
        })
    }

    async fn delete_series(&self, id: Uuid) -> Result<(), CoreError> {
        self.with_state(|s| {
            s.series.remove(&id);
            s.patterns.retain(|_, p| p.series_id != id);
            s.conditions.retain(|_, c| c.series_id != id);
        });
        Ok(())
    }

    async fn get_series_by_id(&self, id: Uuid) -> Result<Option<SeriesRecord>, CoreError> {
        Ok(self.with_state(|s| s.series.get(&id).cloned()))
    }

    async fn get_all_series(&self) -> Result<Vec<SeriesRecord>, CoreError> {
        Ok(self.with_state(|s| s.series.values().cloned().collect()))
    }

    async fn add_tag_to_series(&self, id: Uuid, tag: &str) -> Result<(), CoreError> {
        self.with_state(|s| {
            let series = s
                .series
                .get_mut(&id)
                .ok_or_else(|| CoreError::NotFound(format!("Series {} not found", id)))?;
            if !series.tags.iter().any(|t| t == tag) {
                series.tags.push(tag.to_string());
            }
            Ok(())
        })
    }

    async fn remove_tag_from_series(&self, id: Uuid, tag: &str) -> Result<(), CoreError> {
        self.with_state(|s| {
            let series = s
                .series
                .get_mut(&id)
                .ok_or_else(|| CoreError::NotFound(format!("Series {} not found", id)))?;
            series.tags.retain(|t| t != tag);
            Ok(())
        })
    }

    async fn create_pattern(&self, pattern: &PatternRecord) -> Result<(), CoreError> {
        self.with_state(|s| {
            s.patterns.insert(pattern.id, pattern.clone());
        });
        Ok(())
    }

    async fn delete_pattern(&self, id: Uuid) -> Result<(), CoreError> {
        self.with_state(|s| {
            s.patterns.remove(&id);
        });
        Ok(())
    }

    async fn get_patterns_by_series(
        &self,
        series_id: Uuid,
    ) -> Result<Vec<PatternRecord>, CoreError> {
        Ok(self.with_state(|s| {
            let mut patterns: Vec<PatternRecord> = s
                .patterns
                .values()
                .filter(|p| p.series_id == series_id)
                .cloned()
                .collect();
            patterns.sort_by_key(|p| p.idx);
            patterns
        }))
    }

    async fn set_pattern_weekdays(
        &self,
        pattern_id: Uuid,
        weekdays: &[String],
    ) -> Result<(), CoreError> {
        let mut days = std::collections::BTreeSet::new();
        for name in weekdays {
            days.insert(weekday_from_name(name)?);
        }
        self.with_state(|s| {
            let pattern = s
                .patterns
                .get_mut(&pattern_id)
                .ok_or_else(|| CoreError::NotFound(format!("Pattern {} not found", pattern_id)))?;
            pattern.rule = PatternRule::Weekly { days_of_week: days };
            Ok(())
        })
    }

    async fn create_condition(&self, condition: &ConditionRecord) -> Result<(), CoreError> {
        self.with_state(|s| {
            s.conditions.insert(condition.id, condition.clone());
        });
        Ok(())
    }

    async fn delete_condition(&self, id: Uuid) -> Result<(), CoreError> {
        self.with_state(|s| {
            s.conditions.remove(&id);
        });
        Ok(())
    }

    async fn get_conditions_by_series(
        &self,
        series_id: Uuid,
    ) -> Result<Vec<ConditionRecord>, CoreError> {
        Ok(self.with_state(|s| {
            s.conditions
                .values()
                .filter(|c| c.series_id == series_id)
                .cloned()
                .collect()
        }))
    }

    async fn create_completion(&self, completion: &Completion) -> Result<(), CoreError> {
        self.with_state(|s| {
            s.completions.insert(completion.id, completion.clone());
        });
        Ok(())
    }

    async fn delete_completion(&self, id: Uuid) -> Result<(), CoreError> {
        self.with_state(|s| {
            s.completions.remove(&id);
        });
        Ok(())
    }

    async fn get_completions_by_series(
        &self,
        series_id: Uuid,
    ) -> Result<Vec<Completion>, CoreError> {
        Ok(self.with_state(|s| {
            let mut completions: Vec<Completion> = s
                .completions
                .values()
                .filter(|c| c.series_id == series_id)
                .cloned()
                .collect();
            completions.sort_by_key(|c| c.date);
            completions
        }))
    }

    async fn get_all_completions(&self) -> Result<Vec<Completion>, CoreError> {
        Ok(self.with_state(|s| s.completions.values().cloned().collect()))
    }

    async fn create_instance_exception(
        &self,
        exception: &InstanceException,
    ) -> Result<(), CoreError> {
        self.with_state(|s| {
            s.exceptions
                .insert((exception.series_id, exception.date), exception.clone());
        });
        Ok(())
    }

    async fn get_all_exceptions(&self) -> Result<Vec<InstanceException>, CoreError> {
        Ok(self.with_state(|s| s.exceptions.values().cloned().collect()))
    }

    async fn create_link(&self, link: &Link) -> Result<(), CoreError> {
        self.with_state(|s| {
            s.links.insert(link.child_id, link.clone());
        });
        Ok(())
    }

    async fn delete_link(&self, child_id: Uuid) -> Result<(), CoreError> {
        self.with_state(|s| {
            s.links.remove(&child_id);
        });
        Ok(())
    }

    async fn get_link_by_child(&self, child_id: Uuid) -> Result<Option<Link>, CoreError> {
        Ok(self.with_state(|s| s.links.get(&child_id).cloned()))
    }

    async fn get_all_links(&self) -> Result<Vec<Link>, CoreError> {
        Ok(self.with_state(|s| s.links.values().cloned().collect()))
    }

    async fn create_relational_constraint(
        &self,
        constraint: &ConstraintRecord,
    ) -> Result<(), CoreError> {
        self.with_state(|s| {
            s.constraints.insert(constraint.id, constraint.clone());
        });
        Ok(())
    }

    async fn delete_relational_constraint(&self, id: Uuid) -> Result<(), CoreError> {
        self.with_state(|s| {
            s.constraints.remove(&id);
        });
        Ok(())
    }

    async fn get_all_relational_constraints(&self) -> Result<Vec<ConstraintRecord>, CoreError> {
        Ok(self.with_state(|s| s.constraints.values().cloned().collect()))
    }

    async fn set_cycling_config(
        &self,
        series_id: Uuid,
        config: Option<&CyclingConfig>,
    ) -> Result<(), CoreError> {
        self.with_state(|s| {
            let series = s
                .series
                .get_mut(&series_id)
                .ok_or_else(|| CoreError::NotFound(format!("Series {} not found", series_id)))?;
            series.cycling = config.cloned();
            Ok(())
        })
    }

    async fn get_cycling_config(
        &self,
        series_id: Uuid,
    ) -> Result<Option<CyclingConfig>, CoreError> {
        Ok(self.with_state(|s| s.series.get(&series_id).and_then(|r| r.cycling.clone())))
    }

    async fn set_cycling_items(&self, series_id: Uuid, items: &[String]) -> Result<(), CoreError> {
        self.with_state(|s| {
            let series = s
                .series
                .get_mut(&series_id)
                .ok_or_else(|| CoreError::NotFound(format!("Series {} not found", series_id)))?;
            if let Some(cycling) = &mut series.cycling {
                cycling.items = items.to_vec();
            }
            Ok(())
        })
    }

    async fn set_adaptive_duration(
        &self,
        series_id: Uuid,
        config: Option<&AdaptiveDurationConfig>,
    ) -> Result<(), CoreError> {
        self.with_state(|s| {
            let series = s
                .series
                .get_mut(&series_id)
                .ok_or_else(|| CoreError::NotFound(format!("Series {} not found", series_id)))?;
            series.adaptive_duration = config.cloned();
            Ok(())
        })
    }

    async fn get_adaptive_duration(
        &self,
        series_id: Uuid,
    ) -> Result<Option<AdaptiveDurationConfig>, CoreError> {
        Ok(self.with_state(|s| {
            s.series
                .get(&series_id)
                .and_then(|r| r.adaptive_duration.clone())
        }))
    }

    async fn create_reminder(&self, reminder: &Reminder) -> Result<(), CoreError> {
        self.with_state(|s| {
            s.reminders.insert(reminder.id, reminder.clone());
        });
        Ok(())
    }

    async fn get_all_reminders(&self) -> Result<Vec<Reminder>, CoreError> {
        Ok(self.with_state(|s| s.reminders.values().cloned().collect()))
    }

    async fn acknowledge_reminder(
        &self,
        id: Uuid,
        date: NaiveDate,
        as_of: NaiveDateTime,
    ) -> Result<(), CoreError> {
        self.with_state(|s| {
            s.reminder_acks.insert(
                (id, date),
                ReminderAck {
                    reminder_id: id,
                    date,
                    acknowledged_at: as_of,
                },
            );
        });
        Ok(())
    }

    async fn get_reminder_acks_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ReminderAck>, CoreError> {
        Ok(self.with_state(|s| {
            s.reminder_acks
                .values()
                .filter(|a| a.date >= start && a.date <= end)
                .cloned()
                .collect()
        }))
    }
}
