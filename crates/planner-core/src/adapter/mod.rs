//! External persistence contract. The engine and stores only ever see this
//! trait; adapter failures surface to callers unchanged.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::condition::ConditionNode;
use crate::error::CoreError;
use crate::models::{
    AdaptiveDurationConfig, Completion, CyclingConfig, InstanceException, Link, PatternRule,
    Reminder,
};

/// Flat persisted form of a series. Patterns and conditions are separate
/// records keyed back to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub id: Uuid,
    pub title: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub locked: bool,
    pub tags: Vec<String>,
    pub cycling: Option<CyclingConfig>,
    pub adaptive_duration: Option<AdaptiveDurationConfig>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    pub id: Uuid,
    pub series_id: Uuid,
    /// Position within the owning series' pattern list.
    pub idx: usize,
    pub rule: PatternRule,
    pub time: Option<NaiveTime>,
    pub duration_minutes: Option<i64>,
    pub all_day: bool,
    pub fixed: bool,
    pub anchor: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionRecord {
    pub id: Uuid,
    pub series_id: Uuid,
    pub pattern_id: Uuid,
    pub node: ConditionNode,
}

/// Untagged persisted form of a constraint target; the constraint store
/// reconstructs the variant on hydration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub series_id: Option<Uuid>,
    pub tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintRecord {
    pub id: Uuid,
    pub constraint_type: String,
    pub first_series: Option<Uuid>,
    pub second_series: Option<Uuid>,
    pub target: Option<TargetRecord>,
    pub second_target: Option<TargetRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderAck {
    pub reminder_id: Uuid,
    pub date: NaiveDate,
    pub acknowledged_at: NaiveDateTime,
}

/// Asynchronous key-value shaped CRUD over the persisted entities.
#[async_trait]
pub trait Adapter: Send + Sync {
    // Series
    async fn create_series(&self, series: &SeriesRecord) -> Result<(), CoreError>;
    async fn update_series(&self, id: Uuid, series: &SeriesRecord) -> Result<(), CoreError>;
    async fn delete_series(&self, id: Uuid) -> Result<(), CoreError>;
    async fn get_series_by_id(&self, id: Uuid) -> Result<Option<SeriesRecord>, CoreError>;
    async fn get_all_series(&self) -> Result<Vec<SeriesRecord>, CoreError>;
    async fn add_tag_to_series(&self, id: Uuid, tag: &str) -> Result<(), CoreError>;
    async fn remove_tag_from_series(&self, id: Uuid, tag: &str) -> Result<(), CoreError>;

    // Patterns
    async fn create_pattern(&self, pattern: &PatternRecord) -> Result<(), CoreError>;
    async fn delete_pattern(&self, id: Uuid) -> Result<(), CoreError>;
    async fn get_patterns_by_series(&self, series_id: Uuid)
        -> Result<Vec<PatternRecord>, CoreError>;
    async fn set_pattern_weekdays(
        &self,
        pattern_id: Uuid,
        weekdays: &[String],
    ) -> Result<(), CoreError>;

    // Conditions
    async fn create_condition(&self, condition: &ConditionRecord) -> Result<(), CoreError>;
    async fn delete_condition(&self, id: Uuid) -> Result<(), CoreError>;
    async fn get_conditions_by_series(
        &self,
        series_id: Uuid,
    ) -> Result<Vec<ConditionRecord>, CoreError>;

    // Completions
    async fn create_completion(&self, completion: &Completion) -> Result<(), CoreError>;
    async fn delete_completion(&self, id: Uuid) -> Result<(), CoreError>;
    async fn get_completions_by_series(
        &self,
        series_id: Uuid,
    ) -> Result<Vec<Completion>, CoreError>;
    async fn get_all_completions(&self) -> Result<Vec<Completion>, CoreError>;

    // Exceptions
    async fn create_instance_exception(
        &self,
        exception: &InstanceException,
    ) -> Result<(), CoreError>;
    async fn get_all_exceptions(&self) -> Result<Vec<InstanceException>, CoreError>;

    // Links
    async fn create_link(&self, link: &Link) -> Result<(), CoreError>;
    async fn delete_link(&self, child_id: Uuid) -> Result<(), CoreError>;
    async fn get_link_by_child(&self, child_id: Uuid) -> Result<Option<Link>, CoreError>;
    async fn get_all_links(&self) -> Result<Vec<Link>, CoreError>;

    // Constraints
    async fn create_relational_constraint(
        &self,
        constraint: &ConstraintRecord,
    ) -> Result<(), CoreError>;
    async fn delete_relational_constraint(&self, id: Uuid) -> Result<(), CoreError>;
    async fn get_all_relational_constraints(&self) -> Result<Vec<ConstraintRecord>, CoreError>;

    // Cycling and adaptive duration
    async fn set_cycling_config(
        &self,
        series_id: Uuid,
        config: Option<&CyclingConfig>,
    ) -> Result<(), CoreError>;
    async fn get_cycling_config(&self, series_id: Uuid)
        -> Result<Option<CyclingConfig>, CoreError>;
    async fn set_cycling_items(&self, series_id: Uuid, items: &[String]) -> Result<(), CoreError>;
    async fn set_adaptive_duration(
        &self,
        series_id: Uuid,
        config: Option<&AdaptiveDurationConfig>,
    ) -> Result<(), CoreError>;
    async fn get_adaptive_duration(
        &self,
        series_id: Uuid,
    ) -> Result<Option<AdaptiveDurationConfig>, CoreError>;

    // Reminders
    async fn create_reminder(&self, reminder: &Reminder) -> Result<(), CoreError>;
    async fn get_all_reminders(&self) -> Result<Vec<Reminder>, CoreError>;
    async fn acknowledge_reminder(
        &self,
        id: Uuid,
        date: NaiveDate,
        as_of: NaiveDateTime,
    ) -> Result<(), CoreError>;
    async fn get_reminder_acks_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ReminderAck>, CoreError>;
}
