use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::condition::ConditionNode;

/// Expansion rule for a pattern. Closed variant set; evaluation functions
/// match exhaustively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PatternRule {
    Daily,
    EveryNDays {
        n: u32,
    },
    Weekly {
        /// Day-of-week numbers, Sunday = 0 through Saturday = 6.
        days_of_week: BTreeSet<u8>,
    },
    Monthly {
        day: u32,
    },
    Yearly {
        month: u32,
        day: u32,
    },
}

/// A declarative expansion rule owned by a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: Uuid,
    pub rule: PatternRule,
    /// Wall-clock time of the instance; absent patterns fall back to 09:00:00.
    pub time: Option<NaiveTime>,
    pub duration_minutes: Option<i64>,
    pub all_day: bool,
    /// Fixed instances are never moved by reflow.
    pub fixed: bool,
    pub condition: Option<ConditionNode>,
    /// Weekly anchor date. Orients cycling-group identity; never moves the
    /// weekly grid itself.
    pub anchor: Option<NaiveDate>,
}

impl Pattern {
    pub fn new(rule: PatternRule) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule,
            time: None,
            duration_minutes: None,
            all_day: false,
            fixed: false,
            condition: None,
            anchor: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclingMode {
    Sequential,
    Random,
}

impl fmt::Display for CyclingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CyclingMode::Sequential => write!(f, "sequential"),
            CyclingMode::Random => write!(f, "random"),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid cycling mode: {0}")]
pub struct ParseCyclingModeError(String);

impl FromStr for CyclingMode {
    type Err = ParseCyclingModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" => Ok(CyclingMode::Sequential),
            "random" => Ok(CyclingMode::Random),
            _ => Err(ParseCyclingModeError(s.to_string())),
        }
    }
}

/// Title cycling configuration: instances take their titles from `items`,
/// advanced by completion count plus the in-build instance counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CyclingConfig {
    pub mode: CyclingMode,
    pub items: Vec<String>,
    /// When true, a cancelled instance does not advance cycling.
    #[serde(default)]
    pub gap_leap: bool,
    #[serde(default)]
    pub current_index: usize,
}

fn default_last_n() -> usize {
    5
}

fn default_multiplier() -> f64 {
    1.0
}

/// Duration learned from recorded completion start/end times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveDurationConfig {
    pub fallback_minutes: Option<i64>,
    #[serde(default = "default_last_n")]
    pub last_n: usize,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for AdaptiveDurationConfig {
    fn default() -> Self {
        Self {
            fallback_minutes: None,
            last_n: default_last_n(),
            multiplier: default_multiplier(),
        }
    }
}

/// A template for recurring activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub id: Uuid,
    pub title: String,
    pub start_date: Option<NaiveDate>,
    /// Exclusive; must be strictly after `start_date` when both are present.
    pub end_date: Option<NaiveDate>,
    pub locked: bool,
    pub tags: Vec<String>,
    pub patterns: Vec<Pattern>,
    pub cycling: Option<CyclingConfig>,
    pub adaptive_duration: Option<AdaptiveDurationConfig>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Series {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            title: String::new(),
            start_date: None,
            end_date: None,
            locked: false,
            tags: Vec::new(),
            patterns: Vec::new(),
            cycling: None,
            adaptive_duration: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

/// A record that an instance actually happened. At most one per
/// (series, date).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub id: Uuid,
    pub series_id: Uuid,
    pub date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    /// Authoritative for downstream chain children on the same date.
    pub end_time: Option<NaiveTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExceptionType {
    Cancelled,
    Rescheduled,
}

impl fmt::Display for ExceptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExceptionType::Cancelled => write!(f, "cancelled"),
            ExceptionType::Rescheduled => write!(f, "rescheduled"),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid exception type: {0}")]
pub struct ParseExceptionTypeError(String);

impl FromStr for ExceptionType {
    type Err = ParseExceptionTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cancelled" => Ok(ExceptionType::Cancelled),
            "rescheduled" => Ok(ExceptionType::Rescheduled),
            _ => Err(ParseExceptionTypeError(s.to_string())),
        }
    }
}

/// Per-instance override, keyed by (series, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceException {
    pub series_id: Uuid,
    pub date: NaiveDate,
    pub exception_type: ExceptionType,
    /// For rescheduled exceptions: the new instance time. A new time whose
    /// date differs from `date` moves the instance to that date.
    pub new_time: Option<NaiveDateTime>,
    pub created_at: DateTime<Utc>,
}

/// Parent→child relationship positioning the child relative to the parent's
/// end time. A child has at most one parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub parent_id: Uuid,
    pub child_id: Uuid,
    pub distance_minutes: i64,
    pub early_wobble_minutes: i64,
    pub late_wobble_minutes: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkOptions {
    pub distance_minutes: i64,
    pub early_wobble_minutes: i64,
    pub late_wobble_minutes: i64,
}

/// Target of a relational constraint. Tag targets resolve at query time to
/// the current set of series bearing that tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConstraintTarget {
    Series(Uuid),
    Tag(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConstraintKind {
    MustBeBefore {
        first_series: Uuid,
        second_series: Uuid,
    },
    CantBeNextTo {
        target: ConstraintTarget,
    },
    MustBeOnSameDay {
        first_series: Uuid,
        second_target: ConstraintTarget,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub id: Uuid,
    pub kind: ConstraintKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: Uuid,
    pub series_id: Uuid,
    pub label: String,
    pub offset_minutes: i64,
}

/// A reminder computed as due: its instance time minus the offset has passed
/// and the (date, reminder) pair is not acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingReminder {
    pub reminder_id: Uuid,
    pub series_id: Uuid,
    pub label: String,
    pub date: NaiveDate,
    pub instance_time: NaiveDateTime,
    pub fire_time: NaiveDateTime,
}

/// Minimum granularity at which the engine's caches must be invalidated for
/// a given mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationScope {
    Series(Uuid),
    Global,
    Link,
    Constraint,
    Exception,
    Completion,
}

/// A materialized occurrence of a series on a specific date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleInstance {
    pub series_id: Uuid,
    pub title: String,
    pub date: NaiveDate,
    pub time: NaiveDateTime,
    pub duration_minutes: i64,
    pub all_day: bool,
    /// Pattern-declared fixedness, widened during reflow for explicit times
    /// outside the waking window.
    pub fixed: bool,
    pub explicit_time: bool,
    /// The declared time before reflow: pattern or exception time, or the
    /// chain target when the pattern supplied none.
    pub pattern_time: NaiveDateTime,
    pub pattern_supplied_time: bool,
    pub pattern_idx: usize,
}

impl ScheduleInstance {
    pub fn end_time(&self) -> NaiveDateTime {
        self.time + Duration::minutes(self.duration_minutes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictKind {
    Overlap,
    ConstraintViolation,
    ChainCannotFit,
    OverConstrained,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::Overlap => write!(f, "overlap"),
            ConflictKind::ConstraintViolation => write!(f, "constraintViolation"),
            ConflictKind::ChainCannotFit => write!(f, "chainCannotFit"),
            ConflictKind::OverConstrained => write!(f, "overConstrained"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub date: NaiveDate,
    pub series: Vec<Uuid>,
    pub message: String,
}

/// A materialized schedule over a half-open date window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub start: NaiveDate,
    /// Exclusive.
    pub end: NaiveDate,
    pub instances: Vec<ScheduleInstance>,
    pub conflicts: Vec<Conflict>,
}

impl Schedule {
    pub fn empty(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            instances: Vec::new(),
            conflicts: Vec::new(),
        }
    }
}

/// Hit/miss counters for the pattern-date and CSP-result caches, plus the
/// current schedule-cache generation. Exposed for testing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub pattern_hits: u64,
    pub pattern_misses: u64,
    pub csp_hits: u64,
    pub csp_misses: u64,
    pub generation: u64,
}

/// Data required to create a new series.
#[derive(Debug, Clone, Default)]
pub struct NewSeriesData {
    pub title: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub tags: Vec<String>,
    pub patterns: Vec<Pattern>,
    pub cycling: Option<CyclingConfig>,
    pub adaptive_duration: Option<AdaptiveDurationConfig>,
}

/// Data for modifying an existing series. Double options distinguish
/// "leave unchanged" from "clear".
#[derive(Debug, Clone, Default)]
pub struct UpdateSeriesData {
    pub title: Option<String>,
    pub start_date: Option<Option<NaiveDate>>,
    pub end_date: Option<Option<NaiveDate>>,
    /// Replacing the pattern list replaces the condition subtrees
    /// transactionally.
    pub patterns: Option<Vec<Pattern>>,
    pub add_tags: Option<Vec<String>>,
    pub remove_tags: Option<Vec<String>>,
    pub cycling: Option<Option<CyclingConfig>>,
    pub adaptive_duration: Option<Option<AdaptiveDurationConfig>>,
}

/// A pattern condition of a series together with its evaluation at a date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveCondition {
    pub pattern_id: Uuid,
    pub node: ConditionNode,
    pub satisfied: bool,
}
