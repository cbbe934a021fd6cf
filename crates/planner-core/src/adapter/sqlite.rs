//! SQLite adapter: the reference persistent backend. Nested variants
//! (pattern rules, condition trees, cycling and adaptive configs, tags,
//! constraint targets) live in JSON text columns.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::adapter::{
    Adapter, ConditionRecord, ConstraintRecord, PatternRecord, ReminderAck, SeriesRecord,
    TargetRecord,
};
use crate::db::DbPool;
use crate::error::CoreError;
use crate::models::{
    AdaptiveDurationConfig, Completion, CyclingConfig, InstanceException, Link, PatternRule,
    Reminder,
};
use crate::time::weekday_from_name;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS series (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        start_date TEXT,
        end_date TEXT,
        locked INTEGER NOT NULL DEFAULT 0,
        tags TEXT NOT NULL DEFAULT '[]',
        cycling TEXT,
        adaptive_duration TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS patterns (
        id TEXT PRIMARY KEY,
        series_id TEXT NOT NULL,
        idx INTEGER NOT NULL,
        rule TEXT NOT NULL,
        time TEXT,
        duration_minutes INTEGER,
        all_day INTEGER NOT NULL DEFAULT 0,
        fixed INTEGER NOT NULL DEFAULT 0,
        anchor TEXT
    )",
    "CREATE TABLE IF NOT EXISTS conditions (
        id TEXT PRIMARY KEY,
        series_id TEXT NOT NULL,
        pattern_id TEXT NOT NULL,
        node TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS completions (
        id TEXT PRIMARY KEY,
        series_id TEXT NOT NULL,
        date TEXT NOT NULL,
        start_time TEXT,
        end_time TEXT,
        UNIQUE(series_id, date)
    )",
    "CREATE TABLE IF NOT EXISTS instance_exceptions (
        series_id TEXT NOT NULL,
        date TEXT NOT NULL,
        exception_type TEXT NOT NULL,
        new_time TEXT,
        created_at TEXT NOT NULL,
        PRIMARY KEY (series_id, date)
    )",
    "CREATE TABLE IF NOT EXISTS links (
        child_id TEXT PRIMARY KEY,
        parent_id TEXT NOT NULL,
        distance_minutes INTEGER NOT NULL,
        early_wobble_minutes INTEGER NOT NULL,
        late_wobble_minutes INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS relational_constraints (
        id TEXT PRIMARY KEY,
        constraint_type TEXT NOT NULL,
        first_series TEXT,
        second_series TEXT,
        target TEXT,
        second_target TEXT
    )",
    "CREATE TABLE IF NOT EXISTS reminders (
        id TEXT PRIMARY KEY,
        series_id TEXT NOT NULL,
        label TEXT NOT NULL,
        offset_minutes INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS reminder_acks (
        reminder_id TEXT NOT NULL,
        date TEXT NOT NULL,
        acknowledged_at TEXT NOT NULL,
        PRIMARY KEY (reminder_id, date)
    )",
];

pub struct SqliteAdapter {
    pool: DbPool,
}

impl SqliteAdapter {
    /// Wrap a pool and bootstrap the schema.
    pub async fn new(pool: DbPool) -> Result<Self, CoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }
}

fn series_from_row(row: &SqliteRow) -> Result<SeriesRecord, CoreError> {
    let tags: String = row.try_get("tags")?;
    let cycling: Option<String> = row.try_get("cycling")?;
    let adaptive: Option<String> = row.try_get("adaptive_duration")?;
    Ok(SeriesRecord {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        locked: row.try_get("locked")?,
        tags: serde_json::from_str(&tags)?,
        cycling: cycling.as_deref().map(serde_json::from_str).transpose()?,
        adaptive_duration: adaptive.as_deref().map(serde_json::from_str).transpose()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn pattern_from_row(row: &SqliteRow) -> Result<PatternRecord, CoreError> {
    let rule: String = row.try_get("rule")?;
    let idx: i64 = row.try_get("idx")?;
    Ok(PatternRecord {
        id: row.try_get("id")?,
        series_id: row.try_get("series_id")?,
        idx: idx as usize,
        rule: serde_json::from_str(&rule)?,
        time: row.try_get("time")?,
        duration_minutes: row.try_get("duration_minutes")?,
        all_day: row.try_get("all_day")?,
        fixed: row.try_get("fixed")?,
        anchor: row.try_get("anchor")?,
    })
}

fn condition_from_row(row: &SqliteRow) -> Result<ConditionRecord, CoreError> {
    let node: String = row.try_get("node")?;
    Ok(ConditionRecord {
        id: row.try_get("id")?,
        series_id: row.try_get("series_id")?,
        pattern_id: row.try_get("pattern_id")?,
        node: serde_json::from_str(&node)?,
    })
}

fn completion_from_row(row: &SqliteRow) -> Result<Completion, CoreError> {
    Ok(Completion {
        id: row.try_get("id")?,
        series_id: row.try_get("series_id")?,
        date: row.try_get("date")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
    })
}

fn exception_from_row(row: &SqliteRow) -> Result<InstanceException, CoreError> {
    let exception_type: String = row.try_get("exception_type")?;
    Ok(InstanceException {
        series_id: row.try_get("series_id")?,
        date: row.try_get("date")?,
        exception_type: exception_type
            .parse()
            .map_err(|_| CoreError::Validation(format!("Invalid exception type: {}", exception_type)))?,
        new_time: row.try_get("new_time")?,
        created_at: row.try_get("created_at")?,
    })
}

fn link_from_row(row: &SqliteRow) -> Result<Link, CoreError> {
    Ok(Link {
        parent_id: row.try_get("parent_id")?,
        child_id: row.try_get("child_id")?,
        distance_minutes: row.try_get("distance_minutes")?,
        early_wobble_minutes: row.try_get("early_wobble_minutes")?,
        late_wobble_minutes: row.try_get("late_wobble_minutes")?,
    })
}

fn constraint_from_row(row: &SqliteRow) -> Result<ConstraintRecord, CoreError> {
    let target: Option<String> = row.try_get("target")?;
    let second_target: Option<String> = row.try_get("second_target")?;
    let decode = |json: Option<String>| -> Result<Option<TargetRecord>, CoreError> {
        Ok(json.as_deref().map(serde_json::from_str).transpose()?)
    };
    Ok(ConstraintRecord {
        id: row.try_get("id")?,
        constraint_type: row.try_get("constraint_type")?,
        first_series: row.try_get("first_series")?,
        second_series: row.try_get("second_series")?,
        target: decode(target)?,
        second_target: decode(second_target)?,
    })
}

fn reminder_from_row(row: &SqliteRow) -> Result<Reminder, CoreError> {
    Ok(Reminder {
        id: row.try_get("id")?,
        series_id: row.try_get("series_id")?,
        label: row.try_get("label")?,
        offset_minutes: row.try_get("offset_minutes")?,
    })
}

#[async_trait]
impl Adapter for SqliteAdapter {
    async fn create_series(&self, series: &SeriesRecord) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO series
             (id, title, start_date, end_date, locked, tags, cycling, adaptive_duration, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(series.id)
        .bind(&series.title)
        .bind(series.start_date)
        .bind(series.end_date)
        .bind(series.locked)
        .bind(serde_json::to_string(&series.tags)?)
        .bind(series.cycling.as_ref().map(serde_json::to_string).transpose()?)
        .bind(
            series
                .adaptive_duration
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(series.created_at)
        .bind(series.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_series(&self, id: Uuid, series: &SeriesRecord) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE series SET title = $2, start_date = $3, end_date = $4, locked = $5,
             tags = $6, cycling = $7, adaptive_duration = $8, updated_at = $9
             WHERE id = $1",
        )
        .bind(id)
        .bind(&series.title)
        .bind(series.start_date)
        .bind(series.end_date)
        .bind(series.locked)
        .bind(serde_json::to_string(&series.tags)?)
        .bind(series.cycling.as_ref().map(serde_json::to_string).transpose()?)
        .bind(
            series
                .adaptive_duration
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(series.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("Series {} not found", id)));
        }
        Ok(())
    }

    async fn delete_series(&self, id: Uuid) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM conditions WHERE series_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM patterns WHERE series_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM series WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_series_by_id(&self, id: Uuid) -> Result<Option<SeriesRecord>, CoreError> {
        let row = sqlx::query("SELECT * FROM series WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(series_from_row).transpose()
    }

    async fn get_all_series(&self) -> Result<Vec<SeriesRecord>, CoreError> {
        let rows = sqlx::query("SELECT * FROM series")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(series_from_row).collect()
    }

    async fn add_tag_to_series(&self, id: Uuid, tag: &str) -> Result<(), CoreError> {
        let Some(series) = self.get_series_by_id(id).await? else {
            return Err(CoreError::NotFound(format!("Series {} not found", id)));
        };
        let mut tags = series.tags;
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
        sqlx::query("UPDATE series SET tags = $2 WHERE id = $1")
            .bind(id)
            .bind(serde_json::to_string(&tags)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_tag_from_series(&self, id: Uuid, tag: &str) -> Result<(), CoreError> {
        let Some(series) = self.get_series_by_id(id).await? else {
            return Err(CoreError::NotFound(format!("Series {} not found", id)));
        };
        let tags: Vec<String> = series.tags.into_iter().filter(|t| t != tag).collect();
        sqlx::query("UPDATE series SET tags = $2 WHERE id = $1")
            .bind(id)
            .bind(serde_json::to_string(&tags)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_pattern(&self, pattern: &PatternRecord) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO patterns
             (id, series_id, idx, rule, time, duration_minutes, all_day, fixed, anchor)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(pattern.id)
        .bind(pattern.series_id)
        .bind(pattern.idx as i64)
        .bind(serde_json::to_string(&pattern.rule)?)
        .bind(pattern.time)
        .bind(pattern.duration_minutes)
        .bind(pattern.all_day)
        .bind(pattern.fixed)
        .bind(pattern.anchor)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_pattern(&self, id: Uuid) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM patterns WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_patterns_by_series(
        &self,
        series_id: Uuid,
    ) -> Result<Vec<PatternRecord>, CoreError> {
        let rows = sqlx::query("SELECT * FROM patterns WHERE series_id = $1 ORDER BY idx")
            .bind(series_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(pattern_from_row).collect()
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
        let rule = PatternRule::Weekly { days_of_week: days };
        let result = sqlx::query("UPDATE patterns SET rule = $2 WHERE id = $1")
            .bind(pattern_id)
            .bind(serde_json::to_string(&rule)?)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("Pattern {} not found", pattern_id)));
        }
        Ok(())
    }

    async fn create_condition(&self, condition: &ConditionRecord) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO conditions (id, series_id, pattern_id, node)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(condition.id)
        .bind(condition.series_id)
        .bind(condition.pattern_id)
        .bind(serde_json::to_string(&condition.node)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_condition(&self, id: Uuid) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM conditions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_conditions_by_series(
        &self,
        series_id: Uuid,
    ) -> Result<Vec<ConditionRecord>, CoreError> {
        let rows = sqlx::query("SELECT * FROM conditions WHERE series_id = $1")
            .bind(series_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(condition_from_row).collect()
    }

    async fn create_completion(&self, completion: &Completion) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO completions (id, series_id, date, start_time, end_time)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(completion.id)
        .bind(completion.series_id)
        .bind(completion.date)
        .bind(completion.start_time)
        .bind(completion.end_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_completion(&self, id: Uuid) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM completions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_completions_by_series(
        &self,
        series_id: Uuid,
    ) -> Result<Vec<Completion>, CoreError> {
        let rows = sqlx::query("SELECT * FROM completions WHERE series_id = $1 ORDER BY date")
            .bind(series_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(completion_from_row).collect()
    }

    async fn get_all_completions(&self) -> Result<Vec<Completion>, CoreError> {
        let rows = sqlx::query("SELECT * FROM completions")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(completion_from_row).collect()
    }

    async fn create_instance_exception(
        &self,
        exception: &InstanceException,
    ) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO instance_exceptions
             (series_id, date, exception_type, new_time, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(exception.series_id)
        .bind(exception.date)
        .bind(exception.exception_type.to_string())
        .bind(exception.new_time)
        .bind(exception.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_all_exceptions(&self) -> Result<Vec<InstanceException>, CoreError> {
        let rows = sqlx::query("SELECT * FROM instance_exceptions")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(exception_from_row).collect()
    }

    async fn create_link(&self, link: &Link) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO links
             (child_id, parent_id, distance_minutes, early_wobble_minutes, late_wobble_minutes)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(link.child_id)
        .bind(link.parent_id)
        .bind(link.distance_minutes)
        .bind(link.early_wobble_minutes)
        .bind(link.late_wobble_minutes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_link(&self, child_id: Uuid) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM links WHERE child_id = $1")
            .bind(child_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_link_by_child(&self, child_id: Uuid) -> Result<Option<Link>, CoreError> {
        let row = sqlx::query("SELECT * FROM links WHERE child_id = $1")
            .bind(child_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(link_from_row).transpose()
    }

    async fn get_all_links(&self) -> Result<Vec<Link>, CoreError> {
        let rows = sqlx::query("SELECT * FROM links").fetch_all(&self.pool).await?;
        rows.iter().map(link_from_row).collect()
    }

    async fn create_relational_constraint(
        &self,
        constraint: &ConstraintRecord,
    ) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO relational_constraints
             (id, constraint_type, first_series, second_series, target, second_target)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(constraint.id)
        .bind(&constraint.constraint_type)
        .bind(constraint.first_series)
        .bind(constraint.second_series)
        .bind(constraint.target.as_ref().map(serde_json::to_string).transpose()?)
        .bind(
            constraint
                .second_target
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_relational_constraint(&self, id: Uuid) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM relational_constraints WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_all_relational_constraints(&self) -> Result<Vec<ConstraintRecord>, CoreError> {
        let rows = sqlx::query("SELECT * FROM relational_constraints")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(constraint_from_row).collect()
    }

    async fn set_cycling_config(
        &self,
        series_id: Uuid,
        config: Option<&CyclingConfig>,
    ) -> Result<(), CoreError> {
        let result = sqlx::query("UPDATE series SET cycling = $2 WHERE id = $1")
            .bind(series_id)
            .bind(config.map(serde_json::to_string).transpose()?)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("Series {} not found", series_id)));
        }
        Ok(())
    }

    async fn get_cycling_config(
        &self,
        series_id: Uuid,
    ) -> Result<Option<CyclingConfig>, CoreError> {
        Ok(self
            .get_series_by_id(series_id)
            .await?
            .and_then(|s| s.cycling))
    }

    async fn set_cycling_items(&self, series_id: Uuid, items: &[String]) -> Result<(), CoreError> {
        let Some(series) = self.get_series_by_id(series_id).await? else {
            return Err(CoreError::NotFound(format!("Series {} not found", series_id)));
        };
        let Some(mut cycling) = series.cycling else {
            return Ok(());
        };
        cycling.items = items.to_vec();
        self.set_cycling_config(series_id, Some(&cycling)).await
    }

    async fn set_adaptive_duration(
        &self,
        series_id: Uuid,
        config: Option<&AdaptiveDurationConfig>,
    ) -> Result<(), CoreError> {
        let result = sqlx::query("UPDATE series SET adaptive_duration = $2 WHERE id = $1")
            .bind(series_id)
            .bind(config.map(serde_json::to_string).transpose()?)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("Series {} not found", series_id)));
        }
        Ok(())
    }

    async fn get_adaptive_duration(
        &self,
        series_id: Uuid,
    ) -> Result<Option<AdaptiveDurationConfig>, CoreError> {
        Ok(self
            .get_series_by_id(series_id)
            .await?
            .and_then(|s| s.adaptive_duration))
    }

    async fn create_reminder(&self, reminder: &Reminder) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO reminders (id, series_id, label, offset_minutes)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(reminder.id)
        .bind(reminder.series_id)
        .bind(&reminder.label)
        .bind(reminder.offset_minutes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_all_reminders(&self) -> Result<Vec<Reminder>, CoreError> {
        let rows = sqlx::query("SELECT * FROM reminders")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(reminder_from_row).collect()
    }

    async fn acknowledge_reminder(
        &self,
        id: Uuid,
        date: NaiveDate,
        as_of: NaiveDateTime,
    ) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO reminder_acks (reminder_id, date, acknowledged_at)
             VALUES ($1, $2, $3)",
        )
        .bind(id)
        .bind(date)
        .bind(as_of)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_reminder_acks_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ReminderAck>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM reminder_acks WHERE date >= $1 AND date <= $2",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(ReminderAck {
                    reminder_id: row.try_get("reminder_id")?,
                    date: row.try_get("date")?,
                    acknowledged_at: row.try_get("acknowledged_at")?,
                })
            })
            .collect()
    }
}
