use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "planner", about = "Auto-planner for recurring activities", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add a recurring series
    Add(AddCommand),
    /// List all series
    List,
    /// Delete a series
    Delete { id: Uuid },
    /// Lock a series against edits
    Lock { id: Uuid },
    /// Unlock a series
    Unlock { id: Uuid },
    /// Split a series at a date (YYYY-MM-DD)
    Split { id: Uuid, date: String },
    /// Show the schedule for a window
    Schedule(ScheduleCommand),
    /// Show conflicts from the last build
    Conflicts,
    /// Log a completion
    Complete(CompleteCommand),
    /// Cancel one instance
    Cancel { id: Uuid, date: String },
    /// Reschedule one instance
    Reschedule {
        id: Uuid,
        date: String,
        /// New time, HH:MM or HH:MM:SS
        time: String,
    },
    /// Link a child series to a parent
    Link(LinkCommand),
    /// Remove a child's link
    Unlink { child: Uuid },
    /// Constraint operations
    #[command(subcommand)]
    Constraint(ConstraintCommands),
    /// Reminder operations
    #[command(subcommand)]
    Remind(RemindCommands),
}

#[derive(Subcommand)]
pub enum ConstraintCommands {
    /// Require one series to come before another on shared days
    Before { first: Uuid, second: Uuid },
    /// Forbid a tag's series from landing on adjacent days
    Spread { tag: String },
    /// Restrict a series to days another series fires on
    SameDay { series: Uuid, anchor: Uuid },
    /// List constraints
    List,
    /// Remove a constraint
    Remove { id: Uuid },
}

#[derive(Args)]
pub struct AddCommand {
    pub title: String,
    /// Recur daily
    #[arg(long, conflicts_with_all = ["every", "weekly", "monthly"])]
    pub daily: bool,
    /// Recur every N days
    #[arg(long, value_name = "N")]
    pub every: Option<u32>,
    /// Recur weekly on named days (e.g. --weekly mon,wed,fri)
    #[arg(long, value_delimiter = ',')]
    pub weekly: Option<Vec<String>>,
    /// Recur monthly on a day of month
    #[arg(long, value_name = "DAY")]
    pub monthly: Option<u32>,
    /// Instance time, HH:MM or HH:MM:SS
    #[arg(long)]
    pub time: Option<String>,
    /// Duration in minutes
    #[arg(long)]
    pub duration: Option<i64>,
    /// Pin the instance; reflow will not move it
    #[arg(long)]
    pub fixed: bool,
    /// All-day instance
    #[arg(long)]
    pub all_day: bool,
    /// Tags
    #[arg(long, value_delimiter = ',')]
    pub tags: Vec<String>,
    /// First date the series applies (YYYY-MM-DD)
    #[arg(long)]
    pub start: Option<String>,
    /// Exclusive end date (YYYY-MM-DD)
    #[arg(long)]
    pub end: Option<String>,
}

#[derive(Args)]
pub struct ScheduleCommand {
    /// Window start (YYYY-MM-DD); defaults to today
    pub start: Option<String>,
    /// Exclusive window end (YYYY-MM-DD); defaults to start + configured days
    pub end: Option<String>,
}

#[derive(Args)]
pub struct CompleteCommand {
    pub id: Uuid,
    pub date: String,
    /// Actual start time
    #[arg(long)]
    pub start: Option<String>,
    /// Actual end time
    #[arg(long)]
    pub end: Option<String>,
}

#[derive(Args)]
pub struct LinkCommand {
    pub parent: Uuid,
    pub child: Uuid,
    /// Minutes between parent end and child start
    #[arg(long, default_value_t = 0)]
    pub distance: i64,
    /// Minutes the child may start early
    #[arg(long, default_value_t = 0)]
    pub early: i64,
    /// Minutes the child may start late
    #[arg(long, default_value_t = 0)]
    pub late: i64,
}

#[derive(Subcommand)]
pub enum RemindCommands {
    /// Attach a reminder to a series
    Add {
        series: Uuid,
        label: String,
        /// Minutes before the instance
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// List reminders due now
    List,
    /// Compute due reminders and emit events
    Check,
    /// Acknowledge a reminder
    Ack { id: Uuid },
}
