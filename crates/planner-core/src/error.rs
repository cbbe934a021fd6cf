use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Database error")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Series {0} is locked")]
    Locked(Uuid),

    #[error("A completion already exists for series {series_id} on {date}")]
    DuplicateCompletion { series_id: Uuid, date: NaiveDate },

    #[error("Linking {child} under {parent} would form a cycle")]
    CycleDetected { parent: Uuid, child: Uuid },

    #[error("Chain depth {depth} exceeds the maximum of {max}")]
    ChainDepthExceeded { depth: usize, max: usize },

    #[error("Series {0} has recorded completions")]
    CompletionsExist(Uuid),

    #[error("Series {0} is the parent of linked children")]
    LinkedChildrenExist(Uuid),

    #[error("Instance of series {series_id} on {date} is already cancelled")]
    AlreadyCancelled { series_id: Uuid, date: NaiveDate },

    #[error("Series {series_id} has no instance on {date}")]
    NonExistentInstance { series_id: Uuid, date: NaiveDate },

    #[error("Instance of series {series_id} on {date} is cancelled")]
    CancelledInstance { series_id: Uuid, date: NaiveDate },
}
