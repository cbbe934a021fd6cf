use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::adapter::Adapter;
use crate::error::CoreError;
use crate::models::{ExceptionType, InstanceException};

type ExceptionKey = (Uuid, NaiveDate);

/// Owns per-instance exceptions, keyed by (series, date).
pub struct ExceptionStore {
    adapter: Arc<dyn Adapter>,
    inner: Arc<RwLock<HashMap<ExceptionKey, InstanceException>>>,
}

/// Read-only capability view over exceptions. Returns copies.
#[derive(Clone)]
pub struct ExceptionReader {
    inner: Arc<RwLock<HashMap<ExceptionKey, InstanceException>>>,
}

impl ExceptionStore {
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        Self {
            adapter,
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn reader(&self) -> ExceptionReader {
        ExceptionReader {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Record an exception, replacing any previous one for the same
    /// (series, date). Instance-level preconditions (already cancelled,
    /// nonexistent instance) are the orchestrator's responsibility.
    pub async fn set(&self, exception: InstanceException) -> Result<InstanceException, CoreError> {
        if exception.exception_type == ExceptionType::Rescheduled && exception.new_time.is_none() {
            return Err(CoreError::Validation(
                "Rescheduled exceptions need a new time".to_string(),
            ));
        }
        self.adapter.create_instance_exception(&exception).await?;
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((exception.series_id, exception.date), exception.clone());
        Ok(exception)
    }

    pub async fn hydrate(&self) -> Result<(), CoreError> {
        for exception in self.adapter.get_all_exceptions().await? {
            let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());
            state
                .entry((exception.series_id, exception.date))
                .or_insert(exception);
        }
        Ok(())
    }
}

impl ExceptionReader {
    pub fn get(&self, series_id: Uuid, date: NaiveDate) -> Option<InstanceException> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(series_id, date))
            .cloned()
    }

    pub fn all(&self) -> Vec<InstanceException> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::memory::MemoryAdapter;
    use crate::time::parse_date;
    use chrono::Utc;

    #[tokio::test]
    async fn test_rescheduled_without_time_rejected() {
        let store = ExceptionStore::new(Arc::new(MemoryAdapter::new()));
        let result = store
            .set(InstanceException {
                series_id: Uuid::new_v4(),
                date: parse_date("2025-01-01").unwrap(),
                exception_type: ExceptionType::Rescheduled,
                new_time: None,
                created_at: Utc::now(),
            })
            .await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_set_replaces_existing() {
        let store = ExceptionStore::new(Arc::new(MemoryAdapter::new()));
        let series_id = Uuid::new_v4();
        let date = parse_date("2025-01-01").unwrap();
        let cancelled = InstanceException {
            series_id,
            date,
            exception_type: ExceptionType::Cancelled,
            new_time: None,
            created_at: Utc::now(),
        };
        store.set(cancelled.clone()).await.unwrap();
        assert_eq!(
            store.reader().get(series_id, date).unwrap().exception_type,
            ExceptionType::Cancelled
        );
    }
}
