use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::adapter::{Adapter, ConstraintRecord, TargetRecord};
use crate::error::CoreError;
use crate::models::{Constraint, ConstraintKind, ConstraintTarget};

/// Owns relational constraints.
pub struct ConstraintStore {
    adapter: Arc<dyn Adapter>,
    inner: Arc<RwLock<HashMap<Uuid, Constraint>>>,
}

/// Read-only capability view over constraints. Returns copies.
#[derive(Clone)]
pub struct ConstraintReader {
    inner: Arc<RwLock<HashMap<Uuid, Constraint>>>,
}

impl ConstraintStore {
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        Self {
            adapter,
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn reader(&self) -> ConstraintReader {
        ConstraintReader {
            inner: Arc::clone(&self.inner),
        }
    }

    pub async fn add(&self, kind: ConstraintKind) -> Result<Constraint, CoreError> {
        let constraint = Constraint {
            id: Uuid::new_v4(),
            kind,
        };
        self.adapter
            .create_relational_constraint(&to_record(&constraint))
            .await?;
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(constraint.id, constraint.clone());
        Ok(constraint)
    }

    pub async fn remove(&self, id: Uuid) -> Result<(), CoreError> {
        if !self
            .inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&id)
        {
            return Err(CoreError::NotFound(format!("Constraint {} not found", id)));
        }
        self.adapter.delete_relational_constraint(id).await?;
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        Ok(())
    }

    /// Mirror every constraint referencing `original` onto `clone`. Used by
    /// series splitting.
    pub async fn copy_for_split(
        &self,
        original: Uuid,
        clone: Uuid,
    ) -> Result<Vec<Constraint>, CoreError> {
        let mut mirrored = Vec::new();
        for constraint in self.reader().all() {
            if let Some(kind) = rewrite_kind(&constraint.kind, original, clone) {
                mirrored.push(self.add(kind).await?);
            }
        }
        Ok(mirrored)
    }

    pub async fn hydrate(&self) -> Result<(), CoreError> {
        for record in self.adapter.get_all_relational_constraints().await? {
            let constraint = from_record(record)?;
            let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());
            state.entry(constraint.id).or_insert(constraint);
        }
        Ok(())
    }
}

impl ConstraintReader {
    pub fn get(&self, id: Uuid) -> Option<Constraint> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    /// All constraints, sorted by id for deterministic iteration.
    pub fn all(&self) -> Vec<Constraint> {
        let mut constraints: Vec<Constraint> = self
            .inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        constraints.sort_by_key(|c| c.id);
        constraints
    }
}

fn rewrite_kind(kind: &ConstraintKind, original: Uuid, clone: Uuid) -> Option<ConstraintKind> {
    let swap = |id: Uuid| if id == original { clone } else { id };
    let swap_target = |target: &ConstraintTarget| match target {
        ConstraintTarget::Series(id) => ConstraintTarget::Series(swap(*id)),
        ConstraintTarget::Tag(tag) => ConstraintTarget::Tag(tag.clone()),
    };
    let references = |target: &ConstraintTarget| {
        matches!(target, ConstraintTarget::Series(id) if *id == original)
    };
    match kind {
        ConstraintKind::MustBeBefore {
            first_series,
            second_series,
        } if *first_series == original || *second_series == original => {
            Some(ConstraintKind::MustBeBefore {
                first_series: swap(*first_series),
                second_series: swap(*second_series),
            })
        }
        ConstraintKind::CantBeNextTo { target } if references(target) => {
            Some(ConstraintKind::CantBeNextTo {
                target: swap_target(target),
            })
        }
        ConstraintKind::MustBeOnSameDay {
            first_series,
            second_target,
        } if *first_series == original || references(second_target) => {
            Some(ConstraintKind::MustBeOnSameDay {
                first_series: swap(*first_series),
                second_target: swap_target(second_target),
            })
        }
        _ => None,
    }
}

fn target_record(target: &ConstraintTarget) -> TargetRecord {
    match target {
        ConstraintTarget::Series(id) => TargetRecord {
            series_id: Some(*id),
            tag: None,
        },
        ConstraintTarget::Tag(tag) => TargetRecord {
            series_id: None,
            tag: Some(tag.clone()),
        },
    }
}

fn target_from_record(record: TargetRecord) -> Result<ConstraintTarget, CoreError> {
    match (record.series_id, record.tag) {
        (Some(id), None) => Ok(ConstraintTarget::Series(id)),
        (None, Some(tag)) => Ok(ConstraintTarget::Tag(tag)),
        _ => Err(CoreError::Validation(
            "Constraint target must carry exactly one of seriesId or tag".to_string(),
        )),
    }
}

fn to_record(constraint: &Constraint) -> ConstraintRecord {
    let mut record = ConstraintRecord {
        id: constraint.id,
        constraint_type: String::new(),
        first_series: None,
        second_series: None,
        target: None,
        second_target: None,
    };
    match &constraint.kind {
        ConstraintKind::MustBeBefore {
            first_series,
            second_series,
        } => {
            record.constraint_type = "mustBeBefore".to_string();
            record.first_series = Some(*first_series);
            record.second_series = Some(*second_series);
        }
        ConstraintKind::CantBeNextTo { target } => {
            record.constraint_type = "cantBeNextTo".to_string();
            record.target = Some(target_record(target));
        }
        ConstraintKind::MustBeOnSameDay {
            first_series,
            second_target,
        } => {
            record.constraint_type = "mustBeOnSameDay".to_string();
            record.first_series = Some(*first_series);
            record.second_target = Some(target_record(second_target));
        }
    }
    record
}

/// Reconstruct the constraint variant from its untagged persisted form.
fn from_record(record: ConstraintRecord) -> Result<Constraint, CoreError> {
    let kind = match record.constraint_type.as_str() {
        "mustBeBefore" => ConstraintKind::MustBeBefore {
            first_series: record.first_series.ok_or_else(|| {
                CoreError::Validation("mustBeBefore constraint missing firstSeries".to_string())
            })?,
            second_series: record.second_series.ok_or_else(|| {
                CoreError::Validation("mustBeBefore constraint missing secondSeries".to_string())
            })?,
        },
        "cantBeNextTo" => ConstraintKind::CantBeNextTo {
            target: target_from_record(record.target.ok_or_else(|| {
                CoreError::Validation("cantBeNextTo constraint missing target".to_string())
            })?)?,
        },
        "mustBeOnSameDay" => ConstraintKind::MustBeOnSameDay {
            first_series: record.first_series.ok_or_else(|| {
                CoreError::Validation("mustBeOnSameDay constraint missing firstSeries".to_string())
            })?,
            second_target: target_from_record(record.second_target.ok_or_else(|| {
                CoreError::Validation("mustBeOnSameDay constraint missing secondTarget".to_string())
            })?)?,
        },
        other => {
            return Err(CoreError::Validation(format!(
                "Unknown constraint type: {}",
                other
            )))
        }
    };
    Ok(Constraint {
        id: record.id,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::memory::MemoryAdapter;

    #[tokio::test]
    async fn test_round_trip_through_records() {
        let adapter = Arc::new(MemoryAdapter::new());
        let store = ConstraintStore::new(adapter.clone());
        let a = Uuid::new_v4();
        let constraint = store
            .add(ConstraintKind::MustBeOnSameDay {
                first_series: a,
                second_target: ConstraintTarget::Tag("heavy".to_string()),
            })
            .await
            .unwrap();

        let fresh = ConstraintStore::new(adapter);
        fresh.hydrate().await.unwrap();
        assert_eq!(fresh.reader().get(constraint.id).unwrap(), constraint);
    }

    #[tokio::test]
    async fn test_copy_for_split_mirrors_references() {
        let store = ConstraintStore::new(Arc::new(MemoryAdapter::new()));
        let original = Uuid::new_v4();
        let other = Uuid::new_v4();
        let clone = Uuid::new_v4();
        store
            .add(ConstraintKind::MustBeBefore {
                first_series: original,
                second_series: other,
            })
            .await
            .unwrap();
        store
            .add(ConstraintKind::CantBeNextTo {
                target: ConstraintTarget::Series(other),
            })
            .await
            .unwrap();

        let mirrored = store.copy_for_split(original, clone).await.unwrap();
        assert_eq!(mirrored.len(), 1);
        assert_eq!(
            mirrored[0].kind,
            ConstraintKind::MustBeBefore {
                first_series: clone,
                second_series: other,
            }
        );
        assert_eq!(store.reader().all().len(), 3);
    }
}
