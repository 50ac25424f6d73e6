// Plan files: a list of record operations applied as one transaction

use crate::record::Record;
use anyhow::ensure;
use docsaga_core::port::IdProvider;
use docsaga_core::{Document, DocumentId, Repository, StepFailure, Transaction};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, PoisonError};

/// Transaction built from a plan; step values carry ids unlinked by `unlink`
pub type PlanTransaction = Transaction<StepFailure, Option<DocumentId>>;

/// Parsed plan file
///
/// ```json
/// {"operations": [
///   {"op": "create", "id": "order-1", "fields": {"total": 30}},
///   {"op": "increment", "id": "stock-7", "field": "units", "by": -1, "min": 0},
///   {"op": "unlink", "id": "cart-3", "field": "pending_order"}
/// ]}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Plan {
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Create a record; fails if the id is taken. A missing id is generated.
    Create {
        #[serde(default)]
        id: Option<DocumentId>,
        #[serde(default)]
        fields: Map<String, Value>,
    },
    /// Create the record or merge `fields` into it
    Upsert {
        id: DocumentId,
        fields: Map<String, Value>,
    },
    /// Overwrite one field
    Set {
        id: DocumentId,
        field: String,
        value: Value,
    },
    /// Add `by` to an integer field, failing the plan if the result drops below `min`
    Increment {
        id: DocumentId,
        field: String,
        by: i64,
        #[serde(default)]
        min: Option<i64>,
    },
    /// Fail the plan unless the record exists
    Require { id: DocumentId },
    /// Clear a field referencing another record; that record is deleted after commit.
    /// A plan may hold at most one `unlink`.
    Unlink { id: DocumentId, field: String },
}

impl Plan {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Turn every operation into a transaction step
    ///
    /// Commit deletes a single joined record, so plans with more than one
    /// `unlink` are refused before any step is registered.
    pub fn build(
        self,
        repo: Repository,
        ids: &dyn IdProvider,
    ) -> anyhow::Result<PlanTransaction> {
        let unlinks = self
            .operations
            .iter()
            .filter(|operation| matches!(operation, Operation::Unlink { .. }))
            .count();
        ensure!(
            unlinks <= 1,
            "plan has {} unlink operations, at most one is allowed",
            unlinks
        );

        let mut tx = Transaction::new(repo);
        for operation in self.operations {
            operation.register(&mut tx, ids);
        }
        Ok(tx)
    }
}

impl Operation {
    fn register(self, tx: &mut PlanTransaction, ids: &dyn IdProvider) {
        match self {
            Operation::Create { id, fields } => {
                let id = id.unwrap_or_else(|| ids.generate_id());
                let taken = id.clone();
                tx.add_create(id, Record::new(fields), move || {
                    StepFailure::already_exists(Record::COLLECTION, taken)
                });
            }

            Operation::Upsert { id, fields } => register_upsert(tx, id, fields),

            Operation::Set { id, field, value } => {
                let restored = field.clone();
                tx.add_update_with_carry::<Record, Option<Value>, _, _, _>(
                    id.clone(),
                    move |record| {
                        if record.fields.get(&field) == Some(&value) {
                            return None;
                        }
                        Some(record.fields.insert(field.clone(), value.clone()))
                    },
                    move |record, previous| {
                        restore_field(record, &restored, previous.clone());
                        true
                    },
                    not_found(id),
                );
            }

            Operation::Increment { id, field, by, min } => {
                let restored = field.clone();
                let rejected_id = id.clone();
                tx.add_update_with_carry_or_fail::<Record, Option<Value>, _, _, _, _>(
                    id.clone(),
                    move |record| {
                        match record.int_field(&field).and_then(|n| n.checked_add(by)) {
                            Some(next) if min.map_or(true, |floor| next >= floor) => {
                                Some(record.fields.insert(field.clone(), Value::from(next)))
                            }
                            _ => None,
                        }
                    },
                    move |record, previous| {
                        restore_field(record, &restored, previous.clone());
                        true
                    },
                    move || {
                        StepFailure::rejected(
                            Record::COLLECTION,
                            rejected_id,
                            format!("cannot add {} to field", by),
                        )
                    },
                    not_found(id),
                );
            }

            Operation::Require { id } => {
                tx.add_checkup::<Record, _>(id.clone(), not_found(id));
            }

            Operation::Unlink { id, field } => {
                let restored = field.clone();
                tx.add_delete_join::<Record, _, _, _>(
                    id.clone(),
                    move |record| match record.fields.remove(&field) {
                        Some(Value::String(joined)) => Some(joined),
                        Some(other) => {
                            // Not a reference, leave it alone
                            record.fields.insert(field.clone(), other);
                            None
                        }
                        None => None,
                    },
                    move |joined, record| {
                        record
                            .fields
                            .insert(restored.clone(), Value::String(joined.clone()));
                    },
                    not_found(id),
                );
            }
        }
    }
}

fn register_upsert(tx: &mut PlanTransaction, id: DocumentId, fields: Map<String, Value>) {
    // Field values as they were before the last forward attempt; None = absent
    let previous: Arc<Mutex<Vec<(String, Option<Value>)>>> = Arc::default();
    let captured = Arc::clone(&previous);
    let rejected_id = id.clone();

    tx.add_create_or_update::<Record, _, _, _>(
        id,
        move |record| {
            if fields.is_empty() {
                return false;
            }
            let before: Vec<_> = fields
                .iter()
                .map(|(key, value)| (key.clone(), record.fields.insert(key.clone(), value.clone())))
                .collect();
            *captured.lock().unwrap_or_else(PoisonError::into_inner) = before;
            true
        },
        move |record| {
            let before = previous.lock().unwrap_or_else(PoisonError::into_inner).clone();
            for (key, value) in before {
                restore_field(record, &key, value);
            }
            true
        },
        move || StepFailure::rejected(Record::COLLECTION, rejected_id, "upsert without fields"),
    );
}

fn restore_field(record: &mut Record, field: &str, previous: Option<Value>) {
    match previous {
        Some(value) => {
            record.fields.insert(field.to_string(), value);
        }
        None => {
            record.fields.remove(field);
        }
    }
}

fn not_found(id: DocumentId) -> impl FnOnce() -> StepFailure + Send + 'static {
    move || StepFailure::not_found(Record::COLLECTION, id)
}
