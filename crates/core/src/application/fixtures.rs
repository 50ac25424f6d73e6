// Shared test documents and repository wiring

use crate::application::Repository;
use crate::domain::{Document, DocumentId};
use crate::port::document_store::memory::MemoryDocumentStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    pub value: i64,
    #[serde(default)]
    pub owner: Option<DocumentId>,
}

impl Counter {
    pub fn new(value: i64) -> Self {
        Self { value, owner: None }
    }

    pub fn owned_by(value: i64, owner: impl Into<DocumentId>) -> Self {
        Self {
            value,
            owner: Some(owner.into()),
        }
    }
}

impl Document for Counter {
    const COLLECTION: &'static str = "counters";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    pub name: String,
}

impl Document for Owner {
    const COLLECTION: &'static str = "owners";
}

pub fn memory_repository() -> (Arc<MemoryDocumentStore>, Repository) {
    let store = Arc::new(MemoryDocumentStore::new());
    let repo = Repository::new(store.clone());
    (store, repo)
}
