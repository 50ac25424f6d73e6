// Document Store Port (Interface)
// Raw per-document operations with optimistic versioning

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// A document body as held by the store, with its optimistic-concurrency version
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub body: Value,
    pub version: i64,
}

/// Result of inserting a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Result of a version-guarded replace or remove
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The stored version no longer matches the expected one
    Conflict,
    NotFound,
}

/// Storage interface for keyed JSON documents.
///
/// Atomicity is only guaranteed per document. Every write is conditional on
/// the version observed by the preceding read.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load a document
    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>>;

    /// Insert a new document at version 1
    async fn insert(&self, collection: &str, id: &str, body: &Value) -> Result<CreateOutcome>;

    /// Replace a document if it is still at `expected_version`
    async fn replace(
        &self,
        collection: &str,
        id: &str,
        body: &Value,
        expected_version: i64,
    ) -> Result<WriteOutcome>;

    /// Remove a document if it is still at `expected_version`
    async fn remove(&self, collection: &str, id: &str, expected_version: i64)
        -> Result<WriteOutcome>;
}

// ============================================================================
// In-memory implementation
// ============================================================================

pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::RwLock;

    /// Operation counters, handy for asserting how much work a transaction did
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct StoreStats {
        pub gets: usize,
        pub inserts: usize,
        pub replaces: usize,
        pub removes: usize,
    }

    impl StoreStats {
        /// Successful writes of any kind
        pub fn writes(&self) -> usize {
            self.inserts + self.replaces + self.removes
        }
    }

    /// In-process document store
    #[derive(Default)]
    pub struct MemoryDocumentStore {
        documents: RwLock<HashMap<(String, String), StoredDocument>>,
        gets: AtomicUsize,
        inserts: AtomicUsize,
        replaces: AtomicUsize,
        removes: AtomicUsize,
    }

    impl MemoryDocumentStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Counters of successful operations since creation
        pub fn stats(&self) -> StoreStats {
            StoreStats {
                gets: self.gets.load(Ordering::SeqCst),
                inserts: self.inserts.load(Ordering::SeqCst),
                replaces: self.replaces.load(Ordering::SeqCst),
                removes: self.removes.load(Ordering::SeqCst),
            }
        }

        /// Number of documents currently held in a collection
        pub async fn count(&self, collection: &str) -> usize {
            self.documents
                .read()
                .await
                .keys()
                .filter(|(c, _)| c == collection)
                .count()
        }
    }

    fn key(collection: &str, id: &str) -> (String, String) {
        (collection.to_string(), id.to_string())
    }

    #[async_trait]
    impl DocumentStore for MemoryDocumentStore {
        async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            Ok(self.documents.read().await.get(&key(collection, id)).cloned())
        }

        async fn insert(&self, collection: &str, id: &str, body: &Value) -> Result<CreateOutcome> {
            let mut documents = self.documents.write().await;
            let key = key(collection, id);
            if documents.contains_key(&key) {
                return Ok(CreateOutcome::AlreadyExists);
            }
            documents.insert(
                key,
                StoredDocument {
                    body: body.clone(),
                    version: 1,
                },
            );
            self.inserts.fetch_add(1, Ordering::SeqCst);
            Ok(CreateOutcome::Created)
        }

        async fn replace(
            &self,
            collection: &str,
            id: &str,
            body: &Value,
            expected_version: i64,
        ) -> Result<WriteOutcome> {
            let mut documents = self.documents.write().await;
            match documents.get_mut(&key(collection, id)) {
                None => Ok(WriteOutcome::NotFound),
                Some(stored) if stored.version != expected_version => Ok(WriteOutcome::Conflict),
                Some(stored) => {
                    stored.body = body.clone();
                    stored.version += 1;
                    self.replaces.fetch_add(1, Ordering::SeqCst);
                    Ok(WriteOutcome::Written)
                }
            }
        }

        async fn remove(
            &self,
            collection: &str,
            id: &str,
            expected_version: i64,
        ) -> Result<WriteOutcome> {
            let mut documents = self.documents.write().await;
            let key = key(collection, id);
            match documents.get(&key) {
                None => Ok(WriteOutcome::NotFound),
                Some(stored) if stored.version != expected_version => Ok(WriteOutcome::Conflict),
                Some(_) => {
                    documents.remove(&key);
                    self.removes.fetch_add(1, Ordering::SeqCst);
                    Ok(WriteOutcome::Written)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryDocumentStore;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_versions() {
        let store = MemoryDocumentStore::new();

        let created = store.insert("items", "i-1", &json!({"n": 1})).await.unwrap();
        assert_eq!(created, CreateOutcome::Created);

        let again = store.insert("items", "i-1", &json!({"n": 2})).await.unwrap();
        assert_eq!(again, CreateOutcome::AlreadyExists);

        let stored = store.get("items", "i-1").await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.body, json!({"n": 1}));

        // Stale version is rejected
        let stale = store.replace("items", "i-1", &json!({"n": 3}), 0).await.unwrap();
        assert_eq!(stale, WriteOutcome::Conflict);

        let written = store.replace("items", "i-1", &json!({"n": 3}), 1).await.unwrap();
        assert_eq!(written, WriteOutcome::Written);
        assert_eq!(store.get("items", "i-1").await.unwrap().unwrap().version, 2);

        assert_eq!(store.remove("items", "i-1", 1).await.unwrap(), WriteOutcome::Conflict);
        assert_eq!(store.remove("items", "i-1", 2).await.unwrap(), WriteOutcome::Written);
        assert_eq!(store.remove("items", "i-1", 2).await.unwrap(), WriteOutcome::NotFound);

        let stats = store.stats();
        assert_eq!(stats.inserts, 1);
        assert_eq!(stats.replaces, 1);
        assert_eq!(stats.removes, 1);
    }

    #[tokio::test]
    async fn test_memory_store_collections_are_disjoint() {
        let store = MemoryDocumentStore::new();
        store.insert("a", "same", &json!(1)).await.unwrap();
        store.insert("b", "same", &json!(2)).await.unwrap();

        assert_eq!(store.count("a").await, 1);
        assert_eq!(store.get("b", "same").await.unwrap().unwrap().body, json!(2));
    }
}
