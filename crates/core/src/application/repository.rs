// Typed repository over the DocumentStore port
// Load-mutate-save with version-guarded writes and bounded retry

use crate::application::constants::{DEFAULT_MAX_SAVE_ATTEMPTS, DEFAULT_RETRY_BACKOFF};
use crate::domain::Document;
use crate::error::{AppError, Result};
use crate::port::{CreateOutcome, DocumentStore, WriteOutcome};
use std::future::{ready, Future};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Whether a load-mutate callback wants its change written back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision<R> {
    /// Persist the (mutated) document, then yield the value
    Apply(R),
    /// Leave the stored document untouched and yield the value
    Skip(R),
}

impl<R> Decision<R> {
    pub fn apply_if(apply: bool, value: R) -> Self {
        if apply {
            Decision::Apply(value)
        } else {
            Decision::Skip(value)
        }
    }
}

/// Repository configuration
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Save attempts before a write gives up with `AppError::Conflict`
    pub max_save_attempts: u32,

    /// Sleep between attempts, multiplied by the attempt number
    pub retry_backoff: Duration,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            max_save_attempts: DEFAULT_MAX_SAVE_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

/// Document-store adapter used by transaction steps.
///
/// Cheap to clone; every clone shares the same underlying store. Each
/// operation touches exactly one document, and writes only succeed if the
/// document is still at the version that was read. On a version conflict the
/// document is reloaded and the callback runs again, so callbacks may be
/// invoked more than once per call.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn DocumentStore>,
    config: RepositoryConfig,
}

impl Repository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_config(store, RepositoryConfig::default())
    }

    pub fn with_config(store: Arc<dyn DocumentStore>, config: RepositoryConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Load and decode a document
    pub async fn find_by_id<D: Document>(&self, id: &str) -> Result<Option<D>> {
        match self.store.get(D::COLLECTION, id).await? {
            Some(stored) => Ok(Some(serde_json::from_value(stored.body)?)),
            None => Ok(None),
        }
    }

    /// Check for a document without decoding it
    pub async fn exists<D: Document>(&self, id: &str) -> Result<bool> {
        Ok(self.store.get(D::COLLECTION, id).await?.is_some())
    }

    /// Insert a document; never overwrites
    pub async fn create<D: Document>(&self, id: &str, document: &D) -> Result<CreateOutcome> {
        let body = serde_json::to_value(document)?;
        self.store.insert(D::COLLECTION, id, &body).await
    }

    /// Load, mutate and conditionally save a document.
    ///
    /// Returns `Ok(None)` when no document exists at `id`.
    pub async fn update<D, R, M>(&self, id: &str, mut mutate: M) -> Result<Option<R>>
    where
        D: Document,
        R: Send,
        M: FnMut(&mut D) -> Decision<R> + Send,
    {
        self.update_async(id, move |mut document: D| {
            let decision = mutate(&mut document);
            ready((document, decision))
        })
        .await
    }

    /// `update` with an asynchronous mutation
    pub async fn update_async<D, R, M, Fut>(&self, id: &str, mut mutate: M) -> Result<Option<R>>
    where
        D: Document,
        R: Send,
        M: FnMut(D) -> Fut + Send,
        Fut: Future<Output = (D, Decision<R>)> + Send,
    {
        for attempt in 1..=self.max_attempts() {
            let Some(stored) = self.store.get(D::COLLECTION, id).await? else {
                return Ok(None);
            };

            let document: D = serde_json::from_value(stored.body)?;
            let (document, decision) = mutate(document).await;
            let value = match decision {
                Decision::Skip(value) => return Ok(Some(value)),
                Decision::Apply(value) => value,
            };

            let body = serde_json::to_value(&document)?;
            match self
                .store
                .replace(D::COLLECTION, id, &body, stored.version)
                .await?
            {
                WriteOutcome::Written => return Ok(Some(value)),
                // Deleted between load and save
                WriteOutcome::NotFound => return Ok(None),
                WriteOutcome::Conflict => self.back_off(D::COLLECTION, id, attempt, "update").await,
            }
        }

        Err(self.exhausted(D::COLLECTION, id, "update"))
    }

    /// Load a document and delete it if `decide` says so.
    ///
    /// Returns `Ok(None)` when no document exists at `id`.
    pub async fn delete_if<D, R, M>(&self, id: &str, mut decide: M) -> Result<Option<R>>
    where
        D: Document,
        R: Send,
        M: FnMut(&D) -> Decision<R> + Send,
    {
        for attempt in 1..=self.max_attempts() {
            let Some(stored) = self.store.get(D::COLLECTION, id).await? else {
                return Ok(None);
            };

            let document: D = serde_json::from_value(stored.body)?;
            let value = match decide(&document) {
                Decision::Skip(value) => return Ok(Some(value)),
                Decision::Apply(value) => value,
            };

            match self
                .store
                .remove(D::COLLECTION, id, stored.version)
                .await?
            {
                WriteOutcome::Written => return Ok(Some(value)),
                WriteOutcome::NotFound => return Ok(None),
                WriteOutcome::Conflict => self.back_off(D::COLLECTION, id, attempt, "delete").await,
            }
        }

        Err(self.exhausted(D::COLLECTION, id, "delete"))
    }

    /// Upsert primitive.
    ///
    /// `handler` receives `true` together with `D::default()` when no document
    /// exists yet, or `false` together with the stored document.
    pub async fn create_or_update<D, R, H>(&self, id: &str, mut handler: H) -> Result<R>
    where
        D: Document + Default,
        R: Send,
        H: FnMut(bool, &mut D) -> Decision<R> + Send,
    {
        self.create_or_update_async(id, move |created, mut document: D| {
            let decision = handler(created, &mut document);
            ready((document, decision))
        })
        .await
    }

    /// `create_or_update` with an asynchronous handler
    pub async fn create_or_update_async<D, R, H, Fut>(&self, id: &str, mut handler: H) -> Result<R>
    where
        D: Document + Default,
        R: Send,
        H: FnMut(bool, D) -> Fut + Send,
        Fut: Future<Output = (D, Decision<R>)> + Send,
    {
        for attempt in 1..=self.max_attempts() {
            match self.store.get(D::COLLECTION, id).await? {
                Some(stored) => {
                    let document: D = serde_json::from_value(stored.body)?;
                    let (document, decision) = handler(false, document).await;
                    let value = match decision {
                        Decision::Skip(value) => return Ok(value),
                        Decision::Apply(value) => value,
                    };

                    let body = serde_json::to_value(&document)?;
                    match self
                        .store
                        .replace(D::COLLECTION, id, &body, stored.version)
                        .await?
                    {
                        WriteOutcome::Written => return Ok(value),
                        // Changed or deleted underneath us: start over
                        WriteOutcome::Conflict | WriteOutcome::NotFound => {
                            self.back_off(D::COLLECTION, id, attempt, "upsert").await
                        }
                    }
                }
                None => {
                    let (document, decision) = handler(true, D::default()).await;
                    let value = match decision {
                        Decision::Skip(value) => return Ok(value),
                        Decision::Apply(value) => value,
                    };

                    let body = serde_json::to_value(&document)?;
                    match self.store.insert(D::COLLECTION, id, &body).await? {
                        CreateOutcome::Created => return Ok(value),
                        CreateOutcome::AlreadyExists => {
                            self.back_off(D::COLLECTION, id, attempt, "upsert").await
                        }
                    }
                }
            }
        }

        Err(self.exhausted(D::COLLECTION, id, "upsert"))
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_save_attempts.max(1)
    }

    async fn back_off(&self, collection: &str, id: &str, attempt: u32, operation: &str) {
        debug!(
            collection = %collection,
            document_id = %id,
            attempt = attempt,
            operation = %operation,
            "Version conflict, reloading document"
        );

        if attempt < self.max_attempts() {
            tokio::time::sleep(self.config.retry_backoff * attempt).await;
        }
    }

    fn exhausted(&self, collection: &str, id: &str, operation: &str) -> AppError {
        AppError::Conflict(format!(
            "{} of {}/{} lost {} consecutive version races",
            operation,
            collection,
            id,
            self.max_attempts()
        ))
    }
}
