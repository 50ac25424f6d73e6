// Domain Error Types

use crate::domain::DocumentId;
use crate::error::AppError;
use thiserror::Error;

/// Ready-made failure reason for transactions.
///
/// Callers with their own error taxonomy can use any type implementing
/// `From<AppError>` instead.
#[derive(Error, Debug)]
pub enum StepFailure {
    #[error("Document not found: {collection}/{id}")]
    NotFound {
        collection: &'static str,
        id: DocumentId,
    },

    #[error("Document already exists: {collection}/{id}")]
    AlreadyExists {
        collection: &'static str,
        id: DocumentId,
    },

    #[error("Mutation rejected for {collection}/{id}: {reason}")]
    MutationRejected {
        collection: &'static str,
        id: DocumentId,
        reason: String,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] AppError),
}

impl StepFailure {
    pub fn not_found(collection: &'static str, id: impl Into<DocumentId>) -> Self {
        StepFailure::NotFound {
            collection,
            id: id.into(),
        }
    }

    pub fn already_exists(collection: &'static str, id: impl Into<DocumentId>) -> Self {
        StepFailure::AlreadyExists {
            collection,
            id: id.into(),
        }
    }

    pub fn rejected(
        collection: &'static str,
        id: impl Into<DocumentId>,
        reason: impl Into<String>,
    ) -> Self {
        StepFailure::MutationRejected {
            collection,
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// State found diverged from what a compensation or finalization expected.
///
/// Never fatal: reported through tracing and otherwise ignored.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Data inconsistency on {collection}/{id}: {detail}")]
pub struct DataInconsistency {
    pub collection: &'static str,
    pub id: DocumentId,
    pub detail: String,
}

impl DataInconsistency {
    pub fn new(collection: &'static str, id: impl Into<DocumentId>, detail: impl Into<String>) -> Self {
        Self {
            collection,
            id: id.into(),
            detail: detail.into(),
        }
    }

    /// Emit the inconsistency as a structured warning
    pub fn report(&self) {
        tracing::warn!(
            collection = %self.collection,
            document_id = %self.id,
            detail = %self.detail,
            "Data inconsistency detected"
        );
    }
}
