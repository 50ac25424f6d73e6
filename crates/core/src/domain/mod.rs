// Domain Layer - Documents and failure taxonomy

pub mod document;
pub mod error;

// Re-exports
pub use document::{Document, DocumentId};
pub use error::{DataInconsistency, StepFailure};
