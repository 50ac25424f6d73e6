// Docsaga Core - Domain Logic, Ports & Transaction Coordinator
// NO infrastructure dependencies (Hexagonal Architecture)

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use application::{Compensation, Decision, Outcome, Repository, RepositoryConfig, Transaction};
pub use domain::{DataInconsistency, Document, DocumentId, StepFailure};
pub use error::{AppError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
