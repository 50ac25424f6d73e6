// Application Layer - Repository adapter and transaction coordinator

pub mod constants;
pub mod repository;
pub mod transaction;

#[cfg(test)]
pub(crate) mod fixtures;

// Re-exports
pub use repository::{Decision, Repository, RepositoryConfig};
pub use transaction::{Compensation, Outcome, Transaction};
