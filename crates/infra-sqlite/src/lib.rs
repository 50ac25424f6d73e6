// Docsaga Infrastructure - SQLite Adapter
// Implements: DocumentStore

mod connection;
mod document_store;
mod migration;

pub use connection::create_pool;
pub use document_store::SqliteDocumentStore;
pub use migration::run_migrations;

// Note: sqlx::Error conversion is handled by a helper function
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
