// SQLite DocumentStore Implementation

use async_trait::async_trait;
use docsaga_core::error::{AppError, Result};
use docsaga_core::port::{CreateOutcome, DocumentStore, StoredDocument, TimeProvider, WriteOutcome};
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

// Helper to convert sqlx::Error to AppError with structured information
fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                // SQLite error codes: https://www.sqlite.org/rescode.html
                match code_str {
                    "2067" | "1555" => AppError::Database(format!(
                        "Unique constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    // SQLITE_BUSY - database is locked
                    "5" => AppError::Database(format!(
                        "Database locked (SQLITE_BUSY): {}",
                        db_err.message()
                    )),
                    // SQLITE_FULL - database or disk is full
                    "13" => AppError::Database(format!("Database full: {}", db_err.message())),
                    _ => AppError::Database(format!(
                        "Database error [{}]: {}",
                        code_str,
                        db_err.message()
                    )),
                }
            } else {
                AppError::Database(format!("Database error: {}", db_err.message()))
            }
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => AppError::Database(format!("Column not found: {}", col)),
        // Connection, pool, protocol errors
        _ => AppError::Database(err.to_string()),
    }
}

/// Document store backed by a single `documents` table keyed by (collection, id)
pub struct SqliteDocumentStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    /// Tell a lost version race apart from a deleted document
    async fn miss_reason(&self, collection: &str, id: &str) -> Result<WriteOutcome> {
        let exists: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM documents WHERE collection = ? AND id = ?",
        )
        .bind(collection)
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(if exists > 0 {
            WriteOutcome::Conflict
        } else {
            WriteOutcome::NotFound
        })
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT body, version FROM documents WHERE collection = ? AND id = ?",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(DocumentRow::into_stored).transpose()
    }

    async fn insert(&self, collection: &str, id: &str, body: &Value) -> Result<CreateOutcome> {
        let now = self.time_provider.now_millis();

        let result = sqlx::query(
            r#"
            INSERT INTO documents (collection, id, body, version, created_at, updated_at)
            VALUES (?, ?, ?, 1, ?, ?)
            ON CONFLICT (collection, id) DO NOTHING
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(body.to_string())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 1 {
            Ok(CreateOutcome::Created)
        } else {
            debug!(collection = %collection, document_id = %id, "Insert skipped, document exists");
            Ok(CreateOutcome::AlreadyExists)
        }
    }

    async fn replace(
        &self,
        collection: &str,
        id: &str,
        body: &Value,
        expected_version: i64,
    ) -> Result<WriteOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET body = ?, version = version + 1, updated_at = ?
            WHERE collection = ? AND id = ? AND version = ?
            "#,
        )
        .bind(body.to_string())
        .bind(self.time_provider.now_millis())
        .bind(collection)
        .bind(id)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 1 {
            Ok(WriteOutcome::Written)
        } else {
            self.miss_reason(collection, id).await
        }
    }

    async fn remove(
        &self,
        collection: &str,
        id: &str,
        expected_version: i64,
    ) -> Result<WriteOutcome> {
        let result =
            sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ? AND version = ?")
                .bind(collection)
                .bind(id)
                .bind(expected_version)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        if result.rows_affected() == 1 {
            Ok(WriteOutcome::Written)
        } else {
            self.miss_reason(collection, id).await
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DocumentRow {
    body: String,
    version: i64,
}

impl DocumentRow {
    fn into_stored(self) -> Result<StoredDocument> {
        Ok(StoredDocument {
            body: serde_json::from_str(&self.body)?,
            version: self.version,
        })
    }
}
