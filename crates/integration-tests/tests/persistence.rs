//! Persistence Integration Tests
//!
//! Committed transactions survive reopening the database; rolled back ones
//! leave nothing behind.

use std::path::PathBuf;
use std::sync::Arc;

use docsaga_core::port::time_provider::SystemTimeProvider;
use docsaga_core::{Document, Repository, StepFailure, Transaction};
use docsaga_infra_sqlite::{create_pool, run_migrations, SqliteDocumentStore};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Note {
    text: String,
}

impl Document for Note {
    const COLLECTION: &'static str = "notes";
}

fn temp_db_path() -> PathBuf {
    std::env::temp_dir().join(format!("docsaga_test_{}.db", uuid::Uuid::new_v4()))
}

async fn open(path: &PathBuf) -> Repository {
    let pool = create_pool(path.to_str().unwrap()).await.unwrap();
    run_migrations(&pool).await.unwrap();
    Repository::new(Arc::new(SqliteDocumentStore::new(
        pool,
        Arc::new(SystemTimeProvider),
    )))
}

fn note(text: &str) -> Note {
    Note {
        text: text.to_string(),
    }
}

#[tokio::test]
async fn test_commit_survives_reopen() {
    let db_path = temp_db_path();

    {
        let repo = open(&db_path).await;
        let mut tx = Transaction::<StepFailure>::new(repo);
        for i in 0..3 {
            let id = format!("n-{}", i);
            let taken = id.clone();
            tx.add_create(id, note("kept"), move || {
                StepFailure::already_exists(Note::COLLECTION, taken)
            });
        }
        tx.run().await.unwrap();
    }

    let repo = open(&db_path).await;
    for i in 0..3 {
        let stored: Note = repo.find_by_id(&format!("n-{}", i)).await.unwrap().unwrap();
        assert_eq!(stored, note("kept"));
    }

    let _ = std::fs::remove_file(&db_path);
}

#[tokio::test]
async fn test_rollback_leaves_nothing_on_disk() {
    let db_path = temp_db_path();

    {
        let repo = open(&db_path).await;
        repo.create("existing", &note("original")).await.unwrap();

        let mut tx = Transaction::<StepFailure>::new(repo);
        tx.add_create("new", note("discarded"), || {
            StepFailure::already_exists(Note::COLLECTION, "new")
        });
        tx.add_create("existing", note("clobber"), || {
            StepFailure::already_exists(Note::COLLECTION, "existing")
        });
        assert!(tx.run().await.is_err());
    }

    let repo = open(&db_path).await;
    assert!(!repo.exists::<Note>("new").await.unwrap());
    let existing: Note = repo.find_by_id("existing").await.unwrap().unwrap();
    assert_eq!(existing, note("original"));

    let _ = std::fs::remove_file(&db_path);
}
