// Delete-with-join-cleanup: unlink in the transaction, delete after commit

use super::builders::{update_step, Rejection};
use super::Transaction;
use crate::application::repository::{Decision, Repository};
use crate::domain::{DataInconsistency, Document, DocumentId};
use crate::error::AppError;
use tracing::{info, warn};

impl<F> Transaction<F, Option<DocumentId>>
where
    F: From<AppError> + Send + 'static,
{
    /// Clear a join reference held by document `id`.
    ///
    /// `mutate` clears the reference and returns the joined document's id,
    /// or `None` when there was nothing to unlink (successful no-op). On
    /// rollback `mutate_rollback` receives that id and the reloaded document
    /// to restore the reference. The id is the step's value and is picked up
    /// by `execute_delete_join`.
    pub fn add_delete_join<D, M, B, N>(
        &mut self,
        id: impl Into<DocumentId>,
        mutate: M,
        mut mutate_rollback: B,
        on_not_found: N,
    ) where
        D: Document,
        M: FnMut(&mut D) -> Option<DocumentId> + Send + 'static,
        B: FnMut(&DocumentId, &mut D) + Send + 'static,
        N: FnOnce() -> F + Send + 'static,
    {
        let id = id.into();
        let label = format!("unlink {}/{}", D::COLLECTION, id);
        let step = update_step(
            self.repository().clone(),
            id,
            mutate,
            move |document: &mut D, join_id: &DocumentId| {
                mutate_rollback(join_id, document);
                true
            },
            Rejection::Ignore,
            on_not_found,
        );
        self.add_step(label, step);
    }

    /// Execute, then physically delete the joined document of type `J`.
    ///
    /// The first step (registration order) that carries an id names the
    /// document to delete. The unlink is what the transaction guarantees; a
    /// joined document that is already gone, or a store error while deleting
    /// it, is logged and the result is still `on_success()`.
    pub async fn execute_delete_join<J, R>(
        self,
        on_success: impl FnOnce() -> R,
        on_failure: impl FnOnce(F) -> R,
    ) -> R
    where
        J: Document,
    {
        let repo = self.repo.clone();
        let join_ids = match self.run().await {
            Ok(values) => values,
            Err(reason) => return on_failure(reason),
        };

        if let Some(join_id) = join_ids.into_iter().flatten().next() {
            delete_joined::<J>(&repo, join_id).await;
        }
        on_success()
    }
}

async fn delete_joined<J: Document>(repo: &Repository, join_id: DocumentId) {
    match repo.delete_if::<J, _, _>(&join_id, |_| Decision::Apply(())).await {
        Ok(Some(())) => info!(
            collection = %J::COLLECTION,
            document_id = %join_id,
            "Deleted joined document"
        ),
        Ok(None) => DataInconsistency::new(J::COLLECTION, join_id, "joined document already deleted")
            .report(),
        Err(e) => warn!(
            collection = %J::COLLECTION,
            document_id = %join_id,
            error = %e,
            "Failed to delete joined document after commit"
        ),
    }
}
