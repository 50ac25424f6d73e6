// Step builders: one document mutation plus its matching undo

use super::{Compensation, Outcome, Transaction};
use crate::application::repository::{Decision, Repository};
use crate::domain::{DataInconsistency, Document, DocumentId};
use crate::error::AppError;
use crate::port::CreateOutcome;
use std::future::{ready, Future};

/// What an update step reports when its mutation declines to change anything
pub(super) enum Rejection<F> {
    /// Succeed without compensation
    Ignore,
    /// Fail with the produced reason
    Fail(Box<dyn FnOnce() -> F + Send>),
}

impl<F, T> Transaction<F, T>
where
    F: From<AppError> + Send + 'static,
    T: Default + Send + 'static,
{
    /// Update a document.
    ///
    /// If `mutate` returns false the step is a successful no-op. Otherwise
    /// the document is saved and, on rollback, reloaded and passed to
    /// `rollback`, which is saved only if it returns true.
    pub fn add_update<D, M, B, N>(
        &mut self,
        id: impl Into<DocumentId>,
        mut mutate: M,
        mut rollback: B,
        on_not_found: N,
    ) where
        D: Document,
        M: FnMut(&mut D) -> bool + Send + 'static,
        B: FnMut(&mut D) -> bool + Send + 'static,
        N: FnOnce() -> F + Send + 'static,
    {
        self.push_update(
            id.into(),
            move |document: &mut D| mutate(document).then_some(()),
            move |document: &mut D, _: &()| rollback(document),
            Rejection::Ignore,
            on_not_found,
        );
    }

    /// `add_update`, failing with `on_mutate_failed` when `mutate` returns false
    pub fn add_update_or_fail<D, M, B, R, N>(
        &mut self,
        id: impl Into<DocumentId>,
        mut mutate: M,
        mut rollback: B,
        on_mutate_failed: R,
        on_not_found: N,
    ) where
        D: Document,
        M: FnMut(&mut D) -> bool + Send + 'static,
        B: FnMut(&mut D) -> bool + Send + 'static,
        R: FnOnce() -> F + Send + 'static,
        N: FnOnce() -> F + Send + 'static,
    {
        self.push_update(
            id.into(),
            move |document: &mut D| mutate(document).then_some(()),
            move |document: &mut D, _: &()| rollback(document),
            Rejection::Fail(Box::new(on_mutate_failed)),
            on_not_found,
        );
    }

    /// Update a document, carrying a value from the mutation to its undo.
    ///
    /// `mutate` returns `None` for "nothing changed" (successful no-op) or
    /// `Some(carry)`, in which case the document is saved and `rollback`
    /// later receives the reloaded document together with `carry`.
    pub fn add_update_with_carry<D, C, M, B, N>(
        &mut self,
        id: impl Into<DocumentId>,
        mutate: M,
        rollback: B,
        on_not_found: N,
    ) where
        D: Document,
        C: Clone + Send + Sync + 'static,
        M: FnMut(&mut D) -> Option<C> + Send + 'static,
        B: FnMut(&mut D, &C) -> bool + Send + 'static,
        N: FnOnce() -> F + Send + 'static,
    {
        self.push_update(id.into(), mutate, rollback, Rejection::Ignore, on_not_found);
    }

    /// `add_update_with_carry`, failing with `on_mutate_failed` when `mutate`
    /// returns `None`
    pub fn add_update_with_carry_or_fail<D, C, M, B, R, N>(
        &mut self,
        id: impl Into<DocumentId>,
        mutate: M,
        rollback: B,
        on_mutate_failed: R,
        on_not_found: N,
    ) where
        D: Document,
        C: Clone + Send + Sync + 'static,
        M: FnMut(&mut D) -> Option<C> + Send + 'static,
        B: FnMut(&mut D, &C) -> bool + Send + 'static,
        R: FnOnce() -> F + Send + 'static,
        N: FnOnce() -> F + Send + 'static,
    {
        self.push_update(
            id.into(),
            mutate,
            rollback,
            Rejection::Fail(Box::new(on_mutate_failed)),
            on_not_found,
        );
    }

    /// Create a document; rollback deletes it again
    pub fn add_create<D, N>(&mut self, id: impl Into<DocumentId>, document: D, on_already_exists: N)
    where
        D: Document,
        N: FnOnce() -> F + Send + 'static,
    {
        let id = id.into();
        let repo = self.repository().clone();
        let label = format!("create {}/{}", D::COLLECTION, id);

        self.add_step(label, async move {
            match repo.create(&id, &document).await {
                Ok(CreateOutcome::Created) => {
                    Outcome::success(T::default(), delete_document::<D>(repo, id))
                }
                Ok(CreateOutcome::AlreadyExists) => Outcome::failure(on_already_exists()),
                Err(err) => Outcome::failure(F::from(err)),
            }
        });
    }

    /// Create or update a document.
    ///
    /// `is_valid_and_mutate` sees either the stored document or
    /// `D::default()`; returning false fails the step with `on_fail`. On
    /// rollback a freshly created document is deleted, a pre-existing one is
    /// reloaded and passed to `rollback` (saved if it returns true).
    pub fn add_create_or_update<D, M, B, N>(
        &mut self,
        id: impl Into<DocumentId>,
        mut is_valid_and_mutate: M,
        mut rollback: B,
        on_fail: N,
    ) where
        D: Document + Default,
        M: FnMut(&mut D) -> bool + Send + 'static,
        B: FnMut(&mut D) -> bool + Send + 'static,
        N: FnOnce() -> F + Send + 'static,
    {
        self.add_create_or_update_async(
            id,
            move |mut document: D| {
                let valid = is_valid_and_mutate(&mut document);
                ready((document, valid))
            },
            move |mut document: D| {
                let changed = rollback(&mut document);
                ready((document, changed))
            },
            on_fail,
        );
    }

    /// `add_create_or_update` with asynchronous callbacks.
    ///
    /// Both callbacks take the document by value and hand it back together
    /// with their verdict.
    pub fn add_create_or_update_async<D, M, MFut, B, BFut, N>(
        &mut self,
        id: impl Into<DocumentId>,
        mut is_valid_and_mutate: M,
        rollback: B,
        on_fail: N,
    ) where
        D: Document + Default,
        M: FnMut(D) -> MFut + Send + 'static,
        MFut: Future<Output = (D, bool)> + Send + 'static,
        B: FnMut(D) -> BFut + Send + 'static,
        BFut: Future<Output = (D, bool)> + Send + 'static,
        N: FnOnce() -> F + Send + 'static,
    {
        let id = id.into();
        let repo = self.repository().clone();
        let label = format!("upsert {}/{}", D::COLLECTION, id);

        self.add_step(label, async move {
            let saved = repo
                .create_or_update_async::<D, _, _, _>(&id, |created, document| {
                    let validated = is_valid_and_mutate(document);
                    async move {
                        let (document, valid) = validated.await;
                        let decision = if valid {
                            Decision::Apply(Some(created))
                        } else {
                            Decision::Skip(None)
                        };
                        (document, decision)
                    }
                })
                .await;

            match saved {
                Err(err) => Outcome::failure(F::from(err)),
                Ok(None) => Outcome::failure(on_fail()),
                Ok(Some(true)) => Outcome::success(T::default(), delete_document::<D>(repo, id)),
                Ok(Some(false)) => {
                    Outcome::success(T::default(), restore_upserted::<D, B, BFut>(repo, id, rollback))
                }
            }
        });
    }

    /// Require a document to exist without touching it
    pub fn add_checkup<D, N>(&mut self, id: impl Into<DocumentId>, on_does_not_exist: N)
    where
        D: Document,
        N: FnOnce() -> F + Send + 'static,
    {
        let id = id.into();
        let repo = self.repository().clone();
        let label = format!("checkup {}/{}", D::COLLECTION, id);

        self.add_step(label, async move {
            match repo.exists::<D>(&id).await {
                Ok(true) => Outcome::success(T::default(), Compensation::noop()),
                Ok(false) => Outcome::failure(on_does_not_exist()),
                Err(err) => Outcome::failure(F::from(err)),
            }
        });
    }

    fn push_update<D, C, M, B, N>(
        &mut self,
        id: DocumentId,
        mutate: M,
        rollback: B,
        rejection: Rejection<F>,
        on_not_found: N,
    ) where
        D: Document,
        C: Clone + Send + Sync + 'static,
        M: FnMut(&mut D) -> Option<C> + Send + 'static,
        B: FnMut(&mut D, &C) -> bool + Send + 'static,
        N: FnOnce() -> F + Send + 'static,
    {
        let label = format!("update {}/{}", D::COLLECTION, id);
        let step = update_step(
            self.repository().clone(),
            id,
            mutate,
            rollback,
            rejection,
            on_not_found,
        );
        self.add_step(label, async move { step.await.map_value(|_| T::default()) });
    }
}

/// Generic update step. Yields the carried value when the document changed.
pub(super) async fn update_step<F, D, C, M, B, N>(
    repo: Repository,
    id: DocumentId,
    mut mutate: M,
    rollback: B,
    rejection: Rejection<F>,
    on_not_found: N,
) -> Outcome<F, Option<C>>
where
    F: From<AppError>,
    D: Document,
    C: Clone + Send + Sync + 'static,
    M: FnMut(&mut D) -> Option<C> + Send,
    B: FnMut(&mut D, &C) -> bool + Send + 'static,
    N: FnOnce() -> F,
{
    let updated = repo
        .update::<D, _, _>(&id, |document| match mutate(document) {
            Some(carry) => Decision::Apply(Some(carry)),
            None => Decision::Skip(None),
        })
        .await;

    match updated {
        Err(err) => Outcome::failure(F::from(err)),
        Ok(None) => Outcome::failure(on_not_found()),
        Ok(Some(None)) => match rejection {
            Rejection::Ignore => Outcome::success(None, Compensation::noop()),
            Rejection::Fail(on_rejected) => Outcome::failure(on_rejected()),
        },
        Ok(Some(Some(carry))) => {
            let compensation = restore_updated::<D, C, B>(repo, id, carry.clone(), rollback);
            Outcome::success(Some(carry), compensation)
        }
    }
}

fn restore_updated<D, C, B>(repo: Repository, id: DocumentId, carry: C, mut rollback: B) -> Compensation
where
    D: Document,
    C: Send + Sync + 'static,
    B: FnMut(&mut D, &C) -> bool + Send + 'static,
{
    Compensation::new(async move {
        let restored = repo
            .update::<D, _, _>(&id, |document| {
                Decision::apply_if(rollback(document, &carry), ())
            })
            .await?;

        if restored.is_none() {
            DataInconsistency::new(D::COLLECTION, id, "document vanished before its update was undone")
                .report();
        }
        Ok(())
    })
}

fn restore_upserted<D, B, BFut>(repo: Repository, id: DocumentId, mut rollback: B) -> Compensation
where
    D: Document,
    B: FnMut(D) -> BFut + Send + 'static,
    BFut: Future<Output = (D, bool)> + Send + 'static,
{
    Compensation::new(async move {
        let restored = repo
            .update_async::<D, _, _, _>(&id, |document| {
                let reverted = rollback(document);
                async move {
                    let (document, changed) = reverted.await;
                    (document, Decision::apply_if(changed, ()))
                }
            })
            .await?;

        if restored.is_none() {
            DataInconsistency::new(D::COLLECTION, id, "document vanished before its upsert was undone")
                .report();
        }
        Ok(())
    })
}

fn delete_document<D: Document>(repo: Repository, id: DocumentId) -> Compensation {
    Compensation::new(async move {
        let removed = repo
            .delete_if::<D, _, _>(&id, |_| Decision::Apply(()))
            .await?;

        if removed.is_none() {
            DataInconsistency::new(D::COLLECTION, id, "created document was already gone at rollback")
                .report();
        }
        Ok(())
    })
}
