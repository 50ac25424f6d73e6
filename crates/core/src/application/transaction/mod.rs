// Compensating transaction coordinator
//
// Runs independent single-document steps in parallel. If any step fails,
// every step that succeeded is undone through its compensation.

mod builders;
mod join;
mod outcome;

pub use outcome::{Compensation, Outcome};

use crate::application::Repository;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::future::Future;
use tracing::{debug, error, info, warn};

struct Step<F, T> {
    label: String,
    future: BoxFuture<'static, Outcome<F, T>>,
}

/// A set of document mutations that either all stay applied or are all undone.
///
/// Steps are registered in insertion order but executed concurrently, so no
/// step may rely on another step's write being visible. `T` is the value
/// each successful step yields (`()` for most transactions).
///
/// The transaction is consumed by execution; it cannot run twice.
///
/// # Example
/// ```text
/// let mut tx = Transaction::<StepFailure>::new(repo);
/// tx.add_update::<Account, _, _, _>(
///     "acct-1",
///     |a| { a.balance -= 10; true },
///     |a| { a.balance += 10; true },
///     || StepFailure::not_found("accounts", "acct-1"),
/// );
/// tx.add_create("ledger-7", entry, || StepFailure::already_exists("ledger", "ledger-7"));
/// let result = tx.execute(|| Ok(()), Err).await;
/// ```
pub struct Transaction<F, T = ()> {
    repo: Repository,
    steps: Vec<Step<F, T>>,
}

impl<F, T> Transaction<F, T>
where
    F: Send + 'static,
    T: Send + 'static,
{
    pub fn new(repo: Repository) -> Self {
        Self {
            repo,
            steps: Vec::new(),
        }
    }

    /// Repository the built-in steps run against
    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Number of registered steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Register a custom step.
    ///
    /// The future must attempt exactly one mutation and report it. It is
    /// not polled until the transaction executes.
    pub fn add_step<Fut>(&mut self, label: impl Into<String>, step: Fut)
    where
        Fut: Future<Output = Outcome<F, T>> + Send + 'static,
    {
        self.steps.push(Step {
            label: label.into(),
            future: step.boxed(),
        });
    }

    /// Execute all steps and map the result into a single terminal value
    pub async fn execute<R>(
        self,
        on_success: impl FnOnce() -> R,
        on_failure: impl FnOnce(F) -> R,
    ) -> R {
        self.execute_with(|_| on_success(), on_failure).await
    }

    /// `execute`, handing the successful steps' values (in registration
    /// order) to `on_success`
    pub async fn execute_with<R>(
        self,
        on_success: impl FnOnce(Vec<T>) -> R,
        on_failure: impl FnOnce(F) -> R,
    ) -> R {
        match self.run().await {
            Ok(values) => on_success(values),
            Err(reason) => on_failure(reason),
        }
    }

    /// Execute all steps.
    ///
    /// Every step is spawned onto the tokio runtime and awaited. When all
    /// succeed their compensations are dropped and the step values are
    /// returned. Otherwise the failure of the lowest-indexed failing step is
    /// returned after every successful step has been compensated.
    /// Compensation errors are logged, never returned.
    ///
    /// # Panics
    /// Must be called within a tokio runtime. If a step panics, the other
    /// steps are compensated and the panic is then resumed. If a step task is
    /// cancelled without failing (its runtime shut down while the step was in
    /// flight), the other steps are compensated and `run` panics, since there
    /// is no failure value of type `F` to return.
    pub async fn run(self) -> Result<Vec<T>, F> {
        let step_count = self.steps.len();
        if step_count == 0 {
            debug!("Empty transaction, nothing to execute");
            return Ok(Vec::new());
        }

        info!(steps = step_count, "Executing transaction");

        let (labels, handles): (Vec<String>, Vec<_>) = self
            .steps
            .into_iter()
            .map(|step| (step.label, tokio::spawn(step.future)))
            .unzip();
        let joined = join_all(handles).await;

        let mut values = Vec::with_capacity(step_count);
        let mut compensations = Vec::with_capacity(step_count);
        let mut failure = None;
        let mut panic_payload = None;
        let mut aborted = false;

        for (index, (label, result)) in labels.into_iter().zip(joined).enumerate() {
            match result {
                Ok(Outcome::Success {
                    value,
                    compensation,
                }) => {
                    debug!(step = index, label = %label, "Step succeeded");
                    values.push(value);
                    compensations.push((label, compensation));
                }
                Ok(Outcome::Failure { reason }) => {
                    warn!(step = index, label = %label, "Step failed");
                    if failure.is_none() {
                        failure = Some(reason);
                    }
                }
                Err(join_error) => {
                    error!(step = index, label = %label, error = %join_error, "Step task aborted");
                    aborted = true;
                    if panic_payload.is_none() && join_error.is_panic() {
                        panic_payload = Some(join_error.into_panic());
                    }
                }
            }
        }

        if failure.is_none() && !aborted {
            // Commit: compensations are dropped without running
            info!(steps = step_count, "Transaction committed");
            return Ok(values);
        }

        compensate(compensations).await;

        if let Some(payload) = panic_payload {
            std::panic::resume_unwind(payload);
        }

        match failure {
            Some(reason) => {
                info!(steps = step_count, "Transaction rolled back");
                Err(reason)
            }
            None => {
                error!(steps = step_count, "Transaction step cancelled without an outcome");
                panic!("transaction step was cancelled before reporting an outcome")
            }
        }
    }
}

/// Run compensations concurrently; failures are reported, not propagated
async fn compensate(compensations: Vec<(String, Compensation)>) {
    let (labels, handles): (Vec<String>, Vec<_>) = compensations
        .into_iter()
        .filter(|(_, compensation)| !compensation.is_noop())
        .map(|(label, compensation)| (label, tokio::spawn(compensation.run())))
        .unzip();

    info!(compensations = handles.len(), "Compensating successful steps");

    let mut failed = 0usize;
    for (label, result) in labels.into_iter().zip(join_all(handles).await) {
        match result {
            Ok(Ok(())) => debug!(label = %label, "Step compensated"),
            Ok(Err(e)) => {
                failed += 1;
                warn!(
                    label = %label,
                    error = %e,
                    "Compensation failed, document may be left inconsistent"
                );
            }
            Err(join_error) => {
                failed += 1;
                error!(label = %label, error = %join_error, "Compensation task aborted");
            }
        }
    }

    if failed > 0 {
        warn!(failed = failed, "Rollback finished with failed compensations");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::fixtures::memory_repository;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Barrier;

    fn counted_success(counter: &Arc<AtomicUsize>) -> Outcome<&'static str> {
        let counter = Arc::clone(counter);
        Outcome::success(
            (),
            Compensation::new(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
    }

    #[tokio::test]
    async fn test_empty_transaction_succeeds() {
        let (_store, repo) = memory_repository();
        let tx = Transaction::<&str>::new(repo);
        assert!(tx.is_empty());

        let result = tx.execute(|| "ok", |reason| reason).await;
        assert_eq!(result, "ok");
    }

    #[tokio::test]
    async fn test_commit_never_runs_compensations() {
        let (_store, repo) = memory_repository();
        let compensated = Arc::new(AtomicUsize::new(0));
        let mut tx = Transaction::<&str>::new(repo);

        for i in 0..3 {
            let outcome = counted_success(&compensated);
            tx.add_step(format!("step {}", i), async move { outcome });
        }
        assert_eq!(tx.len(), 3);

        let result = tx.execute(|| Ok(()), Err).await;
        assert!(result.is_ok());
        assert_eq!(compensated.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_compensates_every_success_once() {
        let (_store, repo) = memory_repository();
        let compensated = Arc::new(AtomicUsize::new(0));
        let mut tx = Transaction::<&str>::new(repo);

        let first = counted_success(&compensated);
        tx.add_step("first", async move { first });
        tx.add_step("failing", async { Outcome::failure("boom") });
        let second = counted_success(&compensated);
        tx.add_step("second", async move { second });

        let result: Result<(), String> = tx
            .execute(|| Ok(()), |reason| Err(format!("mapped: {}", reason)))
            .await;

        assert_eq!(result, Err("mapped: boom".to_string()));
        assert_eq!(compensated.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_lowest_index_failure_is_reported() {
        let (_store, repo) = memory_repository();
        let mut tx = Transaction::<&str>::new(repo);

        tx.add_step("slow failure", async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Outcome::failure("first")
        });
        tx.add_step("fast failure", async { Outcome::failure("second") });

        assert_eq!(tx.run().await.unwrap_err(), "first");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_steps_run_concurrently() {
        let (_store, repo) = memory_repository();
        let barrier = Arc::new(Barrier::new(3));
        let mut tx = Transaction::<&str>::new(repo);

        // Each step blocks until all three are in flight
        for i in 0..3 {
            let barrier = Arc::clone(&barrier);
            tx.add_step(format!("rendezvous {}", i), async move {
                barrier.wait().await;
                Outcome::success((), Compensation::noop())
            });
        }

        let result = tokio::time::timeout(Duration::from_secs(5), tx.run()).await;
        assert!(result.expect("steps were serialized").is_ok());
    }

    #[tokio::test]
    async fn test_compensation_errors_are_swallowed() {
        let (_store, repo) = memory_repository();
        let compensated = Arc::new(AtomicUsize::new(0));
        let mut tx = Transaction::<&str>::new(repo);

        tx.add_step("broken undo", async {
            Outcome::success(
                (),
                Compensation::new(async { Err(AppError::Database("disk on fire".to_string())) }),
            )
        });
        let healthy = counted_success(&compensated);
        tx.add_step("healthy undo", async move { healthy });
        tx.add_step("failing", async { Outcome::failure("boom") });

        let result = tx.execute(|| "committed", |reason| reason).await;
        assert_eq!(result, "boom");
        assert_eq!(compensated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_step_values_follow_registration_order() {
        let (_store, repo) = memory_repository();
        let mut tx = Transaction::<&str, u32>::new(repo);

        tx.add_step("a", async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Outcome::success(1, Compensation::noop())
        });
        tx.add_step("b", async { Outcome::success(2, Compensation::noop()) });

        let values = tx.execute_with(|values| values, |_| Vec::new()).await;
        assert_eq!(values, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_panicking_step_is_compensated_then_resumed() {
        let (_store, repo) = memory_repository();
        let compensated = Arc::new(AtomicUsize::new(0));
        let mut tx = Transaction::<&str>::new(repo);

        let ok = counted_success(&compensated);
        tx.add_step("ok", async move { ok });
        tx.add_step("panics", async {
            if true {
                panic!("step exploded");
            }
            Outcome::failure("unreachable")
        });

        let joined = tokio::spawn(tx.run()).await;
        assert!(joined.unwrap_err().is_panic());
        assert_eq!(compensated.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancelled_step_panics() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let handle = runtime.handle().clone();
        let (_store, repo) = memory_repository();

        let coordinator = std::thread::spawn(move || {
            let _guard = handle.enter();
            let mut tx = Transaction::<&str>::new(repo);
            tx.add_step("never finishes", async {
                std::future::pending::<Outcome<&'static str>>().await
            });
            futures::executor::block_on(tx.run())
        });

        std::thread::sleep(Duration::from_millis(50));
        runtime.shutdown_background();

        let payload = coordinator.join().unwrap_err();
        assert_eq!(
            payload.downcast_ref::<&str>(),
            Some(&"transaction step was cancelled before reporting an outcome")
        );
    }
}
