// Step outcome model

use crate::error::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;

/// Undo action of a successful step.
///
/// Lazy: nothing runs until `run` is awaited. A compensation that is dropped
/// (commit path) performs no work.
pub struct Compensation {
    action: Option<BoxFuture<'static, Result<()>>>,
}

impl Compensation {
    pub fn new<Fut>(action: Fut) -> Self
    where
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            action: Some(action.boxed()),
        }
    }

    /// Compensation for a step that changed nothing
    pub fn noop() -> Self {
        Self { action: None }
    }

    pub fn is_noop(&self) -> bool {
        self.action.is_none()
    }

    pub async fn run(self) -> Result<()> {
        match self.action {
            Some(action) => action.await,
            None => Ok(()),
        }
    }
}

impl Default for Compensation {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Debug for Compensation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compensation")
            .field("noop", &self.is_noop())
            .finish()
    }
}

/// Result of one transaction step
#[derive(Debug)]
pub enum Outcome<F, T = ()> {
    /// The mutation happened; `compensation` undoes it
    Success { value: T, compensation: Compensation },
    /// The step did not mutate anything
    Failure { reason: F },
}

impl<F, T> Outcome<F, T> {
    pub fn success(value: T, compensation: Compensation) -> Self {
        Outcome::Success {
            value,
            compensation,
        }
    }

    pub fn failure(reason: F) -> Self {
        Outcome::Failure { reason }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure { .. })
    }

    pub fn map_value<U>(self, f: impl FnOnce(T) -> U) -> Outcome<F, U> {
        match self {
            Outcome::Success {
                value,
                compensation,
            } => Outcome::Success {
                value: f(value),
                compensation,
            },
            Outcome::Failure { reason } => Outcome::Failure { reason },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_noop_compensation_runs_cleanly() {
        let compensation = Compensation::noop();
        assert!(compensation.is_noop());
        assert!(compensation.run().await.is_ok());
    }

    #[tokio::test]
    async fn test_compensation_is_lazy() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let compensation = Compensation::new(async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        assert!(!ran.load(Ordering::SeqCst));
        drop(compensation);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_compensation_runs_action() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let compensation = Compensation::new(async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        compensation.run().await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_map_value_keeps_failure() {
        let outcome: Outcome<&str, i32> = Outcome::failure("boom");
        let mapped = outcome.map_value(|v| v * 2);
        assert!(mapped.is_failure());

        let outcome: Outcome<&str, i32> = Outcome::success(21, Compensation::noop());
        match outcome.map_value(|v| v * 2) {
            Outcome::Success { value, .. } => assert_eq!(value, 42),
            Outcome::Failure { .. } => panic!("expected success"),
        }
    }
}
