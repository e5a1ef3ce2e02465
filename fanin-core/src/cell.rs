//! Single-assignment result slot for one (identifier, parameter) pair.

use std::sync::{Arc, OnceLock};

use tokio::sync::Notify;

use crate::context::RequestContext;
use crate::error::{LoadError, LoadResult};

/// What a completed cell holds: the value if the bulk fetch returned one,
/// `None` if it did not, or the error that failed its batch.
pub type Outcome<V, E> = LoadResult<Option<Arc<V>>, E>;

/// Completion slot shared by the fetcher and every caller waiting on one key.
///
/// The outcome is written at most once; later writes are ignored and the
/// first outcome is what every waiter sees.
#[derive(Debug)]
pub struct ResultCell<V, E> {
    outcome: OnceLock<Outcome<V, E>>,
    done: Notify,
}

impl<V, E> Default for ResultCell<V, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E> ResultCell<V, E> {
    /// Create an empty, pending cell.
    pub fn new() -> Self {
        Self {
            outcome: OnceLock::new(),
            done: Notify::new(),
        }
    }

    /// True once the cell has an outcome.
    pub fn is_complete(&self) -> bool {
        self.outcome.get().is_some()
    }

    /// Peek at the outcome without waiting.
    pub fn outcome(&self) -> Option<&Outcome<V, E>> {
        self.outcome.get()
    }

    /// Complete the cell with a found value.
    pub fn resolve_value(&self, value: Arc<V>) -> bool {
        self.complete(Ok(Some(value)))
    }

    /// Complete the cell as absent: fetched, but nothing matched.
    pub fn resolve_absent(&self) -> bool {
        self.complete(Ok(None))
    }

    /// Complete the cell with an error.
    pub fn resolve_err(&self, err: LoadError<E>) -> bool {
        self.complete(Err(err))
    }

    /// Write the outcome and wake every waiter.
    ///
    /// Returns false if the cell was already complete.
    pub fn complete(&self, outcome: Outcome<V, E>) -> bool {
        if self.outcome.set(outcome).is_err() {
            return false;
        }
        self.done.notify_waiters();
        true
    }
}

impl<V, E: Clone> ResultCell<V, E> {
    /// Wait for the outcome, or for `ctx` to end.
    ///
    /// Ending `ctx` only releases this caller; the cell is still completed by
    /// its batch for everyone else.
    pub async fn wait(&self, ctx: &RequestContext) -> Outcome<V, E> {
        loop {
            // Registered before the check so a completion in between is not lost.
            let notified = self.done.notified();
            if let Some(outcome) = self.outcome.get() {
                return outcome.clone();
            }
            if let Some(err) = ctx.err() {
                return Err(err.into());
            }

            tokio::select! {
                biased;
                _ = notified => continue,
                err = ctx.done() => return Err(err.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ContextError;
    use std::time::Duration;

    type Cell = ResultCell<String, String>;

    #[tokio::test]
    async fn test_first_outcome_wins() {
        let cell = Cell::new();
        assert!(cell.resolve_value(Arc::new("a".to_string())));
        assert!(!cell.resolve_err(LoadError::Fetch("late".to_string())));
        assert!(!cell.resolve_absent());

        let got = cell.wait(&RequestContext::new()).await;
        assert_eq!(got.unwrap().as_deref().map(String::as_str), Some("a"));
    }

    #[tokio::test]
    async fn test_waiters_wake_on_completion() {
        let cell = Arc::new(Cell::new());
        let mut waiters = Vec::new();
        for _ in 0..4 {
            let cell = Arc::clone(&cell);
            waiters.push(tokio::spawn(async move {
                cell.wait(&RequestContext::new()).await
            }));
        }

        tokio::task::yield_now().await;
        cell.resolve_err(LoadError::Fetch("boom".to_string()));

        for w in waiters {
            let res = w.await.unwrap();
            assert_eq!(res, Err(LoadError::Fetch("boom".to_string())));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_without_completing() {
        let cell = Cell::new();
        let ctx = RequestContext::with_timeout(Duration::from_millis(5));

        let res = cell.wait(&ctx).await;
        assert_eq!(res, Err(LoadError::Context(ContextError::DeadlineExceeded)));
        assert!(!cell.is_complete());

        cell.resolve_absent();
        assert_eq!(cell.wait(&RequestContext::new()).await, Ok(None));
    }

    #[tokio::test]
    async fn test_completed_cell_beats_cancelled_context() {
        let cell = Cell::new();
        cell.resolve_absent();

        let ctx = RequestContext::new();
        ctx.cancel();
        assert_eq!(cell.wait(&ctx).await, Ok(None));
    }
}
