//! Request-scoped context carried by every lookup.
//!
//! A [`RequestContext`] is cheap to clone and immutable once built: it pairs a
//! request id with a cancellation token and an optional deadline. Derived
//! contexts from [`RequestContext::child`] observe their parent's cancellation
//! but can be cancelled on their own without touching the parent.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ContextError;

/// Cancellation and deadline scope for one logical request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: Uuid,
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    /// Create a fresh context with no deadline.
    pub fn new() -> Self {
        Self {
            request_id: Uuid::now_v7(),
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Create a fresh context that expires after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().with_deadline(Instant::now() + timeout)
    }

    /// Return a copy of this context bounded by `deadline`.
    ///
    /// An existing earlier deadline is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// Derive a child context sharing this request id.
    ///
    /// Cancelling the parent cancels the child; cancelling the child leaves
    /// the parent running.
    pub fn child(&self) -> Self {
        Self {
            request_id: self.request_id,
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derive a child context with an additional timeout.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        self.child().with_deadline(Instant::now() + timeout)
    }

    /// The id of the request this context belongs to.
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// The deadline, if one was set.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and every child derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True once the context has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The error this context has already ended with, if any.
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Wait until the context ends, returning why.
    ///
    /// Never resolves for a context without deadline that is never cancelled.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => ContextError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                ContextError::Cancelled
            }
        }
    }

    /// Sleep for `duration`, returning early if the context ends first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), ContextError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            err = self.done() => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_propagates_to_child_only() {
        let parent = RequestContext::new();
        let child = parent.child();
        let sibling = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
        assert!(!sibling.is_cancelled());

        parent.cancel();
        assert!(sibling.is_cancelled());
        assert_eq!(sibling.done().await, ContextError::Cancelled);
        assert_eq!(child.request_id(), parent.request_id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let ctx = RequestContext::with_timeout(Duration::from_millis(10));
        assert!(ctx.err().is_none());
        assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_deadline_wins() {
        let ctx = RequestContext::with_timeout(Duration::from_millis(5));
        let child = ctx.child_with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), ctx.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_cancel() {
        let ctx = RequestContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            canceller.cancel();
        });

        let res = ctx.sleep(Duration::from_secs(60)).await;
        assert_eq!(res, Err(ContextError::Cancelled));
    }
}
