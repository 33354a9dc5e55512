//! Per-session shared context: identity, cancellation, and task tracking.
//!
//! Every task a session launches receives a clone of the same
//! [`SessionContext`] at construction time.  Nothing here is global: two
//! sessions always have independent contexts, so cancelling one never touches
//! another.
//!
//! The cancellation signal is a [`CancellationToken`] (idempotent, monotonic,
//! safe to trigger from any task).  Tasks are spawned through
//! [`SessionContext::spawn`], which registers them with a [`TaskTracker`] so
//! the session bridge can wait for *all* of them, not just the process.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::domain::SessionId;

/// Cloneable handle to one session's shared state.
#[derive(Debug, Clone)]
pub struct SessionContext {
    id: SessionId,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl SessionContext {
    /// Creates a context whose cancellation is independent of everything else.
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Creates a context cancelled together with `parent`.
    ///
    /// The server passes its shutdown token here so Ctrl+C ends every live
    /// session.  Cancelling the session does not cancel the parent.
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self::with_token(parent.child_token())
    }

    fn with_token(cancel: CancellationToken) -> Self {
        Self {
            id: SessionId::new(),
            cancel,
            tracker: TaskTracker::new(),
        }
    }

    /// Returns the session id used in log lines.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Triggers the session's cancellation signal.  Idempotent.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            debug!("session {}: cancellation triggered", self.id);
        }
        self.cancel.cancel();
    }

    /// Returns `true` once the session has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the session is cancelled.  Use inside `tokio::select!`.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Returns a clone of the cancellation token for code that only needs the
    /// signal (e.g. the router).
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawns a task registered with the session's completion tracker.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(task)
    }

    /// Number of tracked tasks still running.
    pub fn live_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Waits until every tracked task has finished.
    ///
    /// Closes the tracker first; tasks spawned afterwards are still tracked,
    /// but the wait can complete once the count reaches zero.
    pub async fn wait_for_tasks(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_is_idempotent() {
        let ctx = SessionContext::new();
        assert!(!ctx.is_cancelled());
        ctx.cancel();
        ctx.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_clones_share_the_signal() {
        let ctx = SessionContext::new();
        let clone = ctx.clone();
        clone.cancel();
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.id(), clone.id());
    }

    #[test]
    fn test_sessions_are_independent() {
        let a = SessionContext::new();
        let b = SessionContext::new();
        a.cancel();
        assert!(!b.is_cancelled());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_parent_cancels_child_but_not_reverse() {
        let server = CancellationToken::new();

        let first = SessionContext::child_of(&server);
        first.cancel();
        assert!(!server.is_cancelled());

        let second = SessionContext::child_of(&server);
        server.cancel();
        assert!(second.is_cancelled());
    }

    #[tokio::test]
    async fn test_wait_for_tasks_waits_for_every_task() {
        // Arrange: two tasks that only finish on cancellation
        let ctx = SessionContext::new();
        for _ in 0..2 {
            let task_ctx = ctx.clone();
            ctx.spawn(async move { task_ctx.cancelled().await });
        }
        assert_eq!(ctx.live_tasks(), 2);

        // Act / Assert: the wait does not finish while the tasks are live
        let early = tokio::time::timeout(Duration::from_millis(20), ctx.wait_for_tasks()).await;
        assert!(early.is_err());

        ctx.cancel();
        tokio::time::timeout(Duration::from_secs(1), ctx.wait_for_tasks())
            .await
            .expect("all tasks must finish after cancellation");
        assert_eq!(ctx.live_tasks(), 0);
    }
}
