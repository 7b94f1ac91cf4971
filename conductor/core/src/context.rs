//! Turn Context
//!
//! A `TurnContext` is the single cancellation scope of a turn. It carries a
//! cancel signal and an optional deadline, and is threaded explicitly through
//! every core call. Code checks it at suspension points and returns early;
//! a cancelled turn is never reported as an error.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation scope for one turn
#[derive(Clone, Debug, Default)]
pub struct TurnContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl TurnContext {
    /// Create a fresh, live scope with no deadline
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scope that also expires after `timeout`
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Derive a child scope: cancelled when this one is, but cancellable on its own
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancel this scope (and all children)
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the scope was cancelled or its deadline passed
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Deadline of this scope, if any
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolves once the scope is cancelled or the deadline passes
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.token.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Run `fut` unless the scope is cancelled first
    ///
    /// Returns `None` when cancellation won the race.
    pub async fn run<F: Future>(&self, fut: F) -> Option<F::Output> {
        if self.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            () = self.cancelled() => None,
            out = fut => Some(out),
        }
    }

    /// The underlying token, for collaborators that select on it directly
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
