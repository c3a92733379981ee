//! Operation context: cancellation plus an optional deadline.

use crate::error::{Error, Result};
use std::future::Future;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Carries a cancellation token and an optional deadline for one cache
/// operation. Cloning shares the token; [`OpContext::detach`] derives a
/// context that keeps the deadline but answers to a fresh token.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires after the given duration.
    pub fn with_timeout(timeout: std::time::Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// A context that expires at the given instant.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel the context. All clones observe the cancellation.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Derive a context that preserves this context's deadline but carries
    /// an independent cancellation token. Used for work that must outlive
    /// the originating request, such as a download still streaming to a
    /// consumer after the request's own lifecycle ends.
    pub fn detach(&self) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: self.deadline,
        }
    }

    /// The cancellation condition currently in effect, if any. Cancellation
    /// takes precedence over deadline expiry.
    pub fn error(&self) -> Option<Error> {
        if self.token.is_cancelled() {
            return Some(Error::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Some(Error::DeadlineExceeded);
            }
        }
        None
    }

    /// Resolves when the context is cancelled or its deadline elapses.
    /// Never resolves for a background context.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Run a future to completion unless the context fires first, in which
    /// case the cancellation condition is returned unwrapped.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        if let Some(err) = self.error() {
            return Err(err);
        }
        tokio::select! {
            out = fut => Ok(out),
            _ = self.done() => Err(self.error().unwrap_or(Error::Cancelled)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_background_runs_to_completion() {
        let ctx = OpContext::background();
        let out = ctx.run(async { 7 }).await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test]
    async fn test_cancel_returns_cancelled() {
        let ctx = OpContext::background();
        ctx.cancel();
        let out = ctx.run(std::future::pending::<()>()).await;
        assert_eq!(out, Err(Error::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_returns_deadline_exceeded() {
        let ctx = OpContext::with_timeout(Duration::from_millis(10));
        let out = ctx.run(std::future::pending::<()>()).await;
        assert_eq!(out, Err(Error::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_keeps_deadline_but_not_cancellation() {
        let ctx = OpContext::with_timeout(Duration::from_secs(5));
        let detached = ctx.detach();
        ctx.cancel();
        assert_eq!(ctx.error(), Some(Error::Cancelled));
        assert_eq!(detached.error(), None);
        assert_eq!(detached.deadline(), ctx.deadline());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(detached.error(), Some(Error::DeadlineExceeded));
    }
}
