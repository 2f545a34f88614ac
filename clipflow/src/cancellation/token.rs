//! Run-scoped cancellation token for cooperative cancellation.

use crate::errors::StageError;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

const DEADLINE_REASON: &str = "run deadline exceeded";

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
    notify: Notify,
    deadline: Option<Instant>,
}

/// A token for cooperative cancellation of one run.
///
/// Clones share state. Cancellation is idempotent: only the first reason is
/// kept. An optional deadline cancels the token implicitly once it passes.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Creates a new cancellation token without a deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token that cancels itself at `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            inner: Arc::new(Inner {
                deadline: Some(deadline),
                ..Inner::default()
            }),
        }
    }

    /// Creates a token that cancels itself after `timeout`.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Returns the deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Requests cancellation with a reason and wakes every waiter.
    ///
    /// The reason is stored before the flag is published, so any caller
    /// that observes the token as cancelled also sees its reason.
    pub fn cancel(&self, reason: impl Into<String>) {
        {
            let mut slot = self.inner.reason.write();
            if slot.is_some() {
                return;
            }
            let reason = reason.into();
            debug!(reason = %reason, "run cancelled");
            *slot = Some(reason);
            self.inner.cancelled.store(true, Ordering::SeqCst);
        }
        self.inner.notify.notify_waiters();
    }

    /// Returns whether cancellation has been requested or the deadline passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        if self.inner.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.cancel(DEADLINE_REASON);
                true
            }
            _ => false,
        }
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason_if_cancelled()
    }

    fn reason_if_cancelled(&self) -> Option<String> {
        self.is_cancelled().then(|| self.stored_reason())
    }

    fn stored_reason(&self) -> String {
        self.inner
            .reason
            .read()
            .clone()
            .unwrap_or_else(|| "cancelled".to_string())
    }

    /// Completes once the token is cancelled or its deadline passes.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_cancelled() {
                return;
            }

            match self.inner.deadline {
                Some(deadline) => {
                    tokio::select! {
                        () = &mut notified => {}
                        () = tokio::time::sleep_until(deadline) => {
                            self.cancel(DEADLINE_REASON);
                        }
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Returns a `Cancelled` stage error if the token has fired.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Cancelled`] once cancelled.
    pub fn check(&self) -> Result<(), StageError> {
        match self.reason_if_cancelled() {
            Some(reason) => Err(StageError::cancelled(reason)),
            None => Ok(()),
        }
    }

    /// Runs `fut` unless the token fires first, in which case `fut` is
    /// dropped and a `Cancelled` error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Cancelled`] when cancelled.
    pub async fn run_until_cancelled<F, T>(&self, fut: F) -> Result<T, StageError>
    where
        F: Future<Output = T>,
    {
        self.check()?;
        tokio::select! {
            biased;
            () = self.cancelled() => Err(self.cancelled_error()),
            value = fut => Ok(value),
        }
    }

    /// Sleeps for `duration` unless the token fires first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Cancelled`] when cancelled.
    pub async fn sleep(&self, duration: Duration) -> Result<(), StageError> {
        self.run_until_cancelled(tokio::time::sleep(duration)).await
    }

    fn cancelled_error(&self) -> StageError {
        StageError::cancelled(self.stored_reason())
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_token_default_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
        assert!(token.check().is_ok());
    }

    #[test]
    fn test_token_cancel_idempotent() {
        let token = CancellationToken::new();
        token.cancel("First reason");
        token.cancel("Second reason");

        assert_eq!(token.reason(), Some("First reason".to_string()));
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel("ctrl-c");

        assert!(token.is_cancelled());
        let err = token.check().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert_eq!(err.message, "ctrl-c");
    }

    #[test]
    fn test_concurrent_cancel_always_reports_reason() {
        for _ in 0..200 {
            let token = CancellationToken::new();
            let canceller = token.clone();
            let handle = std::thread::spawn(move || canceller.cancel("shutdown"));
            loop {
                if let Err(err) = token.check() {
                    assert_eq!(err.message, "shutdown");
                    break;
                }
                std::thread::yield_now();
            }
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_cancelled_wakes_waiter() {
        let token = CancellationToken::new();
        let mut waiter = tokio_test::task::spawn(token.cancelled());
        tokio_test::assert_pending!(waiter.poll());

        token.cancel("ctrl-c");
        assert!(waiter.is_woken());
        tokio_test::assert_ready!(waiter.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels() {
        let token = CancellationToken::with_timeout(Duration::from_secs(5));
        assert!(!token.is_cancelled());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(token.is_cancelled());
        assert_eq!(token.reason().as_deref(), Some(DEADLINE_REASON));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellable_sleep() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel("stop");
        });

        let started = Instant::now();
        let err = token.sleep(Duration::from_secs(60)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_cancelled_deadline() {
        let token = CancellationToken::with_timeout(Duration::from_secs(2));
        let result = token
            .run_until_cancelled(tokio::time::sleep(Duration::from_secs(30)))
            .await;

        assert_eq!(result.unwrap_err().message, DEADLINE_REASON);
    }

    #[tokio::test]
    async fn test_run_until_cancelled_completes() {
        let token = CancellationToken::new();
        let value = token.run_until_cancelled(async { 7 }).await.unwrap();
        assert_eq!(value, 7);
    }
}
