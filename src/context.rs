use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("request is cancelled")]
    Cancelled,

    #[error("deadline is exceeded")]
    DeadlineExceeded,
}

/// Liveness state of one in-flight call.
///
/// Clones share the cancellation flag, so the transport can keep one handle
/// and cancel while a handler polls another.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self { cancelled: Arc::default(), deadline: Some(deadline) }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Wire form: `None` means no deadline.
    pub fn from_timeout_ms(timeout_ms: Option<u64>) -> Self {
        match timeout_ms {
            Some(ms) => Self::with_timeout(Duration::from_millis(ms)),
            None => Self::new(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Cancellation wins over an expired deadline.
    pub fn check(&self) -> Result<(), ContextError> {
        if self.is_cancelled() {
            return Err(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(ContextError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Drives `fut` until it finishes or the deadline passes, whichever
    /// comes first. Without a deadline this is a plain await.
    pub async fn bounded<F: Future>(&self, fut: F) -> Result<F::Output, ContextError> {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), fut)
            .await
            .map_err(|_| ContextError::DeadlineExceeded),
            None => Ok(fut.await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_is_live() {
        assert_eq!(CallContext::new().check(), Ok(()));
        assert_eq!(CallContext::from_timeout_ms(Some(60_000)).check(), Ok(()));
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let ctx = CallContext::new();
        let handle = ctx.clone();
        handle.cancel();
        assert_eq!(ctx.check(), Err(ContextError::Cancelled));
    }

    #[test]
    fn expired_deadline_is_reported() {
        let ctx = CallContext::with_deadline(Instant::now() - Duration::from_millis(1));
        assert_eq!(ctx.check(), Err(ContextError::DeadlineExceeded));
        ctx.cancel();
        assert_eq!(ctx.check(), Err(ContextError::Cancelled));
    }

    #[tokio::test]
    async fn bounded_stops_a_stalled_future_at_the_deadline() {
        let ctx = CallContext::with_timeout(Duration::from_millis(50));
        let started = Instant::now();
        let result = ctx.bounded(std::future::pending::<()>()).await;
        assert_eq!(result, Err(ContextError::DeadlineExceeded));
        assert!(started.elapsed() < Duration::from_secs(5));

        assert_eq!(CallContext::new().bounded(async { 7 }).await, Ok(7));
    }
}
