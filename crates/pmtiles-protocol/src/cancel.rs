//! Cooperative cancellation for in-flight reads

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

use crate::error::{SourceError, SourceResult};

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cancellation token shared between a caller and the reads it starts
///
/// Cloning yields a handle to the same token. Cancelling is permanent.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Create a new, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the operation and wake every waiter
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Check if the operation has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Wait until the token is cancelled
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent cancel is not missed
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Run `fut` unless `cancel` fires first
///
/// Returns [`SourceError::Cancelled`] without polling `fut` when the token is
/// already cancelled.
pub async fn with_cancel<T, F>(cancel: Option<&CancellationToken>, fut: F) -> SourceResult<T>
where
    F: Future<Output = SourceResult<T>>,
{
    let Some(token) = cancel else {
        return fut.await;
    };
    if token.is_cancelled() {
        return Err(SourceError::Cancelled);
    }
    tokio::select! {
        biased;
        () = token.cancelled() => Err(SourceError::Cancelled),
        result = fut => result,
    }
}
