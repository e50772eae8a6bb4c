//! Cancellation handle for restartable bootstrap attempts.
//!
//! A [`CancelToken`] is an explicit, shareable abort flag. Every suspension
//! point in the bootstrap sequence checks it before proceeding and before
//! committing results, so a superseded attempt stops cheaply and never
//! publishes a stale instance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::SessionError;

/// Shareable cancellation token. Cloning yields a handle to the same flag.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    aborted: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent; wakes any waiters.
    pub fn cancel(&self) {
        self.inner.aborted.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }

    /// Fail fast with the distinguished cancellation error if cancellation
    /// has been requested.
    pub fn check(&self) -> Result<(), SessionError> {
        if self.is_cancelled() {
            Err(SessionError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Wait until cancellation is requested.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.inner.notify.notified();
            // Re-check after arming the waiter so a cancel between the loop
            // condition and `notified()` cannot be missed.
            if self.is_cancelled() {
                break;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
