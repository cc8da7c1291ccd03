//! Signal-of-Stop: cooperative cancellation primitive.
//!
//! Backs every cancellable object in the session core: signaling
//! subscriptions, background watchers and in-flight outbound transfers.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A cooperative cancellation token.
///
/// Clones share the same underlying state, so cancelling any clone
/// notifies all waiters.
#[derive(Debug, Default, Clone)]
pub struct SignalOfStop {
    internal: Arc<SharedState>,
}

#[derive(Debug, Default)]
struct SharedState {
    closing: AtomicBool,
    notify: Notify,
}

impl SignalOfStop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to all waiters. Idempotent.
    pub fn cancel(&self) {
        self.internal.closing.store(true, Ordering::Release);
        self.internal.notify.notify_waiters();
    }

    /// Whether `other` is a clone of this token.
    pub fn same_as(&self, other: &SignalOfStop) -> bool {
        Arc::ptr_eq(&self.internal, &other.internal)
    }

    pub fn cancelled(&self) -> bool {
        self.internal.closing.load(Ordering::Acquire)
    }

    /// Wait for cancellation. Returns immediately if already cancelled.
    pub async fn wait(&self) {
        let notified = self.internal.notify.notified();
        tokio::pin!(notified);
        // Register before the flag check so a concurrent cancel is not missed.
        notified.as_mut().enable();
        if self.cancelled() {
            return;
        }
        notified.await;
    }

    /// Race a future against cancellation.
    ///
    /// Returns `Some(T)` if the future completes first, `None` if
    /// cancellation is signaled first.
    pub async fn select<F, T>(&self, fut: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.wait() => None,
            res = fut => Some(res),
        }
    }
}
