//! One-shot resolved signal.
//!
//! [`SignalOnce`] carries a value that is resolved at most once and observed
//! by any number of waiters. The establishment coordinator uses it as the
//! server-listener promise: inbound channels can be accepted and processed
//! before the server object exists, with each acceptance waiting on the
//! signal for the listener it must notify.

use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

struct SignalInner<T> {
    slot: Mutex<Option<T>>,
    resolved: Notify,
}

/// A value resolved at most once, awaitable by many.
///
/// Clones share the same slot. Resolution wins exactly once; later attempts
/// are rejected, never applied.
pub struct SignalOnce<T> {
    inner: Arc<SignalInner<T>>,
}

impl<T> Clone for SignalOnce<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for SignalOnce<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SignalOnce<T> {
    /// Create an unresolved signal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                slot: Mutex::new(None),
                resolved: Notify::new(),
            }),
        }
    }

    /// Resolve the signal.
    ///
    /// Returns `true` if this call won the resolution; `false` if the signal
    /// was already resolved (the value is dropped in that case).
    pub fn resolve(&self, value: T) -> bool {
        {
            let mut slot = self.inner.slot.lock().unwrap();
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
        }
        self.inner.resolved.notify_waiters();
        true
    }

    /// Returns `true` once the signal has been resolved.
    pub fn is_resolved(&self) -> bool {
        self.inner.slot.lock().unwrap().is_some()
    }
}

impl<T: Clone> SignalOnce<T> {
    /// The resolved value, if resolution already happened.
    pub fn try_get(&self) -> Option<T> {
        self.inner.slot.lock().unwrap().clone()
    }

    /// Wait for resolution and return the value.
    pub async fn wait(&self) -> T {
        loop {
            let notified = self.inner.resolved.notified();
            tokio::pin!(notified);
            // Register before re-checking so a resolve between the check and
            // the await cannot be missed.
            notified.as_mut().enable();
            if let Some(value) = self.try_get() {
                return value;
            }
            notified.await;
        }
    }
}
