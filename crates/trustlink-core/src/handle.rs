//! Asynchronous connection handles.
//!
//! A [`ConnectionHandle`] represents a connection that may still be
//! establishing. Exactly one [`ConnectionResolver`] settles it — to *ready*
//! or *failed* — and any number of handle clones observe the settlement.
//!
//! # Teardown rule
//!
//! [`ConnectionHandle::release`] implements the teardown contract shared by
//! the ref-counting cache and direct (non-shared) acquisition: request
//! cancellation if still pending, close the connection if ready, do nothing
//! if failed. Cancellation is best-effort — if resolution races ahead of the
//! request, both sides re-check and the resolved connection is closed
//! instead of being left dangling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::debug;

use crate::connection::LinkConnection;
use crate::error::EstablishError;

/// Observable settlement state of a handle.
pub enum HandleState<C> {
    /// Establishment is still in flight.
    Pending,
    /// The connection is established and fully wired.
    Ready(Arc<C>),
    /// Establishment failed.
    Failed(Arc<EstablishError>),
}

impl<C> Clone for HandleState<C> {
    fn clone(&self) -> Self {
        match self {
            Self::Pending => Self::Pending,
            Self::Ready(connection) => Self::Ready(Arc::clone(connection)),
            Self::Failed(error) => Self::Failed(Arc::clone(error)),
        }
    }
}

struct HandleShared<C> {
    state: Mutex<HandleState<C>>,
    settled: Notify,
    cancel_requested: AtomicBool,
    cancel_signal: Notify,
}

/// Consumer side of an establishing connection.
///
/// Clones observe the same underlying establishment.
pub struct ConnectionHandle<C: LinkConnection> {
    shared: Arc<HandleShared<C>>,
}

impl<C: LinkConnection> Clone for ConnectionHandle<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Producer side: settles the handle exactly once.
///
/// Dropping an unsettled resolver fails the handle with
/// [`EstablishError::Cancelled`], so observers never wait forever.
pub struct ConnectionResolver<C: LinkConnection> {
    shared: Arc<HandleShared<C>>,
    settled_by_me: bool,
}

impl<C: LinkConnection> ConnectionHandle<C> {
    /// Create a pending handle and its resolver.
    #[must_use]
    pub fn pending() -> (ConnectionResolver<C>, Self) {
        let shared = Arc::new(HandleShared {
            state: Mutex::new(HandleState::Pending),
            settled: Notify::new(),
            cancel_requested: AtomicBool::new(false),
            cancel_signal: Notify::new(),
        });
        (
            ConnectionResolver {
                shared: Arc::clone(&shared),
                settled_by_me: false,
            },
            Self { shared },
        )
    }

    /// Snapshot of the current settlement state.
    pub fn snapshot(&self) -> HandleState<C> {
        self.shared.state.lock().unwrap().clone()
    }

    /// Returns `true` while establishment is still in flight.
    pub fn is_pending(&self) -> bool {
        matches!(self.snapshot(), HandleState::Pending)
    }

    /// Returns `true` if a cancellation has been requested.
    pub fn cancel_requested(&self) -> bool {
        self.shared.cancel_requested.load(Ordering::SeqCst)
    }

    /// Wait for settlement.
    pub async fn established(&self) -> Result<Arc<C>, Arc<EstablishError>> {
        loop {
            let notified = self.shared.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            match self.snapshot() {
                HandleState::Pending => notified.await,
                HandleState::Ready(connection) => return Ok(connection),
                HandleState::Failed(error) => return Err(error),
            }
        }
    }

    /// Tear the handle down: cancel if pending, close if ready, no-op if
    /// failed.
    ///
    /// Safe against the resolve/cancel race from both sides — whichever of
    /// resolution and release observes the other closes the connection, and
    /// the close itself is idempotent.
    pub fn release(&self) {
        self.shared.cancel_requested.store(true, Ordering::SeqCst);
        self.shared.cancel_signal.notify_waiters();
        if let HandleState::Ready(connection) = self.snapshot() {
            connection.close();
        }
    }
}

impl<C: LinkConnection> ConnectionResolver<C> {
    /// Settle the handle with an established connection.
    ///
    /// If cancellation was requested while establishment was in flight, the
    /// connection is closed instead and the handle fails with
    /// [`EstablishError::Cancelled`]. Returns `true` if the handle became
    /// ready.
    pub fn resolve(mut self, connection: Arc<C>) -> bool {
        self.settled_by_me = true;
        let cancelled = {
            let mut state = self.shared.state.lock().unwrap();
            if !matches!(*state, HandleState::Pending) {
                return false;
            }
            if self.shared.cancel_requested.load(Ordering::SeqCst) {
                *state = HandleState::Failed(Arc::new(EstablishError::Cancelled));
                true
            } else {
                *state = HandleState::Ready(Arc::clone(&connection));
                false
            }
        };
        self.shared.settled.notify_waiters();
        if cancelled {
            debug!(connection_id = %connection.id(), "resolved after cancellation, closing");
            connection.close();
        }
        !cancelled
    }

    /// Settle the handle with an establishment failure.
    pub fn fail(mut self, error: EstablishError) {
        self.settled_by_me = true;
        {
            let mut state = self.shared.state.lock().unwrap();
            if matches!(*state, HandleState::Pending) {
                *state = HandleState::Failed(Arc::new(error));
            }
        }
        self.shared.settled.notify_waiters();
    }

    /// Wait until a consumer requests cancellation.
    ///
    /// Never returns if no cancellation is ever requested; intended for
    /// `tokio::select!` against the establishment future.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.shared.cancel_signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.cancel_requested.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

impl<C: LinkConnection> Drop for ConnectionResolver<C> {
    fn drop(&mut self) {
        if self.settled_by_me {
            return;
        }
        {
            let mut state = self.shared.state.lock().unwrap();
            if matches!(*state, HandleState::Pending) {
                *state = HandleState::Failed(Arc::new(EstablishError::Cancelled));
            }
        }
        self.shared.settled.notify_waiters();
    }
}
