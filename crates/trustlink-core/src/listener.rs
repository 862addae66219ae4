//! User-facing listener boundaries.
//!
//! The endpoint listener is how user code learns about connections and
//! failures; the server-connection listener is how the server-side registry
//! learns the same. Both are attached by the coordinator *before* a
//! connection's messaging is unlocked, so neither can miss traffic.

use std::sync::Arc;

use crate::error::EstablishError;
use crate::signal::SignalOnce;

/// User-level listener on one endpoint.
pub trait EndpointListener<C>: Send + Sync {
    /// A fully-constructed connection is ready for listener attachment.
    ///
    /// Called synchronously during establishment, while the connection's
    /// messaging is still locked — listeners attached here are guaranteed to
    /// observe every inbound payload.
    fn on_connection(&self, connection: Arc<C>);

    /// A negotiation attempt failed; no connection object exists.
    fn on_error(&self, error: &EstablishError);
}

/// Server-side listener notified of connection lifecycle on a listening
/// endpoint.
pub trait ServerConnectionListener<C>: Send + Sync {
    /// A connection was created for an accepted channel.
    fn on_connection_created(&self, connection: Arc<C>);

    /// A previously-created connection closed.
    fn on_connection_close(&self, connection: Arc<C>);
}

/// One-shot promise of the server-connection listener.
///
/// Resolved exactly once, by `listen`, with the server object — after the
/// transport is already accepting. Inbound channels accepted in that window
/// wait on the promise instead of racing the server's construction.
pub type ServerListenerPromise<C> = SignalOnce<Arc<dyn ServerConnectionListener<C>>>;
