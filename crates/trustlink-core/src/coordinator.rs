//! Connection establishment coordination.
//!
//! [`ConnectionCoordinator`] turns freshly-negotiated secure channels into
//! fully-wired connections, exactly once per channel, with inbound traffic
//! held back until every interested party has attached its listeners:
//!
//! ```text
//!  channel driver                 coordinator                    listeners
//!       │   on_secure_channel(Ok)      │                              │
//!       ├─────────────────────────────▶│ construct via factory        │
//!       │                              │ (messaging locked)           │
//!       │                              │ await server promise ───────▶│ on_connection_created
//!       │                              │ attach close observer        │
//!       │                              │ endpoint callback ──────────▶│ on_connection
//!       │                              │ unlock_messaging             │
//!       │                              │ (buffered traffic flows)     │
//! ```
//!
//! The whole sequence is serialized per coordinator instance, so two
//! channels accepted concurrently can never interleave their partial
//! setups. Construction runs inside that critical section — factories are
//! expected to be cheap constructors; anything long-lived belongs behind
//! the channel-driver seam.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use crate::attestation::AttestationDriver;
use crate::channel::{
    ChannelInitListener, ChannelOutcome, SecureChannel, SecureChannelDriver,
};
use crate::config::LinkSettings;
use crate::connection::{ConnectionListener, LinkConnection};
use crate::error::{EstablishError, EstablishResult};
use crate::handle::ConnectionHandle;
use crate::listener::{EndpointListener, ServerConnectionListener, ServerListenerPromise};
use crate::server::ConnectionServer;
use crate::signal::SignalOnce;

/// Factory building a connection from an established channel.
///
/// Pure construction: the returned connection must start with messaging
/// locked, and a factory error must leave nothing half-wired behind.
pub type ConnectionFactory<C, S> = Arc<
    dyn Fn(S, Arc<LinkSettings>, Arc<dyn AttestationDriver>) -> EstablishResult<Arc<C>>
        + Send
        + Sync,
>;

/// Coordinates connection establishment for one endpoint.
pub struct ConnectionCoordinator<C: LinkConnection, S: SecureChannel> {
    factory: ConnectionFactory<C, S>,
    endpoint_listener: Arc<dyn EndpointListener<C>>,
    settings: Arc<LinkSettings>,
    attestation: Arc<dyn AttestationDriver>,
    channel_driver: Arc<dyn SecureChannelDriver<S>>,
    setup_lock: Mutex<()>,
}

impl<C: LinkConnection, S: SecureChannel> ConnectionCoordinator<C, S> {
    /// Create a coordinator.
    ///
    /// `settings` are the effective settings handed to the factory for every
    /// connection this coordinator establishes.
    pub fn new(
        factory: ConnectionFactory<C, S>,
        endpoint_listener: Arc<dyn EndpointListener<C>>,
        settings: Arc<LinkSettings>,
        attestation: Arc<dyn AttestationDriver>,
        channel_driver: Arc<dyn SecureChannelDriver<S>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            factory,
            endpoint_listener,
            settings,
            attestation,
            channel_driver,
            setup_lock: Mutex::new(()),
        })
    }

    /// Start a server listening for inbound channels.
    ///
    /// The transport starts accepting before the server object exists; the
    /// server-listener promise bridges that window. Channels accepted before
    /// the promise resolves wait on it inside [`Self::on_secure_channel`]
    /// rather than racing the server's construction.
    pub async fn listen(
        self: &Arc<Self>,
        settings: Arc<LinkSettings>,
    ) -> EstablishResult<Arc<ConnectionServer<C>>> {
        info!(host = %settings.host, port = settings.port, "starting connection server");
        let promise: ServerListenerPromise<C> = SignalOnce::new();
        let acceptor = Arc::new(ChannelAcceptor {
            coordinator: Arc::clone(self),
            server_listener: promise.clone(),
        });
        let secure_server = self.channel_driver.listen(settings, acceptor).await?;
        let server = Arc::new(ConnectionServer::new(secure_server));
        promise.resolve(Arc::clone(&server) as Arc<dyn ServerConnectionListener<C>>);
        Ok(server)
    }

    /// Open one outbound connection.
    ///
    /// Returns immediately with a pending handle; the dial and wiring run in
    /// a spawned task, so this must be called from within a tokio runtime.
    /// Releasing the handle while pending aborts the dial; if resolution
    /// races ahead of the release, the wired connection is closed instead.
    ///
    /// Synchronous by design: a share-key cache can use it as the creator
    /// for an unseen key without blocking the key map.
    pub fn connect(self: &Arc<Self>, settings: Arc<LinkSettings>) -> ConnectionHandle<C> {
        let (resolver, handle) = ConnectionHandle::pending();
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let dial = coordinator.channel_driver.open_channel(settings);
            tokio::pin!(dial);
            let outcome = tokio::select! {
                () = resolver.cancelled() => None,
                outcome = &mut dial => Some(outcome),
            };
            match outcome {
                None => {
                    debug!("outbound dial cancelled before establishment");
                    // Dropping the resolver fails the handle as cancelled.
                }
                Some(Err(error)) => {
                    warn!(%error, "outbound channel negotiation failed");
                    coordinator.endpoint_listener.on_error(&error);
                    resolver.fail(error);
                }
                Some(Ok(channel)) => {
                    let connection = {
                        let _setup = coordinator.setup_lock.lock().await;
                        coordinator.wire_connection(channel, None).await
                    };
                    match connection {
                        Ok(connection) => {
                            resolver.resolve(connection);
                        }
                        Err(error) => {
                            resolver.fail(error);
                        }
                    }
                }
            }
        });
        handle
    }

    /// Callback for one finished channel negotiation.
    ///
    /// Negotiation failures are consumed: forwarded to the endpoint
    /// listener's error callback, `Ok(())` returned, and (server role) the
    /// coordinator keeps accepting. A returned error is a construction
    /// failure — the channel was good but no connection was wired.
    ///
    /// Serialized: at most one invocation executes at a time per
    /// coordinator.
    pub async fn on_secure_channel(
        &self,
        outcome: ChannelOutcome<S>,
        server_listener: Option<ServerListenerPromise<C>>,
    ) -> EstablishResult<()> {
        let _setup = self.setup_lock.lock().await;
        let channel = match outcome {
            Ok(channel) => channel,
            Err(error) => {
                warn!(%error, "secure channel negotiation failed");
                self.endpoint_listener.on_error(&error);
                return Ok(());
            }
        };
        trace!("new secure channel established");
        self.wire_connection(channel, server_listener).await?;
        Ok(())
    }

    /// Forward a channel-layer failure to the endpoint listener.
    pub fn on_error(&self, error: &EstablishError) {
        self.endpoint_listener.on_error(error);
    }

    /// Construct and wire one connection. Callers hold the setup lock.
    ///
    /// Both the server-listener continuation and the endpoint callback have
    /// completed before the unlock at the end — that join is what guarantees
    /// no payload reaches a listener that was not yet attached.
    async fn wire_connection(
        &self,
        channel: S,
        server_listener: Option<ServerListenerPromise<C>>,
    ) -> EstablishResult<Arc<C>> {
        let connection = (self.factory)(
            channel,
            Arc::clone(&self.settings),
            Arc::clone(&self.attestation),
        )?;

        if let Some(promise) = server_listener {
            let listener = promise.wait().await;
            listener.on_connection_created(Arc::clone(&connection));
            connection.register_connection_listener(Arc::new(CloseForwarder {
                listener,
                connection: Arc::downgrade(&connection),
            }));
        }

        self.endpoint_listener.on_connection(Arc::clone(&connection));
        connection.unlock_messaging();
        trace!(connection_id = %connection.id(), "messaging unlocked");
        Ok(connection)
    }
}

/// Adapter binding one `listen` call's promise to the coordinator.
struct ChannelAcceptor<C: LinkConnection, S: SecureChannel> {
    coordinator: Arc<ConnectionCoordinator<C, S>>,
    server_listener: ServerListenerPromise<C>,
}

#[async_trait]
impl<C: LinkConnection, S: SecureChannel> ChannelInitListener<S> for ChannelAcceptor<C, S> {
    async fn on_secure_channel(&self, outcome: ChannelOutcome<S>) -> EstablishResult<()> {
        self.coordinator
            .on_secure_channel(outcome, Some(self.server_listener.clone()))
            .await
    }

    fn on_error(&self, error: &EstablishError) {
        self.coordinator.on_error(error);
    }
}

/// Forwards a connection's close to the server listener.
///
/// Holds the connection weakly: the listener chain must not keep the
/// connection alive, and the upgrade always succeeds while the close
/// notification is running.
struct CloseForwarder<C: LinkConnection> {
    listener: Arc<dyn ServerConnectionListener<C>>,
    connection: Weak<C>,
}

impl<C: LinkConnection> ConnectionListener for CloseForwarder<C> {
    fn on_closed(&self) {
        if let Some(connection) = self.connection.upgrade() {
            self.listener.on_connection_close(connection);
        }
    }
}
