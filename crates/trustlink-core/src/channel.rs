//! Secure-channel and channel-driver boundaries.
//!
//! A [`SecureChannel`] is an already-authenticated byte stream supplied by
//! the transport layer; negotiation (TLS handshake, certificate validation)
//! happens entirely on the driver's side of this boundary. The establishment
//! coordinator receives channels through [`ChannelInitListener`] callbacks
//! and hands them to the connection factory without inspecting them.
//!
//! # Ownership
//!
//! The driver owns a channel until it hands it over via
//! [`ChannelInitListener::on_secure_channel`]; from then on the connection
//! built on top of it owns it, and the channel is closed only through that
//! connection.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::LinkSettings;
use crate::error::{EstablishError, EstablishResult};

/// Callback receiving inbound payloads from a channel.
pub type MessageSink = Box<dyn Fn(Bytes) + Send + Sync>;

/// Outcome of one channel negotiation: an established channel, or the
/// negotiation error.
pub type ChannelOutcome<S> = Result<S, EstablishError>;

/// An authenticated, already-secured byte stream between two peers.
///
/// Implementations must not lose inbound payloads that arrive before a sink
/// is attached; either buffer them or keep the read loop suspended until
/// [`SecureChannel::set_sink`] is called.
pub trait SecureChannel: Send + Sync + 'static {
    /// Send a payload to the peer.
    fn send(&self, payload: Bytes) -> EstablishResult<()>;

    /// Close the channel. Idempotent.
    fn close(&self);

    /// Attach the sink that receives inbound payloads.
    ///
    /// Called exactly once, by the connection taking ownership of the
    /// channel. Payloads held back before this call are delivered to the
    /// sink, in arrival order, before any later payload.
    fn set_sink(&self, sink: MessageSink);
}

/// Callback boundary through which a driver reports channel establishment.
///
/// Drivers invoke these from their accept/dial tasks, never from inside
/// [`SecureChannelDriver::listen`] itself — the listener may await state
/// that only becomes ready after `listen` returns.
#[async_trait]
pub trait ChannelInitListener<S: SecureChannel>: Send + Sync {
    /// A negotiation attempt finished: either a secure channel or the error.
    ///
    /// Negotiation failures are consumed (reported to the endpoint listener
    /// by the receiving side); a returned error means connection
    /// construction failed after a successful negotiation.
    async fn on_secure_channel(&self, outcome: ChannelOutcome<S>) -> EstablishResult<()>;

    /// A failure not tied to one negotiation attempt (e.g. the accept loop
    /// itself broke).
    fn on_error(&self, error: &EstablishError);
}

/// Handle on a listening transport endpoint.
pub trait SecureServerHandle: Send + Sync {
    /// Stop accepting new channels. Idempotent.
    fn terminate(&self);

    /// Returns `true` while the endpoint is accepting new channels.
    fn is_running(&self) -> bool;
}

/// Transport-side driver that negotiates secure channels.
///
/// The sole supplier of [`SecureChannel`] values. `listen` binds a local
/// endpoint and reports every accepted channel to the given listener;
/// `open_channel` dials one outbound channel.
#[async_trait]
pub trait SecureChannelDriver<S: SecureChannel>: Send + Sync {
    /// Bind a listening endpoint and start reporting accepted channels.
    ///
    /// Returns an error if the transport cannot bind or listen; the error is
    /// propagated, not retried.
    async fn listen(
        &self,
        settings: Arc<LinkSettings>,
        listener: Arc<dyn ChannelInitListener<S>>,
    ) -> EstablishResult<Arc<dyn SecureServerHandle>>;

    /// Dial one outbound channel to the peer named in `settings`.
    async fn open_channel(&self, settings: Arc<LinkSettings>) -> EstablishResult<S>;
}
