//! Connection objects and the per-connection delivery gate.
//!
//! A connection wraps a secure channel plus attestation state and moves
//! through three states:
//!
//! ```text
//! ┌─────────────┐  unlock_messaging  ┌──────────┐   close   ┌────────┐
//! │ Constructed │ ──────────────────▶│ Unlocked │ ─────────▶│ Closed │
//! │  (buffering)│                    │ (flowing)│           │(final) │
//! └─────────────┘                    └──────────┘           └────────┘
//!        │                                                      ▲
//!        └──────────────────────── close ──────────────────────┘
//! ```
//!
//! While *constructed*, every inbound payload is buffered; the unlock
//! transition releases the buffer exactly once, in arrival order, and is
//! never re-engaged. This is what lets the establishment coordinator attach
//! all listeners before any payload can reach them.
//!
//! # Invariants
//!
//! - No payload delivered before `unlock_messaging` is observed by any
//!   listener; every payload delivered after it is observed by all listeners
//!   attached before the unlock.
//! - Close listeners are notified exactly once, on the first close.
//! - A closed connection delivers nothing and accepts nothing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::attestation::AttestationDriver;
use crate::channel::SecureChannel;
use crate::config::LinkSettings;
use crate::error::{EstablishError, EstablishResult};

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The connection exists but message delivery is suspended.
    Constructed,
    /// Message delivery is active.
    Unlocked,
    /// Terminal state; the underlying channel is closed.
    Closed,
}

/// Listener for inbound application payloads.
pub trait MessageListener: Send + Sync {
    /// An inbound payload arrived on an unlocked connection.
    fn on_message(&self, payload: &Bytes);
}

/// Listener for connection lifecycle events.
pub trait ConnectionListener: Send + Sync {
    /// The connection transitioned to [`ConnectionState::Closed`].
    fn on_closed(&self);
}

/// The listener-attachable connection surface the establishment layer needs.
///
/// Implementations wrap one secure channel. The coordinator only requires
/// this trait, so protocol layers can bring their own connection types.
pub trait LinkConnection: Send + Sync + 'static {
    /// Unique id of this connection.
    fn id(&self) -> Uuid;

    /// Current lifecycle state.
    fn state(&self) -> ConnectionState;

    /// Release buffered inbound traffic and start delivering.
    ///
    /// Effective exactly once; later calls are no-ops.
    fn unlock_messaging(&self);

    /// Close the connection and its channel. Idempotent.
    fn close(&self);

    /// Attach a listener for inbound payloads.
    fn register_message_listener(&self, listener: Arc<dyn MessageListener>);

    /// Attach a listener for lifecycle events.
    fn register_connection_listener(&self, listener: Arc<dyn ConnectionListener>);

    /// Returns `true` once the connection reached its terminal state.
    fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }
}

struct GateInner {
    state: ConnectionState,
    draining: bool,
    buffered: VecDeque<Bytes>,
    message_listeners: Vec<Arc<dyn MessageListener>>,
    connection_listeners: Vec<Arc<dyn ConnectionListener>>,
}

/// Per-connection state machine gating inbound delivery.
///
/// Embeddable building block for [`LinkConnection`] implementations;
/// [`AppConnection`] uses it, and protocol layers with their own connection
/// types can too. Listener callbacks always run outside the internal lock,
/// so listeners may re-enter the gate (e.g. close it) without deadlocking.
pub struct DeliveryGate {
    inner: Mutex<GateInner>,
}

impl DeliveryGate {
    /// Create a gate in the [`ConnectionState::Constructed`] state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(GateInner {
                state: ConnectionState::Constructed,
                draining: false,
                buffered: VecDeque::new(),
                message_listeners: Vec::new(),
                connection_listeners: Vec::new(),
            }),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().unwrap().state
    }

    /// Attach a message listener.
    pub fn register_message_listener(&self, listener: Arc<dyn MessageListener>) {
        self.inner.lock().unwrap().message_listeners.push(listener);
    }

    /// Attach a lifecycle listener.
    ///
    /// Attaching after close is a no-op: the close notification already
    /// happened and will not be replayed.
    pub fn register_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != ConnectionState::Closed {
            inner.connection_listeners.push(listener);
        }
    }

    /// Feed one inbound payload through the gate.
    ///
    /// Buffered while constructed, fanned out to message listeners while
    /// unlocked, dropped once closed.
    pub fn deliver(&self, payload: Bytes) {
        let listeners = {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                ConnectionState::Constructed => {
                    inner.buffered.push_back(payload);
                    return;
                }
                ConnectionState::Closed => return,
                ConnectionState::Unlocked => inner.message_listeners.clone(),
            }
        };
        for listener in &listeners {
            listener.on_message(&payload);
        }
    }

    /// Release buffered payloads and switch to direct delivery.
    ///
    /// The buffer drains in FIFO order; payloads that race the drain keep
    /// landing in the buffer until the draining thread observes it empty and
    /// flips the state, so ordering holds. Effective once.
    pub fn unlock(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != ConnectionState::Constructed || inner.draining {
                return;
            }
            inner.draining = true;
        }
        loop {
            let (batch, listeners) = {
                let mut inner = self.inner.lock().unwrap();
                if inner.state == ConnectionState::Closed {
                    inner.draining = false;
                    return;
                }
                if inner.buffered.is_empty() {
                    inner.state = ConnectionState::Unlocked;
                    inner.draining = false;
                    return;
                }
                let batch: Vec<Bytes> = inner.buffered.drain(..).collect();
                (batch, inner.message_listeners.clone())
            };
            for payload in &batch {
                for listener in &listeners {
                    listener.on_message(payload);
                }
            }
        }
    }

    /// Transition to closed, discarding any still-buffered payloads.
    ///
    /// Returns `true` if this call performed the transition; lifecycle
    /// listeners are notified exactly once, by that call.
    pub fn close(&self) -> bool {
        let listeners = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state == ConnectionState::Closed {
                return false;
            }
            inner.state = ConnectionState::Closed;
            inner.buffered.clear();
            std::mem::take(&mut inner.connection_listeners)
        };
        for listener in &listeners {
            listener.on_closed();
        }
        true
    }
}

impl Default for DeliveryGate {
    fn default() -> Self {
        Self::new()
    }
}

/// A concrete connection over any [`SecureChannel`].
///
/// The canonical connection-factory output: wire format and protocol state
/// machine live above this layer, so payloads pass through opaquely.
pub struct AppConnection<S: SecureChannel> {
    id: Uuid,
    channel: S,
    gate: DeliveryGate,
    settings: Arc<LinkSettings>,
    attestation: Arc<dyn AttestationDriver>,
}

impl<S: SecureChannel> std::fmt::Debug for AppConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConnection")
            .field("id", &self.id)
            .field("state", &self.gate.state())
            .finish_non_exhaustive()
    }
}

impl<S: SecureChannel> AppConnection<S> {
    /// Build a connection over an established channel.
    ///
    /// Takes ownership of the channel and attaches its inbound sink; from
    /// this point every payload the channel produces is held by the gate
    /// until [`LinkConnection::unlock_messaging`]. Matches the connection
    /// factory signature used by the coordinator.
    pub fn establish(
        channel: S,
        settings: Arc<LinkSettings>,
        attestation: Arc<dyn AttestationDriver>,
    ) -> EstablishResult<Arc<Self>> {
        let connection = Arc::new(Self {
            id: Uuid::new_v4(),
            channel,
            gate: DeliveryGate::new(),
            settings,
            attestation,
        });
        let weak: Weak<Self> = Arc::downgrade(&connection);
        connection.channel.set_sink(Box::new(move |payload| {
            if let Some(connection) = weak.upgrade() {
                connection.gate.deliver(payload);
            }
        }));
        debug!(connection_id = %connection.id, "connection constructed, messaging locked");
        Ok(connection)
    }

    /// Send a payload to the peer.
    ///
    /// Only an unlocked connection may send.
    pub fn send(&self, payload: Bytes) -> EstablishResult<()> {
        match self.gate.state() {
            ConnectionState::Unlocked => self.channel.send(payload),
            ConnectionState::Constructed => Err(EstablishError::MessagingLocked),
            ConnectionState::Closed => Err(EstablishError::ConnectionClosed),
        }
    }

    /// The effective settings this connection was built with.
    pub fn settings(&self) -> &Arc<LinkSettings> {
        &self.settings
    }

    /// The attestation driver for the protocol layer to attest with.
    pub fn attestation(&self) -> &Arc<dyn AttestationDriver> {
        &self.attestation
    }
}

impl<S: SecureChannel> LinkConnection for AppConnection<S> {
    fn id(&self) -> Uuid {
        self.id
    }

    fn state(&self) -> ConnectionState {
        self.gate.state()
    }

    fn unlock_messaging(&self) {
        trace!(connection_id = %self.id, "unlocking messaging");
        self.gate.unlock();
    }

    fn close(&self) {
        if self.gate.close() {
            debug!(connection_id = %self.id, "connection closed");
            self.channel.close();
        }
    }

    fn register_message_listener(&self, listener: Arc<dyn MessageListener>) {
        self.gate.register_message_listener(listener);
    }

    fn register_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.gate.register_connection_listener(listener);
    }
}
