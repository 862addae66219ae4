//! Attested-connection establishment coordination and connection sharing.
//!
//! This crate is the coordination core of a secure, attested application
//! connectivity stack. It does not speak any wire format itself — transport
//! security, attestation, and message framing all live behind trait
//! boundaries — and instead solves two narrow problems correctly:
//!
//! 1. **Establishment coordination**: turning a freshly-negotiated secure
//!    channel into a fully-wired connection object exactly once, with
//!    inbound traffic held back until every interested listener is attached
//!    ([`ConnectionCoordinator`], [`DeliveryGate`]).
//! 2. **Connection sharing**: letting independent call sites share one
//!    asynchronous connection per share key, with single-flight creation
//!    and teardown at the last release ([`RefCountingCache`],
//!    [`ConnectionHandle`]).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     user / protocol layer                    │
//! │        EndpointListener          ServerConnectionListener    │
//! ├──────────────────────────────────────────────────────────────┤
//! │  RefCountingCache ──▶ ConnectionHandle                       │
//! │                            ▲                                 │
//! │                 ConnectionCoordinator ──▶ ConnectionServer   │
//! │                   │ construct, attach, unlock                │
//! │                   ▼                                          │
//! │             LinkConnection (DeliveryGate)                    │
//! ├──────────────────────────────────────────────────────────────┤
//! │   SecureChannelDriver / SecureChannel      AttestationDriver │
//! │              (transport security)            (trust tokens)  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Overview
//!
//! - [`attestation`]: attestation-driver boundary
//! - [`cache`]: ref-counting shared-resource cache
//! - [`channel`]: secure-channel and channel-driver boundaries
//! - [`config`]: effective settings ([`LinkSettings`])
//! - [`connection`]: connection trait, delivery gate, concrete connection
//! - [`coordinator`]: the establishment coordinator
//! - [`error`]: error taxonomy ([`EstablishError`])
//! - [`handle`]: asynchronous connection handles
//! - [`listener`]: endpoint and server listener boundaries
//! - [`server`]: server-side connection registry
//! - [`signal`]: one-shot resolved signal

pub mod attestation;
pub mod cache;
pub mod channel;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod handle;
pub mod listener;
pub mod server;
pub mod signal;

pub use attestation::{AttestationDriver, AttestationError};
pub use cache::RefCountingCache;
pub use channel::{
    ChannelInitListener, ChannelOutcome, MessageSink, SecureChannel, SecureChannelDriver,
    SecureServerHandle,
};
pub use config::{ConfigError, LinkSettings};
pub use connection::{
    AppConnection, ConnectionListener, ConnectionState, DeliveryGate, LinkConnection,
    MessageListener,
};
pub use coordinator::{ConnectionCoordinator, ConnectionFactory};
pub use error::{EstablishError, EstablishResult};
pub use handle::{ConnectionHandle, ConnectionResolver, HandleState};
pub use listener::{EndpointListener, ServerConnectionListener, ServerListenerPromise};
pub use server::ConnectionServer;
pub use signal::SignalOnce;
