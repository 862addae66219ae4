//! In-memory doubles for driving the establishment layer in tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use trustlink_core::{
    AppConnection, AttestationDriver, AttestationError, ChannelInitListener, ChannelOutcome,
    ConnectionCoordinator, ConnectionFactory, EndpointListener, EstablishError, EstablishResult,
    LinkConnection, LinkSettings, MessageListener, MessageSink, SecureChannel, SecureChannelDriver,
    SecureServerHandle, ServerConnectionListener,
};

/// The connection type all doubles work with.
pub type TestConnection = AppConnection<MemoryChannel>;

struct ChannelInner {
    sink: Option<MessageSink>,
    held_back: Vec<Bytes>,
    sent: Vec<Bytes>,
}

struct ChannelShared {
    inner: Mutex<ChannelInner>,
    closed: AtomicBool,
}

/// In-memory secure channel; clones share one underlying stream.
///
/// Payloads injected before a sink attaches are held back and flushed in
/// order on attachment, matching the channel contract.
#[derive(Clone)]
pub struct MemoryChannel {
    shared: Arc<ChannelShared>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(ChannelShared {
                inner: Mutex::new(ChannelInner {
                    sink: None,
                    held_back: Vec::new(),
                    sent: Vec::new(),
                }),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Simulate an inbound payload from the peer.
    pub fn inject(&self, payload: Bytes) {
        let mut guard = self.shared.inner.lock().unwrap();
        let inner = &mut *guard;
        match &inner.sink {
            Some(sink) => sink(payload),
            None => inner.held_back.push(payload),
        }
    }

    /// Payloads the local side sent.
    pub fn sent(&self) -> Vec<Bytes> {
        self.shared.inner.lock().unwrap().sent.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl SecureChannel for MemoryChannel {
    fn send(&self, payload: Bytes) -> EstablishResult<()> {
        if self.is_closed() {
            return Err(EstablishError::ConnectionClosed);
        }
        self.shared.inner.lock().unwrap().sent.push(payload);
        Ok(())
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }

    fn set_sink(&self, sink: MessageSink) {
        let mut inner = self.shared.inner.lock().unwrap();
        for payload in inner.held_back.drain(..).collect::<Vec<_>>() {
            sink(payload);
        }
        inner.sink = Some(sink);
    }
}

/// Message listener collecting everything it observes.
pub struct MessageTap {
    pub seen: Mutex<Vec<Bytes>>,
}

impl MessageTap {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn seen(&self) -> Vec<Bytes> {
        self.seen.lock().unwrap().clone()
    }
}

impl MessageListener for MessageTap {
    fn on_message(&self, payload: &Bytes) {
        self.seen.lock().unwrap().push(payload.clone());
    }
}

/// Endpoint listener recording connections and errors; attaches a
/// [`MessageTap`] to every connection it is handed.
pub struct RecordingEndpoint {
    pub connections: Mutex<Vec<Arc<TestConnection>>>,
    pub errors: Mutex<Vec<String>>,
    pub tap: Arc<MessageTap>,
}

impl RecordingEndpoint {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            tap: MessageTap::new(),
        })
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl EndpointListener<TestConnection> for RecordingEndpoint {
    fn on_connection(&self, connection: Arc<TestConnection>) {
        connection.register_message_listener(self.tap.clone());
        self.connections.lock().unwrap().push(connection);
    }

    fn on_error(&self, error: &EstablishError) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

/// Server listener recording creation/close notifications by connection id.
pub struct RecordingServerListener {
    pub created: Mutex<Vec<Uuid>>,
    pub closed: Mutex<Vec<Uuid>>,
}

impl RecordingServerListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            created: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
        })
    }
}

impl ServerConnectionListener<TestConnection> for RecordingServerListener {
    fn on_connection_created(&self, connection: Arc<TestConnection>) {
        self.created.lock().unwrap().push(connection.id());
    }

    fn on_connection_close(&self, connection: Arc<TestConnection>) {
        self.closed.lock().unwrap().push(connection.id());
    }
}

/// What [`ManualDriver::open_channel`] does when asked to dial.
pub enum DialBehavior {
    /// Hand out a fresh channel (also exposed via `last_dialed`).
    Succeed,
    /// Fail negotiation.
    Fail,
    /// Never complete, until cancelled from outside.
    Never,
}

struct ManualServerHandle {
    running: Arc<AtomicBool>,
}

impl SecureServerHandle for ManualServerHandle {
    fn terminate(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Channel driver driven by the test instead of a real transport.
pub struct ManualDriver {
    acceptor: Mutex<Option<Arc<dyn ChannelInitListener<MemoryChannel>>>>,
    running: Arc<AtomicBool>,
    dial_behavior: DialBehavior,
    pub dials: AtomicUsize,
    pub last_dialed: Mutex<Option<MemoryChannel>>,
}

impl ManualDriver {
    pub fn new(dial_behavior: DialBehavior) -> Arc<Self> {
        Arc::new(Self {
            acceptor: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            dial_behavior,
            dials: AtomicUsize::new(0),
            last_dialed: Mutex::new(None),
        })
    }

    /// Deliver one accept outcome to the listener registered by `listen`.
    pub async fn accept(&self, outcome: ChannelOutcome<MemoryChannel>) -> EstablishResult<()> {
        let acceptor = self
            .acceptor
            .lock()
            .unwrap()
            .clone()
            .expect("listen() must run before accept()");
        acceptor.on_secure_channel(outcome).await
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn last_dialed(&self) -> Option<MemoryChannel> {
        self.last_dialed.lock().unwrap().clone()
    }
}

#[async_trait]
impl SecureChannelDriver<MemoryChannel> for ManualDriver {
    async fn listen(
        &self,
        _settings: Arc<LinkSettings>,
        listener: Arc<dyn ChannelInitListener<MemoryChannel>>,
    ) -> EstablishResult<Arc<dyn SecureServerHandle>> {
        *self.acceptor.lock().unwrap() = Some(listener);
        self.running.store(true, Ordering::SeqCst);
        Ok(Arc::new(ManualServerHandle {
            running: Arc::clone(&self.running),
        }))
    }

    async fn open_channel(&self, _settings: Arc<LinkSettings>) -> EstablishResult<MemoryChannel> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        match self.dial_behavior {
            DialBehavior::Succeed => {
                let channel = MemoryChannel::new();
                *self.last_dialed.lock().unwrap() = Some(channel.clone());
                Ok(channel)
            }
            DialBehavior::Fail => Err(EstablishError::negotiation("peer refused handshake")),
            DialBehavior::Never => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

/// Attestation driver that accepts everything.
pub struct PermissiveAttestation;

impl AttestationDriver for PermissiveAttestation {
    fn issue_token(&self) -> Result<Bytes, AttestationError> {
        Ok(Bytes::from_static(b"test-token"))
    }

    fn verify_token(&self, _token: &[u8]) -> Result<std::time::Duration, AttestationError> {
        Ok(std::time::Duration::from_secs(600))
    }
}

/// A coordinator over the in-memory doubles, plus the pieces tests assert on.
pub struct TestRig {
    pub coordinator: Arc<ConnectionCoordinator<TestConnection, MemoryChannel>>,
    pub endpoint: Arc<RecordingEndpoint>,
    pub driver: Arc<ManualDriver>,
    pub settings: Arc<LinkSettings>,
}

impl TestRig {
    pub fn new(dial_behavior: DialBehavior) -> Self {
        let endpoint = RecordingEndpoint::new();
        let driver = ManualDriver::new(dial_behavior);
        let settings = LinkSettings::default().into_shared();
        let factory: ConnectionFactory<TestConnection, MemoryChannel> =
            Arc::new(|channel, settings, attestation| {
                AppConnection::establish(channel, settings, attestation)
            });
        let coordinator = ConnectionCoordinator::new(
            factory,
            endpoint.clone(),
            Arc::clone(&settings),
            Arc::new(PermissiveAttestation),
            driver.clone(),
        );
        Self {
            coordinator,
            endpoint,
            driver,
            settings,
        }
    }

    /// A rig whose factory always fails.
    pub fn with_failing_factory() -> Self {
        let endpoint = RecordingEndpoint::new();
        let driver = ManualDriver::new(DialBehavior::Succeed);
        let settings = LinkSettings::default().into_shared();
        let factory: ConnectionFactory<TestConnection, MemoryChannel> =
            Arc::new(|_, _, _| Err(EstablishError::construction("bad key material")));
        let coordinator = ConnectionCoordinator::new(
            factory,
            endpoint.clone(),
            Arc::clone(&settings),
            Arc::new(PermissiveAttestation),
            driver.clone(),
        );
        Self {
            coordinator,
            endpoint,
            driver,
            settings,
        }
    }
}
