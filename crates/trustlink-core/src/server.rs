//! Server-side connection registry.
//!
//! [`ConnectionServer`] tracks the live connections of one listening
//! endpoint. It is the value the server-listener promise resolves to: the
//! coordinator notifies it of every accepted connection and wires a close
//! observer back to it, so the registry stays accurate without polling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};
use uuid::Uuid;

use crate::channel::SecureServerHandle;
use crate::connection::LinkConnection;
use crate::listener::ServerConnectionListener;

/// Registry of the live connections accepted on one listening endpoint.
pub struct ConnectionServer<C: LinkConnection> {
    connections: Mutex<HashMap<Uuid, Arc<C>>>,
    secure_server: Arc<dyn SecureServerHandle>,
}

impl<C: LinkConnection> ConnectionServer<C> {
    /// Create a registry over a listening transport endpoint.
    #[must_use]
    pub fn new(secure_server: Arc<dyn SecureServerHandle>) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            secure_server,
        }
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    /// Snapshot of the live connections.
    pub fn connections(&self) -> Vec<Arc<C>> {
        self.connections.lock().unwrap().values().cloned().collect()
    }

    /// Returns `true` while the transport endpoint is accepting channels.
    pub fn is_running(&self) -> bool {
        self.secure_server.is_running()
    }

    /// Stop accepting new channels and close every live connection.
    pub fn terminate(&self) {
        info!("terminating connection server");
        self.secure_server.terminate();
        let drained: Vec<Arc<C>> = {
            let mut connections = self.connections.lock().unwrap();
            connections.drain().map(|(_, conn)| conn).collect()
        };
        for connection in drained {
            connection.close();
        }
    }
}

impl<C: LinkConnection> ServerConnectionListener<C> for ConnectionServer<C> {
    fn on_connection_created(&self, connection: Arc<C>) {
        debug!(connection_id = %connection.id(), "server registered connection");
        self.connections
            .lock()
            .unwrap()
            .insert(connection.id(), connection);
    }

    fn on_connection_close(&self, connection: Arc<C>) {
        debug!(connection_id = %connection.id(), "server dropped closed connection");
        self.connections.lock().unwrap().remove(&connection.id());
    }
}
