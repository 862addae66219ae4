//! Error types for connection establishment.
//!
//! This module provides structured error types for the establishment layer,
//! enabling callers to distinguish between different failure modes.
//!
//! # Error Classification
//!
//! - **Negotiation failures**: the secure channel was never established.
//!   Reported to the endpoint listener's error callback; no connection object
//!   is ever created.
//! - **Construction failures**: the connection factory raised. Propagated to
//!   the caller of the listen/connect path; no partially-wired connection is
//!   exposed to any listener.
//! - **Cancellation**: a pending handle was released before resolving.
//! - **Lifecycle errors**: operations against a locked or closed connection.

use std::io;

use thiserror::Error;

use crate::attestation::AttestationError;

/// Result alias for establishment operations.
pub type EstablishResult<T> = Result<T, EstablishError>;

/// Errors raised while establishing or operating a connection.
#[derive(Debug, Error)]
pub enum EstablishError {
    /// Transport-level security negotiation failed.
    ///
    /// No secure channel exists; no connection object was created. These
    /// errors are forwarded to the endpoint listener and are non-fatal to a
    /// listening coordinator, which keeps accepting further channels.
    #[error("secure channel negotiation failed: {reason}")]
    Negotiation {
        /// Description of the negotiation failure.
        reason: String,
    },

    /// The connection factory failed to build a connection.
    ///
    /// The secure channel was established but no connection was wired up.
    /// Propagated to the caller of the listen/connect path rather than to
    /// the endpoint listener.
    #[error("connection construction failed: {reason}")]
    Construction {
        /// Description of the construction failure.
        reason: String,
    },

    /// The attestation driver rejected the peer or could not supply a token.
    #[error("attestation failure: {0}")]
    Attestation(#[from] AttestationError),

    /// The transport layer could not bind or start listening.
    ///
    /// Propagated from `listen`, never retried by this layer.
    #[error("listener setup failed: {0}")]
    ListenSetup(#[from] io::Error),

    /// Establishment was cancelled before the connection resolved.
    #[error("connection establishment cancelled")]
    Cancelled,

    /// The connection is still in the constructed state; messaging has not
    /// been unlocked yet.
    #[error("messaging is locked")]
    MessagingLocked,

    /// The connection has been closed.
    #[error("connection closed")]
    ConnectionClosed,
}

impl EstablishError {
    /// Create a negotiation failure with the given reason.
    pub fn negotiation(reason: impl Into<String>) -> Self {
        Self::Negotiation {
            reason: reason.into(),
        }
    }

    /// Create a construction failure with the given reason.
    pub fn construction(reason: impl Into<String>) -> Self {
        Self::Construction {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error is non-fatal to a listening coordinator.
    ///
    /// Negotiation failures are reported and the server keeps accepting;
    /// everything else aborts the operation that raised it.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Negotiation { .. })
    }

    /// Returns `true` if establishment was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiation_is_recoverable() {
        let err = EstablishError::negotiation("handshake refused");
        assert!(err.is_recoverable());
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_construction_is_not_recoverable() {
        let err = EstablishError::construction("bad key material");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_io_error_wrapping() {
        let io_err = io::Error::new(io::ErrorKind::AddrInUse, "address in use");
        let err = EstablishError::from(io_err);
        assert!(matches!(err, EstablishError::ListenSetup(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_display_includes_reason() {
        let err = EstablishError::negotiation("certificate expired");
        assert!(err.to_string().contains("certificate expired"));
    }
}
