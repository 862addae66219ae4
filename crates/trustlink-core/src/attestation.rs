//! Attestation driver boundary.
//!
//! The attestation driver validates peer identity and trust tokens during
//! connection setup. This core never interprets tokens itself; it threads the
//! driver opaquely through the connection factory so the protocol layer above
//! can attest and re-attest the peer.

use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

/// Errors raised by an attestation driver.
#[derive(Debug, Error)]
pub enum AttestationError {
    /// No token could be obtained from the token source.
    #[error("token source unavailable: {reason}")]
    TokenUnavailable {
        /// Description of the failure.
        reason: String,
    },

    /// The peer's token failed verification.
    #[error("token rejected: {reason}")]
    Rejected {
        /// Description of the rejection.
        reason: String,
    },
}

impl AttestationError {
    /// Create a token-unavailable error with the given reason.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::TokenUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a rejection error with the given reason.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

/// Driver validating peer identity and trust tokens.
///
/// Implementations talk to whatever token authority the deployment uses.
/// Passed opaquely to connection factories; the establishment coordinator
/// never calls it directly.
pub trait AttestationDriver: Send + Sync {
    /// Obtain a fresh token proving this endpoint's identity.
    fn issue_token(&self) -> Result<Bytes, AttestationError>;

    /// Verify a peer token, returning its remaining validity on success.
    fn verify_token(&self, token: &[u8]) -> Result<Duration, AttestationError>;
}
