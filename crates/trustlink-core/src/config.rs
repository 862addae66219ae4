//! Settings for connection establishment.
//!
//! [`LinkSettings`] is the effective-settings object handed to connection
//! factories alongside the secure channel and the attestation driver. It is
//! deliberately small: transport security parameters (keystores, cipher
//! configuration) belong to the secure-channel driver, and this layer only
//! carries what the establishment protocol itself needs.
//!
//! Settings load from TOML with per-field defaults, so a partial file like
//!
//! ```toml
//! host = "connector.example.org"
//! port = 29292
//! ```
//!
//! is valid and fills the remaining fields from defaults.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default peer host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default listening/dialing port.
pub const DEFAULT_PORT: u16 = 29292;

/// Default validity window for attestation results, in seconds.
pub const DEFAULT_ATTESTATION_VALIDITY_SECS: u64 = 600;

/// Default timeout for an outbound dial, in milliseconds.
pub const DEFAULT_DIAL_TIMEOUT_MS: u64 = 5_000;

/// Configuration errors for settings loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file could not be read.
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    /// The settings content is not valid TOML.
    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    /// The settings could not be serialized.
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The settings are structurally valid but semantically rejected.
    #[error("invalid settings: {0}")]
    Validation(String),
}

/// Effective settings for one endpoint (client dial target or server bind).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkSettings {
    /// Peer host (client role) or bind host (server role).
    #[serde(default = "default_host")]
    pub host: String,

    /// Peer port (client role) or bind port (server role).
    #[serde(default = "default_port")]
    pub port: u16,

    /// How long an attestation result stays valid before the peer must be
    /// re-attested. Consumed by the protocol layer above this core.
    #[serde(default = "default_attestation_validity_secs")]
    pub attestation_validity_secs: u64,

    /// Key alias presented to the attestation driver, if the driver keys
    /// token requests by alias.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation_key_alias: Option<String>,

    /// Timeout for an outbound dial, in milliseconds.
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

const fn default_attestation_validity_secs() -> u64 {
    DEFAULT_ATTESTATION_VALIDITY_SECS
}

const fn default_dial_timeout_ms() -> u64 {
    DEFAULT_DIAL_TIMEOUT_MS
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            attestation_validity_secs: default_attestation_validity_secs(),
            attestation_key_alias: None,
            dial_timeout_ms: default_dial_timeout_ms(),
        }
    }
}

impl LinkSettings {
    /// Create settings for the given host and port, defaults elsewhere.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Set the attestation validity window.
    #[must_use]
    pub fn with_attestation_validity(mut self, validity: Duration) -> Self {
        self.attestation_validity_secs = validity.as_secs();
        self
    }

    /// Set the attestation key alias.
    #[must_use]
    pub fn with_attestation_key_alias(mut self, alias: impl Into<String>) -> Self {
        self.attestation_key_alias = Some(alias.into());
        self
    }

    /// Set the dial timeout.
    #[must_use]
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Load settings from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse settings from a TOML string and validate them.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Serialize settings to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate semantic constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Validation("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(ConfigError::Validation("port must be non-zero".into()));
        }
        if self.attestation_validity_secs == 0 {
            return Err(ConfigError::Validation(
                "attestation_validity_secs must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// The attestation validity window as a [`Duration`].
    #[must_use]
    pub const fn attestation_validity(&self) -> Duration {
        Duration::from_secs(self.attestation_validity_secs)
    }

    /// The dial timeout as a [`Duration`].
    #[must_use]
    pub const fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    /// Wrap the settings for sharing across establishment paths.
    #[must_use]
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}
