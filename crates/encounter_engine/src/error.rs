//! Engine error types.

use std::time::Duration;

use crate::address::PeerAddress;

/// Errors that can occur in the encounter_engine crate.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The transport cannot be used (radio disabled, permission missing).
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A transport-level error.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The engine is not running.
    #[error("Engine not running")]
    NotRunning,
}

/// Errors raised by a [`Transport`](crate::transport::Transport) implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The radio is switched off or missing.
    #[error("Radio unavailable: {0}")]
    Unavailable(String),

    /// The process lacks the permissions needed to use the radio.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The transport was asked to work while stopped.
    #[error("Transport not started")]
    NotStarted,

    /// Closing a channel failed.
    #[error("Teardown failed: {0}")]
    Teardown(String),

    /// Any other transport failure.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Whether this error means no handshake can be attempted at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::PermissionDenied(_) | Self::NotStarted
        )
    }
}

/// Why a handshake did not produce a channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    /// The peer does not offer the expected service/characteristic.
    #[error("Service not found on peer")]
    ServiceNotFound,

    /// The rendezvous parameter could not be read or decoded.
    #[error("Bad rendezvous parameter: {0}")]
    Rendezvous(String),

    /// Opening the byte-stream channel failed.
    #[error("Channel open failed: {0}")]
    ChannelOpen(String),

    /// The link dropped before the channel was open.
    #[error("Disconnected during handshake: {0}")]
    Disconnected(String),

    /// The transport's handshake timer fired.
    #[error("Handshake timed out after {0:?}")]
    Timeout(Duration),

    /// The attempt was cancelled locally.
    #[error("Handshake cancelled")]
    Cancelled,
}

/// Raised by [`ConnectionRegistry::insert`](crate::registry::ConnectionRegistry::insert).
/// Internal to the engine: a duplicate is reported as a rejected admission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Connection to {0} already present")]
    AlreadyPresent(PeerAddress),
}
