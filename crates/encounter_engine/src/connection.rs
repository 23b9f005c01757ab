//! Peer connection — one channel attempt to a single address and its
//! lifecycle state machine.
//!
//! ```text
//! Pending ──handshake ok──▶ Established ──disconnect / close──▶ Terminated
//!    └──────────── failure / timeout / cancel ─────────────────────▲
//! ```
//!
//! `Terminated` is final. A connection never retries on its own; a retry is
//! a fresh admission decision made by the arbiter.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::address::{PeerAddress, Role};
use crate::error::HandshakeError;
use crate::transport::{AttemptId, CancelToken, ChannelHandle, ChannelId, DisconnectReason, Transport};

/// Lifecycle state of a [`PeerConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Created, handshake not yet complete.
    Pending,
    /// Byte stream live and handed to the sink.
    Established,
    /// Closed, cleanly or with an error.
    Terminated,
}

impl ConnectionState {
    /// Whether the state still occupies the registry slot.
    pub fn is_live(&self) -> bool {
        !matches!(self, ConnectionState::Terminated)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Established => f.write_str("established"),
            Self::Terminated => f.write_str("terminated"),
        }
    }
}

/// Why a connection reached `Terminated`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    HandshakeFailed(HandshakeError),
    Disconnected(DisconnectReason),
    /// The stream hit EOF or was dropped/shut down by the sink.
    StreamEnded,
    /// Explicit local close.
    Closed,
    /// Engine shutdown.
    Shutdown,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandshakeFailed(e) => write!(f, "handshake failed: {e}"),
            Self::Disconnected(reason) => write!(f, "disconnected ({reason})"),
            Self::StreamEnded => f.write_str("stream ended"),
            Self::Closed => f.write_str("closed"),
            Self::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Point-in-time view of a connection, safe to hand out of the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub address: PeerAddress,
    pub role: Role,
    pub state: ConnectionState,
    pub channel: Option<ChannelId>,
    pub opened_at: Instant,
}

/// One in-progress or established channel to a single peer address.
#[derive(Debug)]
pub struct PeerConnection {
    address: PeerAddress,
    role: Role,
    state: ConnectionState,
    attempt: Option<CancelToken>,
    channel: Option<ChannelHandle>,
    opened_at: Instant,
    termination: Option<TerminationReason>,
}

impl PeerConnection {
    /// An outbound attempt whose handshake has just been started.
    pub fn pending(address: PeerAddress, attempt: CancelToken) -> Self {
        Self {
            address,
            role: Role::Initiator,
            state: ConnectionState::Pending,
            attempt: Some(attempt),
            channel: None,
            opened_at: Instant::now(),
            termination: None,
        }
    }

    /// An inbound channel the transport has already accepted.
    pub fn accepted(address: PeerAddress, channel: ChannelHandle) -> Self {
        Self {
            address,
            role: Role::Acceptor,
            state: ConnectionState::Established,
            attempt: None,
            channel: Some(channel),
            opened_at: Instant::now(),
            termination: None,
        }
    }

    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// The channel handle, present only while `Established`.
    pub fn channel(&self) -> Option<&ChannelHandle> {
        match self.state {
            ConnectionState::Established => self.channel.as_ref(),
            _ => None,
        }
    }

    pub fn termination(&self) -> Option<&TerminationReason> {
        self.termination.as_ref()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            address: self.address.clone(),
            role: self.role,
            state: self.state,
            channel: self.channel().map(ChannelHandle::id),
            opened_at: self.opened_at,
        }
    }

    /// Whether a handshake callback for `attempt` belongs to this connection.
    pub fn owns_attempt(&self, attempt: AttemptId) -> bool {
        self.attempt.as_ref().is_some_and(|t| t.attempt() == attempt)
    }

    /// Whether a channel event for `channel` belongs to this connection.
    pub fn owns_channel(&self, channel: ChannelId) -> bool {
        self.channel.as_ref().is_some_and(|c| c.id() == channel)
    }

    /// `Pending → Established`. Returns `false` (and leaves the state alone)
    /// from any other state.
    pub fn establish(&mut self, channel: ChannelHandle) -> bool {
        if self.state != ConnectionState::Pending {
            return false;
        }
        self.state = ConnectionState::Established;
        self.channel = Some(channel);
        true
    }

    /// Move to `Terminated`, cancelling a pending handshake or releasing an
    /// open channel. Idempotent: returns `false` if already terminated.
    /// Teardown errors are logged and swallowed.
    pub fn terminate(&mut self, reason: TerminationReason, transport: &dyn Transport) -> bool {
        if self.state == ConnectionState::Terminated {
            return false;
        }
        if let Some(token) = &self.attempt {
            if self.state == ConnectionState::Pending {
                token.cancel();
            }
        }
        if let Some(channel) = &self.channel {
            if channel.begin_release() {
                if let Err(e) = transport.close_channel(channel) {
                    warn!("Teardown of {} to {} failed: {e}", channel.id(), self.address);
                }
            }
        }
        debug!("{} {} -> terminated ({reason})", self.role, self.address);
        self.state = ConnectionState::Terminated;
        self.termination = Some(reason);
        true
    }

    /// Explicit local close.
    pub fn close(&mut self, transport: &dyn Transport) -> bool {
        self.terminate(TerminationReason::Closed, transport)
    }

    /// Notice a stream that died without a transport notification and
    /// retire the connection. Returns the (possibly new) state.
    pub fn observe(&mut self, transport: &dyn Transport) -> ConnectionState {
        let ended = self
            .channel
            .as_ref()
            .is_some_and(|c| c.is_ended());
        if self.state == ConnectionState::Established && ended {
            self.terminate(TerminationReason::StreamEnded, transport);
        }
        self.state
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::TransportError;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    /// Transport double that only records close calls.
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub(crate) closed: Mutex<Vec<ChannelId>>,
        pub(crate) fail_close: bool,
    }

    impl Transport for RecordingTransport {
        fn check_available(&self) -> Result<(), TransportError> {
            Ok(())
        }
        fn start(&self, _events: mpsc::Sender<crate::transport::TransportEvent>) -> Result<(), TransportError> {
            Ok(())
        }
        fn stop(&self) {}
        fn begin_handshake(&self, _address: &PeerAddress) -> Result<CancelToken, TransportError> {
            Ok(CancelToken::new())
        }
        fn close_channel(&self, channel: &ChannelHandle) -> Result<(), TransportError> {
            self.closed.lock().push(channel.id());
            if self.fail_close {
                Err(TransportError::Teardown("socket already gone".into()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_pending_connection_is_initiator() {
        let token = CancelToken::new();
        let conn = PeerConnection::pending(PeerAddress::from("AA"), token.clone());
        assert_eq!(conn.role(), Role::Initiator);
        assert_eq!(conn.state(), ConnectionState::Pending);
        assert!(conn.owns_attempt(token.attempt()));
        assert!(conn.channel().is_none());
    }

    #[test]
    fn test_accepted_connection_is_established_acceptor() {
        let channel = ChannelHandle::new();
        let conn = PeerConnection::accepted(PeerAddress::from("BB"), channel.clone());
        assert_eq!(conn.role(), Role::Acceptor);
        assert_eq!(conn.state(), ConnectionState::Established);
        assert!(conn.owns_channel(channel.id()));
        assert_eq!(conn.channel().map(|c| c.id()), Some(channel.id()));
    }

    #[test]
    fn test_establish_only_from_pending() {
        let transport = RecordingTransport::default();
        let mut conn = PeerConnection::pending(PeerAddress::from("AA"), CancelToken::new());
        assert!(conn.establish(ChannelHandle::new()));
        assert!(!conn.establish(ChannelHandle::new()));

        conn.close(&transport);
        assert!(!conn.establish(ChannelHandle::new()));
        assert_eq!(conn.state(), ConnectionState::Terminated);
    }

    #[test]
    fn test_failure_cancels_pending_handshake() {
        let transport = RecordingTransport::default();
        let token = CancelToken::new();
        let mut conn = PeerConnection::pending(PeerAddress::from("AA"), token.clone());

        let reason = TerminationReason::HandshakeFailed(HandshakeError::ServiceNotFound);
        assert!(conn.terminate(reason.clone(), &transport));
        assert!(token.is_cancelled());
        assert_eq!(conn.termination(), Some(&reason));
        assert!(transport.closed.lock().is_empty());
    }

    #[test]
    fn test_close_is_idempotent() {
        let transport = RecordingTransport::default();
        let channel = ChannelHandle::new();
        let mut conn = PeerConnection::accepted(PeerAddress::from("BB"), channel.clone());

        assert!(conn.close(&transport));
        assert!(!conn.close(&transport));
        assert_eq!(transport.closed.lock().as_slice(), &[channel.id()]);
        assert!(channel.is_released());
    }

    #[test]
    fn test_teardown_error_is_swallowed() {
        let transport = RecordingTransport {
            fail_close: true,
            ..Default::default()
        };
        let mut conn = PeerConnection::accepted(PeerAddress::from("BB"), ChannelHandle::new());
        assert!(conn.close(&transport));
        assert_eq!(conn.state(), ConnectionState::Terminated);
    }

    #[test]
    fn test_observe_retires_ended_stream() {
        let transport = RecordingTransport::default();
        let channel = ChannelHandle::new();
        let mut conn = PeerConnection::accepted(PeerAddress::from("BB"), channel.clone());

        assert_eq!(conn.observe(&transport), ConnectionState::Established);
        channel.mark_ended();
        assert_eq!(conn.observe(&transport), ConnectionState::Terminated);
        assert_eq!(conn.termination(), Some(&TerminationReason::StreamEnded));
        // The sink dropped its stream, the transport-level close still runs once.
        assert_eq!(transport.closed.lock().len(), 1);
    }
}
