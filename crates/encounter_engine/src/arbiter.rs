//! Discovery arbiter — the admission and lifecycle decisions of the engine.
//!
//! Every discovery, handshake callback and inbound channel passes through
//! one [`DiscoveryArbiter`]. It owns both the [`ConnectionRegistry`] and the
//! [`RecencyTracker`]; the engine keeps it behind a single lock, so each
//! method below runs as one atomic step with respect to all the others.
//!
//! Admission for a discovered address:
//! 1. evict a stale (terminated or silently dead) entry,
//! 2. reject if a pending or established connection exists,
//! 3. reject if the address was admitted less than `min_interval` ago,
//! 4. otherwise begin the handshake and register a pending connection.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::activity::{Activity, ActivityFeed};
use crate::address::{DiscoveryEvent, PeerAddress, Role};
use crate::connection::{ConnectionSnapshot, PeerConnection, TerminationReason};
use crate::error::HandshakeError;
use crate::recency::RecencyTracker;
use crate::registry::ConnectionRegistry;
use crate::sink::EncounterSink;
use crate::transport::{AttemptId, ByteStream, ChannelId, DisconnectReason, Transport, TransportEvent};

/// Outcome of an admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected(RejectReason),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Why an address was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// A pending or established connection already exists.
    Duplicate,
    /// The address was admitted less than the reconnect interval ago.
    RecentlyMet,
    /// The transport could not begin a handshake.
    TransportUnavailable,
    /// The engine has been stopped.
    NotRunning,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate => f.write_str("already connected"),
            Self::RecentlyMet => f.write_str("recently met"),
            Self::TransportUnavailable => f.write_str("transport unavailable"),
            Self::NotRunning => f.write_str("engine not running"),
        }
    }
}

/// Admission control plus connection lifecycle bookkeeping.
pub struct DiscoveryArbiter {
    registry: ConnectionRegistry,
    recency: RecencyTracker,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn EncounterSink>,
    min_interval: Duration,
    activity: ActivityFeed,
    accepting: bool,
}

impl DiscoveryArbiter {
    pub fn new(
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EncounterSink>,
        min_interval: Duration,
        activity: ActivityFeed,
    ) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            recency: RecencyTracker::new(),
            transport,
            sink,
            min_interval,
            activity,
            accepting: true,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn recency(&self) -> &RecencyTracker {
        &self.recency
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    /// Dispatch one transport event.
    pub fn handle(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Discovered(event) => {
                self.on_discovery(event);
            }
            TransportEvent::HandshakeSucceeded {
                address,
                attempt,
                channel,
            } => self.on_handshake_succeeded(address, attempt, channel),
            TransportEvent::HandshakeFailed {
                address,
                attempt,
                reason,
            } => self.on_handshake_failed(address, attempt, reason),
            TransportEvent::Disconnected {
                address,
                channel,
                reason,
            } => self.on_disconnected(address, channel, reason),
            TransportEvent::InboundAccepted { address, channel } => {
                self.on_inbound_connection_established(address, channel);
            }
        }
    }

    /// Decide whether to connect to a discovered peer.
    pub fn on_discovery(&mut self, event: DiscoveryEvent) -> Admission {
        self.on_discovery_at(event, Instant::now())
    }

    /// [`on_discovery`](Self::on_discovery) with an explicit clock reading.
    pub fn on_discovery_at(&mut self, event: DiscoveryEvent, now: Instant) -> Admission {
        let address = event.address;
        if !self.accepting {
            return self.reject(address, RejectReason::NotRunning);
        }

        self.evict_stale(&address);

        if let Some(existing) = self.registry.lookup(&address) {
            debug!("{address}: {} connection already {}", existing.role(), existing.state());
            return self.reject(address, RejectReason::Duplicate);
        }

        let previous = self.recency.last_admitted(&address);
        if !self.recency.should_admit(&address, now, self.min_interval) {
            return self.reject(address, RejectReason::RecentlyMet);
        }

        let token = match self.transport.begin_handshake(&address) {
            Ok(token) => token,
            Err(e) => {
                // Nothing was attempted, so the backoff window must not start.
                self.recency.restore(&address, previous);
                warn!("Cannot begin handshake with {address}: {e}");
                return self.reject(address, RejectReason::TransportUnavailable);
            }
        };

        let cancel = token.clone();
        if let Err(e) = self.registry.insert(PeerConnection::pending(address.clone(), token)) {
            warn!("Registry refused pending connection: {e}");
            cancel.cancel();
            return self.reject(address, RejectReason::Duplicate);
        }

        match &event.name {
            Some(name) => info!("Connecting to {name} ({address}), {}", cancel.attempt()),
            None => info!("Connecting to {address}, {}", cancel.attempt()),
        }
        self.activity.emit(Activity::Admitted { address });
        Admission::Admitted
    }

    /// Both handshake phases finished: establish and hand the stream over.
    pub fn on_handshake_succeeded(&mut self, address: PeerAddress, attempt: AttemptId, channel: ByteStream) {
        let expected = self
            .registry
            .lookup(&address)
            .is_some_and(|c| c.owns_attempt(attempt) && c.channel().is_none());
        if !expected {
            debug!("Discarding stray {} from {address} ({attempt})", channel.id());
            self.discard(channel);
            return;
        }

        if channel.handle().is_ended() {
            warn!("{} from {address} closed before it could be used", channel.id());
            self.discard(channel);
            self.retire(
                &address,
                TerminationReason::HandshakeFailed(HandshakeError::Disconnected("channel closed by peer".into())),
            );
            return;
        }

        let Some(conn) = self.registry.lookup_mut(&address) else {
            return;
        };
        if !conn.establish(channel.handle().clone()) {
            self.discard(channel);
            return;
        }
        let role = conn.role();

        info!("Connected to {address} as {role} on {}", channel.id());
        self.activity.emit(Activity::Established {
            address: address.clone(),
            role,
        });
        self.sink.on_connected(channel, address, role);
    }

    /// The handshake for `attempt` failed or timed out.
    pub fn on_handshake_failed(&mut self, address: PeerAddress, attempt: AttemptId, reason: HandshakeError) {
        let owned = self
            .registry
            .lookup(&address)
            .is_some_and(|c| c.owns_attempt(attempt) && c.channel().is_none());
        if !owned {
            debug!("Ignoring failure of stale {attempt} for {address}: {reason}");
            return;
        }
        warn!("Handshake with {address} failed: {reason}");
        self.retire(&address, TerminationReason::HandshakeFailed(reason));
    }

    /// An established channel went away.
    pub fn on_disconnected(&mut self, address: PeerAddress, channel: ChannelId, reason: DisconnectReason) {
        let owned = self
            .registry
            .lookup(&address)
            .is_some_and(|c| c.owns_channel(channel));
        if !owned {
            debug!("Ignoring disconnect of unknown {channel} for {address}");
            return;
        }
        info!("{address} disconnected ({reason})");
        self.retire(&address, TerminationReason::Disconnected(reason));
    }

    /// A remote peer opened a channel to us. No recency check applies: an
    /// inbound connection is not a retry triggered by discovery.
    pub fn on_inbound_connection_established(&mut self, address: PeerAddress, channel: ByteStream) -> Admission {
        if !self.accepting {
            self.discard(channel);
            return self.reject(address, RejectReason::NotRunning);
        }

        self.evict_stale(&address);

        if self.registry.lookup(&address).is_some() {
            debug!("Refusing inbound {} from {address}: already connected", channel.id());
            self.discard(channel);
            return self.reject(address, RejectReason::Duplicate);
        }

        let conn = PeerConnection::accepted(address.clone(), channel.handle().clone());
        if let Err(e) = self.registry.insert(conn) {
            warn!("Registry refused inbound connection: {e}");
            self.discard(channel);
            return self.reject(address, RejectReason::Duplicate);
        }

        info!("Accepted {address} as acceptor on {}", channel.id());
        self.activity.emit(Activity::Established {
            address: address.clone(),
            role: Role::Acceptor,
        });
        self.sink.on_connected(channel, address, Role::Acceptor);
        Admission::Admitted
    }

    /// Close the connection to `address`, if any. Returns whether a live
    /// connection was closed.
    pub fn close(&mut self, address: &PeerAddress) -> bool {
        if self.registry.lookup(address).is_none() {
            return false;
        }
        self.retire(address, TerminationReason::Closed)
    }

    /// Retire connections whose streams died silently and forget recency
    /// records that can no longer reject anything.
    pub fn sweep(&mut self, now: Instant) {
        for conn in self.registry.sweep(self.transport.as_ref()) {
            self.announce_terminated(&conn);
        }
        let pruned = self.recency.prune(now, self.min_interval);
        if pruned > 0 {
            debug!("Pruned {pruned} expired recency records");
        }
    }

    /// Cancel pending attempts, close established channels and forget every
    /// address. Idempotent.
    pub fn stop(&mut self) {
        self.accepting = false;
        let closed = self.registry.remove_all(self.transport.as_ref());
        if !closed.is_empty() {
            info!("Closed {} connection(s) on shutdown", closed.len());
        }
        for conn in &closed {
            self.announce_terminated(conn);
        }
        self.recency.clear();
    }

    /// Accept events again after [`stop`](Self::stop).
    pub fn resume(&mut self) {
        self.accepting = true;
    }

    /// Snapshots of all live connections.
    pub fn snapshot(&self) -> Vec<ConnectionSnapshot> {
        self.registry.iter().map(PeerConnection::snapshot).collect()
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn reject(&self, address: PeerAddress, reason: RejectReason) -> Admission {
        debug!("Not connecting to {address}: {reason}");
        self.activity.emit(Activity::Rejected { address, reason });
        Admission::Rejected(reason)
    }

    fn evict_stale(&mut self, address: &PeerAddress) {
        if let Some(conn) = self.registry.evict_if_terminated(address, self.transport.as_ref()) {
            self.announce_terminated(&conn);
        }
    }

    /// Terminate and evict in one step, so no later lookup sees the entry.
    fn retire(&mut self, address: &PeerAddress, reason: TerminationReason) -> bool {
        let Some(mut conn) = self.registry.remove(address) else {
            return false;
        };
        let changed = conn.terminate(reason, self.transport.as_ref());
        if changed {
            self.announce_terminated(&conn);
        }
        changed
    }

    fn announce_terminated(&self, conn: &PeerConnection) {
        let reason = conn
            .termination()
            .map(ToString::to_string)
            .unwrap_or_default();
        self.activity.emit(Activity::Terminated {
            address: conn.address().clone(),
            role: conn.role(),
            reason,
        });
    }

    /// Close a channel nobody will own.
    fn discard(&self, channel: ByteStream) {
        let handle = channel.handle().clone();
        drop(channel);
        if handle.begin_release() {
            if let Err(e) = self.transport.close_channel(&handle) {
                warn!("Closing discarded {} failed: {e}", handle.id());
            }
        }
    }
}
