//! Radio medium — the shared air that simulated stations talk over.
//!
//! Every [`MemoryTransport`](crate::MemoryTransport) joins one medium. The
//! medium holds each station's advertisement, the channel number its
//! listener accepts on, and both ends of every open link, so that closing
//! one end can be reported to the other.

use std::collections::HashMap;
use std::sync::Arc;

use encounter_engine::{
    ByteStream, ChannelHandle, ChannelId, DiscoveryEvent, DisconnectReason, HandshakeError,
    PeerAddress, TransportEvent,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::RadioError;
use crate::rendezvous;

/// First channel number handed out. Lower numbers are reserved on real
/// radios.
const FIRST_CHANNEL_NUMBER: u32 = 0x80;

/// Shared in-memory radio. Cheap to clone.
#[derive(Clone, Default)]
pub struct RadioMedium {
    state: Arc<Mutex<MediumState>>,
}

#[derive(Default)]
struct MediumState {
    stations: HashMap<PeerAddress, Station>,
    links: HashMap<ChannelId, LinkEnd>,
    next_channel_number: u32,
}

struct Station {
    name: Option<String>,
    in_range: bool,
    on_air: Option<OnAir>,
}

/// A station that is advertising and listening.
struct OnAir {
    service: Uuid,
    characteristic: Uuid,
    channel_number: u32,
    events: mpsc::Sender<TransportEvent>,
}

/// One side of an open link.
struct LinkEnd {
    owner: PeerAddress,
    peer: PeerAddress,
    handle: ChannelHandle,
    peer_channel: ChannelId,
}

impl RadioMedium {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a station. Addresses are unique on one medium.
    pub fn join(&self, address: PeerAddress, name: Option<String>) -> Result<(), RadioError> {
        let mut state = self.state.lock();
        if state.stations.contains_key(&address) {
            return Err(RadioError::AddressInUse(address.to_string()));
        }
        state.stations.insert(
            address,
            Station {
                name,
                in_range: true,
                on_air: None,
            },
        );
        Ok(())
    }

    /// Remove a station, dropping every link it has.
    pub fn leave(&self, address: &PeerAddress) {
        let mut state = self.state.lock();
        state.sever(address, DisconnectReason::Error("peer left".into()));
        state.stations.remove(address);
    }

    /// Move a station into or out of radio range. Leaving range drops its
    /// links on both sides.
    pub fn set_in_range(&self, address: &PeerAddress, in_range: bool) {
        let mut state = self.state.lock();
        if let Some(station) = state.stations.get_mut(address) {
            station.in_range = in_range;
        }
        if !in_range {
            state.sever(address, DisconnectReason::Error("out of range".into()));
        }
    }

    /// Number of open links.
    pub fn link_count(&self) -> usize {
        self.state.lock().links.len() / 2
    }

    pub fn is_on_air(&self, address: &PeerAddress) -> bool {
        self.state
            .lock()
            .stations
            .get(address)
            .is_some_and(|s| s.on_air.is_some())
    }

    // -----------------------------------------------------------------------
    // Transport-facing operations
    // -----------------------------------------------------------------------

    /// Start advertising `service` and listening. Returns the channel number.
    pub(crate) fn go_on_air(
        &self,
        address: &PeerAddress,
        service: Uuid,
        characteristic: Uuid,
        events: mpsc::Sender<TransportEvent>,
    ) -> u32 {
        let mut state = self.state.lock();
        let channel_number = FIRST_CHANNEL_NUMBER + state.next_channel_number;
        state.next_channel_number += 1;
        if let Some(station) = state.stations.get_mut(address) {
            station.on_air = Some(OnAir {
                service,
                characteristic,
                channel_number,
                events,
            });
        }
        channel_number
    }

    /// Stop advertising and listening. Open links stay up.
    pub(crate) fn go_off_air(&self, address: &PeerAddress) {
        if let Some(station) = self.state.lock().stations.get_mut(address) {
            station.on_air = None;
        }
    }

    /// Drop every link of `address`, reporting to both ends.
    pub(crate) fn drop_links(&self, address: &PeerAddress, reason: DisconnectReason) {
        self.state.lock().sever(address, reason);
    }

    /// Stations in range advertising `service`, other than `from`. A
    /// station hears nothing while it is off the air.
    pub(crate) fn scan(&self, from: &PeerAddress, service: Uuid) -> Vec<DiscoveryEvent> {
        let state = self.state.lock();
        let listening = state
            .stations
            .get(from)
            .is_some_and(|s| s.in_range && s.on_air.is_some());
        if !listening {
            return Vec::new();
        }
        let mut found: Vec<DiscoveryEvent> = state
            .stations
            .iter()
            .filter(|(address, station)| {
                *address != from
                    && station.in_range
                    && station.on_air.as_ref().is_some_and(|a| a.service == service)
            })
            .map(|(address, station)| {
                let mut event = DiscoveryEvent::new(address.clone())
                    .with_metadata("service_uuid", service.to_string());
                if let Some(name) = &station.name {
                    event = event.with_name(name.clone());
                }
                event
            })
            .collect();
        found.sort_by(|a, b| a.address.cmp(&b.address));
        found
    }

    /// Handshake phase one: read the rendezvous characteristic of `target`.
    pub(crate) fn read_characteristic(
        &self,
        from: &PeerAddress,
        target: &PeerAddress,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, HandshakeError> {
        let state = self.state.lock();
        if !state.in_range(from) || !state.in_range(target) {
            return Err(HandshakeError::Disconnected("peer out of range".into()));
        }
        let on_air = state
            .stations
            .get(target)
            .and_then(|s| s.on_air.as_ref())
            .filter(|a| a.service == service)
            .ok_or(HandshakeError::ServiceNotFound)?;
        if on_air.characteristic != characteristic {
            return Err(HandshakeError::Rendezvous(format!(
                "characteristic {characteristic} not found"
            )));
        }
        Ok(rendezvous::encode(on_air.channel_number).to_vec())
    }

    /// Handshake phase two: open a channel to `target`'s listener. The
    /// remote end is delivered to the target as an inbound channel.
    pub(crate) fn open_channel(
        &self,
        from: &PeerAddress,
        target: &PeerAddress,
        channel_number: u32,
        buffer: usize,
    ) -> Result<ByteStream, HandshakeError> {
        let mut state = self.state.lock();
        if !state.in_range(from) || !state.in_range(target) {
            return Err(HandshakeError::Disconnected("peer out of range".into()));
        }
        let events = state
            .stations
            .get(target)
            .and_then(|s| s.on_air.as_ref())
            .filter(|a| a.channel_number == channel_number)
            .map(|a| a.events.clone())
            .ok_or_else(|| HandshakeError::ChannelOpen(format!("no listener on channel {channel_number}")))?;

        let (local_io, remote_io) = tokio::io::duplex(buffer.max(1));
        let local = ChannelHandle::new();
        let remote = ChannelHandle::new();

        let inbound = TransportEvent::InboundAccepted {
            address: from.clone(),
            channel: ByteStream::new(remote.clone(), remote_io),
        };
        if let Err(e) = events.try_send(inbound) {
            return Err(HandshakeError::ChannelOpen(format!("listener unavailable: {e}")));
        }

        state.links.insert(
            local.id(),
            LinkEnd {
                owner: from.clone(),
                peer: target.clone(),
                handle: local.clone(),
                peer_channel: remote.id(),
            },
        );
        state.links.insert(
            remote.id(),
            LinkEnd {
                owner: target.clone(),
                peer: from.clone(),
                handle: remote,
                peer_channel: local.id(),
            },
        );
        debug!("Link {from} -> {target} open on channel {channel_number}");
        Ok(ByteStream::new(local, local_io))
    }

    /// Tear down the link `channel` belongs to and tell the other end. Both
    /// streams read EOF from here on. Unknown channels are ignored.
    pub(crate) fn release(&self, channel: ChannelId) {
        let mut state = self.state.lock();
        let Some(end) = state.links.remove(&channel) else {
            return;
        };
        end.handle.close();
        if let Some(peer_end) = state.links.remove(&end.peer_channel) {
            peer_end.handle.close();
            state.notify(
                &peer_end.owner,
                TransportEvent::Disconnected {
                    address: end.owner.clone(),
                    channel: peer_end.handle.id(),
                    reason: DisconnectReason::Clean,
                },
            );
        }
        debug!("Link {} -> {} released", end.owner, end.peer);
    }
}

impl MediumState {
    fn in_range(&self, address: &PeerAddress) -> bool {
        self.stations.get(address).is_some_and(|s| s.in_range)
    }

    fn notify(&self, owner: &PeerAddress, event: TransportEvent) {
        let Some(on_air) = self.stations.get(owner).and_then(|s| s.on_air.as_ref()) else {
            return;
        };
        if let Err(e) = on_air.events.try_send(event) {
            warn!("Dropping event for {owner}: {e}");
        }
    }

    fn sever(&mut self, address: &PeerAddress, reason: DisconnectReason) {
        let ids: Vec<ChannelId> = self
            .links
            .iter()
            .filter(|(_, end)| &end.owner == address)
            .map(|(id, _)| *id)
            .collect();

        for id in ids {
            let Some(end) = self.links.remove(&id) else {
                continue;
            };
            let peer_end = self.links.remove(&end.peer_channel);
            end.handle.close();
            self.notify(
                &end.owner,
                TransportEvent::Disconnected {
                    address: end.peer.clone(),
                    channel: end.handle.id(),
                    reason: reason.clone(),
                },
            );
            if let Some(peer_end) = peer_end {
                peer_end.handle.close();
                self.notify(
                    &peer_end.owner,
                    TransportEvent::Disconnected {
                        address: end.owner.clone(),
                        channel: peer_end.handle.id(),
                        reason: reason.clone(),
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> PeerAddress {
        PeerAddress::from(s)
    }

    fn medium_with(stations: &[&str]) -> RadioMedium {
        let medium = RadioMedium::new();
        for s in stations {
            medium.join(addr(s), Some(format!("node {s}"))).unwrap();
        }
        medium
    }

    #[test]
    fn test_join_rejects_duplicate_address() {
        let medium = medium_with(&["AA"]);
        assert!(matches!(
            medium.join(addr("AA"), None),
            Err(RadioError::AddressInUse(_))
        ));
    }

    #[test]
    fn test_scan_filters_by_service_and_skips_self() {
        let medium = medium_with(&["AA", "BB", "CC"]);
        let service = Uuid::from_u128(1);
        let (tx, _rx) = mpsc::channel(8);
        medium.go_on_air(&addr("AA"), service, Uuid::from_u128(2), tx.clone());
        medium.go_on_air(&addr("BB"), service, Uuid::from_u128(2), tx.clone());
        medium.go_on_air(&addr("CC"), Uuid::from_u128(9), Uuid::from_u128(2), tx);

        let found = medium.scan(&addr("AA"), service);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].address, addr("BB"));
        assert_eq!(found[0].name.as_deref(), Some("node BB"));
        assert_eq!(found[0].metadata["service_uuid"], service.to_string());

        medium.set_in_range(&addr("BB"), false);
        assert!(medium.scan(&addr("AA"), service).is_empty());
    }

    #[test]
    fn test_read_characteristic_errors() {
        let medium = medium_with(&["AA", "BB"]);
        let service = Uuid::from_u128(1);
        let characteristic = Uuid::from_u128(2);

        assert_eq!(
            medium.read_characteristic(&addr("AA"), &addr("BB"), service, characteristic),
            Err(HandshakeError::ServiceNotFound)
        );

        let (tx, _rx) = mpsc::channel(8);
        let number = medium.go_on_air(&addr("BB"), service, characteristic, tx);
        let bytes = medium
            .read_characteristic(&addr("AA"), &addr("BB"), service, characteristic)
            .unwrap();
        assert_eq!(rendezvous::decode(&bytes).unwrap(), number);

        assert!(matches!(
            medium.read_characteristic(&addr("AA"), &addr("BB"), service, Uuid::from_u128(3)),
            Err(HandshakeError::Rendezvous(_))
        ));
        assert!(matches!(
            medium.read_characteristic(&addr("AA"), &addr("ZZ"), service, characteristic),
            Err(HandshakeError::Disconnected(_))
        ));
    }

    #[tokio::test]
    async fn test_open_and_release_notifies_peer() {
        let medium = medium_with(&["AA", "BB"]);
        let service = Uuid::from_u128(1);
        let (a_tx, mut a_rx) = mpsc::channel(8);
        let (b_tx, mut b_rx) = mpsc::channel(8);
        medium.go_on_air(&addr("AA"), service, Uuid::from_u128(2), a_tx);
        let number = medium.go_on_air(&addr("BB"), service, Uuid::from_u128(2), b_tx);

        assert!(matches!(
            medium.open_channel(&addr("AA"), &addr("BB"), number + 1, 64),
            Err(HandshakeError::ChannelOpen(_))
        ));

        let local = medium.open_channel(&addr("AA"), &addr("BB"), number, 64).unwrap();
        assert_eq!(medium.link_count(), 1);

        let remote_id = match b_rx.recv().await.unwrap() {
            TransportEvent::InboundAccepted { address, channel } => {
                assert_eq!(address, addr("AA"));
                channel.id()
            }
            other => panic!("Expected InboundAccepted, got {other:?}"),
        };

        medium.release(local.id());
        medium.release(local.id());
        assert_eq!(medium.link_count(), 0);
        assert!(local.handle().is_ended());

        match b_rx.recv().await.unwrap() {
            TransportEvent::Disconnected {
                address,
                channel,
                reason,
            } => {
                assert_eq!(address, addr("AA"));
                assert_eq!(channel, remote_id);
                assert_eq!(reason, DisconnectReason::Clean);
            }
            other => panic!("Expected Disconnected, got {other:?}"),
        }
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leaving_range_severs_both_ends() {
        let medium = medium_with(&["AA", "BB"]);
        let service = Uuid::from_u128(1);
        let (a_tx, mut a_rx) = mpsc::channel(8);
        let (b_tx, mut b_rx) = mpsc::channel(8);
        medium.go_on_air(&addr("AA"), service, Uuid::from_u128(2), a_tx);
        let number = medium.go_on_air(&addr("BB"), service, Uuid::from_u128(2), b_tx);
        let local = medium.open_channel(&addr("AA"), &addr("BB"), number, 64).unwrap();
        let _inbound = b_rx.recv().await.unwrap();

        medium.set_in_range(&addr("BB"), false);
        assert_eq!(medium.link_count(), 0);
        assert!(local.handle().is_ended());

        assert!(matches!(
            a_rx.recv().await.unwrap(),
            TransportEvent::Disconnected { reason: DisconnectReason::Error(_), .. }
        ));
        assert!(matches!(
            b_rx.recv().await.unwrap(),
            TransportEvent::Disconnected { reason: DisconnectReason::Error(_), .. }
        ));
    }
}
