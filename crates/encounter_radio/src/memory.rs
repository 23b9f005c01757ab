//! In-memory transport — a simulated radio on a shared [`RadioMedium`].
//!
//! Behaves like the real thing from the engine's point of view:
//! - advertises a service UUID and periodically scans for others
//! - runs a two-phase handshake (read the rendezvous characteristic, then
//!   open the channel it names) under a timeout, on its own task
//! - delivers inbound channels to the accepting side
//! - reports link loss for open channels
//!
//! The radio can be switched off and permissions revoked, so refusal paths
//! can be exercised without hardware.

use std::time::Duration;

use encounter_engine::{
    ByteStream, CancelToken, ChannelHandle, DisconnectReason, HandshakeError, PeerAddress,
    Transport, TransportError, TransportEvent,
};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::config::RadioConfig;
use crate::error::RadioError;
use crate::medium::RadioMedium;
use crate::rendezvous;

/// A simulated radio bound to one address on a [`RadioMedium`].
pub struct MemoryTransport {
    address: PeerAddress,
    config: RadioConfig,
    medium: RadioMedium,
    state: Mutex<RadioState>,
}

struct RadioState {
    enabled: bool,
    permitted: bool,
    running: Option<Running>,
}

struct Running {
    events: mpsc::Sender<TransportEvent>,
    shutdown: broadcast::Sender<()>,
}

impl MemoryTransport {
    /// Join `medium` as `address`. The radio starts enabled and permitted.
    pub fn new(
        medium: &RadioMedium,
        address: impl Into<PeerAddress>,
        name: Option<String>,
        config: RadioConfig,
    ) -> Result<Self, RadioError> {
        let address = address.into();
        medium.join(address.clone(), name)?;
        Ok(Self {
            address,
            config,
            medium: medium.clone(),
            state: Mutex::new(RadioState {
                enabled: true,
                permitted: true,
                running: None,
            }),
        })
    }

    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    pub fn config(&self) -> &RadioConfig {
        &self.config
    }

    pub fn medium(&self) -> &RadioMedium {
        &self.medium
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().running.is_some()
    }

    /// Switch the radio on or off. Turning it off drops every open link and
    /// takes the station off the air until it is switched back on.
    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.state.lock();
        if state.enabled == enabled {
            return;
        }
        state.enabled = enabled;
        let Some(running) = &state.running else {
            return;
        };
        if enabled {
            self.go_on_air(running.events.clone());
        } else {
            self.medium
                .drop_links(&self.address, DisconnectReason::Error("radio disabled".into()));
            self.medium.go_off_air(&self.address);
            info!("{}: radio disabled", self.address);
        }
    }

    /// Grant or revoke the permissions scanning and connecting need.
    pub fn set_permitted(&self, permitted: bool) {
        self.state.lock().permitted = permitted;
    }

    fn go_on_air(&self, events: mpsc::Sender<TransportEvent>) {
        let channel_number = self.medium.go_on_air(
            &self.address,
            self.config.service_uuid,
            self.config.characteristic_uuid,
            events,
        );
        info!(
            "{}: advertising {} (channel {channel_number})",
            self.address, self.config.service_uuid
        );
    }

    fn runtime() -> Result<Handle, TransportError> {
        Handle::try_current().map_err(|_| TransportError::Other("no async runtime".into()))
    }

    // -----------------------------------------------------------------------
    // Background tasks
    // -----------------------------------------------------------------------

    async fn scan_loop(
        medium: RadioMedium,
        address: PeerAddress,
        service: Uuid,
        delay: Duration,
        interval: Duration,
        events: mpsc::Sender<TransportEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.recv() => return,
        }

        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for found in medium.scan(&address, service) {
                        trace!("{address}: saw {}", found.address);
                        if events.send(TransportEvent::Discovered(found)).await.is_err() {
                            debug!("{address}: event receiver gone, scan loop exiting");
                            return;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    debug!("{address}: scan loop shutting down");
                    break;
                }
            }
        }
    }

    async fn run_handshake(
        medium: RadioMedium,
        local: PeerAddress,
        target: PeerAddress,
        config: RadioConfig,
        token: CancelToken,
        events: mpsc::Sender<TransportEvent>,
    ) {
        let attempt = token.attempt();
        let timeout = config.handshake_timeout;
        let outcome = tokio::select! {
            _ = token.cancelled() => Err(HandshakeError::Cancelled),
            result = tokio::time::timeout(timeout, Self::handshake(&medium, &local, &target, &config)) => {
                result.unwrap_or(Err(HandshakeError::Timeout(timeout)))
            }
        };

        let event = match outcome {
            Ok(channel) if token.is_cancelled() => {
                debug!("{local}: {attempt} cancelled after opening {}", channel.id());
                medium.release(channel.id());
                return;
            }
            Ok(channel) => TransportEvent::HandshakeSucceeded {
                address: target,
                attempt,
                channel,
            },
            Err(HandshakeError::Cancelled) => {
                debug!("{local}: {attempt} to {target} cancelled");
                return;
            }
            Err(reason) => TransportEvent::HandshakeFailed {
                address: target,
                attempt,
                reason,
            },
        };

        if let Err(mpsc::error::SendError(event)) = events.send(event).await {
            if let TransportEvent::HandshakeSucceeded { channel, .. } = event {
                medium.release(channel.id());
            }
        }
    }

    /// Phase one reads where to connect, phase two connects there.
    async fn handshake(
        medium: &RadioMedium,
        local: &PeerAddress,
        target: &PeerAddress,
        config: &RadioConfig,
    ) -> Result<ByteStream, HandshakeError> {
        tokio::time::sleep(config.link_latency).await;
        let param = medium.read_characteristic(
            local,
            target,
            config.service_uuid,
            config.characteristic_uuid,
        )?;
        let channel_number =
            rendezvous::decode(&param).map_err(|e| HandshakeError::Rendezvous(e.to_string()))?;

        tokio::time::sleep(config.link_latency).await;
        medium.open_channel(local, target, channel_number, config.channel_buffer)
    }
}

impl Transport for MemoryTransport {
    fn check_available(&self) -> Result<(), TransportError> {
        let state = self.state.lock();
        if !state.enabled {
            return Err(TransportError::Unavailable("radio disabled".into()));
        }
        if !state.permitted {
            return Err(TransportError::PermissionDenied(
                "scan, connect and advertise".into(),
            ));
        }
        Ok(())
    }

    fn start(&self, events: mpsc::Sender<TransportEvent>) -> Result<(), TransportError> {
        self.check_available()?;
        let runtime = Self::runtime()?;

        let mut state = self.state.lock();
        if state.running.is_some() {
            return Ok(());
        }

        self.go_on_air(events.clone());
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        if self.config.scanning {
            runtime.spawn(Self::scan_loop(
                self.medium.clone(),
                self.address.clone(),
                self.config.service_uuid,
                self.config.scan_delay,
                self.config.scan_interval,
                events.clone(),
                shutdown_rx,
            ));
        }
        state.running = Some(Running { events, shutdown });
        Ok(())
    }

    fn stop(&self) {
        let Some(running) = self.state.lock().running.take() else {
            return;
        };
        let _ = running.shutdown.send(());
        self.medium.go_off_air(&self.address);
        info!("{}: radio stopped", self.address);
    }

    fn begin_handshake(&self, address: &PeerAddress) -> Result<CancelToken, TransportError> {
        self.check_available()?;
        let events = self
            .state
            .lock()
            .running
            .as_ref()
            .map(|r| r.events.clone())
            .ok_or(TransportError::NotStarted)?;
        let runtime = Self::runtime()?;

        let token = CancelToken::new();
        debug!("{}: {} to {address}", self.address, token.attempt());
        runtime.spawn(Self::run_handshake(
            self.medium.clone(),
            self.address.clone(),
            address.clone(),
            self.config.clone(),
            token.clone(),
            events,
        ));
        Ok(token)
    }

    fn close_channel(&self, channel: &ChannelHandle) -> Result<(), TransportError> {
        channel.close();
        self.medium.release(channel.id());
        Ok(())
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.stop();
        self.medium.leave(&self.address);
    }
}
