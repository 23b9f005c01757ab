//! EncounterEngine — top-level coordinator.
//!
//! [`EncounterEngine`] wires a [`Transport`] to a [`DiscoveryArbiter`]:
//! - starts and stops the transport
//! - runs the decision loop that feeds transport events to the arbiter
//! - periodically sweeps dead connections and stale recency records
//! - hands out cheap [`EngineHandle`]s for status queries and direct calls

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::activity::{Activity, ActivityFeed, ActivityRecord};
use crate::address::{DiscoveryEvent, PeerAddress};
use crate::arbiter::{Admission, DiscoveryArbiter};
use crate::config::EngineConfig;
use crate::connection::{ConnectionSnapshot, ConnectionState};
use crate::error::EngineError;
use crate::sink::EncounterSink;
use crate::transport::{ByteStream, Transport, TransportEvent};

/// The connection-management engine.
///
/// Create one per radio. Call [`start()`](EncounterEngine::start) from within
/// a tokio runtime to begin discovering and connecting.
pub struct EncounterEngine {
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    /// Registry and recency tracker, behind the one lock every decision takes.
    arbiter: Arc<Mutex<DiscoveryArbiter>>,
    activity: ActivityFeed,
    shutdown_tx: Option<broadcast::Sender<()>>,
    running: bool,
}

impl EncounterEngine {
    pub fn new(config: EngineConfig, transport: Arc<dyn Transport>, sink: Arc<dyn EncounterSink>) -> Self {
        let activity = ActivityFeed::new(config.activity_capacity);
        let mut arbiter = DiscoveryArbiter::new(
            Arc::clone(&transport),
            sink,
            config.min_reconnect_interval,
            activity.clone(),
        );
        // Nothing is admitted before start().
        arbiter.stop();
        Self {
            config,
            transport,
            arbiter: Arc::new(Mutex::new(arbiter)),
            activity,
            shutdown_tx: None,
            running: false,
        }
    }

    /// Create an engine with default config.
    pub fn with_defaults(transport: Arc<dyn Transport>, sink: Arc<dyn EncounterSink>) -> Self {
        Self::new(EngineConfig::default(), transport, sink)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// A cloneable handle onto the running engine's state.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            arbiter: Arc::clone(&self.arbiter),
            activity: self.activity.clone(),
        }
    }

    /// Start the transport and the decision loop. Refused if the radio is
    /// unavailable; a no-op if already running.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.running {
            debug!("Engine already running");
            return Ok(());
        }

        if let Err(e) = self.transport.check_available() {
            warn!("Not starting: {e}");
            return Err(EngineError::TransportUnavailable(e.to_string()));
        }

        self.arbiter.lock().resume();

        let (event_tx, event_rx) = mpsc::channel(self.config.event_queue_capacity.max(1));
        if let Err(e) = self.transport.start(event_tx) {
            self.arbiter.lock().stop();
            return Err(if e.is_unavailable() {
                EngineError::TransportUnavailable(e.to_string())
            } else {
                EngineError::Transport(e)
            });
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        let arbiter = Arc::clone(&self.arbiter);
        let sweep_interval = self.config.sweep_interval;
        tokio::spawn(async move {
            Self::event_loop(event_rx, arbiter, sweep_interval, shutdown_rx).await;
        });

        self.running = true;
        self.activity.emit(Activity::Started);
        info!(
            "Encounter engine started (reconnect interval {:?})",
            self.config.min_reconnect_interval
        );
        Ok(())
    }

    /// Stop the decision loop and the transport, cancel pending handshakes,
    /// close every channel and forget all addresses. A no-op if not running.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.transport.stop();
        self.arbiter.lock().stop();

        self.running = false;
        self.activity.emit(Activity::Stopped);
        info!("Encounter engine stopped");
    }

    /// Close the connection to `address`. Returns whether one was open.
    pub fn close(&self, address: &PeerAddress) -> Result<bool, EngineError> {
        if !self.running {
            return Err(EngineError::NotRunning);
        }
        Ok(self.arbiter.lock().close(address))
    }

    // -----------------------------------------------------------------------
    // Internal tasks
    // -----------------------------------------------------------------------

    /// Decision loop: one arbiter call per transport event, plus a periodic
    /// sweep. The lock is never held across an await.
    async fn event_loop(
        mut event_rx: mpsc::Receiver<TransportEvent>,
        arbiter: Arc<Mutex<DiscoveryArbiter>>,
        sweep_interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut sweep = tokio::time::interval(sweep_interval.max(Duration::from_millis(1)));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = event_rx.recv() => match event {
                    Some(event) => arbiter.lock().handle(event),
                    None => {
                        debug!("Transport event channel closed");
                        break;
                    }
                },

                _ = sweep.tick() => {
                    arbiter.lock().sweep(Instant::now());
                }

                _ = shutdown.recv() => {
                    debug!("Decision loop shutting down");
                    break;
                }
            }
        }

        // Anything still queued carries channels nobody will own.
        event_rx.close();
        while let Ok(event) = event_rx.try_recv() {
            arbiter.lock().handle(event);
        }
    }
}

impl Drop for EncounterEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cheap, cloneable access to a running engine.
///
/// Transports that prefer calling in directly, rather than through the event
/// queue, can use the `on_*` methods; they take the same lock as the
/// decision loop.
#[derive(Clone)]
pub struct EngineHandle {
    arbiter: Arc<Mutex<DiscoveryArbiter>>,
    activity: ActivityFeed,
}

impl EngineHandle {
    pub fn on_discovery(&self, event: DiscoveryEvent) -> Admission {
        self.arbiter.lock().on_discovery(event)
    }

    pub fn on_inbound_connection_established(&self, address: PeerAddress, channel: ByteStream) -> Admission {
        self.arbiter
            .lock()
            .on_inbound_connection_established(address, channel)
    }

    /// Feed any transport event through the arbiter.
    pub fn dispatch(&self, event: TransportEvent) {
        self.arbiter.lock().handle(event);
    }

    /// Close the connection to `address`. Returns whether one was open.
    pub fn close(&self, address: &PeerAddress) -> bool {
        self.arbiter.lock().close(address)
    }

    /// Number of pending plus established connections.
    pub fn connection_count(&self) -> usize {
        self.arbiter.lock().registry().len()
    }

    pub fn connections(&self) -> Vec<ConnectionSnapshot> {
        let mut all = self.arbiter.lock().snapshot();
        all.sort_by(|a, b| a.address.cmp(&b.address));
        all
    }

    pub fn state_of(&self, address: &PeerAddress) -> Option<ConnectionState> {
        self.arbiter.lock().registry().lookup(address).map(|c| c.state())
    }

    /// Subscribe to the activity feed.
    pub fn subscribe(&self) -> broadcast::Receiver<ActivityRecord> {
        self.activity.subscribe()
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
