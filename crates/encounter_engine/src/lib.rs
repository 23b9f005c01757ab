//! Encounter Engine — connection management for opportunistic radio links.
//!
//! Devices running the engine discover one another over a short-range radio,
//! open a bidirectional byte stream to each peer they encounter, and hand the
//! stream to an upper layer. The engine decides *whether* to connect:
//!
//! - **Duplicate suppression**: at most one pending or established
//!   connection per peer address.
//! - **Reconnect backoff**: an address is not retried within a minimum
//!   interval of its last admitted attempt.
//! - **Roles**: the side that initiated is the `Initiator`, the side that
//!   accepted is the `Acceptor`.
//! - **Lifecycle**: `Pending → Established → Terminated`, with stale entries
//!   evicted before each decision.
//!
//! The radio itself sits behind the [`Transport`] trait.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use encounter_engine::{ByteStream, EncounterEngine, EngineConfig, PeerAddress, Role, Transport};
//!
//! # fn radio() -> Arc<dyn Transport> { unimplemented!() }
//! # async fn example() {
//! let sink = |stream: ByteStream, address: PeerAddress, role: Role| {
//!     tracing::info!("{address} connected as {role}");
//!     drop(stream);
//! };
//! let mut engine = EncounterEngine::new(EngineConfig::default(), radio(), Arc::new(sink));
//!
//! engine.start().unwrap();
//! // ... peers are discovered and connected in the background ...
//! engine.stop();
//! # }
//! ```

pub mod activity;
pub mod address;
pub mod arbiter;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod recency;
pub mod registry;
pub mod sink;
pub mod transport;

// ── Re-exports for convenience ──────────────────────────────────────────

pub use activity::{Activity, ActivityRecord};
pub use address::{DiscoveryEvent, PeerAddress, Role};
pub use arbiter::{Admission, RejectReason};
pub use config::EngineConfig;
pub use connection::{ConnectionSnapshot, ConnectionState, TerminationReason};
pub use engine::{EncounterEngine, EngineHandle};
pub use error::{EngineError, HandshakeError, TransportError};
pub use sink::EncounterSink;
pub use transport::{
    AttemptId, ByteStream, CancelToken, ChannelHandle, ChannelId, DisconnectReason, Transport,
    TransportEvent,
};
