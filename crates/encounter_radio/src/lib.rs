//! Encounter Radio — an in-memory radio for the encounter engine.
//!
//! Stations join a shared [`RadioMedium`]; each one gets a
//! [`MemoryTransport`] implementing [`encounter_engine::Transport`]. Nodes
//! advertise a service UUID, scan for one another, and connect with the same
//! two-phase handshake a short-range radio uses: read a 4-byte rendezvous
//! parameter from the peer, then open the byte channel it names.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use encounter_engine::{ByteStream, EncounterEngine, EngineConfig, PeerAddress, Role};
//! use encounter_radio::{MemoryTransport, RadioConfig, RadioMedium};
//!
//! # async fn example() {
//! let medium = RadioMedium::new();
//! let radio = MemoryTransport::new(&medium, "AA", None, RadioConfig::default()).unwrap();
//! let sink = Arc::new(|_stream: ByteStream, address: PeerAddress, role: Role| {
//!     println!("met {address} as {role}");
//! });
//! let mut engine = EncounterEngine::new(EngineConfig::default(), Arc::new(radio), sink);
//! engine.start().unwrap();
//! # }
//! ```

pub mod config;
pub mod error;
pub mod medium;
pub mod memory;
pub mod rendezvous;

pub use config::RadioConfig;
pub use error::RadioError;
pub use medium::RadioMedium;
pub use memory::MemoryTransport;
