//! Connection registry — the single source of truth for "is there already a
//! live or pending connection to this address".

use std::collections::HashMap;

use tracing::debug;

use crate::address::PeerAddress;
use crate::connection::{ConnectionState, PeerConnection, TerminationReason};
use crate::error::RegistryError;
use crate::transport::Transport;

/// Maps each peer address to its current [`PeerConnection`].
///
/// Holds at most one entry per address, and at most one non-terminated
/// connection per address. Not internally synchronized: the arbiter owns it
/// behind the engine's single lock.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<PeerAddress, PeerConnection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }

    /// The live (pending or established) connection for `address`.
    pub fn lookup(&self, address: &PeerAddress) -> Option<&PeerConnection> {
        self.connections.get(address).filter(|c| c.is_live())
    }

    pub fn lookup_mut(&mut self, address: &PeerAddress) -> Option<&mut PeerConnection> {
        self.connections.get_mut(address).filter(|c| c.is_live())
    }

    /// Insert a connection under its own address. Fails if a live entry
    /// already exists; a terminated leftover is replaced.
    pub fn insert(&mut self, connection: PeerConnection) -> Result<(), RegistryError> {
        let address = connection.address().clone();
        if self.lookup(&address).is_some() {
            return Err(RegistryError::AlreadyPresent(address));
        }
        self.connections.insert(address, connection);
        Ok(())
    }

    /// Remove the entry for `address` iff it is terminated, after giving it
    /// the chance to notice a dead stream. Returns the evicted connection.
    pub fn evict_if_terminated(
        &mut self,
        address: &PeerAddress,
        transport: &dyn Transport,
    ) -> Option<PeerConnection> {
        let conn = self.connections.get_mut(address)?;
        if conn.observe(transport) != ConnectionState::Terminated {
            return None;
        }
        debug!("Evicted stale connection to {address}");
        self.connections.remove(address)
    }

    /// Remove and return the entry for `address`, whatever its state.
    pub fn remove(&mut self, address: &PeerAddress) -> Option<PeerConnection> {
        self.connections.remove(address)
    }

    /// Observe every entry and evict those that are terminated. Returns the
    /// evicted connections.
    pub fn sweep(&mut self, transport: &dyn Transport) -> Vec<PeerConnection> {
        let dead: Vec<PeerAddress> = self
            .connections
            .iter_mut()
            .filter_map(|(address, conn)| {
                (conn.observe(transport) == ConnectionState::Terminated).then(|| address.clone())
            })
            .collect();
        dead.iter()
            .filter_map(|address| self.connections.remove(address))
            .collect()
    }

    /// Close and evict every entry. Returns the connections that were still
    /// live at the time.
    pub fn remove_all(&mut self, transport: &dyn Transport) -> Vec<PeerConnection> {
        self.connections
            .drain()
            .filter_map(|(_, mut conn)| {
                conn.terminate(TerminationReason::Shutdown, transport)
                    .then_some(conn)
            })
            .collect()
    }

    /// Iterate over live connections.
    pub fn iter(&self) -> impl Iterator<Item = &PeerConnection> {
        self.connections.values().filter(|c| c.is_live())
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
