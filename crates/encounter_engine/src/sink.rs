//! The upper-layer consumer of established byte streams.

use crate::address::{PeerAddress, Role};
use crate::transport::ByteStream;

/// Receives each established stream exactly once.
///
/// Called from inside the engine's critical section, so implementations must
/// hand the stream to their own task and return immediately. Ownership of the
/// stream's read/write side moves to the sink; the engine keeps only the
/// channel handle so it can close the channel on teardown.
pub trait EncounterSink: Send + Sync {
    fn on_connected(&self, channel: ByteStream, address: PeerAddress, role: Role);
}

impl<F> EncounterSink for F
where
    F: Fn(ByteStream, PeerAddress, Role) + Send + Sync,
{
    fn on_connected(&self, channel: ByteStream, address: PeerAddress, role: Role) {
        self(channel, address, role)
    }
}
