//! Radio configuration.

use std::time::Duration;

use encounter_engine::config::millis_serde;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Service every encounter node advertises and scans for.
pub const DEFAULT_SERVICE_UUID: Uuid = Uuid::from_u128(0x00002657_0000_1000_8000_00805f9b34fb);

/// Characteristic carrying the rendezvous parameter.
pub const DEFAULT_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x00004923_0000_1000_8000_00805f9b34fb);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Service UUID advertised and filtered on during scans.
    pub service_uuid: Uuid,

    /// Characteristic holding the 4-byte rendezvous parameter.
    pub characteristic_uuid: Uuid,

    /// Whether this node scans at all. Non-scanning nodes only accept.
    pub scanning: bool,

    /// Time between scans.
    #[serde(with = "millis_serde")]
    pub scan_interval: Duration,

    /// Delay before the first scan.
    #[serde(with = "millis_serde")]
    pub scan_delay: Duration,

    /// Upper bound on a full two-phase handshake.
    #[serde(with = "millis_serde")]
    pub handshake_timeout: Duration,

    /// Simulated air time of each handshake phase.
    #[serde(with = "millis_serde")]
    pub link_latency: Duration,

    /// In-memory buffer size of each direction of a channel, in bytes.
    pub channel_buffer: usize,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            service_uuid: DEFAULT_SERVICE_UUID,
            characteristic_uuid: DEFAULT_CHARACTERISTIC_UUID,
            scanning: true,
            scan_interval: Duration::from_millis(1000),
            scan_delay: Duration::ZERO,
            handshake_timeout: Duration::from_secs(10),
            link_latency: Duration::from_millis(20),
            channel_buffer: 4096,
        }
    }
}
