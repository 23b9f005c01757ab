//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default wait before reconnecting to a peer that was recently met.
pub const DEFAULT_MIN_RECONNECT_INTERVAL: Duration = Duration::from_millis(5000);

/// Configuration for an [`EncounterEngine`](crate::engine::EncounterEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum time between two admitted attempts to the same address.
    /// Negative values in a config file are treated as zero.
    #[serde(with = "millis_serde")]
    pub min_reconnect_interval: Duration,

    /// Capacity of the transport → engine event queue.
    pub event_queue_capacity: usize,

    /// Capacity of the activity broadcast channel.
    pub activity_capacity: usize,

    /// How often the decision loop sweeps dead connections and prunes
    /// the recency table.
    #[serde(with = "millis_serde")]
    pub sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_reconnect_interval: DEFAULT_MIN_RECONNECT_INTERVAL,
            event_queue_capacity: 256,
            activity_capacity: 64,
            sweep_interval: Duration::from_millis(1000),
        }
    }
}

impl EngineConfig {
    /// Builder-style override of the reconnect backoff.
    pub fn with_min_reconnect_interval(mut self, interval: Duration) -> Self {
        self.min_reconnect_interval = interval;
        self
    }
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

/// Durations as signed milliseconds; negative input clamps to zero.
pub mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(dur.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = i64::deserialize(d)?;
        Ok(Duration::from_millis(millis.max(0).unsigned_abs()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
