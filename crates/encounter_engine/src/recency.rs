//! Recency tracker — minimum reconnect interval per peer address.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::address::PeerAddress;

/// Remembers when each address was last admitted.
///
/// An address present in the table was admitted at the recorded instant;
/// an absent address has never been admitted (or was pruned) and is always
/// eligible.
#[derive(Debug, Default)]
pub struct RecencyTracker {
    last_admitted: HashMap<PeerAddress, Instant>,
}

impl RecencyTracker {
    pub fn new() -> Self {
        Self {
            last_admitted: HashMap::new(),
        }
    }

    /// Check eligibility and, if eligible, record `now` in the same step.
    ///
    /// Eligible means never recorded, or at least `min_interval` has passed
    /// since the recorded admission. A zero interval admits everything.
    pub fn should_admit(&mut self, address: &PeerAddress, now: Instant, min_interval: Duration) -> bool {
        let eligible = match self.last_admitted.get(address) {
            None => true,
            Some(last) => now.saturating_duration_since(*last) >= min_interval,
        };
        if eligible {
            self.last_admitted.insert(address.clone(), now);
        }
        eligible
    }

    /// When `address` was last admitted, if it is still remembered.
    pub fn last_admitted(&self, address: &PeerAddress) -> Option<Instant> {
        self.last_admitted.get(address).copied()
    }

    /// Put back an earlier record, undoing an admission that did not go
    /// ahead. `None` forgets the address.
    pub fn restore(&mut self, address: &PeerAddress, previous: Option<Instant>) {
        match previous {
            Some(at) => {
                self.last_admitted.insert(address.clone(), at);
            }
            None => {
                self.last_admitted.remove(address);
            }
        }
    }

    /// Drop records that can no longer cause a rejection. Returns how many
    /// were removed.
    pub fn prune(&mut self, now: Instant, min_interval: Duration) -> usize {
        let before = self.last_admitted.len();
        self.last_admitted
            .retain(|_, last| now.saturating_duration_since(*last) < min_interval);
        before - self.last_admitted.len()
    }

    pub fn clear(&mut self) {
        self.last_admitted.clear();
    }

    pub fn len(&self) -> usize {
        self.last_admitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_admitted.is_empty()
    }
}
