//! Activity feed — a broadcast of what the engine decided and observed.
//!
//! Observers (a status view, the demo binary, tests) subscribe to get one
//! [`ActivityRecord`] per admission decision and state transition. Slow
//! subscribers lag and lose old records; the engine never waits for them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::address::{PeerAddress, Role};
use crate::arbiter::RejectReason;

/// One thing that happened inside the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Activity {
    Started,
    Stopped,
    Admitted {
        address: PeerAddress,
    },
    Rejected {
        address: PeerAddress,
        reason: RejectReason,
    },
    Established {
        address: PeerAddress,
        role: Role,
    },
    Terminated {
        address: PeerAddress,
        role: Role,
        reason: String,
    },
}

/// A timestamped [`Activity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityRecord {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub activity: Activity,
}

impl fmt::Display for ActivityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.at.format("%H:%M:%S"))?;
        match &self.activity {
            Activity::Started => f.write_str("engine started"),
            Activity::Stopped => f.write_str("engine stopped"),
            Activity::Admitted { address } => write!(f, "{address}: connecting"),
            Activity::Rejected { address, reason } => write!(f, "{address}: skipped ({reason})"),
            Activity::Established { address, role } => {
                write!(f, "{address}: connected as {role}")
            }
            Activity::Terminated { address, role, reason } => {
                write!(f, "{address}: {role} connection closed ({reason})")
            }
        }
    }
}

/// Sending half of the activity broadcast.
#[derive(Debug, Clone)]
pub struct ActivityFeed {
    tx: broadcast::Sender<ActivityRecord>,
}

impl ActivityFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an activity. Having no subscribers is not an error.
    pub fn emit(&self, activity: Activity) {
        let _ = self.tx.send(ActivityRecord {
            at: Utc::now(),
            activity,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActivityRecord> {
        self.tx.subscribe()
    }
}
