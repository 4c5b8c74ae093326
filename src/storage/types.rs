use serde::{Deserialize, Serialize};

use crate::timestamp::LocaleTimestamp;

/// A client known to the history store, keyed by common name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserIdentity {
    pub common_name: String,
}

/// A virtual address handed to a user at a given time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualAssignment {
    pub address: String,
    pub assigned_at: LocaleTimestamp,
}

/// A connection from a real address, started at a given time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealConnection {
    pub address: String,
    pub connected_since: LocaleTimestamp,
}

/// Byte counters for one (user, virtual assignment, real connection) triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsFact {
    pub user: UserIdentity,
    pub assignment: VirtualAssignment,
    pub connection: RealConnection,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

impl StatsFact {
    pub fn bytes_total(&self) -> u64 {
        self.bytes_received.saturating_add(self.bytes_sent)
    }
}
