//! The cluster configuration pushed by the external server manager.

use serde::{Deserialize, Serialize};

/// A cluster configuration.
///
/// Server ids repeat the primary layout: id `i` serves timestamper slot
/// `i % (NUM_VTS + NUM_SHARDS)` when that remainder addresses a VT slot.
/// Backup processes wait until their server id appears in `members`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Identity of the cluster. A change means the server manager was
    /// replaced underneath us, which is an operations error.
    pub cluster: u64,
    /// Monotonically increasing configuration version.
    pub version: u64,
    /// Server ids currently expected to serve.
    pub members: Vec<u64>,
}

impl ClusterConfig {
    /// Returns whether the given server is part of this configuration.
    pub fn contains_server(&self, server_id: u64) -> bool {
        self.members.contains(&server_id)
    }
}
