//! Node-program messages.
//!
//! A node program is a traversal computation that runs on the shards; the
//! timestamper only stamps it, splits the start handles by shard, and
//! forwards the per-program parameters and results as opaque values.

use crate::{clock::VectorClock, topics::VtThread, NodeHandle, RequestId, VtId};
use serde::{Deserialize, Serialize};

/// The node-program algorithms the shards can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgType {
    /// Source-to-target reachability.
    Reachability,
    /// Reachability bounded to a fixed number of hops.
    NHopReachability,
    /// Local clustering coefficient.
    Clustering,
    /// Read the edges of a node.
    EdgeGet,
    /// Causal paths between two nodes.
    CauseAndEffect,
}

/// A node-program request from a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgRequest {
    /// The program to run.
    pub prog_type: ProgType,
    /// Start handles with their program-specific parameters.
    ///
    /// A single argument carrying [`GLOBAL_HANDLE`][crate::GLOBAL_HANDLE]
    /// broadcasts the program to every shard.
    pub args: Vec<(NodeHandle, serde_json::Value)>,
    /// Topic for the
    /// [`NodeProgReturn`][crate::messages::ClientResponse::NodeProgReturn]
    /// reply.
    pub response_topic: String,
}

/// The batch of an admitted node program bound for one shard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeProg {
    /// The program to run.
    pub prog_type: ProgType,
    /// Whether the program was requested with the global sentinel handle.
    pub global: bool,
    /// The admitting timestamper.
    pub vt_id: VtId,
    /// Vector clock assigned to the program.
    pub timestamp: VectorClock,
    /// The request id the program was admitted under.
    pub req_id: RequestId,
    /// Start handles and parameters for this shard.
    pub batch: Vec<(NodeHandle, serde_json::Value)>,
    /// The dispatcher thread to send the program reply to.
    pub sender: VtThread,
}
