//! Transaction messages: client write requests and the per-shard slices a
//! timestamper fans out after admission.

use crate::{
    clock::{QueueTimestamps, VectorClock},
    topics::VtThread,
    NodeHandle, RequestId, ShardId, VtId,
};
use serde::{Deserialize, Serialize};

/// A single graph update requested by a client, before shard resolution.
///
/// Handles referencing existing elements are resolved through the name
/// mapper; handles created by the transaction are placed by the
/// timestamper and recorded in the mapper before fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteKind {
    /// Create a node under the given fresh handle.
    CreateNode {
        /// Fresh handle for the node.
        node: NodeHandle,
    },
    /// Create an edge `from -> to`. The edge is stored with `from`.
    CreateEdge {
        /// Fresh handle for the edge.
        edge: NodeHandle,
        /// Source node of the edge.
        from: NodeHandle,
        /// Target node of the edge.
        to: NodeHandle,
    },
    /// Delete a node.
    DeleteNode {
        /// The node to delete.
        node: NodeHandle,
    },
    /// Delete an edge stored with node `on`.
    DeleteEdge {
        /// The edge to delete.
        edge: NodeHandle,
        /// The node the edge is stored with.
        on: NodeHandle,
    },
    /// Set a property on a node.
    SetNodeProperty {
        /// The node to update.
        node: NodeHandle,
        /// Property name.
        key: String,
        /// Property value.
        value: String,
    },
}

impl WriteKind {
    /// The handle whose shard queue this write is scheduled on.
    pub fn primary_handle(&self) -> NodeHandle {
        match self {
            WriteKind::CreateNode { node } => *node,
            WriteKind::CreateEdge { from, .. } => *from,
            WriteKind::DeleteNode { node } => *node,
            WriteKind::DeleteEdge { on, .. } => *on,
            WriteKind::SetNodeProperty { node, .. } => *node,
        }
    }

    /// The handle the write references on a possibly different shard.
    pub fn remote_handle(&self) -> Option<NodeHandle> {
        match self {
            WriteKind::CreateEdge { to, .. } => Some(*to),
            _ => None,
        }
    }
}

/// A resolved, clock-stamped write bound for one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Write {
    /// The update to perform.
    pub kind: WriteKind,
    /// The shard executing this write.
    pub shard: ShardId,
    /// The shard holding the remote endpoint, for edges that span shards.
    pub remote_shard: Option<ShardId>,
    /// Queue-timestamp snapshot assigned when this write's slot was taken.
    pub qts: QueueTimestamps,
}

/// A transaction as submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRequest {
    /// The updates, in client program order.
    pub writes: Vec<WriteKind>,
    /// Topic for the [`TxDone`][crate::messages::ClientResponse::TxDone] or
    /// [`TxFail`][crate::messages::ClientResponse::TxFail] reply.
    pub response_topic: String,
}

/// The slice of an admitted transaction bound for one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInit {
    /// The admitting timestamper.
    pub vt_id: VtId,
    /// Id of the transaction.
    pub tx_id: RequestId,
    /// Vector clock assigned to the whole transaction.
    pub timestamp: VectorClock,
    /// Queue-timestamp snapshot of this shard's first write.
    pub qts: QueueTimestamps,
    /// The writes bound for this shard, in admission order.
    pub writes: Vec<Write>,
    /// The dispatcher thread to ack to once the slice is applied.
    pub sender: VtThread,
}
