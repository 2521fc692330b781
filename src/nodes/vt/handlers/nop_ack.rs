//! NOP acknowledgement handler.

use crate::{nodes::vt::VtNode, ShardId};

impl VtNode {
    /// Rearms the shard for the next NOP round and refreshes its node
    /// count.
    pub(crate) fn nop_ack_handler(&self, shard_id: ShardId, node_count: u64) {
        let mut periodic = self.shared.periodic.lock().unwrap();
        periodic.shard_node_count[shard_id] = node_count;
        periodic.to_nop.set(shard_id);
    }
}
