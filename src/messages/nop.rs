//! The periodic NOP heartbeat a timestamper sends to each shard.

use crate::{
    clock::{QueueTimestamps, VectorClock},
    messages::ProgType,
    topics::VtThread,
    RequestId, VtId,
};
use serde::{Deserialize, Serialize};

/// One finished node program the receiving shard has not been told about
/// yet; the shard garbage-collects the program's state in response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneRequest {
    /// The finished request.
    pub req_id: RequestId,
    /// The program type the request ran, keying the shard's state table.
    pub prog_type: ProgType,
}

/// Periodic heartbeat from a timestamper to one shard.
///
/// The NOP occupies a slot in the shard's queue for this VT, so the shard
/// can always make progress ordering events across VTs even when no
/// transactions flow. It also carries the completion frontier and the
/// finished requests this shard can clean up after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nop {
    /// The sending timestamper.
    pub vt_id: VtId,
    /// The sender's vector clock at NOP assembly.
    pub vclk: VectorClock,
    /// The sender's queue timestamps at NOP assembly.
    pub qts: QueueTimestamps,
    /// The request id allocated to this NOP round.
    pub req_id: RequestId,
    /// Finished requests this shard has not been told about before.
    pub done_reqs: Vec<DoneRequest>,
    /// Largest request id below which every program has finished.
    pub max_done_id: RequestId,
    /// Vector clock of the program retired as `max_done_id`.
    pub max_done_clk: VectorClock,
    /// Number of programs admitted but not yet retired.
    pub outstanding_progs: u64,
    /// Last known node counts of all shards, indexed by shard id.
    pub shard_node_count: Vec<u64>,
    /// The dispatcher thread to ack to.
    pub sender: VtThread,
}
