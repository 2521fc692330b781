//! Defines the message types that are sent between clients, timestampers,
//! shards, and the server manager.

pub use self::{
    cluster::ClusterConfig,
    nop::{DoneRequest, Nop},
    prog::{NodeProg, ProgRequest, ProgType},
    transaction::{TxInit, TxRequest, Write, WriteKind},
};
use crate::{RequestId, ShardId, VtId};
use serde::{Deserialize, Serialize};

mod cluster;
mod nop;
mod prog;
mod transaction;

/// Messages clients send to a timestamper dispatcher thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientRequest {
    /// Admit a transaction.
    TxInit(TxRequest),
    /// Admit a node program.
    NodeProg(ProgRequest),
    /// Ask the shards for their message counters; the total is logged once
    /// every shard has answered.
    MsgCount,
    /// Ask for the most recent per-shard node counts.
    NodeCount {
        /// Topic for the [`ClientResponse::NodeCountReply`].
        response_topic: String,
    },
    /// Start a migration round without waiting for its completion.
    StartMigr,
    /// Start a single-stream migration round and report back once the token
    /// has circulated through every shard.
    OneStreamMigr {
        /// Topic for the [`ClientResponse::DoneMigr`].
        response_topic: String,
    },
}

/// Replies a timestamper sends to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientResponse {
    /// Every participating shard finished its slice of the transaction.
    TxDone,
    /// The transaction was rejected; no state changed.
    TxFail,
    /// A node program's reply, forwarded verbatim from the shard that
    /// produced it.
    NodeProgReturn {
        /// The program that produced the reply.
        prog_type: ProgType,
        /// The request id the program was admitted under.
        req_id: RequestId,
        /// The program-specific result; opaque to the timestamper.
        payload: serde_json::Value,
    },
    /// The last node counts the shards reported via NOP acks.
    NodeCountReply {
        /// Node counts indexed by shard id.
        counts: Vec<u64>,
    },
    /// The migration token circulated through every shard.
    DoneMigr,
}

/// Messages a timestamper sends to a shard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ShardRequest {
    /// One shard's slice of an admitted transaction.
    TxInit(TxInit),
    /// One shard's batch of an admitted node program.
    NodeProg(NodeProg),
    /// Periodic heartbeat carrying clocks, frontier, and cleanup info.
    Nop(Nop),
    /// Ask the shard for its message counter.
    MsgCount {
        /// The asking timestamper.
        vt_id: VtId,
    },
    /// Migration token passed along the shard chain.
    MigrationToken {
        /// Remaining hops the token should make.
        hops: u64,
        /// The timestamper that relayed the token.
        vt_id: VtId,
    },
}

/// Reports shards send back to a timestamper dispatcher thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ShardReport {
    /// The shard finished its slice of the given transaction.
    TxDone {
        /// Id of the finished transaction.
        tx_id: RequestId,
    },
    /// A node program produced its reply on this shard.
    NodeProgReturn {
        /// The program that produced the reply.
        prog_type: ProgType,
        /// The request id the program was admitted under.
        req_id: RequestId,
        /// The program-specific result; opaque to the timestamper.
        payload: serde_json::Value,
    },
    /// The shard acknowledged a NOP and is ready for the next one.
    NopAck {
        /// The acknowledging shard.
        shard_id: ShardId,
        /// The shard's current node count.
        node_count: u64,
    },
    /// The shard finished loading its part of the graph.
    LoadedGraph {
        /// Load time in nanoseconds.
        load_time: u64,
    },
    /// The shard's message counter, answering a
    /// [`ShardRequest::MsgCount`].
    MsgCount {
        /// The answering shard.
        shard_id: ShardId,
        /// Messages the shard has processed.
        count: u64,
    },
    /// The migration token came back after circulating.
    MigrationToken {
        /// Remaining hops when the token returned.
        hops: u64,
        /// The timestamper that originally relayed the token.
        vt_id: VtId,
    },
}

/// Clock-synchronization messages between timestamper peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerMessage {
    /// The sending timestamper's own clock entry, raising our copy of it.
    ClockUpdate {
        /// The sending timestamper.
        vt_id: VtId,
        /// Its current own clock entry.
        value: u64,
    },
    /// Acknowledges a [`PeerMessage::ClockUpdate`].
    ClockUpdateAck,
}
