#![warn(missing_docs)]

//! Vector timestamper node of the `heddle` sharded graph store, using
//! [`zenoh`](https://zenoh.io/) for communication.
//!
//! A heddle cluster consists of [`NUM_VTS`] vector timestamper (VT) replicas
//! and [`NUM_SHARDS`] graph shards. Clients submit transactions and node
//! programs to any VT; the VT stamps every admitted request with a vector
//! clock (one entry per VT) and per-shard queue timestamps, fans the request
//! out to the participating shards, and tracks it until every shard has
//! acknowledged completion. A periodic timer sends NOP heartbeats to the
//! shards, carrying the clocks, the completion frontier, and cleanup
//! information for finished node programs, and keeps the peer VTs' clock
//! entries fresh.
//!
//! ## Usage Example
//!
//! Start one process per timestamper replica:
//!
//! 1. `cargo run --bin vt -- 0` to start the primary for VT slot 0.
//! 2. `cargo run --bin vt -- 1` to start the primary for VT slot 1.
//! 3. `cargo run --bin vt -- 0 4` to start a backup process that takes over
//!    VT slot 0 once the server manager promotes server 4.
//!
//! The processes wait for a cluster configuration from the server manager
//! before serving. Graph shards, the name-mapper service, and client proxies
//! are separate services; this crate only defines the messages exchanged
//! with them (see [`messages`]).

use eyre::Context;
use serde::{Deserialize, Serialize};

pub mod clock;
pub mod config;
pub mod messages;
pub mod nmap;
pub mod nodes;
pub mod topics;

pub use nodes::vt;

/// Number of vector timestamper replicas in the cluster.
pub const NUM_VTS: usize = 2;

/// Number of graph shards in the cluster.
pub const NUM_SHARDS: usize = 2;

/// Number of dispatcher threads per timestamper process.
pub const NUM_THREADS: u32 = 4;

/// Period of the timestamper's NOP/clock-gossip timer, in nanoseconds.
pub const VT_TIMEOUT_NANO: u64 = 10_000_000;

/// Delay before the first timer tick, giving the other replicas time to
/// come up after a cluster start.
pub const INITIAL_TIMEOUT_NANO: u64 = 1_000_000_000;

/// Index of a vector timestamper replica, in `0..NUM_VTS`.
pub type VtId = usize;

/// Index of a graph shard, in `0..NUM_SHARDS`.
pub type ShardId = usize;

/// Monotonically increasing request id, unique within one timestamper.
///
/// Transactions, node programs, and NOPs draw from the same counter, so a
/// request id is globally unique when combined with the issuing VT's id.
pub type RequestId = u64;

/// Logical handle of a graph node or edge.
pub type NodeHandle = u64;

/// The handle value that marks a node program as global.
///
/// A program whose single argument carries this handle is broadcast to
/// every shard instead of being routed through the name mapper.
pub const GLOBAL_HANDLE: NodeHandle = u64::MAX;

const _: () = assert!(NUM_SHARDS <= 64, "ShardBitmap is backed by a u64");

/// Errors the timestamper reports without tearing the node down.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum HeddleError {
    /// A transaction arrived without any writes.
    #[error("transaction is empty")]
    EmptyTransaction,
    /// A referenced handle has no entry in the name mapper.
    #[error("no shard mapping for handle {0}")]
    UnmappedHandle(NodeHandle),
    /// A program request mixed the global sentinel handle with normal handles.
    #[error("global program request must carry the global handle as its only argument")]
    MixedGlobalArgs,
    /// The name-mapper service could not be reached.
    #[error("name-mapper request failed: {0}")]
    NameMapper(String),
    /// The server manager started talking about a different cluster.
    #[error("cluster id changed from {old} to {new}")]
    ClusterJump {
        /// Cluster id of the configuration we had been following.
        old: u64,
        /// Cluster id of the configuration that just arrived.
        new: u64,
    },
    /// This server is not part of the cluster configuration.
    #[error("server {0} is not in the cluster configuration")]
    NotInMembership(u64),
}

/// A fixed-size set of shard ids, one bit per shard.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardBitmap(u64);

impl ShardBitmap {
    /// The empty set.
    pub fn empty() -> Self {
        ShardBitmap(0)
    }

    /// The set containing every shard.
    pub fn full() -> Self {
        ShardBitmap(u64::MAX >> (64 - NUM_SHARDS))
    }

    /// Adds `shard` to the set.
    pub fn set(&mut self, shard: ShardId) {
        assert!(shard < NUM_SHARDS);
        self.0 |= 1 << shard;
    }

    /// Returns whether `shard` is in the set.
    pub fn contains(&self, shard: ShardId) -> bool {
        assert!(shard < NUM_SHARDS);
        self.0 & (1 << shard) != 0
    }

    /// Returns whether any shard is in the set.
    pub fn any(&self) -> bool {
        self.0 != 0
    }

    /// Returns whether every shard is in the set.
    pub fn is_full(&self) -> bool {
        *self == Self::full()
    }

    /// Iterates over the shards in the set, in increasing order.
    pub fn shards(self) -> impl Iterator<Item = ShardId> {
        (0..NUM_SHARDS).filter(move |&shard| self.contains(shard))
    }
}

impl std::fmt::Debug for ShardBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{:0width$b}", self.0, width = NUM_SHARDS))
    }
}

/// The default zenoh prefix under which all heddle topics live.
pub fn heddle_default_zenoh_prefix() -> &'static str {
    "heddle"
}

/// Extension trait to read a zenoh value as a UTF-8 string.
pub trait ZenohValueAsString {
    /// Returns the value's payload interpreted as a UTF-8 string.
    fn as_string(&self) -> eyre::Result<String>;
}

impl ZenohValueAsString for zenoh::prelude::Value {
    fn as_string(&self) -> eyre::Result<String> {
        String::from_utf8(self.payload.contiguous().to_vec())
            .context("zenoh value is not valid UTF-8")
    }
}

/// Opens a zenoh session for use in tests.
pub fn zenoh_test_instance() -> std::sync::Arc<zenoh::Session> {
    use zenoh::prelude::ZFuture;

    std::sync::Arc::new(
        zenoh::open(zenoh::config::Config::default())
            .wait()
            .expect("failed to open zenoh test session"),
    )
}
