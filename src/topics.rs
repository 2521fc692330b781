//! Defines the zenoh topic paths that should be used for messages.
//!
//! Allows to address specific dispatcher threads of specific timestamper
//! replicas, the shard servers, client proxies, and the external services
//! the timestamper talks to.

use crate::{ShardId, VtId};
use serde::{Deserialize, Serialize};

/// Addresses a specific dispatcher thread of a specific timestamper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VtThread {
    /// The id of the addressed timestamper replica.
    pub vt_id: VtId,
    /// The id of the addressed dispatcher thread on that replica.
    pub thread_id: u32,
}

impl VtThread {
    /// Addresses the given thread of the given timestamper.
    pub fn new(vt_id: VtId, thread_id: u32) -> Self {
        Self { vt_id, thread_id }
    }

    /// The topic on which clients send
    /// [`ClientRequest`][crate::messages::ClientRequest] messages to this
    /// thread.
    pub fn client_request_topic(&self, zenoh_prefix: &str) -> String {
        format!(
            "/{}/vt/{}/client_request/{}",
            zenoh_prefix, self.vt_id, self.thread_id
        )
    }

    /// The topic on which shards send
    /// [`ShardReport`][crate::messages::ShardReport] messages to this
    /// thread.
    pub fn shard_report_topic(&self, zenoh_prefix: &str) -> String {
        format!(
            "/{}/vt/{}/shard_report/{}",
            zenoh_prefix, self.vt_id, self.thread_id
        )
    }

    /// The topic on which peer timestampers send
    /// [`PeerMessage`][crate::messages::PeerMessage] messages to this
    /// thread.
    pub fn peer_topic(&self, zenoh_prefix: &str) -> String {
        format!(
            "/{}/vt/{}/peer/{}",
            zenoh_prefix, self.vt_id, self.thread_id
        )
    }
}

/// Addresses a graph shard server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardThread {
    /// The id of the addressed shard.
    pub shard_id: ShardId,
}

impl ShardThread {
    /// Addresses the given shard.
    pub fn new(shard_id: ShardId) -> Self {
        Self { shard_id }
    }

    /// The topic on which timestampers send
    /// [`ShardRequest`][crate::messages::ShardRequest] messages to this
    /// shard.
    pub fn request_topic(&self, zenoh_prefix: &str) -> String {
        format!("/{}/shard/{}/request", zenoh_prefix, self.shard_id)
    }
}

/// Addresses a specific thread of a specific client proxy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientThread {
    /// The node id of the client proxy.
    pub node_id: String,
    /// The id of the addressed thread.
    pub thread_id: u32,
}

impl ClientThread {
    /// Addresses the given thread of the given client proxy.
    pub fn new(node_id: String, thread_id: u32) -> Self {
        Self { node_id, thread_id }
    }

    /// The topic on which [`ClientResponse`][crate::messages::ClientResponse]
    /// messages should be sent in reply to requests.
    ///
    /// Clients pass this topic as the `response_topic` of their requests.
    pub fn response_topic(&self, zenoh_prefix: &str) -> String {
        format!(
            "/{}/client/{}/response/{}",
            zenoh_prefix, self.node_id, self.thread_id
        )
    }
}

/// Topics of the external server manager that pushes cluster
/// configurations.
#[derive(Debug, Clone, Copy)]
pub struct ServerManager;

impl ServerManager {
    /// The topic on which the server manager publishes
    /// [`ClusterConfig`][crate::messages::ClusterConfig] updates.
    pub fn config_topic(zenoh_prefix: &str) -> String {
        format!("/{}/server_manager/config", zenoh_prefix)
    }
}

/// Topics of the external name-mapper service.
#[derive(Debug, Clone, Copy)]
pub struct NameMapService;

impl NameMapService {
    /// The queryable topic resolving handles to shard ids.
    pub fn lookup_topic(zenoh_prefix: &str) -> String {
        format!("/{}/nmap/lookup", zenoh_prefix)
    }

    /// The topic on which fresh handle placements are recorded.
    pub fn insert_topic(zenoh_prefix: &str) -> String {
        format!("/{}/nmap/insert", zenoh_prefix)
    }
}
