//! Operational aggregation handlers: message counts, node counts, graph
//! load reports, and the migration-token relay.
//!
//! None of these touch the ordering state; they only collect numbers from
//! the shards and pass tokens along.

use crate::{
    messages::{ClientResponse, ShardRequest},
    nodes::{publish, vt::VtNode},
    topics::ShardThread,
    ShardId, NUM_SHARDS,
};

impl VtNode {
    /// Handles a client request for the cluster-wide message count:
    /// resets the aggregation and asks every shard for its counter.
    pub(crate) async fn msg_count_request_handler(&self) -> eyre::Result<()> {
        {
            let mut msg_count = self.shared.msg_count.lock().unwrap();
            msg_count.total = 0;
            msg_count.acks = 0;
        }
        for shard_id in 0..NUM_SHARDS {
            publish(
                &self.zenoh,
                &ShardThread::new(shard_id).request_topic(&self.zenoh_prefix),
                &ShardRequest::MsgCount { vt_id: self.vt_id },
            )
            .await?;
        }
        Ok(())
    }

    /// Adds one shard's counter to the aggregation; the total is logged
    /// once every shard has answered.
    pub(crate) fn msg_count_reply_handler(&self, shard_id: ShardId, count: u64) {
        log::debug!("message count from shard {}: {}", shard_id, count);
        let mut msg_count = self.shared.msg_count.lock().unwrap();
        msg_count.total += count;
        msg_count.acks += 1;
        if msg_count.acks == NUM_SHARDS {
            log::info!("Cluster message count: {}", msg_count.total);
        }
    }

    /// Replies with the last node counts the shards reported.
    pub(crate) async fn node_count_handler(&self, response_topic: String) -> eyre::Result<()> {
        let counts = {
            let periodic = self.shared.periodic.lock().unwrap();
            periodic.shard_node_count.clone()
        };
        publish(
            &self.zenoh,
            &response_topic,
            &ClientResponse::NodeCountReply { counts },
        )
        .await
    }

    /// Records one shard's graph-load report; the total is logged once
    /// every shard has loaded.
    pub(crate) fn loaded_graph_handler(&self, load_time: u64) {
        let mut graph_load = self.shared.graph_load.lock().unwrap();
        if load_time > graph_load.max_load_time {
            graph_load.max_load_time = load_time;
        }
        graph_load.load_count += 1;
        if graph_load.load_count == NUM_SHARDS {
            log::info!(
                "Graph loaded on all shards, time taken = {} nanosecs",
                graph_load.max_load_time
            );
        }
    }

    /// Starts a migration round by handing the token to shard 0.
    pub(crate) async fn start_migr_handler(&self, hops: u64) -> eyre::Result<()> {
        publish(
            &self.zenoh,
            &ShardThread::new(0).request_topic(&self.zenoh_prefix),
            &ShardRequest::MigrationToken {
                hops,
                vt_id: self.vt_id,
            },
        )
        .await
    }

    /// Starts a single-stream migration round, remembering the client to
    /// notify once the token has circulated.
    pub(crate) async fn one_stream_migr_handler(&self, response_topic: String) -> eyre::Result<()> {
        {
            let mut migration = self.shared.migration.lock().unwrap();
            migration.client = Some(response_topic);
        }
        self.start_migr_handler(NUM_SHARDS as u64).await
    }

    /// The token made it around; tell the waiting client, if any.
    pub(crate) async fn migration_token_handler(&self) -> eyre::Result<()> {
        let client = {
            let migration = self.shared.migration.lock().unwrap();
            migration.client.clone()
        };
        {
            let periodic = self.shared.periodic.lock().unwrap();
            log::info!("Shard node counts are: {:?}", periodic.shard_node_count);
        }
        match client {
            Some(client) => publish(&self.zenoh, &client, &ClientResponse::DoneMigr).await,
            None => Ok(()),
        }
    }
}
