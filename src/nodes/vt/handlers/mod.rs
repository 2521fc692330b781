//! Handlers for the inbound message families, one module per family.

use super::VtNode;
use crate::messages::{ClientRequest, PeerMessage, ShardReport};

mod clock_sync;
mod node_prog;
mod nop_ack;
mod ops;
mod transaction;

impl VtNode {
    /// Dispatches a client request to its handler.
    pub(crate) async fn handle_client_request(&self, request: ClientRequest) -> eyre::Result<()> {
        match request {
            ClientRequest::TxInit(tx) => self.tx_init_handler(tx).await,
            ClientRequest::NodeProg(prog) => self.node_prog_req_handler(prog).await,
            ClientRequest::MsgCount => self.msg_count_request_handler().await,
            ClientRequest::NodeCount { response_topic } => {
                self.node_count_handler(response_topic).await
            }
            ClientRequest::StartMigr => self.start_migr_handler(u64::MAX).await,
            ClientRequest::OneStreamMigr { response_topic } => {
                self.one_stream_migr_handler(response_topic).await
            }
        }
    }

    /// Dispatches a shard report to its handler.
    pub(crate) async fn handle_shard_report(&self, report: ShardReport) -> eyre::Result<()> {
        match report {
            ShardReport::TxDone { tx_id } => self.tx_done_handler(tx_id).await,
            ShardReport::NodeProgReturn {
                prog_type,
                req_id,
                payload,
            } => self.node_prog_return_handler(prog_type, req_id, payload).await,
            ShardReport::NopAck {
                shard_id,
                node_count,
            } => {
                self.nop_ack_handler(shard_id, node_count);
                Ok(())
            }
            ShardReport::LoadedGraph { load_time } => {
                self.loaded_graph_handler(load_time);
                Ok(())
            }
            ShardReport::MsgCount { shard_id, count } => {
                self.msg_count_reply_handler(shard_id, count);
                Ok(())
            }
            ShardReport::MigrationToken { .. } => self.migration_token_handler().await,
        }
    }

    /// Dispatches a peer clock message to its handler.
    pub(crate) async fn handle_peer_message(&self, message: PeerMessage) -> eyre::Result<()> {
        match message {
            PeerMessage::ClockUpdate { vt_id, value } => {
                self.clock_update_handler(vt_id, value).await
            }
            PeerMessage::ClockUpdateAck => {
                self.clock_update_ack_handler();
                Ok(())
            }
        }
    }
}
