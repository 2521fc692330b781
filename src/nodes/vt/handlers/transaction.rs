//! Transaction admission and completion handlers.

use crate::{
    clock::QueueTimestamps,
    messages::{ClientResponse, ShardRequest, TxInit, TxRequest, Write, WriteKind},
    nodes::{publish, vt::VtNode, vt::TxAck},
    topics::ShardThread,
    HeddleError, NodeHandle, RequestId, ShardId, NUM_SHARDS,
};
use std::collections::{BTreeSet, HashMap};

impl VtNode {
    /// Handles an incoming client transaction.
    ///
    /// Resolves every referenced handle through the name mapper, assigns
    /// the clocks under the clock mutex, registers the transaction, and
    /// fans the writes out to the participating shards. Any resolution
    /// failure rejects the transaction before the clocks are touched.
    pub(crate) async fn tx_init_handler(&self, request: TxRequest) -> eyre::Result<()> {
        let TxRequest {
            writes,
            response_topic,
        } = request;

        let mut writes = match self.resolve_writes(writes).await {
            Ok(writes) => writes,
            Err(err) => {
                log::info!("rejecting transaction: {}", err);
                return publish(&self.zenoh, &response_topic, &ClientResponse::TxFail).await;
            }
        };

        let tx_id = self.shared.fresh_request_id();
        let timestamp = {
            let mut clock = self.shared.clock.lock().unwrap();
            clock.advance_for_tx(&mut writes)
        };

        // split into per-shard slices, preserving admission order
        let mut slices: Vec<Vec<Write>> = vec![Vec::new(); NUM_SHARDS];
        for write in writes {
            slices[write.shard].push(write);
        }
        let fanout = slices.iter().filter(|slice| !slice.is_empty()).count() as u32;

        {
            let mut tx_prog = self.shared.tx_prog.lock().unwrap();
            tx_prog.register_tx(tx_id, response_topic, fanout);
        }

        for (shard_id, slice) in slices.into_iter().enumerate() {
            if slice.is_empty() {
                continue;
            }
            let init = TxInit {
                vt_id: self.vt_id,
                tx_id,
                timestamp: timestamp.clone(),
                qts: slice[0].qts.clone(),
                writes: slice,
                sender: self.wt,
            };
            publish(
                &self.zenoh,
                &ShardThread::new(shard_id).request_topic(&self.zenoh_prefix),
                &ShardRequest::TxInit(init),
            )
            .await?;
        }

        Ok(())
    }

    /// Resolves the writes of a transaction to their shards.
    ///
    /// Fresh node handles are placed by the timestamper and recorded in
    /// the name mapper together with fresh edge handles; everything else
    /// must already have a mapping.
    async fn resolve_writes(&self, writes: Vec<WriteKind>) -> Result<Vec<Write>, HeddleError> {
        if writes.is_empty() {
            return Err(HeddleError::EmptyTransaction);
        }

        // fresh nodes are placed here, round-robin by handle
        let mut fresh: HashMap<NodeHandle, ShardId> = HashMap::new();
        for kind in &writes {
            if let WriteKind::CreateNode { node } = kind {
                fresh.insert(*node, (*node as usize) % NUM_SHARDS);
            }
        }

        let mut to_lookup = BTreeSet::new();
        for kind in &writes {
            let primary = kind.primary_handle();
            if !fresh.contains_key(&primary) {
                to_lookup.insert(primary);
            }
            if let Some(remote) = kind.remote_handle() {
                if !fresh.contains_key(&remote) {
                    to_lookup.insert(remote);
                }
            }
        }
        let mut resolved = if to_lookup.is_empty() {
            HashMap::new()
        } else {
            self.nmap
                .lookup(to_lookup)
                .await
                .map_err(|err| HeddleError::NameMapper(err.to_string()))?
        };
        resolved.extend(&fresh);

        let mut inserts = fresh;
        let mut out = Vec::with_capacity(writes.len());
        for kind in writes {
            let primary = kind.primary_handle();
            let shard = match resolved.get(&primary) {
                Some(&shard) => shard,
                None => return Err(HeddleError::UnmappedHandle(primary)),
            };
            let remote_shard = match kind.remote_handle() {
                Some(remote) => match resolved.get(&remote) {
                    Some(&shard) => Some(shard),
                    None => return Err(HeddleError::UnmappedHandle(remote)),
                },
                None => None,
            };
            // a fresh edge lives wherever its origin node lives
            if let WriteKind::CreateEdge { edge, .. } = &kind {
                inserts.insert(*edge, shard);
                resolved.insert(*edge, shard);
            }
            out.push(Write {
                kind,
                shard,
                remote_shard,
                qts: QueueTimestamps::new(),
            });
        }

        if !inserts.is_empty() {
            self.nmap
                .insert(inserts)
                .await
                .map_err(|err| HeddleError::NameMapper(err.to_string()))?;
        }

        Ok(out)
    }

    /// Handles a shard's completion ack for one transaction slice.
    pub(crate) async fn tx_done_handler(&self, tx_id: RequestId) -> eyre::Result<()> {
        let ack = {
            let mut tx_prog = self.shared.tx_prog.lock().unwrap();
            tx_prog.tx_shard_ack(tx_id)
        };
        match ack {
            TxAck::Completed(client) => {
                publish(&self.zenoh, &client, &ClientResponse::TxDone).await
            }
            TxAck::Pending => Ok(()),
            TxAck::Unknown => {
                log::warn!("transaction ack for unknown request {}", tx_id);
                Ok(())
            }
        }
    }
}
