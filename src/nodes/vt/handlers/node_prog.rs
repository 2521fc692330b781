//! Node-program admission and return handlers.

use crate::{
    messages::{ClientResponse, NodeProg, ProgRequest, ProgType, ShardRequest},
    nodes::{publish, publish_blocking, vt::VtNode},
    topics::ShardThread,
    HeddleError, NodeHandle, RequestId, GLOBAL_HANDLE, NUM_SHARDS,
};
use std::collections::BTreeSet;

impl VtNode {
    /// Handles an incoming node-program request.
    ///
    /// Groups the start handles by shard (or broadcasts a global
    /// program), stamps the program, registers it, and fans the per-shard
    /// batches out. Requests that cannot be resolved are dropped with a
    /// log message; the wire protocol has no program-failure reply.
    pub(crate) async fn node_prog_req_handler(&self, request: ProgRequest) -> eyre::Result<()> {
        let ProgRequest {
            prog_type,
            args,
            response_topic,
        } = request;

        let global = args.iter().any(|(handle, _)| *handle == GLOBAL_HANDLE);
        let mut batches: Vec<Vec<(NodeHandle, serde_json::Value)>> =
            vec![Vec::new(); NUM_SHARDS];
        if global {
            if args.len() != 1 {
                log::error!(
                    "dropping program request: {}",
                    HeddleError::MixedGlobalArgs
                );
                return Ok(());
            }
            // send a copy of the single argument to each shard
            for batch in batches.iter_mut() {
                batch.push(args[0].clone());
            }
        } else {
            let handles: BTreeSet<NodeHandle> =
                args.iter().map(|(handle, _)| *handle).collect();
            let mappings = match self.nmap.lookup(handles).await {
                Ok(mappings) => mappings,
                Err(err) => {
                    log::error!(
                        "dropping program request: {}",
                        HeddleError::NameMapper(err.to_string())
                    );
                    return Ok(());
                }
            };
            for (handle, params) in args {
                match mappings.get(&handle) {
                    Some(&shard) => batches[shard].push((handle, params)),
                    None => {
                        log::error!(
                            "dropping program request: {}",
                            HeddleError::UnmappedHandle(handle)
                        );
                        return Ok(());
                    }
                }
            }
        }

        let timestamp = {
            let mut clock = self.shared.clock.lock().unwrap();
            clock.advance_for_prog()
        };

        // the id must be allocated and registered in one critical section
        // so the pending heap grows in id order
        let req_id = {
            let mut tx_prog = self.shared.tx_prog.lock().unwrap();
            let req_id = self.shared.fresh_request_id();
            tx_prog.register_prog(req_id, response_topic, timestamp.clone());
            req_id
        };

        for (shard_id, batch) in batches.into_iter().enumerate() {
            if batch.is_empty() {
                continue;
            }
            let prog = NodeProg {
                prog_type,
                global,
                vt_id: self.vt_id,
                timestamp: timestamp.clone(),
                req_id,
                batch,
                sender: self.wt,
            };
            publish(
                &self.zenoh,
                &ShardThread::new(shard_id).request_topic(&self.zenoh_prefix),
                &ShardRequest::NodeProg(prog),
            )
            .await?;
        }

        Ok(())
    }

    /// Handles a program reply from a shard.
    ///
    /// The first reply for a live program is forwarded to the client
    /// verbatim and only then counted as finished; the registry stays
    /// locked across both steps (with a synchronous send) so a completion
    /// is never recorded for a reply that was not forwarded. Replies for
    /// unknown or already finished ids are stale and dropped.
    pub(crate) async fn node_prog_return_handler(
        &self,
        prog_type: ProgType,
        req_id: RequestId,
        payload: serde_json::Value,
    ) -> eyre::Result<()> {
        let mut tx_prog = self.shared.tx_prog.lock().unwrap();
        match tx_prog.prog_client(req_id) {
            Some(client) => {
                let client = client.to_owned();
                tx_prog.record_done(prog_type, req_id);
                publish_blocking(
                    &self.zenoh,
                    &client,
                    &ClientResponse::NodeProgReturn {
                        prog_type,
                        req_id,
                        payload,
                    },
                )?;
                tx_prog.mark_done(req_id);
            }
            None => {
                log::warn!(
                    "node program return for already completed or never existed request {}",
                    req_id
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nmap::StaticNameMapper;
    use crate::nodes::vt::vt_test_instance;
    use std::sync::Arc;

    fn prog_request(args: Vec<(NodeHandle, serde_json::Value)>) -> ProgRequest {
        ProgRequest {
            prog_type: ProgType::Reachability,
            args,
            response_topic: "/test/client/response".into(),
        }
    }

    #[test]
    fn admission_registers_and_stamps() {
        let nmap = Arc::new(StaticNameMapper::with_mappings(vec![(1, 0)]));
        let node = vt_test_instance(nmap);

        let request = prog_request(vec![(1, serde_json::json!({"target": 9}))]);
        smol::block_on(node.node_prog_req_handler(request)).unwrap();

        assert_eq!(node.shared.clock.lock().unwrap().vclk().own_entry(), 1);
        let tx_prog = node.shared.tx_prog.lock().unwrap();
        assert!(tx_prog.has_outstanding_prog(1));
        assert_eq!(tx_prog.num_outstanding_progs(), 1);
    }

    #[test]
    fn out_of_order_returns_drain_the_frontier() {
        let nmap = Arc::new(StaticNameMapper::with_mappings(vec![(1, 0)]));
        let node = vt_test_instance(nmap);

        for _ in 0..2 {
            let request = prog_request(vec![(1, serde_json::Value::Null)]);
            smol::block_on(node.node_prog_req_handler(request)).unwrap();
        }

        // the younger program (id 2) replies first
        smol::block_on(node.node_prog_return_handler(
            ProgType::Reachability,
            2,
            serde_json::Value::Null,
        ))
        .unwrap();
        assert_eq!(node.shared.tx_prog.lock().unwrap().frontier().0, 0);

        smol::block_on(node.node_prog_return_handler(
            ProgType::Reachability,
            1,
            serde_json::Value::Null,
        ))
        .unwrap();
        let tx_prog = node.shared.tx_prog.lock().unwrap();
        assert_eq!(tx_prog.frontier().0, 2);
        assert_eq!(tx_prog.num_outstanding_progs(), 0);
        // both completions entered the cleanup ledger
        assert!(tx_prog.ledger_bits(ProgType::Reachability, 1).is_some());
        assert!(tx_prog.ledger_bits(ProgType::Reachability, 2).is_some());
    }

    #[test]
    fn stale_return_changes_nothing() {
        let node = vt_test_instance(Arc::new(StaticNameMapper::new()));
        smol::block_on(node.node_prog_return_handler(
            ProgType::EdgeGet,
            42,
            serde_json::Value::Null,
        ))
        .unwrap();
        let tx_prog = node.shared.tx_prog.lock().unwrap();
        assert_eq!(tx_prog.frontier().0, 0);
        assert_eq!(tx_prog.ledger_bits(ProgType::EdgeGet, 42), None);
    }

    #[test]
    fn duplicate_return_is_stale_after_the_first() {
        let nmap = Arc::new(StaticNameMapper::with_mappings(vec![(1, 0)]));
        let node = vt_test_instance(nmap);

        // two programs so the younger one's completion cannot retire it
        for _ in 0..2 {
            let request = prog_request(vec![(1, serde_json::Value::Null)]);
            smol::block_on(node.node_prog_req_handler(request)).unwrap();
        }
        for _ in 0..2 {
            smol::block_on(node.node_prog_return_handler(
                ProgType::Reachability,
                2,
                serde_json::Value::Null,
            ))
            .unwrap();
        }
        assert_eq!(node.shared.tx_prog.lock().unwrap().frontier().0, 0);
    }

    #[test]
    fn global_request_reaches_every_shard_as_one_id() {
        let node = vt_test_instance(Arc::new(StaticNameMapper::new()));

        let request = prog_request(vec![(GLOBAL_HANDLE, serde_json::Value::Null)]);
        smol::block_on(node.node_prog_req_handler(request)).unwrap();

        let tx_prog = node.shared.tx_prog.lock().unwrap();
        assert!(tx_prog.has_outstanding_prog(1));
        assert_eq!(tx_prog.num_outstanding_progs(), 1);
    }

    #[test]
    fn mixed_global_args_are_dropped() {
        let node = vt_test_instance(Arc::new(StaticNameMapper::new()));

        let request = prog_request(vec![
            (GLOBAL_HANDLE, serde_json::Value::Null),
            (1, serde_json::Value::Null),
        ]);
        smol::block_on(node.node_prog_req_handler(request)).unwrap();

        assert_eq!(node.shared.clock.lock().unwrap().vclk().own_entry(), 0);
        assert_eq!(node.shared.tx_prog.lock().unwrap().num_outstanding_progs(), 0);
    }
}
