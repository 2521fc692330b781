use futures::{FutureExt, StreamExt};
use heddle::{
    config::Options,
    messages::{
        ClientRequest, ClientResponse, ClusterConfig, ProgRequest, ProgType, ShardReport,
        ShardRequest, TxRequest, WriteKind,
    },
    nmap::StaticNameMapper,
    nodes::{decode_message, publish},
    topics::{ClientThread, ServerManager, ShardThread, VtThread},
    vt, zenoh_test_instance, GLOBAL_HANDLE, NUM_SHARDS, NUM_VTS,
};
use pretty_assertions::assert_eq;
use std::{sync::Arc, thread, time::Duration};

/// Spawns a timestamper for VT slot 0, a server manager pushing one
/// configuration, and scripted shards that ack everything they receive.
fn spawn_cluster(zenoh: &Arc<zenoh::Session>, zenoh_prefix: &str) {
    let _vt_thread = {
        let zenoh = zenoh.clone();
        let zenoh_prefix = zenoh_prefix.to_owned();
        thread::spawn(move || {
            let options = Options {
                vt_id: 0,
                backup_index: None,
            };
            let nmap = Arc::new(StaticNameMapper::with_mappings(vec![(1, 0), (2, 1)]));
            vt::run(&options, zenoh, zenoh_prefix, nmap).expect("timestamper task failed")
        })
    };

    let _config_thread = {
        let zenoh = zenoh.clone();
        let zenoh_prefix = zenoh_prefix.to_owned();
        thread::spawn(move || {
            smol::block_on(async move {
                let config = ClusterConfig {
                    cluster: 1,
                    version: 1,
                    members: (0..(NUM_VTS + NUM_SHARDS) as u64).collect(),
                };
                loop {
                    publish(&zenoh, &ServerManager::config_topic(&zenoh_prefix), &config)
                        .await
                        .expect("failed to push configuration");
                    futures_timer::Delay::new(Duration::from_millis(50)).await;
                }
            })
        })
    };

    for shard_id in 0..NUM_SHARDS {
        let zenoh = zenoh.clone();
        let zenoh_prefix = zenoh_prefix.to_owned();
        thread::spawn(move || {
            smol::block_on(async move {
                let mut subscriber = zenoh
                    .subscribe(&ShardThread::new(shard_id).request_topic(&zenoh_prefix))
                    .await
                    .map_err(|e| eyre::eyre!(e))
                    .expect("failed to subscribe shard topic");
                let mut requests = subscriber.receiver();
                while let Some(sample) = requests.next().await {
                    let request: ShardRequest =
                        decode_message(&sample.value).expect("shard received bad message");
                    match request {
                        ShardRequest::TxInit(init) => {
                            publish(
                                &zenoh,
                                &init.sender.shard_report_topic(&zenoh_prefix),
                                &ShardReport::TxDone { tx_id: init.tx_id },
                            )
                            .await
                            .expect("failed to ack transaction");
                        }
                        ShardRequest::NodeProg(prog) => {
                            publish(
                                &zenoh,
                                &prog.sender.shard_report_topic(&zenoh_prefix),
                                &ShardReport::NodeProgReturn {
                                    prog_type: prog.prog_type,
                                    req_id: prog.req_id,
                                    payload: serde_json::json!({ "reachable": true }),
                                },
                            )
                            .await
                            .expect("failed to reply to program");
                        }
                        ShardRequest::Nop(nop) => {
                            publish(
                                &zenoh,
                                &nop.sender.shard_report_topic(&zenoh_prefix),
                                &ShardReport::NopAck {
                                    shard_id,
                                    node_count: 1,
                                },
                            )
                            .await
                            .expect("failed to ack nop");
                        }
                        ShardRequest::MsgCount { .. } | ShardRequest::MigrationToken { .. } => {}
                    }
                }
            })
        });
    }
}

/// Sends `request` to the timestamper until a response arrives on the
/// client topic, retrying because the cluster may still be starting up.
fn submit_until_response(
    zenoh: &Arc<zenoh::Session>,
    zenoh_prefix: &str,
    request: &ClientRequest,
    response_topic: &str,
) -> ClientResponse {
    smol::block_on(async move {
        let mut subscriber = zenoh
            .subscribe(response_topic)
            .await
            .map_err(|e| eyre::eyre!(e))
            .expect("failed to subscribe response topic");
        let mut responses = subscriber.receiver().fuse();

        let target = VtThread::new(0, 0).client_request_topic(zenoh_prefix);
        for _ in 0..100 {
            publish(zenoh, &target, request)
                .await
                .expect("failed to submit request");
            futures::select! {
                sample = responses.select_next_some() => {
                    return decode_message(&sample.value).expect("bad client response");
                }
                () = futures_timer::Delay::new(Duration::from_millis(100)).fuse() => {}
            }
        }
        panic!("no response within the deadline");
    })
}

#[test]
fn transaction_round_trip() {
    let zenoh = zenoh_test_instance();
    let zenoh_prefix = uuid::Uuid::new_v4().to_string();
    spawn_cluster(&zenoh, &zenoh_prefix);

    let response_topic = ClientThread::new("tx-test".into(), 0).response_topic(&zenoh_prefix);
    let request = ClientRequest::TxInit(TxRequest {
        writes: vec![
            WriteKind::SetNodeProperty {
                node: 1,
                key: "color".into(),
                value: "blue".into(),
            },
            WriteKind::DeleteNode { node: 2 },
        ],
        response_topic: response_topic.clone(),
    });

    let response = submit_until_response(&zenoh, &zenoh_prefix, &request, &response_topic);
    match response {
        ClientResponse::TxDone => {}
        other => panic!("unexpected response: {:?}", other),
    }
}

#[test]
fn global_program_round_trip() {
    let zenoh = zenoh_test_instance();
    let zenoh_prefix = uuid::Uuid::new_v4().to_string();
    spawn_cluster(&zenoh, &zenoh_prefix);

    let response_topic = ClientThread::new("prog-test".into(), 0).response_topic(&zenoh_prefix);
    let request = ClientRequest::NodeProg(ProgRequest {
        prog_type: ProgType::Reachability,
        args: vec![(GLOBAL_HANDLE, serde_json::Value::Null)],
        response_topic: response_topic.clone(),
    });

    let response = submit_until_response(&zenoh, &zenoh_prefix, &request, &response_topic);
    match response {
        ClientResponse::NodeProgReturn {
            prog_type,
            payload,
            ..
        } => {
            assert_eq!(prog_type, ProgType::Reachability);
            assert_eq!(payload, serde_json::json!({ "reachable": true }));
        }
        other => panic!("unexpected response: {:?}", other),
    }
}
