//! The vector timestamper node.
//!
//! One process serves one timestamper slot. It runs [`NUM_THREADS`]
//! dispatcher threads that demultiplex the inbound message streams, one
//! timer thread for the periodic NOP/clock-gossip duties, and one watcher
//! task following the server manager's configuration pushes. All ordering
//! state is shared between the threads and guarded by three mutexes with
//! disjoint concerns: the clocks, the transaction/program registry, and
//! the periodic-update bookkeeping.

pub use self::registry::TxAck;
use self::{
    clock_state::ClockState,
    registry::TxProgState,
};
use crate::{
    config::Options,
    messages::{ClientRequest, ClusterConfig, PeerMessage, ShardReport},
    nmap::NameMapper,
    nodes::{await_membership, decode_message},
    topics::{ServerManager, VtThread},
    HeddleError, RequestId, VtId, NUM_SHARDS, NUM_THREADS,
};
use eyre::Context;
use futures::{future::FusedFuture, Future, FutureExt, StreamExt};
use std::{
    mem,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

mod clock_state;
mod handlers;
mod periodic;
mod registry;

/// Starts a new multithreaded timestamper process for the given options.
///
/// Waits for the first cluster configuration (and, for a backup, for
/// promotion), then serves until a task fails or the process is shut down.
pub fn run(
    options: &Options,
    zenoh: Arc<zenoh::Session>,
    zenoh_prefix: String,
    nmap: Arc<dyn NameMapper>,
) -> eyre::Result<()> {
    let vt_id = options.vt_id;
    let server_id = options.server_id();

    // wait for the first configuration that knows about us
    let config = smol::block_on(await_membership(
        &zenoh,
        &zenoh_prefix,
        server_id,
        options.is_backup(),
    ))?;
    if options.is_backup() {
        log::info!(
            "backup {} now primary for timestamper {}",
            server_id,
            vt_id
        );
    }
    log::info!("Vector timestamper {} starting up..", vt_id);

    let shared = Arc::new(SharedState::new(vt_id, config));

    crossbeam_utils::thread::scope(|s| {
        let (shutdown_tx, shutdown) = smol::channel::unbounded::<()>();
        let (result_tx, task_errors) = smol::channel::unbounded();

        for thread_id in 0..NUM_THREADS {
            let node = VtNode::new(
                vt_id,
                thread_id,
                zenoh.clone(),
                zenoh_prefix.clone(),
                shared.clone(),
                nmap.clone(),
            );
            let result_tx = result_tx.clone();
            let mut shutdown = shutdown.clone();

            let task = async move {
                node.run(shutdown.next().map(|_| ()))
                    .await
                    .context(format!("dispatcher thread {}/{} failed", vt_id, thread_id))
            };
            s.spawn(move |_| {
                smol::block_on(async {
                    match task.await {
                        Ok(()) => {}
                        Err(err) => {
                            let _ = result_tx.send(err).await;
                        }
                    }
                })
            });
        }

        // the periodic timer gets its own thread and sends as thread 0
        {
            let node = VtNode::new(
                vt_id,
                0,
                zenoh.clone(),
                zenoh_prefix.clone(),
                shared.clone(),
                nmap.clone(),
            );
            let result_tx = result_tx.clone();
            let mut shutdown = shutdown.clone();
            s.spawn(move |_| {
                smol::block_on(async {
                    let task = node
                        .run_timer(shutdown.next().map(|_| ()))
                        .await
                        .context(format!("timer of timestamper {} failed", vt_id));
                    match task {
                        Ok(()) => {}
                        Err(err) => {
                            let _ = result_tx.send(err).await;
                        }
                    }
                })
            });
        }

        // follow configuration pushes for the rest of the process lifetime
        {
            let zenoh = zenoh.clone();
            let zenoh_prefix = zenoh_prefix.clone();
            let shared = shared.clone();
            let result_tx = result_tx.clone();
            let mut shutdown = shutdown.clone();
            s.spawn(move |_| {
                smol::block_on(async {
                    let task = watch_config(
                        &zenoh,
                        &zenoh_prefix,
                        &shared,
                        server_id,
                        shutdown.next().map(|_| ()),
                    )
                    .await
                    .context("configuration watcher failed");
                    match task {
                        Ok(()) => {}
                        Err(err) => {
                            let _ = result_tx.send(err).await;
                        }
                    }
                })
            });
        }

        mem::drop(result_tx);
        mem::drop(shutdown);

        smol::block_on(task_errors.recv().map(|recv_result| match recv_result {
            Ok(error) => {
                shutdown_tx.close();
                Err(error)
            }
            Err(smol::channel::RecvError) => Ok(()),
        }))
    })
    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))?;

    Ok(())
}

/// Follows configuration pushes after startup.
///
/// A cluster-id jump or the eviction of this server from the membership is
/// fatal; configurations older than the current one are ignored.
async fn watch_config(
    zenoh: &zenoh::Session,
    zenoh_prefix: &str,
    shared: &SharedState,
    server_id: u64,
    mut shutdown_signal: impl Future<Output = ()> + FusedFuture + Unpin,
) -> eyre::Result<()> {
    let mut subscriber = zenoh
        .subscribe(&ServerManager::config_topic(zenoh_prefix))
        .await
        .map_err(|e| eyre::eyre!(e))
        .context("failed to declare configuration subscriber")?;
    let mut config_stream = subscriber.receiver().fuse();

    loop {
        futures::select! {
            sample = config_stream.select_next_some() => {
                let new: ClusterConfig = match decode_message(&sample.value) {
                    Ok(config) => config,
                    Err(err) => {
                        log::warn!("skipping undecodable cluster configuration: {:?}", err);
                        continue;
                    }
                };
                let mut current = shared.config.lock().unwrap();
                if new.cluster != current.cluster {
                    return Err(eyre::eyre!(HeddleError::ClusterJump {
                        old: current.cluster,
                        new: new.cluster,
                    }));
                }
                if new.version < current.version {
                    log::warn!(
                        "received configuration version {} older than current version {}",
                        new.version,
                        current.version
                    );
                    continue;
                }
                if !new.contains_server(server_id) {
                    return Err(eyre::eyre!(HeddleError::NotInMembership(server_id)));
                }
                *current = new;
            }
            () = shutdown_signal => break,
            complete => break,
        }
    }

    Ok(())
}

/// One dispatcher thread of a timestamper node.
pub struct VtNode {
    /// The timestamper slot this node serves.
    vt_id: VtId,
    /// Used for addressing itself.
    ///
    /// Must be consistent with the `vt_id` field. The `wt` name is short
    /// for "worker thread".
    wt: VtThread,

    /// Used for communicating with the other nodes.
    zenoh: Arc<zenoh::Session>,
    zenoh_prefix: String,

    /// The ordering state shared by all threads of this process.
    shared: Arc<SharedState>,

    /// Client for the external name-mapper service.
    nmap: Arc<dyn NameMapper>,
}

impl VtNode {
    pub(crate) fn new(
        vt_id: VtId,
        thread_id: u32,
        zenoh: Arc<zenoh::Session>,
        zenoh_prefix: String,
        shared: Arc<SharedState>,
        nmap: Arc<dyn NameMapper>,
    ) -> VtNode {
        VtNode {
            vt_id,
            wt: VtThread::new(vt_id, thread_id),
            zenoh,
            zenoh_prefix,
            shared,
            nmap,
        }
    }

    /// Runs this dispatcher thread until shutdown.
    ///
    /// Messages that fail to decode are skipped; everything else is
    /// dispatched to the handler for its message family.
    pub async fn run(
        self,
        mut shutdown_signal: impl Future<Output = ()> + FusedFuture + Unpin,
    ) -> eyre::Result<()> {
        let zenoh = self.zenoh.clone();

        // requests from clients
        let mut client_subscriber = zenoh
            .subscribe(&self.wt.client_request_topic(&self.zenoh_prefix))
            .await
            .map_err(|e| eyre::eyre!(e))
            .context("failed to declare client request subscriber")?;
        let mut client_stream = client_subscriber.receiver().fuse();

        // reports from shards
        let mut shard_subscriber = zenoh
            .subscribe(&self.wt.shard_report_topic(&self.zenoh_prefix))
            .await
            .map_err(|e| eyre::eyre!(e))
            .context("failed to declare shard report subscriber")?;
        let mut shard_stream = shard_subscriber.receiver().fuse();

        // clock messages from peer timestampers
        let mut peer_subscriber = zenoh
            .subscribe(&self.wt.peer_topic(&self.zenoh_prefix))
            .await
            .map_err(|e| eyre::eyre!(e))
            .context("failed to declare peer subscriber")?;
        let mut peer_stream = peer_subscriber.receiver().fuse();

        loop {
            futures::select! {
                sample = client_stream.select_next_some() => {
                    match decode_message::<ClientRequest>(&sample.value) {
                        Ok(request) => self.handle_client_request(request).await
                            .context("failed to handle client request")?,
                        Err(err) => log::warn!("skipping undecodable client request: {:?}", err),
                    }
                }
                sample = shard_stream.select_next_some() => {
                    match decode_message::<ShardReport>(&sample.value) {
                        Ok(report) => self.handle_shard_report(report).await
                            .context("failed to handle shard report")?,
                        Err(err) => log::warn!("skipping undecodable shard report: {:?}", err),
                    }
                }
                sample = peer_stream.select_next_some() => {
                    match decode_message::<PeerMessage>(&sample.value) {
                        Ok(message) => self.handle_peer_message(message).await
                            .context("failed to handle peer message")?,
                        Err(err) => log::warn!("skipping undecodable peer message: {:?}", err),
                    }
                }
                () = shutdown_signal => break,
                complete => break,
            }
        }

        Ok(())
    }
}

/// The ordering state shared by every thread of a timestamper process.
pub(crate) struct SharedState {
    pub(crate) vt_id: VtId,

    /// The vector clock and queue timestamps. Held only across clock
    /// arithmetic, never across sends.
    pub(crate) clock: Mutex<ClockState>,

    /// Outstanding transactions and programs, the retirement heaps, the
    /// completion frontier, and the done-request ledger.
    pub(crate) tx_prog: Mutex<TxProgState>,

    /// NOP rearm mask, clock-gossip ack counter, and shard node counts.
    pub(crate) periodic: Mutex<PeriodicState>,

    /// Source of request ids; transactions, programs, and NOPs share it.
    next_request_id: AtomicU64,

    /// Message-count aggregation across shards.
    pub(crate) msg_count: Mutex<MsgCountState>,
    /// Graph-load aggregation across shards.
    pub(crate) graph_load: Mutex<GraphLoadState>,
    /// The client waiting for the current migration round, if any.
    pub(crate) migration: Mutex<MigrationState>,

    /// The configuration we are currently operating under.
    pub(crate) config: Mutex<ClusterConfig>,
}

impl SharedState {
    pub(crate) fn new(vt_id: VtId, config: ClusterConfig) -> Self {
        SharedState {
            vt_id,
            clock: Mutex::new(ClockState::new(vt_id)),
            tx_prog: Mutex::new(TxProgState::new(vt_id)),
            periodic: Mutex::new(PeriodicState::new()),
            next_request_id: AtomicU64::new(1),
            msg_count: Default::default(),
            graph_load: Default::default(),
            migration: Default::default(),
            config: Mutex::new(config),
        }
    }

    /// Allocates the next request id.
    pub(crate) fn fresh_request_id(&self) -> RequestId {
        self.next_request_id.fetch_add(1, Ordering::SeqCst)
    }
}

/// State owned by the periodic-update mutex.
pub(crate) struct PeriodicState {
    /// Shards that have acked the previous NOP and are ready for another.
    pub(crate) to_nop: crate::ShardBitmap,
    /// Peer acks counted toward the next clock-gossip round.
    pub(crate) clock_update_acks: usize,
    /// Last node counts the shards reported, indexed by shard id.
    pub(crate) shard_node_count: Vec<u64>,
}

impl PeriodicState {
    fn new() -> Self {
        PeriodicState {
            to_nop: crate::ShardBitmap::full(),
            clock_update_acks: 0,
            shard_node_count: vec![0; NUM_SHARDS],
        }
    }
}

/// Message-count aggregation state.
#[derive(Default)]
pub(crate) struct MsgCountState {
    pub(crate) total: u64,
    pub(crate) acks: usize,
}

/// Graph-load aggregation state.
#[derive(Default)]
pub(crate) struct GraphLoadState {
    pub(crate) max_load_time: u64,
    pub(crate) load_count: usize,
}

/// Migration-relay state.
#[derive(Default)]
pub(crate) struct MigrationState {
    /// Response topic of the client waiting for the token to circulate.
    pub(crate) client: Option<String>,
}

#[cfg(test)]
pub(crate) fn vt_test_instance(nmap: Arc<dyn NameMapper>) -> VtNode {
    let zenoh = crate::zenoh_test_instance();
    let zenoh_prefix = uuid::Uuid::new_v4().to_string();
    let config = ClusterConfig {
        cluster: 1,
        version: 1,
        members: (0..(crate::NUM_VTS + NUM_SHARDS) as u64).collect(),
    };
    let shared = Arc::new(SharedState::new(0, config));
    VtNode::new(0, 0, zenoh, zenoh_prefix, shared, nmap)
}
