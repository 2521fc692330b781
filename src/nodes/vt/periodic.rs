//! The timestamper's periodic duties: NOP heartbeats to the shards and
//! clock gossip to the peer timestampers.
//!
//! Both run on one timer so background traffic stays bounded and shards
//! hear about new frontier information within one period.

use super::{PeriodicState, VtNode};
use crate::{
    clock::VectorClock,
    messages::{Nop, PeerMessage, ShardRequest},
    nodes::publish,
    topics::{ShardThread, VtThread},
    ShardId, INITIAL_TIMEOUT_NANO, NUM_VTS, VT_TIMEOUT_NANO,
};
use futures::{future::FusedFuture, Future, FutureExt};
use futures_timer::Delay;
use std::time::Duration;

/// Period of the timer tick.
pub(crate) const VT_TIMEOUT: Duration = Duration::from_nanos(VT_TIMEOUT_NANO);

/// Delay before the first tick after startup.
pub(crate) const INITIAL_TIMEOUT: Duration = Duration::from_nanos(INITIAL_TIMEOUT_NANO);

impl VtNode {
    /// Runs the periodic timer until shutdown.
    ///
    /// Sleeps [`INITIAL_TIMEOUT`] once so the other replicas can come up,
    /// then ticks every [`VT_TIMEOUT`].
    pub(crate) async fn run_timer(
        &self,
        mut shutdown_signal: impl Future<Output = ()> + FusedFuture + Unpin,
    ) -> eyre::Result<()> {
        futures::select! {
            () = Delay::new(INITIAL_TIMEOUT).fuse() => {}
            () = shutdown_signal => return Ok(()),
        }
        log::info!("initial setup delay complete");

        loop {
            futures::select! {
                () = Delay::new(VT_TIMEOUT).fuse() => {
                    self.periodic_update().await?;
                }
                () = shutdown_signal => break,
            }
        }

        Ok(())
    }

    /// One timer tick.
    ///
    /// Sends a NOP to every shard that acked the previous one, and a
    /// clock update to every peer once all peers acked the previous
    /// gossip round. Messages are assembled under the periodic-update
    /// mutex and sent after it is released.
    pub(crate) async fn periodic_update(&self) -> eyre::Result<()> {
        let mut nops = Vec::new();
        let mut gossip = None;
        {
            let mut periodic = self.shared.periodic.lock().unwrap();
            let mut nop_clock = None;
            if let Some((batch, vclk)) = self.assemble_nops(&mut periodic) {
                nops = batch;
                nop_clock = Some(vclk);
            }

            if periodic.clock_update_acks == NUM_VTS - 1 && NUM_VTS > 1 {
                periodic.clock_update_acks = 0;
                let value = match &nop_clock {
                    Some(vclk) => vclk.own_entry(),
                    None => self.shared.clock.lock().unwrap().own_entry(),
                };
                gossip = Some(value);
            }
        }

        for (shard_id, nop) in nops {
            publish(
                &self.zenoh,
                &ShardThread::new(shard_id).request_topic(&self.zenoh_prefix),
                &ShardRequest::Nop(nop),
            )
            .await?;
        }

        if let Some(value) = gossip {
            for peer in (0..NUM_VTS).filter(|&peer| peer != self.vt_id) {
                publish(
                    &self.zenoh,
                    &VtThread::new(peer, 0).peer_topic(&self.zenoh_prefix),
                    &PeerMessage::ClockUpdate {
                        vt_id: self.vt_id,
                        value,
                    },
                )
                .await?;
            }
        }

        Ok(())
    }

    /// Assembles the NOP for every rearmed shard and clears the mask.
    ///
    /// Returns the per-shard batch together with the vector-clock
    /// snapshot the NOPs were stamped with, or `None` when no shard is
    /// ready for a NOP.
    pub(crate) fn assemble_nops(
        &self,
        periodic: &mut PeriodicState,
    ) -> Option<(Vec<(ShardId, Nop)>, VectorClock)> {
        if !periodic.to_nop.any() {
            return None;
        }
        let to_nop = periodic.to_nop;
        let req_id = self.shared.fresh_request_id();

        let (vclk, qts) = {
            let mut clock = self.shared.clock.lock().unwrap();
            clock.advance_for_nop(to_nop)
        };

        let (max_done_id, max_done_clk, outstanding_progs, done_lists) = {
            let mut tx_prog = self.shared.tx_prog.lock().unwrap();
            let (max_done_id, max_done_clk) = tx_prog.frontier();
            let outstanding_progs = tx_prog.num_outstanding_progs() as u64;
            let done_lists = tx_prog.drain_done_reqs(to_nop);
            (max_done_id, max_done_clk, outstanding_progs, done_lists)
        };

        let mut batch = Vec::new();
        for (shard_id, done_reqs) in done_lists.into_iter().enumerate() {
            if !to_nop.contains(shard_id) {
                continue;
            }
            batch.push((
                shard_id,
                Nop {
                    vt_id: self.vt_id,
                    vclk: vclk.clone(),
                    qts: qts.clone(),
                    req_id,
                    done_reqs,
                    max_done_id,
                    max_done_clk: max_done_clk.clone(),
                    outstanding_progs,
                    shard_node_count: periodic.shard_node_count.clone(),
                    sender: VtThread::new(self.vt_id, 0),
                },
            ));
        }
        periodic.to_nop = crate::ShardBitmap::empty();

        Some((batch, vclk))
    }
}
