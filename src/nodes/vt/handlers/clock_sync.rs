//! Inter-timestamper clock synchronization handlers.

use crate::{
    messages::PeerMessage,
    nodes::{publish, vt::VtNode},
    topics::VtThread,
    VtId, NUM_VTS,
};

impl VtNode {
    /// Handles a peer's clock value: raises our copy of its entry and
    /// acks, counting toward the peer's next gossip round.
    pub(crate) async fn clock_update_handler(&self, peer: VtId, value: u64) -> eyre::Result<()> {
        {
            let mut clock = self.shared.clock.lock().unwrap();
            clock.raise_remote(peer, value);
        }
        publish(
            &self.zenoh,
            &VtThread::new(peer, 0).peer_topic(&self.zenoh_prefix),
            &PeerMessage::ClockUpdateAck,
        )
        .await
    }

    /// Counts a peer's ack toward our next gossip round.
    pub(crate) fn clock_update_ack_handler(&self) {
        let mut periodic = self.shared.periodic.lock().unwrap();
        periodic.clock_update_acks += 1;
        assert!(
            periodic.clock_update_acks < NUM_VTS,
            "more clock-update acks than peers"
        );
    }
}

#[cfg(test)]
mod tests {
    use crate::nmap::StaticNameMapper;
    use crate::nodes::vt::vt_test_instance;
    use std::sync::Arc;

    #[test]
    fn remote_entries_only_rise() {
        let node = vt_test_instance(Arc::new(StaticNameMapper::new()));

        smol::block_on(node.clock_update_handler(1, 42)).unwrap();
        assert_eq!(node.shared.clock.lock().unwrap().vclk().entry(1), 42);

        // an older update must not lower the entry
        smol::block_on(node.clock_update_handler(1, 41)).unwrap();
        assert_eq!(node.shared.clock.lock().unwrap().vclk().entry(1), 42);

        // the local entry is untouched by peer updates
        assert_eq!(node.shared.clock.lock().unwrap().vclk().own_entry(), 0);
    }

    #[test]
    fn acks_accumulate_below_the_replica_count() {
        let node = vt_test_instance(Arc::new(StaticNameMapper::new()));
        node.clock_update_ack_handler();
        assert_eq!(
            node.shared.periodic.lock().unwrap().clock_update_acks,
            1
        );
    }
}
