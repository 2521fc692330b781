//! The clocks of a timestamper, advanced together under one mutex.

use crate::{
    clock::{QueueTimestamps, VectorClock},
    messages::Write,
    ShardBitmap, VtId,
};

/// The vector clock and per-shard queue timestamps of this timestamper.
///
/// The three `advance_*` operations are the only producers of the own
/// vector-clock entry, and each call yields a unique value. Queue
/// timestamps only ever grow, one slot per scheduled event.
pub(crate) struct ClockState {
    vclk: VectorClock,
    qts: QueueTimestamps,
}

impl ClockState {
    pub(crate) fn new(vt_id: VtId) -> Self {
        ClockState {
            vclk: VectorClock::new(vt_id),
            qts: QueueTimestamps::new(),
        }
    }

    /// Admits a transaction: takes one queue slot per write, in program
    /// order, recording the exact snapshot against each write, then
    /// advances the vector clock. Returns the transaction's timestamp.
    pub(crate) fn advance_for_tx(&mut self, writes: &mut [Write]) -> VectorClock {
        for write in writes.iter_mut() {
            self.qts.tick(write.shard);
            write.qts = self.qts.clone();
        }
        self.vclk.increment();
        self.vclk.clone()
    }

    /// Admits a NOP round: takes one queue slot at every shard in
    /// `to_nop`, then advances the vector clock. Returns snapshots of
    /// both clocks.
    pub(crate) fn advance_for_nop(&mut self, to_nop: ShardBitmap) -> (VectorClock, QueueTimestamps) {
        for shard in to_nop.shards() {
            self.qts.tick(shard);
        }
        self.vclk.increment();
        (self.vclk.clone(), self.qts.clone())
    }

    /// Admits a node program: advances the vector clock only (programs
    /// take no queue slots). Returns the program's timestamp.
    pub(crate) fn advance_for_prog(&mut self) -> VectorClock {
        self.vclk.increment();
        self.vclk.clone()
    }

    /// Raises a peer's clock entry; never lowers it.
    pub(crate) fn raise_remote(&mut self, peer: VtId, value: u64) {
        self.vclk.raise(peer, value);
    }

    /// The own vector-clock entry, for clock gossip.
    pub(crate) fn own_entry(&self) -> u64 {
        self.vclk.own_entry()
    }

    #[cfg(test)]
    pub(crate) fn vclk(&self) -> &VectorClock {
        &self.vclk
    }

    #[cfg(test)]
    pub(crate) fn qts(&self) -> &QueueTimestamps {
        &self.qts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::WriteKind;
    use crate::NUM_SHARDS;

    fn write_at(shard: usize) -> Write {
        Write {
            kind: WriteKind::CreateNode { node: shard as u64 },
            shard,
            remote_shard: None,
            qts: QueueTimestamps::new(),
        }
    }

    #[test]
    fn tx_admission_assigns_per_write_slots() {
        let mut clock = ClockState::new(0);
        let mut writes = vec![write_at(0), write_at(1)];
        let timestamp = clock.advance_for_tx(&mut writes);

        assert_eq!(timestamp.entries(), [1, 0]);
        assert_eq!(clock.qts().entries(), [1, 1]);
        // the first write was stamped before shard 1's slot was taken
        assert_eq!(writes[0].qts.entries(), [1, 0]);
        assert_eq!(writes[1].qts.entries(), [1, 1]);
    }

    #[test]
    fn queue_slots_grow_per_shard_across_admissions() {
        let mut clock = ClockState::new(0);
        let mut first = vec![write_at(0), write_at(0)];
        let mut second = vec![write_at(0), write_at(1)];
        clock.advance_for_tx(&mut first);
        clock.advance_for_tx(&mut second);

        assert_eq!(first[1].qts.entry(0), 2);
        assert_eq!(second[0].qts.entry(0), 3);
        assert!(second[0].qts.entry(0) > first[1].qts.entry(0));
        assert_eq!(clock.vclk().own_entry(), 2);
    }

    #[test]
    fn nop_admission_takes_slots_on_rearmed_shards_only() {
        let mut clock = ClockState::new(0);
        let mut mask = ShardBitmap::empty();
        mask.set(0);
        let (vclk, qts) = clock.advance_for_nop(mask);

        assert_eq!(vclk.own_entry(), 1);
        assert_eq!(qts.entry(0), 1);
        for shard in 1..NUM_SHARDS {
            assert_eq!(qts.entry(shard), 0);
        }
    }

    #[test]
    fn every_advance_yields_a_fresh_clock_value() {
        let mut clock = ClockState::new(0);
        let a = clock.advance_for_prog().own_entry();
        let (vclk, _) = clock.advance_for_nop(ShardBitmap::full());
        let b = vclk.own_entry();
        let c = clock.advance_for_prog().own_entry();
        assert!(a < b && b < c);
    }

    #[test]
    fn raise_remote_is_monotone() {
        let mut clock = ClockState::new(0);
        clock.raise_remote(1, 40);
        clock.raise_remote(1, 42);
        clock.raise_remote(1, 41);
        assert_eq!(clock.vclk().entry(1), 42);
    }
}
