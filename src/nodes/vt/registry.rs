//! Bookkeeping for outstanding transactions and node programs.
//!
//! Everything in this module lives under one mutex: the registries, the
//! two retirement heaps, the completion frontier, and the done-request
//! ledger all change together when a program finishes, so splitting the
//! lock would only invite inconsistent snapshots.

use crate::{
    clock::VectorClock,
    messages::{DoneRequest, ProgType},
    RequestId, ShardBitmap, VtId, NUM_SHARDS,
};
use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap, HashSet},
};

/// An admitted transaction awaiting shard acks.
struct OutstandingTx {
    /// Response topic of the submitting client.
    client: String,
    /// Participating shards that have not acked yet.
    remaining_shards: u32,
}

/// An admitted node program awaiting its reply and retirement.
struct OutstandingProg {
    /// Response topic of the submitting client.
    client: String,
    /// Vector clock assigned at admission; becomes the frontier clock
    /// when the program retires.
    timestamp: VectorClock,
}

/// Outcome of counting one shard ack against a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxAck {
    /// This was the last outstanding shard; notify the given client.
    Completed(String),
    /// Acks from other shards are still outstanding.
    Pending,
    /// No transaction with that id is outstanding.
    Unknown,
}

/// The transaction/program registry, frontier, and done-request ledger.
pub(crate) struct TxProgState {
    outstanding_tx: HashMap<RequestId, OutstandingTx>,
    outstanding_progs: HashMap<RequestId, OutstandingProg>,

    /// Admitted, not-yet-retired program ids; the top is the oldest.
    pend_prog_queue: BinaryHeap<Reverse<RequestId>>,
    /// Program ids whose reply arrived while older ids were still open.
    /// Every id in here is also in `pend_prog_queue`.
    done_prog_queue: BinaryHeap<Reverse<RequestId>>,
    /// Ids whose reply has been counted, to reject duplicates.
    seen_done_ids: HashSet<RequestId>,

    /// The largest program id all of whose predecessors have finished.
    max_done_id: RequestId,
    /// The clock of the program retired as `max_done_id`.
    max_done_clk: VectorClock,

    /// Per program type: finished id -> shards already told via a NOP.
    done_reqs: HashMap<ProgType, HashMap<RequestId, ShardBitmap>>,
}

impl TxProgState {
    pub(crate) fn new(vt_id: VtId) -> Self {
        TxProgState {
            outstanding_tx: Default::default(),
            outstanding_progs: Default::default(),
            pend_prog_queue: Default::default(),
            done_prog_queue: Default::default(),
            seen_done_ids: Default::default(),
            max_done_id: 0,
            max_done_clk: VectorClock::new(vt_id),
            done_reqs: Default::default(),
        }
    }

    /// Records an admitted transaction with its shard fan-out count.
    pub(crate) fn register_tx(&mut self, id: RequestId, client: String, fanout: u32) {
        assert!(fanout > 0, "transaction {} admitted without participating shards", id);
        let previous = self.outstanding_tx.insert(
            id,
            OutstandingTx {
                client,
                remaining_shards: fanout,
            },
        );
        assert!(previous.is_none(), "request id {} reused for a transaction", id);
    }

    /// Counts one shard ack; on the last ack the entry is erased and the
    /// client to notify is returned.
    pub(crate) fn tx_shard_ack(&mut self, id: RequestId) -> TxAck {
        match self.outstanding_tx.get_mut(&id) {
            None => TxAck::Unknown,
            Some(entry) => {
                entry.remaining_shards -= 1;
                if entry.remaining_shards == 0 {
                    let entry = self.outstanding_tx.remove(&id).unwrap();
                    TxAck::Completed(entry.client)
                } else {
                    TxAck::Pending
                }
            }
        }
    }

    /// Records an admitted node program.
    pub(crate) fn register_prog(&mut self, id: RequestId, client: String, timestamp: VectorClock) {
        let previous = self
            .outstanding_progs
            .insert(id, OutstandingProg { client, timestamp });
        assert!(previous.is_none(), "request id {} reused for a program", id);
        self.pend_prog_queue.push(Reverse(id));
    }

    /// The client to forward a program reply to, if the program is still
    /// outstanding and this is the first reply for it.
    pub(crate) fn prog_client(&self, id: RequestId) -> Option<&str> {
        if self.seen_done_ids.contains(&id) {
            return None;
        }
        self.outstanding_progs
            .get(&id)
            .map(|prog| prog.client.as_str())
    }

    /// Enters a finished program into the done-request ledger; the bits
    /// fill in as NOPs inform the shards.
    pub(crate) fn record_done(&mut self, prog_type: ProgType, id: RequestId) {
        self.done_reqs
            .entry(prog_type)
            .or_default()
            .insert(id, ShardBitmap::empty());
    }

    /// Counts a program's (first) reply and advances the frontier as far
    /// as the completions are contiguous.
    ///
    /// The caller must have forwarded the reply already; counting the
    /// same id twice is a protocol violation and aborts the process.
    pub(crate) fn mark_done(&mut self, id: RequestId) {
        assert!(
            self.seen_done_ids.insert(id),
            "duplicate completion for request {}",
            id
        );
        if self.pend_prog_queue.peek() == Some(&Reverse(id)) {
            self.retire_head();
            while let (Some(&Reverse(pending)), Some(&Reverse(done))) =
                (self.pend_prog_queue.peek(), self.done_prog_queue.peek())
            {
                if pending != done {
                    break;
                }
                self.done_prog_queue.pop();
                self.retire_head();
            }
        } else {
            self.done_prog_queue.push(Reverse(id));
        }
    }

    /// Pops the oldest pending program and makes it the frontier.
    fn retire_head(&mut self) {
        let Reverse(id) = self.pend_prog_queue.pop().unwrap();
        assert!(self.max_done_id < id, "frontier would move backwards to {}", id);
        let prog = self
            .outstanding_progs
            .remove(&id)
            .expect("retired program has no registry entry");
        self.max_done_id = id;
        self.max_done_clk = prog.timestamp;
    }

    /// The current completion frontier.
    pub(crate) fn frontier(&self) -> (RequestId, VectorClock) {
        (self.max_done_id, self.max_done_clk.clone())
    }

    /// Number of admitted, not-yet-retired programs.
    pub(crate) fn num_outstanding_progs(&self) -> usize {
        self.pend_prog_queue.len()
    }

    /// Collects, for each shard about to receive a NOP, the finished
    /// requests it has not been told about yet, marking the corresponding
    /// ledger bits. Entries that every shard now knows about are erased.
    pub(crate) fn drain_done_reqs(&mut self, to_nop: ShardBitmap) -> Vec<Vec<DoneRequest>> {
        let mut lists = vec![Vec::new(); NUM_SHARDS];
        for (&prog_type, entries) in self.done_reqs.iter_mut() {
            for (&req_id, bits) in entries.iter_mut() {
                for shard in to_nop.shards() {
                    if !bits.contains(shard) {
                        bits.set(shard);
                        lists[shard].push(DoneRequest { req_id, prog_type });
                    }
                }
            }
            entries.retain(|_, bits| !bits.is_full());
        }
        lists
    }

    #[cfg(test)]
    pub(crate) fn has_outstanding_tx(&self, id: RequestId) -> bool {
        self.outstanding_tx.contains_key(&id)
    }

    #[cfg(test)]
    pub(crate) fn has_outstanding_prog(&self, id: RequestId) -> bool {
        self.outstanding_progs.contains_key(&id)
    }

    #[cfg(test)]
    pub(crate) fn ledger_bits(&self, prog_type: ProgType, id: RequestId) -> Option<ShardBitmap> {
        self.done_reqs.get(&prog_type)?.get(&id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock_at(value: u64) -> VectorClock {
        let mut clk = VectorClock::new(0);
        for _ in 0..value {
            clk.increment();
        }
        clk
    }

    #[test]
    fn tx_acks_count_down_to_client_notification() {
        let mut state = TxProgState::new(0);
        state.register_tx(1, "client".into(), 2);

        assert_eq!(state.tx_shard_ack(1), TxAck::Pending);
        assert_eq!(state.tx_shard_ack(1), TxAck::Completed("client".into()));
        assert!(!state.has_outstanding_tx(1));
        assert_eq!(state.tx_shard_ack(1), TxAck::Unknown);
    }

    #[test]
    fn single_shard_tx_completes_on_first_ack() {
        let mut state = TxProgState::new(0);
        state.register_tx(3, "client".into(), 1);
        assert_eq!(state.tx_shard_ack(3), TxAck::Completed("client".into()));
    }

    #[test]
    fn out_of_order_replies_retire_contiguously() {
        let mut state = TxProgState::new(0);
        state.register_prog(10, "c1".into(), clock_at(1));
        state.register_prog(11, "c2".into(), clock_at(2));

        // the younger program's reply arrives first and must wait
        state.mark_done(11);
        assert_eq!(state.frontier().0, 0);
        assert!(state.has_outstanding_prog(10));
        assert!(state.has_outstanding_prog(11));

        // the older reply arrives and drains both
        state.mark_done(10);
        let (max_done_id, max_done_clk) = state.frontier();
        assert_eq!(max_done_id, 11);
        assert_eq!(max_done_clk, clock_at(2));
        assert!(!state.has_outstanding_prog(10));
        assert!(!state.has_outstanding_prog(11));
        assert_eq!(state.num_outstanding_progs(), 0);
    }

    #[test]
    fn frontier_is_non_decreasing_with_gaps() {
        let mut state = TxProgState::new(0);
        for id in [5, 6, 7, 9] {
            state.register_prog(id, "c".into(), clock_at(id));
        }
        state.mark_done(5);
        assert_eq!(state.frontier().0, 5);
        state.mark_done(7);
        assert_eq!(state.frontier().0, 5);
        state.mark_done(6);
        assert_eq!(state.frontier().0, 7);
        // id 9 still open; the frontier must not jump past the gap
        assert_eq!(state.num_outstanding_progs(), 1);
        state.mark_done(9);
        assert_eq!(state.frontier().0, 9);
    }

    #[test]
    #[should_panic(expected = "duplicate completion")]
    fn duplicate_completion_is_fatal() {
        let mut state = TxProgState::new(0);
        state.register_prog(4, "c".into(), clock_at(1));
        state.mark_done(4);
        state.mark_done(4);
    }

    #[test]
    fn first_reply_wins_later_replies_are_stale() {
        let mut state = TxProgState::new(0);
        state.register_prog(20, "c".into(), clock_at(1));
        state.register_prog(21, "c".into(), clock_at(2));

        assert_eq!(state.prog_client(21), Some("c"));
        state.mark_done(21);
        // seen but not yet retired: replies for it are now stale
        assert_eq!(state.prog_client(21), None);
        // never-registered ids are stale too
        assert_eq!(state.prog_client(99), None);
    }

    #[test]
    fn ledger_fills_per_shard_and_purges_when_complete() {
        let mut state = TxProgState::new(0);
        state.record_done(ProgType::Reachability, 5);

        let mut first = ShardBitmap::empty();
        first.set(0);
        let lists = state.drain_done_reqs(first);
        assert_eq!(
            lists[0],
            vec![DoneRequest {
                req_id: 5,
                prog_type: ProgType::Reachability
            }]
        );
        for shard in 1..NUM_SHARDS {
            assert!(lists[shard].is_empty());
        }
        // entry stays until every shard was told
        assert!(state.ledger_bits(ProgType::Reachability, 5).is_some());

        // a second round for the same shard must not repeat the entry
        let lists = state.drain_done_reqs(first);
        assert!(lists[0].is_empty());

        let mut rest = ShardBitmap::empty();
        for shard in 1..NUM_SHARDS {
            rest.set(shard);
        }
        let lists = state.drain_done_reqs(rest);
        for shard in 1..NUM_SHARDS {
            assert_eq!(lists[shard].len(), 1);
        }
        assert_eq!(state.ledger_bits(ProgType::Reachability, 5), None);
    }
}
