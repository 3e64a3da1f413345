//! Snapshot synthesizer: maintains a shadow copy of every book from the
//! incremental stream and periodically multicasts a self-contained image of
//! it, bracketed by START/END markers that tell consumers which incremental
//! sequence the image is consistent with.

use crate::msg::{MarketUpdate, SequencedUpdate, UpdateKind};
use crate::net::NetError;
use crate::net::mcast::McastSocket;
use crate::spsc::Consumer;
use crate::types::{MAX_TICKERS, OrderId, TickerId};
use crate::wire::MdpMarketUpdateMsg;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};
use zerocopy::IntoBytes;

/// Default cadence between snapshot publications.
pub const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(60);

/// Consumes the publisher's stamped update stream and serves snapshots.
pub struct SnapshotSynthesizer {
    feed: Consumer<SequencedUpdate>,
    socket: McastSocket,
    /// Resting orders per instrument, keyed by market order id so snapshot
    /// emission is naturally ordered.
    shadow: Vec<BTreeMap<OrderId, MarketUpdate>>,
    /// Sequence number of the last incremental applied; 0 before the first.
    last_inc_seq: u64,
    interval: Duration,
    last_published: Instant,
    run: Arc<AtomicBool>,
}

impl SnapshotSynthesizer {
    /// Connects the snapshot multicast publisher on `group:port`.
    pub fn new(
        group: Ipv4Addr,
        port: u16,
        feed: Consumer<SequencedUpdate>,
        interval: Duration,
        run: Arc<AtomicBool>,
    ) -> Result<Self, NetError> {
        Ok(SnapshotSynthesizer {
            feed,
            socket: McastSocket::publisher(group, port)?,
            shadow: (0..MAX_TICKERS).map(|_| BTreeMap::new()).collect(),
            last_inc_seq: 0,
            interval,
            last_published: Instant::now(),
            run,
        })
    }

    /// Applies one stamped update to the shadow. Sequence numbers must
    /// arrive contiguously; anything else means the feed ring dropped data,
    /// which the design rules out.
    pub fn absorb(&mut self, sequenced: SequencedUpdate) {
        let update = sequenced.update;
        assert_eq!(
            sequenced.seq_num,
            self.last_inc_seq + 1,
            "snapshot feed skipped an incremental sequence"
        );
        self.last_inc_seq = sequenced.seq_num;

        let orders = self
            .shadow
            .get_mut(update.ticker_id as usize)
            .unwrap_or_else(|| panic!("update for unknown ticker {}", update.ticker_id));
        match update.kind {
            UpdateKind::Add => {
                let prior = orders.insert(update.order_id, update);
                assert!(prior.is_none(), "ADD for an order id already resting");
            }
            UpdateKind::Modify => {
                let order = orders
                    .get_mut(&update.order_id)
                    .expect("MODIFY for an order id not resting");
                assert_eq!(order.side, update.side, "MODIFY changed side");
                order.qty = update.qty;
                order.price = update.price;
            }
            UpdateKind::Cancel => {
                let removed = orders.remove(&update.order_id);
                let removed = removed.expect("CANCEL for an order id not resting");
                assert_eq!(removed.side, update.side, "CANCEL side mismatch");
            }
            UpdateKind::Trade
            | UpdateKind::Clear
            | UpdateKind::SnapshotStart
            | UpdateKind::SnapshotEnd
            | UpdateKind::Invalid => {}
        }
        trace!(seq = sequenced.seq_num, kind = %update.kind, "shadow updated");
    }

    /// Builds the full snapshot batch: START, then per instrument a CLEAR
    /// followed by one ADD per resting order in order-id order, then END.
    /// The batch's own sequence numbers restart at 0; START and END carry
    /// the last applied incremental sequence in `order_id`.
    pub fn build_snapshot(&self) -> Vec<SequencedUpdate> {
        let mut batch = Vec::with_capacity(2 + MAX_TICKERS + self.resting_orders());
        let mut seq = 0u64;
        let mut push = |batch: &mut Vec<SequencedUpdate>, update: MarketUpdate| {
            batch.push(SequencedUpdate {
                seq_num: seq,
                update,
            });
            seq += 1;
        };

        push(
            &mut batch,
            MarketUpdate {
                kind: UpdateKind::SnapshotStart,
                order_id: self.last_inc_seq,
                ..MarketUpdate::default()
            },
        );
        for (ticker_id, orders) in self.shadow.iter().enumerate() {
            push(
                &mut batch,
                MarketUpdate {
                    kind: UpdateKind::Clear,
                    ticker_id: ticker_id as TickerId,
                    ..MarketUpdate::default()
                },
            );
            for order in orders.values() {
                push(&mut batch, *order);
            }
        }
        push(
            &mut batch,
            MarketUpdate {
                kind: UpdateKind::SnapshotEnd,
                order_id: self.last_inc_seq,
                ..MarketUpdate::default()
            },
        );
        batch
    }

    /// Multicasts one snapshot batch.
    pub fn publish_snapshot(&mut self) {
        let batch = self.build_snapshot();
        let records = batch.len();
        for sequenced in batch {
            let msg: MdpMarketUpdateMsg = sequenced.into();
            self.socket.stage(msg.as_bytes());
        }
        self.socket.flush();
        info!(
            records,
            last_inc_seq = self.last_inc_seq,
            "published snapshot"
        );
    }

    /// Resting orders across all instruments.
    pub fn resting_orders(&self) -> usize {
        self.shadow.iter().map(BTreeMap::len).sum()
    }

    /// Sequence number of the last incremental applied to the shadow.
    pub fn last_inc_seq(&self) -> u64 {
        self.last_inc_seq
    }

    /// Drains the feed, then publishes when the cadence elapses.
    pub fn poll_once(&mut self) {
        while let Some(sequenced) = self.feed.pop() {
            self.absorb(sequenced);
        }
        if self.last_published.elapsed() >= self.interval {
            self.publish_snapshot();
            self.last_published = Instant::now();
        }
    }

    /// Busy-spins until the run flag drops.
    pub fn run(&mut self) {
        debug!("snapshot synthesizer running");
        while self.run.load(Ordering::Acquire) {
            self.poll_once();
        }
        debug!("snapshot synthesizer stopped");
    }

    /// Moves the synthesizer onto its own named thread.
    pub fn spawn(mut self) -> JoinHandle<()> {
        thread::Builder::new()
            .name("exchange-md-snap".into())
            .spawn(move || self.run())
            .expect("spawn snapshot synthesizer thread")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spsc;
    use crate::types::Side;

    fn synthesizer() -> SnapshotSynthesizer {
        let (_tx, rx) = spsc::ring(16);
        SnapshotSynthesizer::new(
            Ipv4Addr::new(239, 255, 0, 9),
            20021,
            rx,
            SNAPSHOT_INTERVAL,
            Arc::new(AtomicBool::new(true)),
        )
        .unwrap()
    }

    fn add(seq: u64, ticker: u32, oid: u64, qty: u32) -> SequencedUpdate {
        SequencedUpdate {
            seq_num: seq,
            update: MarketUpdate {
                kind: UpdateKind::Add,
                order_id: oid,
                ticker_id: ticker,
                side: Side::Sell,
                price: 50,
                qty,
                priority: 1,
            },
        }
    }

    fn with_kind(base: SequencedUpdate, kind: UpdateKind) -> SequencedUpdate {
        SequencedUpdate {
            update: MarketUpdate {
                kind,
                ..base.update
            },
            ..base
        }
    }

    #[test]
    fn shadow_tracks_add_modify_cancel() {
        let mut synth = synthesizer();
        synth.absorb(add(1, 0, 10, 100));
        synth.absorb(add(2, 0, 11, 50));
        assert_eq!(synth.resting_orders(), 2);

        let mut modify = add(3, 0, 10, 60);
        modify.update.kind = UpdateKind::Modify;
        synth.absorb(modify);

        let mut cancel = add(4, 0, 11, 0);
        cancel.update.kind = UpdateKind::Cancel;
        synth.absorb(cancel);

        assert_eq!(synth.resting_orders(), 1);
        assert_eq!(synth.last_inc_seq(), 4);
    }

    #[test]
    fn trades_do_not_touch_the_shadow() {
        let mut synth = synthesizer();
        synth.absorb(add(1, 0, 10, 100));
        synth.absorb(with_kind(add(2, 0, 999, 5), UpdateKind::Trade));
        assert_eq!(synth.resting_orders(), 1);
        assert_eq!(synth.last_inc_seq(), 2);
    }

    #[test]
    #[should_panic(expected = "skipped an incremental sequence")]
    fn feed_gap_is_fatal() {
        let mut synth = synthesizer();
        synth.absorb(add(1, 0, 10, 100));
        synth.absorb(add(3, 0, 11, 100));
    }

    #[test]
    #[should_panic(expected = "already resting")]
    fn duplicate_add_is_fatal() {
        let mut synth = synthesizer();
        synth.absorb(add(1, 0, 10, 100));
        synth.absorb(add(2, 0, 10, 100));
    }

    #[test]
    fn snapshot_batch_is_bracketed_and_ordered() {
        let mut synth = synthesizer();
        synth.absorb(add(1, 1, 20, 5));
        synth.absorb(add(2, 0, 10, 5));
        synth.absorb(add(3, 0, 12, 5));

        let batch = synth.build_snapshot();
        // START + one CLEAR per ticker + three orders + END.
        assert_eq!(batch.len(), 2 + MAX_TICKERS + 3);

        let seqs: Vec<u64> = batch.iter().map(|s| s.seq_num).collect();
        assert_eq!(seqs, (0..batch.len() as u64).collect::<Vec<_>>());

        let first = batch.first().unwrap();
        assert_eq!(first.update.kind, UpdateKind::SnapshotStart);
        assert_eq!(first.update.order_id, 3);
        let last = batch.last().unwrap();
        assert_eq!(last.update.kind, UpdateKind::SnapshotEnd);
        assert_eq!(last.update.order_id, 3);

        // Ticker 0's CLEAR precedes its orders, in order-id order.
        let kinds: Vec<(UpdateKind, u32, u64)> = batch[1..batch.len() - 1]
            .iter()
            .map(|s| (s.update.kind, s.update.ticker_id, s.update.order_id))
            .collect();
        let t0_clear = kinds
            .iter()
            .position(|&(k, t, _)| k == UpdateKind::Clear && t == 0)
            .unwrap();
        assert_eq!(kinds[t0_clear + 1], (UpdateKind::Add, 0, 10));
        assert_eq!(kinds[t0_clear + 2], (UpdateKind::Add, 0, 12));
        let t1_clear = kinds
            .iter()
            .position(|&(k, t, _)| k == UpdateKind::Clear && t == 1)
            .unwrap();
        assert_eq!(kinds[t1_clear + 1], (UpdateKind::Add, 1, 20));
    }
}
