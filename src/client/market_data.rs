//! Market-data consumer: follows the incremental multicast stream and, after
//! a detected gap, rebuilds its position from a snapshot.
//!
//! The protocol core lives in [`StreamSynchronizer`], which is fed decoded
//! records from either stream and owns all the staging and gap logic;
//! [`MarketDataConsumer`] couples it to the two multicast sockets and manages
//! snapshot-group membership. In sync, each incremental is forwarded to the
//! participant's update ring as it arrives. In recovery, records from both
//! streams are staged by sequence number until a complete snapshot and a
//! contiguous incremental tail line up, at which point the whole repaired
//! stream is released in order.

use crate::msg::{MarketUpdate, SequencedUpdate, UpdateKind};
use crate::net::NetError;
use crate::net::mcast::McastSocket;
use crate::spsc::Producer;
use crate::wire::{MdpMarketUpdateMsg, Records};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

/// Which multicast stream a record arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    /// The continuous sequenced stream.
    Incremental,
    /// The periodic snapshot burst.
    Snapshot,
}

/// Socket-free reassembly and recovery state machine.
pub struct StreamSynchronizer {
    out: Producer<MarketUpdate>,
    next_exp_inc_seq: u64,
    in_recovery: bool,
    snapshot_staging: BTreeMap<u64, MarketUpdate>,
    incremental_staging: BTreeMap<u64, MarketUpdate>,
}

impl StreamSynchronizer {
    /// Wraps the write half of the participant's update ring.
    pub fn new(out: Producer<MarketUpdate>) -> Self {
        StreamSynchronizer {
            out,
            next_exp_inc_seq: 1,
            in_recovery: false,
            snapshot_staging: BTreeMap::new(),
            incremental_staging: BTreeMap::new(),
        }
    }

    /// Whether the consumer currently needs the snapshot stream.
    pub fn in_recovery(&self) -> bool {
        self.in_recovery
    }

    /// The next incremental sequence number that will be applied.
    pub fn next_expected(&self) -> u64 {
        self.next_exp_inc_seq
    }

    /// Feeds one decoded record from `feed`.
    pub fn on_record(&mut self, feed: Feed, record: SequencedUpdate) {
        if feed == Feed::Snapshot && !self.in_recovery {
            // Stale membership; nothing to do with snapshot data in sync.
            return;
        }

        if !self.in_recovery {
            if record.seq_num == self.next_exp_inc_seq {
                self.next_exp_inc_seq += 1;
                self.out.push(record.update);
                return;
            }
            warn!(
                expected = self.next_exp_inc_seq,
                received = record.seq_num,
                "incremental gap, entering recovery"
            );
            self.snapshot_staging.clear();
            self.incremental_staging.clear();
            self.in_recovery = true;
        }

        self.queue(feed, record);
        self.check_snapshot_sync();
    }

    fn queue(&mut self, feed: Feed, record: SequencedUpdate) {
        match feed {
            Feed::Snapshot => {
                if self.snapshot_staging.contains_key(&record.seq_num) {
                    // The same snapshot sequence twice means we straddled two
                    // cycles; restart collection with the fresh one.
                    warn!(seq = record.seq_num, "snapshot record repeated, restarting staging");
                    self.snapshot_staging.clear();
                }
                self.snapshot_staging.insert(record.seq_num, record.update);
            }
            Feed::Incremental => {
                self.incremental_staging.insert(record.seq_num, record.update);
            }
        }
        trace!(
            snapshot = self.snapshot_staging.len(),
            incremental = self.incremental_staging.len(),
            "staged while recovering"
        );
    }

    /// Attempts to stitch the staged snapshot and incremental tail into one
    /// repaired stream; on success releases it and leaves recovery.
    fn check_snapshot_sync(&mut self) {
        let Some((&first_seq, first)) = self.snapshot_staging.first_key_value() else {
            return;
        };
        if first.kind != UpdateKind::SnapshotStart || first_seq != 0 {
            // Joined mid-cycle; drop what we have and wait for the next START.
            self.snapshot_staging.clear();
            return;
        }

        let mut expected = 0u64;
        for &seq in self.snapshot_staging.keys() {
            if seq != expected {
                warn!(expected, found = seq, "gap inside snapshot staging");
                self.snapshot_staging.clear();
                return;
            }
            expected += 1;
        }

        let (_, last) = self.snapshot_staging.last_key_value().expect("non-empty");
        if last.kind != UpdateKind::SnapshotEnd {
            // Snapshot still streaming in.
            return;
        }
        let snapshot_consistent_seq = last.order_id;

        // The snapshot covers everything through `snapshot_consistent_seq`;
        // the staged incrementals must continue it without a hole.
        let mut next_inc = snapshot_consistent_seq + 1;
        let mut tail: Vec<MarketUpdate> = Vec::new();
        for (&seq, update) in &self.incremental_staging {
            if seq < next_inc {
                continue;
            }
            if seq != next_inc {
                warn!(
                    expected = next_inc,
                    found = seq,
                    "gap in staged incrementals, waiting for more"
                );
                self.snapshot_staging.clear();
                return;
            }
            tail.push(*update);
            next_inc += 1;
        }

        let recovered_orders = self
            .snapshot_staging
            .values()
            .filter(|u| !matches!(u.kind, UpdateKind::SnapshotStart | UpdateKind::SnapshotEnd))
            .count();
        for update in self
            .snapshot_staging
            .values()
            .filter(|u| !matches!(u.kind, UpdateKind::SnapshotStart | UpdateKind::SnapshotEnd))
        {
            self.out.push(*update);
        }
        for update in &tail {
            self.out.push(*update);
        }

        info!(
            recovered_orders,
            incrementals = tail.len(),
            next_expected = next_inc,
            "recovery complete"
        );
        self.next_exp_inc_seq = next_inc;
        self.snapshot_staging.clear();
        self.incremental_staging.clear();
        self.in_recovery = false;
    }
}

/// Couples the synchronizer to the incremental and snapshot multicast
/// sockets, joining the snapshot group only while recovering.
pub struct MarketDataConsumer {
    incremental: McastSocket,
    snapshot: McastSocket,
    sync: StreamSynchronizer,
    run: Arc<AtomicBool>,
}

impl MarketDataConsumer {
    /// Subscribes to the incremental group immediately; the snapshot group
    /// is joined lazily on gap detection.
    pub fn new(
        incremental_group: Ipv4Addr,
        incremental_port: u16,
        snapshot_group: Ipv4Addr,
        snapshot_port: u16,
        out: Producer<MarketUpdate>,
        run: Arc<AtomicBool>,
    ) -> Result<Self, NetError> {
        let mut incremental = McastSocket::subscriber(incremental_group, incremental_port)?;
        incremental.join()?;
        let snapshot = McastSocket::subscriber(snapshot_group, snapshot_port)?;
        Ok(MarketDataConsumer {
            incremental,
            snapshot,
            sync: StreamSynchronizer::new(out),
            run,
        })
    }

    /// One receive cycle over both sockets plus membership reconciliation.
    pub fn poll_once(&mut self) {
        let sync = &mut self.sync;
        self.incremental
            .send_and_recv(|bytes, _rx| Self::drain(sync, Feed::Incremental, bytes));
        self.snapshot
            .send_and_recv(|bytes, _rx| Self::drain(sync, Feed::Snapshot, bytes));

        if self.sync.in_recovery() && !self.snapshot.is_joined() {
            if let Err(e) = self.snapshot.join() {
                warn!(error = %e, "failed to join snapshot group");
            }
        } else if !self.sync.in_recovery() && self.snapshot.is_joined() {
            self.snapshot.leave();
        }
    }

    fn drain(sync: &mut StreamSynchronizer, feed: Feed, bytes: &[u8]) -> usize {
        let mut records = Records::<MdpMarketUpdateMsg>::new(bytes);
        for msg in records.by_ref() {
            sync.on_record(feed, msg.into());
        }
        records.consumed()
    }

    /// Busy-spins until the run flag drops.
    pub fn run(&mut self) {
        debug!("market data consumer running");
        while self.run.load(Ordering::Acquire) {
            self.poll_once();
        }
        debug!("market data consumer stopped");
    }

    /// Moves the consumer onto its own named thread.
    pub fn spawn(mut self) -> JoinHandle<()> {
        thread::Builder::new()
            .name("trading-md-consumer".into())
            .spawn(move || self.run())
            .expect("spawn market data consumer thread")
    }
}
