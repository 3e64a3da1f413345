//! Market-data publisher: stamps the matching engine's updates with the
//! global incremental sequence, multicasts them on the incremental group and
//! forks a copy to the snapshot synthesizer.
//!
//! The sequence starts at 1 and increments by exactly one per update, which
//! is the property the consumer's gap detection relies on.

use crate::msg::{MarketUpdate, SequencedUpdate};
use crate::net::NetError;
use crate::net::mcast::McastSocket;
use crate::spsc::{Consumer, Producer};
use crate::wire::MdpMarketUpdateMsg;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, trace};
use zerocopy::IntoBytes;

/// Publishes the incremental stream and feeds the snapshot synthesizer.
pub struct MarketDataPublisher {
    updates: Consumer<MarketUpdate>,
    snapshot_feed: Producer<SequencedUpdate>,
    incremental: McastSocket,
    next_seq: u64,
    run: Arc<AtomicBool>,
}

impl MarketDataPublisher {
    /// Connects the incremental multicast publisher on `group:port`.
    pub fn new(
        group: Ipv4Addr,
        port: u16,
        updates: Consumer<MarketUpdate>,
        snapshot_feed: Producer<SequencedUpdate>,
        run: Arc<AtomicBool>,
    ) -> Result<Self, NetError> {
        Ok(MarketDataPublisher {
            updates,
            snapshot_feed,
            incremental: McastSocket::publisher(group, port)?,
            next_seq: 1,
            run,
        })
    }

    /// Drains the update ring once: every update goes out stamped on the
    /// wire and, with the same stamp, into the snapshot ring.
    pub fn poll_once(&mut self) {
        while let Some(update) = self.updates.pop() {
            let sequenced = SequencedUpdate {
                seq_num: self.next_seq,
                update,
            };
            trace!(seq = self.next_seq, %update, "publishing incremental");
            let msg: MdpMarketUpdateMsg = sequenced.into();
            self.incremental.stage(msg.as_bytes());
            self.snapshot_feed.push(sequenced);
            self.next_seq += 1;
        }
        self.incremental.flush();
    }

    /// Busy-spins until the run flag drops, then drains the ring.
    pub fn run(&mut self) {
        debug!("market data publisher running");
        while self.run.load(Ordering::Acquire) {
            self.poll_once();
        }
        self.poll_once();
        debug!("market data publisher stopped");
    }

    /// Moves the publisher onto its own named thread.
    pub fn spawn(mut self) -> JoinHandle<()> {
        thread::Builder::new()
            .name("exchange-md-pub".into())
            .spawn(move || self.run())
            .expect("spawn market data publisher thread")
    }
}
