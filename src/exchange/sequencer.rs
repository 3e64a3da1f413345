//! FIFO fairness sequencer.
//!
//! Within one poll batch the order server reads its client sockets in
//! readiness-iteration order, which has nothing to do with wire arrival.
//! Requests therefore accumulate here with their kernel receive timestamps
//! and are released to the matching engine sorted by that timestamp, imposing
//! a single global arrival order across all sessions. The sort is stable, so
//! records from one socket (equal timestamps included) keep their stream
//! order.

use crate::msg::ClientRequest;
use crate::spsc::Producer;
use crate::types::{MAX_PENDING_REQUESTS, Nanos};
use tracing::trace;

/// Batches requests during a read cycle and publishes them in receive order.
pub struct FifoSequencer {
    pending: Vec<(Nanos, ClientRequest)>,
    requests: Producer<ClientRequest>,
}

impl FifoSequencer {
    /// Wraps the write half of the matching engine's request ring.
    pub fn new(requests: Producer<ClientRequest>) -> Self {
        FifoSequencer {
            pending: Vec::with_capacity(MAX_PENDING_REQUESTS),
            requests,
        }
    }

    /// Stages one request read at kernel time `rx_ns`. Overflowing the batch
    /// scratch means the poll loop is outrunning its sizing and is fatal.
    #[track_caller]
    pub fn add_request(&mut self, rx_ns: Nanos, request: ClientRequest) {
        if self.pending.len() >= MAX_PENDING_REQUESTS {
            panic!("fifo sequencer scratch overflow ({MAX_PENDING_REQUESTS} pending requests)");
        }
        self.pending.push((rx_ns, request));
    }

    /// Number of requests staged in the current batch.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Sorts the staged batch by receive time and moves it into the request
    /// ring. Called once per poll batch from the server's recv-finished hook.
    pub fn sequence_and_publish(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        trace!(batch = self.pending.len(), "sequencing batch");
        self.pending.sort_by_key(|&(rx_ns, _)| rx_ns);
        for (rx_ns, request) in self.pending.drain(..) {
            trace!(rx_ns, %request, "publishing to matcher");
            self.requests.push(request);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::RequestKind;
    use crate::spsc;
    use crate::types::Side;

    fn request(oid: u64) -> ClientRequest {
        ClientRequest {
            kind: RequestKind::New,
            client_id: 1,
            ticker_id: 0,
            order_id: oid,
            side: Side::Buy,
            price: 50,
            qty: 1,
        }
    }

    #[test]
    fn publishes_in_receive_time_order() {
        let (tx, mut rx) = spsc::ring(16);
        let mut seq = FifoSequencer::new(tx);

        // Socket iteration produced R1 before R2, but R2 arrived earlier.
        seq.add_request(100, request(1));
        seq.add_request(95, request(2));
        seq.sequence_and_publish();

        assert_eq!(rx.pop().unwrap().order_id, 2);
        assert_eq!(rx.pop().unwrap().order_id, 1);
        assert!(rx.pop().is_none());
        assert_eq!(seq.pending(), 0);
    }

    #[test]
    fn equal_timestamps_keep_stream_order() {
        let (tx, mut rx) = spsc::ring(16);
        let mut seq = FifoSequencer::new(tx);
        for oid in 0..5 {
            seq.add_request(77, request(oid));
        }
        seq.sequence_and_publish();
        for oid in 0..5 {
            assert_eq!(rx.pop().unwrap().order_id, oid);
        }
    }

    #[test]
    fn empty_batch_publishes_nothing() {
        let (tx, mut rx) = spsc::ring(16);
        let mut seq = FifoSequencer::new(tx);
        seq.sequence_and_publish();
        assert!(rx.pop().is_none());
    }

    #[test]
    #[should_panic(expected = "scratch overflow")]
    fn scratch_overflow_is_fatal() {
        let (tx, _rx) = spsc::ring(16);
        let mut seq = FifoSequencer::new(tx);
        for i in 0..=MAX_PENDING_REQUESTS as u64 {
            seq.add_request(i, request(i));
        }
    }
}
