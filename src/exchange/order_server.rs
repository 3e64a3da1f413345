//! Order gateway server: the exchange's TCP front door.
//!
//! Validates each session's inbound sequence numbers, binds clients to the
//! connection they first spoke on, timestamps accepted requests and hands
//! them to the FIFO sequencer; ships matching-engine responses back with
//! per-client outgoing sequence numbers. Protocol violations (wrong session,
//! wrong sequence) are logged and dropped; the client notices the missing
//! response and reconnects.

use super::sequencer::FifoSequencer;
use crate::msg::{ClientRequest, ClientResponse};
use crate::net::NetError;
use crate::net::server::{ConnId, ServerEvents, TcpServer};
use crate::net::tcp::TcpConn;
use crate::spsc::{Consumer, Producer};
use crate::types::{MAX_CLIENTS, Nanos};
use crate::wire::{OmClientRequestMsg, OmClientResponseMsg, Records};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::io;
use tracing::{debug, warn};
use zerocopy::IntoBytes;
use zerocopy::byteorder::little_endian::U64;

/// Per-client session state and the request path into the sequencer.
/// Split from [`OrderServer`] so the server's poll loop can borrow it as the
/// event handler while the outbound path borrows the connection set.
struct Gateway {
    sequencer: FifoSequencer,
    /// Connection a client is bound to; set on first valid record.
    session: Vec<Option<ConnId>>,
    /// Next sequence number expected from each client. Starts at 1.
    next_exp_seq: Vec<u64>,
    /// Next sequence number stamped on each client's responses. Starts at 1.
    next_out_seq: Vec<u64>,
}

impl Gateway {
    fn new(requests: Producer<ClientRequest>) -> Self {
        Gateway {
            sequencer: FifoSequencer::new(requests),
            session: vec![None; MAX_CLIENTS],
            next_exp_seq: vec![1; MAX_CLIENTS],
            next_out_seq: vec![1; MAX_CLIENTS],
        }
    }

    /// Validates one framed record and stages it for sequencing. Returns
    /// whether the record was accepted (tests observe this; the wire path
    /// does not).
    fn handle_record(&mut self, conn_id: ConnId, record: OmClientRequestMsg, rx_ns: Nanos) -> bool {
        let request: ClientRequest = record.request.into();
        let client_id = request.client_id as usize;
        if client_id >= MAX_CLIENTS {
            warn!(client = request.client_id, "request from out-of-range client id");
            return false;
        }
        match self.session[client_id] {
            None => self.session[client_id] = Some(conn_id),
            Some(bound) if bound != conn_id => {
                warn!(
                    client = request.client_id,
                    bound, conn_id, "request from wrong session"
                );
                return false;
            }
            Some(_) => {}
        }
        let seq_num = record.seq_num.get();
        if seq_num != self.next_exp_seq[client_id] {
            warn!(
                client = request.client_id,
                expected = self.next_exp_seq[client_id],
                received = seq_num,
                "bad inbound sequence number"
            );
            return false;
        }
        self.next_exp_seq[client_id] += 1;
        self.sequencer.add_request(rx_ns, request);
        true
    }
}

impl ServerEvents for Gateway {
    fn on_data(&mut self, conn_id: ConnId, conn: &mut TcpConn, rx_ns: Nanos) {
        let mut records = Records::<OmClientRequestMsg>::new(conn.buffer());
        for record in records.by_ref() {
            self.handle_record(conn_id, record, rx_ns);
        }
        let consumed = records.consumed();
        conn.consume(consumed);
    }

    fn on_batch_done(&mut self) {
        self.sequencer.sequence_and_publish();
    }

    fn on_disconnect(&mut self, conn_id: ConnId) {
        // Unbind so the client can reconnect; its sequence numbers survive.
        for slot in self.session.iter_mut() {
            if *slot == Some(conn_id) {
                *slot = None;
            }
        }
    }
}

/// The exchange-side order gateway: TCP server, session validation, FIFO
/// sequencing inbound and sequence stamping outbound.
pub struct OrderServer {
    server: TcpServer,
    gateway: Gateway,
    responses: Consumer<ClientResponse>,
    run: Arc<AtomicBool>,
}

impl OrderServer {
    /// Binds the gateway on `addr` and wires it between the participant
    /// sessions and the matcher's rings.
    pub fn new(
        addr: SocketAddr,
        requests: Producer<ClientRequest>,
        responses: Consumer<ClientResponse>,
        run: Arc<AtomicBool>,
    ) -> Result<Self, NetError> {
        Ok(OrderServer {
            server: TcpServer::listen(addr)?,
            gateway: Gateway::new(requests),
            responses,
            run,
        })
    }

    /// The bound gateway address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.server.local_addr()
    }

    /// One cycle: poll readiness, read and sequence inbound records, then
    /// stage every pending response on its client's session.
    pub fn poll_once(&mut self) {
        self.server.poll(&mut self.gateway);
        self.server.send_and_recv(&mut self.gateway);

        while let Some(response) = self.responses.pop() {
            let client_id = response.client_id as usize;
            let Some(conn_id) = self
                .gateway
                .session
                .get(client_id)
                .copied()
                .flatten()
            else {
                // A response for a client that never bound a session means
                // the matcher and gateway disagree about who exists.
                if self.gateway.next_exp_seq.get(client_id).is_none_or(|&s| s == 1) {
                    panic!("response for unknown client {}", response.client_id);
                }
                warn!(client = response.client_id, "dropping response for disconnected client");
                continue;
            };
            let seq_num = self.gateway.next_out_seq[client_id];
            let framed = OmClientResponseMsg {
                seq_num: U64::new(seq_num),
                response: response.into(),
            };
            match self.server.conn_mut(conn_id) {
                Some(conn) => {
                    conn.stage(framed.as_bytes());
                    self.gateway.next_out_seq[client_id] += 1;
                }
                None => {
                    warn!(client = response.client_id, conn_id, "session vanished before send");
                }
            }
        }
        self.server.flush_staged();
    }

    /// Busy-spins until the run flag drops, then performs a final cycle to
    /// drain staged output.
    pub fn run(&mut self) {
        debug!("order server running");
        while self.run.load(Ordering::Acquire) {
            self.poll_once();
        }
        self.poll_once();
        debug!("order server stopped");
    }

    /// Moves the server onto its own named thread.
    pub fn spawn(mut self) -> JoinHandle<()> {
        thread::Builder::new()
            .name("exchange-order-gw".into())
            .spawn(move || self.run())
            .expect("spawn order server thread")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::RequestKind;
    use crate::spsc;
    use crate::types::Side;
    use zerocopy::byteorder::little_endian::U64;

    fn framed(seq: u64, client: u32, oid: u64) -> OmClientRequestMsg {
        OmClientRequestMsg {
            seq_num: U64::new(seq),
            request: ClientRequest {
                kind: RequestKind::New,
                client_id: client,
                ticker_id: 0,
                order_id: oid,
                side: Side::Buy,
                price: 50,
                qty: 10,
            }
            .into(),
        }
    }

    #[test]
    fn accepts_contiguous_sequence_numbers() {
        let (tx, mut rx) = spsc::ring(16);
        let mut gw = Gateway::new(tx);
        assert!(gw.handle_record(0, framed(1, 3, 10), 100));
        assert!(gw.handle_record(0, framed(2, 3, 11), 101));
        gw.on_batch_done();
        assert_eq!(rx.pop().unwrap().order_id, 10);
        assert_eq!(rx.pop().unwrap().order_id, 11);
    }

    #[test]
    fn drops_wrong_sequence_without_repair() {
        let (tx, mut rx) = spsc::ring(16);
        let mut gw = Gateway::new(tx);
        assert!(gw.handle_record(0, framed(1, 3, 10), 100));
        assert!(!gw.handle_record(0, framed(3, 3, 11), 101)); // gap
        assert!(gw.handle_record(0, framed(2, 3, 12), 102)); // expected stays 2
        gw.on_batch_done();
        assert_eq!(rx.pop().unwrap().order_id, 10);
        assert_eq!(rx.pop().unwrap().order_id, 12);
        assert!(rx.pop().is_none());
    }

    #[test]
    fn drops_records_from_a_second_session() {
        let (tx, mut rx) = spsc::ring(16);
        let mut gw = Gateway::new(tx);
        assert!(gw.handle_record(0, framed(1, 3, 10), 100));
        assert!(!gw.handle_record(1, framed(2, 3, 11), 101));
        gw.on_batch_done();
        assert_eq!(rx.pop().unwrap().order_id, 10);
        assert!(rx.pop().is_none());
    }

    #[test]
    fn rebinds_after_disconnect() {
        let (tx, mut rx) = spsc::ring(16);
        let mut gw = Gateway::new(tx);
        assert!(gw.handle_record(0, framed(1, 3, 10), 100));
        gw.on_disconnect(0);
        // Same client on a new connection; sequence numbers carry over.
        assert!(!gw.handle_record(1, framed(1, 3, 11), 101));
        assert!(gw.handle_record(1, framed(2, 3, 12), 102));
        gw.on_batch_done();
        assert_eq!(rx.pop().unwrap().order_id, 10);
        assert_eq!(rx.pop().unwrap().order_id, 12);
    }

    #[test]
    fn out_of_range_client_is_dropped() {
        let (tx, mut rx) = spsc::ring(16);
        let mut gw = Gateway::new(tx);
        assert!(!gw.handle_record(0, framed(1, u32::MAX - 1, 10), 100));
        gw.on_batch_done();
        assert!(rx.pop().is_none());
    }
}
